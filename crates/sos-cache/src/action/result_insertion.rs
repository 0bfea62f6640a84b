use super::{SamplingFeature, features_envelope, require, require_all};
use crate::content::ContentCache;
use crate::update::ContentCacheUpdate;
use serde::{Deserialize, Serialize};
use sos_common::{Error, Result, TimePeriod};
use tracing::debug;

/// Observation decoded from an accepted InsertResult request
///
/// The procedure, property, offerings and observation type come from the
/// observation constellation of the referenced result template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultInsertion {
    pub template: String,
    pub procedure: String,
    pub observable_property: String,
    pub offerings: Vec<String>,
    pub observation_type: Option<String>,
    pub observation_id: Option<String>,
    pub features: Vec<SamplingFeature>,
    pub phenomenon_time: TimePeriod,
}

/// Adds the observation carried by an inserted result
#[derive(Clone, Debug)]
pub struct ResultInsertionUpdate {
    insertion: ResultInsertion,
}

impl ResultInsertionUpdate {
    pub fn new(insertion: ResultInsertion) -> Result<Self> {
        require("result template identifier", &insertion.template)?;
        require("procedure identifier", &insertion.procedure)?;
        require("observable property", &insertion.observable_property)?;
        if insertion.offerings.is_empty() {
            return Err(Error::invalid_argument(format!(
                "result for template '{}' has no offering",
                insertion.template
            )));
        }
        require_all("offering identifier", &insertion.offerings)?;
        for feature in &insertion.features {
            require("feature identifier", &feature.identifier)?;
        }
        if let Some(id) = &insertion.observation_id {
            require("observation identifier", id)?;
        }
        Ok(Self { insertion })
    }
}

impl ContentCacheUpdate for ResultInsertionUpdate {
    fn execute(&self, cache: &mut ContentCache) -> Result<()> {
        let ins = &self.insertion;
        let procedure = ins.procedure.as_str();
        let property = ins.observable_property.as_str();
        let known_template = cache.has_result_template(&ins.template);

        if let Some(observation_type) = &ins.observation_type {
            cache.add_observation_type(observation_type);
        }
        cache.add_procedure(procedure);
        cache.add_observable_property(property);
        cache.link_procedure_observable_property(procedure, property);
        if let Some(id) = &ins.observation_id {
            cache.add_observation_identifier_for_procedure(procedure, id);
        }

        for feature in &ins.features {
            let id = feature.identifier.as_str();
            cache.add_feature_of_interest(id);
            if let Some(feature_type) = &feature.feature_type {
                cache.add_feature_type(feature_type);
            }
            cache.link_feature_procedure(id, procedure);
            if known_template {
                cache.add_feature_for_result_template(&ins.template, id);
            }
            for offering in &ins.offerings {
                cache.add_feature_for_offering(offering, id);
            }
        }
        if !known_template {
            debug!(
                "Result template '{}' is not cached; features stay unlinked from it",
                ins.template
            );
        }

        let envelope = features_envelope(&ins.features);
        for offering in &ins.offerings {
            cache.add_offering(offering);
            cache.link_offering_procedure(offering, procedure);
            cache.link_offering_observable_property(offering, property);
            if let Some(observation_type) = &ins.observation_type {
                cache.add_observation_type_for_offering(offering, observation_type);
            }
            cache.extend_phenomenon_time_for_offering(offering, ins.phenomenon_time);
            if let Some(envelope) = envelope {
                cache.extend_envelope_for_offering(offering, envelope);
            }
        }

        debug!(
            "Inserted result for template '{}' into {} offerings",
            ins.template,
            ins.offerings.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sos_common::{DEFAULT_EPSG_CODE, Envelope};

    fn insertion() -> ResultInsertion {
        ResultInsertion {
            template: "tmpl-1".into(),
            procedure: "proc-1".into(),
            observable_property: "temp".into(),
            offerings: vec!["off-1".into(), "off-2".into()],
            observation_type: Some("OM_Measurement".into()),
            observation_id: Some("obs-7".into()),
            features: vec![SamplingFeature {
                identifier: "foi-1".into(),
                feature_type: Some("SF_SamplingPoint".into()),
                geometry: Some(Envelope::point(DEFAULT_EPSG_CODE, 7.0, 51.0)),
                sampled_features: Vec::new(),
            }],
            phenomenon_time: TimePeriod::new(300, 400),
        }
    }

    #[test]
    fn test_result_insertion() {
        let mut cache = ContentCache::default();
        cache.add_result_template("tmpl-1");
        cache.add_result_template_for_offering("off-1", "tmpl-1");

        ResultInsertionUpdate::new(insertion())
            .unwrap()
            .execute(&mut cache)
            .unwrap();

        assert!(cache.observation_types().contains("OM_Measurement"));
        assert!(cache.procedures_for_observable_property("temp").contains("proc-1"));
        assert!(cache.observable_properties_for_procedure("proc-1").contains("temp"));
        assert!(cache.observation_identifiers_for_procedure("proc-1").contains("obs-7"));
        assert!(cache.features_of_interest().contains("foi-1"));
        assert!(cache.procedures_for_feature("foi-1").contains("proc-1"));
        assert!(cache.features_for_result_template("tmpl-1").contains("foi-1"));
        assert_eq!(cache.phenomenon_time(), Some(TimePeriod::new(300, 400)));
        for off in ["off-1", "off-2"] {
            assert!(cache.has_offering(off));
            assert!(cache.features_for_offering(off).contains("foi-1"));
            assert!(cache.procedures_for_offering(off).contains("proc-1"));
            assert!(cache.observable_properties_for_offering(off).contains("temp"));
            assert!(cache.observation_types_for_offering(off).contains("OM_Measurement"));
            assert_eq!(cache.phenomenon_time_for_offering(off), Some(TimePeriod::new(300, 400)));
            assert_eq!(
                cache.envelope_for_offering(off),
                Some(&Envelope::point(DEFAULT_EPSG_CODE, 7.0, 51.0))
            );
        }
    }

    #[test]
    fn test_result_insertion_for_unknown_template() {
        let mut cache = ContentCache::default();
        ResultInsertionUpdate::new(insertion())
            .unwrap()
            .execute(&mut cache)
            .unwrap();

        assert!(!cache.has_result_template("tmpl-1"));
        assert!(cache.features_for_result_template("tmpl-1").is_empty());
        assert!(cache.features_for_offering("off-1").contains("foi-1"));
    }

    #[test]
    fn test_result_insertion_is_idempotent() {
        let update = ResultInsertionUpdate::new(insertion()).unwrap();
        let mut once = ContentCache::default();
        once.add_result_template("tmpl-1");
        update.execute(&mut once).unwrap();
        let mut twice = once.clone();
        update.execute(&mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_result_insertion_validation() {
        let mut bad = insertion();
        bad.template = String::new();
        assert!(matches!(
            ResultInsertionUpdate::new(bad),
            Err(Error::InvalidArgument(_))
        ));

        let mut bad = insertion();
        bad.offerings.clear();
        assert!(ResultInsertionUpdate::new(bad).is_err());
    }
}
