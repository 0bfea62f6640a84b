use super::{features_envelope, require, require_all};
use crate::content::ContentCache;
use crate::update::ContentCacheUpdate;
use serde::{Deserialize, Serialize};
use sos_common::{Envelope, Error, Result, TimePeriod};
use tracing::debug;

/// Feature of interest observed by an inserted observation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingFeature {
    pub identifier: String,
    pub feature_type: Option<String>,
    pub geometry: Option<Envelope>,
    /// Features this one was sampled from
    #[serde(default)]
    pub sampled_features: Vec<String>,
}

/// Accepted InsertObservation request for a single observation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationInsertion {
    pub procedure: String,
    pub observable_property: String,
    pub offerings: Vec<String>,
    pub observation_type: Option<String>,
    pub observation_id: Option<String>,
    pub features: Vec<SamplingFeature>,
    pub phenomenon_time: TimePeriod,
}

/// Adds an inserted observation's procedure, features and bounds
#[derive(Clone, Debug)]
pub struct ObservationInsertionUpdate {
    insertion: ObservationInsertion,
}

impl ObservationInsertionUpdate {
    pub fn new(insertion: ObservationInsertion) -> Result<Self> {
        require("procedure identifier", &insertion.procedure)?;
        require("observable property", &insertion.observable_property)?;
        if insertion.offerings.is_empty() {
            return Err(Error::invalid_argument(format!(
                "observation of '{}' has no offering",
                insertion.procedure
            )));
        }
        require_all("offering identifier", &insertion.offerings)?;
        for feature in &insertion.features {
            require("feature identifier", &feature.identifier)?;
            require_all("sampled feature", &feature.sampled_features)?;
        }
        if let Some(id) = &insertion.observation_id {
            require("observation identifier", id)?;
        }
        Ok(Self { insertion })
    }
}

impl ContentCacheUpdate for ObservationInsertionUpdate {
    fn execute(&self, cache: &mut ContentCache) -> Result<()> {
        let ins = &self.insertion;
        let procedure = ins.procedure.as_str();
        let property = ins.observable_property.as_str();

        cache.add_procedure(procedure);
        cache.add_observable_property(property);
        cache.link_procedure_observable_property(procedure, property);

        if let Some(observation_type) = &ins.observation_type {
            cache.add_observation_type(observation_type);
        }
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
            cache.add_parent_features(id, &feature.sampled_features);
            for offering in &ins.offerings {
                cache.add_feature_for_offering(offering, id);
                cache.add_related_feature_for_offering(offering, id);
            }
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
            "Inserted observation of '{}' for '{}' into {} offerings",
            property,
            procedure,
            ins.offerings.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sos_common::DEFAULT_EPSG_CODE;
    use std::collections::BTreeSet;

    fn insertion() -> ObservationInsertion {
        ObservationInsertion {
            procedure: "proc-1".into(),
            observable_property: "temp".into(),
            offerings: vec!["off-1".into()],
            observation_type: Some("OM_Measurement".into()),
            observation_id: Some("obs-1".into()),
            features: vec![
                SamplingFeature {
                    identifier: "foi-1".into(),
                    feature_type: Some("SF_SamplingPoint".into()),
                    geometry: Some(Envelope::point(DEFAULT_EPSG_CODE, 7.0, 51.0)),
                    sampled_features: vec!["river".into()],
                },
                SamplingFeature {
                    identifier: "foi-2".into(),
                    feature_type: None,
                    geometry: Some(Envelope::point(DEFAULT_EPSG_CODE, 8.0, 52.0)),
                    sampled_features: vec!["river".into()],
                },
            ],
            phenomenon_time: TimePeriod::new(100, 200),
        }
    }

    #[test]
    fn test_observation_insertion() {
        let mut cache = ContentCache::default();
        ObservationInsertionUpdate::new(insertion())
            .unwrap()
            .execute(&mut cache)
            .unwrap();

        assert!(cache.has_procedure("proc-1"));
        assert!(cache.has_offering("off-1"));
        assert!(cache.procedures_for_observable_property("temp").contains("proc-1"));
        assert!(cache.observable_properties_for_offering("off-1").contains("temp"));
        assert!(cache.observation_types().contains("OM_Measurement"));
        assert!(cache.observation_types_for_offering("off-1").contains("OM_Measurement"));
        assert!(cache.observation_identifiers_for_procedure("proc-1").contains("obs-1"));
        assert!(cache.feature_types().contains("SF_SamplingPoint"));
        assert!(cache.features_for_offering("off-1").contains("foi-2"));
        assert!(cache.procedures_for_feature("foi-1").contains("proc-1"));
        assert!(cache.parent_features("foi-1").contains("river"));
        assert_eq!(
            cache.child_features("river"),
            &BTreeSet::from(["foi-1".to_string(), "foi-2".to_string()])
        );

        let expected = Envelope::new(DEFAULT_EPSG_CODE, 7.0, 51.0, 8.0, 52.0);
        assert_eq!(cache.envelope_for_offering("off-1"), Some(&expected));
        assert_eq!(cache.global_envelope(), Some(&expected));
        assert_eq!(cache.phenomenon_time_for_offering("off-1"), Some(TimePeriod::new(100, 200)));
        assert_eq!(cache.phenomenon_time(), Some(TimePeriod::new(100, 200)));
    }

    #[test]
    fn test_observation_insertion_extends_bounds() {
        let mut cache = ContentCache::default();
        ObservationInsertionUpdate::new(insertion())
            .unwrap()
            .execute(&mut cache)
            .unwrap();

        let mut later = insertion();
        later.observation_id = Some("obs-2".into());
        later.phenomenon_time = TimePeriod::instant(500);
        later.features = vec![SamplingFeature {
            identifier: "foi-3".into(),
            feature_type: None,
            geometry: Some(Envelope::point(DEFAULT_EPSG_CODE, 9.0, 50.0)),
            sampled_features: Vec::new(),
        }];
        ObservationInsertionUpdate::new(later)
            .unwrap()
            .execute(&mut cache)
            .unwrap();

        assert_eq!(cache.phenomenon_time(), Some(TimePeriod::new(100, 500)));
        assert_eq!(
            cache.envelope_for_offering("off-1"),
            Some(&Envelope::new(DEFAULT_EPSG_CODE, 7.0, 50.0, 9.0, 52.0))
        );
        assert_eq!(cache.observation_identifiers_for_procedure("proc-1").len(), 2);
    }

    #[test]
    fn test_sampled_features_from_json_default_to_none() {
        let feature: SamplingFeature =
            serde_json::from_str(r#"{"identifier":"foi-9","feature_type":null,"geometry":null}"#)
                .unwrap();
        assert!(feature.sampled_features.is_empty());
    }

    #[test]
    fn test_observation_insertion_is_idempotent() {
        let update = ObservationInsertionUpdate::new(insertion()).unwrap();
        let mut once = ContentCache::default();
        update.execute(&mut once).unwrap();
        let mut twice = once.clone();
        update.execute(&mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_observation_insertion_validation() {
        let mut bad = insertion();
        bad.offerings.clear();
        assert!(matches!(
            ObservationInsertionUpdate::new(bad),
            Err(Error::InvalidArgument(_))
        ));

        let mut bad = insertion();
        bad.observation_id = Some(String::new());
        assert!(ObservationInsertionUpdate::new(bad).is_err());

        let mut bad = insertion();
        bad.features[1].sampled_features.push(String::new());
        assert!(ObservationInsertionUpdate::new(bad).is_err());
    }
}
