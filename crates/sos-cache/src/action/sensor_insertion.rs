use super::{require, require_all};
use crate::content::ContentCache;
use crate::update::ContentCacheUpdate;
use serde::{Deserialize, Serialize};
use sos_common::{Error, Result};
use tracing::debug;

/// Offering a sensor was assigned to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferingDescription {
    pub identifier: String,
    pub name: Option<String>,
}

/// Feature related to the sensor's offerings in the given role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedFeature {
    pub feature: String,
    pub role: String,
}

/// Accepted InsertSensor request together with the assigned identifiers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorInsertion {
    pub procedure: String,
    pub offerings: Vec<OfferingDescription>,
    pub parent_procedures: Vec<String>,
    pub observable_properties: Vec<String>,
    pub observation_types: Vec<String>,
    pub related_features: Vec<RelatedFeature>,
}

/// Registers a newly inserted sensor
#[derive(Clone, Debug)]
pub struct SensorInsertionUpdate {
    insertion: SensorInsertion,
}

impl SensorInsertionUpdate {
    pub fn new(insertion: SensorInsertion) -> Result<Self> {
        require("procedure identifier", &insertion.procedure)?;
        if insertion.offerings.is_empty() {
            return Err(Error::invalid_argument(format!(
                "sensor '{}' has no offering",
                insertion.procedure
            )));
        }
        for offering in &insertion.offerings {
            require("offering identifier", &offering.identifier)?;
        }
        require_all("parent procedure", &insertion.parent_procedures)?;
        require_all("observable property", &insertion.observable_properties)?;
        require_all("observation type", &insertion.observation_types)?;
        for related in &insertion.related_features {
            require("related feature identifier", &related.feature)?;
            require("related feature role", &related.role)?;
        }
        Ok(Self { insertion })
    }
}

impl ContentCacheUpdate for SensorInsertionUpdate {
    fn execute(&self, cache: &mut ContentCache) -> Result<()> {
        let ins = &self.insertion;
        let procedure = ins.procedure.as_str();

        cache.add_procedure(procedure);
        cache.add_parent_procedures(procedure, &ins.parent_procedures);

        for offering in &ins.offerings {
            let id = offering.identifier.as_str();
            cache.add_offering(id);
            if let Some(name) = &offering.name {
                if cache.offering_name(id).is_none() {
                    cache.set_offering_name(id, name);
                }
            }
            cache.link_offering_procedure(id, procedure);
            cache.add_allowed_observation_types_for_offering(id, &ins.observation_types);

            for related in &ins.related_features {
                cache.add_related_feature_for_offering(id, &related.feature);
            }
            for property in &ins.observable_properties {
                cache.link_offering_observable_property(id, property);
            }
        }

        for related in &ins.related_features {
            cache.add_role_for_related_feature(&related.feature, &related.role);
        }
        for property in &ins.observable_properties {
            cache.add_observable_property(property);
            cache.link_procedure_observable_property(procedure, property);
        }

        debug!(
            "Inserted sensor '{}' with {} offerings into the content cache",
            procedure,
            ins.offerings.len()
        );
        Ok(())
    }
}
