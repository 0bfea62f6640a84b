use super::require;
use crate::content::ContentCache;
use crate::update::ContentCacheUpdate;
use serde::{Deserialize, Serialize};
use sos_common::Result;
use tracing::debug;

/// Accepted InsertResultTemplate request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTemplateInsertion {
    pub identifier: String,
    pub offering: String,
    pub observable_property: String,
    pub feature_of_interest: Option<String>,
}

/// Registers a result template with its offering, property and feature
#[derive(Clone, Debug)]
pub struct ResultTemplateInsertionUpdate {
    insertion: ResultTemplateInsertion,
}

impl ResultTemplateInsertionUpdate {
    pub fn new(insertion: ResultTemplateInsertion) -> Result<Self> {
        require("result template identifier", &insertion.identifier)?;
        require("offering identifier", &insertion.offering)?;
        require("observable property", &insertion.observable_property)?;
        if let Some(feature) = &insertion.feature_of_interest {
            require("feature identifier", feature)?;
        }
        Ok(Self { insertion })
    }
}

impl ContentCacheUpdate for ResultTemplateInsertionUpdate {
    fn execute(&self, cache: &mut ContentCache) -> Result<()> {
        let ins = &self.insertion;
        let template = ins.identifier.as_str();

        cache.add_result_template(template);
        cache.add_offering(&ins.offering);
        cache.add_result_template_for_offering(&ins.offering, template);
        cache.add_observable_property(&ins.observable_property);
        cache.link_offering_observable_property(&ins.offering, &ins.observable_property);
        cache.set_observable_property_for_result_template(template, &ins.observable_property);
        if let Some(feature) = &ins.feature_of_interest {
            cache.add_feature_of_interest(feature);
            cache.add_feature_for_result_template(template, feature);
        }

        debug!("Inserted result template '{}' for offering '{}'", template, ins.offering);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insertion() -> ResultTemplateInsertion {
        ResultTemplateInsertion {
            identifier: "tmpl-1".into(),
            offering: "off-1".into(),
            observable_property: "temp".into(),
            feature_of_interest: Some("foi-1".into()),
        }
    }

    #[test]
    fn test_result_template_insertion() {
        let update = ResultTemplateInsertionUpdate::new(insertion()).unwrap();
        let mut cache = ContentCache::default();
        update.execute(&mut cache).unwrap();

        assert!(cache.has_result_template("tmpl-1"));
        assert!(cache.result_templates_for_offering("off-1").contains("tmpl-1"));
        assert_eq!(cache.observable_property_for_result_template("tmpl-1"), Some("temp"));
        assert!(cache.features_for_result_template("tmpl-1").contains("foi-1"));
        assert!(cache.observable_properties_for_offering("off-1").contains("temp"));

        let mut again = cache.clone();
        update.execute(&mut again).unwrap();
        assert_eq!(cache, again);
    }

    #[test]
    fn test_result_template_validation() {
        let mut bad = insertion();
        bad.offering = String::new();
        assert!(ResultTemplateInsertionUpdate::new(bad).is_err());

        let mut bad = insertion();
        bad.feature_of_interest = Some(String::new());
        assert!(ResultTemplateInsertionUpdate::new(bad).is_err());
    }
}
