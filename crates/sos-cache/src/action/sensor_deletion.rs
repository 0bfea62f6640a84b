use super::require;
use crate::content::ContentCache;
use crate::update::ContentCacheUpdate;
use sos_common::Result;
use tracing::debug;

/// Removes a deleted sensor and everything only it contributed
///
/// Offerings shared with other procedures stay in the cache; offerings
/// left without a procedure are removed with their bounds, names, features
/// and result templates. Global bounds are recomputed from what remains.
#[derive(Clone, Debug)]
pub struct SensorDeletionUpdate {
    procedure: String,
}

impl SensorDeletionUpdate {
    pub fn new(procedure: impl Into<String>) -> Result<Self> {
        let procedure = procedure.into();
        require("procedure identifier", &procedure)?;
        Ok(Self { procedure })
    }
}

impl ContentCacheUpdate for SensorDeletionUpdate {
    fn execute(&self, cache: &mut ContentCache) -> Result<()> {
        let procedure = self.procedure.as_str();
        if !cache.has_procedure(procedure) && cache.offerings_for_procedure(procedure).is_empty() {
            debug!("Procedure '{}' is not cached; nothing to delete", procedure);
            return Ok(());
        }

        let offerings: Vec<String> = cache.offerings_for_procedure(procedure).iter().cloned().collect();
        let mut removed = 0usize;
        for offering in &offerings {
            cache.unlink_offering_procedure(offering, procedure);
            if cache.procedures_for_offering(offering).is_empty() {
                cache.remove_offering(offering);
                removed += 1;
            }
        }

        cache.remove_procedure(procedure);
        cache.remove_unreferenced();
        cache.recompute_global_bounds();

        debug!(
            "Deleted sensor '{}' from the content cache ({} of {} offerings removed)",
            procedure,
            removed,
            offerings.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sos_common::{Envelope, TimePeriod, DEFAULT_EPSG_CODE};

    fn populated() -> ContentCache {
        let mut cache = ContentCache::default();
        for (proc, off, t, x) in [("proc-1", "off-1", 10, 1.0), ("proc-2", "off-2", 20, 5.0)] {
            cache.add_procedure(proc);
            cache.add_offering(off);
            cache.set_offering_name(off, &format!("name of {off}"));
            cache.link_offering_procedure(off, proc);
            cache.add_observable_property(&format!("prop-{proc}"));
            cache.link_offering_observable_property(off, &format!("prop-{proc}"));
            cache.link_procedure_observable_property(proc, &format!("prop-{proc}"));
            cache.add_feature_of_interest(&format!("foi-{proc}"));
            cache.add_feature_for_offering(off, &format!("foi-{proc}"));
            cache.link_feature_procedure(&format!("foi-{proc}"), proc);
            cache.add_observation_identifier_for_procedure(proc, &format!("obs-{proc}"));
            cache.extend_phenomenon_time_for_offering(off, TimePeriod::instant(t));
            cache.extend_envelope_for_offering(off, Envelope::point(DEFAULT_EPSG_CODE, x, x));
            cache.add_result_template(&format!("tmpl-{off}"));
            cache.add_result_template_for_offering(off, &format!("tmpl-{off}"));
        }
        cache
    }

    #[test]
    fn test_sensor_deletion() {
        let mut cache = populated();
        SensorDeletionUpdate::new("proc-1")
            .unwrap()
            .execute(&mut cache)
            .unwrap();

        assert!(!cache.has_procedure("proc-1"));
        assert!(!cache.has_offering("off-1"));
        assert_eq!(cache.offering_name("off-1"), None);
        assert!(!cache.observable_properties().contains("prop-proc-1"));
        assert!(!cache.features_of_interest().contains("foi-proc-1"));
        assert!(!cache.observation_identifiers().contains("obs-proc-1"));
        assert!(!cache.has_result_template("tmpl-off-1"));
        assert_eq!(cache.phenomenon_time_for_offering("off-1"), None);
        assert!(cache.envelope_for_offering("off-1").is_none());

        // Remaining sensor untouched, global bounds shrink to it
        assert!(cache.has_procedure("proc-2"));
        assert!(cache.features_of_interest().contains("foi-proc-2"));
        assert_eq!(cache.phenomenon_time(), Some(TimePeriod::instant(20)));
        assert_eq!(
            cache.global_envelope(),
            Some(&Envelope::point(DEFAULT_EPSG_CODE, 5.0, 5.0))
        );
    }

    #[test]
    fn test_shared_offering_survives() {
        let mut cache = populated();
        cache.link_offering_procedure("off-2", "proc-1");

        SensorDeletionUpdate::new("proc-1")
            .unwrap()
            .execute(&mut cache)
            .unwrap();

        assert!(cache.has_offering("off-2"));
        assert!(!cache.procedures_for_offering("off-2").contains("proc-1"));
        assert!(cache.procedures_for_offering("off-2").contains("proc-2"));
    }

    #[test]
    fn test_deleting_last_sensor_clears_bounds() {
        let mut cache = populated();
        for proc in ["proc-1", "proc-2"] {
            SensorDeletionUpdate::new(proc)
                .unwrap()
                .execute(&mut cache)
                .unwrap();
        }
        assert!(cache.is_empty());
        assert_eq!(cache.phenomenon_time(), None);
        assert!(cache.global_envelope().is_none());
    }

    #[test]
    fn test_sensor_deletion_is_idempotent() {
        let update = SensorDeletionUpdate::new("proc-1").unwrap();
        let mut once = populated();
        update.execute(&mut once).unwrap();
        let mut twice = once.clone();
        update.execute(&mut twice).unwrap();
        assert_eq!(once, twice);

        assert!(SensorDeletionUpdate::new("").is_err());
    }
}
