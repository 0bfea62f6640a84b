//! Partial updates derived from transactional SOS requests
//!
//! Each action is built from the accepted request, validates it eagerly and
//! applies only set-like insertions or removals, so replaying it on a
//! rebuilt cache yields the same content as applying it once.

mod observation_insertion;
mod result_insertion;
mod result_template;
mod sensor_deletion;
mod sensor_insertion;

pub use observation_insertion::{ObservationInsertion, ObservationInsertionUpdate, SamplingFeature};
pub use result_insertion::{ResultInsertion, ResultInsertionUpdate};
pub use result_template::{ResultTemplateInsertion, ResultTemplateInsertionUpdate};
pub use sensor_deletion::SensorDeletionUpdate;
pub use sensor_insertion::{
    OfferingDescription, RelatedFeature, SensorInsertion, SensorInsertionUpdate,
};

use sos_common::{Envelope, Error, Result};
use tracing::debug;

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid_argument(format!("missing {field}")));
    }
    Ok(())
}

fn require_all<'a, I>(field: &str, values: I) -> Result<()>
where
    I: IntoIterator<Item = &'a String>,
{
    values.into_iter().try_for_each(|v| require(field, v))
}

/// Bounding box of all observed features with a geometry
fn features_envelope(features: &[SamplingFeature]) -> Option<Envelope> {
    let mut envelope: Option<Envelope> = None;
    for geometry in features.iter().filter_map(|f| f.geometry) {
        match &mut envelope {
            Some(e) => {
                if !e.expand_to_include(&geometry) {
                    debug!(
                        "Ignoring geometry in EPSG:{} for envelope in EPSG:{}",
                        geometry.srid, e.srid
                    );
                }
            }
            None => envelope = Some(geometry),
        }
    }
    envelope
}
