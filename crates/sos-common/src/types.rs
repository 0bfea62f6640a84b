//! Value types shared by the content cache and its update actions
//!
//! Times are milliseconds since the Unix epoch. Envelopes are axis-aligned
//! bounding boxes tagged with the EPSG code of their coordinate system.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// EPSG code used when nothing else is configured (WGS 84)
pub const DEFAULT_EPSG_CODE: i32 = 4326;

/// Closed time interval `[start, end]` in epoch milliseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{start}/{end}")]
pub struct TimePeriod {
    pub start: i64,
    pub end: i64,
}

impl TimePeriod {
    /// Create a period, swapping the bounds if they are given in reverse
    #[must_use]
    pub const fn new(start: i64, end: i64) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// A zero-length period at a single instant
    #[must_use]
    pub const fn instant(at: i64) -> Self {
        Self { start: at, end: at }
    }

    /// Smallest period covering both `self` and `other`
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Spatial bounding box
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// EPSG code of the coordinates
    pub srid: i32,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Create an envelope, normalizing the corner order
    #[must_use]
    pub fn new(srid: i32, x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            srid,
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Degenerate envelope around a single point
    #[must_use]
    pub const fn point(srid: i32, x: f64, y: f64) -> Self {
        Self {
            srid,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    /// Grow this envelope to cover `other`
    ///
    /// Envelopes in a different coordinate system are ignored; the cache
    /// does not reproject.
    pub fn expand_to_include(&mut self, other: &Self) -> bool {
        if self.srid != other.srid {
            return false;
        }
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
        true
    }
}
