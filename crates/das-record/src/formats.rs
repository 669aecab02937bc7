//! Semantic record formats and the compatibility lattice between them.
//!
//! Each pipeline stage declares the format it emits or accepts.  A stage
//! that accepts a format higher in the lattice also accepts anything below
//! it, so a `Text` sink can take `Nmea` or `Json` input but not raw `Bytes`.
//!
//! The lattice:
//!
//! ```text
//!     Bytes
//!       Text
//!         Nmea
//!         Json
//!           JsonRecord
//!         Xml
//!       Native          (in-process structured values)
//!         NativeRecord  (a canonical DasRecord)
//! ```
//!
//! `Unknown` is incomparable with everything, including itself: it accepts
//! nothing and has no common format with anything.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Unknown,
    Bytes,
    Text,
    Nmea,
    Json,
    JsonRecord,
    Xml,
    Native,
    NativeRecord,
}

impl Format {
    /// The immediate ancestor in the lattice, or `None` for the roots.
    fn parent(self) -> Option<Format> {
        match self {
            Format::Unknown | Format::Bytes => None,
            Format::Text | Format::Native => Some(Format::Bytes),
            Format::Nmea | Format::Json | Format::Xml => Some(Format::Text),
            Format::JsonRecord => Some(Format::Json),
            Format::NativeRecord => Some(Format::Native),
        }
    }

    /// True iff `self` is an ancestor of (or equal to) `other`, i.e. a stage
    /// accepting `self` can consume records of format `other`.
    pub fn can_accept(self, other: Format) -> bool {
        if self == Format::Unknown || other == Format::Unknown {
            return false;
        }
        let mut cursor = Some(other);
        while let Some(format) = cursor {
            if format == self {
                return true;
            }
            cursor = format.parent();
        }
        false
    }

    /// Least upper bound of `self` and `other`, or `None` if they share no
    /// ancestor (always `None` when either side is `Unknown`).
    pub fn common(self, other: Format) -> Option<Format> {
        if self == Format::Unknown || other == Format::Unknown {
            return None;
        }
        let mut cursor = Some(self);
        while let Some(format) = cursor {
            if format.can_accept(other) {
                return Some(format);
            }
            cursor = format.parent();
        }
        None
    }
}
