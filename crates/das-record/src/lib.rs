// das-record: canonical record model shared by the pipeline and the cache.
//
// A `DasRecord` is a timestamped bundle of field:value pairs with optional
// per-field metadata.  `RecordEnvelope` covers the wire forms a record may
// arrive in and normalizes all of them into canonical records.  `Format` is
// the compatibility lattice used to check reader/transform/writer wiring.

pub mod envelope;
pub mod formats;
pub mod record;
pub mod timestamp;

pub use envelope::{EnvelopeError, RecordEnvelope, normalize_value};
pub use formats::Format;
pub use record::{DasRecord, Record};
