//! Concrete transforms.

mod from_json;
mod nmea_checksum;
mod prefix;
mod regex_replace;
mod slice;
mod timestamp;
mod to_json;
mod unique;

pub use from_json::FromJsonTransform;
pub use nmea_checksum::NmeaChecksumTransform;
pub use prefix::PrefixTransform;
pub use regex_replace::RegexReplaceTransform;
pub use slice::SliceTransform;
pub use timestamp::TimestampTransform;
pub use to_json::ToJsonTransform;
pub use unique::UniqueTransform;
