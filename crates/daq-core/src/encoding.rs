//! Byte-to-text decoding policy shared by the wire adapters.
//!
//! Every text-mode adapter takes an `Encoding` (UTF-8 or raw pass-through)
//! and an `EncodingErrors` strategy for invalid input.

use crate::error::DaqError;
use das_record::Record;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Utf8,
    /// No decoding; adapters return `Record::Bytes`.
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingErrors {
    /// Fail the record on invalid input.
    Strict,
    /// Substitute U+FFFD for invalid sequences.
    Replace,
    /// Drop invalid bytes.
    #[default]
    Ignore,
    /// Render invalid bytes as `\xNN` escapes.
    Backslashreplace,
}

/// Decode `bytes` into a pipeline record per the configured policy.
pub fn decode_bytes(
    bytes: &[u8],
    encoding: Encoding,
    errors: EncodingErrors,
) -> Result<Record, DaqError> {
    match encoding {
        Encoding::Raw => Ok(Record::Bytes(bytes.to_vec())),
        Encoding::Utf8 => decode_utf8(bytes, errors).map(Record::Text),
    }
}

fn decode_utf8(bytes: &[u8], errors: EncodingErrors) -> Result<String, DaqError> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_owned()),
        Err(_) if errors == EncodingErrors::Strict => {
            Err(DaqError::Decode("invalid UTF-8 in record".to_owned()))
        }
        Err(_) => Ok(repair_utf8(bytes, errors)),
    }
}

/// Decode valid runs and apply the error strategy to the bytes in between.
fn repair_utf8(mut bytes: &[u8], errors: EncodingErrors) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(bytes) {
            Ok(tail) => {
                out.push_str(tail);
                return out;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                out.push_str(std::str::from_utf8(&bytes[..valid]).expect("validated prefix"));
                let bad_len = err.error_len().unwrap_or(bytes.len() - valid).max(1);
                for byte in &bytes[valid..valid + bad_len] {
                    match errors {
                        EncodingErrors::Replace => out.push('\u{FFFD}'),
                        EncodingErrors::Backslashreplace => {
                            out.push_str(&format!("\\x{byte:02x}"));
                        }
                        EncodingErrors::Ignore => {}
                        EncodingErrors::Strict => unreachable!("strict handled by caller"),
                    }
                }
                bytes = &bytes[valid + bad_len..];
            }
        }
    }
}
