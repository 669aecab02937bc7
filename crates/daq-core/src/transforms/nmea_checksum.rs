//! Verify the `$...*HH` checksum of NMEA sentences.

use crate::error::DaqError;
use crate::transform::Transform;
use crate::writer::Writer;
use async_trait::async_trait;
use das_record::{Format, Record};
use tokio::sync::Mutex;
use tracing::warn;

const DEFAULT_ERROR_MESSAGE: &str = "Bad checksum for record: ";

/// Passes a sentence through iff the hex suffix after `*` equals the XOR of
/// the bytes strictly between `$` and `*`.
///
/// Failing records are dropped; the error text goes to the configured error
/// writer if there is one, otherwise to the log.
pub struct NmeaChecksumTransform {
    checksum_optional: bool,
    error_message: String,
    error_writer: Option<Mutex<Box<dyn Writer>>>,
}

impl NmeaChecksumTransform {
    pub fn new(checksum_optional: bool) -> Self {
        NmeaChecksumTransform {
            checksum_optional,
            error_message: DEFAULT_ERROR_MESSAGE.to_owned(),
            error_writer: None,
        }
    }

    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_owned();
        self
    }

    pub fn with_error_writer(mut self, writer: Box<dyn Writer>) -> Self {
        self.error_writer = Some(Mutex::new(writer));
        self
    }

    async fn report(&self, record: &str, message: Option<&str>) {
        let text = format!("{}{record}", message.unwrap_or(&self.error_message));
        match &self.error_writer {
            Some(writer) => {
                let mut writer = writer.lock().await;
                if let Err(err) = writer.write(Record::Text(text)).await {
                    warn!(error = %err, "checksum error writer failed");
                }
            }
            None => warn!("{text}"),
        }
    }

    async fn check(&self, text: String) -> Result<Option<Record>, DaqError> {
        let Some(parsed) = parse_sentence(&text) else {
            if self.checksum_optional {
                return Ok(Some(Record::Text(text)));
            }
            self.report(&text, Some("No checksum found in record ")).await;
            return Ok(None);
        };
        if compute_checksum(parsed.message) == parsed.checksum {
            Ok(Some(Record::Text(text)))
        } else {
            self.report(&text, None).await;
            Ok(None)
        }
    }
}

struct Sentence<'a> {
    /// Bytes strictly between `$` and `*`.
    message: &'a str,
    /// Everything after `*`.
    checksum: &'a str,
}

fn parse_sentence(text: &str) -> Option<Sentence<'_>> {
    let dollar = text.find('$')?;
    let star = text.find('*')?;
    if star < dollar {
        return None;
    }
    Some(Sentence {
        message: &text[dollar + 1..star],
        checksum: &text[star + 1..],
    })
}

/// Uppercase hex of the XOR of the message bytes.
fn compute_checksum(message: &str) -> String {
    let xor = message.bytes().fold(0u8, |acc, byte| acc ^ byte);
    format!("{xor:02X}")
}

#[async_trait]
impl Transform for NmeaChecksumTransform {
    fn input_format(&self) -> Format {
        Format::Nmea
    }

    fn output_format(&self) -> Format {
        Format::Nmea
    }

    async fn transform(&self, record: Record) -> Result<Option<Record>, DaqError> {
        match record {
            Record::Text(text) => self.check(text).await,
            Record::Many(records) => {
                let mut out = Vec::with_capacity(records.len());
                for record in records {
                    if let Some(checked) = self.transform(record).await? {
                        out.push(checked);
                    }
                }
                if out.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Record::Many(out)))
                }
            }
            other => {
                warn!(record = ?other, "checksum transform received non-text record");
                Ok(None)
            }
        }
    }
}
