//! Writer that publishes records into a Cached Data Server over websocket.

use crate::error::{DaqError, WarningLimiter};
use crate::writer::Writer;
use async_trait::async_trait;
use das_record::{Format, Record};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects lazily and sends one `publish` request per `write` call;
/// `Record::Many` goes out as a single publish carrying a JSON array, which
/// the server ingests in order.  Connection failures drop the record (per
/// retry policy) and reconnect on the next write.
pub struct CdsWriter {
    url: String,
    ws: Option<WsStream>,
    num_retry: u32,
    limiter: WarningLimiter,
}

impl CdsWriter {
    /// `url` like `ws://localhost:8766`.
    pub fn new(url: &str, num_retry: u32, warning_limit: u32) -> Self {
        CdsWriter {
            url: url.to_owned(),
            ws: None,
            num_retry,
            limiter: WarningLimiter::new(warning_limit),
        }
    }

    fn note_failure(&mut self, context: &str, err: &dyn std::fmt::Display) {
        if self.limiter.on_failure() {
            warn!(url = %self.url, error = %err, "{context}");
            if self.limiter.just_muted() {
                warn!("muting further publish errors");
            }
        }
    }

    async fn connect(&mut self) -> bool {
        match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((ws, _response)) => {
                debug!(url = %self.url, "connected to cached data server");
                self.ws = Some(ws);
                true
            }
            Err(err) => {
                self.note_failure("cannot connect to cached data server", &err);
                false
            }
        }
    }

    /// Send the publish request and wait for its acknowledgement.
    async fn publish_once(&mut self, request: &str) -> bool {
        if self.ws.is_none() && !self.connect().await {
            return false;
        }
        let ws = self.ws.as_mut().expect("connected above");

        if let Err(err) = ws.send(Message::Text(request.into())).await {
            self.note_failure("publish send failed", &err);
            self.ws = None;
            return false;
        }

        match tokio::time::timeout(REPLY_TIMEOUT, ws.next()).await {
            Ok(Some(Ok(Message::Text(reply)))) => {
                if let Ok(value) = serde_json::from_str::<Value>(&reply)
                    && value.get("status").and_then(Value::as_i64) != Some(200)
                {
                    warn!(%reply, "cached data server rejected publish");
                }
                true
            }
            Ok(Some(Ok(_other_frame))) => true,
            Ok(Some(Err(err))) => {
                self.note_failure("publish reply failed", &err);
                self.ws = None;
                false
            }
            Ok(None) => {
                self.note_failure("server closed the connection", &"EOF");
                self.ws = None;
                false
            }
            Err(_elapsed) => {
                self.note_failure("timed out waiting for publish reply", &"timeout");
                self.ws = None;
                false
            }
        }
    }

    /// The JSON value the publish request carries for this record, if the
    /// record is expressible as one.
    fn record_value(record: &Record) -> Option<Value> {
        match record {
            Record::Das(record) => serde_json::to_value(record).ok(),
            Record::Text(text) => match serde_json::from_str::<Value>(text) {
                Ok(value) if value.is_object() || value.is_array() => Some(value),
                _ => {
                    warn!(text, "dropping non-JSON text record on the publish path");
                    None
                }
            },
            Record::Many(records) => {
                let values: Vec<Value> = records.iter().filter_map(Self::record_value).collect();
                if values.is_empty() {
                    None
                } else {
                    Some(Value::Array(values))
                }
            }
            Record::Bytes(_) => {
                warn!("dropping raw bytes record on the publish path");
                None
            }
        }
    }
}

#[async_trait]
impl Writer for CdsWriter {
    fn input_format(&self) -> Format {
        Format::NativeRecord
    }

    async fn write(&mut self, record: Record) -> Result<(), DaqError> {
        if record.is_empty() {
            return Ok(());
        }
        let Some(data) = Self::record_value(&record) else {
            return Ok(());
        };
        let request = json!({"type": "publish", "data": data}).to_string();

        let mut tries = 0;
        while tries <= self.num_retry {
            tries += 1;
            if self.publish_once(&request).await {
                if self.limiter.on_success() {
                    info!(url = %self.url, "publishes succeeding again");
                }
                return Ok(());
            }
        }
        warn!(url = %self.url, tries, "dropping record after exhausting retries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use das_record::DasRecord;
    use serde_json::json;

    #[test]
    fn canonical_record_serializes_to_its_json_form() {
        let fields = json!({"x": 1}).as_object().unwrap().clone();
        let record = DasRecord::new(Some("id".into()), fields).with_timestamp(2.0);
        let value = CdsWriter::record_value(&Record::Das(record)).unwrap();
        assert_eq!(value["timestamp"], json!(2.0));
        assert_eq!(value["fields"]["x"], json!(1));
    }

    #[test]
    fn json_text_passes_through_and_plain_text_is_dropped() {
        let value =
            CdsWriter::record_value(&Record::Text(r#"{"fields":{"y":2}}"#.into())).unwrap();
        assert_eq!(value["fields"]["y"], json!(2));
        assert!(CdsWriter::record_value(&Record::Text("not json".into())).is_none());
    }

    #[test]
    fn record_lists_become_json_arrays() {
        let fields = json!({"x": 1}).as_object().unwrap().clone();
        let record = Record::Das(DasRecord::new(None, fields).with_timestamp(1.0));
        let value = CdsWriter::record_value(&Record::Many(vec![record.clone(), record])).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unreachable_server_drops_the_record_without_failing() {
        let mut writer = CdsWriter::new("ws://127.0.0.1:1/ws", 1, 3);
        let fields = json!({"x": 1}).as_object().unwrap().clone();
        writer
            .write(Record::Das(DasRecord::new(None, fields)))
            .await
            .unwrap();
    }
}
