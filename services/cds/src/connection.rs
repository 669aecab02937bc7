//! Per-connection request dispatch and subscription state machine.
//!
//! A connection starts with no subscription and may interleave requests in
//! any order; a new `subscribe` replaces the previous subscription
//! wholesale.  Delivery is pull-based: the server never pushes data without
//! a preceding `ready`.

use crate::cache::{RecordCache, TimedValue};
use crate::protocol::{
    DeliveryFormat, FieldSpec, Request, data_reply, error_reply, ok_reply,
};
use axum::extract::ws::{Message, WebSocket};
use das_record::timestamp;
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Subscription state
// ---------------------------------------------------------------------------

/// What one connected client is subscribed to.
#[derive(Debug, Default)]
pub struct Subscription {
    /// Expanded (field, spec) pairs, in request order.
    specs: Vec<(String, FieldSpec)>,
    /// Largest timestamp already delivered per field; 0 if none.
    last_sent: HashMap<String, f64>,
    pub interval: f64,
    format: DeliveryFormat,
}

impl Subscription {
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Expand a subscription request against the current key set.  Wildcards
/// (`*`) resolve now; fields that appear later do NOT retroactively join.
pub fn subscribe(
    cache: &RecordCache,
    raw_fields: &Map<String, Value>,
    interval: f64,
    format: DeliveryFormat,
    now: f64,
) -> Subscription {
    let mut subscription = Subscription {
        interval,
        format,
        ..Subscription::default()
    };
    for (name, raw_spec) in raw_fields {
        let spec = FieldSpec::parse(raw_spec);
        for field in matching_field_names(cache, name) {
            let last_seen = initial_last_seen(cache, &field, spec, now);
            subscription.last_sent.insert(field.clone(), last_seen);
            subscription.specs.push((field, spec));
        }
    }
    if subscription.is_empty() {
        info!("subscribe request matched no existing fields");
    }
    subscription
}

/// Field names a subscription entry covers: the name itself, or every
/// current key matching it when it carries a `*` wildcard.
fn matching_field_names(cache: &RecordCache, name: &str) -> Vec<String> {
    if !name.contains('*') {
        return vec![name.to_owned()];
    }
    let pattern = regex::escape(name).replace("\\*", ".+");
    let Ok(matcher) = Regex::new(&pattern) else {
        warn!(name, "unusable wildcard pattern");
        return Vec::new();
    };
    cache
        .keys()
        .into_iter()
        .filter(|key| matcher.is_match(key))
        .collect()
}

/// Where delivery starts for a fresh subscription to `field`:
///
/// - `seconds = 0`: after the current most-recent entry (future only),
/// - `seconds = -1`: after the second-to-last entry, so the next `ready`
///   delivers exactly the current value,
/// - `seconds = n > 0`: far enough back to cover `n` seconds of data or
///   `back_records` entries, whichever reaches further.
fn initial_last_seen(cache: &RecordCache, field: &str, spec: FieldSpec, _now: f64) -> f64 {
    let Some(values) = cache.existing_field_values(field) else {
        debug!(field, "no data yet for subscribed field");
        return 0.0;
    };
    let values = values.lock().unwrap();
    let Some(newest) = values.last() else {
        return 0.0;
    };

    if spec.seconds == 0.0 && spec.back_records == 0 {
        return newest.0;
    }
    if spec.seconds == -1.0 {
        if values.len() > 1 {
            return values[values.len() - 2].0;
        }
        return 0.0;
    }

    // Scan backward until the cumulative span reaches the window,
    // inclusive of the entry that reaches it; back_records wins when it
    // would include more data.
    let mut window_count = 0usize;
    for (entry_ts, _value) in values.iter().rev() {
        window_count += 1;
        if newest.0 - entry_ts >= spec.seconds {
            break;
        }
    }
    let included = window_count.max(spec.back_records);
    if included >= values.len() {
        return 0.0;
    }
    values[values.len() - included - 1].0
}

// ---------------------------------------------------------------------------
// Ready deliveries
// ---------------------------------------------------------------------------

/// Collect everything newer than `last_sent` per subscribed field and
/// advance the per-field cursors.
fn collect_updates(
    cache: &RecordCache,
    subscription: &mut Subscription,
) -> Vec<(String, Vec<TimedValue>)> {
    let specs = &subscription.specs;
    let last_sent = &mut subscription.last_sent;

    let mut updates = Vec::new();
    for (field, _spec) in specs {
        let Some(values) = cache.existing_field_values(field) else {
            continue;
        };
        let values = values.lock().unwrap();
        let Some(newest) = values.last() else {
            continue;
        };
        let last_seen = last_sent.get(field).copied().unwrap_or(0.0);
        if newest.0 <= last_seen {
            continue;
        }
        let newer: Vec<TimedValue> = values
            .iter()
            .filter(|(entry_ts, _value)| *entry_ts > last_seen)
            .cloned()
            .collect();
        let Some(last) = newer.last() else {
            continue;
        };
        last_sent.insert(field.clone(), last.0);
        updates.push((field.clone(), newer));
    }
    updates
}

/// Build the `ready` reply payload in the subscription's delivery format.
pub fn ready_data(cache: &RecordCache, subscription: &mut Subscription) -> Value {
    let updates = collect_updates(cache, subscription);
    match subscription.format {
        DeliveryFormat::FieldDict => {
            let mut data = Map::new();
            for (field, entries) in updates {
                data.insert(
                    field,
                    serde_json::to_value(entries).expect("timed values encode"),
                );
            }
            Value::Object(data)
        }
        DeliveryFormat::RecordList => {
            // Collate values by identical timestamp across fields.
            let mut groups: Vec<(f64, Map<String, Value>)> = Vec::new();
            for (field, entries) in updates {
                for (entry_ts, value) in entries {
                    match groups.iter_mut().find(|(ts, _)| *ts == entry_ts) {
                        Some((_ts, fields)) => {
                            fields.insert(field.clone(), value);
                        }
                        None => {
                            let mut fields = Map::new();
                            fields.insert(field.clone(), value);
                            groups.push((entry_ts, fields));
                        }
                    }
                }
            }
            groups.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            Value::Array(
                groups
                    .into_iter()
                    .map(|(ts, fields)| json!({"timestamp": ts, "fields": fields}))
                    .collect(),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Request dispatch
// ---------------------------------------------------------------------------

/// What the connection loop should do after sending a reply.
pub enum PostReply {
    None,
    /// Pace the client: sleep before fielding the next request.
    Sleep(Duration),
}

pub fn handle_request(
    text: &str,
    cache: &RecordCache,
    subscription: &mut Subscription,
    default_interval: f64,
    request_started: Instant,
) -> (Value, PostReply) {
    let parsed: Value = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(text, "unparseable JSON request");
            return (
                error_reply(None, "received unparseable JSON"),
                PostReply::None,
            );
        }
    };
    if !parsed.is_object() {
        return (error_reply(None, "non-dict request received"), PostReply::None);
    }
    let Ok(request) = serde_json::from_value::<Request>(parsed.clone()) else {
        let kind = parsed
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("<missing>");
        return (
            error_reply(None, &format!("unrecognized request type: {kind}")),
            PostReply::None,
        );
    };

    match request {
        Request::Fields => {
            debug!("fields request");
            (
                data_reply("fields", json!(cache.keys())),
                PostReply::None,
            )
        }
        Request::Describe { fields } => {
            debug!("describe request");
            let metadata = cache.get_metadata(fields.as_deref());
            (
                data_reply("describe", serde_json::to_value(metadata).expect("metadata encodes")),
                PostReply::None,
            )
        }
        Request::Publish { data } => {
            debug!("publish request");
            let Some(data) = data else {
                return (
                    error_reply(Some("publish"), "no data field found in request"),
                    PostReply::None,
                );
            };
            match cache.cache_record_value(&data) {
                Ok(()) => (ok_reply("publish"), PostReply::None),
                Err(err) => (
                    error_reply(Some("publish"), &err.to_string()),
                    PostReply::None,
                ),
            }
        }
        Request::Subscribe {
            fields,
            interval,
            format,
        } => {
            debug!("subscribe request");
            let Some(fields) = fields.filter(|fields| !fields.is_empty()) else {
                return (
                    error_reply(Some("subscribe"), "no fields found in subscribe request"),
                    PostReply::None,
                );
            };
            let format = match format.as_deref() {
                None => DeliveryFormat::FieldDict,
                Some(name) => match DeliveryFormat::parse(name) {
                    Some(format) => format,
                    None => {
                        return (
                            error_reply(
                                Some("subscribe"),
                                &format!(
                                    "unrecognized requested format: {name}; valid formats \
                                     are \"field_dict\" and \"record_list\""
                                ),
                            ),
                            PostReply::None,
                        );
                    }
                },
            };
            let interval = interval.unwrap_or(default_interval);
            *subscription = subscribe(cache, &fields, interval, format, timestamp::now());
            (ok_reply("subscribe"), PostReply::None)
        }
        Request::Ready => {
            debug!("ready request");
            if subscription.is_empty() {
                debug!("ready with no subscribed fields; delivering empty data");
            }
            let data = ready_data(cache, subscription);
            // An unsubscribed connection has no interval of its own yet.
            let interval = if subscription.is_empty() {
                default_interval
            } else {
                subscription.interval
            };
            let elapsed = request_started.elapsed().as_secs_f64();
            let pause = (interval - elapsed).max(0.0);
            (
                data_reply("data", data),
                PostReply::Sleep(Duration::from_secs_f64(pause)),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Websocket loop
// ---------------------------------------------------------------------------

/// Serve one client until it disconnects or the server shuts down.
pub async fn serve_connection(
    mut socket: WebSocket,
    cache: Arc<RecordCache>,
    default_interval: f64,
    cancel: CancellationToken,
) {
    debug!("data websocket client attached");
    let mut subscription = Subscription::default();

    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            message = socket.recv() => message,
        };

        let text = match message {
            None => break,
            Some(Err(err)) => {
                info!(error = %err, "client connection errored");
                break;
            }
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Close(_))) => break,
            // Ping/pong is handled at the protocol layer.
            Some(Ok(_)) => continue,
        };

        let request_started = Instant::now();
        let (reply, post) = handle_request(
            &text,
            &cache,
            &mut subscription,
            default_interval,
            request_started,
        );
        if reply.get("status").and_then(Value::as_i64) != Some(200) {
            warn!(%reply, "request failed");
        }
        let encoded = reply.to_string();
        debug!(bytes = encoded.len(), "sending reply");
        if socket.send(Message::Text(encoded.into())).await.is_err() {
            break;
        }

        if let PostReply::Sleep(pause) = post {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                () = tokio::time::sleep(pause) => {}
            }
        }
    }
    info!("client connection closed");
}
