//! Fan-in behavior of ComposedReader across parallel sources.

use daq_core::reader::Reader;
use daq_core::{ComposedReader, Listener};
use daq_test_utils::{CaptureWriter, ScriptedReader};
use das_record::Record;
use std::collections::HashMap;
use std::time::Duration;

async fn drain(reader: &mut ComposedReader) -> Vec<String> {
    let mut records = Vec::new();
    while let Some(record) = reader.read().await.unwrap() {
        records.push(record.as_text().unwrap().to_owned());
    }
    records
}

#[tokio::test]
async fn two_sources_yield_their_union_with_per_source_order() {
    let mut reader = ComposedReader::new(
        vec![
            Box::new(ScriptedReader::from_texts(&["a1", "a2", "a3"])),
            Box::new(ScriptedReader::from_texts(&["b1", "b2", "b3"])),
        ],
        vec![],
        false,
    )
    .unwrap();

    let records = drain(&mut reader).await;
    assert_eq!(records.len(), 6);

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in &records {
        *counts.entry(record.as_str()).or_default() += 1;
    }
    for expected in ["a1", "a2", "a3", "b1", "b2", "b3"] {
        assert_eq!(counts.get(expected), Some(&1), "{expected} delivered once");
    }

    let position: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(index, record)| (record.as_str(), index))
        .collect();
    assert!(position["a1"] < position["a2"] && position["a2"] < position["a3"]);
    assert!(position["b1"] < position["b2"] && position["b2"] < position["b3"]);
}

#[tokio::test]
async fn slow_and_fast_sources_both_complete() {
    let mut reader = ComposedReader::new(
        vec![
            Box::new(
                ScriptedReader::from_texts(&["slow1", "slow2"])
                    .with_delay(Duration::from_millis(40)),
            ),
            Box::new(ScriptedReader::from_texts(&["fast1", "fast2", "fast3"])),
        ],
        vec![],
        false,
    )
    .unwrap();

    let mut records = drain(&mut reader).await;
    records.sort();
    assert_eq!(records, ["fast1", "fast2", "fast3", "slow1", "slow2"]);
}

#[tokio::test]
async fn end_of_stream_is_sticky() {
    let mut reader = ComposedReader::new(
        vec![
            Box::new(ScriptedReader::from_texts(&["only"])),
            Box::new(ScriptedReader::from_texts(&[])),
        ],
        vec![],
        false,
    )
    .unwrap();

    assert_eq!(drain(&mut reader).await, ["only"]);
    for _ in 0..3 {
        assert!(reader.read().await.unwrap().is_none());
    }
}

#[tokio::test]
async fn listener_moves_every_record_from_sources_to_sinks() {
    let sink_a = CaptureWriter::new();
    let sink_b = CaptureWriter::new();
    let mut listener = Listener::new(
        vec![
            Box::new(ScriptedReader::from_texts(&["r1", "r2"])),
            Box::new(ScriptedReader::from_texts(&["r3"])),
        ],
        vec![],
        vec![Box::new(sink_a.clone()), Box::new(sink_b.clone())],
        None,
        false,
    )
    .unwrap();
    listener.run().await.unwrap();

    for sink in [&sink_a, &sink_b] {
        let mut records = sink.texts();
        records.sort();
        assert_eq!(records, ["r1", "r2", "r3"]);
    }
}

#[tokio::test]
async fn quit_stops_a_listener_with_a_blocked_source() {
    struct Stuck;
    #[async_trait::async_trait]
    impl Reader for Stuck {
        async fn read(&mut self) -> Result<Option<Record>, daq_core::DaqError> {
            std::future::pending().await
        }
    }

    let sink = CaptureWriter::new();
    let mut listener = Listener::new(
        vec![Box::new(Stuck), Box::new(Stuck)],
        vec![],
        vec![Box::new(sink)],
        None,
        false,
    )
    .unwrap();
    let quit = listener.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        quit.cancel();
    });
    tokio::time::timeout(Duration::from_secs(5), listener.run())
        .await
        .expect("quit must unblock the listener")
        .unwrap();
}
