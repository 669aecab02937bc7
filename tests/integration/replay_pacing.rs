//! Timed replay through a full Listener pipeline.

use daq_core::Listener;
use daq_core::readers::LogfileReader;
use daq_test_utils::CaptureWriter;
use das_record::timestamp;
use std::io::Write;
use std::time::{Duration, Instant};

fn write_log(path: &std::path::Path, entries: &[(f64, &str)]) {
    let mut file = std::fs::File::create(path).unwrap();
    for (seconds, payload) in entries {
        writeln!(file, "{} {payload}", timestamp::time_str(*seconds)).unwrap();
    }
}

fn replay_reader(dir: &std::path::Path) -> LogfileReader {
    let base = format!("{}/replay", dir.display());
    LogfileReader::new(
        Some(&base),
        false,
        false,
        Duration::from_millis(10),
        true,
        false,
    )
    .unwrap()
}

#[tokio::test]
async fn replay_emits_on_the_stored_schedule() {
    let dir = tempfile::tempdir().unwrap();
    write_log(
        &dir.path().join("replay-2026-01-01"),
        &[(0.0, "first"), (0.25, "second"), (0.50, "third")],
    );

    let sink = CaptureWriter::new();
    let mut listener = Listener::new(
        vec![Box::new(replay_reader(dir.path()))],
        vec![],
        vec![Box::new(sink.clone())],
        None,
        false,
    )
    .unwrap();

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(5), listener.run())
        .await
        .expect("replay of half a second of data finishes promptly")
        .unwrap();
    let elapsed = started.elapsed();

    // All three records by T+0.55...
    assert!(elapsed < Duration::from_millis(550), "took {elapsed:?}");
    let records = sink.texts();
    assert_eq!(records.len(), 3);
    assert!(records[0].ends_with("first"));
    assert!(records[1].ends_with("second"));
    assert!(records[2].ends_with("third"));
}

#[tokio::test]
async fn second_record_is_not_early() {
    let dir = tempfile::tempdir().unwrap();
    write_log(
        &dir.path().join("replay-x"),
        &[(0.0, "first"), (0.25, "second")],
    );

    let mut reader = replay_reader(dir.path());
    use daq_core::reader::Reader;

    let started = Instant::now();
    assert!(reader.read().await.unwrap().is_some());
    assert!(reader.read().await.unwrap().is_some());
    // The stored gap is 250 ms; allow a little scheduling slop downward.
    assert!(started.elapsed() >= Duration::from_millis(220));
}

#[tokio::test]
async fn replay_crosses_file_boundaries_in_lexicographic_order() {
    let dir = tempfile::tempdir().unwrap();
    write_log(&dir.path().join("replay-2026-01-01"), &[(0.0, "day1")]);
    write_log(&dir.path().join("replay-2026-01-02"), &[(0.05, "day2")]);

    let sink = CaptureWriter::new();
    let mut listener = Listener::new(
        vec![Box::new(replay_reader(dir.path()))],
        vec![],
        vec![Box::new(sink.clone())],
        None,
        false,
    )
    .unwrap();
    tokio::time::timeout(Duration::from_secs(5), listener.run())
        .await
        .unwrap()
        .unwrap();

    let records = sink.texts();
    assert_eq!(records.len(), 2);
    assert!(records[0].ends_with("day1"));
    assert!(records[1].ends_with("day2"));
}
