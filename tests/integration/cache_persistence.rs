//! Cache cleanup retention and disk-backed durability.

use cds::RecordCache;
use serde_json::{Value, json};

fn cache_with_series(field: &str, timestamps: &[f64]) -> RecordCache {
    let cache = RecordCache::new();
    for (index, ts) in timestamps.iter().enumerate() {
        cache
            .cache_record_value(&json!({
                "timestamp": ts,
                "fields": {field: index}
            }))
            .unwrap();
    }
    cache
}

fn field_timestamps(cache: &RecordCache, field: &str) -> Vec<f64> {
    cache
        .field_values(field)
        .lock()
        .unwrap()
        .iter()
        .map(|(ts, _value)| *ts)
        .collect()
}

#[test]
fn cleanup_of_ten_recent_entries_retains_the_five_most_recent() {
    // Ten entries, all newer than the cutoff: only the cap applies.
    let timestamps: Vec<f64> = (0..10).map(|i| 1000.0 + f64::from(i)).collect();
    let cache = cache_with_series("x", &timestamps);

    cache.cleanup(999.0, 5, 3);

    assert_eq!(
        field_timestamps(&cache, "x"),
        vec![1005.0, 1006.0, 1007.0, 1008.0, 1009.0]
    );
}

#[test]
fn cleanup_preserves_the_most_recent_entry_of_every_field() {
    let cache = cache_with_series("x", &[1.0, 2.0, 3.0]);
    cache
        .cache_record_value(&json!({"timestamp": 4.0, "fields": {"y": 0}}))
        .unwrap();

    // Everything is ancient relative to the cutoff.
    cache.cleanup(1_000_000.0, 0, 0);

    assert_eq!(field_timestamps(&cache, "x"), vec![3.0]);
    assert_eq!(field_timestamps(&cache, "y"), vec![4.0]);
    assert_eq!(cache.keys(), ["x", "y"]);
}

#[test]
fn save_and_reload_round_trips_every_field() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_with_series("heading", &[1.0, 2.0, 3.0]);
    cache
        .cache_record_value(&json!({
            "timestamp": 2.5,
            "fields": {"speed": 9.1},
            "metadata": {"fields": {"speed": {"units": "kt"}}}
        }))
        .unwrap();

    cache.save_to_disk(dir.path());

    // One file per field, named by the literal field name.
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, ["heading", "speed"]);

    // Contents are a JSON array of [timestamp, value] pairs.
    let raw: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("speed")).unwrap()).unwrap();
    assert_eq!(raw, json!([[2.5, 9.1]]));

    let restored = RecordCache::new();
    restored.load_from_disk(dir.path());
    assert_eq!(restored.keys(), ["heading", "speed"]);
    assert_eq!(field_timestamps(&restored, "heading"), vec![1.0, 2.0, 3.0]);
}

#[test]
fn reload_skips_malformed_files_and_keeps_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_with_series("good", &[1.0]);
    cache.save_to_disk(dir.path());
    std::fs::write(dir.path().join("corrupt"), "]]not json[[").unwrap();

    let restored = RecordCache::new();
    restored.load_from_disk(dir.path());
    assert_eq!(restored.keys(), ["good"]);
}

#[test]
fn save_cleanup_save_shrinks_the_disk_copy() {
    let dir = tempfile::tempdir().unwrap();
    let timestamps: Vec<f64> = (0..10).map(f64::from).collect();
    let cache = cache_with_series("x", &timestamps);

    cache.save_to_disk(dir.path());
    cache.cleanup(1_000_000.0, 0, 2);
    cache.save_to_disk(dir.path());

    let restored = RecordCache::new();
    restored.load_from_disk(dir.path());
    assert_eq!(field_timestamps(&restored, "x"), vec![8.0, 9.0]);
}
