//! The in-memory field cache behind the Cached Data Server.
//!
//! One time-ordered value list per field, with a lock per field so that the
//! publish path and the connection handlers serialize per field but not
//! across fields.  The key set itself is guarded by a structural lock; a
//! new field's lock is created atomically on first use.  Out-of-order
//! inserts are appended as-is, never reordered.

use das_record::{DasRecord, normalize_value};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// One cached observation.
pub type TimedValue = (f64, Value);

pub type FieldValues = Arc<Mutex<Vec<TimedValue>>>;

#[derive(Default)]
pub struct RecordCache {
    data: RwLock<HashMap<String, FieldValues>>,
    metadata: Mutex<HashMap<String, Value>>,
    /// Disk files we have tried to write and failed; never retried within
    /// this process so a bad mount cannot flood the log.
    failed_files: Mutex<HashSet<PathBuf>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The value list for `field`, creating it (and its lock) atomically on
    /// first use.
    pub fn field_values(&self, field: &str) -> FieldValues {
        if let Some(values) = self.data.read().unwrap().get(field) {
            return values.clone();
        }
        let mut data = self.data.write().unwrap();
        data.entry(field.to_owned()).or_default().clone()
    }

    /// The value list for `field` if the field exists, without creating it.
    pub fn existing_field_values(&self, field: &str) -> Option<FieldValues> {
        self.data.read().unwrap().get(field).cloned()
    }

    /// Ingest a record in any accepted envelope form (or a JSON array of
    /// them, processed in order).
    pub fn cache_record_value(&self, value: &Value) -> Result<(), das_record::EnvelopeError> {
        for record in normalize_value(value)? {
            self.cache_record(&record);
        }
        Ok(())
    }

    /// Ingest one canonical record: append each field's value under the
    /// record timestamp and fold any field metadata into the metadata map
    /// (overwriting prior descriptors).
    pub fn cache_record(&self, record: &DasRecord) {
        debug!(fields = record.fields.len(), "caching record");
        for (field, value) in &record.fields {
            let values = self.field_values(field);
            values
                .lock()
                .unwrap()
                .push((record.timestamp, value.clone()));
        }

        if let Some(descriptors) = record.field_metadata() {
            let mut metadata = self.metadata.lock().unwrap();
            for (field, descriptor) in descriptors {
                metadata.insert(field.clone(), descriptor.clone());
            }
        }
    }

    /// Snapshot of the field names.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Metadata for the given fields (absent fields get an empty
    /// descriptor), or for every field when none are named.
    pub fn get_metadata(&self, fields: Option<&[String]>) -> HashMap<String, Value> {
        let metadata = self.metadata.lock().unwrap();
        match fields {
            Some(fields) => fields
                .iter()
                .map(|field| {
                    let descriptor = metadata
                        .get(field)
                        .cloned()
                        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                    (field.clone(), descriptor)
                })
                .collect(),
            None => metadata.clone(),
        }
    }

    /// Trim each field's list: drop leading entries with `timestamp <=
    /// oldest`, but always retain at least `min_back_records` of the tail
    /// (and never drop the most recent entry); additionally cap the total
    /// length at `max_records` (0 means unbounded).  Keys are never
    /// removed, only shrunk.
    pub fn cleanup(&self, oldest: f64, max_records: usize, min_back_records: usize) {
        debug!(oldest, max_records, min_back_records, "cleaning up cache");
        for field in self.keys() {
            let values = self.field_values(&field);
            let mut values = values.lock().unwrap();

            if values.len() <= min_back_records {
                continue;
            }
            if max_records > min_back_records && max_records > 0 && values.len() > max_records {
                let excess = values.len() - max_records;
                values.drain(..excess);
            }
            if values.len() <= min_back_records {
                continue;
            }

            let first_new = values
                .iter()
                .position(|(timestamp, _value)| *timestamp > oldest)
                .unwrap_or(values.len());
            let max_drop = values.len() - min_back_records.max(1);
            values.drain(..first_new.min(max_drop));
        }
    }

    /// Write one JSON file per field into `dir` (created if absent).
    /// Best-effort: a file that fails to write is remembered and never
    /// retried in this process.
    pub fn save_to_disk(&self, dir: &Path) {
        debug!(dir = %dir.display(), "saving cache to disk");
        if !dir.exists()
            && let Err(err) = std::fs::create_dir_all(dir)
        {
            error!(dir = %dir.display(), error = %err, "cannot create disk cache directory");
            return;
        }

        for field in self.keys() {
            let path = dir.join(&field);
            if self.failed_files.lock().unwrap().contains(&path) {
                continue;
            }
            let values = self.field_values(&field);
            let snapshot = values.lock().unwrap().clone();
            let encoded = match serde_json::to_vec(&snapshot) {
                Ok(encoded) => encoded,
                Err(err) => {
                    warn!(field, error = %err, "cannot encode disk cache file");
                    self.failed_files.lock().unwrap().insert(path);
                    continue;
                }
            };
            if let Err(err) = std::fs::write(&path, encoded) {
                warn!(path = %path.display(), error = %err, "cannot write disk cache file");
                self.failed_files.lock().unwrap().insert(path);
            }
        }
    }

    /// Repopulate fields from a directory of per-field JSON files.
    /// Malformed files are skipped with a warning.
    pub fn load_from_disk(&self, dir: &Path) {
        info!(dir = %dir.display(), "loading cache from disk");
        if !dir.exists() {
            info!(dir = %dir.display(), "no disk cache found");
            return;
        }
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                error!(dir = %dir.display(), error = %err, "cannot access disk cache");
                return;
            }
        };
        for entry in entries.filter_map(Result::ok) {
            if !entry.path().is_file() {
                continue;
            }
            let field = entry.file_name().to_string_lossy().into_owned();
            let parsed: Result<Vec<TimedValue>, _> = std::fs::read(entry.path())
                .map_err(|err| err.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice(&bytes).map_err(|err| err.to_string())
                });
            match parsed {
                Ok(loaded) => {
                    let values = self.field_values(&field);
                    *values.lock().unwrap() = loaded;
                }
                Err(err) => warn!(field, error = %err, "failed to parse disk cache file"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with(field: &str, entries: &[(f64, i64)]) -> RecordCache {
        let cache = RecordCache::new();
        for (timestamp, value) in entries {
            cache
                .cache_record_value(&json!({
                    "timestamp": timestamp,
                    "fields": {field: value}
                }))
                .unwrap();
        }
        cache
    }

    fn values_of(cache: &RecordCache, field: &str) -> Vec<TimedValue> {
        cache.field_values(field).lock().unwrap().clone()
    }

    #[test]
    fn records_append_in_arrival_order() {
        let cache = cache_with("x", &[(10.0, 1), (12.0, 2), (11.0, 3)]);
        let values = values_of(&cache, "x");
        // Mild disorder is tolerated, never reordered.
        assert_eq!(values[0].0, 10.0);
        assert_eq!(values[1].0, 12.0);
        assert_eq!(values[2].0, 11.0);
    }

    #[test]
    fn batched_and_listed_forms_are_accepted() {
        let cache = RecordCache::new();
        cache
            .cache_record_value(&json!({
                "fields": {"x": [[1.0, "a"], [2.0, "b"]]}
            }))
            .unwrap();
        cache
            .cache_record_value(&json!([
                {"timestamp": 3.0, "fields": {"x": "c"}},
                {"timestamp": 4.0, "fields": {"x": "d"}}
            ]))
            .unwrap();
        let values = values_of(&cache, "x");
        assert_eq!(values.len(), 4);
        assert_eq!(values[3], (4.0, json!("d")));
    }

    #[test]
    fn metadata_merges_and_overwrites_per_field() {
        let cache = RecordCache::new();
        cache
            .cache_record_value(&json!({
                "timestamp": 1.0,
                "fields": {"x": 1},
                "metadata": {"fields": {"x": {"units": "degrees"}}}
            }))
            .unwrap();
        cache
            .cache_record_value(&json!({
                "timestamp": 2.0,
                "fields": {"x": 2},
                "metadata": {"fields": {"x": {"units": "radians"}}}
            }))
            .unwrap();

        let metadata = cache.get_metadata(Some(&["x".to_owned(), "missing".to_owned()]));
        assert_eq!(metadata["x"]["units"], json!("radians"));
        assert_eq!(metadata["missing"], json!({}));
    }

    #[test]
    fn cleanup_caps_length_and_keeps_the_most_recent_entries() {
        let entries: Vec<(f64, i64)> = (0..10).map(|i| (100.0 + i as f64, i)).collect();
        let cache = cache_with("x", &entries);
        // Every entry is newer than the threshold: only the cap applies.
        cache.cleanup(99.0, 5, 3);
        let values = values_of(&cache, "x");
        assert_eq!(values.len(), 5);
        assert_eq!(values[0].0, 105.0);
        assert_eq!(values[4].0, 109.0);
    }

    #[test]
    fn cleanup_age_truncation_keeps_min_back_records() {
        let entries: Vec<(f64, i64)> = (0..8).map(|i| (float(i), i)).collect();
        let cache = cache_with("x", &entries);
        // Everything is older than the threshold; the tail survives anyway.
        cache.cleanup(1_000_000.0, 0, 3);
        let values = values_of(&cache, "x");
        assert_eq!(values.len(), 3);
        assert_eq!(values[2].0, 7.0);
    }

    #[test]
    fn cleanup_drops_only_entries_older_than_threshold() {
        let cache = cache_with("x", &[(10.0, 0), (20.0, 1), (30.0, 2), (40.0, 3)]);
        cache.cleanup(20.0, 0, 1);
        let values = values_of(&cache, "x");
        // 10.0 and 20.0 are at-or-below the threshold.
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].0, 30.0);
    }

    #[test]
    fn cleanup_never_drops_the_most_recent_entry() {
        let cache = cache_with("x", &[(1.0, 0), (2.0, 1)]);
        cache.cleanup(1_000_000.0, 0, 0);
        let values = values_of(&cache, "x");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].0, 2.0);
    }

    #[test]
    fn cleanup_shrinks_but_never_removes_keys() {
        let cache = cache_with("x", &[(1.0, 0)]);
        cache.cleanup(1_000_000.0, 0, 0);
        assert_eq!(cache.keys(), ["x"]);
    }

    #[test]
    fn disk_round_trip_restores_fields() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_with("heading", &[(1.0, 10), (2.0, 20)]);
        cache
            .cache_record_value(&json!({"timestamp": 1.5, "fields": {"speed": 9.9}}))
            .unwrap();
        cache.save_to_disk(dir.path());

        assert!(dir.path().join("heading").is_file());
        assert!(dir.path().join("speed").is_file());

        let restored = RecordCache::new();
        restored.load_from_disk(dir.path());
        assert_eq!(restored.keys(), ["heading", "speed"]);
        assert_eq!(values_of(&restored, "heading"), values_of(&cache, "heading"));
    }

    #[test]
    fn malformed_disk_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good"), r#"[[1.0, 5]]"#).unwrap();
        std::fs::write(dir.path().join("bad"), "{not json").unwrap();

        let cache = RecordCache::new();
        cache.load_from_disk(dir.path());
        assert_eq!(cache.keys(), ["good"]);
    }

    #[test]
    fn failed_disk_files_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_with("x", &[(1.0, 1)]);

        // Make the target unwritable by occupying the path with a directory.
        std::fs::create_dir(dir.path().join("x")).unwrap();
        cache.save_to_disk(dir.path());
        assert_eq!(cache.failed_files.lock().unwrap().len(), 1);

        // A second save skips the failed path without another attempt.
        cache.save_to_disk(dir.path());
        assert_eq!(cache.failed_files.lock().unwrap().len(), 1);
    }

    fn float(i: i64) -> f64 {
        i as f64
    }
}
