//! Sequential line reader over one or more text files.

use crate::error::DaqError;
use crate::reader::{Reader, SeekOrigin, StorageReader};
use async_trait::async_trait;
use das_record::{Format, Record};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, info, warn};

type LineSource = Box<dyn AsyncBufRead + Unpin + Send>;

/// Reads lines from every file matching a (possibly wildcarded) file spec,
/// in sorted filename order.  With no file spec, reads stdin.
///
/// `tail` blocks at the end of the last file waiting for appended records;
/// `refresh_file_spec` re-globs the spec at end-of-last-file to pick up
/// files that appeared in the interim.
pub struct TextFileReader {
    file_spec: Option<String>,
    tail: bool,
    refresh_file_spec: bool,
    retry_interval: Duration,
    interval: Option<Duration>,
    unused_files: Vec<PathBuf>,
    used_files: Vec<PathBuf>,
    current: Option<LineSource>,
    /// Records returned so far; the record-seek position.
    position: u64,
    last_read: Option<Instant>,
}

impl TextFileReader {
    pub fn new(
        file_spec: Option<&str>,
        tail: bool,
        refresh_file_spec: bool,
        retry_interval: Duration,
        interval: Option<Duration>,
    ) -> Result<Self, DaqError> {
        let unused_files = match file_spec {
            Some(spec) => {
                let matches = glob_sorted(spec)?;
                if matches.is_empty() {
                    warn!(spec, "file spec matches no files");
                }
                matches
            }
            None => Vec::new(),
        };

        Ok(TextFileReader {
            file_spec: file_spec.map(ToOwned::to_owned),
            tail,
            refresh_file_spec,
            retry_interval,
            interval,
            unused_files,
            used_files: Vec::new(),
            current: None,
            position: 0,
            last_read: None,
        })
    }

    /// Open and assign the next unused file, re-globbing first if the spec
    /// should be refreshed.  False if there is no next file.
    async fn open_next_file(&mut self) -> Result<bool, DaqError> {
        let Some(spec) = self.file_spec.clone() else {
            // No file spec: read stdin, once.
            if self.current.is_none() && self.used_files.is_empty() {
                self.current = Some(Box::new(BufReader::new(tokio::io::stdin())));
                return Ok(true);
            }
            return Ok(false);
        };

        if self.unused_files.is_empty() && self.refresh_file_spec {
            let matching = glob_sorted(&spec)?;
            self.unused_files = matching
                .into_iter()
                .filter(|path| !self.used_files.contains(path))
                .collect();
            debug!(
                spec,
                count = self.unused_files.len(),
                "re-globbed file spec"
            );
        }

        if self.unused_files.is_empty() {
            return Ok(false);
        }
        let path = self.unused_files.remove(0);
        info!(path = %path.display(), "opening next file");
        let file = tokio::fs::File::open(&path).await?;
        self.current = Some(Box::new(BufReader::new(file)));
        self.used_files.push(path);
        Ok(true)
    }

    /// The unpaced read used by both `read()` and the seek machinery.
    async fn read_record(&mut self) -> Result<Option<String>, DaqError> {
        loop {
            if self.current.is_none() && !self.open_next_file().await? {
                // fall through to the tail/refresh decision below
            }
            if let Some(current) = &mut self.current {
                let mut line = String::new();
                let read = current.read_line(&mut line).await?;
                if read > 0 {
                    self.position += 1;
                    if line.ends_with('\n') {
                        line.pop();
                    }
                    return Ok(Some(line));
                }
                // Current file is at EOF; move on if another file exists.
                // Keeping the handle otherwise lets tail mode pick up
                // appended records.
                if self.open_next_file().await? {
                    continue;
                }
            }

            if !self.tail && !self.refresh_file_spec {
                return Ok(None);
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Go back to the first record of the first file.
    fn rewind(&mut self) {
        let mut files = std::mem::take(&mut self.used_files);
        files.append(&mut self.unused_files);
        self.unused_files = files;
        self.current = None;
        self.position = 0;
    }

    /// Read and discard records until `target` is the next position.
    async fn skip_to(&mut self, target: u64) -> Result<(), DaqError> {
        while self.position < target {
            if self.read_record().await?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Records remaining from here to end-of-stream, consuming them.
    async fn count_to_end(&mut self) -> Result<u64, DaqError> {
        while self.read_record().await?.is_some() {}
        Ok(self.position)
    }
}

#[async_trait]
impl Reader for TextFileReader {
    fn output_format(&self) -> Format {
        Format::Text
    }

    async fn read(&mut self) -> Result<Option<Record>, DaqError> {
        if let (Some(interval), Some(last_read)) = (self.interval, self.last_read) {
            let elapsed = last_read.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        let record = self.read_record().await?;
        if record.is_some() {
            self.last_read = Some(Instant::now());
        }
        Ok(record.map(Record::Text))
    }
}

#[async_trait]
impl StorageReader for TextFileReader {
    async fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64, DaqError> {
        if self.file_spec.is_none() {
            return Err(DaqError::Config("seek not allowed on stdin".to_owned()));
        }
        let base = match origin {
            SeekOrigin::Start => 0,
            SeekOrigin::Current => self.position as i64,
            SeekOrigin::End => self.count_to_end().await? as i64,
        };
        let target = base + offset;
        if target < 0 {
            return Err(DaqError::Config(format!(
                "cannot seek to record {target} (before start)"
            )));
        }
        let target = target as u64;
        if target < self.position {
            self.rewind();
        }
        self.skip_to(target).await?;
        Ok(self.position)
    }

    async fn read_range(
        &mut self,
        start: Option<u64>,
        stop: Option<u64>,
    ) -> Result<Vec<Record>, DaqError> {
        if let Some(start) = start {
            self.seek(start as i64, SeekOrigin::Start).await?;
        }
        let mut records = Vec::new();
        loop {
            if let Some(stop) = stop
                && self.position >= stop
            {
                break;
            }
            match self.read_record().await? {
                Some(line) => records.push(Record::Text(line)),
                None => break,
            }
        }
        Ok(records)
    }
}

fn glob_sorted(spec: &str) -> Result<Vec<PathBuf>, DaqError> {
    let paths = glob::glob(spec)
        .map_err(|err| DaqError::Config(format!("bad file spec {spec:?}: {err}")))?;
    let mut matches: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
    matches.sort();
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &std::path::Path, name: &str, lines: &[&str]) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    fn reader_for(dir: &std::path::Path) -> TextFileReader {
        let spec = format!("{}/log-*", dir.display());
        TextFileReader::new(Some(&spec), false, false, Duration::from_millis(10), None).unwrap()
    }

    async fn drain(reader: &mut TextFileReader) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(record) = reader.read().await.unwrap() {
            out.push(record.as_text().unwrap().to_owned());
        }
        out
    }

    #[tokio::test]
    async fn reads_files_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "log-002", &["c", "d"]);
        write_file(dir.path(), "log-001", &["a", "b"]);

        let mut reader = reader_for(dir.path());
        assert_eq!(drain(&mut reader).await, ["a", "b", "c", "d"]);
        // End-of-stream is sticky.
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_lines_are_records_not_eof() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "log-001", &["a", "", "b"]);
        let mut reader = reader_for(dir.path());
        assert_eq!(drain(&mut reader).await, ["a", "", "b"]);
    }

    #[tokio::test]
    async fn seek_start_and_current_move_the_record_position() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "log-001", &["r0", "r1", "r2", "r3"]);

        let mut reader = reader_for(dir.path());
        reader.seek(2, SeekOrigin::Start).await.unwrap();
        assert_eq!(
            reader.read().await.unwrap().unwrap().as_text().unwrap(),
            "r2"
        );
        // Push back one record and re-read it.
        reader.seek(-1, SeekOrigin::Current).await.unwrap();
        assert_eq!(
            reader.read().await.unwrap().unwrap().as_text().unwrap(),
            "r2"
        );
    }

    #[tokio::test]
    async fn seek_end_counts_all_records() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "log-001", &["r0", "r1"]);
        write_file(dir.path(), "log-002", &["r2", "r3"]);

        let mut reader = reader_for(dir.path());
        let position = reader.seek(-1, SeekOrigin::End).await.unwrap();
        assert_eq!(position, 3);
        assert_eq!(
            reader.read().await.unwrap().unwrap().as_text().unwrap(),
            "r3"
        );
    }

    #[tokio::test]
    async fn read_range_is_start_inclusive_stop_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "log-001", &["r0", "r1", "r2", "r3"]);

        let mut reader = reader_for(dir.path());
        let records = reader.read_range(Some(1), Some(3)).await.unwrap();
        let texts: Vec<&str> = records
            .iter()
            .map(|record| record.as_text().unwrap())
            .collect();
        assert_eq!(texts, ["r1", "r2"]);
    }

    #[tokio::test]
    async fn refresh_file_spec_finds_files_that_appear_later() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "log-001", &["a"]);
        let spec = format!("{}/log-*", dir.path().display());
        let mut reader =
            TextFileReader::new(Some(&spec), false, true, Duration::from_millis(5), None).unwrap();

        assert_eq!(
            reader.read().await.unwrap().unwrap().as_text().unwrap(),
            "a"
        );

        let dir_path = dir.path().to_owned();
        let appender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            write_file(&dir_path, "log-002", &["b"]);
        });
        let record = tokio::time::timeout(Duration::from_secs(5), reader.read())
            .await
            .expect("refresh should surface the new file")
            .unwrap();
        assert_eq!(record.unwrap().as_text().unwrap(), "b");
        appender.await.unwrap();
    }

    #[tokio::test]
    async fn tail_blocks_until_a_record_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "log-001", &["a"]);
        let spec = format!("{}/log-*", dir.path().display());
        let mut reader =
            TextFileReader::new(Some(&spec), true, false, Duration::from_millis(5), None).unwrap();

        assert_eq!(
            reader.read().await.unwrap().unwrap().as_text().unwrap(),
            "a"
        );

        let path = dir.path().join("log-001");
        let appender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
            writeln!(file, "b").unwrap();
        });
        let record = tokio::time::timeout(Duration::from_secs(5), reader.read())
            .await
            .expect("tail should pick up the appended record")
            .unwrap();
        assert_eq!(record.unwrap().as_text().unwrap(), "b");
        appender.await.unwrap();
    }
}
