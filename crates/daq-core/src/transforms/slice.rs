//! Select fields out of a delimited text record.

use crate::error::DaqError;
use crate::transform::{Transform, map_records};
use async_trait::async_trait;
use das_record::{Format, Record};
use tracing::warn;

/// One comma-separated element of the field spec: a single index or an
/// `a:b` range.  Negative values index from the end of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldSpec {
    Index(i64),
    Range(Option<i64>, Option<i64>),
}

pub struct SliceTransform {
    specs: Vec<FieldSpec>,
    sep: Option<String>,
}

impl SliceTransform {
    /// `fields` is a comma-separated list of integers and `a:b` ranges,
    /// where either bound of a range may be omitted.  `sep` is the field
    /// separator; `None` splits on runs of whitespace and rejoins with a
    /// single space.
    pub fn new(fields: &str, sep: Option<&str>) -> Result<Self, DaqError> {
        let fields = if fields.is_empty() { ":" } else { fields };
        let mut specs = Vec::new();
        for part in fields.split(',') {
            specs.push(Self::parse_spec(part)?);
        }
        Ok(SliceTransform {
            specs,
            sep: sep.map(ToOwned::to_owned),
        })
    }

    fn parse_spec(part: &str) -> Result<FieldSpec, DaqError> {
        let parse_bound = |bound: &str| -> Result<Option<i64>, DaqError> {
            if bound.is_empty() {
                return Ok(None);
            }
            bound
                .parse::<i64>()
                .map(Some)
                .map_err(|_| DaqError::Config(format!("bad slice field spec {part:?}")))
        };
        match part.split_once(':') {
            Some((start, end)) => Ok(FieldSpec::Range(parse_bound(start)?, parse_bound(end)?)),
            None => match parse_bound(part)? {
                Some(index) => Ok(FieldSpec::Index(index)),
                None => Err(DaqError::Config("empty slice field spec".to_owned())),
            },
        }
    }

    fn slice_line(&self, line: &str) -> Option<String> {
        let parts: Vec<&str> = match &self.sep {
            Some(sep) => line.split(sep.as_str()).collect(),
            None => line.split_whitespace().collect(),
        };
        let len = parts.len() as i64;
        let resolve = |index: i64| -> i64 {
            if index < 0 { len + index } else { index }
        };

        let mut out: Vec<&str> = Vec::new();
        for spec in &self.specs {
            match *spec {
                FieldSpec::Index(index) => {
                    let resolved = resolve(index);
                    if resolved < 0 || resolved >= len {
                        warn!(index, line, "slice index out of range");
                        return None;
                    }
                    out.push(parts[resolved as usize]);
                }
                FieldSpec::Range(start, end) => {
                    let start = start.map_or(0, resolve).clamp(0, len);
                    let end = end.map_or(len, resolve).clamp(0, len);
                    if start < end {
                        out.extend(&parts[start as usize..end as usize]);
                    }
                }
            }
        }
        let sep = self.sep.as_deref().unwrap_or(" ");
        Some(out.join(sep))
    }
}

#[async_trait]
impl Transform for SliceTransform {
    fn input_format(&self) -> Format {
        Format::Text
    }

    fn output_format(&self) -> Format {
        Format::Text
    }

    async fn transform(&self, record: Record) -> Result<Option<Record>, DaqError> {
        map_records(record, &|record| match record {
            Record::Text(text) => Ok(self.slice_line(&text).map(Record::Text)),
            other => {
                warn!(record = ?other, "slice transform received non-text record");
                Ok(None)
            }
        })
    }
}
