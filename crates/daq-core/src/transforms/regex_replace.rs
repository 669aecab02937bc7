//! Apply an ordered list of pattern → replacement substitutions.

use crate::error::DaqError;
use crate::transform::{Transform, map_records};
use async_trait::async_trait;
use das_record::{Format, Record};
use regex::Regex;
use tracing::warn;

/// Replacements compose: the output of each pattern is the input of the
/// next, in insertion order.
pub struct RegexReplaceTransform {
    patterns: Vec<(Regex, String)>,
    /// Maximum replacements per pattern; 0 means all.
    count: usize,
}

impl RegexReplaceTransform {
    pub fn new(patterns: &[(&str, &str)]) -> Result<Self, DaqError> {
        Self::with_count(patterns, 0)
    }

    pub fn with_count(patterns: &[(&str, &str)], count: usize) -> Result<Self, DaqError> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for (pattern, replacement) in patterns {
            let regex = Regex::new(pattern)
                .map_err(|err| DaqError::Config(format!("bad pattern {pattern:?}: {err}")))?;
            compiled.push((regex, (*replacement).to_owned()));
        }
        Ok(RegexReplaceTransform {
            patterns: compiled,
            count,
        })
    }

    fn apply(&self, text: &str) -> String {
        let mut result = text.to_owned();
        for (regex, replacement) in &self.patterns {
            result = regex
                .replacen(&result, self.count, replacement.as_str())
                .into_owned();
        }
        result
    }
}

#[async_trait]
impl Transform for RegexReplaceTransform {
    fn input_format(&self) -> Format {
        Format::Text
    }

    fn output_format(&self) -> Format {
        Format::Text
    }

    async fn transform(&self, record: Record) -> Result<Option<Record>, DaqError> {
        map_records(record, &|record| match record {
            Record::Text(text) => Ok(Some(Record::Text(self.apply(&text)))),
            other => {
                warn!(record = ?other, "regex replace received non-text record");
                Ok(None)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(patterns: &[(&str, &str)], line: &str) -> String {
        let transform = RegexReplaceTransform::new(patterns).unwrap();
        let out = transform.transform(Record::Text(line.into())).await.unwrap();
        out.unwrap().as_text().unwrap().to_owned()
    }

    #[tokio::test]
    async fn single_pattern_replaces_all_occurrences() {
        assert_eq!(run(&[("foo", "bar")], "foo x foo").await, "bar x bar");
    }

    #[tokio::test]
    async fn replacements_compose_in_insertion_order() {
        // The first rule's output feeds the second.
        let out = run(&[("a", "b"), ("b", "c")], "a b").await;
        assert_eq!(out, "c c");
    }

    #[tokio::test]
    async fn capture_groups_are_expanded() {
        let out = run(&[(r"(\d+)C", "${1}degC")], "temp 21C").await;
        assert_eq!(out, "temp 21degC");
    }

    #[tokio::test]
    async fn count_limits_replacements_per_pattern() {
        let transform = RegexReplaceTransform::with_count(&[("x", "y")], 1).unwrap();
        let out = transform.transform(Record::Text("x x x".into())).await.unwrap();
        assert_eq!(out.unwrap().as_text().unwrap(), "y x x");
    }

    #[tokio::test]
    async fn invalid_pattern_is_a_config_error() {
        assert!(RegexReplaceTransform::new(&[("(", "x")]).is_err());
    }
}
