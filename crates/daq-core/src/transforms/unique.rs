//! Pass a record through only when it differs from the previous one.

use crate::error::DaqError;
use crate::transform::Transform;
use async_trait::async_trait;
use das_record::Record;
use std::sync::Mutex;

#[derive(Default)]
pub struct UniqueTransform {
    prev: Mutex<Option<Record>>,
}

impl UniqueTransform {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transform for UniqueTransform {
    async fn transform(&self, record: Record) -> Result<Option<Record>, DaqError> {
        let mut prev = self.prev.lock().unwrap();
        if prev.as_ref() == Some(&record) {
            return Ok(None);
        }
        *prev = Some(record.clone());
        Ok(Some(record))
    }
}
