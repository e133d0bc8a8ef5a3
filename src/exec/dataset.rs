// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! One pipeline stage's output side: builder cache plus lifecycle fan-out.
//!
//! Responsibilities:
//! - Owns the per-key builder cache for one stage and forwards tables and
//!   lifecycle events (retract, watermark, processing time, finish) to the
//!   downstream transformations in arrival order.
//! - Enforces the per-key Unseen/Active/Finished state machine, watermark
//!   monotonicity, and the finish-at-most-once rule.
//!
//! Key exported interfaces:
//! - Types: `AccumulationMode`, `KeyState`, `Dataset`.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::common::Timestamp;
use crate::common::error::{ExecError, ExecResult, record_first};
use crate::exec::builder::TableBuilder;
use crate::exec::cache::TableBuilderCache;
use crate::exec::group_key::GroupKey;
use crate::exec::table::BatchTable;
use crate::exec::transformation::Transformation;

/// When a stage's buffered output is flushed downstream.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccumulationMode {
    /// Flush after each upstream table; bounded memory, streaming.
    Append,
    /// Retain everything until finish; required when a stage must see a
    /// whole partition before producing output (sorts, full aggregations).
    Materialize,
}

/// Per-key lifecycle from the viewpoint of one stage.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KeyState {
    Unseen,
    Active,
    Finished,
}

/// The output half of one pipeline stage.
pub struct Dataset {
    cache: TableBuilderCache,
    downstream: Vec<Box<dyn Transformation>>,
    mode: AccumulationMode,
    key_states: HashMap<GroupKey, KeyState>,
    watermark: Option<Timestamp>,
    processing_time: Option<Timestamp>,
    finished: bool,
}

impl Dataset {
    pub fn new(mode: AccumulationMode) -> Self {
        let capacity = crate::common::config::config()
            .map(|cfg| cfg.runtime.builder_initial_capacity)
            .unwrap_or(1024);
        Self::with_capacity(mode, capacity)
    }

    pub fn with_capacity(mode: AccumulationMode, builder_capacity: usize) -> Self {
        Self {
            cache: TableBuilderCache::new(builder_capacity),
            downstream: Vec::new(),
            mode,
            key_states: HashMap::new(),
            watermark: None,
            processing_time: None,
            finished: false,
        }
    }

    pub fn add_downstream(&mut self, t: Box<dyn Transformation>) {
        self.downstream.push(t);
    }

    pub fn with_downstream(mut self, t: Box<dyn Transformation>) -> Self {
        self.add_downstream(t);
        self
    }

    pub fn mode(&self) -> AccumulationMode {
        self.mode
    }

    pub fn watermark(&self) -> Option<Timestamp> {
        self.watermark
    }

    pub fn processing_time(&self) -> Option<Timestamp> {
        self.processing_time
    }

    pub fn key_state(&self, key: &GroupKey) -> KeyState {
        *self.key_states.get(key).unwrap_or(&KeyState::Unseen)
    }

    /// Builder plumbing for the owning stage; `is_new` means the caller must
    /// install the output schema.
    pub fn table_builder(&mut self, key: &GroupKey) -> (&mut TableBuilder, bool) {
        self.cache.table_builder(key)
    }

    pub fn cache_mut(&mut self) -> &mut TableBuilderCache {
        &mut self.cache
    }

    /// Delivers one produced table downstream, in order, first error wins.
    /// Moves the key `Unseen → Active`; a key that already reached
    /// `Finished` is a protocol violation.
    pub fn process(&mut self, table: BatchTable) -> ExecResult<()> {
        if self.finished {
            return Err(ExecError::protocol(format!(
                "process called on finished dataset for key {}",
                table.key()
            )));
        }
        let key = table.key().clone();
        if self.key_state(&key) == KeyState::Finished {
            return Err(ExecError::protocol(format!(
                "process called for finished key {key}"
            )));
        }
        self.key_states.insert(key, KeyState::Active);
        self.fan_out(table)
    }

    fn fan_out(&mut self, table: BatchTable) -> ExecResult<()> {
        let n = self.downstream.len();
        if n == 0 {
            return Ok(());
        }
        for t in &mut self.downstream[..n - 1] {
            t.process(table.duplicate())?;
        }
        self.downstream[n - 1].process(table)
    }

    /// Invalidates prior output for `key`: evicts the local builder and
    /// propagates the retraction before any new data for that key.
    pub fn retract_table(&mut self, key: &GroupKey) -> ExecResult<()> {
        if self.finished {
            return Err(ExecError::protocol(format!(
                "retract called on finished dataset for key {key}"
            )));
        }
        self.cache.expire_table(key);
        for t in &mut self.downstream {
            t.retract_table(key)?;
        }
        Ok(())
    }

    pub fn update_watermark(&mut self, watermark: Timestamp) -> ExecResult<()> {
        if let Some(current) = self.watermark {
            if watermark < current {
                return Err(ExecError::protocol(format!(
                    "watermark regressed from {current} to {watermark}"
                )));
            }
        }
        self.watermark = Some(watermark);
        for t in &mut self.downstream {
            t.update_watermark(watermark)?;
        }
        Ok(())
    }

    pub fn update_processing_time(&mut self, now: Timestamp) -> ExecResult<()> {
        if let Some(current) = self.processing_time {
            if now < current {
                return Err(ExecError::protocol(format!(
                    "processing time regressed from {current} to {now}"
                )));
            }
        }
        self.processing_time = Some(now);
        for t in &mut self.downstream {
            t.update_processing_time(now)?;
        }
        Ok(())
    }

    /// Flushes the builder for `key` right now (Append mode): builds the
    /// buffered rows into a table, delivers it downstream and evicts the
    /// builder so the next batch starts fresh.
    pub fn trigger_table(&mut self, key: &GroupKey) -> ExecResult<()> {
        let Some(builder) = self.cache.get_mut(key) else {
            return Err(ExecError::validation(format!(
                "trigger for unknown key {key}"
            )));
        };
        let table = builder.build()?;
        self.cache.expire_table(key);
        self.process(table)
    }

    /// Terminal transition. First call wins; later calls are logged and
    /// ignored. A clean finish flushes every live builder downstream in
    /// creation order; any flush error turns the finish into a failure.
    /// An error finish drops buffered output unemitted.
    pub fn finish(&mut self, err: Option<ExecError>) {
        if self.finished {
            warn!("dataset finished more than once; keeping first outcome");
            return;
        }
        let mut first_err = err;
        if first_err.is_none() {
            if let Err(flush_err) = self.flush_all() {
                record_first(&mut first_err, flush_err);
            }
        }
        self.finished = true;
        if first_err.is_some() {
            self.cache.clear();
        }
        for state in self.key_states.values_mut() {
            *state = KeyState::Finished;
        }
        debug!(
            "dataset finished, err={:?}, downstream={}",
            first_err.as_ref().map(|e| e.to_string()),
            self.downstream.len()
        );
        for t in &mut self.downstream {
            t.finish(first_err.clone());
        }
    }

    fn flush_all(&mut self) -> ExecResult<()> {
        // Drain builders in creation order; `process` below re-borrows the
        // dataset, so collect the built tables first.
        let mut tables = Vec::with_capacity(self.cache.len());
        self.cache
            .try_for_each(|_, builder| {
                tables.push(builder.build()?);
                Ok(())
            })?;
        self.cache.clear();
        for table in tables {
            self.process(table)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::ErrorKind;
    use crate::exec::column::{ColMeta, ColumnType, Value};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        rows: Vec<(String, i64)>,
        retracted: Vec<String>,
        watermarks: Vec<Timestamp>,
        finish_err: Option<Option<ExecError>>,
    }

    struct RecordingTransformation {
        state: Arc<Mutex<Recorded>>,
    }

    impl RecordingTransformation {
        fn new() -> (Self, Arc<Mutex<Recorded>>) {
            let state = Arc::new(Mutex::new(Recorded::default()));
            (
                Self {
                    state: Arc::clone(&state),
                },
                state,
            )
        }
    }

    impl Transformation for RecordingTransformation {
        fn process(&mut self, table: BatchTable) -> ExecResult<()> {
            let key = table.key().to_string();
            let mut rows = Vec::new();
            table.do_batches(|r| {
                let ints = r.ints(0)?;
                for i in 0..r.len() {
                    rows.push((key.clone(), ints.value(i)));
                }
                Ok(())
            })?;
            self.state.lock().unwrap().rows.extend(rows);
            Ok(())
        }

        fn retract_table(&mut self, key: &GroupKey) -> ExecResult<()> {
            self.state.lock().unwrap().retracted.push(key.to_string());
            Ok(())
        }

        fn update_watermark(&mut self, watermark: Timestamp) -> ExecResult<()> {
            self.state.lock().unwrap().watermarks.push(watermark);
            Ok(())
        }

        fn update_processing_time(&mut self, _now: Timestamp) -> ExecResult<()> {
            Ok(())
        }

        fn finish(&mut self, err: Option<ExecError>) {
            self.state.lock().unwrap().finish_err = Some(err);
        }
    }

    fn key(tag: &str) -> GroupKey {
        GroupKey::new(
            vec![ColMeta::new("tag", ColumnType::String)],
            vec![Value::str(tag)],
        )
        .unwrap()
    }

    fn push_rows(dataset: &mut Dataset, key: &GroupKey, rows: &[i64]) {
        let (builder, is_new) = dataset.table_builder(key);
        if is_new {
            builder.add_col(ColMeta::new("v", ColumnType::Int)).unwrap();
        }
        for v in rows {
            builder.append_value(0, &Value::Int(*v)).unwrap();
        }
    }

    #[test]
    fn append_mode_flushes_per_trigger() {
        let (rec, state) = RecordingTransformation::new();
        let mut dataset =
            Dataset::with_capacity(AccumulationMode::Append, 16).with_downstream(Box::new(rec));

        let k = key("a");
        push_rows(&mut dataset, &k, &[1, 2]);
        dataset.trigger_table(&k).unwrap();
        push_rows(&mut dataset, &k, &[3]);
        dataset.trigger_table(&k).unwrap();
        dataset.finish(None);

        let state = state.lock().unwrap();
        assert_eq!(
            state.rows,
            vec![
                ("{tag=a}".to_string(), 1),
                ("{tag=a}".to_string(), 2),
                ("{tag=a}".to_string(), 3)
            ]
        );
        assert_eq!(state.finish_err, Some(None));
    }

    #[test]
    fn materialize_mode_flushes_at_finish_in_creation_order() {
        let (rec, state) = RecordingTransformation::new();
        let mut dataset = Dataset::with_capacity(AccumulationMode::Materialize, 16)
            .with_downstream(Box::new(rec));

        push_rows(&mut dataset, &key("b"), &[10]);
        push_rows(&mut dataset, &key("a"), &[20]);
        assert!(state.lock().unwrap().rows.is_empty());
        dataset.finish(None);

        let state = state.lock().unwrap();
        assert_eq!(
            state.rows,
            vec![("{tag=b}".to_string(), 10), ("{tag=a}".to_string(), 20)]
        );
    }

    #[test]
    fn retraction_then_reprocess_reflects_only_new_data() {
        let (rec, state) = RecordingTransformation::new();
        let mut dataset = Dataset::with_capacity(AccumulationMode::Materialize, 16)
            .with_downstream(Box::new(rec));

        let k = key("a");
        push_rows(&mut dataset, &k, &[1, 2, 3]);
        dataset.retract_table(&k).unwrap();
        push_rows(&mut dataset, &k, &[9]);
        dataset.finish(None);

        let state = state.lock().unwrap();
        assert_eq!(state.retracted, vec!["{tag=a}".to_string()]);
        assert_eq!(state.rows, vec![("{tag=a}".to_string(), 9)]);
    }

    #[test]
    fn watermark_regression_rejected() {
        let (rec, state) = RecordingTransformation::new();
        let mut dataset =
            Dataset::with_capacity(AccumulationMode::Append, 16).with_downstream(Box::new(rec));

        dataset.update_watermark(100).unwrap();
        dataset.update_watermark(100).unwrap();
        let err = dataset.update_watermark(99).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
        assert_eq!(state.lock().unwrap().watermarks, vec![100, 100]);
    }

    #[test]
    fn processing_time_is_independent_of_watermark() {
        let mut dataset = Dataset::with_capacity(AccumulationMode::Append, 16);
        dataset.update_watermark(100).unwrap();
        dataset.update_processing_time(5).unwrap();
        assert_eq!(dataset.watermark(), Some(100));
        assert_eq!(dataset.processing_time(), Some(5));
        assert!(dataset.update_processing_time(4).is_err());
    }

    #[test]
    fn process_after_finish_is_protocol_violation() {
        let mut dataset = Dataset::with_capacity(AccumulationMode::Append, 16);
        let k = key("a");
        push_rows(&mut dataset, &k, &[1]);
        dataset.finish(None);
        assert_eq!(dataset.key_state(&k), KeyState::Finished);

        push_rows(&mut dataset, &k, &[2]);
        let err = dataset.trigger_table(&k).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
    }

    #[test]
    fn error_finish_drops_buffered_output() {
        let (rec, state) = RecordingTransformation::new();
        let mut dataset = Dataset::with_capacity(AccumulationMode::Materialize, 16)
            .with_downstream(Box::new(rec));

        push_rows(&mut dataset, &key("a"), &[1, 2]);
        dataset.finish(Some(ExecError::io("sink unreachable")));

        let state = state.lock().unwrap();
        assert!(state.rows.is_empty());
        let forwarded = state.finish_err.clone().flatten().unwrap();
        assert_eq!(forwarded.kind, ErrorKind::Io);
    }

    #[test]
    fn double_finish_keeps_first_outcome() {
        let (rec, state) = RecordingTransformation::new();
        let mut dataset =
            Dataset::with_capacity(AccumulationMode::Append, 16).with_downstream(Box::new(rec));
        dataset.finish(None);
        dataset.finish(Some(ExecError::io("too late")));
        assert_eq!(state.lock().unwrap().finish_err, Some(None));
    }

    #[test]
    fn key_states_progress() {
        let mut dataset = Dataset::with_capacity(AccumulationMode::Append, 16);
        let k = key("a");
        assert_eq!(dataset.key_state(&k), KeyState::Unseen);
        push_rows(&mut dataset, &k, &[1]);
        dataset.trigger_table(&k).unwrap();
        assert_eq!(dataset.key_state(&k), KeyState::Active);
        dataset.finish(None);
        assert_eq!(dataset.key_state(&k), KeyState::Finished);
    }
}
