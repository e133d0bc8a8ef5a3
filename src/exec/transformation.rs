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
//! The push-based transformation contract and the built-in terminal stages.
//!
//! Responsibilities:
//! - Defines the sole interface third-party stage authors implement:
//!   consume tables and lifecycle events from upstream, produce into an
//!   owned dataset.
//! - Ships the passthrough stage and the result sink bridging the last
//!   dataset into a query's result stream.
//!
//! Key exported interfaces:
//! - Types: `Transformation`, `PassthroughTransformation`,
//!   `ResultSinkTransformation`.

use std::collections::HashMap;

use tracing::debug;

use crate::common::Timestamp;
use crate::common::error::{ExecError, ExecResult};
use crate::exec::dataset::{AccumulationMode, Dataset};
use crate::exec::group_key::GroupKey;
use crate::exec::table::BatchTable;
use crate::runtime::query::{QueryResult, ResultSender};

/// The unit of push-based computation.
///
/// Same-key events arrive in order; an implementation must not assume
/// serialized delivery across different keys if the engine parallelizes.
/// Every error a stage hits internally must surface through
/// `finish(Some(err))` on its own dataset; nothing is recovered silently.
pub trait Transformation: Send {
    /// Delivers one batch for the table's key. Streaming semantics: more
    /// tables may follow for the same key until `finish`.
    fn process(&mut self, table: BatchTable) -> ExecResult<()>;

    /// Invalidates everything previously emitted for `key`. Must be
    /// propagated downstream before any further data for that key.
    fn retract_table(&mut self, key: &GroupKey) -> ExecResult<()>;

    /// Monotonic global event-time bound.
    fn update_watermark(&mut self, watermark: Timestamp) -> ExecResult<()>;

    /// Monotonic global wall-clock trigger, independent of watermarks.
    fn update_processing_time(&mut self, now: Timestamp) -> ExecResult<()>;

    /// Terminal. `Some(err)` fails the pipeline transitively; `None` is clean
    /// end-of-stream for every key. Called at most once.
    fn finish(&mut self, err: Option<ExecError>);
}

impl std::fmt::Debug for dyn Transformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Transformation")
    }
}

/// Identity stage: forwards every table, batch for batch, through its own
/// builder cache. Exists to wire pipelines and to exercise the dataset
/// plumbing without any business logic.
pub struct PassthroughTransformation {
    dataset: Dataset,
}

impl PassthroughTransformation {
    pub fn new(dataset: Dataset) -> Self {
        Self { dataset }
    }
}

impl Transformation for PassthroughTransformation {
    fn process(&mut self, table: BatchTable) -> ExecResult<()> {
        let key = table.key().clone();
        {
            let (builder, is_new) = self.dataset.table_builder(&key);
            if is_new {
                builder.add_cols(table.cols())?;
            }
            let col_map: Vec<usize> = (0..table.cols().len()).collect();
            table.do_batches(|r| builder.append_reader(r, &col_map))?;
        }
        match self.dataset.mode() {
            AccumulationMode::Append => self.dataset.trigger_table(&key),
            AccumulationMode::Materialize => Ok(()),
        }
    }

    fn retract_table(&mut self, key: &GroupKey) -> ExecResult<()> {
        self.dataset.retract_table(key)
    }

    fn update_watermark(&mut self, watermark: Timestamp) -> ExecResult<()> {
        self.dataset.update_watermark(watermark)
    }

    fn update_processing_time(&mut self, now: Timestamp) -> ExecResult<()> {
        self.dataset.update_processing_time(now)
    }

    fn finish(&mut self, err: Option<ExecError>) {
        self.dataset.finish(err);
    }
}

/// Terminal stage delivering the pipeline's output to the query consumer:
/// buffers tables per key and emits one named result stream per key at
/// finish, in first-seen key order.
pub struct ResultSinkTransformation {
    sender: ResultSender,
    buffered: HashMap<GroupKey, Vec<BatchTable>>,
    order: Vec<GroupKey>,
    finished: bool,
}

impl ResultSinkTransformation {
    pub fn new(sender: ResultSender) -> Self {
        Self {
            sender,
            buffered: HashMap::new(),
            order: Vec::new(),
            finished: false,
        }
    }
}

impl Transformation for ResultSinkTransformation {
    fn process(&mut self, table: BatchTable) -> ExecResult<()> {
        if self.finished {
            return Err(ExecError::protocol("result sink received table after finish"));
        }
        let key = table.key().clone();
        if !self.buffered.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.buffered.entry(key).or_default().push(table);
        Ok(())
    }

    fn retract_table(&mut self, key: &GroupKey) -> ExecResult<()> {
        if let Some(tables) = self.buffered.get_mut(key) {
            debug!("result sink retracting {} buffered tables for {}", tables.len(), key);
            tables.clear();
        }
        Ok(())
    }

    fn update_watermark(&mut self, _watermark: Timestamp) -> ExecResult<()> {
        Ok(())
    }

    fn update_processing_time(&mut self, _now: Timestamp) -> ExecResult<()> {
        Ok(())
    }

    fn finish(&mut self, err: Option<ExecError>) {
        if self.finished {
            tracing::warn!("result sink finished more than once");
            return;
        }
        self.finished = true;
        if let Some(err) = err {
            self.sender.close_error(err);
            return;
        }
        for key in self.order.drain(..) {
            let tables = self.buffered.remove(&key).unwrap_or_default();
            let result = QueryResult::new(key.to_string(), tables);
            if let Err(err) = self.sender.send(result) {
                // Consumer released the query; stop producing, not a failure.
                debug!("result delivery stopped: {err}");
                break;
            }
        }
        self.sender.close_ok();
    }
}
