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
//! Columnar tables and row-batch readers.
//!
//! Responsibilities:
//! - Wraps Arrow record batches into single-partition tables keyed by a
//!   group key, with schema/shape validation at construction.
//! - Exposes typed, zero-copy column access per row-batch and enforces the
//!   single-pass consumption contract.
//!
//! Key exported interfaces:
//! - Types: `BatchTable`, `ColReader`.

use std::sync::atomic::{AtomicBool, Ordering};

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray,
    TimestampNanosecondArray, UInt64Array,
};
use arrow::record_batch::RecordBatch;

use crate::common::error::{ExecError, ExecResult};
use crate::exec::column::{ColMeta, ColumnType, col_idx};
use crate::exec::group_key::GroupKey;

/// One row-batch of a table: typed column accessors over a record batch.
pub struct ColReader<'a> {
    key: &'a GroupKey,
    cols: &'a [ColMeta],
    batch: &'a RecordBatch,
}

impl<'a> ColReader<'a> {
    pub fn key(&self) -> &GroupKey {
        self.key
    }

    pub fn cols(&self) -> &[ColMeta] {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn batch(&self) -> &RecordBatch {
        self.batch
    }

    fn array(&self, j: usize) -> ExecResult<&ArrayRef> {
        if j >= self.batch.num_columns() {
            return Err(ExecError::validation(format!(
                "column index {} out of range [0, {})",
                j,
                self.batch.num_columns()
            )));
        }
        Ok(self.batch.column(j))
    }

    fn typed<T: Array + 'static>(&self, j: usize, want: ColumnType) -> ExecResult<&T> {
        let meta = &self.cols[..]; // cols and batch columns are index-aligned
        let array = self.array(j)?;
        array.as_any().downcast_ref::<T>().ok_or_else(|| {
            ExecError::validation(format!(
                "column {} ({}) is {} not {}",
                j, meta[j].label, meta[j].column_type, want
            ))
        })
    }

    pub fn bools(&self, j: usize) -> ExecResult<&BooleanArray> {
        self.typed(j, ColumnType::Bool)
    }

    pub fn ints(&self, j: usize) -> ExecResult<&Int64Array> {
        self.typed(j, ColumnType::Int)
    }

    pub fn uints(&self, j: usize) -> ExecResult<&UInt64Array> {
        self.typed(j, ColumnType::UInt)
    }

    pub fn floats(&self, j: usize) -> ExecResult<&Float64Array> {
        self.typed(j, ColumnType::Float)
    }

    pub fn strings(&self, j: usize) -> ExecResult<&StringArray> {
        self.typed(j, ColumnType::String)
    }

    pub fn times(&self, j: usize) -> ExecResult<&TimestampNanosecondArray> {
        self.typed(j, ColumnType::Time)
    }

    /// Zero-copy sub-view over rows `[start, stop)` of the whole batch.
    pub fn slice(&self, start: usize, stop: usize) -> ExecResult<RecordBatch> {
        if start > stop || stop > self.len() {
            return Err(ExecError::validation(format!(
                "invalid slice bounds [{}, {}) for batch of {} rows",
                start,
                stop,
                self.len()
            )));
        }
        Ok(self.batch.slice(start, stop - start))
    }
}

/// An immutable columnar batch sequence for a single group key.
///
/// A logical partition is a sequence of tables over time sharing one key;
/// consumers must not assume a single table per key until the stage finishes.
pub struct BatchTable {
    key: GroupKey,
    cols: Vec<ColMeta>,
    batches: Vec<RecordBatch>,
    consumed: AtomicBool,
}

impl BatchTable {
    /// Shape checks: every batch matches `cols` in arity and arrow type, and
    /// every key column exists in the schema with the key's type. Row-level
    /// key consistency is assumed from the producer, not re-validated.
    pub fn try_new(
        key: GroupKey,
        cols: Vec<ColMeta>,
        batches: Vec<RecordBatch>,
    ) -> ExecResult<Self> {
        for kc in key.cols() {
            match col_idx(&kc.label, &cols) {
                Some(i) if cols[i].column_type == kc.column_type => {}
                Some(i) => {
                    return Err(ExecError::validation(format!(
                        "key column \"{}\" has type {} but table column has type {}",
                        kc.label, kc.column_type, cols[i].column_type
                    )));
                }
                None => {
                    return Err(ExecError::validation(format!(
                        "key column \"{}\" missing from table schema",
                        kc.label
                    )));
                }
            }
        }
        for batch in &batches {
            if batch.num_columns() != cols.len() {
                return Err(ExecError::validation(format!(
                    "batch has {} columns, schema has {}",
                    batch.num_columns(),
                    cols.len()
                )));
            }
            for (j, meta) in cols.iter().enumerate() {
                let got = batch.column(j).data_type();
                let want = meta.column_type.to_arrow();
                if got != &want {
                    return Err(ExecError::validation(format!(
                        "column \"{}\" has arrow type {:?}, expected {:?}",
                        meta.label, got, want
                    )));
                }
            }
        }
        Ok(Self {
            key,
            cols,
            batches,
            consumed: AtomicBool::new(false),
        })
    }

    /// A table with schema but no rows, used for empty flushes.
    pub fn empty(key: GroupKey, cols: Vec<ColMeta>) -> Self {
        Self {
            key,
            cols,
            batches: Vec::new(),
            consumed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    pub fn nrows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    /// A fresh single-pass handle over the same immutable batches. Used when
    /// a dataset fans one table out to several downstream stages; the data
    /// itself is shared, only the consumption flag is new.
    pub fn duplicate(&self) -> BatchTable {
        Self {
            key: self.key.clone(),
            cols: self.cols.clone(),
            batches: self.batches.clone(),
            consumed: AtomicBool::new(false),
        }
    }

    /// Applies `f` to each row-batch in arrival order, short-circuiting on
    /// the first error. The table is single-pass: a second call is a
    /// protocol violation.
    pub fn do_batches<F>(&self, mut f: F) -> ExecResult<()>
    where
        F: FnMut(&ColReader<'_>) -> ExecResult<()>,
    {
        if self.consumed.swap(true, Ordering::AcqRel) {
            return Err(ExecError::protocol(format!(
                "table for key {} already consumed",
                self.key
            )));
        }
        for batch in &self.batches {
            let reader = ColReader {
                key: &self.key,
                cols: &self.cols,
                batch,
            };
            f(&reader)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchTable")
            .field("key", &self.key.to_string())
            .field("cols", &self.cols)
            .field("batches", &self.batches.len())
            .field("nrows", &self.nrows())
            .finish()
    }
}
