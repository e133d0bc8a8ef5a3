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
//! Append-only builders producing output tables.
//!
//! Responsibilities:
//! - Accumulates rows column-wise in Arrow builders and emits immutable
//!   tables; builders reset on build so a stage can keep streaming into the
//!   same builder per key.
//! - Provides the bulk column-copy helpers stage authors use to forward
//!   whole incoming row-batches.
//!
//! Key exported interfaces:
//! - Types: `ColumnBuilder`, `TableBuilder`.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayBuilder, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder,
    Int64Array, Int64Builder, StringArray, StringBuilder, TimestampNanosecondArray,
    TimestampNanosecondBuilder, UInt64Array, UInt64Builder,
};
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;

use crate::common::error::{ExecError, ExecResult};
use crate::exec::column::{ColMeta, ColumnType, Value, col_idx};
use crate::exec::group_key::GroupKey;
use crate::exec::table::{BatchTable, ColReader};

/// Typed Arrow builder for one output column.
pub enum ColumnBuilder {
    Bool(BooleanBuilder),
    Int(Int64Builder),
    UInt(UInt64Builder),
    Float(Float64Builder),
    String(StringBuilder),
    Time(TimestampNanosecondBuilder),
}

impl ColumnBuilder {
    pub fn new(column_type: ColumnType, capacity: usize) -> Self {
        match column_type {
            ColumnType::Bool => ColumnBuilder::Bool(BooleanBuilder::with_capacity(capacity)),
            ColumnType::Int => ColumnBuilder::Int(Int64Builder::with_capacity(capacity)),
            ColumnType::UInt => ColumnBuilder::UInt(UInt64Builder::with_capacity(capacity)),
            ColumnType::Float => ColumnBuilder::Float(Float64Builder::with_capacity(capacity)),
            ColumnType::String => {
                ColumnBuilder::String(StringBuilder::with_capacity(capacity, capacity * 8))
            }
            ColumnType::Time => {
                ColumnBuilder::Time(TimestampNanosecondBuilder::with_capacity(capacity))
            }
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnBuilder::Bool(_) => ColumnType::Bool,
            ColumnBuilder::Int(_) => ColumnType::Int,
            ColumnBuilder::UInt(_) => ColumnType::UInt,
            ColumnBuilder::Float(_) => ColumnType::Float,
            ColumnBuilder::String(_) => ColumnType::String,
            ColumnBuilder::Time(_) => ColumnType::Time,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnBuilder::Bool(b) => b.len(),
            ColumnBuilder::Int(b) => b.len(),
            ColumnBuilder::UInt(b) => b.len(),
            ColumnBuilder::Float(b) => b.len(),
            ColumnBuilder::String(b) => b.len(),
            ColumnBuilder::Time(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn append_null(&mut self) {
        match self {
            ColumnBuilder::Bool(b) => b.append_null(),
            ColumnBuilder::Int(b) => b.append_null(),
            ColumnBuilder::UInt(b) => b.append_null(),
            ColumnBuilder::Float(b) => b.append_null(),
            ColumnBuilder::String(b) => b.append_null(),
            ColumnBuilder::Time(b) => b.append_null(),
        }
    }

    pub fn append_value(&mut self, value: &Value) -> ExecResult<()> {
        if value.is_null() {
            self.append_null();
            return Ok(());
        }
        match (self, value) {
            (ColumnBuilder::Bool(b), Value::Bool(v)) => b.append_value(*v),
            (ColumnBuilder::Int(b), Value::Int(v)) => b.append_value(*v),
            (ColumnBuilder::UInt(b), Value::UInt(v)) => b.append_value(*v),
            (ColumnBuilder::Float(b), Value::Float(v)) => b.append_value(*v),
            (ColumnBuilder::String(b), Value::Str(v)) => b.append_value(v.as_ref()),
            (ColumnBuilder::Time(b), Value::Time(v)) => b.append_value(*v),
            (builder, value) => {
                return Err(ExecError::validation(format!(
                    "cannot append {} value to {} column",
                    value.column_type(),
                    builder.column_type()
                )));
            }
        }
        Ok(())
    }

    /// Bulk-appends every slot of `array`, nulls included. This is the
    /// column-copy path used when forwarding whole row-batches.
    pub fn append_array(&mut self, array: &ArrayRef) -> ExecResult<()> {
        let mismatch = |want: ColumnType| {
            ExecError::validation(format!(
                "cannot append array of arrow type {:?} to {} column",
                array.data_type(),
                want
            ))
        };
        match self {
            ColumnBuilder::Bool(b) => {
                let a = array
                    .as_any()
                    .downcast_ref::<BooleanArray>()
                    .ok_or_else(|| mismatch(ColumnType::Bool))?;
                for i in 0..a.len() {
                    if a.is_null(i) {
                        b.append_null();
                    } else {
                        b.append_value(a.value(i));
                    }
                }
            }
            ColumnBuilder::Int(b) => {
                let a = array
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .ok_or_else(|| mismatch(ColumnType::Int))?;
                for i in 0..a.len() {
                    if a.is_null(i) {
                        b.append_null();
                    } else {
                        b.append_value(a.value(i));
                    }
                }
            }
            ColumnBuilder::UInt(b) => {
                let a = array
                    .as_any()
                    .downcast_ref::<UInt64Array>()
                    .ok_or_else(|| mismatch(ColumnType::UInt))?;
                for i in 0..a.len() {
                    if a.is_null(i) {
                        b.append_null();
                    } else {
                        b.append_value(a.value(i));
                    }
                }
            }
            ColumnBuilder::Float(b) => {
                let a = array
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| mismatch(ColumnType::Float))?;
                for i in 0..a.len() {
                    if a.is_null(i) {
                        b.append_null();
                    } else {
                        b.append_value(a.value(i));
                    }
                }
            }
            ColumnBuilder::String(b) => {
                let a = array
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| mismatch(ColumnType::String))?;
                for i in 0..a.len() {
                    if a.is_null(i) {
                        b.append_null();
                    } else {
                        b.append_value(a.value(i));
                    }
                }
            }
            ColumnBuilder::Time(b) => {
                let a = array
                    .as_any()
                    .downcast_ref::<TimestampNanosecondArray>()
                    .ok_or_else(|| mismatch(ColumnType::Time))?;
                for i in 0..a.len() {
                    if a.is_null(i) {
                        b.append_null();
                    } else {
                        b.append_value(a.value(i));
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Bool(b) => Arc::new(b.finish()),
            ColumnBuilder::Int(b) => Arc::new(b.finish()),
            ColumnBuilder::UInt(b) => Arc::new(b.finish()),
            ColumnBuilder::Float(b) => Arc::new(b.finish()),
            ColumnBuilder::String(b) => Arc::new(b.finish()),
            ColumnBuilder::Time(b) => Arc::new(b.finish()),
        }
    }
}

/// Append-only builder for the output tables of one group key.
///
/// Owned exclusively by one stage through its builder cache; the protocol
/// assumes a single writer per key at a time.
pub struct TableBuilder {
    key: GroupKey,
    cols: Vec<ColMeta>,
    builders: Vec<ColumnBuilder>,
    capacity: usize,
}

impl TableBuilder {
    pub fn new(key: GroupKey, capacity: usize) -> Self {
        Self {
            key,
            cols: Vec::new(),
            builders: Vec::new(),
            capacity,
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    pub fn ncols(&self) -> usize {
        self.cols.len()
    }

    /// Buffered row count: the length of the longest column.
    pub fn nrows(&self) -> usize {
        self.builders.iter().map(ColumnBuilder::len).max().unwrap_or(0)
    }

    /// Registers an output column, returning its index. Duplicate labels are
    /// rejected; callers install a schema exactly once per builder.
    pub fn add_col(&mut self, meta: ColMeta) -> ExecResult<usize> {
        if col_idx(&meta.label, &self.cols).is_some() {
            return Err(ExecError::validation(format!(
                "column \"{}\" already exists in builder",
                meta.label
            )));
        }
        self.builders
            .push(ColumnBuilder::new(meta.column_type, self.capacity));
        self.cols.push(meta);
        Ok(self.cols.len() - 1)
    }

    /// Installs a whole schema at once (first touch of a fresh builder).
    pub fn add_cols(&mut self, cols: &[ColMeta]) -> ExecResult<()> {
        for meta in cols {
            self.add_col(meta.clone())?;
        }
        Ok(())
    }

    fn builder_mut(&mut self, j: usize) -> ExecResult<&mut ColumnBuilder> {
        let ncols = self.cols.len();
        self.builders.get_mut(j).ok_or_else(|| {
            ExecError::validation(format!("column index {j} out of range [0, {ncols})"))
        })
    }

    pub fn append_value(&mut self, j: usize, value: &Value) -> ExecResult<()> {
        self.builder_mut(j)?.append_value(value)
    }

    pub fn append_null(&mut self, j: usize) -> ExecResult<()> {
        self.builder_mut(j)?.append_null();
        Ok(())
    }

    pub fn append_array(&mut self, j: usize, array: &ArrayRef) -> ExecResult<()> {
        self.builder_mut(j)?.append_array(array)
    }

    /// Appends one whole incoming row-batch. `col_map[j]` names the reader
    /// column feeding output column `j`.
    pub fn append_reader(&mut self, reader: &ColReader<'_>, col_map: &[usize]) -> ExecResult<()> {
        if col_map.len() != self.cols.len() {
            return Err(ExecError::validation(format!(
                "column map has {} entries for {} output columns",
                col_map.len(),
                self.cols.len()
            )));
        }
        for (j, &src) in col_map.iter().enumerate() {
            if src >= reader.batch().num_columns() {
                return Err(ExecError::validation(format!(
                    "column map entry {} references source column {} of {}",
                    j,
                    src,
                    reader.batch().num_columns()
                )));
            }
            let array = reader.batch().column(src).clone();
            self.append_array(j, &array)?;
        }
        Ok(())
    }

    /// Discards buffered rows, keeping the schema. Arrow builders reset on
    /// finish, so this just drops the produced arrays.
    pub fn clear_data(&mut self) {
        for b in &mut self.builders {
            let _ = b.finish();
        }
    }

    /// Emits the buffered rows as one immutable table and leaves the builder
    /// empty with its schema intact.
    pub fn build(&mut self) -> ExecResult<BatchTable> {
        let nrows = self.nrows();
        for (j, b) in self.builders.iter().enumerate() {
            if b.len() != nrows {
                return Err(ExecError::validation(format!(
                    "column \"{}\" has {} rows, expected {}",
                    self.cols[j].label,
                    b.len(),
                    nrows
                )));
            }
        }
        let schema = Arc::new(Schema::new(
            self.cols
                .iter()
                .map(ColMeta::to_arrow_field)
                .collect::<Vec<_>>(),
        ));
        let arrays: Vec<ArrayRef> = self.builders.iter_mut().map(ColumnBuilder::finish).collect();
        let batches = if self.cols.is_empty() {
            Vec::new()
        } else {
            let batch = RecordBatch::try_new(schema, arrays)
                .map_err(|e| ExecError::internal(format!("assemble record batch: {e}")))?;
            vec![batch]
        };
        BatchTable::try_new(self.key.clone(), self.cols.clone(), batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<ColMeta> {
        vec![
            ColMeta::new("tag", ColumnType::String),
            ColMeta::new("value", ColumnType::Float),
        ]
    }

    #[test]
    fn build_resets_builder() {
        let mut b = TableBuilder::new(GroupKey::empty(), 16);
        b.add_cols(&schema()).unwrap();
        b.append_value(0, &Value::str("a")).unwrap();
        b.append_value(1, &Value::Float(1.0)).unwrap();
        let t1 = b.build().unwrap();
        assert_eq!(t1.nrows(), 1);
        assert_eq!(b.nrows(), 0);

        b.append_value(0, &Value::str("b")).unwrap();
        b.append_value(1, &Value::Float(2.0)).unwrap();
        let t2 = b.build().unwrap();
        assert_eq!(t2.nrows(), 1);
    }

    #[test]
    fn duplicate_label_rejected() {
        let mut b = TableBuilder::new(GroupKey::empty(), 16);
        b.add_col(ColMeta::new("x", ColumnType::Int)).unwrap();
        let err = b.add_col(ColMeta::new("x", ColumnType::Float)).unwrap_err();
        assert!(err.message.contains("already exists"));
    }

    #[test]
    fn type_mismatch_rejected() {
        let mut b = TableBuilder::new(GroupKey::empty(), 16);
        b.add_col(ColMeta::new("x", ColumnType::Int)).unwrap();
        let err = b.append_value(0, &Value::str("nope")).unwrap_err();
        assert!(err.message.contains("cannot append"));
    }

    #[test]
    fn ragged_columns_rejected_at_build() {
        let mut b = TableBuilder::new(GroupKey::empty(), 16);
        b.add_cols(&schema()).unwrap();
        b.append_value(0, &Value::str("a")).unwrap();
        // column 1 left empty
        let err = b.build().unwrap_err();
        assert!(err.message.contains("rows, expected"));
    }

    #[test]
    fn append_reader_copies_whole_batch_with_nulls() {
        let mut src = TableBuilder::new(GroupKey::empty(), 16);
        src.add_cols(&schema()).unwrap();
        src.append_value(0, &Value::str("a")).unwrap();
        src.append_null(0).unwrap();
        src.append_value(1, &Value::Float(1.5)).unwrap();
        src.append_value(1, &Value::Float(2.5)).unwrap();
        let table = src.build().unwrap();

        let mut dst = TableBuilder::new(GroupKey::empty(), 16);
        // reversed column order via the map
        dst.add_col(ColMeta::new("value", ColumnType::Float)).unwrap();
        dst.add_col(ColMeta::new("tag", ColumnType::String)).unwrap();
        table
            .do_batches(|r| dst.append_reader(r, &[1, 0]))
            .unwrap();

        let out = dst.build().unwrap();
        assert_eq!(out.nrows(), 2);
        out.do_batches(|r| {
            let floats = r.floats(0)?;
            let strings = r.strings(1)?;
            assert_eq!(floats.value(0), 1.5);
            assert_eq!(floats.value(1), 2.5);
            assert_eq!(strings.value(0), "a");
            assert!(strings.is_null(1));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn clear_data_keeps_schema() {
        let mut b = TableBuilder::new(GroupKey::empty(), 16);
        b.add_cols(&schema()).unwrap();
        b.append_value(0, &Value::str("a")).unwrap();
        b.append_value(1, &Value::Float(1.0)).unwrap();
        b.clear_data();
        assert_eq!(b.nrows(), 0);
        assert_eq!(b.ncols(), 2);
    }
}
