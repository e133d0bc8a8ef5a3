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
//! Column metadata and scalar values.
//!
//! Responsibilities:
//! - Defines the typed column surface (`ColumnType`, `ColMeta`) and its
//!   bijection to Arrow data types.
//! - Defines `Value`, the owned scalar used in group keys, with total
//!   equality/ordering/hashing so keys can address hash maps and sort
//!   deterministically.
//!
//! Key exported interfaces:
//! - Types: `ColumnType`, `ColMeta`, `Value`.
//! - Functions: `col_idx`, `value_at`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray,
    TimestampNanosecondArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, TimeUnit};

use crate::common::Timestamp;
use crate::common::error::{ExecError, ExecResult};

/// The value types a column may carry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ColumnType {
    Bool,
    Int,
    UInt,
    Float,
    String,
    Time,
}

impl ColumnType {
    pub fn to_arrow(self) -> DataType {
        match self {
            ColumnType::Bool => DataType::Boolean,
            ColumnType::Int => DataType::Int64,
            ColumnType::UInt => DataType::UInt64,
            ColumnType::Float => DataType::Float64,
            ColumnType::String => DataType::Utf8,
            ColumnType::Time => DataType::Timestamp(TimeUnit::Nanosecond, None),
        }
    }

    pub fn from_arrow(dt: &DataType) -> ExecResult<Self> {
        match dt {
            DataType::Boolean => Ok(ColumnType::Bool),
            DataType::Int64 => Ok(ColumnType::Int),
            DataType::UInt64 => Ok(ColumnType::UInt),
            DataType::Float64 => Ok(ColumnType::Float),
            DataType::Utf8 => Ok(ColumnType::String),
            DataType::Timestamp(TimeUnit::Nanosecond, None) => Ok(ColumnType::Time),
            other => Err(ExecError::validation(format!(
                "unsupported arrow data type {other:?}"
            ))),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::Bool => "bool",
            ColumnType::Int => "int",
            ColumnType::UInt => "uint",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Time => "time",
        };
        f.write_str(s)
    }
}

/// Label and type of one column. Row data lives in Arrow arrays; this is the
/// metadata the schema-mutation pipeline rewrites.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ColMeta {
    pub label: String,
    pub column_type: ColumnType,
}

impl ColMeta {
    pub fn new(label: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            label: label.into(),
            column_type,
        }
    }

    pub fn to_arrow_field(&self) -> Field {
        // Every rivulet column is nullable; null slots carry an unspecified
        // underlying value guarded by the Arrow validity bitmap.
        Field::new(self.label.clone(), self.column_type.to_arrow(), true)
    }
}

/// Index of `label` in `cols`, or `None` if absent.
pub fn col_idx(label: &str, cols: &[ColMeta]) -> Option<usize> {
    cols.iter().position(|c| c.label == label)
}

/// Owned scalar value of one column slot.
///
/// `Null` remembers the column type so a null slot still compares and
/// hashes consistently with its column.
#[derive(Clone, Debug)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(Arc<str>),
    Time(Timestamp),
    Null(ColumnType),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Bool(_) => ColumnType::Bool,
            Value::Int(_) => ColumnType::Int,
            Value::UInt(_) => ColumnType::UInt,
            Value::Float(_) => ColumnType::Float,
            Value::Str(_) => ColumnType::String,
            Value::Time(_) => ColumnType::Time,
            Value::Null(t) => *t,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    // Discriminant used for cross-type ordering; same order as ColumnType.
    fn type_rank(&self) -> u8 {
        match self.column_type() {
            ColumnType::Bool => 0,
            ColumnType::Int => 1,
            ColumnType::UInt => 2,
            ColumnType::Float => 3,
            ColumnType::String => 4,
            ColumnType::Time => 5,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            // Bit-pattern equality keeps Eq/Hash lawful; NaN equals NaN here.
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Null(a), Value::Null(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.type_rank());
        match self {
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::UInt(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Str(v) => v.hash(state),
            Value::Time(v) => v.hash(state),
            Value::Null(t) => t.hash(state),
        }
        state.write_u8(self.is_null() as u8);
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        // Nulls sort before values of the same type; mixed types order by
        // type rank so the total order stays deterministic.
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::UInt(a), Value::UInt(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Null(a), Value::Null(b)) => a.cmp(b),
            (Value::Null(a), _) => match a.cmp(&other.column_type()) {
                Ordering::Equal => Ordering::Less,
                ord => ord,
            },
            (_, Value::Null(b)) => match self.column_type().cmp(b) {
                Ordering::Equal => Ordering::Greater,
                ord => ord,
            },
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Time(v) => write!(f, "{v}"),
            Value::Null(_) => f.write_str("null"),
        }
    }
}

/// Extracts the scalar at `row` from an Arrow array of the given column type.
pub fn value_at(array: &ArrayRef, column_type: ColumnType, row: usize) -> ExecResult<Value> {
    if row >= array.len() {
        return Err(ExecError::validation(format!(
            "row index {} out of range [0, {})",
            row,
            array.len()
        )));
    }
    if array.is_null(row) {
        return Ok(Value::Null(column_type));
    }
    let mismatch = || {
        ExecError::validation(format!(
            "array type {:?} does not match column type {}",
            array.data_type(),
            column_type
        ))
    };
    match column_type {
        ColumnType::Bool => {
            let a = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(mismatch)?;
            Ok(Value::Bool(a.value(row)))
        }
        ColumnType::Int => {
            let a = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(mismatch)?;
            Ok(Value::Int(a.value(row)))
        }
        ColumnType::UInt => {
            let a = array
                .as_any()
                .downcast_ref::<UInt64Array>()
                .ok_or_else(mismatch)?;
            Ok(Value::UInt(a.value(row)))
        }
        ColumnType::Float => {
            let a = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(mismatch)?;
            Ok(Value::Float(a.value(row)))
        }
        ColumnType::String => {
            let a = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(mismatch)?;
            Ok(Value::str(a.value(row)))
        }
        ColumnType::Time => {
            let a = array
                .as_any()
                .downcast_ref::<TimestampNanosecondArray>()
                .ok_or_else(mismatch)?;
            Ok(Value::Time(a.value(row)))
        }
    }
}
