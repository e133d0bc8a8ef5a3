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
pub mod common;
pub mod exec;
pub mod runtime;

pub use common::Timestamp;
pub use common::error::{ExecError, ExecResult, ErrorKind};
pub use exec::column::{ColMeta, ColumnType, Value};
pub use exec::dataset::{AccumulationMode, Dataset};
pub use exec::group_key::GroupKey;
pub use exec::registry::{Plan, StageSpec, TransformationRegistry, build_plan};
pub use exec::table::BatchTable;
pub use exec::transformation::Transformation;
pub use runtime::query::{Query, QueryResult, ResultQueue, ResultSender};
pub use runtime::result_iterator::ResultIterator;
