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
use tracing::debug;

use super::{BuilderContext, MutationSpec, SchemaMutator};
use crate::common::Timestamp;
use crate::common::error::{ExecError, ExecResult};
use crate::exec::dataset::{AccumulationMode, Dataset};
use crate::exec::group_key::GroupKey;
use crate::exec::table::BatchTable;
use crate::exec::transformation::Transformation;

/// The engine side of the mutation chain: runs the mutators over each
/// incoming table's metadata, installs the mutated schema into the per-key
/// output builder on first touch, and copies qualifying rows through the
/// source-column map.
pub struct SchemaMutationTransformation {
    dataset: Dataset,
    mutators: Vec<Box<dyn SchemaMutator>>,
}

impl SchemaMutationTransformation {
    pub fn new(dataset: Dataset, mutators: Vec<Box<dyn SchemaMutator>>) -> Self {
        Self { dataset, mutators }
    }

    pub fn from_specs(dataset: Dataset, specs: &[MutationSpec]) -> ExecResult<Self> {
        let mutators = specs
            .iter()
            .map(MutationSpec::mutator)
            .collect::<ExecResult<Vec<_>>>()?;
        Ok(Self::new(dataset, mutators))
    }
}

impl Transformation for SchemaMutationTransformation {
    fn process(&mut self, table: BatchTable) -> ExecResult<()> {
        let mut ctx = BuilderContext::new(&table);
        for m in &mut self.mutators {
            m.mutate(&mut ctx)?;
        }
        debug!(
            "schema mutation: {} -> {} ({} cols)",
            table.key(),
            ctx.key,
            ctx.cols.len()
        );

        let out_key = ctx.key.clone();
        {
            let (builder, is_new) = self.dataset.table_builder(&out_key);
            if is_new {
                builder.add_cols(&ctx.cols)?;
            } else if builder.cols() != ctx.cols.as_slice() {
                // Dropping a key column can merge partitions; all inputs
                // mapping to one output key must agree on the schema.
                return Err(ExecError::validation(format!(
                    "mutated schema for key {out_key} conflicts with an earlier table"
                )));
            }
            table.do_batches(|r| builder.append_reader(r, &ctx.col_map))?;
        }

        match self.dataset.mode() {
            AccumulationMode::Append => self.dataset.trigger_table(&out_key),
            AccumulationMode::Materialize => Ok(()),
        }
    }

    fn retract_table(&mut self, key: &GroupKey) -> ExecResult<()> {
        // The upstream key is forwarded as-is; a retraction arrives before
        // any replacement data, so downstream buffers keyed by mutated keys
        // are rebuilt from the re-processed tables.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::column::{ColMeta, ColumnType, Value};
    use crate::exec::mutate::{DropSpec, RenameSpec};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct CollectSink {
        tables: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    }

    impl Transformation for CollectSink {
        fn process(&mut self, table: BatchTable) -> ExecResult<()> {
            let labels = table.cols().iter().map(|c| c.label.clone()).collect();
            self.tables
                .lock()
                .unwrap()
                .push((table.key().to_string(), labels));
            Ok(())
        }

        fn retract_table(&mut self, _key: &GroupKey) -> ExecResult<()> {
            Ok(())
        }

        fn update_watermark(&mut self, _watermark: Timestamp) -> ExecResult<()> {
            Ok(())
        }

        fn update_processing_time(&mut self, _now: Timestamp) -> ExecResult<()> {
            Ok(())
        }

        fn finish(&mut self, _err: Option<ExecError>) {}
    }

    fn input_table() -> BatchTable {
        let key = GroupKey::new(
            vec![ColMeta::new("tag", ColumnType::String)],
            vec![Value::str("a")],
        )
        .unwrap();
        let mut b = crate::exec::builder::TableBuilder::new(key, 16);
        b.add_cols(&[
            ColMeta::new("tag", ColumnType::String),
            ColMeta::new("value", ColumnType::Int),
            ColMeta::new("scratch", ColumnType::Float),
        ])
        .unwrap();
        b.append_value(0, &Value::str("a")).unwrap();
        b.append_value(1, &Value::Int(42)).unwrap();
        b.append_value(2, &Value::Float(0.1)).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn rename_then_drop_through_the_engine() {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = CollectSink {
            tables: Arc::clone(&collected),
        };
        let dataset = Dataset::with_capacity(AccumulationMode::Append, 16)
            .with_downstream(Box::new(sink));
        let specs = vec![
            MutationSpec::Rename(RenameSpec {
                columns: HashMap::from([("tag".to_string(), "host".to_string())]),
            }),
            MutationSpec::Drop(DropSpec {
                columns: vec!["scratch".to_string()],
            }),
        ];
        let mut t = SchemaMutationTransformation::from_specs(dataset, &specs).unwrap();

        t.process(input_table()).unwrap();
        t.finish(None);

        let collected = collected.lock().unwrap();
        assert_eq!(collected.len(), 1);
        let (key, labels) = &collected[0];
        assert_eq!(key, "{host=a}");
        assert_eq!(labels, &vec!["host".to_string(), "value".to_string()]);
    }

    #[test]
    fn mutator_error_aborts_processing() {
        let dataset = Dataset::with_capacity(AccumulationMode::Append, 16);
        let specs = vec![MutationSpec::Rename(RenameSpec {
            columns: HashMap::from([("missing".to_string(), "x".to_string())]),
        })];
        let mut t = SchemaMutationTransformation::from_specs(dataset, &specs).unwrap();
        let err = t.process(input_table()).unwrap_err();
        assert_eq!(err.kind, crate::common::error::ErrorKind::Validation);
    }
}
