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
//! End-to-end pipeline tests: plan wiring, lifecycle events and result
//! delivery through the public API.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray, TimestampNanosecondArray};
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;

use rivulet::exec::column::{ColMeta, ColumnType, Value};
use rivulet::exec::group_key::GroupKey;
use rivulet::exec::registry::{Plan, StageSpec, TransformationRegistry, build_plan};
use rivulet::exec::table::BatchTable;
use rivulet::runtime::query::{QueryResult, ResultQueue};
use rivulet::runtime::result_iterator::ResultIterator;
use rivulet::{ErrorKind, Transformation};

fn series_cols() -> Vec<ColMeta> {
    vec![
        ColMeta::new("_time", ColumnType::Time),
        ColMeta::new("_value", ColumnType::Float),
        ColMeta::new("t", ColumnType::String),
    ]
}

fn series_table(tag: &str, times: &[i64], values: &[f64]) -> BatchTable {
    let cols = series_cols();
    let key = GroupKey::new(
        vec![ColMeta::new("t", ColumnType::String)],
        vec![Value::str(tag)],
    )
    .expect("group key");
    let schema = Arc::new(Schema::new(
        cols.iter().map(|c| c.to_arrow_field()).collect::<Vec<_>>(),
    ));
    let arrays: Vec<ArrayRef> = vec![
        Arc::new(TimestampNanosecondArray::from(times.to_vec())),
        Arc::new(Float64Array::from(values.to_vec())),
        Arc::new(StringArray::from(vec![tag; times.len()])),
    ];
    let batch = RecordBatch::try_new(schema, arrays).expect("record batch");
    BatchTable::try_new(key, cols, vec![batch]).expect("table")
}

fn stage(kind: &str, params: serde_json::Value) -> StageSpec {
    StageSpec {
        kind: kind.to_string(),
        params,
    }
}

fn run_plan<F>(plan: Plan, drive: F) -> ResultIterator
where
    F: FnOnce(&mut Box<dyn Transformation>) + Send + 'static,
{
    let registry = TransformationRegistry::with_builtins();
    let (sender, query) = ResultQueue::channel(4);
    let mut head = build_plan(&registry, &plan, sender).expect("build plan");
    std::thread::spawn(move || drive(&mut head));
    ResultIterator::new(query)
}

fn collect_values(result: &mut QueryResult) -> Vec<f64> {
    let mut values = Vec::new();
    result
        .do_tables(|table| {
            table.do_batches(|r| {
                let col = rivulet::exec::column::col_idx("_value", r.cols())
                    .expect("_value column");
                let floats = r.floats(col)?;
                for i in 0..r.len() {
                    values.push(floats.value(i));
                }
                Ok(())
            })
        })
        .expect("do_tables");
    values
}

#[test]
fn passthrough_plan_delivers_tables_per_key() {
    let plan = Plan {
        stages: vec![stage("passthrough", serde_json::json!({"mode": "materialize"}))],
    };
    let mut iter = run_plan(plan, |head| {
        head.process(series_table("a", &[10, 20], &[1.0, 2.0]))
            .expect("process a");
        head.process(series_table("b", &[30], &[3.0])).expect("process b");
        head.finish(None);
    });

    assert!(iter.more());
    let mut first = iter.next().expect("first result");
    assert_eq!(first.name(), "{t=a}");
    assert_eq!(collect_values(&mut first), vec![1.0, 2.0]);

    assert!(iter.more());
    let mut second = iter.next().expect("second result");
    assert_eq!(second.name(), "{t=b}");
    assert_eq!(collect_values(&mut second), vec![3.0]);

    assert!(!iter.more());
    assert!(iter.err().is_none());
}

#[test]
fn append_mode_emits_one_table_per_upstream_batch() {
    let plan = Plan {
        stages: vec![stage("passthrough", serde_json::json!({"mode": "append"}))],
    };
    let mut iter = run_plan(plan, |head| {
        head.process(series_table("a", &[10], &[1.0])).expect("process");
        head.process(series_table("a", &[20], &[2.0])).expect("process");
        head.finish(None);
    });

    assert!(iter.more());
    let mut result = iter.next().expect("result");
    assert_eq!(result.ntables(), 2);
    assert_eq!(collect_values(&mut result), vec![1.0, 2.0]);
    assert!(!iter.more());
}

#[test]
fn schema_mutation_plan_renames_and_drops() {
    let plan = Plan {
        stages: vec![stage(
            "schema_mutation",
            serde_json::json!({
                "mode": "materialize",
                "mutations": [
                    {"kind": "rename", "columns": {"t": "series"}},
                    {"kind": "drop", "columns": ["_time"]},
                ],
            }),
        )],
    };
    let mut iter = run_plan(plan, |head| {
        head.process(series_table("a", &[10, 20], &[1.5, 2.5]))
            .expect("process");
        head.finish(None);
    });

    assert!(iter.more());
    let mut result = iter.next().expect("result");
    // The key column was renamed, so the stream name follows.
    assert_eq!(result.name(), "{series=a}");
    result
        .do_tables(|table| {
            let labels: Vec<&str> = table.cols().iter().map(|c| c.label.as_str()).collect();
            assert_eq!(labels, vec!["_value", "series"]);
            assert!(table.key().has_col("series"));
            assert!(!table.key().has_col("t"));
            Ok(())
        })
        .expect("do_tables");
    assert!(!iter.more());
}

#[test]
fn keep_mutation_matches_drop_complement() {
    let plan = Plan {
        stages: vec![stage(
            "schema_mutation",
            serde_json::json!({
                "mode": "materialize",
                "mutations": [
                    {"kind": "keep", "columns": ["_value", "t"]},
                ],
            }),
        )],
    };
    let mut iter = run_plan(plan, |head| {
        head.process(series_table("a", &[10], &[9.0])).expect("process");
        head.finish(None);
    });

    assert!(iter.more());
    let mut result = iter.next().expect("result");
    result
        .do_tables(|table| {
            let labels: Vec<&str> = table.cols().iter().map(|c| c.label.as_str()).collect();
            assert_eq!(labels, vec!["_value", "t"]);
            Ok(())
        })
        .expect("do_tables");
}

#[test]
fn retraction_removes_pending_output_for_key() {
    let plan = Plan {
        stages: vec![stage("passthrough", serde_json::json!({"mode": "materialize"}))],
    };
    let mut iter = run_plan(plan, |head| {
        head.process(series_table("a", &[10], &[1.0])).expect("process a");
        head.process(series_table("b", &[20], &[2.0])).expect("process b");
        let stale = series_table("a", &[], &[]);
        head.retract_table(stale.key()).expect("retract a");
        head.process(series_table("a", &[30], &[3.0]))
            .expect("reprocess a");
        head.finish(None);
    });

    let mut streams = Vec::new();
    while iter.more() {
        let mut result = iter.next().expect("result");
        let values = collect_values(&mut result);
        streams.push((result.name().to_string(), values));
    }
    assert!(iter.err().is_none());
    // Key "b" is untouched by the retraction of "a".
    assert!(streams.contains(&("{t=b}".to_string(), vec![2.0])));
    let a = streams
        .iter()
        .find(|(name, _)| name == "{t=a}")
        .expect("stream for a");
    assert_eq!(a.1, vec![3.0]);
}

#[test]
fn watermark_regression_is_a_protocol_error() {
    let plan = Plan {
        stages: vec![stage("passthrough", serde_json::json!({"mode": "materialize"}))],
    };
    let mut iter = run_plan(plan, |head| {
        head.update_watermark(100).expect("advance watermark");
        let err = head.update_watermark(50).expect_err("regression rejected");
        assert_eq!(err.kind, ErrorKind::Protocol);
        head.finish(Some(err));
    });

    assert!(!iter.more());
    let err = iter.err().expect("pipeline error");
    assert_eq!(err.kind, ErrorKind::Protocol);
}

#[test]
fn finish_error_supersedes_buffered_results() {
    let plan = Plan {
        stages: vec![stage("passthrough", serde_json::json!({"mode": "materialize"}))],
    };
    let mut iter = run_plan(plan, |head| {
        head.process(series_table("a", &[10], &[1.0])).expect("process");
        head.finish(Some(rivulet::ExecError::io("source went away")));
    });

    assert!(!iter.more());
    let err = iter.err().expect("pipeline error");
    assert_eq!(err.kind, ErrorKind::Io);
    assert_eq!(err.message, "source went away");
}

#[test]
fn multi_stage_plan_chains_in_order() {
    let plan = Plan {
        stages: vec![
            stage("passthrough", serde_json::json!({"mode": "append"})),
            stage(
                "schema_mutation",
                serde_json::json!({
                    "mode": "materialize",
                    "mutations": [{"kind": "duplicate", "column": "_value", "as": "copy"}],
                }),
            ),
        ],
    };
    let mut iter = run_plan(plan, |head| {
        head.process(series_table("a", &[10], &[4.0])).expect("process");
        head.finish(None);
    });

    assert!(iter.more());
    let mut result = iter.next().expect("result");
    result
        .do_tables(|table| {
            let labels: Vec<&str> = table.cols().iter().map(|c| c.label.as_str()).collect();
            assert_eq!(labels, vec!["_time", "_value", "t", "copy"]);
            table.do_batches(|r| {
                let copy = rivulet::exec::column::col_idx("copy", r.cols()).expect("copy");
                assert_eq!(r.floats(copy)?.value(0), 4.0);
                Ok(())
            })
        })
        .expect("do_tables");
}
