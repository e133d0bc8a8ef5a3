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
//! Stage-kind registry and physical-plan wiring.
//!
//! Responsibilities:
//! - Maps stage-kind identifiers to transformation constructors through an
//!   explicit registry object built once at startup; no global mutable
//!   registration.
//! - Wires a linear physical plan into a transformation chain ending in the
//!   query's result sink.
//!
//! Key exported interfaces:
//! - Types: `StageSpec`, `Plan`, `TransformationRegistry`.
//! - Functions: `build_plan`.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use crate::common::error::{ExecError, ExecResult};
use crate::exec::dataset::{AccumulationMode, Dataset};
use crate::exec::mutate::{MutationSpec, SchemaMutationTransformation};
use crate::exec::transformation::{
    PassthroughTransformation, ResultSinkTransformation, Transformation,
};
use crate::runtime::query::ResultSender;

/// One physical stage as named by the planner: a transformation kind plus
/// its parameters.
#[derive(Clone, Debug, Deserialize)]
pub struct StageSpec {
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A linear physical plan, source end first.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Plan {
    pub stages: Vec<StageSpec>,
}

pub type Constructor = Box<
    dyn Fn(&StageSpec, Box<dyn Transformation>) -> ExecResult<Box<dyn Transformation>>
        + Send
        + Sync,
>;

/// Explicit table from stage kind to constructor. Built once at process
/// start and passed to the plan builder; construction order is
/// deterministic and testable.
pub struct TransformationRegistry {
    ctors: HashMap<String, Constructor>,
}

impl TransformationRegistry {
    pub fn new() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// Registry preloaded with the stage kinds the core ships.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register("passthrough", Box::new(construct_passthrough))
            .expect("fresh registry");
        registry
            .register("schema_mutation", Box::new(construct_schema_mutation))
            .expect("fresh registry");
        registry
    }

    pub fn register(&mut self, kind: &str, ctor: Constructor) -> ExecResult<()> {
        if self.ctors.contains_key(kind) {
            return Err(ExecError::validation(format!(
                "transformation kind \"{kind}\" already registered"
            )));
        }
        self.ctors.insert(kind.to_string(), ctor);
        Ok(())
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.ctors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn construct(
        &self,
        spec: &StageSpec,
        downstream: Box<dyn Transformation>,
    ) -> ExecResult<Box<dyn Transformation>> {
        let ctor = self.ctors.get(&spec.kind).ok_or_else(|| {
            ExecError::validation(format!("unknown transformation kind \"{}\"", spec.kind))
        })?;
        ctor(spec, downstream)
    }
}

impl Default for TransformationRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Wires `plan` into a push chain delivering into `sender`. Returns the
/// head transformation; callers push source tables and lifecycle events into
/// it. Built sink-first so every stage's dataset already owns its
/// downstream.
pub fn build_plan(
    registry: &TransformationRegistry,
    plan: &Plan,
    sender: ResultSender,
) -> ExecResult<Box<dyn Transformation>> {
    let mut next: Box<dyn Transformation> = Box::new(ResultSinkTransformation::new(sender));
    for spec in plan.stages.iter().rev() {
        debug!("wiring stage kind={}", spec.kind);
        next = registry.construct(spec, next)?;
    }
    Ok(next)
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum ModeParam {
    Append,
    Materialize,
}

impl From<ModeParam> for AccumulationMode {
    fn from(mode: ModeParam) -> Self {
        match mode {
            ModeParam::Append => AccumulationMode::Append,
            ModeParam::Materialize => AccumulationMode::Materialize,
        }
    }
}

fn default_mode() -> ModeParam {
    ModeParam::Append
}

#[derive(Deserialize)]
struct PassthroughParams {
    #[serde(default = "default_mode")]
    mode: ModeParam,
}

fn parse_params<T: serde::de::DeserializeOwned>(spec: &StageSpec) -> ExecResult<T> {
    let params = if spec.params.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        spec.params.clone()
    };
    serde_json::from_value(params).map_err(|e| {
        ExecError::validation(format!("invalid params for \"{}\": {e}", spec.kind))
    })
}

fn construct_passthrough(
    spec: &StageSpec,
    downstream: Box<dyn Transformation>,
) -> ExecResult<Box<dyn Transformation>> {
    let params: PassthroughParams = parse_params(spec)?;
    let dataset = Dataset::new(params.mode.into()).with_downstream(downstream);
    Ok(Box::new(PassthroughTransformation::new(dataset)))
}

#[derive(Deserialize)]
struct SchemaMutationParams {
    #[serde(default = "default_mode")]
    mode: ModeParam,
    mutations: Vec<MutationSpec>,
}

fn construct_schema_mutation(
    spec: &StageSpec,
    downstream: Box<dyn Transformation>,
) -> ExecResult<Box<dyn Transformation>> {
    let params: SchemaMutationParams = parse_params(spec)?;
    let dataset = Dataset::new(params.mode.into()).with_downstream(downstream);
    Ok(Box::new(SchemaMutationTransformation::from_specs(
        dataset,
        &params.mutations,
    )?))
}
