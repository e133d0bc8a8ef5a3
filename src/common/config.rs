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
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<RivuletConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

fn default_result_queue_capacity() -> usize {
    16
}

fn default_builder_initial_capacity() -> usize {
    1024
}

fn default_sink_connect_timeout_ms() -> u64 {
    10_000
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static RivuletConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = RivuletConfig::load_from_file(path.as_ref())?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

/// Loads `$RIVULET_CONFIG` or `./rivulet.toml` when present; the engine is a
/// library, so a missing file means built-in defaults rather than an error.
pub fn init_from_env_or_default() -> Result<&'static RivuletConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = match config_path_from_env() {
        Some(path) => RivuletConfig::load_from_file(&path)?,
        None => RivuletConfig::default(),
    };
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static RivuletConfig> {
    init_from_env_or_default()
}

fn config_path_from_env() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("RIVULET_CONFIG") {
        if !p.trim().is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    let candidate = PathBuf::from("rivulet.toml");
    if candidate.exists() {
        return Some(candidate);
    }
    None
}

#[derive(Clone, Deserialize)]
pub struct RivuletConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "rivulet=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl RivuletConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: RivuletConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for RivuletConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Bound on the result delivery queue between the executor and the
    /// consumer-facing result iterator.
    #[serde(default = "default_result_queue_capacity")]
    pub result_queue_capacity: usize,

    /// Initial row capacity for newly created table builders.
    #[serde(default = "default_builder_initial_capacity")]
    pub builder_initial_capacity: usize,

    /// Connection-setup bound for long-running sink stages. Sinks must abort
    /// with an IO error instead of blocking the upstream pipeline past this.
    #[serde(default = "default_sink_connect_timeout_ms")]
    pub sink_connect_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            result_queue_capacity: default_result_queue_capacity(),
            builder_initial_capacity: default_builder_initial_capacity(),
            sink_connect_timeout_ms: default_sink_connect_timeout_ms(),
        }
    }
}
