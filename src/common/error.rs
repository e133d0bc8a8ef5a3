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
//! Engine-wide error taxonomy.
//!
//! Responsibilities:
//! - Classifies failures into the kinds the pipeline protocol distinguishes
//!   (validation, protocol violation, IO, cancellation).
//! - Carries the first-error-wins policy used by datasets and result queues.
//!
//! Key exported interfaces:
//! - Types: `ErrorKind`, `ExecError`, `ExecResult`.

use std::fmt;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Malformed spec or arguments: unknown column, bad group key, schema
    /// mismatch. Surfaced to the offending caller, never retried.
    Validation,
    /// Lifecycle contract breach: process after finish, watermark regression,
    /// double finish. Fatal to the stage.
    Protocol,
    /// Sink/network failure, propagated through `finish`.
    Io,
    /// Consumer-initiated early stop. Not a failure.
    Cancelled,
    /// Engine bug or unclassified failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation error",
            ErrorKind::Protocol => "protocol violation",
            ErrorKind::Io => "io error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExecError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// True for consumer-initiated stops, which surface as clean completion
    /// rather than query failure.
    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

pub type ExecResult<T> = Result<T, ExecError>;

/// Records `err` into `slot` only if no earlier error is present.
pub fn record_first(slot: &mut Option<ExecError>, err: ExecError) {
    if slot.is_none() {
        *slot = Some(err);
    }
}
