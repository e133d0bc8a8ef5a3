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
//! Pull-style facade over a running query.
//!
//! Responsibilities:
//! - `more`/`next` iteration protocol over the query's result queue, with
//!   idempotent release and post-exhaustion error reporting.
//!
//! Key exported interfaces:
//! - Types: `ResultIterator`.

use crate::common::error::{ExecError, ExecResult};
use crate::runtime::query::{Query, QueryResult};

/// Iterates the results of one query. `more` blocks until a result is ready
/// or the stream ends; each `true` must be paired with exactly one `next`.
pub struct ResultIterator {
    query: Query,
    ready: Option<QueryResult>,
    exhausted: bool,
    released: bool,
}

impl ResultIterator {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            ready: None,
            exhausted: false,
            released: false,
        }
    }

    /// Blocks until the next result is available. Returns `false` once the
    /// stream is complete, failed, or released; repeated calls without an
    /// intervening `next` keep returning `true` for the same result.
    pub fn more(&mut self) -> bool {
        if self.released || self.exhausted {
            return false;
        }
        if self.ready.is_some() {
            return true;
        }
        match self.query.recv() {
            Some(result) => {
                self.ready = Some(result);
                true
            }
            None => {
                self.exhausted = true;
                false
            }
        }
    }

    /// The result announced by the last `more`. Calling without a preceding
    /// `more` returning `true` is a protocol error.
    pub fn next(&mut self) -> ExecResult<QueryResult> {
        self.ready
            .take()
            .ok_or_else(|| ExecError::protocol("next called without more"))
    }

    /// Releases the underlying query, cancelling it if still running.
    /// Idempotent; the iterator yields no further results.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.ready = None;
            self.query.done();
        }
    }

    /// First error the query recorded, if any. Meaningful once `more` has
    /// returned `false`; cancellation is not reported as an error.
    pub fn err(&self) -> Option<ExecError> {
        self.query.err()
    }
}

impl Drop for ResultIterator {
    fn drop(&mut self) {
        self.release();
    }
}
