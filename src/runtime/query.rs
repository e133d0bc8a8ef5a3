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
//! Query-side result delivery.
//!
//! Responsibilities:
//! - Bounded single-producer/single-consumer result queue between the
//!   executing pipeline and the consumer, with cooperative cancellation and
//!   first-error-wins terminal state.
//!
//! Key exported interfaces:
//! - Types: `ResultQueue`, `ResultSender`, `Query`, `QueryCancel`,
//!   `QueryResult`.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use tracing::debug;

use crate::common::error::{ExecError, ExecResult, record_first};
use crate::exec::table::BatchTable;

/// One named result stream: a single-pass sequence of tables.
#[derive(Debug)]
pub struct QueryResult {
    name: String,
    tables: Vec<BatchTable>,
}

impl QueryResult {
    pub fn new(name: impl Into<String>, tables: Vec<BatchTable>) -> Self {
        Self {
            name: name.into(),
            tables,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ntables(&self) -> usize {
        self.tables.len()
    }

    /// Applies `f` to each table in order, short-circuiting on the first
    /// error. Single pass: tables are drained as they are visited.
    pub fn do_tables<F>(&mut self, mut f: F) -> ExecResult<()>
    where
        F: FnMut(&BatchTable) -> ExecResult<()>,
    {
        for table in self.tables.drain(..) {
            f(&table)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<QueryResult>,
    closed: bool,
    cancelled: bool,
    err: Option<ExecError>,
}

/// Bounded SPSC queue backing one query's result delivery.
pub struct ResultQueue {
    inner: Mutex<Inner>,
    cv: Condvar,
    capacity: usize,
}

impl ResultQueue {
    /// Producer/consumer pair over a fresh queue.
    pub fn channel(capacity: usize) -> (ResultSender, Query) {
        let queue = Arc::new(ResultQueue {
            inner: Mutex::new(Inner::default()),
            cv: Condvar::new(),
            capacity: capacity.max(1),
        });
        (
            ResultSender {
                queue: Arc::clone(&queue),
            },
            Query { queue },
        )
    }

    /// Pair sized from the loaded configuration.
    pub fn channel_from_config() -> (ResultSender, Query) {
        let capacity = crate::common::config::config()
            .map(|cfg| cfg.runtime.result_queue_capacity)
            .unwrap_or(16);
        Self::channel(capacity)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Producer half; owned by the pipeline's result sink.
pub struct ResultSender {
    queue: Arc<ResultQueue>,
}

impl ResultSender {
    /// Blocks while the queue is full. Fails with a cancellation error once
    /// the consumer released the query; the producer must stop at its next
    /// safe checkpoint.
    pub fn send(&self, result: QueryResult) -> ExecResult<()> {
        let q = &*self.queue;
        let mut inner = q.lock();
        loop {
            if inner.cancelled {
                return Err(ExecError::cancelled("query released by consumer"));
            }
            if inner.closed {
                return Err(ExecError::protocol("send after result queue closed"));
            }
            if inner.queue.len() < q.capacity {
                inner.queue.push_back(result);
                q.cv.notify_all();
                return Ok(());
            }
            inner = q.cv.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Clean end of stream. First terminal transition wins.
    pub fn close_ok(&self) {
        let q = &*self.queue;
        let mut inner = q.lock();
        if !inner.closed {
            inner.closed = true;
            q.cv.notify_all();
        }
    }

    /// Failed end of stream: records the first error, drops any queued
    /// results and closes.
    pub fn close_error(&self, err: ExecError) {
        let q = &*self.queue;
        let mut inner = q.lock();
        if inner.closed {
            debug!("result queue already closed, dropping error: {err}");
            return;
        }
        record_first(&mut inner.err, err);
        inner.queue.clear();
        inner.closed = true;
        q.cv.notify_all();
    }
}

impl Drop for ResultSender {
    fn drop(&mut self) {
        // A producer that panicked or forgot to close must not leave the
        // consumer blocked forever.
        self.close_ok();
    }
}

/// Cancellation handle usable from another thread while the consumer blocks.
#[derive(Clone)]
pub struct QueryCancel {
    queue: Arc<ResultQueue>,
}

impl QueryCancel {
    pub fn done(&self) {
        cancel(&self.queue);
    }
}

fn cancel(queue: &Arc<ResultQueue>) {
    let mut inner = queue.lock();
    if !inner.cancelled {
        inner.cancelled = true;
        inner.queue.clear();
        queue.cv.notify_all();
    }
}

/// Consumer-side handle over one running query.
pub struct Query {
    queue: Arc<ResultQueue>,
}

impl Query {
    /// Blocks until a result is available or the query reaches a terminal
    /// state; `None` means no further results will arrive.
    pub fn recv(&self) -> Option<QueryResult> {
        let q = &*self.queue;
        let mut inner = q.lock();
        loop {
            if let Some(result) = inner.queue.pop_front() {
                q.cv.notify_all();
                return Some(result);
            }
            if inner.cancelled || inner.closed {
                return None;
            }
            inner = q.cv.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Idempotent, cooperative cancellation: in-flight sends may still be
    /// observed once, nothing more is delivered.
    pub fn done(&self) {
        cancel(&self.queue);
    }

    /// First error recorded by the query, `None` for clean or cancelled
    /// completion.
    pub fn err(&self) -> Option<ExecError> {
        self.queue.lock().err.clone()
    }

    pub fn cancel_handle(&self) -> QueryCancel {
        QueryCancel {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Runs `produce` on a background thread wired to a fresh queue and
    /// returns the consumer handle.
    pub fn spawn_producer<F>(capacity: usize, produce: F) -> Query
    where
        F: FnOnce(ResultSender) + Send + 'static,
    {
        let (sender, query) = ResultQueue::channel(capacity);
        std::thread::spawn(move || produce(sender));
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn results_arrive_in_order_then_none() {
        let (sender, query) = ResultQueue::channel(2);
        std::thread::spawn(move || {
            for name in ["a", "b", "c"] {
                sender.send(QueryResult::new(name, vec![])).unwrap();
            }
            sender.close_ok();
        });
        let names: Vec<String> = std::iter::from_fn(|| query.recv())
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(query.err().is_none());
    }

    #[test]
    fn bounded_send_blocks_until_recv() {
        let (sender, query) = ResultQueue::channel(1);
        let producer = std::thread::spawn(move || {
            sender.send(QueryResult::new("a", vec![])).unwrap();
            // Second send must wait for the consumer.
            sender.send(QueryResult::new("b", vec![])).unwrap();
            sender.close_ok();
        });
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(query.recv().unwrap().name(), "a");
        assert_eq!(query.recv().unwrap().name(), "b");
        assert!(query.recv().is_none());
        producer.join().unwrap();
    }

    #[test]
    fn close_error_discards_queued_results() {
        let (sender, query) = ResultQueue::channel(4);
        sender.send(QueryResult::new("partial", vec![])).unwrap();
        sender.close_error(ExecError::io("publish failed"));
        sender.close_error(ExecError::io("second, discarded"));
        assert!(query.recv().is_none());
        assert_eq!(query.err().unwrap().message, "publish failed");
    }

    #[test]
    fn cancellation_unblocks_producer_with_cancelled_error() {
        let (sender, query) = ResultQueue::channel(1);
        let cancel = query.cancel_handle();
        let producer = std::thread::spawn(move || {
            sender.send(QueryResult::new("a", vec![])).unwrap();
            // Queue is full; this send blocks until cancellation.
            sender.send(QueryResult::new("b", vec![]))
        });
        std::thread::sleep(Duration::from_millis(20));
        cancel.done();
        let err = producer.join().unwrap().unwrap_err();
        assert!(err.is_cancellation());
        assert!(query.recv().is_none());
        assert!(query.err().is_none());
    }

    #[test]
    fn dropped_sender_closes_cleanly() {
        let (sender, query) = ResultQueue::channel(4);
        drop(sender);
        assert!(query.recv().is_none());
        assert!(query.err().is_none());
    }
}
