//! The REPL pool: owns `free`/`busy`, preserves their invariants, and chooses
//! workers by header. See SPEC_FULL.md §4.3.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::ReplPoolError;
use crate::repl::{Worker, WorkerId};

struct PoolInner {
    free: Vec<Worker>,
    busy: HashSet<WorkerId>,
}

/// Read-only view of pool occupancy for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub free: usize,
    pub busy: usize,
    pub max_repls: usize,
}

pub struct Pool {
    inner: Mutex<PoolInner>,
    max_repls: usize,
    max_uses: u32,
    max_mem_mib: u64,
    interpreter_path: PathBuf,
    interpreter_cwd: PathBuf,
}

impl Pool {
    pub fn new(max_repls: usize, max_uses: u32, max_mem_mib: u64, interpreter_path: PathBuf, interpreter_cwd: PathBuf) -> Self {
        Pool {
            inner: Mutex::new(PoolInner { free: Vec::new(), busy: HashSet::new() }),
            max_repls,
            max_uses,
            max_mem_mib,
            interpreter_path,
            interpreter_cwd,
        }
    }

    pub fn max_repls(&self) -> usize {
        self.max_repls
    }

    pub fn max_uses(&self) -> u32 {
        self.max_uses
    }

    pub fn max_mem_mib(&self) -> u64 {
        self.max_mem_mib
    }

    pub fn interpreter_path(&self) -> &std::path::Path {
        &self.interpreter_path
    }

    pub fn interpreter_cwd(&self) -> &std::path::Path {
        &self.interpreter_cwd
    }

    /// Returns a worker matching `header`, constructing or evicting as needed.
    /// The heavy parts — spawning a subprocess, closing an evicted worker — never
    /// happen while the bookkeeping mutex is held.
    pub async fn acquire(&self, header: &str) -> Result<Worker, ReplPoolError> {
        let mut evicted = None;

        let worker = {
            let mut inner = self.inner.lock().await;

            if let Some(idx) = inner.free.iter().position(|w| w.header() == header && !w.exhausted()) {
                let worker = inner.free.remove(idx);
                inner.busy.insert(worker.id());
                worker
            } else if inner.free.len() + inner.busy.len() < self.max_repls {
                let worker = Worker::new(header.to_string(), self.max_uses, self.max_mem_mib);
                inner.busy.insert(worker.id());
                worker
            } else if let Some(idx) = oldest_free_index(&inner.free) {
                let old = inner.free.remove(idx);
                let worker = Worker::new(header.to_string(), self.max_uses, self.max_mem_mib);
                inner.busy.insert(worker.id());
                evicted = Some(old);
                worker
            } else {
                return Err(ReplPoolError::NoAvailable);
            }
        };

        if let Some(old) = evicted {
            tracing::info!(worker_id = %old.id(), "evicting oldest free REPL worker to make room");
            tokio::spawn(async move { old.close().await });
        }

        Ok(worker)
    }

    /// Returns a worker to `free`, or closes it in place if it's exhausted.
    /// A worker not tracked as `busy` (e.g. released twice) is logged and dropped.
    pub async fn release(&self, worker: Worker) {
        let mut inner = self.inner.lock().await;

        if !inner.busy.remove(&worker.id()) {
            tracing::warn!(worker_id = %worker.id(), "release called on a worker that wasn't busy");
            return;
        }

        if worker.exhausted() {
            drop(inner);
            tracing::info!(worker_id = %worker.id(), "retiring exhausted REPL worker");
            worker.close().await;
        } else {
            inner.free.push(worker);
        }
    }

    /// Removes `worker` from pool bookkeeping and closes it, regardless of
    /// exhaustion. Used after timeouts, crashes, and protocol errors.
    pub async fn destroy(&self, worker: Worker) {
        {
            let mut inner = self.inner.lock().await;
            inner.busy.remove(&worker.id());
            inner.free.retain(|w| w.id() != worker.id());
        }
        tracing::info!(worker_id = %worker.id(), "destroying REPL worker");
        worker.close().await;
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let inner = self.inner.lock().await;
        PoolSnapshot { free: inner.free.len(), busy: inner.busy.len(), max_repls: self.max_repls }
    }

    /// Closes every free worker. Workers still checked out by an in-flight
    /// request are left for their caller to release or destroy; [`Worker::close`]
    /// always runs on a worker's way out of the pool, so none outlive their
    /// owning task.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        let free = std::mem::take(&mut inner.free);
        drop(inner);
        for worker in free {
            worker.close().await;
        }
    }
}

fn oldest_free_index(free: &[Worker]) -> Option<usize> {
    free.iter()
        .enumerate()
        .min_by_key(|(_, w)| w.created_at())
        .map(|(idx, _)| idx)
}
