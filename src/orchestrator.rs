//! Drives a single snippet through acquire → prime → body-send → release, and
//! fans batches out across the pool while preserving input order. See
//! SPEC_FULL.md §4.4.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::error::ReplPoolError;
use crate::pool::Pool;
use crate::repl::Diagnostics;
use crate::splitter;

#[derive(Debug, Deserialize)]
pub struct SnippetRequest {
    pub custom_id: Option<String>,
    pub code: String,
    pub timeout: Option<f64>,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Serialize)]
pub struct SnippetResponse {
    pub custom_id: String,
    pub time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

/// Runs one snippet to completion: split, acquire, prime if cold, body-send,
/// release or destroy. `NoAvailable` is the sole error that escapes this
/// function (§7); every other REPL-layer failure is folded into the
/// response's `error` field so a batch's siblings are unaffected.
pub async fn run_snippet(
    pool: &Pool,
    req: SnippetRequest,
    custom_id: String,
) -> Result<SnippetResponse, ReplPoolError> {
    let (header, body) = splitter::split(&req.code);
    let timeout = Duration::from_secs_f64(req.timeout.unwrap_or(30.0).max(0.0));
    let debug = req.debug;

    let mut worker = match pool.acquire(header).await {
        Ok(w) => w,
        Err(e @ ReplPoolError::NoAvailable) => return Err(e),
        Err(e) => {
            return Ok(SnippetResponse { custom_id, time: 0.0, response: None, error: Some(e.user_message()), diagnostics: None });
        }
    };

    let start = Instant::now();

    if !worker.is_running() {
        if let Err(e) = worker.start(pool.interpreter_path(), pool.interpreter_cwd()).await {
            pool.destroy(worker).await;
            return Ok(SnippetResponse {
                custom_id,
                time: round_micros(start.elapsed().as_secs_f64()),
                response: None,
                error: Some(e.user_message()),
                diagnostics: None,
            });
        }

        if !header.trim().is_empty() {
            match worker.send_with_timeout(header, debug, true, timeout).await {
                Ok(outcome) if has_fatal_error(&outcome.response) => {
                    let diagnostics = outcome.diagnostics.clone();
                    pool.destroy(worker).await;
                    return Ok(SnippetResponse {
                        custom_id,
                        time: round_micros(start.elapsed().as_secs_f64()),
                        response: Some(outcome.response),
                        error: None,
                        diagnostics,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    let diagnostics = Diagnostics { repl_uuid: worker.id().to_string(), cpu_max: 0.0, memory_max: 0 };
                    pool.destroy(worker).await;
                    return Ok(SnippetResponse {
                        custom_id,
                        time: round_micros(start.elapsed().as_secs_f64()),
                        response: None,
                        error: Some(e.user_message()),
                        diagnostics: Some(diagnostics),
                    });
                }
            }
        }
    }

    let remaining = timeout.saturating_sub(start.elapsed());

    let response = match worker.send_with_timeout(body, debug, false, remaining).await {
        Ok(outcome) => {
            let elapsed = round_micros(start.elapsed().as_secs_f64());
            pool.release(worker).await;
            SnippetResponse {
                custom_id,
                time: elapsed,
                response: Some(outcome.response),
                error: None,
                diagnostics: outcome.diagnostics,
            }
        }
        Err(e) => {
            let elapsed = round_micros(start.elapsed().as_secs_f64());
            let diagnostics = Diagnostics { repl_uuid: worker.id().to_string(), cpu_max: 0.0, memory_max: 0 };
            pool.destroy(worker).await;
            SnippetResponse { custom_id, time: elapsed, response: None, error: Some(e.user_message()), diagnostics: Some(diagnostics) }
        }
    };

    Ok(response)
}

/// Rounds an elapsed-seconds value to microsecond precision, matching the
/// envelope's documented `round(elapsed, 6)` (§6 of SPEC_FULL.md).
fn round_micros(secs: f64) -> f64 {
    (secs * 1_000_000.0).round() / 1_000_000.0
}

/// An interpreter response whose `messages` contain a severity-`error` entry,
/// or whose top-level `error` field is non-empty, makes the worker unusable
/// for this header (§9: warnings alone do not).
fn has_fatal_error(response: &serde_json::Value) -> bool {
    if response.get("error").and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty()) {
        return true;
    }
    response
        .get("messages")
        .and_then(|m| m.as_array())
        .is_some_and(|msgs| msgs.iter().any(|m| m.get("severity").and_then(|s| s.as_str()) == Some("error")))
}

/// Runs a batch concurrently; results come back in the same order as `requests`.
/// Concurrency is bounded implicitly by the pool: once `max_repls` snippets are
/// in flight the rest block inside `acquire`. `join_all` polls every snippet's
/// future within the calling task and preserves input order on its own, so no
/// index bookkeeping is needed here.
///
/// `NoAvailable` is the only error propagated out of a snippet run (§7); if any
/// snippet in the batch hits it, the whole batch is reported as capacity
/// pressure rather than partially-succeeded (workers already acquired by
/// sibling snippets are still released/destroyed normally as their tasks finish).
pub async fn run_batch(pool: Arc<Pool>, requests: Vec<SnippetRequest>) -> Result<Vec<SnippetResponse>, ReplPoolError> {
    let futures = requests.into_iter().enumerate().map(|(idx, req)| {
        let pool = pool.clone();
        async move {
            let custom_id = req.custom_id.clone().unwrap_or_else(|| idx.to_string());
            run_snippet(&pool, req, custom_id).await
        }
    });

    join_all(futures).await.into_iter().collect()
}

/// Drives the startup warm-start plan: for each `(header, count)`, acquires
/// `count` workers with that header and primes them (start + header send),
/// then releases them back to `free`. Concurrent across plan entries.
pub async fn warm_start(pool: Arc<Pool>, init_map: &HashMap<String, usize>) {
    let mut set = JoinSet::new();

    for (header, count) in init_map {
        for _ in 0..*count {
            let header = header.clone();
            let pool = pool.clone();
            set.spawn(async move { prime_one(&pool, &header).await });
        }
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            tracing::warn!("warm-start priming task panicked: {e}");
        }
    }
}

async fn prime_one(pool: &Pool, header: &str) {
    let mut worker = match pool.acquire(header).await {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(header_bytes = header.len(), error = %e, "warm start: failed to acquire worker");
            return;
        }
    };

    if let Err(e) = worker.start(pool.interpreter_path(), pool.interpreter_cwd()).await {
        tracing::warn!(error = %e, "warm start: failed to spawn worker");
        pool.destroy(worker).await;
        return;
    }

    if !header.trim().is_empty() {
        let timeout = Duration::from_secs(60);
        if let Err(e) = worker.send_with_timeout(header, false, true, timeout).await {
            tracing::warn!(error = %e, "warm start: header send failed");
            pool.destroy(worker).await;
            return;
        }
    }

    pool.release(worker).await;
}
