//! HTTP surface: decodes/encodes the wire envelope around the orchestrator and
//! exposes process health. No pool logic lives here. See SPEC_FULL.md §4.5.

use std::sync::Arc;

use maker_web::{Handled, Handler, Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::ReplPoolError;
use crate::orchestrator::{self, SnippetRequest, SnippetResponse};
use crate::pool::Pool;

#[derive(Debug, Deserialize)]
struct BatchRequest {
    #[serde(default)]
    snippets: Vec<SnippetRequest>,
}

#[derive(Debug, Serialize)]
struct BatchResponse {
    results: Vec<SnippetResponse>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    free: usize,
    busy: usize,
    max_repls: usize,
    max_uses: u32,
    max_mem_mib: u64,
}

pub struct AppHandler {
    pool: Arc<Pool>,
}

impl AppHandler {
    pub fn new(pool: Arc<Pool>) -> Self {
        AppHandler { pool }
    }
}

impl Handler<()> for AppHandler {
    async fn handle(&self, _conn: &mut (), req: &Request, resp: &mut Response) -> Handled {
        match (req.method(), req.url().path()) {
            (Method::Post, b"/snippets") => self.handle_snippets(req, resp).await,
            (Method::Get, b"/health") => self.handle_health(resp).await,
            _ => resp.status(StatusCode::NotFound).body("not found"),
        }
    }
}

impl AppHandler {
    async fn handle_snippets(&self, req: &Request, resp: &mut Response) -> Handled {
        let body = req.body().unwrap_or(&[]);

        let batch: BatchRequest = match serde_json::from_slice(body) {
            Ok(b) => b,
            Err(e) => {
                return resp.status(StatusCode::BadRequest).body(format!("malformed request body: {e}"));
            }
        };

        if batch.snippets.is_empty() {
            return resp
                .status(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .body(r#"{"results":[]}"#);
        }

        match orchestrator::run_batch(self.pool.clone(), batch.snippets).await {
            Ok(results) => {
                let payload = BatchResponse { results };
                let json = serde_json::to_string(&payload).unwrap_or_else(|_| r#"{"results":[]}"#.to_string());
                resp.status(StatusCode::Ok).header("Content-Type", "application/json").body(json)
            }
            Err(ReplPoolError::NoAvailable) => {
                resp.status(StatusCode::ServiceUnavailable)
                    .header("Content-Type", "application/json")
                    .body(r#"{"error":"no available REPL: pool is at capacity"}"#)
            }
            Err(e) => resp.status(StatusCode::ServiceUnavailable).body(e.user_message()),
        }
    }

    async fn handle_health(&self, resp: &mut Response) -> Handled {
        let snapshot = self.pool.snapshot().await;
        let payload = HealthResponse {
            free: snapshot.free,
            busy: snapshot.busy,
            max_repls: snapshot.max_repls,
            max_uses: self.pool.max_uses(),
            max_mem_mib: self.pool.max_mem_mib(),
        };
        let json = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
        resp.status(StatusCode::Ok).header("Content-Type", "application/json").body(json)
    }
}
