//! End-to-end snippet scenarios, driven against `fake-lean-repl` (see
//! `src/bin/fake_lean_repl.rs`), mirroring the literal scenarios in
//! SPEC_FULL.md §8.

use std::path::PathBuf;
use std::sync::Arc;

use lean_repl_host::orchestrator::{self, SnippetRequest};
use lean_repl_host::pool::Pool;

fn fake_repl_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fake-lean-repl"))
}

fn test_pool(max_repls: usize, max_uses: u32) -> Pool {
    Pool::new(max_repls, max_uses, 512, fake_repl_path(), std::env::temp_dir())
}

fn req(code: &str, debug: bool) -> SnippetRequest {
    SnippetRequest { custom_id: None, code: code.to_string(), timeout: Some(5.0), debug }
}

#[tokio::test]
async fn trivial_check_reports_env_zero_and_the_canonical_message() {
    let pool = test_pool(1, 5);
    let resp = orchestrator::run_snippet(&pool, req("#check Nat", false), "1".to_string()).await.unwrap();

    let response = resp.response.expect("a successful response");
    assert_eq!(response["env"], 0);
    assert_eq!(response["messages"][0]["severity"], "info");
    assert_eq!(response["messages"][0]["data"], "Nat : Type");
}

#[tokio::test]
async fn header_environment_is_reused_across_sends_on_the_same_worker() {
    let pool = test_pool(1, 3);

    let first = orchestrator::run_snippet(&pool, req("import Mathlib\ndef f := 1", true), "1".to_string())
        .await
        .unwrap();
    let first_response = first.response.expect("success");
    assert_eq!(first_response["env"], 1); // env 0 was the header send
    let worker_id = first.diagnostics.expect("debug diagnostics").repl_uuid;

    let second = orchestrator::run_snippet(&pool, req("import Mathlib\ndef f := 2", true), "2".to_string())
        .await
        .unwrap();
    let second_response = second.response.expect("success");
    assert_eq!(second_response["env"], 2);
    assert_eq!(second.diagnostics.expect("debug diagnostics").repl_uuid, worker_id);
}

#[tokio::test]
async fn a_timed_out_send_destroys_the_worker_and_the_next_send_gets_a_new_one() {
    let pool = test_pool(2, 5);

    let mut timeout_req = req("SLEEP:2", true);
    timeout_req.timeout = Some(0.2);
    let timed_out = orchestrator::run_snippet(&pool, timeout_req, "1".to_string()).await.unwrap();
    assert!(timed_out.error.expect("timeout error").contains("timed out"));
    let timed_out_id = timed_out.diagnostics.expect("debug diagnostics").repl_uuid;

    let ok = orchestrator::run_snippet(&pool, req("#check Nat", true), "2".to_string()).await.unwrap();
    assert!(ok.error.is_none());
    assert_ne!(ok.diagnostics.expect("debug diagnostics").repl_uuid, timed_out_id);
}

#[tokio::test]
async fn a_timeout_during_header_priming_carries_the_repl_uuid_even_without_debug() {
    // "import SLEEP:2" is entirely header (no newline, so `split` never reaches a
    // body line), so the timeout fires on the header prime send rather than the
    // body send, matching spec scenario 3 (`{code: "import Mathlib", timeout: 1}`).
    let pool = test_pool(1, 5);

    let mut timeout_req = req("import SLEEP:2", false);
    timeout_req.timeout = Some(0.2);
    let timed_out = orchestrator::run_snippet(&pool, timeout_req, "1".to_string()).await.unwrap();

    assert!(timed_out.error.expect("timeout error").contains("timed out"));
    assert!(!timed_out.diagnostics.expect("repl_uuid set even without debug").repl_uuid.is_empty());
}

#[tokio::test]
async fn a_worker_is_retired_once_it_reaches_its_use_quota() {
    let pool = test_pool(1, 3);
    let mut ids = Vec::new();
    for i in 0..4 {
        let resp = orchestrator::run_snippet(&pool, req("#check Nat", true), i.to_string()).await.unwrap();
        ids.push(resp.diagnostics.expect("debug diagnostics").repl_uuid);
    }

    assert_eq!(ids[0], ids[1]);
    assert_eq!(ids[1], ids[2]);
    assert_ne!(ids[2], ids[3]);
}

#[tokio::test]
async fn a_header_that_fails_to_evaluate_is_returned_verbatim_without_running_the_body() {
    let pool = test_pool(1, 5);
    let resp = orchestrator::run_snippet(&pool, req("import FAIL_IMPORT\ndef f := 1", false), "1".to_string())
        .await
        .unwrap();

    assert!(resp.error.is_none());
    let response = resp.response.expect("the header response is returned as the outcome");
    assert_eq!(response["error"], "import failed");

    let snap = pool.snapshot().await;
    assert_eq!(snap.free + snap.busy, 0, "the worker that failed to load the header is destroyed");
}

#[tokio::test]
async fn a_batch_returns_results_in_request_order_regardless_of_completion_order() {
    let pool = Arc::new(test_pool(3, 5));
    let requests = vec![
        SnippetRequest { custom_id: Some("A".to_string()), code: "SLEEP:0.3".to_string(), timeout: Some(5.0), debug: false },
        SnippetRequest { custom_id: Some("B".to_string()), code: "#check Nat".to_string(), timeout: Some(5.0), debug: false },
        SnippetRequest { custom_id: Some("C".to_string()), code: "SLEEP:0.1".to_string(), timeout: Some(5.0), debug: false },
    ];

    let results = orchestrator::run_batch(pool, requests).await.unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.custom_id.clone()).collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn stderr_output_fails_the_send_even_with_a_well_formed_response() {
    let pool = test_pool(1, 5);
    let resp = orchestrator::run_snippet(&pool, req("STDERR:panic in kernel", false), "1".to_string()).await.unwrap();

    assert!(resp.response.is_none());
    assert_eq!(resp.error.as_deref(), Some("panic in kernel"));
}

#[tokio::test]
async fn warm_start_primes_workers_for_the_configured_headers() {
    let pool = Arc::new(test_pool(2, 5));
    let mut init_map = std::collections::HashMap::new();
    init_map.insert("import Mathlib\n".to_string(), 1usize);

    orchestrator::warm_start(pool.clone(), &init_map).await;

    let snap = pool.snapshot().await;
    assert_eq!(snap.free, 1);

    // The primed worker already has env 0 from the header; its first
    // real body send reuses it and lands on env 1.
    let resp = orchestrator::run_snippet(&pool, req("import Mathlib\ndef f := 1", false), "1".to_string())
        .await
        .unwrap();
    assert_eq!(resp.response.unwrap()["env"], 1);
}
