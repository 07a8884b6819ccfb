//! End-to-end scenarios against the full route table (§8 of the specification)
//!
//! Unlike the inline `#[cfg(test)]` modules next to each component, these
//! drive a complete [`relaymesh::server::AppState`] through its axum
//! `Router` the way a real Desktop agent and Mobile App client would: two
//! concurrent HTTP calls racing through the same in-memory tables.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt as _;
use relaymesh::config::Config;
use relaymesh::directory::InstanceDirectory;
use relaymesh::domain_types::RequestIdGenerator;
use relaymesh::registry::Registry;
use relaymesh::server::{build_router, AppState};
use relaymesh::time_provider::production_time_provider;
use std::sync::Arc;
use tower::ServiceExt as _;

/// Uses the real time provider (rather than the accelerated mock) so that
/// `timeout_agent`/`timeout_client` races here are resolved by pairing, not
/// by a shortened synthetic sleep firing before the other side has a chance
/// to arrive.
async fn test_state() -> Arc<AppState> {
    let config = Config::development();
    Arc::new(AppState {
        directory: InstanceDirectory::new(config.clone()).await.unwrap(),
        registry: Registry::default(),
        request_ids: RequestIdGenerator::new(),
        time: production_time_provider(),
        config,
    })
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

/// S1 happy path: an agent and a client pair up, the client's body streams
/// to the agent, and the agent's later `agentreply` streams back to the client.
#[tokio::test]
async fn s1_happy_path_round_trips_a_request_and_a_reply() {
    let state = test_state().await;
    let router = build_router(state);

    let agent_router = router.clone();
    let agent_task = tokio::spawn(async move {
        let response = agent_router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agent/desktop-1")
                    .header("X-IWP-ProductUnivId", "1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let request_id = response
            .headers()
            .get("x-iwp-requestid")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body = body_bytes(response).await;
        (request_id, body)
    });

    // Give the agent a head start so it is the one parked in the waiting queue;
    // a real short sleep (rather than a single yield) tolerates executor scheduling
    // variance under `cargo test`'s multi-threaded runtime.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // The client's own call doesn't resolve until `agentreply` answers it
    // (leg 2), so it has to run concurrently with the rest of this test
    // rather than being awaited inline.
    let client_router = router.clone();
    let client_task = tokio::spawn(async move {
        client_router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/client/app-1")
                    .header("X-IWP-ProductUnivId", "1")
                    .header("Content-Length", "10")
                    .body(Body::from("abcdefghij"))
                    .unwrap(),
            )
            .await
            .unwrap()
    });

    let (request_id, agent_body) = agent_task.await.unwrap();
    assert_eq!(agent_body, b"abcdefghij");

    let agentreply_response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/agentreply/desktop-1")
                .header("X-IWP-ProductUnivId", "1")
                .header("X-IWP-RequestId", request_id)
                .header("Content-Length", "4")
                .body(Body::from("done"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(agentreply_response.status(), StatusCode::OK);

    let client_response = client_task.await.unwrap();
    assert_eq!(client_response.status(), StatusCode::OK);
    let client_body = body_bytes(client_response).await;
    assert_eq!(client_body, b"done");
}

/// S2 no agent: a client asks the cluster entry point for a ProductID nobody
/// owns and gets `X-IWP-ResponseType: 0` with an empty body.
#[tokio::test]
async fn s2_client_with_no_known_owner_gets_no_agent_response() {
    let state = test_state().await;
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/client")
                .header("X-IWP-ProductUnivId", "2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-iwp-responsetype").unwrap(), "0");
    assert!(body_bytes(response).await.is_empty());
}

/// S5 range carve from master: a fresh `/range` request against a master
/// holding `[1000, 1999]` returns the first 100 IDs and advances the file.
#[tokio::test]
async fn s5_range_carve_from_master_advances_the_pool() {
    let mut config = Config::development();
    config.master_range =
        std::env::temp_dir().join(format!("relaymesh-s5-master-{}.txt", std::process::id()));
    config.range_file =
        std::env::temp_dir().join(format!("relaymesh-s5-own-{}.txt", std::process::id()));
    std::fs::write(&config.master_range, "1000\n1999\n").unwrap();
    let _ = std::fs::remove_file(&config.range_file);
    let directory = InstanceDirectory::new(config.clone()).await.unwrap();

    let state = Arc::new(AppState {
        directory,
        registry: Registry::default(),
        request_ids: RequestIdGenerator::new(),
        time: production_time_provider(),
        config: config.clone(),
    });
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/range")
                .header("X-IWP-Range-Size", "100")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-iwp-range-from").unwrap(), "1000");
    assert_eq!(response.headers().get("x-iwp-range-to").unwrap(), "1099");

    let persisted = std::fs::read_to_string(&config.master_range).unwrap();
    assert_eq!(persisted, "1100\n1999\n");
    let _ = std::fs::remove_file(&config.master_range);
    let _ = std::fs::remove_file(&config.range_file);
}

/// Property 4 (pair-up atomicity): two clients racing for the same
/// already-waiting agent are handed off to exactly one of them. The loser
/// still parks briefly under the cache entry the winner's pop just created
/// (§4.4 step 2) before giving up — `timeout_client`/`timeout_cache` are
/// shortened here so that park-and-retry loop resolves quickly.
#[tokio::test]
async fn pair_up_hands_a_waiting_agent_to_exactly_one_client() {
    let mut config = Config::development();
    config.timeout_client = relaymesh::config::TimeoutClient::try_new(20).unwrap();
    config.timeout_cache = relaymesh::config::TimeoutCache::try_new(30).unwrap();
    // The winner's own request otherwise blocks on `timeout_no_reply` since
    // this test never issues the matching `agentreply`.
    config.timeout_no_reply = relaymesh::config::TimeoutNoReply::try_new(50).unwrap();
    let state = Arc::new(AppState {
        directory: InstanceDirectory::new(config.clone()).await.unwrap(),
        registry: Registry::default(),
        request_ids: RequestIdGenerator::new(),
        time: production_time_provider(),
        config,
    });
    let router = build_router(state);

    let agent_router = router.clone();
    let agent_task = tokio::spawn(async move {
        agent_router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agent/desktop-a")
                    .header("X-IWP-ProductUnivId", "9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    });

    // Give the agent a head start so it is the one parked in the waiting
    // queue before either client races to claim it.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let client_request = |path: &str| {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("X-IWP-ProductUnivId", "9")
            .body(Body::empty())
            .unwrap()
    };

    let (first, second) = tokio::join!(
        router.clone().oneshot(client_request("/client/app-a")),
        router.clone().oneshot(client_request("/client/app-b")),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    let paired_count = [&first, &second]
        .into_iter()
        .filter(|response| response.headers().get("x-iwp-responsetype").is_none())
        .count();
    assert_eq!(paired_count, 1, "exactly one client should have claimed the waiting agent");

    let no_agent_count = [&first, &second]
        .into_iter()
        .filter(|response| {
            response
                .headers()
                .get("x-iwp-responsetype")
                .is_some_and(|value| value.as_bytes() == b"0")
        })
        .count();
    assert_eq!(no_agent_count, 1, "the loser should get the no-agent response");

    let agent_response = agent_task.await.unwrap();
    assert_eq!(agent_response.status(), StatusCode::OK);
    assert!(agent_response.headers().get("x-iwp-responsetype").is_none());
}
