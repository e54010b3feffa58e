mod common;

use std::time::Duration;

use common::{
    DOCS, DOCS_TOOL, FakeConnector, FakeServer, RESOLVE_TOOL, Reply, WEB, docs_listing,
    registry_with, two_step_docs_descriptor, two_step_docs_server, web_and_docs, web_listing,
};
use devsearch_agent::dispatch::{Dispatcher, FailureKind, FollowUpCall, ToolCallRequest};
use devsearch_agent::mcp::{ConnectionState, LifecycleTimeouts, ToolPayload};
use tokio::time::Instant;

fn request(server: &str) -> ToolCallRequest {
    let mut args = serde_json::Map::new();
    args.insert("query".into(), "tokio select".into());
    ToolCallRequest::new(server, "search", args)
}

const LONG: Duration = Duration::from_secs(60);

#[tokio::test]
async fn results_align_with_requests() {
    let connector = FakeConnector::new();
    connector.set(WEB, FakeServer::replying(web_listing(1)).with_call_delay(Duration::from_millis(30)));
    connector.set(DOCS, FakeServer::replying(docs_listing(1)));
    let registry = web_and_docs(&connector);
    registry.connect_all().await;
    let dispatcher = Dispatcher::new(registry);

    let requests = vec![request(WEB), request("missing"), request(DOCS), request(WEB)];
    let results = dispatcher.dispatch(requests, LONG, LONG).await;

    assert_eq!(results.len(), 4);
    let servers: Vec<_> = results.iter().map(|r| r.server.as_str()).collect();
    assert_eq!(servers, [WEB, "missing", DOCS, WEB]);
    assert!(results[0].is_success());
    assert_eq!(results[1].failure_kind(), Some(FailureKind::ServerUnavailable));
    assert!(results[2].is_success());
    assert!(results[3].is_success());
    assert_eq!(connector.calls(WEB), 2);
}

#[tokio::test]
async fn empty_dispatch_returns_nothing() {
    let connector = FakeConnector::new();
    let dispatcher = Dispatcher::new(web_and_docs(&connector));
    assert!(dispatcher.dispatch(Vec::new(), LONG, LONG).await.is_empty());
}

#[tokio::test]
async fn non_ready_servers_are_never_called() {
    let connector = FakeConnector::new();
    connector.set(DOCS, FakeServer::unreachable("refused"));
    let registry = web_and_docs(&connector);
    registry.connect_all().await;
    let dispatcher = Dispatcher::new(registry);

    let results = dispatcher
        .dispatch(vec![request(WEB), request(DOCS)], LONG, LONG)
        .await;

    let docs = &results[1];
    assert_eq!(docs.failure_kind(), Some(FailureKind::ServerUnavailable));
    assert_eq!(docs.latency, Duration::ZERO);
    assert_eq!(connector.calls(DOCS), 0);
    assert_eq!(connector.calls(WEB), 1);
}

#[tokio::test(start_paused = true)]
async fn calls_run_concurrently() {
    let connector = FakeConnector::new();
    connector.set(WEB, FakeServer::replying(web_listing(2)).with_call_delay(Duration::from_millis(300)));
    connector.set(DOCS, FakeServer::replying(docs_listing(2)).with_call_delay(Duration::from_millis(500)));
    let registry = web_and_docs(&connector);
    registry.connect_all().await;
    let dispatcher = Dispatcher::new(registry);

    let started = Instant::now();
    let results = dispatcher
        .dispatch(vec![request(WEB), request(DOCS)], LONG, LONG)
        .await;
    let elapsed = started.elapsed();

    assert!(results.iter().all(|r| r.is_success()));
    assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(800), "{elapsed:?}");
    assert!(results[0].latency >= Duration::from_millis(300));
    assert!(results[0].latency < Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn slow_call_times_out_alone() {
    let connector = FakeConnector::new();
    connector.set(WEB, FakeServer::replying(web_listing(2)).with_call_delay(Duration::from_millis(200)));
    connector.set(DOCS, FakeServer::replying(docs_listing(2)).with_call_delay(Duration::from_secs(10)));
    let registry = web_and_docs(&connector);
    registry.connect_all().await;
    let dispatcher = Dispatcher::new(registry);

    let started = Instant::now();
    let results = dispatcher
        .dispatch(
            vec![request(WEB), request(DOCS)],
            Duration::from_secs(1),
            Duration::from_secs(30),
        )
        .await;

    assert!(results[0].is_success());
    assert_eq!(results[1].failure_kind(), Some(FailureKind::Timeout));
    assert!(started.elapsed() < Duration::from_secs(2));

    // The connection survives an abandoned call.
    let status = dispatcher.registry().status(DOCS).unwrap();
    assert_eq!(status.state, ConnectionState::Ready);
    assert_eq!(status.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn overall_deadline_keeps_partial_results() {
    let connector = FakeConnector::new();
    connector.set(WEB, FakeServer::replying(web_listing(1)).with_call_delay(Duration::from_millis(100)));
    connector.set(DOCS, FakeServer::replying(docs_listing(1)).with_call_delay(Duration::from_secs(20)));
    let registry = web_and_docs(&connector);
    registry.connect_all().await;
    let dispatcher = Dispatcher::new(registry);

    let started = Instant::now();
    let results = dispatcher
        .dispatch(
            vec![request(WEB), request(DOCS)],
            Duration::from_secs(10),
            Duration::from_secs(2),
        )
        .await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
    assert!(results[0].is_success());
    let docs = results[1].failure().unwrap();
    assert_eq!(docs.kind, FailureKind::Timeout);
    assert!(docs.message.contains("deadline"));
}

#[tokio::test]
async fn server_and_transport_errors_are_classified() {
    let connector = FakeConnector::new();
    connector.set(
        WEB,
        FakeServer {
            reply: Reply::ToolError("rate limited".into()),
            ..FakeServer::default()
        },
    );
    connector.set(
        DOCS,
        FakeServer {
            reply: Reply::Transport("stream reset".into()),
            ..FakeServer::default()
        },
    );
    let registry = web_and_docs(&connector);
    registry.connect_all().await;
    let dispatcher = Dispatcher::new(registry);

    let results = dispatcher
        .dispatch(vec![request(WEB), request(DOCS)], LONG, LONG)
        .await;

    let web = results[0].failure().unwrap();
    assert_eq!(web.kind, FailureKind::ToolError);
    assert_eq!(web.message, "rate limited");
    assert_eq!(results[1].failure_kind(), Some(FailureKind::ConnectionFailed));
}

#[tokio::test(start_paused = true)]
async fn calls_in_flight_are_visible() {
    let connector = FakeConnector::new();
    connector.set(WEB, FakeServer::replying(web_listing(1)).with_call_delay(Duration::from_secs(1)));
    let registry = web_and_docs(&connector);
    registry.connect(WEB).await.unwrap();
    let dispatcher = Dispatcher::new(registry);

    let running = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.dispatch(vec![request(WEB)], LONG, LONG).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let status = dispatcher.registry().status(WEB).unwrap();
    assert_eq!(status.state, ConnectionState::Calling);
    assert_eq!(status.in_flight, 1);
    assert!(dispatcher.registry().ready_servers().contains(WEB));

    let results = running.await.unwrap();
    assert!(results[0].is_success());
    assert_eq!(dispatcher.registry().status(WEB).unwrap().state, ConnectionState::Ready);
}

fn resolve_then_fetch() -> ToolCallRequest {
    let mut args = serde_json::Map::new();
    args.insert("libraryName".into(), "tokio".into());
    ToolCallRequest::new(DOCS, RESOLVE_TOOL, args).then(FollowUpCall {
        tool: DOCS_TOOL.into(),
        id_argument: "context7CompatibleLibraryID".into(),
        arguments: serde_json::Map::new(),
    })
}

#[tokio::test(start_paused = true)]
async fn follow_up_shares_the_per_call_deadline() {
    let connector = FakeConnector::new();
    connector.set(
        DOCS,
        two_step_docs_server("/tokio-rs/tokio", Reply::Payload(docs_listing(1)))
            .with_call_delay(Duration::from_millis(600)),
    );
    let registry = registry_with(
        &connector,
        vec![two_step_docs_descriptor(DOCS)],
        LifecycleTimeouts::default(),
    );
    registry.connect_all().await;
    let dispatcher = Dispatcher::new(registry);

    // Each call alone fits in a second; the pair does not.
    let results = dispatcher
        .dispatch(vec![resolve_then_fetch()], Duration::from_secs(1), LONG)
        .await;
    assert_eq!(results[0].failure_kind(), Some(FailureKind::Timeout));
    assert_eq!(connector.calls(DOCS), 2);

    let results = dispatcher
        .dispatch(vec![resolve_then_fetch()], Duration::from_secs(2), LONG)
        .await;
    assert!(results[0].is_success());
    assert!(results[0].latency >= Duration::from_millis(1200));
    assert!(results[0].outcome.as_ref().unwrap().text().contains("TITLE: Doc 1"));
}

#[tokio::test]
async fn follow_up_is_skipped_without_an_id() {
    let connector = FakeConnector::new();
    connector.set(
        DOCS,
        two_step_docs_server("/unused", Reply::Payload(docs_listing(1))).with_tool_reply(
            RESOLVE_TOOL,
            Reply::Payload(ToolPayload::from_text("No libraries found matching your query.")),
        ),
    );
    let registry = registry_with(
        &connector,
        vec![two_step_docs_descriptor(DOCS)],
        LifecycleTimeouts::default(),
    );
    registry.connect_all().await;
    let dispatcher = Dispatcher::new(registry);

    let results = dispatcher
        .dispatch(vec![resolve_then_fetch()], LONG, LONG)
        .await;

    assert!(results[0].is_success());
    assert_eq!(connector.calls_to(DOCS).len(), 1);
}
