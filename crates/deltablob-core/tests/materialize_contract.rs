//! End-to-end contract tests for `Materializer::materialize`.
//!
//! Every test drives real cycles through in-memory collaborators and checks
//! the externally visible allocator calls.

use std::sync::Arc;
use std::time::Duration;

use deltablob_core::{
    JsonDeltaPatcher, MaterializeError, Materializer, MaterializerConfig, PatcherFactory,
    ProtocolMode, PublishOutcome,
};
use deltablob_state::fakes::{
    RecordingAllocator, ScriptedPatcher, ScriptedResponse, ScriptedTransport,
};
use serde_json::json;

const URL: &str = "http://x/y";

type Harness<F> = (
    Arc<ScriptedTransport>,
    Arc<RecordingAllocator>,
    Materializer<F, Arc<ScriptedTransport>, Arc<RecordingAllocator>>,
);

fn harness<F: PatcherFactory>(factory: F, transport: ScriptedTransport) -> Harness<F> {
    let transport = Arc::new(transport);
    let allocator = Arc::new(RecordingAllocator::new());
    let materializer = Materializer::new(
        factory,
        Arc::clone(&transport),
        Arc::clone(&allocator),
        &MaterializerConfig::default().with_media_type("application/javascript"),
    );
    (transport, allocator, materializer)
}

fn scripted(mode: ProtocolMode) -> impl PatcherFactory<Patcher = ScriptedPatcher> {
    move |_: &str| ScriptedPatcher::new(mode)
}

fn update(marker: &str, segments: &[&str], files_changed: usize) -> ScriptedResponse {
    ScriptedResponse::json(json!({
        "marker": marker,
        "segments": segments,
        "files_changed": files_changed,
    }))
}

// ===========================================================================
// Handle reuse and replacement
// ===========================================================================

#[tokio::test]
async fn unchanged_artifact_reuses_handle() {
    let (transport, allocator, materializer) =
        harness(scripted(ProtocolMode::Legacy), ScriptedTransport::new());
    transport.push(URL, update("1", &["a"], 1));
    transport.push(URL, update("1", &["a"], 0));
    transport.push(URL, update("1", &["a"], 0));

    let first = materializer.materialize(URL).await.unwrap();
    let second = materializer.materialize(URL).await.unwrap();
    let third = materializer.materialize(URL).await.unwrap();

    assert_eq!(first.url, second.url);
    assert_eq!(second.url, third.url);
    assert!(second.reused());
    assert_eq!(allocator.create_count(), 1);
    assert_eq!(allocator.revoke_count(), 0);
}

#[tokio::test]
async fn changed_artifact_replaces_handle() {
    let (transport, allocator, materializer) =
        harness(scripted(ProtocolMode::Legacy), ScriptedTransport::new());
    transport.push(URL, update("1", &["a"], 1));
    transport.push(URL, update("2", &["a", "b"], 1));

    let first = materializer.materialize(URL).await.unwrap();
    let second = materializer.materialize(URL).await.unwrap();

    assert_ne!(first.url, second.url);
    assert_eq!(second.outcome, PublishOutcome::Replaced);
    assert_eq!(allocator.create_count(), 2);
    assert_eq!(allocator.revoked(), vec![first.url]);
    assert_eq!(allocator.content(&second.url).unwrap(), b"a\nb\n");
    assert_eq!(second.artifact_size, 2);
}

// ===========================================================================
// Failures leave no trace
// ===========================================================================

#[tokio::test]
async fn fetch_failure_touches_nothing() {
    let (transport, allocator, materializer) =
        harness(scripted(ProtocolMode::Legacy), ScriptedTransport::new());
    transport.push(URL, update("1", &["a"], 1));
    transport.push(URL, ScriptedResponse::Status(500));
    transport.push(URL, update("1", &["a"], 0));

    let first = materializer.materialize(URL).await.unwrap();

    let err = materializer.materialize(URL).await.unwrap_err();
    assert!(matches!(err, MaterializeError::Transport(_)));
    assert_eq!(allocator.create_count(), 1);
    assert_eq!(allocator.revoke_count(), 0);
    assert_eq!(materializer.cache().current(URL), Some(first.url.clone()));

    let third = materializer.materialize(URL).await.unwrap();
    assert_eq!(third.url, first.url);
    assert_eq!(allocator.create_count(), 1);

    let requests = transport.requests();
    assert_eq!(requests[1], "http://x/y?deltaBundleId=1");
    assert_eq!(requests[2], "http://x/y?deltaBundleId=1");
}

#[tokio::test]
async fn first_fetch_failure_creates_nothing() {
    let (transport, allocator, materializer) =
        harness(scripted(ProtocolMode::Legacy), ScriptedTransport::new());
    transport.push(URL, ScriptedResponse::NetworkDown);

    let err = materializer.materialize(URL).await.unwrap_err();

    assert!(err.is_transport());
    assert_eq!(allocator.create_count(), 0);
    assert!(materializer.cache().is_empty());
    assert_eq!(materializer.metrics().snapshot().failures, 1);
}

#[tokio::test]
async fn undecodable_body_is_a_decoding_error() {
    let (transport, allocator, materializer) =
        harness(|_: &str| JsonDeltaPatcher::new(), ScriptedTransport::new());
    transport.push(
        URL,
        ScriptedResponse::json(json!({"id": "1", "delta": [[1, "one"]]})),
    );
    transport.push(URL, ScriptedResponse::Body(b"<html>oops</html>".to_vec()));
    transport.push(
        URL,
        ScriptedResponse::json(json!({"revisionId": "r1", "base": true, "modules": []})),
    );

    let first = materializer.materialize(URL).await.unwrap();

    let err = materializer.materialize(URL).await.unwrap_err();
    assert!(matches!(err, MaterializeError::Decoding(_)));

    let err = materializer.materialize(URL).await.unwrap_err();
    assert!(matches!(err, MaterializeError::Decoding(_)));

    assert_eq!(allocator.create_count(), 1);
    assert_eq!(materializer.cache().current(URL), Some(first.url));
}

// ===========================================================================
// Query suffixes against a real patcher
// ===========================================================================

#[tokio::test]
async fn legacy_lineage_queries_with_delta_bundle_id() {
    let identifier = "http://x/y?platform=ios";
    let (transport, _allocator, materializer) =
        harness(|_: &str| JsonDeltaPatcher::new(), ScriptedTransport::new());
    transport.push(
        identifier,
        ScriptedResponse::json(json!({"id": "7", "delta": [[1, "one"]]})),
    );
    transport.push(
        identifier,
        ScriptedResponse::json(json!({"id": "8", "delta": []})),
    );

    materializer.materialize(identifier).await.unwrap();
    materializer.materialize(identifier).await.unwrap();

    assert_eq!(
        transport.requests(),
        vec![
            identifier.to_string(),
            "http://x/y?platform=ios&deltaBundleId=7".to_string(),
        ]
    );
}

#[tokio::test]
async fn revision_lineage_queries_with_revision_id() {
    let (transport, allocator, materializer) =
        harness(|_: &str| JsonDeltaPatcher::new(), ScriptedTransport::new());
    transport.push(
        URL,
        ScriptedResponse::json(json!({
            "revisionId": "r1",
            "base": true,
            "pre": "pre",
            "post": "post",
            "modules": [[1, "one"]]
        })),
    );
    transport.push(
        URL,
        ScriptedResponse::json(json!({
            "revisionId": "r2",
            "base": false,
            "modified": [[1, "uno"]]
        })),
    );

    materializer.materialize(URL).await.unwrap();
    let second = materializer.materialize(URL).await.unwrap();

    assert_eq!(transport.requests()[1], "http://x/y?revisionId=r1");
    assert_eq!(allocator.content(&second.url).unwrap(), b"pre\nuno\npost\n");
    assert_eq!(second.artifact_size, 10);
}

// ===========================================================================
// Isolation and serialization
// ===========================================================================

#[tokio::test]
async fn identifiers_are_isolated() {
    let (transport, allocator, materializer) =
        harness(scripted(ProtocolMode::RevisionBased), ScriptedTransport::new());
    transport.push("http://x/a", update("a1", &["a"], 1));
    transport.push("http://x/b", update("b1", &["b"], 1));
    transport.push("http://x/a", update("a2", &["A"], 1));

    let a1 = materializer.materialize("http://x/a").await.unwrap();
    let b1 = materializer.materialize("http://x/b").await.unwrap();
    let a2 = materializer.materialize("http://x/a").await.unwrap();

    assert_eq!(allocator.revoked(), vec![a1.url]);
    assert_eq!(materializer.cache().current("http://x/b"), Some(b1.url.clone()));
    assert_eq!(allocator.content(&b1.url).unwrap(), b"b\n");
    assert_eq!(allocator.content(&a2.url).unwrap(), b"A\n");
    assert_eq!(materializer.registry().len(), 2);
    assert_eq!(transport.requests()[2], "http://x/a?revisionId=a1");
}

#[tokio::test(start_paused = true)]
async fn same_identifier_cycles_do_not_overlap() {
    let (transport, allocator, materializer) = harness(
        scripted(ProtocolMode::Legacy),
        ScriptedTransport::with_delay(Duration::from_millis(50)),
    );
    transport.push(URL, update("1", &["a"], 1));
    transport.push(URL, update("2", &["b"], 1));
    transport.push(URL, update("3", &["c"], 1));

    let results = materializer.materialize_all(&[URL, URL, URL]).await;
    let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();

    assert_eq!(transport.max_in_flight(), 1);
    assert_eq!(
        transport.requests(),
        vec![
            URL.to_string(),
            format!("{URL}?deltaBundleId=1"),
            format!("{URL}?deltaBundleId=2"),
        ]
    );
    assert_eq!(allocator.revoke_count(), 2);
    assert_eq!(allocator.live_count(), 1);
    assert_eq!(materializer.cache().current(URL), Some(results[2].url.clone()));
}

#[tokio::test(start_paused = true)]
async fn different_identifiers_run_independently() {
    let (transport, allocator, materializer) = harness(
        scripted(ProtocolMode::Legacy),
        ScriptedTransport::with_delay(Duration::from_millis(50)),
    );
    transport.push("http://x/a", update("1", &["a"], 1));
    transport.push("http://x/b", update("1", &["b"], 1));
    transport.push("http://x/c", ScriptedResponse::Status(404));

    let results = materializer
        .materialize_all(&["http://x/a", "http://x/b", "http://x/c"])
        .await;

    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(results[2].is_err());
    assert_eq!(allocator.create_count(), 2);
    assert_eq!(materializer.metrics().snapshot().cycles, 3);
}
