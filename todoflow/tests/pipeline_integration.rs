//! End-to-end pipeline runs over the in-memory transport.

use async_trait::async_trait;
use futures::stream::BoxStream;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use todoflow::prelude::*;

fn action(user: &str, todo: &str, op: &str) -> String {
    format!(r#"{{"user":"{user}","todoId":"{todo}","op":"{op}","text":"todo text"}}"#)
}

fn config(scale: usize, checkpointing: Option<CheckpointPolicy>) -> PipelineConfig {
    PipelineConfig {
        topics: vec![
            TopicEntry::new("action", TopicKind::Source, "todo-actions")
                .with_property("bootstrap.servers", "mem:local"),
            TopicEntry::new("reaction", TopicKind::Sink, "todo-reactions")
                .with_property("bootstrap.servers", "mem:local"),
            TopicEntry::new("txlog", TopicKind::Sink, "todo-txlog")
                .with_property("bootstrap.servers", "mem:local"),
        ],
        checkpointing,
        scale,
    }
}

fn fast_policy(externalization: bool) -> CheckpointPolicy {
    CheckpointPolicy {
        enabled: true,
        mode: CheckpointMode::ExactlyOnce,
        timeout_ms: 5_000,
        interval_ms: 20,
        pause_ms: 5,
        concurrent: 2,
        externalization,
    }
}

#[tokio::test]
async fn drains_bounded_input_end_to_end() {
    let transport = Arc::new(MemoryTransport::new());
    transport.seed(
        "todo-actions",
        [
            action("alice", "t-1", "ADD"),
            "not an action at all".to_string(),
            action("bob", "t-2", "ADD"),
            action("alice", "t-1", "COMPLETE"),
            r#"{"user":"carol"}"#.to_string(),
            action("bob", "t-2", "REMOVE"),
        ],
    );
    transport.seal("todo-actions");

    let mut runner = Runner::new(Arc::clone(&transport) as Arc<dyn LogTransport>);
    runner.configure(config(3, None)).unwrap();
    runner.assemble().unwrap();

    let outcome = runner.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Drained);

    // Four valid actions, four reactions, four txlog entries. The noise
    // records never make it past the filter.
    let reactions: Vec<Reaction> = transport
        .records("todo-reactions")
        .iter()
        .map(|r| serde_json::from_str(&r.value).unwrap())
        .collect();
    assert_eq!(reactions.len(), 4);
    assert!(reactions
        .iter()
        .any(|r| r.todo_id == "t-1" && r.status == TodoStatus::Done));
    assert!(reactions
        .iter()
        .any(|r| r.todo_id == "t-2" && r.status == TodoStatus::Removed));

    assert_eq!(transport.records("todo-txlog").len(), 4);
}

#[tokio::test]
async fn side_channel_routes_only_to_txlog() {
    let transport = Arc::new(MemoryTransport::new());
    transport.seed("todo-actions", [action("alice", "t-1", "ADD")]);
    transport.seal("todo-actions");

    let mut runner = Runner::new(Arc::clone(&transport) as Arc<dyn LogTransport>);
    runner.configure(config(1, None)).unwrap();
    runner.assemble().unwrap();
    runner.run().await.unwrap();

    // Every txlog record parses as a transaction-log entry and is routed
    // by its transaction id, not the payload's natural key.
    let txlog = transport.records("todo-txlog");
    assert_eq!(txlog.len(), 1);
    let entry: TxLogEntry = serde_json::from_str(&txlog[0].value).unwrap();
    assert_eq!(txlog[0].key.as_deref(), Some(entry.tx_id.as_str()));

    // The main sink carries reactions only, published unkeyed.
    let reactions = transport.records("todo-reactions");
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].key, None);
    assert!(serde_json::from_str::<Reaction>(&reactions[0].value).is_ok());
}

#[tokio::test]
async fn checkpoints_are_taken_periodically() {
    let transport = Arc::new(MemoryTransport::new());
    let store = Arc::new(InMemoryCheckpointStore::new());
    transport.seed(
        "todo-actions",
        [
            action("alice", "t-1", "ADD"),
            action("bob", "t-2", "ADD"),
            action("alice", "t-1", "COMPLETE"),
        ],
    );

    let mut runner = Runner::with_store(
        Arc::clone(&transport) as Arc<dyn LogTransport>,
        Arc::clone(&store) as Arc<dyn CheckpointStore>,
    );
    runner.configure(config(2, Some(fast_policy(true)))).unwrap();
    runner.assemble().unwrap();

    let handle = tokio::spawn(async move { runner.run().await });

    // Input stays open, so the pipeline idles while the coordinator
    // keeps checkpointing on its interval.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(store.completed_count() >= 1);

    let checkpoint = store.latest().unwrap();
    assert_eq!(checkpoint.source_offset, 3);
    assert_eq!(checkpoint.mode, CheckpointMode::ExactlyOnce);
    assert!(checkpoint.stage_state("todo").is_some());

    transport.seal("todo-actions");
    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Drained);
}

#[tokio::test]
async fn restore_skips_already_covered_input() {
    let transport = Arc::new(MemoryTransport::new());
    transport.seed(
        "todo-actions",
        [
            action("alice", "t-1", "ADD"),
            action("alice", "t-2", "ADD"),
            action("bob", "t-3", "ADD"),
            action("bob", "t-3", "COMPLETE"),
        ],
    );
    transport.seal("todo-actions");

    let mut runner = Runner::new(Arc::clone(&transport) as Arc<dyn LogTransport>);
    runner.configure(config(1, None)).unwrap();
    runner.assemble().unwrap();
    runner.run().await.unwrap();
    assert_eq!(transport.records("todo-reactions").len(), 4);

    // A second process resuming from a checkpoint covering the first two
    // records reprocesses only the tail.
    let replay = Arc::new(MemoryTransport::new());
    replay.seed(
        "todo-actions",
        [
            action("alice", "t-1", "ADD"),
            action("alice", "t-2", "ADD"),
            action("bob", "t-3", "ADD"),
            action("bob", "t-3", "COMPLETE"),
        ],
    );
    replay.seal("todo-actions");

    let store = Arc::new(InMemoryCheckpointStore::new());
    store.save(Checkpoint {
        id: 7,
        created_at: chrono::Utc::now(),
        mode: CheckpointMode::AtLeastOnce,
        source_offset: 2,
        stage_states: HashMap::new(),
    });

    let mut resumed = Runner::with_store(
        Arc::clone(&replay) as Arc<dyn LogTransport>,
        store as Arc<dyn CheckpointStore>,
    );
    resumed.configure(config(1, None)).unwrap();
    resumed.assemble().unwrap();
    resumed.run().await.unwrap();

    let reactions: Vec<Reaction> = replay
        .records("todo-reactions")
        .iter()
        .map(|r| serde_json::from_str(&r.value).unwrap())
        .collect();
    assert_eq!(reactions.len(), 2);
    assert!(reactions.iter().all(|r| r.todo_id == "t-3"));
}

#[tokio::test]
async fn cancellation_retains_checkpoints_when_externalized() {
    let transport = Arc::new(MemoryTransport::new());
    let store = Arc::new(InMemoryCheckpointStore::new());
    transport.seed("todo-actions", [action("alice", "t-1", "ADD")]);

    let mut runner = Runner::with_store(
        Arc::clone(&transport) as Arc<dyn LogTransport>,
        Arc::clone(&store) as Arc<dyn CheckpointStore>,
    );
    runner.configure(config(1, Some(fast_policy(true)))).unwrap();
    runner.assemble().unwrap();
    let cancellation = runner.cancellation();

    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.completed_count() >= 1);

    cancellation.cancel("operator stop");
    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);

    // Externalized snapshots survive the cancellation.
    assert!(store.latest().is_some());
}

#[tokio::test]
async fn cancellation_discards_checkpoints_by_default() {
    let transport = Arc::new(MemoryTransport::new());
    let store = Arc::new(InMemoryCheckpointStore::new());
    transport.seed("todo-actions", [action("alice", "t-1", "ADD")]);

    let mut runner = Runner::with_store(
        Arc::clone(&transport) as Arc<dyn LogTransport>,
        Arc::clone(&store) as Arc<dyn CheckpointStore>,
    );
    runner
        .configure(config(1, Some(fast_policy(false))))
        .unwrap();
    runner.assemble().unwrap();
    let cancellation = runner.cancellation();

    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    cancellation.cancel("operator stop");
    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);

    assert!(store.latest().is_none());
}

#[tokio::test]
async fn exactly_once_sink_commits_only_on_drain_or_checkpoint() {
    let transport = Arc::new(MemoryTransport::new());
    transport.seed("todo-actions", [action("alice", "t-1", "ADD")]);

    let mut topics = config(1, None);
    topics.topics[1].semantic = Some("EXACTLY_ONCE".to_string());

    let mut runner = Runner::new(Arc::clone(&transport) as Arc<dyn LogTransport>);
    runner.configure(topics).unwrap();
    runner.assemble().unwrap();

    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Without a completed checkpoint the transactional sink holds its
    // records back, while the at-least-once txlog publishes eagerly.
    assert_eq!(transport.records("todo-reactions").len(), 0);
    assert_eq!(transport.records("todo-txlog").len(), 1);

    transport.seal("todo-actions");
    handle.await.unwrap().unwrap();

    // Graceful drain commits the outstanding transaction.
    assert_eq!(transport.records("todo-reactions").len(), 1);
}

/// A transport whose broker is permanently unreachable.
#[derive(Debug)]
struct UnreachableTransport;

#[async_trait]
impl LogTransport for UnreachableTransport {
    async fn subscribe(
        &self,
        topic: &str,
        _properties: &HashMap<String, String>,
        _from_offset: u64,
    ) -> Result<BoxStream<'static, LogRecord>, TransportError> {
        Err(TransportError::Subscribe {
            topic: topic.to_string(),
            reason: "broker unreachable".to_string(),
        })
    }

    async fn publisher(
        &self,
        topic: &str,
        _properties: &HashMap<String, String>,
    ) -> Result<Box<dyn LogPublisher>, TransportError> {
        Err(TransportError::Publish {
            topic: topic.to_string(),
            reason: "broker unreachable".to_string(),
        })
    }
}

#[tokio::test]
async fn persistent_transport_failure_exhausts_restart_budget() {
    let mut runner = Runner::new(Arc::new(UnreachableTransport));
    runner.configure(config(1, None)).unwrap();
    runner.assemble().unwrap();

    let err = runner.run().await.unwrap_err();
    assert!(matches!(err, TodoflowError::Unrecoverable { .. }));
    assert_eq!(runner.state(), RunnerState::Failed);
}
