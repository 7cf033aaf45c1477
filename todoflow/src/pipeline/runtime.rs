//! Data-parallel execution of an assembled pipeline.
//!
//! Every stage runs as a set of workers on disjoint key partitions,
//! connected by bounded channels. Checkpoint barriers flow in-band with
//! the records: the source injects a barrier on each trigger, routers
//! and publishers align barriers at merge points by counting one copy
//! per upstream worker, and each task snapshots or flushes when the
//! barrier reaches it. Record processing never waits for checkpoint
//! completion.
//!
//! Shutdown cascades through channel closure in both directions: a
//! drained source closes the chain front to back, a failed task closes
//! it from the middle out.

use super::builder::{Pipeline, RunOutcome};
use crate::cancellation::CancellationToken;
use crate::checkpoint::{Checkpoint, CheckpointCoordinator, CheckpointStore};
use crate::endpoints::PublisherEndpoint;
use crate::errors::{TodoflowError, TransportError};
use crate::stages::{KeyedStage, RecordFilter, StageEmit};
use crate::state::{partition, StateSnapshot, StateStore};
use crate::transport::{DeliveryGuarantee, LogPublisher, LogRecord};
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 256;

/// What flows through the stage channels: records, interleaved with
/// checkpoint barriers.
enum Envelope {
    Record { key: String, value: String },
    Barrier(Barrier),
}

/// A checkpoint barrier carrying the ack channel of its collector.
#[derive(Clone)]
struct Barrier {
    id: u64,
    acks: mpsc::Sender<Ack>,
}

/// One task's contribution to a checkpoint.
enum Ack {
    SourceOffset(u64),
    StageState {
        stage: String,
        snapshot: StateSnapshot,
    },
    SinkFlushed,
}

pub(super) async fn execute(
    pipeline: &Pipeline,
    restore_from: Option<&Checkpoint>,
    cancellation: Arc<CancellationToken>,
) -> Result<RunOutcome, TodoflowError> {
    let start_offset = restore_from.map_or(0, |checkpoint| checkpoint.source_offset);
    if let Some(checkpoint) = restore_from {
        info!(
            checkpoint = checkpoint.id,
            offset = start_offset,
            "restoring from checkpoint"
        );
    }

    let transport = pipeline.transport.as_ref();
    let stream = pipeline.source.open(transport, start_offset).await?;
    let main_publisher = pipeline.main_sink.open(transport).await?;
    let side_publisher = pipeline.side_sink.open(transport).await?;

    let total_workers: usize = pipeline.parallelism.iter().sum();
    let task_count = total_workers + pipeline.stages.len() + 3;
    let (failure_tx, mut failure_rx) = mpsc::channel::<TodoflowError>(task_count);
    let poisoned = Arc::new(AtomicBool::new(false));

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // Side channel into the txlog publisher, fed by every stage worker.
    let (aux_tx, aux_rx) = mpsc::channel(CHANNEL_CAPACITY);
    handles.push(tokio::spawn(run_publisher(
        pipeline.side_sink.clone(),
        side_publisher,
        aux_rx,
        total_workers,
        failure_tx.clone(),
        Arc::clone(&poisoned),
    )));

    // Main path into the reaction publisher, fed by the terminal workers.
    let terminal_parallelism = pipeline.parallelism.last().copied().unwrap_or(1);
    let (main_tx, main_rx) = mpsc::channel(CHANNEL_CAPACITY);
    handles.push(tokio::spawn(run_publisher(
        pipeline.main_sink.clone(),
        main_publisher,
        main_rx,
        terminal_parallelism,
        failure_tx.clone(),
        Arc::clone(&poisoned),
    )));

    // Wire stages back to front so each one knows its downstream channel.
    let mut downstream_tx = main_tx;
    for (idx, stage) in pipeline.stages.iter().enumerate().rev() {
        let parallelism = pipeline.parallelism[idx];
        let upstream = if idx == 0 {
            1
        } else {
            pipeline.parallelism[idx - 1]
        };

        let (router_tx, router_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut worker_txs = Vec::with_capacity(parallelism);
        for worker in 0..parallelism {
            let (worker_tx, worker_rx) = mpsc::channel(CHANNEL_CAPACITY);
            worker_txs.push(worker_tx);

            let mut state = StateStore::new();
            if let Some(snapshot) =
                restore_from.and_then(|checkpoint| checkpoint.stage_state(stage.name()))
            {
                state.restore(snapshot, worker, parallelism);
            }

            handles.push(tokio::spawn(run_worker(
                Arc::clone(stage),
                worker_rx,
                downstream_tx.clone(),
                aux_tx.clone(),
                state,
                failure_tx.clone(),
                Arc::clone(&poisoned),
            )));
        }
        handles.push(tokio::spawn(run_router(
            Arc::clone(stage),
            router_rx,
            worker_txs,
            upstream,
        )));
        downstream_tx = router_tx;
    }
    drop(aux_tx);

    // Checkpoint triggers flow to the source task; without a coordinator
    // the trigger channel closes immediately and nothing is scheduled.
    let (trigger_tx, trigger_rx) = mpsc::channel(4);
    let coordinator_handle = match (pipeline.coordinator, pipeline.store.clone()) {
        (Some(coordinator), Some(store)) => {
            let expected_acks = 1 + total_workers + 2;
            let first_id = restore_from.map_or(0, |checkpoint| checkpoint.id);
            Some(tokio::spawn(run_coordinator(
                coordinator,
                store,
                trigger_tx,
                expected_acks,
                first_id,
            )))
        }
        _ => {
            drop(trigger_tx);
            None
        }
    };

    handles.push(tokio::spawn(run_source(
        stream,
        Arc::clone(&pipeline.filter),
        downstream_tx,
        trigger_rx,
        start_offset,
        Arc::clone(&cancellation),
    )));
    drop(failure_tx);

    for handle in handles {
        let _ = handle.await;
    }
    if let Some(handle) = coordinator_handle {
        handle.abort();
        let _ = handle.await;
    }

    if let Some(error) = failure_rx.recv().await {
        return Err(error);
    }

    if cancellation.is_cancelled() {
        Ok(RunOutcome::Cancelled)
    } else {
        Ok(RunOutcome::Drained)
    }
}

/// Reads the action source, applies the ingest filter and injects
/// checkpoint barriers on trigger.
async fn run_source(
    mut stream: BoxStream<'static, LogRecord>,
    filter: Arc<dyn RecordFilter>,
    out: mpsc::Sender<Envelope>,
    mut triggers: mpsc::Receiver<Barrier>,
    start_offset: u64,
    cancellation: Arc<CancellationToken>,
) {
    let mut next_offset = start_offset;
    let mut triggers_open = true;
    loop {
        tokio::select! {
            biased;
            () = cancellation.cancelled() => {
                info!("source stopping on cancellation");
                return;
            }
            barrier = triggers.recv(), if triggers_open => {
                match barrier {
                    Some(barrier) => {
                        let _ = barrier.acks.send(Ack::SourceOffset(next_offset)).await;
                        if out.send(Envelope::Barrier(barrier)).await.is_err() {
                            return;
                        }
                    }
                    None => triggers_open = false,
                }
            }
            record = stream.next() => {
                let Some(record) = record else {
                    debug!("source drained");
                    return;
                };
                next_offset = record.offset + 1;
                if filter.accept(&record.value) {
                    let envelope = Envelope::Record { key: String::new(), value: record.value };
                    if out.send(envelope).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Repartitions records by the stage's key and broadcasts aligned
/// barriers to every worker.
async fn run_router(
    stage: Arc<dyn KeyedStage>,
    mut input: mpsc::Receiver<Envelope>,
    workers: Vec<mpsc::Sender<Envelope>>,
    upstream: usize,
) {
    let mut pending: HashMap<u64, usize> = HashMap::new();
    while let Some(envelope) = input.recv().await {
        match envelope {
            Envelope::Record { value, .. } => {
                let key = stage.key(&value);
                let index = partition(&key, workers.len());
                if workers[index]
                    .send(Envelope::Record { key, value })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Envelope::Barrier(barrier) => {
                let seen = pending.entry(barrier.id).or_insert(0);
                *seen += 1;
                if *seen == upstream {
                    pending.remove(&barrier.id);
                    for worker in &workers {
                        if worker.send(Envelope::Barrier(barrier.clone())).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Processes one key partition of a stage against its local state.
async fn run_worker(
    stage: Arc<dyn KeyedStage>,
    mut input: mpsc::Receiver<Envelope>,
    main_out: mpsc::Sender<Envelope>,
    aux_out: mpsc::Sender<Envelope>,
    mut state: StateStore,
    failures: mpsc::Sender<TodoflowError>,
    poisoned: Arc<AtomicBool>,
) {
    while let Some(envelope) = input.recv().await {
        match envelope {
            Envelope::Record { key, value } => {
                let emitted = {
                    let mut handle = state.handle(&key);
                    stage.process(&value, &mut handle)
                };
                let emitted = match emitted {
                    Ok(emitted) => emitted,
                    Err(error) => {
                        poisoned.store(true, Ordering::SeqCst);
                        let _ = failures.send(error.into()).await;
                        return;
                    }
                };
                for emit in emitted {
                    let (out, value) = match emit {
                        StageEmit::Main(value) => (&main_out, value),
                        StageEmit::Aux(value) => (&aux_out, value),
                    };
                    let envelope = Envelope::Record { key: String::new(), value };
                    if out.send(envelope).await.is_err() {
                        return;
                    }
                }
            }
            Envelope::Barrier(barrier) => {
                let ack = Ack::StageState {
                    stage: stage.name().to_string(),
                    snapshot: state.snapshot(),
                };
                let _ = barrier.acks.send(ack).await;
                if main_out.send(Envelope::Barrier(barrier.clone())).await.is_err() {
                    return;
                }
                if aux_out.send(Envelope::Barrier(barrier)).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Publishes one sink's records under its delivery guarantee.
///
/// An exactly-once sink buffers records and commits them when the
/// barrier completes, so uncommitted output of a failed epoch is
/// discarded; an at-least-once sink publishes immediately.
async fn run_publisher(
    endpoint: PublisherEndpoint,
    publisher: Box<dyn LogPublisher>,
    mut input: mpsc::Receiver<Envelope>,
    upstream: usize,
    failures: mpsc::Sender<TodoflowError>,
    poisoned: Arc<AtomicBool>,
) {
    let transactional = endpoint.guarantee() == DeliveryGuarantee::ExactlyOnce;
    let mut buffered: Vec<String> = Vec::new();
    let mut pending: HashMap<u64, usize> = HashMap::new();

    while let Some(envelope) = input.recv().await {
        match envelope {
            Envelope::Record { value, .. } => {
                if transactional {
                    buffered.push(value);
                } else if let Err(error) = publish(&endpoint, publisher.as_ref(), value).await {
                    poisoned.store(true, Ordering::SeqCst);
                    let _ = failures.send(error.into()).await;
                    return;
                }
            }
            Envelope::Barrier(barrier) => {
                let seen = pending.entry(barrier.id).or_insert(0);
                *seen += 1;
                if *seen == upstream {
                    pending.remove(&barrier.id);
                    if let Err(error) =
                        flush(&endpoint, publisher.as_ref(), &mut buffered).await
                    {
                        poisoned.store(true, Ordering::SeqCst);
                        let _ = failures.send(error.into()).await;
                        return;
                    }
                    let _ = barrier.acks.send(Ack::SinkFlushed).await;
                }
            }
        }
    }

    // Graceful drain commits outstanding records; after a failure the
    // uncommitted epoch is discarded and replayed from the checkpoint.
    if !poisoned.load(Ordering::SeqCst) {
        if let Err(error) = flush(&endpoint, publisher.as_ref(), &mut buffered).await {
            let _ = failures.send(error.into()).await;
        }
    }
}

async fn publish(
    endpoint: &PublisherEndpoint,
    publisher: &dyn LogPublisher,
    value: String,
) -> Result<(), TransportError> {
    let key = endpoint.encode_key(&value);
    publisher.publish(key, value).await
}

async fn flush(
    endpoint: &PublisherEndpoint,
    publisher: &dyn LogPublisher,
    buffered: &mut Vec<String>,
) -> Result<(), TransportError> {
    for value in buffered.drain(..) {
        let key = endpoint.encode_key(&value);
        publisher.publish(key, value).await?;
    }
    Ok(())
}

/// Triggers periodic checkpoints and spawns a collector per trigger.
async fn run_coordinator(
    coordinator: CheckpointCoordinator,
    store: Arc<dyn CheckpointStore>,
    triggers: mpsc::Sender<Barrier>,
    expected_acks: usize,
    first_id: u64,
) {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let last_completed: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let mut next_id = first_id;

    loop {
        tokio::time::sleep(coordinator.interval()).await;

        if in_flight.load(Ordering::SeqCst) >= coordinator.concurrent() {
            continue;
        }
        let since_last = (*last_completed.lock()).map(|done| done.elapsed());
        if let Some(elapsed) = since_last {
            if elapsed < coordinator.pause() {
                tokio::time::sleep(coordinator.pause() - elapsed).await;
            }
        }

        next_id += 1;
        let (ack_tx, ack_rx) = mpsc::channel(expected_acks);
        let barrier = Barrier {
            id: next_id,
            acks: ack_tx,
        };
        if triggers.send(barrier).await.is_err() {
            return;
        }

        in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(collect_checkpoint(
            coordinator,
            Arc::clone(&store),
            next_id,
            ack_rx,
            expected_acks,
            Arc::clone(&in_flight),
            Arc::clone(&last_completed),
        ));
    }
}

/// Collects the acks of one checkpoint into a completed snapshot.
async fn collect_checkpoint(
    coordinator: CheckpointCoordinator,
    store: Arc<dyn CheckpointStore>,
    id: u64,
    mut acks: mpsc::Receiver<Ack>,
    expected: usize,
    in_flight: Arc<AtomicUsize>,
    last_completed: Arc<Mutex<Option<Instant>>>,
) {
    let collected = tokio::time::timeout(coordinator.timeout(), async {
        let mut source_offset = 0;
        let mut stage_states: HashMap<String, StateSnapshot> = HashMap::new();
        for _ in 0..expected {
            let Some(ack) = acks.recv().await else {
                return None;
            };
            match ack {
                Ack::SourceOffset(offset) => source_offset = offset,
                Ack::StageState { stage, snapshot } => {
                    stage_states.entry(stage).or_default().merge(snapshot);
                }
                Ack::SinkFlushed => {}
            }
        }
        Some((source_offset, stage_states))
    })
    .await;

    match collected {
        Ok(Some((source_offset, stage_states))) => {
            store.save(Checkpoint {
                id,
                created_at: Utc::now(),
                mode: coordinator.mode(),
                source_offset,
                stage_states,
            });
            debug!(checkpoint = id, offset = source_offset, "checkpoint completed");
        }
        Ok(None) => {
            debug!(checkpoint = id, "checkpoint incomplete, pipeline shutting down");
        }
        Err(_) => {
            warn!(checkpoint = id, "checkpoint abandoned after timeout");
        }
    }

    in_flight.fetch_sub(1, Ordering::SeqCst);
    *last_completed.lock() = Some(Instant::now());
}
