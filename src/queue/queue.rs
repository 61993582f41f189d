/*
 * Copyright 2025 Vijaykumar Singh
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Asynchronous task queue with a bounded worker pool
//!
//! The task table is the single source of truth for task state and is only
//! mutated here. Every state transition happens under one write lock:
//! - `enqueue` keeps at most one non-terminal task per (image, kind), merging
//!   into a pending task or deferring behind a running one
//! - the dispatcher claims pending -> running, so a task is never handed to two
//!   workers
//! - workers report the attempt outcome, which either re-queues the task with
//!   backoff or makes it terminal
//!
//! Work reaches the `C` workers through an `async-channel`, gated by a
//! semaphore of `C` permits. Terminal tasks enqueue their follow-ups first and
//! fire their callback second.

use async_channel::{Receiver, Sender};
use chrono::Utc;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::callback::{CallbackNotifier, CallbackPayload};
use super::executor::TaskExecutor;
use super::task::{Enqueued, FailureReason, Task, TaskContext, TaskKind, TaskSpec, TaskState};
use crate::core::{ImageId, QueueConfig, QueueError, TaskError, TaskId};

/// Backoff before retry `retry` (1-based): `min(base * 2^(retry-1), max)`
pub fn retry_backoff(base: Duration, max: Duration, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent).unwrap_or(max).min(max)
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub deferred: usize,
    pub total_retries: u64,
    pub callbacks_sent: u64,
    pub callbacks_failed: u64,
}

struct TaskEntry {
    task: Task,
    /// Creation order; retries keep their original slot
    seq: u64,
    not_before: Option<Instant>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct TaskTable {
    tasks: HashMap<TaskId, TaskEntry>,
    pending: BTreeMap<u64, TaskId>,
    active: HashMap<(ImageId, TaskKind), TaskId>,
    deferred: HashMap<(ImageId, TaskKind), TaskSpec>,
    next_seq: u64,
}

enum Claim {
    Ready(Task, CancellationToken),
    WaitUntil(Instant),
    Idle,
}

enum Completion {
    Retried { delay: Duration, attempt: u32 },
    Finished(Task, Vec<TaskSpec>),
    Unknown,
}

struct Dispatch {
    task: Task,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
}

pub struct TaskQueue {
    table: RwLock<TaskTable>,
    config: QueueConfig,
    notifier: Option<Arc<dyn CallbackNotifier>>,
    wakeup: Notify,
    shutdown: CancellationToken,
    shut_down: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    total_retries: AtomicU64,
    callbacks_sent: AtomicU64,
    callbacks_failed: AtomicU64,
}

impl TaskQueue {
    pub fn new(config: QueueConfig, notifier: Option<Arc<dyn CallbackNotifier>>) -> Self {
        Self {
            table: RwLock::new(TaskTable::default()),
            config,
            notifier,
            wakeup: Notify::new(),
            shutdown: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            total_retries: AtomicU64::new(0),
            callbacks_sent: AtomicU64::new(0),
            callbacks_failed: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue work, honouring the one-non-terminal-task-per-(image, kind) rule
    pub fn enqueue(&self, spec: TaskSpec) -> Result<Enqueued, QueueError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(QueueError::ShutDown);
        }

        let key = (spec.image_id, spec.kind());
        let mut guard = self.table.write();
        let table = &mut *guard;

        let existing = table
            .active
            .get(&key)
            .and_then(|id| table.tasks.get_mut(id))
            .filter(|entry| !entry.task.state.is_terminal());

        let outcome = match existing {
            Some(entry) if entry.task.state == TaskState::Pending => {
                entry.task.payload.merge(spec.payload);
                entry.task.callback_urls.extend(spec.callback_urls);
                if let Some(max_retries) = spec.max_retries {
                    entry.task.max_retries = max_retries;
                }
                // A fresh request gets a full retry budget, not the tail of a backoff
                if entry.task.retry_count > 0 {
                    entry.task.retry_count = 0;
                    entry.not_before = None;
                }
                entry.task.updated_at = Utc::now();
                Enqueued::Merged(entry.task.id)
            }
            Some(entry) => {
                let running_id = entry.task.id;
                match table.deferred.get_mut(&key) {
                    Some(parked) => parked.absorb(spec),
                    None => {
                        table.deferred.insert(key, spec);
                    }
                }
                Enqueued::Deferred(running_id)
            }
            None => Enqueued::Created(self.insert_pending(table, spec)),
        };
        drop(guard);

        match outcome {
            Enqueued::Created(id) => {
                debug!("📝 [QUEUE] Created {} task {} for image {}", key.1, id, key.0);
                self.wakeup.notify_one();
            }
            Enqueued::Merged(id) => {
                debug!(
                    "🔗 [QUEUE] Merged {} request for image {} into pending task {}",
                    key.1, key.0, id
                );
                // The merge may have cleared a backoff the dispatcher is sleeping on
                self.wakeup.notify_one();
            }
            Enqueued::Deferred(id) => debug!(
                "⏳ [QUEUE] Deferred {} request for image {} behind running task {}",
                key.1, key.0, id
            ),
        }
        Ok(outcome)
    }

    fn insert_pending(&self, table: &mut TaskTable, spec: TaskSpec) -> TaskId {
        let task = Task::from_spec(spec, self.config.max_retries);
        let id = task.id;
        let seq = table.next_seq;
        table.next_seq += 1;

        table.active.insert((task.image_id, task.kind), id);
        table.pending.insert(seq, id);
        table.tasks.insert(
            id,
            TaskEntry {
                task,
                seq,
                not_before: None,
                cancel: self.shutdown.child_token(),
            },
        );
        id
    }

    /// Mark a task terminal and release its (image, kind) slot.
    /// A deferred request for the same slot becomes a new pending task.
    fn finish_locked(&self, table: &mut TaskTable, task_id: TaskId) -> bool {
        let Some(entry) = table.tasks.get(&task_id) else {
            return false;
        };
        let key = (entry.task.image_id, entry.task.kind);
        if table.active.get(&key) == Some(&task_id) {
            table.active.remove(&key);
        }
        match table.deferred.remove(&key) {
            Some(spec) => {
                self.insert_pending(table, spec);
                true
            }
            None => false,
        }
    }

    /// Claim the oldest dispatchable pending task
    fn claim_next(&self) -> Claim {
        let now = Instant::now();
        let mut guard = self.table.write();
        let table = &mut *guard;

        let mut earliest: Option<Instant> = None;
        let mut ready: Option<u64> = None;
        for (seq, id) in &table.pending {
            let not_before = table.tasks.get(id).and_then(|entry| entry.not_before);
            match not_before {
                Some(at) if at > now => {
                    earliest = Some(earliest.map_or(at, |e| e.min(at)));
                }
                _ => {
                    ready = Some(*seq);
                    break;
                }
            }
        }

        let Some(seq) = ready else {
            return earliest.map_or(Claim::Idle, Claim::WaitUntil);
        };
        let Some(entry) = table
            .pending
            .remove(&seq)
            .and_then(|id| table.tasks.get_mut(&id))
        else {
            return Claim::Idle;
        };

        entry.task.state = TaskState::Running;
        entry.task.updated_at = Utc::now();
        entry.not_before = None;
        Claim::Ready(entry.task.clone(), entry.cancel.clone())
    }

    /// Apply the outcome of one attempt
    fn complete(
        &self,
        task_id: TaskId,
        result: Result<Vec<TaskSpec>, TaskError>,
    ) -> Completion {
        let mut guard = self.table.write();
        let table = &mut *guard;
        let Some(entry) = table.tasks.get_mut(&task_id) else {
            return Completion::Unknown;
        };
        if entry.task.state != TaskState::Running {
            return Completion::Unknown;
        }

        let cancelled = entry.cancel.is_cancelled();
        let now = Utc::now();
        entry.task.updated_at = now;

        let followups = match result {
            Ok(followups) => {
                entry.task.state = TaskState::Succeeded;
                entry.task.last_error = None;
                followups
            }
            Err(err) => {
                let err = if cancelled { TaskError::Cancelled } else { err };
                let reason = match err {
                    TaskError::Cancelled => FailureReason::Cancelled,
                    TaskError::Retryable(message)
                        if entry.task.retry_count < entry.task.max_retries =>
                    {
                        entry.task.retry_count += 1;
                        entry.task.state = TaskState::Pending;
                        entry.task.last_error = Some(message);
                        let delay = retry_backoff(
                            self.config.base_backoff(),
                            self.config.max_backoff(),
                            entry.task.retry_count,
                        );
                        entry.not_before = Some(Instant::now() + delay);
                        let attempt = entry.task.retry_count + 1;
                        let seq = entry.seq;
                        table.pending.insert(seq, task_id);
                        self.total_retries.fetch_add(1, Ordering::Relaxed);
                        return Completion::Retried { delay, attempt };
                    }
                    TaskError::Retryable(message) => FailureReason::RetryExhausted {
                        attempts: entry.task.retry_count + 1,
                        last_error: message,
                    },
                    TaskError::Fatal(message) => FailureReason::NonRetryable { message },
                    TaskError::Unsupported(message) => {
                        FailureReason::UnsupportedSyncDirection { message }
                    }
                };
                entry.task.state = TaskState::Failed;
                entry.task.last_error = Some(reason.to_string());
                entry.task.failure = Some(reason);
                Vec::new()
            }
        };

        let snapshot = entry.task.clone();
        if self.finish_locked(table, task_id) {
            self.wakeup.notify_one();
        }
        Completion::Finished(snapshot, followups)
    }

    /// Cancel a task. Pending tasks fail immediately with `Cancelled`;
    /// running tasks are signalled and fail at their next safe point.
    pub async fn cancel(&self, task_id: TaskId) -> Result<TaskState, QueueError> {
        let cancelled_task = {
            let mut guard = self.table.write();
            let table = &mut *guard;
            let entry = table
                .tasks
                .get_mut(&task_id)
                .ok_or(QueueError::TaskNotFound(task_id))?;

            match entry.task.state {
                TaskState::Running => {
                    entry.cancel.cancel();
                    info!("🛑 [QUEUE] Cancellation requested for running task {}", task_id);
                    return Ok(TaskState::Running);
                }
                TaskState::Pending => {
                    entry.cancel.cancel();
                    entry.task.state = TaskState::Failed;
                    entry.task.failure = Some(FailureReason::Cancelled);
                    entry.task.last_error = Some(FailureReason::Cancelled.to_string());
                    entry.task.updated_at = Utc::now();
                    entry.not_before = None;
                    let seq = entry.seq;
                    let snapshot = entry.task.clone();
                    table.pending.remove(&seq);
                    if self.finish_locked(table, task_id) {
                        self.wakeup.notify_one();
                    }
                    snapshot
                }
                state => {
                    return Err(QueueError::InvalidState {
                        task_id,
                        state: state.to_string(),
                        operation: "cancelled".to_string(),
                    })
                }
            }
        };

        info!("🛑 [QUEUE] Cancelled pending task {}", task_id);
        self.deliver_callback(&cancelled_task).await;
        Ok(TaskState::Failed)
    }

    /// Cancel every non-terminal task of an image and drop its deferred requests
    pub async fn cancel_image(&self, image_id: ImageId) -> usize {
        let ids: Vec<TaskId> = {
            let mut table = self.table.write();
            table.deferred.retain(|(image, _), _| *image != image_id);
            table
                .tasks
                .values()
                .filter(|entry| entry.task.image_id == image_id && !entry.task.state.is_terminal())
                .map(|entry| entry.task.id)
                .collect()
        };

        let mut cancelled = 0;
        for id in ids {
            if self.cancel(id).await.is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn get(&self, task_id: TaskId) -> Option<Task> {
        self.table
            .read()
            .tasks
            .get(&task_id)
            .map(|entry| entry.task.clone())
    }

    /// All tasks of an image, oldest first
    pub fn list_for_image(&self, image_id: ImageId) -> Vec<Task> {
        let table = self.table.read();
        let mut tasks: Vec<(u64, Task)> = table
            .tasks
            .values()
            .filter(|entry| entry.task.image_id == image_id)
            .map(|entry| (entry.seq, entry.task.clone()))
            .collect();
        tasks.sort_by_key(|(seq, _)| *seq);
        tasks.into_iter().map(|(_, task)| task).collect()
    }

    /// Drop terminal tasks last updated before `older_than` ago
    pub fn prune_terminal(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut table = self.table.write();
        let before = table.tasks.len();
        table
            .tasks
            .retain(|_, entry| !(entry.task.state.is_terminal() && entry.task.updated_at <= cutoff));
        let pruned = before - table.tasks.len();
        if pruned > 0 {
            debug!("🧹 [QUEUE] Pruned {} terminal tasks", pruned);
        }
        pruned
    }

    pub fn stats(&self) -> QueueStats {
        let table = self.table.read();
        let mut stats = QueueStats {
            deferred: table.deferred.len(),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            callbacks_sent: self.callbacks_sent.load(Ordering::Relaxed),
            callbacks_failed: self.callbacks_failed.load(Ordering::Relaxed),
            ..Default::default()
        };
        for entry in table.tasks.values() {
            match entry.task.state {
                TaskState::Pending => stats.pending += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Succeeded => stats.succeeded += 1,
                TaskState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Spawn the dispatcher and `concurrency` workers
    pub fn start(self: &Arc<Self>, executor: Arc<dyn TaskExecutor>) -> Result<(), QueueError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(QueueError::ShutDown);
        }
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            warn!("⚠️ [QUEUE] Worker pool already running");
            return Ok(());
        }

        let concurrency = self.config.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let (tx, rx) = async_channel::bounded::<Dispatch>(concurrency);

        workers.push(tokio::spawn(Arc::clone(self).dispatch_loop(tx, permits)));
        for worker_id in 0..concurrency {
            workers.push(tokio::spawn(Arc::clone(self).worker_loop(
                worker_id,
                rx.clone(),
                Arc::clone(&executor),
            )));
        }

        info!(
            "🚀 [QUEUE] Started task queue with {} workers (max_retries: {}, backoff: {}ms..{}ms)",
            concurrency,
            self.config.max_retries,
            self.config.base_backoff_ms,
            self.config.max_backoff_ms
        );
        Ok(())
    }

    /// Stop dispatching, cancel running tasks and join the workers
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("🛑 [QUEUE] Shutting down task queue");
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("❌ [QUEUE] Worker terminated abnormally: {}", e);
            }
        }
        info!("✅ [QUEUE] Task queue stopped");
    }

    async fn dispatch_loop(self: Arc<Self>, tx: Sender<Dispatch>, permits: Arc<Semaphore>) {
        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let dispatch = loop {
                match self.claim_next() {
                    Claim::Ready(task, cancel) => {
                        break Some(Dispatch {
                            task,
                            cancel,
                            _permit: permit,
                        })
                    }
                    Claim::WaitUntil(deadline) => tokio::select! {
                        _ = self.shutdown.cancelled() => break None,
                        _ = self.wakeup.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    },
                    Claim::Idle => tokio::select! {
                        _ = self.shutdown.cancelled() => break None,
                        _ = self.wakeup.notified() => {}
                    },
                }
            };

            let Some(dispatch) = dispatch else { break };
            if tx.send(dispatch).await.is_err() {
                break;
            }
        }
        debug!("🛑 [QUEUE] Dispatcher stopped");
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        rx: Receiver<Dispatch>,
        executor: Arc<dyn TaskExecutor>,
    ) {
        while let Ok(dispatch) = rx.recv().await {
            self.run_task(worker_id, dispatch, executor.as_ref()).await;
        }
        debug!("🛑 [QUEUE] Worker {} stopped", worker_id);
    }

    async fn run_task(&self, worker_id: usize, dispatch: Dispatch, executor: &dyn TaskExecutor) {
        let task = &dispatch.task;
        let ctx = TaskContext::new(task.retry_count + 1, dispatch.cancel.clone());
        debug!(
            "⚙️ [QUEUE] Worker {} running {} task {} for image {} (attempt {}/{})",
            worker_id,
            task.kind,
            task.id,
            task.image_id,
            ctx.attempt,
            task.max_retries + 1
        );

        let result = match ctx.checkpoint() {
            Ok(()) => match AssertUnwindSafe(executor.execute(task, &ctx))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        "💥 [QUEUE] Worker {} caught a panic in {} task {}: {}",
                        worker_id, task.kind, task.id, message
                    );
                    Err(TaskError::Fatal(format!("executor panicked: {}", message)))
                }
            },
            Err(e) => Err(e),
        };

        match self.complete(task.id, result) {
            Completion::Retried { delay, attempt } => {
                warn!(
                    "🔄 [QUEUE] {} task {} failed, retrying in {}ms (attempt {}/{})",
                    task.kind,
                    task.id,
                    delay.as_millis(),
                    attempt,
                    task.max_retries + 1
                );
                self.wakeup.notify_one();
            }
            Completion::Finished(finished, followups) => {
                self.finalize(finished, followups, executor).await;
            }
            Completion::Unknown => {
                warn!("⚠️ [QUEUE] Task {} vanished while running", task.id);
            }
        }
    }

    async fn finalize(&self, task: Task, followups: Vec<TaskSpec>, executor: &dyn TaskExecutor) {
        let followups = match &task.failure {
            None => {
                info!(
                    "✅ [QUEUE] {} task {} for image {} succeeded",
                    task.kind, task.id, task.image_id
                );
                followups
            }
            Some(reason) => {
                warn!(
                    "❌ [QUEUE] {} task {} for image {} failed: {}",
                    task.kind, task.id, task.image_id, reason
                );
                executor.on_failure(&task, reason)
            }
        };

        for spec in followups {
            let kind = spec.kind();
            if let Err(e) = self.enqueue(spec) {
                warn!(
                    "⚠️ [QUEUE] Could not enqueue {} follow-up of task {}: {}",
                    kind, task.id, e
                );
            }
        }

        self.deliver_callback(&task).await;
    }

    async fn deliver_callback(&self, task: &Task) {
        let Some(notifier) = self.notifier.as_ref() else {
            return;
        };
        if task.callback_urls.is_empty() {
            return;
        }

        let payload = CallbackPayload::for_task(task);
        for url in &task.callback_urls {
            self.deliver_one(notifier.as_ref(), task, url, &payload).await;
        }
    }

    /// One delivery attempt to one URL, bounded by the callback timeout
    async fn deliver_one(
        &self,
        notifier: &dyn CallbackNotifier,
        task: &Task,
        url: &str,
        payload: &CallbackPayload,
    ) {
        let outcome =
            tokio::time::timeout(self.config.callback_timeout(), notifier.notify(url, payload))
                .await;
        match outcome {
            Ok(Ok(())) => {
                self.callbacks_sent.fetch_add(1, Ordering::Relaxed);
                debug!("📣 [QUEUE] Callback for task {} delivered to {}", task.id, url);
            }
            Ok(Err(e)) => {
                self.callbacks_failed.fetch_add(1, Ordering::Relaxed);
                warn!("📣 [QUEUE] Callback for task {} to {} failed: {}", task.id, url, e);
            }
            Err(_) => {
                self.callbacks_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "📣 [QUEUE] Callback for task {} to {} timed out after {}ms",
                    task.id, url, self.config.callback_timeout_ms
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
