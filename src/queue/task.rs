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

//! Task model: kinds, states, payloads and failure reasons

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::core::{EndpointId, ImageId, TaskError, TaskId};

/// Kind of background work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    VisionAnalysis,
    Embedding,
    StorageSync,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VisionAnalysis => write!(f, "vision_analysis"),
            Self::Embedding => write!(f, "embedding"),
            Self::StorageSync => write!(f, "storage_sync"),
        }
    }
}

/// Task lifecycle: `pending -> running -> succeeded | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Kind-specific task input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    VisionAnalysis {
        /// Overrides the configured vision prompt
        prompt: Option<String>,
    },
    Embedding,
    StorageSync {
        targets: BTreeSet<EndpointId>,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::VisionAnalysis { .. } => TaskKind::VisionAnalysis,
            Self::Embedding => TaskKind::Embedding,
            Self::StorageSync { .. } => TaskKind::StorageSync,
        }
    }

    /// Fold a newer request of the same kind into this payload.
    /// Sync targets are unioned; otherwise the newer payload wins.
    pub fn merge(&mut self, newer: TaskPayload) {
        match (self, newer) {
            (Self::StorageSync { targets }, Self::StorageSync { targets: more }) => {
                targets.extend(more);
            }
            (current, newer) => *current = newer,
        }
    }
}

/// Why a task ended in `failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    Cancelled,
    RetryExhausted { attempts: u32, last_error: String },
    NonRetryable { message: String },
    UnsupportedSyncDirection { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "Cancelled"),
            Self::RetryExhausted {
                attempts,
                last_error,
            } => write!(f, "RetryExhausted after {} attempts: {}", attempts, last_error),
            Self::NonRetryable { message } => write!(f, "NonRetryable: {}", message),
            Self::UnsupportedSyncDirection { message } => {
                write!(f, "UnsupportedSyncDirection: {}", message)
            }
        }
    }
}

/// A unit of background work tracked by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub image_id: ImageId,
    pub payload: TaskPayload,
    pub state: TaskState,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Every webhook registered by requests folded into this task
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub callback_urls: BTreeSet<String>,
    pub last_error: Option<String>,
    pub failure: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn from_spec(spec: TaskSpec, default_max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            kind: spec.payload.kind(),
            image_id: spec.image_id,
            payload: spec.payload,
            state: TaskState::Pending,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            callback_urls: spec.callback_urls,
            last_error: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of times the body has been started
    pub fn attempts(&self) -> u32 {
        match self.state {
            TaskState::Pending => self.retry_count,
            _ => self.retry_count + 1,
        }
    }
}

/// Request to create a task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub image_id: ImageId,
    pub payload: TaskPayload,
    pub callback_urls: BTreeSet<String>,
    /// Falls back to the queue default
    pub max_retries: Option<u32>,
}

impl TaskSpec {
    pub fn new(image_id: ImageId, payload: TaskPayload) -> Self {
        Self {
            image_id,
            payload,
            callback_urls: BTreeSet::new(),
            max_retries: None,
        }
    }

    pub fn vision(image_id: ImageId) -> Self {
        Self::new(image_id, TaskPayload::VisionAnalysis { prompt: None })
    }

    pub fn embedding(image_id: ImageId) -> Self {
        Self::new(image_id, TaskPayload::Embedding)
    }

    pub fn storage_sync(image_id: ImageId, targets: impl IntoIterator<Item = EndpointId>) -> Self {
        Self::new(
            image_id,
            TaskPayload::StorageSync {
                targets: targets.into_iter().collect(),
            },
        )
    }

    pub fn with_callback(mut self, callback_url: Option<String>) -> Self {
        self.callback_urls.extend(callback_url);
        self
    }

    pub fn with_callbacks(mut self, callback_urls: impl IntoIterator<Item = String>) -> Self {
        self.callback_urls.extend(callback_urls);
        self
    }

    /// Fold a newer request for the same (image, kind) into this one
    pub fn absorb(&mut self, newer: TaskSpec) {
        self.payload.merge(newer.payload);
        self.callback_urls.extend(newer.callback_urls);
        if newer.max_retries.is_some() {
            self.max_retries = newer.max_retries;
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }
}

/// Result of an enqueue request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new pending task was created
    Created(TaskId),
    /// Folded into an existing pending task of the same kind
    Merged(TaskId),
    /// Parked behind the running task with this id
    Deferred(TaskId),
}

impl Enqueued {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Created(id) | Self::Merged(id) | Self::Deferred(id) => *id,
        }
    }
}

/// Per-execution context handed to executors
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub attempt: u32,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(attempt: u32, cancel: CancellationToken) -> Self {
        Self { attempt, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Safe point: bail out if cancellation was requested
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
