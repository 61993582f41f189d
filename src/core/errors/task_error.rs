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

//! Provider, task execution and queue error types

use thiserror::Error;

use crate::core::TaskId;

/// Errors from vision/embedding providers
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("Provider timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Provider error (retryable): {0}")]
    Retryable(String),

    #[error("Provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Retryable(_))
    }
}

/// Outcome of a failed task body, as seen by the queue
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    /// Transient; the queue retries with backoff
    #[error("{0}")]
    Retryable(String),

    /// Permanent; the task fails without retry
    #[error("{0}")]
    Fatal(String),

    /// Sync direction the router refuses; never retried
    #[error("{0}")]
    Unsupported(String),

    /// Cancellation observed at a safe point
    #[error("cancelled")]
    Cancelled,
}

impl From<ProviderError> for TaskError {
    fn from(err: ProviderError) -> Self {
        if err.is_retryable() {
            Self::Retryable(err.to_string())
        } else {
            Self::Fatal(err.to_string())
        }
    }
}

/// Errors returned by the task queue API
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueueError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task {task_id} is {state} and cannot be {operation}")]
    InvalidState {
        task_id: TaskId,
        state: String,
        operation: String,
    },

    #[error("Task queue is shut down")]
    ShutDown,
}
