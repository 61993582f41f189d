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

//! Task completion callbacks
//!
//! Delivery is best-effort: one attempt per terminal task, failures are
//! logged and counted by the queue but never retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::task::{Task, TaskKind, TaskState};
use crate::core::{ImageId, TaskId};

/// JSON body POSTed to the registered callback URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub image_id: ImageId,
    pub status: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackPayload {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            kind: task.kind,
            image_id: task.image_id,
            status: task.state,
            error: task.failure.as_ref().map(|reason| reason.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("Callback request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Callback endpoint returned HTTP {0}")]
    Status(u16),
}

/// Delivers terminal task notifications
#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    async fn notify(&self, url: &str, payload: &CallbackPayload) -> Result<(), CallbackError>;
}

/// HTTP webhook notifier
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Result<Self, CallbackError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("imghub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackNotifier for WebhookNotifier {
    async fn notify(&self, url: &str, payload: &CallbackPayload) -> Result<(), CallbackError> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(CallbackError::Status(status.as_u16()))
        }
    }
}
