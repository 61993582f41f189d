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

use async_trait::async_trait;

use super::task::{FailureReason, Task, TaskContext, TaskSpec};
use crate::core::TaskError;

/// Runs task bodies on behalf of the queue workers
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute one attempt. On success, returns follow-up tasks to enqueue
    /// once this task is terminal.
    async fn execute(&self, task: &Task, ctx: &TaskContext) -> Result<Vec<TaskSpec>, TaskError>;

    /// Called once when a task that ran ends in `failed`; returns follow-ups
    fn on_failure(&self, _task: &Task, _reason: &FailureReason) -> Vec<TaskSpec> {
        Vec::new()
    }
}
