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

//! Background task queue: analysis, embedding and storage sync work

pub mod callback;
pub mod executor;
#[allow(clippy::module_inception)]
pub mod queue;
pub mod task;

pub use callback::{CallbackError, CallbackNotifier, CallbackPayload, WebhookNotifier};
pub use executor::TaskExecutor;
pub use queue::{retry_backoff, QueueStats, TaskQueue};
pub use task::{
    Enqueued, FailureReason, Task, TaskContext, TaskKind, TaskPayload, TaskSpec, TaskState,
};
