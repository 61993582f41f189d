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

//! Error Types for imghub
//!
//! One error enum per layer; `ImageHubError` wraps them for the facade.

pub mod config_error;
pub mod core_error;
pub mod storage_error;
pub mod task_error;

// Re-export all error types
pub use config_error::*;
pub use core_error::*;
pub use storage_error::*;
pub use task_error::*;
