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

//! Storage layer: backends, endpoint health, image locations and routing

pub mod filesystem;
pub mod health;
pub mod locations;
pub mod router;

pub use filesystem::{create_backend, BackendError, BackendResult, StorageBackend};
pub use health::{EndpointHealth, EndpointHealthTracker};
pub use locations::{ClaimOutcome, LocationTable};
pub use router::{
    ReadResult, RoutedEndpoint, StorageEndpoint, StorageRouter, SyncOutcome, WriteReceipt,
};
