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

//! Storage routing error types

use thiserror::Error;

use crate::core::{BackendType, EndpointId};

/// Errors surfaced by the storage router
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RouterError {
    /// Every primary endpoint is unhealthy; fatal to the request
    #[error("No healthy primary endpoint available for write")]
    NoHealthyEndpoint,

    /// Every read candidate was tried and failed (or none exist)
    #[error("Image {image_id} unavailable: {reason}")]
    ReadUnavailable { image_id: String, reason: String },

    /// I/O against a single endpoint failed
    #[error("Transfer to/from endpoint '{endpoint}' failed: {reason}")]
    TransferFailure { endpoint: EndpointId, reason: String },

    /// Only syncs out of a local endpoint are supported
    #[error("Unsupported sync direction: {from} -> {to}")]
    UnsupportedSyncDirection { from: BackendType, to: BackendType },

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(EndpointId),

    #[error("No present copy of image {0} on any primary endpoint")]
    NoSource(String),
}

pub type RouterResult<T> = std::result::Result<T, RouterError>;
