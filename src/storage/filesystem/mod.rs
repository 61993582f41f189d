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

//! Storage Backend Abstraction Layer
//!
//! Provides a uniform object interface over the two supported backends:
//! - `local`         - a directory on the local filesystem
//! - `s3-compatible` - Amazon S3 or any S3-compatible object store (MinIO, R2, ...)
//!
//! The router only ever talks to `dyn StorageBackend`; backends are built from
//! configuration by [`create_backend`].

use async_trait::async_trait;
use std::io::Error as IoError;
use std::sync::Arc;

pub mod local;
pub mod s3;

use crate::core::{BackendConfig, BackendType};
use local::LocalFileSystem;
use s3::S3FileSystem;

/// Backend operation result type
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend error types
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Store unreachable or failing; retryable and counted by health probes
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BackendError {
    /// Whether a health probe that hit this error reached the store
    pub fn store_reachable(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Object key used by health probes
pub const PROBE_KEY: &str = ".imghub-probe";

/// Uniform object interface implemented by every backend
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store bytes under `key`, replacing any existing object
    async fn put(&self, key: &str, data: &[u8]) -> BackendResult<()>;

    /// Fetch object bytes
    async fn get(&self, key: &str) -> BackendResult<Vec<u8>>;

    /// Delete an object; deleting a missing object is not an error
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Check object existence
    async fn exists(&self, key: &str) -> BackendResult<bool>;

    /// Get backend type identifier
    fn backend_type(&self) -> BackendType;

    /// Cheap reachability check used by the health tracker
    async fn probe(&self) -> BackendResult<()> {
        match self.exists(PROBE_KEY).await {
            Ok(_) => Ok(()),
            Err(e) if e.store_reachable() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Build a backend from endpoint configuration
pub async fn create_backend(config: &BackendConfig) -> BackendResult<Arc<dyn StorageBackend>> {
    match config {
        BackendConfig::Local(local_config) => {
            let fs = LocalFileSystem::new(local_config.clone()).await?;
            Ok(Arc::new(fs))
        }
        BackendConfig::S3Compatible(s3_config) => {
            let fs = S3FileSystem::new(s3_config.clone()).await?;
            Ok(Arc::new(fs))
        }
    }
}
