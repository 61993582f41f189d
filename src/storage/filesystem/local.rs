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

//! Local filesystem backend: objects are files under a root directory

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{BackendError, BackendResult, StorageBackend};
use crate::core::BackendType;

/// Local filesystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory holding all objects of this endpoint
    pub root_dir: PathBuf,

    /// Create the root directory when missing
    #[serde(default = "default_true")]
    pub create_root: bool,

    /// Default file permissions (Unix-style octal)
    #[serde(default)]
    pub default_permissions: Option<u32>,

    /// fsync objects before they become visible
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data/images"),
            create_root: true,
            default_permissions: None,
            sync_enabled: true,
        }
    }
}

/// Local filesystem implementation
#[derive(Debug)]
pub struct LocalFileSystem {
    config: LocalConfig,
}

impl LocalFileSystem {
    /// Create new local filesystem instance
    pub async fn new(config: LocalConfig) -> BackendResult<Self> {
        if !config.root_dir.exists() {
            if config.create_root {
                fs::create_dir_all(&config.root_dir).await?;
            } else {
                return Err(BackendError::Config(format!(
                    "Root directory does not exist: {}",
                    config.root_dir.display()
                )));
            }
        }
        if !config.root_dir.is_dir() {
            return Err(BackendError::Config(format!(
                "Root path is not a directory: {}",
                config.root_dir.display()
            )));
        }

        Ok(Self { config })
    }

    pub fn root_dir(&self) -> &Path {
        &self.config.root_dir
    }

    /// Resolve an object key below the root, refusing keys that escape it
    fn resolve_key(&self, key: &str) -> BackendResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(BackendError::Config(format!("Invalid object key: {}", key)));
        }
        Ok(self.config.root_dir.join(relative))
    }

    fn map_io(path: &Path, e: std::io::Error) -> BackendError {
        match e.kind() {
            std::io::ErrorKind::NotFound => BackendError::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                BackendError::AccessDenied(path.display().to_string())
            }
            _ => BackendError::Io(e),
        }
    }
}

#[async_trait]
impl StorageBackend for LocalFileSystem {
    async fn put(&self, key: &str, data: &[u8]) -> BackendResult<()> {
        let resolved_path = self.resolve_key(key)?;

        if let Some(parent) = resolved_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io(parent, e))?;
        }

        // Write to a sibling temp file and rename so readers never see a partial object
        let tmp_path = resolved_path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        let result = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(data).await?;
            if self.config.sync_enabled {
                file.sync_all().await?;
            }
            drop(file);

            #[cfg(unix)]
            if let Some(permissions) = self.config.default_permissions {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(permissions);
                fs::set_permissions(&tmp_path, perms).await?;
            }

            fs::rename(&tmp_path, &resolved_path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Self::map_io(&resolved_path, e));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> BackendResult<Vec<u8>> {
        let resolved_path = self.resolve_key(key)?;
        fs::read(&resolved_path)
            .await
            .map_err(|e| Self::map_io(&resolved_path, e))
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let resolved_path = self.resolve_key(key)?;
        match fs::remove_file(&resolved_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io(&resolved_path, e)),
        }
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let resolved_path = self.resolve_key(key)?;
        fs::try_exists(&resolved_path)
            .await
            .map_err(|e| Self::map_io(&resolved_path, e))
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }

    async fn probe(&self) -> BackendResult<()> {
        match fs::metadata(&self.config.root_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(BackendError::Unavailable(format!(
                "{} is not a directory",
                self.config.root_dir.display()
            ))),
            Err(e) => Err(BackendError::Unavailable(format!(
                "{}: {}",
                self.config.root_dir.display(),
                e
            ))),
        }
    }
}
