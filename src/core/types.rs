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

//! Core domain types shared by storage, queue, analysis and search

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Embedding vector
pub type Vector = Vec<f32>;

/// Endpoint identifier, the name given to the endpoint in configuration
pub type EndpointId = String;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Image identifier
    ImageId
);
uuid_id!(
    /// Task identifier
    TaskId
);
uuid_id!(
    /// Tag identifier
    TagId
);

/// Content fingerprint (lowercase hex BLAKE3 digest)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Fingerprint raw image bytes
    pub fn of(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical object key: `images/<2-char fanout>/<hash>`
    pub fn object_key(&self) -> String {
        let fanout = self.0.get(..2).unwrap_or("00");
        format!("images/{}/{}", fanout, self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage backend flavour of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendType {
    Local,
    S3Compatible,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::S3Compatible => write!(f, "s3-compatible"),
        }
    }
}

/// Endpoint role: primaries take uploads, backups only receive syncs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointRole {
    Primary,
    Backup,
}

/// Status of one copy of an image on one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    Present,
    Syncing,
    Missing,
    Failed,
}

/// Where (and whether) an image is stored on a given endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageLocation {
    pub image_id: ImageId,
    pub endpoint_id: EndpointId,
    pub object_key: String,
    pub status: LocationStatus,
    pub content_hash: ContentHash,
    pub updated_at: DateTime<Utc>,
}

/// Analysis lifecycle of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// Stored, nothing ran yet
    Pending,
    /// Vision analysis running
    Analyzing,
    /// Tags/description known (from vision or the uploader)
    Tagged,
    /// Embedding stored, fully searchable by vector
    Indexed,
    /// Vision analysis gave up; the image stays searchable
    Failed,
}

/// Hierarchy level of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagLevel {
    Category,
    Resolution,
    Free,
}

impl TagLevel {
    /// Classify a normalized tag name
    pub fn classify(name: &str) -> Self {
        if name.starts_with("category:") {
            return Self::Category;
        }
        if matches!(name, "4k" | "8k" | "hd" | "fhd" | "uhd") {
            return Self::Resolution;
        }
        if let Some((w, h)) = name.split_once('x') {
            let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
            if numeric(w) && numeric(h) {
                return Self::Resolution;
            }
        }
        Self::Free
    }
}

/// Tag registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub level: TagLevel,
    pub usage_count: u64,
}

/// Trim and lowercase a tag name; `None` for blank names
pub fn normalize_tag(raw: &str) -> Option<String> {
    let name = raw.trim().to_lowercase();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Catalog entry for a stored image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    pub content_hash: ContentHash,
    pub size_bytes: u64,
    pub mime_type: String,
    /// Normalized tag names
    pub tags: BTreeSet<String>,
    pub description: String,
    pub embedding: Option<Vector>,
    pub analysis_status: AnalysisStatus,
    pub last_error: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sniff the MIME type from magic bytes
pub fn sniff_mime_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'B', b'M', ..] => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_object_key_fanout() {
        let hash = ContentHash::of(b"pixels");
        let key = hash.object_key();
        assert!(key.starts_with(&format!("images/{}/", &hash.as_str()[..2])));
        assert!(key.ends_with(hash.as_str()));
        assert_eq!(hash, ContentHash::of(b"pixels"));
    }

    #[test]
    fn test_tag_level_classification() {
        assert_eq!(TagLevel::classify("category:animal"), TagLevel::Category);
        assert_eq!(TagLevel::classify("1920x1080"), TagLevel::Resolution);
        assert_eq!(TagLevel::classify("4k"), TagLevel::Resolution);
        assert_eq!(TagLevel::classify("xmas"), TagLevel::Free);
        assert_eq!(TagLevel::classify("cat"), TagLevel::Free);
    }

    #[test]
    fn test_mime_sniffing() {
        assert_eq!(sniff_mime_type(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_mime_type(b"\x89PNG\r\n"), "image/png");
        assert_eq!(sniff_mime_type(b"RIFF\0\0\0\0WEBPVP8"), "image/webp");
        assert_eq!(sniff_mime_type(b"hello"), "application/octet-stream");
    }

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("  Cat "), Some("cat".to_string()));
        assert_eq!(normalize_tag("   "), None);
    }
}
