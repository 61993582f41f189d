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

//! Search result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::query::SearchMode;
use crate::core::ImageId;

/// One ranked image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub image_id: ImageId,
    /// Final ranking score
    pub score: f32,
    /// Cosine similarity, when the image was scored against an embedding
    pub vector_score: Option<f32>,
    /// Tag overlap ratio (hybrid) or relevance (tag mode)
    pub tag_score: f32,
    pub uploaded_at: DateTime<Utc>,
}

/// Ordered hits with query metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultSet {
    pub hits: Vec<SearchHit>,
    /// Matches before pagination
    pub total_count: u64,
    pub mode: SearchMode,
    pub offset: usize,
    pub limit: usize,
    /// Processing time for the entire query (microseconds)
    pub processing_time_us: u64,
}

impl SearchResultSet {
    pub fn image_ids(&self) -> Vec<ImageId> {
        self.hits.iter().map(|hit| hit.image_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}
