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

//! Search query surface

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::Vector;

/// How results are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Tag AND-filter and/or keyword match
    Tag,
    /// Cosine similarity against the query embedding
    Vector,
    /// Weighted blend of cosine similarity and tag overlap
    Hybrid,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag => write!(f, "tag"),
            Self::Vector => write!(f, "vector"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Result order for tag/keyword mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOrder {
    /// Newest upload first
    #[default]
    Recent,
    /// Highest relevance first
    Relevance,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub keyword: Option<String>,
    pub tags: Vec<String>,
    pub embedding_query: Option<Vector>,
    pub weight_vector: Option<f32>,
    pub weight_tag: Option<f32>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub min_score: Option<f32>,
    pub order: SearchOrder,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_embedding(mut self, embedding: Vector) -> Self {
        self.embedding_query = Some(embedding);
        self
    }

    pub fn with_weights(mut self, weight_vector: f32, weight_tag: f32) -> Self {
        self.weight_vector = Some(weight_vector);
        self.weight_tag = Some(weight_tag);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn with_order(mut self, order: SearchOrder) -> Self {
        self.order = order;
        self
    }

    /// Normalized keyword, if any
    pub fn keyword(&self) -> Option<String> {
        self.keyword
            .as_deref()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
    }

    /// Mode implied by the query fields
    pub fn mode(&self) -> SearchMode {
        let has_tag_terms =
            self.tags.iter().any(|t| !t.trim().is_empty()) || self.keyword().is_some();
        match (&self.embedding_query, has_tag_terms) {
            (Some(_), true) => SearchMode::Hybrid,
            (Some(_), false) => SearchMode::Vector,
            (None, _) => SearchMode::Tag,
        }
    }
}
