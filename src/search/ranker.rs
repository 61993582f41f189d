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

//! Hybrid retrieval ranker
//!
//! Scores catalog snapshots in one of three modes:
//! - **tag**: AND-filter on tags, keyword substring match on descriptions
//! - **vector**: cosine similarity against the query embedding
//! - **hybrid**: `w_vector * cosine + w_tag * tag_overlap_ratio`
//!
//! The keyword filters in every mode. Ties go to the most recent upload, then
//! to the image id so the order is deterministic.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::query::{SearchMode, SearchOrder, SearchQuery};
use super::results::{SearchHit, SearchResultSet};
use crate::analysis::ImageCatalog;
use crate::compute::CosineDistance;
use crate::core::{normalize_tag, Image, ImageHubError, Result, SearchConfig};

/// Fraction of requested tags present on the image; 0 when none requested
pub fn tag_overlap_ratio(image_tags: &BTreeSet<String>, requested: &BTreeSet<String>) -> f32 {
    if requested.is_empty() {
        return 0.0;
    }
    let matched = requested.iter().filter(|t| image_tags.contains(*t)).count();
    matched as f32 / requested.len() as f32
}

/// `w_vector * cosine + w_tag * overlap`. Weights are meant to sum to 1.0.
pub fn hybrid_score(weight_vector: f32, cosine: f32, weight_tag: f32, overlap: f32) -> f32 {
    weight_vector * cosine + weight_tag * overlap
}

/// Keyword occurrences in the description plus tags containing the keyword
fn keyword_relevance(image: &Image, keyword: &str) -> f32 {
    let in_description = image.description.to_lowercase().matches(keyword).count();
    let in_tags = image.tags.iter().filter(|t| t.contains(keyword)).count();
    (in_description + in_tags) as f32
}

fn matches_keyword(image: &Image, keyword: Option<&str>) -> bool {
    match keyword {
        Some(keyword) => image.description.to_lowercase().contains(keyword),
        None => true,
    }
}

fn by_score_then_recency(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| by_recency(a, b))
}

fn by_recency(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.uploaded_at
        .cmp(&a.uploaded_at)
        .then_with(|| a.image_id.cmp(&b.image_id))
}

pub struct RetrievalRanker {
    catalog: Arc<ImageCatalog>,
    config: SearchConfig,
    distance: CosineDistance,
}

impl RetrievalRanker {
    pub fn new(catalog: Arc<ImageCatalog>, config: SearchConfig) -> Self {
        Self {
            catalog,
            config,
            distance: CosineDistance::default(),
        }
    }

    /// Rank the current catalog contents
    pub fn search(&self, query: &SearchQuery) -> Result<SearchResultSet> {
        let images = self.catalog.snapshot();
        self.rank(&images, query)
    }

    /// Rank an explicit set of images
    pub fn rank(&self, images: &[Image], query: &SearchQuery) -> Result<SearchResultSet> {
        let started = Instant::now();
        self.validate(query)?;

        let mode = query.mode();
        let keyword = query.keyword();
        let requested: BTreeSet<String> =
            query.tags.iter().filter_map(|t| normalize_tag(t)).collect();
        let weight_vector = query
            .weight_vector
            .unwrap_or(self.config.default_weight_vector);
        let weight_tag = query.weight_tag.unwrap_or(self.config.default_weight_tag);

        let candidates = images
            .iter()
            .filter(|image| matches_keyword(image, keyword.as_deref()));

        let mut hits: Vec<SearchHit> = match mode {
            SearchMode::Tag => candidates
                .filter(|image| requested.is_subset(&image.tags))
                .map(|image| {
                    let relevance = match keyword.as_deref() {
                        Some(keyword) => keyword_relevance(image, keyword),
                        None => tag_overlap_ratio(&image.tags, &requested),
                    };
                    SearchHit {
                        image_id: image.id,
                        score: relevance,
                        vector_score: None,
                        tag_score: relevance,
                        uploaded_at: image.uploaded_at,
                    }
                })
                .collect(),
            SearchMode::Vector | SearchMode::Hybrid => {
                let query_vector = query.embedding_query.as_deref().unwrap_or_default();
                candidates
                    .filter_map(|image| {
                        let cosine = image
                            .embedding
                            .as_deref()
                            .and_then(|embedding| self.distance.similarity(query_vector, embedding));
                        if mode == SearchMode::Vector {
                            let cosine = cosine?;
                            return Some(SearchHit {
                                image_id: image.id,
                                score: cosine,
                                vector_score: Some(cosine),
                                tag_score: 0.0,
                                uploaded_at: image.uploaded_at,
                            });
                        }
                        let overlap = tag_overlap_ratio(&image.tags, &requested);
                        Some(SearchHit {
                            image_id: image.id,
                            score: hybrid_score(
                                weight_vector,
                                cosine.unwrap_or(0.0),
                                weight_tag,
                                overlap,
                            ),
                            vector_score: cosine,
                            tag_score: overlap,
                            uploaded_at: image.uploaded_at,
                        })
                    })
                    .collect()
            }
        };

        if let Some(min_score) = query.min_score {
            hits.retain(|hit| hit.score >= min_score);
        }

        match (mode, query.order) {
            (SearchMode::Tag, SearchOrder::Recent) => hits.sort_by(by_recency),
            _ => hits.sort_by(by_score_then_recency),
        }

        let total_count = hits.len() as u64;
        let limit = query
            .limit
            .unwrap_or(self.config.default_limit)
            .min(self.config.max_limit);
        let hits: Vec<SearchHit> = hits.into_iter().skip(query.offset).take(limit).collect();

        let processing_time_us = started.elapsed().as_micros() as u64;
        debug!(
            "🔎 [SEARCH] {} query over {} images: {} matches, returned {} ({}us)",
            mode,
            images.len(),
            total_count,
            hits.len(),
            processing_time_us
        );

        Ok(SearchResultSet {
            hits,
            total_count,
            mode,
            offset: query.offset,
            limit,
            processing_time_us,
        })
    }

    fn validate(&self, query: &SearchQuery) -> Result<()> {
        if let Some(embedding) = &query.embedding_query {
            if embedding.is_empty() {
                return Err(ImageHubError::InvalidInput(
                    "embedding_query must not be empty".to_string(),
                ));
            }
            if embedding.iter().any(|v| !v.is_finite()) {
                return Err(ImageHubError::InvalidInput(
                    "embedding_query contains non-finite values".to_string(),
                ));
            }
        }
        for (name, weight) in [
            ("weight_vector", query.weight_vector),
            ("weight_tag", query.weight_tag),
        ] {
            if let Some(weight) = weight {
                if !weight.is_finite() || weight < 0.0 {
                    return Err(ImageHubError::InvalidInput(format!(
                        "{} must be a non-negative number, got {}",
                        name, weight
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AnalysisStatus, ContentHash, ImageId};
    use chrono::{Duration, Utc};

    fn image(age_secs: i64, tags: &[&str], description: &str, embedding: Option<Vec<f32>>) -> Image {
        let uploaded_at = Utc::now() - Duration::seconds(age_secs);
        Image {
            id: ImageId::new(),
            content_hash: ContentHash::of(description.as_bytes()),
            size_bytes: 1,
            mime_type: "image/png".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            description: description.to_string(),
            embedding,
            analysis_status: AnalysisStatus::Indexed,
            last_error: None,
            uploaded_at,
            updated_at: uploaded_at,
        }
    }

    fn ranker() -> RetrievalRanker {
        RetrievalRanker::new(Arc::new(ImageCatalog::new()), SearchConfig::default())
    }

    #[test]
    fn test_tag_mode_and_semantics_recent_first() {
        let old = image(100, &["cat", "sofa"], "old", None);
        let new = image(10, &["cat", "sofa", "red"], "new", None);
        let partial = image(1, &["cat"], "partial", None);
        let images = vec![old.clone(), new.clone(), partial];

        let results = ranker()
            .rank(&images, &SearchQuery::new().with_tags(["cat", "SOFA"]))
            .unwrap();
        assert_eq!(results.mode, SearchMode::Tag);
        assert_eq!(results.image_ids(), vec![new.id, old.id]);
        assert_eq!(results.total_count, 2);
    }

    #[test]
    fn test_keyword_relevance_order() {
        let once = image(1, &[], "A beach at dusk", None);
        let twice = image(50, &["beach"], "Beach towels on the beach", None);
        let none = image(2, &[], "A mountain", None);
        let images = vec![once.clone(), twice.clone(), none];

        let query = SearchQuery::new()
            .with_keyword("Beach")
            .with_order(SearchOrder::Relevance);
        let results = ranker().rank(&images, &query).unwrap();
        assert_eq!(results.image_ids(), vec![twice.id, once.id]);
        assert_eq!(results.hits[0].score, 3.0);
    }

    #[test]
    fn test_vector_mode_skips_images_without_embedding() {
        let close = image(5, &[], "close", Some(vec![1.0, 0.0]));
        let far = image(1, &[], "far", Some(vec![0.0, 1.0]));
        let missing = image(0, &[], "missing", None);
        let wrong_dim = image(0, &[], "wrong", Some(vec![1.0, 0.0, 0.0]));
        let images = vec![far.clone(), close.clone(), missing, wrong_dim];

        let results = ranker()
            .rank(&images, &SearchQuery::new().with_embedding(vec![1.0, 0.1]))
            .unwrap();
        assert_eq!(results.mode, SearchMode::Vector);
        assert_eq!(results.image_ids(), vec![close.id, far.id]);
        assert!(results.hits[0].score > results.hits[1].score);
    }

    #[test]
    fn test_hybrid_blends_scores_and_breaks_ties_by_recency() {
        let tagged = image(100, &["cat"], "a cat", Some(vec![0.0, 1.0]));
        let similar = image(50, &[], "a cat too", Some(vec![1.0, 0.0]));
        let twin_newer = image(10, &[], "a cat twin", Some(vec![1.0, 0.0]));
        let images = vec![tagged.clone(), similar.clone(), twin_newer.clone()];

        let query = SearchQuery::new()
            .with_embedding(vec![1.0, 0.0])
            .with_tags(["cat"])
            .with_weights(0.7, 0.3);
        let results = ranker().rank(&images, &query).unwrap();
        assert_eq!(results.mode, SearchMode::Hybrid);
        assert_eq!(results.image_ids(), vec![twin_newer.id, similar.id, tagged.id]);
        assert!((results.hits[0].score - 0.7).abs() < 1e-5);
        assert!((results.hits[2].score - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_paging_and_min_score() {
        let images: Vec<Image> = (0..5)
            .map(|i| image(i, &["x"], &format!("img {}", i), None))
            .collect();
        let results = ranker()
            .rank(
                &images,
                &SearchQuery::new().with_tags(["x"]).with_offset(1).with_limit(2),
            )
            .unwrap();
        assert_eq!(results.total_count, 5);
        assert_eq!(results.image_ids(), vec![images[1].id, images[2].id]);

        let results = ranker()
            .rank(&images, &SearchQuery::new().with_tags(["x"]).with_min_score(1.5))
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(results.total_count, 0);
    }

    #[test]
    fn test_rejects_bad_queries() {
        let ranker = ranker();
        assert!(ranker
            .rank(&[], &SearchQuery::new().with_embedding(Vec::new()))
            .is_err());
        assert!(ranker
            .rank(
                &[],
                &SearchQuery::new().with_embedding(vec![1.0]).with_weights(-0.1, 1.0)
            )
            .is_err());
    }

    #[test]
    fn test_overlap_ratio() {
        let image_tags: BTreeSet<String> = ["a", "b"].iter().map(|t| t.to_string()).collect();
        let requested: BTreeSet<String> = ["a", "c"].iter().map(|t| t.to_string()).collect();
        assert_eq!(tag_overlap_ratio(&image_tags, &requested), 0.5);
        assert_eq!(tag_overlap_ratio(&image_tags, &BTreeSet::new()), 0.0);
    }
}
