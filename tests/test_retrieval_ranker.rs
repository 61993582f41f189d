// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Property tests for hybrid scoring and ranking

use chrono::{Duration, Utc};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

use imghub::analysis::ImageCatalog;
use imghub::core::{AnalysisStatus, ContentHash, Image, ImageId, SearchConfig};
use imghub::search::{hybrid_score, tag_overlap_ratio, RetrievalRanker, SearchMode, SearchQuery};

fn image(seed: u64, tags: &[&str], embedding: Vec<f32>) -> Image {
    let uploaded_at = Utc::now() - Duration::seconds(seed as i64);
    Image {
        id: ImageId::new(),
        content_hash: ContentHash::of(&seed.to_le_bytes()),
        size_bytes: 8,
        mime_type: "image/jpeg".to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        description: String::new(),
        embedding: Some(embedding),
        analysis_status: AnalysisStatus::Indexed,
        last_error: None,
        uploaded_at,
        updated_at: uploaded_at,
    }
}

fn ranker() -> RetrievalRanker {
    RetrievalRanker::new(Arc::new(ImageCatalog::new()), SearchConfig::default())
}

proptest! {
    #[test]
    fn prop_hybrid_score_monotonic_in_cosine(
        weight_vector in 0.0f32..=1.0,
        a in -1.0f32..=1.0,
        b in -1.0f32..=1.0,
        overlap in 0.0f32..=1.0,
    ) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let weight_tag = 1.0 - weight_vector;
        prop_assert!(
            hybrid_score(weight_vector, low, weight_tag, overlap)
                <= hybrid_score(weight_vector, high, weight_tag, overlap) + 1e-6
        );
    }

    #[test]
    fn prop_hybrid_score_monotonic_in_overlap(
        weight_vector in 0.0f32..=1.0,
        cosine in -1.0f32..=1.0,
        a in 0.0f32..=1.0,
        b in 0.0f32..=1.0,
    ) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let weight_tag = 1.0 - weight_vector;
        prop_assert!(
            hybrid_score(weight_vector, cosine, weight_tag, low)
                <= hybrid_score(weight_vector, cosine, weight_tag, high) + 1e-6
        );
    }

    #[test]
    fn prop_overlap_ratio_is_a_fraction(
        image_tags in proptest::collection::btree_set("[a-e]", 0..5),
        requested in proptest::collection::btree_set("[a-e]", 0..5),
    ) {
        let ratio = tag_overlap_ratio(&image_tags, &requested);
        prop_assert!((0.0..=1.0).contains(&ratio));
        if requested.is_subset(&image_tags) && !requested.is_empty() {
            prop_assert_eq!(ratio, 1.0);
        }
    }

    #[test]
    fn prop_more_matching_tags_never_rank_lower(weight_vector in 0.05f32..=0.95) {
        let embedding = vec![1.0, 0.0, 0.0];
        let more = image(1, &["cat", "indoor"], embedding.clone());
        let fewer = image(2, &["cat"], embedding.clone());
        let query = SearchQuery::new()
            .with_embedding(embedding)
            .with_tags(["cat", "indoor"])
            .with_weights(weight_vector, 1.0 - weight_vector);

        let results = ranker().rank(&[fewer, more.clone()], &query).unwrap();
        prop_assert_eq!(results.mode, SearchMode::Hybrid);
        prop_assert_eq!(results.hits[0].image_id, more.id);
        prop_assert!(results.hits[0].score >= results.hits[1].score);
    }
}

#[test]
fn test_hybrid_mode_keeps_images_without_tag_match() {
    let close = image(1, &[], vec![1.0, 0.0]);
    let tagged = image(2, &["beach"], vec![0.0, 1.0]);
    let query = SearchQuery::new()
        .with_embedding(vec![1.0, 0.0])
        .with_tags(["beach"])
        .with_weights(0.7, 0.3);

    let results = ranker().rank(&[close.clone(), tagged.clone()], &query).unwrap();
    assert_eq!(results.total_count, 2);
    assert_eq!(results.image_ids(), vec![close.id, tagged.id]);
    assert!((results.hits[0].score - 0.7).abs() < 1e-5);
    assert!((results.hits[1].score - 0.3).abs() < 1e-5);
}

#[test]
fn test_invalid_queries_rejected() {
    let images = vec![image(1, &["a"], vec![1.0])];
    assert!(ranker()
        .rank(&images, &SearchQuery::new().with_embedding(Vec::new()))
        .is_err());
    assert!(ranker()
        .rank(
            &images,
            &SearchQuery::new()
                .with_embedding(vec![1.0])
                .with_weights(-0.5, 1.0)
        )
        .is_err());
    assert!(ranker()
        .rank(
            &images,
            &SearchQuery::new()
                .with_embedding(vec![1.0])
                .with_weights(f32::NAN, 1.0)
        )
        .is_err());
}

#[test]
fn test_pagination_reports_total_before_slicing() {
    let images: Vec<Image> = (0..5).map(|i| image(i, &["x"], vec![1.0])).collect();
    let query = SearchQuery::new()
        .with_tags(["x"])
        .with_limit(2)
        .with_offset(2);
    let results = ranker().rank(&images, &query).unwrap();
    assert_eq!(results.total_count, 5);
    assert_eq!(results.len(), 2);
    // Recent first: offsets 2 and 3 are the third and fourth newest
    assert_eq!(results.image_ids(), vec![images[2].id, images[3].id]);
}

#[test]
fn test_tag_mode_requires_every_requested_tag() {
    let both = image(1, &["cat", "indoor"], vec![1.0]);
    let one = image(2, &["cat"], vec![1.0]);
    let requested: BTreeSet<String> = ["cat", "indoor"].iter().map(|t| t.to_string()).collect();
    assert_eq!(tag_overlap_ratio(&both.tags, &requested), 1.0);

    let results = ranker()
        .rank(&[both.clone(), one], &SearchQuery::new().with_tags(["cat", "indoor"]))
        .unwrap();
    assert_eq!(results.image_ids(), vec![both.id]);
}
