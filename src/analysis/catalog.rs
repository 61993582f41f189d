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

//! In-process image catalog and tag registry

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

use crate::core::{
    normalize_tag, AnalysisStatus, ContentHash, Image, ImageId, Tag, TagId, TagLevel, Vector,
};

#[derive(Default)]
struct CatalogInner {
    images: HashMap<ImageId, Image>,
    by_hash: HashMap<ContentHash, ImageId>,
    tags: HashMap<String, Tag>,
}

impl CatalogInner {
    fn retain_tag(&mut self, name: &str) {
        let tag = self.tags.entry(name.to_string()).or_insert_with(|| Tag {
            id: TagId::new(),
            name: name.to_string(),
            level: TagLevel::classify(name),
            usage_count: 0,
        });
        tag.usage_count += 1;
    }

    fn release_tag(&mut self, name: &str) {
        if let Some(tag) = self.tags.get_mut(name) {
            tag.usage_count = tag.usage_count.saturating_sub(1);
        }
    }

    /// Replace an image's tag set, keeping usage counts in step
    fn replace_tags(&mut self, image_id: ImageId, tags: BTreeSet<String>) -> bool {
        let Some(previous) = self
            .images
            .get(&image_id)
            .map(|image| image.tags.clone())
        else {
            return false;
        };
        for removed in previous.difference(&tags) {
            self.release_tag(removed);
        }
        for added in tags.difference(&previous) {
            self.retain_tag(added);
        }
        if let Some(image) = self.images.get_mut(&image_id) {
            image.tags = tags;
            image.updated_at = Utc::now();
        }
        true
    }
}

/// Catalog of stored images, keyed by id and by content hash
#[derive(Default)]
pub struct ImageCatalog {
    inner: RwLock<CatalogInner>,
}

impl ImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new image. Returns the id of the existing image when the
    /// content hash is already catalogued.
    pub fn insert(&self, image: Image) -> Result<(), ImageId> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_hash.get(&image.content_hash) {
            return Err(*existing);
        }
        let tags = image.tags.clone();
        inner.by_hash.insert(image.content_hash.clone(), image.id);
        inner.images.insert(image.id, image);
        for tag in &tags {
            inner.retain_tag(tag);
        }
        Ok(())
    }

    pub fn get(&self, image_id: ImageId) -> Option<Image> {
        self.inner.read().images.get(&image_id).cloned()
    }

    pub fn find_by_hash(&self, content_hash: &ContentHash) -> Option<Image> {
        let inner = self.inner.read();
        inner
            .by_hash
            .get(content_hash)
            .and_then(|id| inner.images.get(id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of every image, for ranking
    pub fn snapshot(&self) -> Vec<Image> {
        self.inner.read().images.values().cloned().collect()
    }

    /// Replace the tag set (names are normalized)
    pub fn set_tags<I, S>(&self, image_id: ImageId, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags = tags
            .into_iter()
            .filter_map(|t| normalize_tag(t.as_ref()))
            .collect();
        self.inner.write().replace_tags(image_id, tags)
    }

    /// Merge vision output: tags are added, a non-empty description replaces
    /// the current one, and the image becomes `tagged`
    pub fn apply_analysis(&self, image_id: ImageId, tags: &[String], description: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(mut merged) = inner.images.get(&image_id).map(|image| image.tags.clone()) else {
            return false;
        };
        merged.extend(tags.iter().filter_map(|t| normalize_tag(t)));
        inner.replace_tags(image_id, merged);

        if let Some(image) = inner.images.get_mut(&image_id) {
            let description = description.trim();
            if !description.is_empty() {
                image.description = description.to_string();
            }
            image.analysis_status = AnalysisStatus::Tagged;
            image.last_error = None;
            image.updated_at = Utc::now();
        }
        true
    }

    pub fn set_status(
        &self,
        image_id: ImageId,
        status: AnalysisStatus,
        last_error: Option<String>,
    ) -> bool {
        let mut inner = self.inner.write();
        match inner.images.get_mut(&image_id) {
            Some(image) => {
                image.analysis_status = status;
                if last_error.is_some() {
                    image.last_error = last_error;
                }
                image.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn set_last_error(&self, image_id: ImageId, error: String) -> bool {
        let mut inner = self.inner.write();
        match inner.images.get_mut(&image_id) {
            Some(image) => {
                image.last_error = Some(error);
                image.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Store the embedding; the image becomes `indexed`
    pub fn set_embedding(&self, image_id: ImageId, embedding: Vector) -> bool {
        let mut inner = self.inner.write();
        match inner.images.get_mut(&image_id) {
            Some(image) => {
                image.embedding = Some(embedding);
                image.analysis_status = AnalysisStatus::Indexed;
                image.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Drop an image and release its tags
    pub fn remove(&self, image_id: ImageId) -> Option<Image> {
        let mut inner = self.inner.write();
        let image = inner.images.remove(&image_id)?;
        inner.by_hash.remove(&image.content_hash);
        for tag in &image.tags {
            inner.release_tag(tag);
        }
        Some(image)
    }

    pub fn tag(&self, name: &str) -> Option<Tag> {
        let name = normalize_tag(name)?;
        self.inner.read().tags.get(&name).cloned()
    }

    /// Tags in use, most used first
    pub fn tags(&self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .inner
            .read()
            .tags
            .values()
            .filter(|t| t.usage_count > 0)
            .cloned()
            .collect();
        tags.sort_by(|a, b| b.usage_count.cmp(&a.usage_count).then(a.name.cmp(&b.name)));
        tags
    }
}
