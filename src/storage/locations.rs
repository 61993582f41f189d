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

//! Image location table
//!
//! One row per (image, endpoint) pair, so there is never more than one
//! `present` location for a pair. Status changes go through compare-and-set
//! style methods under a single write lock.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::core::{ContentHash, EndpointId, ImageId, ImageLocation, LocationStatus};

/// Result of trying to claim a location for transfer
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// Row is now `syncing`; the caller owns the transfer
    Claimed,
    /// Already `present`; nothing to do
    AlreadyPresent,
    /// Another transfer holds the row in `syncing`
    InFlight,
}

#[derive(Default)]
pub struct LocationTable {
    rows: RwLock<HashMap<(ImageId, EndpointId), ImageLocation>>,
}

impl LocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the row to `syncing` unless it is already present or in flight
    pub fn claim(
        &self,
        image_id: ImageId,
        endpoint_id: &str,
        content_hash: &ContentHash,
    ) -> ClaimOutcome {
        let mut rows = self.rows.write();
        let key = (image_id, endpoint_id.to_string());
        match rows.get_mut(&key) {
            Some(row) if row.status == LocationStatus::Present => ClaimOutcome::AlreadyPresent,
            Some(row) if row.status == LocationStatus::Syncing => ClaimOutcome::InFlight,
            Some(row) => {
                row.status = LocationStatus::Syncing;
                row.updated_at = Utc::now();
                ClaimOutcome::Claimed
            }
            None => {
                rows.insert(
                    key,
                    ImageLocation {
                        image_id,
                        endpoint_id: endpoint_id.to_string(),
                        object_key: content_hash.object_key(),
                        status: LocationStatus::Syncing,
                        content_hash: content_hash.clone(),
                        updated_at: Utc::now(),
                    },
                );
                ClaimOutcome::Claimed
            }
        }
    }

    /// Set the status of an existing row; returns false when the row is unknown
    pub fn set_status(&self, image_id: ImageId, endpoint_id: &str, status: LocationStatus) -> bool {
        let mut rows = self.rows.write();
        match rows.get_mut(&(image_id, endpoint_id.to_string())) {
            Some(row) => {
                row.status = status;
                row.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, image_id: ImageId, endpoint_id: &str) -> Option<ImageLocation> {
        self.rows
            .read()
            .get(&(image_id, endpoint_id.to_string()))
            .cloned()
    }

    pub fn status(&self, image_id: ImageId, endpoint_id: &str) -> Option<LocationStatus> {
        self.get(image_id, endpoint_id).map(|row| row.status)
    }

    /// All rows for an image, sorted by endpoint id
    pub fn for_image(&self, image_id: ImageId) -> Vec<ImageLocation> {
        let mut rows: Vec<_> = self
            .rows
            .read()
            .values()
            .filter(|row| row.image_id == image_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.endpoint_id.cmp(&b.endpoint_id));
        rows
    }

    /// Endpoints holding a `present` copy of the image
    pub fn present_endpoints(&self, image_id: ImageId) -> Vec<EndpointId> {
        self.for_image(image_id)
            .into_iter()
            .filter(|row| row.status == LocationStatus::Present)
            .map(|row| row.endpoint_id)
            .collect()
    }

    /// Drop one row; returns the removed row
    pub fn remove(&self, image_id: ImageId, endpoint_id: &str) -> Option<ImageLocation> {
        self.rows.write().remove(&(image_id, endpoint_id.to_string()))
    }

    /// Drop every row of an image
    pub fn remove_image(&self, image_id: ImageId) -> usize {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|(image, _), _| *image != image_id);
        before - rows.len()
    }
}
