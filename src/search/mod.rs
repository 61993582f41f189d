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

//! Tag, vector and hybrid image retrieval

pub mod query;
pub mod ranker;
pub mod results;

pub use query::{SearchMode, SearchOrder, SearchQuery};
pub use ranker::{hybrid_score, tag_overlap_ratio, RetrievalRanker};
pub use results::{SearchHit, SearchResultSet};
