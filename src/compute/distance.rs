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

//! Cosine similarity with an AVX2 fast path
//!
//! The AVX2 path is only taken when the CPU reports `avx2` and `fma` at runtime;
//! everything else goes through the unrolled scalar loop.

/// Cosine similarity calculator
#[derive(Debug, Clone, Copy)]
pub struct CosineDistance {
    use_simd: bool,
}

impl Default for CosineDistance {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CosineDistance {
    pub fn new(use_simd: bool) -> Self {
        Self { use_simd }
    }

    /// Cosine similarity in [-1, 1]; `None` when dimensions differ or a vector is empty.
    /// Zero-norm vectors score 0.
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> Option<f32> {
        if a.len() != b.len() || a.is_empty() {
            return None;
        }

        #[cfg(target_arch = "x86_64")]
        {
            if self.use_simd
                && a.len() >= 8
                && is_x86_feature_detected!("avx2")
                && is_x86_feature_detected!("fma")
            {
                // SAFETY: feature availability checked above
                return Some(unsafe { cosine_similarity_avx(a, b) });
            }
        }

        Some(cosine_similarity_scalar(a, b))
    }
}

/// Cosine similarity using the default calculator
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    CosineDistance::default().similarity(a, b)
}

fn finish(dot_product: f32, norm_a: f32, norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot_product / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
    }
}

fn cosine_similarity_scalar(a: &[f32], b: &[f32]) -> f32 {
    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    // Manual loop unrolling for better performance
    let len = a.len();
    let chunks = len / 4;

    for i in 0..chunks {
        let base = i * 4;
        for j in base..base + 4 {
            dot_product += a[j] * b[j];
            norm_a += a[j] * a[j];
            norm_b += b[j] * b[j];
        }
    }

    // Handle remainder
    for i in (chunks * 4)..len {
        dot_product += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    finish(dot_product, norm_a, norm_b)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn cosine_similarity_avx(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let len = a.len();
    let chunks = len / 8;

    let mut dot_sum = _mm256_setzero_ps();
    let mut norm_a_sum = _mm256_setzero_ps();
    let mut norm_b_sum = _mm256_setzero_ps();

    // Process 8 elements at a time using AVX2
    for i in 0..chunks {
        let offset = i * 8;

        let va = _mm256_loadu_ps(a.as_ptr().add(offset));
        let vb = _mm256_loadu_ps(b.as_ptr().add(offset));

        dot_sum = _mm256_fmadd_ps(va, vb, dot_sum);
        norm_a_sum = _mm256_fmadd_ps(va, va, norm_a_sum);
        norm_b_sum = _mm256_fmadd_ps(vb, vb, norm_b_sum);
    }

    let mut dot_product = horizontal_sum_avx(dot_sum);
    let mut norm_a = horizontal_sum_avx(norm_a_sum);
    let mut norm_b = horizontal_sum_avx(norm_b_sum);

    for i in (chunks * 8)..len {
        dot_product += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    finish(dot_product, norm_a, norm_b)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn horizontal_sum_avx(v: std::arch::x86_64::__m256) -> f32 {
    use std::arch::x86_64::*;

    let hi = _mm256_extractf128_ps(v, 1);
    let lo = _mm256_castps256_ps128(v);
    let sum_quad = _mm_add_ps(hi, lo);

    let hi64 = _mm_movehl_ps(sum_quad, sum_quad);
    let sum_dual = _mm_add_ps(sum_quad, hi64);

    let hi32 = _mm_shuffle_ps(sum_dual, sum_dual, 0x1);
    let sum = _mm_add_ss(sum_dual, hi32);

    _mm_cvtss_f32(sum)
}
