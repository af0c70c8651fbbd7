use serde::{Deserialize, Serialize};

/// Dimensionality of the ArcFace identity vectors. Every stored and probe
/// vector must have exactly this length; anything else is data corruption.
pub const EMBEDDING_DIM: usize = 512;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face identity vector (512-dimensional, L2-normalized at extraction time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Whether this vector has the expected dimensionality.
    pub fn has_expected_dim(&self) -> bool {
        self.values.len() == EMBEDDING_DIM
    }

    /// Cosine similarity between two embeddings, in [-1, 1]. Higher is more
    /// similar. A zero-norm operand yields 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// One stored roster sample: an identity key and one of its embeddings.
/// Identities own several independent samples; they are never averaged.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity_key: String,
    pub embedding: Embedding,
}

/// Result of resolving a probe embedding against the roster.
///
/// `identity_key` is `None` when the best similarity fell below the
/// threshold; `similarity` still carries the best score observed so callers
/// can tell "almost matched" from "no face at all".
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub identity_key: Option<String>,
    pub similarity: f32,
}

/// Strategy for resolving a probe embedding against stored roster vectors.
pub trait Matcher {
    fn resolve(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchOutcome;
}

/// Cosine-similarity matcher: a linear scan over every stored vector.
///
/// O(N·D) per call, which is fine for rosters of tens to low hundreds of
/// identities. Exact score ties are broken by the lowest identity key so the
/// outcome never depends on gallery iteration order. A threshold hit is
/// inclusive (`>=`).
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn resolve(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchOutcome {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_key: Option<&str> = None;

        for entry in gallery {
            // Corrupt sample (wrong dimensionality): skip, never abort the scan.
            if entry.embedding.values.len() != probe.values.len() {
                tracing::warn!(
                    identity_key = %entry.identity_key,
                    got = entry.embedding.values.len(),
                    expected = probe.values.len(),
                    "skipping stored vector with mismatched dimensionality"
                );
                continue;
            }

            let sim = probe.similarity(&entry.embedding);
            let replaces = match best_key {
                None => true,
                Some(key) => {
                    sim > best_sim
                        || (sim == best_sim && entry.identity_key.as_str() < key)
                }
            };
            if replaces {
                best_sim = sim;
                best_key = Some(&entry.identity_key);
            }
        }

        match best_key {
            Some(key) if best_sim >= threshold => MatchOutcome {
                identity_key: Some(key.to_string()),
                similarity: best_sim,
            },
            _ => MatchOutcome {
                identity_key: None,
                similarity: if best_sim == f32::NEG_INFINITY { 0.0 } else { best_sim },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            identity_key: key.into(),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_similarity_identical_is_one() {
        let a = Embedding::new(vec![0.6, 0.8, 0.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_resolve_empty_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let outcome = CosineMatcher.resolve(&probe, &[], 0.7);
        assert!(outcome.identity_key.is_none());
        assert_eq!(outcome.similarity, 0.0);
    }

    #[test]
    fn test_resolve_picks_best_across_all_samples() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            entry("B02", vec![0.0, 1.0, 0.0]),
            entry("C03", vec![0.7, 0.7, 0.0]),
            entry("A01", vec![1.0, 0.0, 0.0]),
        ];
        let outcome = CosineMatcher.resolve(&probe, &gallery, 0.7);
        assert_eq!(outcome.identity_key.as_deref(), Some("A01"));
        assert!((outcome.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_resolve_below_threshold_reports_best_score() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![entry("A01", vec![0.7, 0.7])];
        let outcome = CosineMatcher.resolve(&probe, &gallery, 0.9);
        assert!(outcome.identity_key.is_none());
        // Caller still learns how close the best candidate came.
        assert!((outcome.similarity - 0.7071).abs() < 1e-3);
    }

    #[test]
    fn test_resolve_threshold_is_inclusive() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![entry("A01", vec![1.0, 0.0])];
        let outcome = CosineMatcher.resolve(&probe, &gallery, 1.0);
        assert_eq!(outcome.identity_key.as_deref(), Some("A01"));
    }

    #[test]
    fn test_resolve_tie_breaks_by_lowest_key() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![
            entry("B02", vec![2.0, 0.0]),
            entry("A01", vec![1.0, 0.0]),
        ];
        // Both candidates score exactly 1.0; the lower key must win
        // regardless of iteration order.
        let outcome = CosineMatcher.resolve(&probe, &gallery, 0.5);
        assert_eq!(outcome.identity_key.as_deref(), Some("A01"));

        let reversed: Vec<_> = gallery.into_iter().rev().collect();
        let outcome = CosineMatcher.resolve(&probe, &reversed, 0.5);
        assert_eq!(outcome.identity_key.as_deref(), Some("A01"));
    }

    #[test]
    fn test_resolve_order_independent() {
        let probe = Embedding::new(vec![0.9, 0.1, 0.0]);
        let gallery = vec![
            entry("A01", vec![1.0, 0.0, 0.0]),
            entry("B02", vec![0.0, 1.0, 0.0]),
            entry("C03", vec![0.5, 0.5, 0.0]),
        ];
        let forward = CosineMatcher.resolve(&probe, &gallery, 0.3);
        let reversed: Vec<_> = gallery.into_iter().rev().collect();
        let backward = CosineMatcher.resolve(&probe, &reversed, 0.3);
        assert_eq!(forward.identity_key, backward.identity_key);
        assert_eq!(forward.similarity, backward.similarity);
    }

    #[test]
    fn test_resolve_skips_corrupt_vector() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            entry("X99", vec![1.0]), // wrong dimensionality
            entry("A01", vec![1.0, 0.0, 0.0]),
        ];
        let outcome = CosineMatcher.resolve(&probe, &gallery, 0.7);
        assert_eq!(outcome.identity_key.as_deref(), Some("A01"));
    }

    #[test]
    fn test_resolve_all_corrupt_behaves_like_empty() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![entry("X99", vec![1.0])];
        let outcome = CosineMatcher.resolve(&probe, &gallery, 0.1);
        assert!(outcome.identity_key.is_none());
        assert_eq!(outcome.similarity, 0.0);
    }
}
