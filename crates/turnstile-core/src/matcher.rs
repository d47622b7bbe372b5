//! Nearest-identity search over the enrolled gallery.

use crate::gallery::Gallery;
use crate::types::{Embedding, IdentityId, MatchResult};

/// Strategy for comparing a query embedding against a gallery of enrolled identities.
pub trait Matcher {
    fn compare(&self, query: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Top-k averaged cosine matcher.
///
/// An identity's score is the mean of its `k` best similarities to the
/// query, with `k = min(top_k, stored embeddings)`. One lucky reference can
/// not carry a match on its own, and weak enrollment photos do not dilute it.
///
/// Identities are visited in ascending id order and a later identity only
/// wins with a strictly greater score, so ties go to the lowest id.
#[derive(Debug, Clone)]
pub struct TopKMatcher {
    pub top_k: usize,
}

impl Default for TopKMatcher {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

impl TopKMatcher {
    pub fn new(top_k: usize) -> Self {
        Self { top_k: top_k.max(1) }
    }

    /// Match a raw, unvalidated vector. Malformed input degrades to
    /// `Unmatched { score: 0.0 }` instead of failing.
    pub fn identify(&self, raw: &[f32], dimension: usize, gallery: &Gallery, threshold: f32) -> MatchResult {
        match Embedding::normalize(raw, dimension) {
            Ok(query) => self.compare(&query, gallery, threshold),
            Err(e) => {
                tracing::debug!(error = %e, "query embedding rejected");
                MatchResult::Unmatched { score: 0.0 }
            }
        }
    }

    fn identity_score(&self, query: &Embedding, references: &[Embedding]) -> Option<f32> {
        if references.is_empty() {
            return None;
        }
        let mut sims: Vec<f32> = references.iter().map(|r| query.similarity(r)).collect();
        sims.sort_unstable_by(|a, b| b.total_cmp(a));
        let k = self.top_k.max(1).min(sims.len());
        Some(sims[..k].iter().sum::<f32>() / k as f32)
    }
}

impl Matcher for TopKMatcher {
    fn compare(&self, query: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult {
        let mut best: Option<(IdentityId, f32)> = None;

        for (&identity, references) in gallery {
            let Some(score) = self.identity_score(query, references) else {
                continue;
            };
            let is_better = match best {
                None => true,
                Some((_, best_score)) => score > best_score,
            };
            if is_better {
                best = Some((identity, score));
            }
        }

        match best {
            Some((identity, score)) if score >= threshold => MatchResult::Matched {
                identity,
                score,
                profile: None,
            },
            Some((_, score)) => MatchResult::Unmatched { score },
            None => MatchResult::Unmatched { score: 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 512;

    fn emb(raw: &[f32]) -> Embedding {
        Embedding::normalize(raw, raw.len()).unwrap()
    }

    /// Unit basis vector with a small, deterministic perturbation.
    fn around(axis: usize, jitter: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[axis] = 1.0;
        v[(axis + 1 + jitter) % DIM] = 0.05 * ((jitter % 5) as f32 + 1.0);
        v
    }

    fn gallery(entries: &[(IdentityId, Vec<Vec<f32>>)]) -> Gallery {
        entries
            .iter()
            .map(|(id, vs)| (*id, vs.iter().map(|v| Embedding::normalize(v, DIM).unwrap()).collect()))
            .collect()
    }

    #[test]
    fn test_self_match_meets_threshold() {
        let g = gallery(&[
            (1, (0..8).map(|j| around(0, j)).collect()),
            (2, (0..3).map(|j| around(100, j)).collect()),
        ]);
        let m = TopKMatcher::default();
        for (id, refs) in &g {
            for r in refs {
                let result = m.compare(r, &g, 0.6);
                assert_eq!(result.identity(), Some(*id));
                assert!(result.score() >= 0.6);
            }
        }
    }

    #[test]
    fn test_orthogonal_clusters_never_cross_match() {
        let g = gallery(&[
            (1, (0..6).map(|j| around(0, j)).collect()),
            (2, (0..6).map(|j| around(256, j)).collect()),
        ]);
        let m = TopKMatcher::default();
        for j in 0..10 {
            assert_eq!(m.identify(&around(0, j + 20), DIM, &g, 0.6).identity(), Some(1));
            assert_eq!(m.identify(&around(256, j + 20), DIM, &g, 0.6).identity(), Some(2));
        }
        // Probe orthogonal to both clusters
        let result = m.identify(&around(400, 0), DIM, &g, 0.6);
        assert!(!result.is_match());
    }

    #[test]
    fn test_top_k_average_ignores_outliers() {
        // Five good references and one outlier: with k=5 the outlier is excluded.
        let query = emb(&[1.0, 0.0]);
        let mut refs: Vec<Embedding> = (0..5).map(|_| emb(&[1.0, 0.0])).collect();
        refs.push(emb(&[0.0, 1.0]));
        let g: Gallery = [(1, refs)].into_iter().collect();

        let result = TopKMatcher::new(5).compare(&query, &g, 0.6);
        assert!((result.score() - 1.0).abs() < 1e-6);

        // With k larger than the set, the full mean is used.
        let result = TopKMatcher::new(10).compare(&query, &g, 0.6);
        assert!((result.score() - 5.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_below_threshold_carries_best_score() {
        let query = emb(&[1.0, 1.0]);
        let g: Gallery = [(1, vec![emb(&[1.0, 0.0])])].into_iter().collect();
        let result = TopKMatcher::default().compare(&query, &g, 0.9);
        match result {
            MatchResult::Unmatched { score } => {
                assert!((score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5)
            }
            other => panic!("expected unmatched, got {other:?}"),
        }
    }

    #[test]
    fn test_tie_goes_to_lowest_identity() {
        let query = emb(&[1.0, 0.0]);
        let g: Gallery = [
            (30, vec![emb(&[1.0, 0.0])]),
            (4, vec![emb(&[1.0, 0.0])]),
            (12, vec![emb(&[1.0, 0.0])]),
        ]
        .into_iter()
        .collect();
        let result = TopKMatcher::default().compare(&query, &g, 0.5);
        assert_eq!(result.identity(), Some(4));
    }

    #[test]
    fn test_empty_gallery() {
        let query = emb(&[1.0, 0.0]);
        let result = TopKMatcher::default().compare(&query, &Gallery::new(), 0.5);
        assert_eq!(result, MatchResult::Unmatched { score: 0.0 });
    }

    #[test]
    fn test_malformed_query_degrades_to_no_match() {
        let g = gallery(&[(1, vec![around(0, 0)])]);
        let m = TopKMatcher::default();
        assert_eq!(m.identify(&[1.0, 2.0], DIM, &g, 0.6), MatchResult::Unmatched { score: 0.0 });
        assert_eq!(m.identify(&vec![0.0; DIM], DIM, &g, 0.6), MatchResult::Unmatched { score: 0.0 });
    }
}
