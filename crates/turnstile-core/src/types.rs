use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identity identifier. Unique and immutable once assigned by the directory.
pub type IdentityId = i64;

/// Why a raw vector was refused as an [`Embedding`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidEmbedding {
    #[error("expected {expected}-dim embedding, got {actual}")]
    WrongDimension { expected: usize, actual: usize },
    #[error("embedding has zero norm")]
    ZeroNorm,
    #[error("embedding contains non-finite values")]
    NonFinite,
}

/// Unit-normalized face embedding (typically 512-dimensional).
///
/// Can only be built through [`Embedding::normalize`], so every value of this
/// type has the configured dimensionality and an L2 norm of 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Validate and L2-normalize a raw vector.
    ///
    /// Rejects vectors whose length differs from `dimension` and the zero
    /// vector, which has no direction and cannot be matched.
    pub fn normalize(raw: &[f32], dimension: usize) -> Result<Self, InvalidEmbedding> {
        if raw.len() != dimension {
            return Err(InvalidEmbedding::WrongDimension {
                expected: dimension,
                actual: raw.len(),
            });
        }

        if raw.iter().any(|x| !x.is_finite()) {
            return Err(InvalidEmbedding::NonFinite);
        }

        // f64 accumulation: squares of f32 extremes neither underflow nor overflow.
        let norm = raw
            .iter()
            .map(|&x| f64::from(x) * f64::from(x))
            .sum::<f64>()
            .sqrt();
        if norm <= 0.0 {
            return Err(InvalidEmbedding::ZeroNorm);
        }

        Ok(Self {
            values: raw.iter().map(|&x| (f64::from(x) / norm) as f32).collect(),
        })
    }

    /// Cosine similarity in [-1, 1]. Both sides are unit vectors, so this is
    /// the plain dot product.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

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

/// A camera frame as handed over by the acquisition loop.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Packed pixel data; layout is agreed between the camera and the detector.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

/// Directory data attached to an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: IdentityId,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub age: u32,
    pub registered_at: String,
    pub photo_count: u32,
    pub active: bool,
}

impl Profile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Outcome of matching one query embedding against the enrolled gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchResult {
    Matched {
        identity: IdentityId,
        /// Top-k averaged cosine similarity.
        score: f32,
        profile: Option<Profile>,
    },
    /// No identity reached the threshold. `score` is the best score seen,
    /// so near-misses can still be logged.
    Unmatched { score: f32 },
}

impl MatchResult {
    pub fn identity(&self) -> Option<IdentityId> {
        match self {
            MatchResult::Matched { identity, .. } => Some(*identity),
            MatchResult::Unmatched { .. } => None,
        }
    }

    pub fn score(&self) -> f32 {
        match self {
            MatchResult::Matched { score, .. } | MatchResult::Unmatched { score } => *score,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }
}

/// Kind of an access-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Entry,
    Exit,
    /// Legacy single-direction grant; decided on as if it were an entry.
    Permitted,
    Denied,
    Unknown,
}

impl EventKind {
    /// Kinds that make up an identity's entry/exit history.
    pub const PRESENCE: [EventKind; 3] = [EventKind::Entry, EventKind::Exit, EventKind::Permitted];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Entry => "entry",
            EventKind::Exit => "exit",
            EventKind::Permitted => "permitted",
            EventKind::Denied => "denied",
            EventKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(EventKind::Entry),
            "exit" => Ok(EventKind::Exit),
            "permitted" => Ok(EventKind::Permitted),
            "denied" => Ok(EventKind::Denied),
            "unknown" => Ok(EventKind::Unknown),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}

/// An access event, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessEvent {
    /// `None` for unknown faces.
    pub identity: Option<IdentityId>,
    pub kind: EventKind,
    pub timestamp: NaiveDateTime,
    pub confidence: Option<f32>,
}

/// The most recent logged event for an identity, as read back from the log.
///
/// The timestamp is kept as stored text: history written by older tools
/// may not parse, and the decider has to cope with that.
#[derive(Debug, Clone, PartialEq)]
pub struct LastEvent {
    pub kind: EventKind,
    pub recorded_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_norm() {
        let raw: Vec<f32> = (0..512).map(|i| (i as f32 * 0.37).sin() * 3.0).collect();
        let emb = Embedding::normalize(&raw, 512).unwrap();
        let norm: f32 = emb.values().iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm = {norm}");
        assert_eq!(emb.dimension(), 512);
    }

    #[test]
    fn test_normalize_extreme_magnitudes() {
        for magnitude in [1e-40f32, 1e-25, 1e-10, 1.0, 1e10, 1e20, 1e38] {
            let raw: Vec<f32> = (0..512)
                .map(|i| if i % 3 == 0 { -magnitude } else { magnitude })
                .collect();
            let emb = Embedding::normalize(&raw, 512)
                .unwrap_or_else(|e| panic!("magnitude {magnitude}: {e}"));
            let norm: f32 = emb.values().iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4, "magnitude {magnitude}: norm = {norm}");
            assert!((emb.values()[1] - 1.0 / 512f32.sqrt()).abs() < 1e-4);
        }
    }

    #[test]
    fn test_normalize_single_tiny_component() {
        let mut raw = vec![0.0f32; 512];
        raw[7] = 1e-30;
        let emb = Embedding::normalize(&raw, 512).unwrap();
        assert!((emb.values()[7] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_rejects_zero_vector() {
        let raw = vec![0.0f32; 512];
        assert_eq!(Embedding::normalize(&raw, 512), Err(InvalidEmbedding::ZeroNorm));
    }

    #[test]
    fn test_normalize_rejects_wrong_dimension() {
        let raw = vec![1.0f32; 128];
        assert_eq!(
            Embedding::normalize(&raw, 512),
            Err(InvalidEmbedding::WrongDimension { expected: 512, actual: 128 })
        );
    }

    #[test]
    fn test_normalize_rejects_nan() {
        let mut raw = vec![1.0f32; 4];
        raw[2] = f32::NAN;
        assert_eq!(Embedding::normalize(&raw, 4), Err(InvalidEmbedding::NonFinite));
    }

    #[test]
    fn test_similarity_identical_and_orthogonal() {
        let a = Embedding::normalize(&[2.0, 0.0, 0.0], 3).unwrap();
        let b = Embedding::normalize(&[5.0, 0.0, 0.0], 3).unwrap();
        let c = Embedding::normalize(&[0.0, 1.0, 0.0], 3).unwrap();
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
        assert!(a.similarity(&c).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_opposite() {
        let a = Embedding::normalize(&[1.0, 0.0], 2).unwrap();
        let b = Embedding::normalize(&[-1.0, 0.0], 2).unwrap();
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_event_kind_round_trips_through_str() {
        for kind in [
            EventKind::Entry,
            EventKind::Exit,
            EventKind::Permitted,
            EventKind::Denied,
            EventKind::Unknown,
        ] {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("entrada".parse::<EventKind>().is_err());
    }
}
