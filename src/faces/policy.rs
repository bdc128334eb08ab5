use serde::Serialize;

/// What to do with a face given its best match similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Below the suggestion threshold: leave unresolved
    Ignore,
    /// Offer the match to a human, persist nothing
    Suggest,
    /// Link the face to the matched person and index it
    AutoTag,
}

/// Threshold policy over a similarity score in `[0, 100]`.
///
/// Both thresholds are inclusive lower bounds: `suggest <= s < autotag`
/// suggests and `s >= autotag` auto-tags. NaN is ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionPolicy {
    pub suggest_threshold: f64,
    pub autotag_threshold: f64,
}

impl ResolutionPolicy {
    pub fn new(suggest_threshold: f64, autotag_threshold: f64) -> Self {
        Self {
            suggest_threshold,
            autotag_threshold,
        }
    }

    pub fn resolve(&self, similarity: f64) -> Resolution {
        if similarity >= self.autotag_threshold {
            Resolution::AutoTag
        } else if similarity >= self.suggest_threshold {
            Resolution::Suggest
        } else {
            Resolution::Ignore
        }
    }
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self::new(80.0, 90.0)
    }
}
