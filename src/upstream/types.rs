use serde::Serialize;

/// Seed selection for one generation attempt. The OpenAI-facing API uses -1
/// as a "pick one for me" sentinel; internally that is an explicit variant so
/// nothing ever does arithmetic on the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedSpec {
    Fixed(i64),
    Randomized,
}

impl SeedSpec {
    pub fn from_request(seed: i64) -> Self {
        if seed == -1 {
            Self::Randomized
        } else {
            Self::Fixed(seed)
        }
    }

    /// Per-slot seed: fixed base seeds shift by the slot index, randomized
    /// stays randomized (each attempt draws its own).
    pub fn offset(self, index: i64) -> Self {
        match self {
            Self::Fixed(seed) => Self::Fixed(seed + index),
            Self::Randomized => Self::Randomized,
        }
    }
}

/// Parameters shared by every attempt in a batch.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
}

/// One finished generation attempt. `media_url` points at upstream-hosted
/// storage and is not directly servable to browsers; callers rewrite it
/// through the image relay before handing it out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub media_url: String,
    pub seed: i64,
    pub duration: f64,
}
