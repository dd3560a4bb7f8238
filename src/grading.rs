use serde::Deserialize;
use thiserror::Error;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// One band of the letter scale: scores at or above `min` get `label`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Band {
    pub min: f64,
    pub label: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum ScaleError {
    #[error("grading scale must have at least one band")]
    Empty,
    #[error("grading bands must be listed from highest to lowest (at {0:?})")]
    NotDescending(String),
    #[error("lowest grading band must start at 0")]
    NoFloor,
    #[error("grading band {0:?} has an empty label")]
    EmptyLabel(f64),
}

/// Maps a 0..=100 score to a letter label.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeScale {
    bands: Vec<Band>,
}

impl Default for GradeScale {
    fn default() -> Self {
        let bands = [(90.0, "A"), (80.0, "B"), (70.0, "C"), (60.0, "D"), (0.0, "F")]
            .into_iter()
            .map(|(min, label)| Band {
                min,
                label: label.to_string(),
            })
            .collect();
        Self { bands }
    }
}

impl GradeScale {
    pub fn new(bands: Vec<Band>) -> Result<Self, ScaleError> {
        if bands.is_empty() {
            return Err(ScaleError::Empty);
        }
        for b in &bands {
            if b.label.trim().is_empty() {
                return Err(ScaleError::EmptyLabel(b.min));
            }
        }
        for w in bands.windows(2) {
            if w[1].min >= w[0].min {
                return Err(ScaleError::NotDescending(w[1].label.clone()));
            }
        }
        if bands.last().map(|b| b.min) != Some(MIN_SCORE) {
            return Err(ScaleError::NoFloor);
        }
        Ok(Self { bands })
    }

    pub fn label(&self, score: f64) -> &str {
        self.bands
            .iter()
            .find(|b| score >= b.min)
            .or(self.bands.last())
            .map(|b| b.label.as_str())
            .unwrap_or_default()
    }
}

pub fn score_in_range(score: f64) -> bool {
    score.is_finite() && (MIN_SCORE..=MAX_SCORE).contains(&score)
}
