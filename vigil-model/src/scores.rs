//! Classifier output and the two fields derived from it.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Content categories reported by the classification model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Drawing,
    Hentai,
    Neutral,
    Porn,
    Sexy,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Drawing,
        Category::Hentai,
        Category::Neutral,
        Category::Porn,
        Category::Sexy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Drawing => "drawing",
            Category::Hentai => "hentai",
            Category::Neutral => "neutral",
            Category::Porn => "porn",
            Category::Sexy => "sexy",
        }
    }

    /// Categories that count towards the explicit-content flag.
    pub fn is_explicit(self) -> bool {
        matches!(self, Category::Hentai | Category::Porn)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "drawing" | "drawings" => Ok(Category::Drawing),
            "hentai" => Ok(Category::Hentai),
            "neutral" => Ok(Category::Neutral),
            "porn" | "pornographic" => Ok(Category::Porn),
            "sexy" => Ok(Category::Sexy),
            _ => Err(ModelError::UnknownVariant(raw.to_string())),
        }
    }
}

/// Raw per-category probabilities as produced by the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    pub drawing: f32,
    pub hentai: f32,
    pub neutral: f32,
    pub porn: f32,
    pub sexy: f32,
}

impl Probabilities {
    pub fn get(&self, category: Category) -> f32 {
        match category {
            Category::Drawing => self.drawing,
            Category::Hentai => self.hentai,
            Category::Neutral => self.neutral,
            Category::Porn => self.porn,
            Category::Sexy => self.sexy,
        }
    }

    /// Build from a label -> probability map. Labels are matched case
    /// insensitively; unknown labels are ignored, missing ones are an error.
    pub fn from_map(map: &BTreeMap<String, f32>) -> Result<Self> {
        let mut found: BTreeMap<Category, f32> = BTreeMap::new();
        for (label, value) in map {
            if let Ok(category) = label.parse::<Category>() {
                found.insert(category, *value);
            }
        }

        let mut take = |category: Category| -> Result<f32> {
            let value = found
                .remove(&category)
                .ok_or(ModelError::MissingCategory(category.as_str()))?;
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ModelError::InvalidProbability {
                    category: category.as_str(),
                    value,
                });
            }
            Ok(value)
        };

        Ok(Self {
            drawing: take(Category::Drawing)?,
            hentai: take(Category::Hentai)?,
            neutral: take(Category::Neutral)?,
            porn: take(Category::Porn)?,
            sexy: take(Category::Sexy)?,
        })
    }

    pub fn to_map(&self) -> BTreeMap<String, f32> {
        Category::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), self.get(*c)))
            .collect()
    }

    /// Arg-max category. Ties resolve to the first category in
    /// [`Category::ALL`] order.
    pub fn top(&self) -> Category {
        let mut best = Category::ALL[0];
        for category in Category::ALL.into_iter().skip(1) {
            if self.get(category) > self.get(best) {
                best = category;
            }
        }
        best
    }

    /// Combined probability of the explicit categories.
    pub fn explicit(&self) -> f32 {
        Category::ALL
            .into_iter()
            .filter(|c| c.is_explicit())
            .map(|c| self.get(c))
            .sum()
    }
}

/// Classification result handed back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub scores: Probabilities,
    pub top_label: Category,
    pub flagged: bool,
}

impl CategoryScores {
    /// Attach the derived fields; the probabilities are kept as-is.
    pub fn derive(scores: Probabilities, flag_threshold: f32) -> Self {
        Self {
            top_label: scores.top(),
            flagged: scores.explicit() >= flag_threshold,
            scores,
        }
    }
}
