use serde::{Deserialize, Serialize};

use crate::cogt::error::CogtError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImggPrompt {
    pub positive_text: String,
}

impl ImggPrompt {
    pub fn validate_before_execution(&self) -> Result<(), CogtError> {
        if self.positive_text.trim().is_empty() {
            return Err(CogtError::Prompt(
                "image generation prompt must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    Square,
    Landscape4By3,
    Landscape16By9,
    Portrait3By4,
    Portrait9By16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Png,
    Jpg,
    Webp,
}

/// A seed of `"auto"` lets the provider pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seed {
    Fixed(u64),
    Auto(AutoSeed),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoSeed {
    Auto,
}

impl Seed {
    pub fn auto() -> Self {
        Seed::Auto(AutoSeed::Auto)
    }

    pub fn resolve(&self) -> Option<u64> {
        match self {
            Seed::Fixed(seed) => Some(*seed),
            Seed::Auto(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImggJobParams {
    pub aspect_ratio: AspectRatio,
    pub nb_steps: Option<u32>,
    pub guidance_scale: f32,
    pub is_safety_checker_enabled: bool,
    pub safety_tolerance: u8,
    pub is_raw: bool,
    pub output_format: OutputFormat,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_forms() {
        let auto: Seed = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(auto.resolve(), None);
        let fixed: Seed = serde_json::from_str("42").unwrap();
        assert_eq!(fixed.resolve(), Some(42));
    }
}
