use serde::{Deserialize, Serialize};

use crate::cogt::imgg::{AspectRatio, OutputFormat, Seed};
use crate::core::error::PipelexError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeRunConfig {
    /// Maximum nesting depth of pipes in one run.
    pub pipe_stack_limit: usize,
    /// Maximum number of batch branches in flight at once.
    pub batch_max_concurrency: usize,
}

impl Default for PipeRunConfig {
    fn default() -> Self {
        Self {
            pipe_stack_limit: 20,
            batch_max_concurrency: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Caps how many list items a batch processes; the rest are skipped.
    pub applied_nb_items_limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConceptConfig {
    pub allow_implicit_concepts: bool,
}

impl Default for ConceptConfig {
    fn default() -> Self {
        Self {
            allow_implicit_concepts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureConfig {
    pub is_default_text_then_structure: bool,
    pub default_system_prompt_to_structure: String,
    pub default_prompt_template_to_structure: String,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            is_default_text_then_structure: false,
            default_system_prompt_to_structure:
                "You are a data modeling expert specialized in extracting structure from text.".to_string(),
            default_prompt_template_to_structure: "structure_from_preliminary_text_user".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImggParamDefaults {
    pub aspect_ratio: AspectRatio,
    pub nb_steps: Option<u32>,
    pub guidance_scale: f32,
    pub is_safety_checker_enabled: bool,
    pub safety_tolerance: u8,
    pub is_raw: bool,
    pub output_format: OutputFormat,
    pub seed: Seed,
}

impl Default for ImggParamDefaults {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::Square,
            nb_steps: None,
            guidance_scale: 3.5,
            is_safety_checker_enabled: true,
            safety_tolerance: 5,
            is_raw: false,
            output_format: OutputFormat::Png,
            seed: Seed::auto(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImggConfig {
    pub default_imgg_handle: String,
    pub param_defaults: ImggParamDefaults,
}

impl Default for ImggConfig {
    fn default() -> Self {
        Self {
            default_imgg_handle: "fal-ai/flux-pro".to_string(),
            param_defaults: ImggParamDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub default_ocr_handle: String,
    pub default_should_caption_images: bool,
    pub default_should_include_screenshots: bool,
    pub default_screenshots_dpi: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            default_ocr_handle: "mistral/mistral-ocr-latest".to_string(),
            default_should_caption_images: false,
            default_should_include_screenshots: false,
            default_screenshots_dpi: 300,
        }
    }
}

/// Runtime configuration of the engine.
///
/// Every section has sensible defaults; a partial JSON document only needs
/// to name what it overrides.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelexConfig {
    pub pipe_run: PipeRunConfig,
    pub tracker: TrackerConfig,
    pub concepts: ConceptConfig,
    pub structure: StructureConfig,
    pub imgg: ImggConfig,
    pub ocr: OcrConfig,
}

impl PipelexConfig {
    pub fn from_json_str(json: &str) -> Result<Self, PipelexError> {
        let config: PipelexConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelexError> {
        if self.pipe_run.batch_max_concurrency == 0 {
            return Err(PipelexError::Config(
                "pipe_run.batch_max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.pipe_run.pipe_stack_limit == 0 {
            return Err(PipelexError::Config(
                "pipe_run.pipe_stack_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_pipe_stack_limit(mut self, pipe_stack_limit: usize) -> Self {
        self.pipe_run.pipe_stack_limit = pipe_stack_limit;
        self
    }

    /// # Panics
    /// Panics if `max_concurrency` is 0.
    pub fn with_batch_max_concurrency(mut self, max_concurrency: usize) -> Self {
        assert!(max_concurrency > 0, "Max concurrency must be greater than 0");
        self.pipe_run.batch_max_concurrency = max_concurrency;
        self
    }

    pub fn with_nb_items_limit(mut self, limit: Option<usize>) -> Self {
        self.tracker.applied_nb_items_limit = limit;
        self
    }

    pub fn with_text_then_structure(mut self, enabled: bool) -> Self {
        self.structure.is_default_text_then_structure = enabled;
        self
    }

    pub fn with_implicit_concepts(mut self, allowed: bool) -> Self {
        self.concepts.allow_implicit_concepts = allowed;
        self
    }
}
