//! Content generation: the interface the pipe operators use to reach LLM,
//! image-generation, OCR and templating providers.

pub mod error;
pub mod imgg;
pub mod llm;
pub mod ocr;
pub mod templating;

#[cfg(feature = "llm")]
pub mod ollama;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::concept::StructureClass;
use crate::core::error::PipelexError;
use crate::core::stuff_content::StuffContent;
use crate::mission::job_metadata::JobMetadata;

use imgg::{GeneratedImage, ImggJobParams, ImggPrompt};
use llm::{LlmPrompt, LlmSetting};
use ocr::{OcrInput, OcrJobParams, OcrOutput};
use templating::{Jinja2TemplateCategory, PromptingStyle};

/// Builds the second-stage prompt of a "text then object" generation from
/// the arguments produced by the first stage (e.g. `preliminary_text`).
#[async_trait]
pub trait LlmPromptFactory: Send + Sync {
    async fn make_llm_prompt_from_args(&self, arg_dict: Map<String, Value>) -> Result<LlmPrompt, PipelexError>;
}

/// Everything a pipe operator can ask of a provider.
///
/// Each call receives job metadata already stamped by the caller through
/// [`JobMetadata::for_content_generation`].
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn make_llm_text(
        &self,
        job_metadata: &JobMetadata,
        llm_setting_main: &LlmSetting,
        llm_prompt_for_text: &LlmPrompt,
    ) -> Result<String, PipelexError>;

    async fn make_object_direct(
        &self,
        job_metadata: &JobMetadata,
        object_class: &StructureClass,
        llm_setting_for_object: &LlmSetting,
        llm_prompt_for_object: &LlmPrompt,
    ) -> Result<StuffContent, PipelexError>;

    async fn make_text_then_object(
        &self,
        job_metadata: &JobMetadata,
        object_class: &StructureClass,
        llm_setting_main: &LlmSetting,
        llm_setting_for_object: &LlmSetting,
        llm_prompt_for_text: &LlmPrompt,
        llm_prompt_factory_for_object: Option<&dyn LlmPromptFactory>,
    ) -> Result<StuffContent, PipelexError>;

    async fn make_object_list_direct(
        &self,
        job_metadata: &JobMetadata,
        object_class: &StructureClass,
        llm_setting_for_object_list: &LlmSetting,
        llm_prompt_for_object_list: &LlmPrompt,
        nb_items: Option<usize>,
    ) -> Result<Vec<StuffContent>, PipelexError>;

    async fn make_text_then_object_list(
        &self,
        job_metadata: &JobMetadata,
        object_class: &StructureClass,
        llm_setting_main: &LlmSetting,
        llm_setting_for_object_list: &LlmSetting,
        llm_prompt_for_text: &LlmPrompt,
        llm_prompt_factory_for_object_list: Option<&dyn LlmPromptFactory>,
        nb_items: Option<usize>,
    ) -> Result<Vec<StuffContent>, PipelexError>;

    async fn make_single_image(
        &self,
        job_metadata: &JobMetadata,
        imgg_handle: &str,
        imgg_prompt: &ImggPrompt,
        imgg_job_params: &ImggJobParams,
    ) -> Result<GeneratedImage, PipelexError>;

    async fn make_image_list(
        &self,
        job_metadata: &JobMetadata,
        imgg_handle: &str,
        imgg_prompt: &ImggPrompt,
        nb_images: usize,
        imgg_job_params: &ImggJobParams,
    ) -> Result<Vec<GeneratedImage>, PipelexError>;

    async fn make_jinja2_text(
        &self,
        job_metadata: &JobMetadata,
        context: &Map<String, Value>,
        jinja2_name: Option<&str>,
        jinja2: Option<&str>,
        prompting_style: Option<&PromptingStyle>,
        template_category: Jinja2TemplateCategory,
    ) -> Result<String, PipelexError>;

    /// Source of a named template, returned without rendering.
    fn get_template_source(&self, jinja2_name: &str) -> Result<String, PipelexError>;

    async fn make_ocr_extract_pages(
        &self,
        job_metadata: &JobMetadata,
        ocr_input: &OcrInput,
        ocr_handle: &str,
        ocr_job_params: &OcrJobParams,
    ) -> Result<OcrOutput, PipelexError>;
}
