//! Ollama content generator for local inference.
//!
//! Text and structured generation go through the `/api/chat` endpoint, the
//! structured calls in JSON mode. Image generation and OCR are not offered
//! by Ollama and fail with a capability error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::cogt::error::CogtError;
use crate::cogt::imgg::{GeneratedImage, ImggJobParams, ImggPrompt};
use crate::cogt::llm::{LlmPrompt, LlmSetting, PromptImage};
use crate::cogt::ocr::{OcrInput, OcrJobParams, OcrOutput};
use crate::cogt::templating::{Jinja2Library, Jinja2TemplateCategory, PromptingStyle, STRUCTURE_FROM_PRELIMINARY_TEXT};
use crate::cogt::{ContentGenerator, LlmPromptFactory};
use crate::core::concept::StructureClass;
use crate::core::error::PipelexError;
use crate::core::stuff_content::StuffContent;
use crate::mission::job_metadata::JobMetadata;
use crate::mission::report::{InferenceReportManager, LlmTokensUsage};

/// Configuration for the Ollama server
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Server URL (default: http://localhost:11434)
    pub host: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaMessage {
    pub role: String,
    pub content: String,
    /// Base64-encoded images, for vision models.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl OllamaMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            images,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

/// [`ContentGenerator`] backed by an Ollama server.
pub struct OllamaContentGenerator {
    client: reqwest::Client,
    config: OllamaConfig,
    templates: Jinja2Library,
    report_manager: Option<Arc<InferenceReportManager>>,
}

impl OllamaContentGenerator {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            templates: Jinja2Library::new(),
            report_manager: None,
        }
    }

    pub fn with_templates(mut self, templates: Jinja2Library) -> Self {
        self.templates = templates;
        self
    }

    /// Token usage of every call gets reported under the job's mission.
    pub fn with_report_manager(mut self, report_manager: Arc<InferenceReportManager>) -> Self {
        self.report_manager = Some(report_manager);
        self
    }

    fn make_messages(llm_setting: &LlmSetting, llm_prompt: &LlmPrompt, suffix: Option<&str>) -> Result<Vec<OllamaMessage>, CogtError> {
        llm_prompt.validate_before_execution()?;
        let mut images = Vec::with_capacity(llm_prompt.user_images.len());
        for image in &llm_prompt.user_images {
            match image {
                PromptImage::Base64 { base_64 } => images.push(base_64.clone()),
                PromptImage::Url { .. } => {
                    return Err(CogtError::Capability {
                        handle: llm_setting.llm_handle.clone(),
                        capability: "images given by url".to_string(),
                    });
                }
            }
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(system_text) = &llm_prompt.system_text {
            messages.push(OllamaMessage::system(system_text.clone()));
        }
        let mut user_text = llm_prompt.user_text.clone().unwrap_or_default();
        if let Some(suffix) = suffix {
            user_text.push_str(suffix);
        }
        messages.push(OllamaMessage::user(user_text, images));
        Ok(messages)
    }

    async fn call_ollama_chat(
        &self,
        job_metadata: &JobMetadata,
        llm_setting: &LlmSetting,
        messages: Vec<OllamaMessage>,
        json_mode: bool,
    ) -> Result<String, CogtError> {
        let request = OllamaChatRequest {
            model: llm_setting.llm_handle.clone(),
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: llm_setting.temperature,
                num_predict: llm_setting.max_tokens,
            },
            format: json_mode.then(|| "json".to_string()),
        };
        log::debug!(
            "Calling Ollama model '{}' (json mode: {json_mode}) for job {:?}",
            llm_setting.llm_handle,
            job_metadata.content_generation_job_id
        );

        let response = self
            .client
            .post(format!("{}/api/chat", self.config.host))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CogtError::InvalidResponse(format!("HTTP {status}: {error_text}")));
        }

        let chat_response: OllamaChatResponse = response.json().await?;
        self.report_usage(job_metadata, llm_setting, &chat_response);

        let content = chat_response.message.content;
        if content.trim().is_empty() {
            return Err(CogtError::CompletionEmpty(format!(
                "Ollama model '{}' returned no content",
                llm_setting.llm_handle
            )));
        }
        Ok(content)
    }

    fn report_usage(&self, job_metadata: &JobMetadata, llm_setting: &LlmSetting, response: &OllamaChatResponse) {
        let Some(report_manager) = &self.report_manager else {
            return;
        };
        let usage = LlmTokensUsage {
            llm_handle: llm_setting.llm_handle.clone(),
            nb_tokens_input: response.prompt_eval_count,
            nb_tokens_output: response.eval_count,
        };
        if let Err(err) = report_manager.report_usage(&job_metadata.mission_id, usage) {
            log::warn!("Token usage was not reported: {err}");
        }
    }

    async fn make_json(
        &self,
        job_metadata: &JobMetadata,
        llm_setting: &LlmSetting,
        llm_prompt: &LlmPrompt,
        instruction: &str,
    ) -> Result<Value, CogtError> {
        let messages = Self::make_messages(llm_setting, llm_prompt, Some(instruction))?;
        let raw = self.call_ollama_chat(job_metadata, llm_setting, messages, true).await?;
        serde_json::from_str(&raw)
            .map_err(|err| CogtError::InvalidResponse(format!("model did not return valid JSON: {err}")))
    }

    async fn second_stage_prompt(
        &self,
        preliminary_text: String,
        factory: Option<&dyn LlmPromptFactory>,
    ) -> Result<LlmPrompt, PipelexError> {
        let mut args = Map::new();
        args.insert("preliminary_text".to_string(), Value::String(preliminary_text));
        match factory {
            Some(factory) => factory.make_llm_prompt_from_args(args).await,
            None => {
                let user_text = self.templates.render(
                    &args,
                    Some(STRUCTURE_FROM_PRELIMINARY_TEXT),
                    None,
                    None,
                    Jinja2TemplateCategory::LlmPrompt,
                )?;
                Ok(LlmPrompt::user(user_text))
            }
        }
    }
}

fn object_instruction(object_class: &StructureClass) -> String {
    format!("\n\nAnswer with a single JSON object of class '{object_class}'.")
}

fn object_list_instruction(object_class: &StructureClass, nb_items: Option<usize>) -> String {
    let count = nb_items.map(|nb| format!(" exactly {nb}")).unwrap_or_default();
    format!("\n\nAnswer with a JSON object whose \"items\" key holds{count} objects of class '{object_class}'.")
}

fn items_from_json(object_class: &StructureClass, value: Value) -> Result<Vec<StuffContent>, PipelexError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(CogtError::InvalidResponse("expected an \"items\" array in the JSON answer".to_string()).into());
            }
        },
        other => {
            return Err(CogtError::InvalidResponse(format!("expected a list of objects, got {other}")).into());
        }
    };
    items
        .into_iter()
        .map(|item| StuffContent::from_json_value(object_class, item))
        .collect()
}

#[async_trait]
impl ContentGenerator for OllamaContentGenerator {
    async fn make_llm_text(
        &self,
        job_metadata: &JobMetadata,
        llm_setting_main: &LlmSetting,
        llm_prompt_for_text: &LlmPrompt,
    ) -> Result<String, PipelexError> {
        let messages = Self::make_messages(llm_setting_main, llm_prompt_for_text, None)?;
        Ok(self
            .call_ollama_chat(job_metadata, llm_setting_main, messages, false)
            .await?)
    }

    async fn make_object_direct(
        &self,
        job_metadata: &JobMetadata,
        object_class: &StructureClass,
        llm_setting_for_object: &LlmSetting,
        llm_prompt_for_object: &LlmPrompt,
    ) -> Result<StuffContent, PipelexError> {
        let value = self
            .make_json(
                job_metadata,
                llm_setting_for_object,
                llm_prompt_for_object,
                &object_instruction(object_class),
            )
            .await?;
        StuffContent::from_json_value(object_class, value)
    }

    async fn make_text_then_object(
        &self,
        job_metadata: &JobMetadata,
        object_class: &StructureClass,
        llm_setting_main: &LlmSetting,
        llm_setting_for_object: &LlmSetting,
        llm_prompt_for_text: &LlmPrompt,
        llm_prompt_factory_for_object: Option<&dyn LlmPromptFactory>,
    ) -> Result<StuffContent, PipelexError> {
        let preliminary_text = self
            .make_llm_text(job_metadata, llm_setting_main, llm_prompt_for_text)
            .await?;
        let llm_prompt_for_object = self
            .second_stage_prompt(preliminary_text, llm_prompt_factory_for_object)
            .await?;
        self.make_object_direct(job_metadata, object_class, llm_setting_for_object, &llm_prompt_for_object)
            .await
    }

    async fn make_object_list_direct(
        &self,
        job_metadata: &JobMetadata,
        object_class: &StructureClass,
        llm_setting_for_object_list: &LlmSetting,
        llm_prompt_for_object_list: &LlmPrompt,
        nb_items: Option<usize>,
    ) -> Result<Vec<StuffContent>, PipelexError> {
        let value = self
            .make_json(
                job_metadata,
                llm_setting_for_object_list,
                llm_prompt_for_object_list,
                &object_list_instruction(object_class, nb_items),
            )
            .await?;
        items_from_json(object_class, value)
    }

    async fn make_text_then_object_list(
        &self,
        job_metadata: &JobMetadata,
        object_class: &StructureClass,
        llm_setting_main: &LlmSetting,
        llm_setting_for_object_list: &LlmSetting,
        llm_prompt_for_text: &LlmPrompt,
        llm_prompt_factory_for_object_list: Option<&dyn LlmPromptFactory>,
        nb_items: Option<usize>,
    ) -> Result<Vec<StuffContent>, PipelexError> {
        let preliminary_text = self
            .make_llm_text(job_metadata, llm_setting_main, llm_prompt_for_text)
            .await?;
        let llm_prompt_for_object_list = self
            .second_stage_prompt(preliminary_text, llm_prompt_factory_for_object_list)
            .await?;
        self.make_object_list_direct(
            job_metadata,
            object_class,
            llm_setting_for_object_list,
            &llm_prompt_for_object_list,
            nb_items,
        )
        .await
    }

    async fn make_single_image(
        &self,
        _job_metadata: &JobMetadata,
        imgg_handle: &str,
        _imgg_prompt: &ImggPrompt,
        _imgg_job_params: &ImggJobParams,
    ) -> Result<GeneratedImage, PipelexError> {
        Err(CogtError::Capability {
            handle: imgg_handle.to_string(),
            capability: "image generation".to_string(),
        }
        .into())
    }

    async fn make_image_list(
        &self,
        _job_metadata: &JobMetadata,
        imgg_handle: &str,
        _imgg_prompt: &ImggPrompt,
        _nb_images: usize,
        _imgg_job_params: &ImggJobParams,
    ) -> Result<Vec<GeneratedImage>, PipelexError> {
        Err(CogtError::Capability {
            handle: imgg_handle.to_string(),
            capability: "image generation".to_string(),
        }
        .into())
    }

    async fn make_jinja2_text(
        &self,
        _job_metadata: &JobMetadata,
        context: &Map<String, Value>,
        jinja2_name: Option<&str>,
        jinja2: Option<&str>,
        prompting_style: Option<&PromptingStyle>,
        template_category: Jinja2TemplateCategory,
    ) -> Result<String, PipelexError> {
        Ok(self
            .templates
            .render(context, jinja2_name, jinja2, prompting_style, template_category)?)
    }

    fn get_template_source(&self, jinja2_name: &str) -> Result<String, PipelexError> {
        Ok(self.templates.get_required_template(jinja2_name)?)
    }

    async fn make_ocr_extract_pages(
        &self,
        _job_metadata: &JobMetadata,
        _ocr_input: &OcrInput,
        ocr_handle: &str,
        _ocr_job_params: &OcrJobParams,
    ) -> Result<OcrOutput, PipelexError> {
        Err(CogtError::Capability {
            handle: ocr_handle.to_string(),
            capability: "OCR".to_string(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_system_and_images() {
        let setting = LlmSetting::new("llava", 0.2);
        let prompt = LlmPrompt {
            system_text: Some("You are a vet".to_string()),
            user_text: Some("What animal is this?".to_string()),
            user_images: vec![PromptImage::Base64 {
                base_64: "aGVsbG8=".to_string(),
            }],
        };
        let messages = OllamaContentGenerator::make_messages(&setting, &prompt, None).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].images, vec!["aGVsbG8="]);

        let request = json!(OllamaMessage::user("hi", Vec::new()));
        assert!(request.get("images").is_none());
    }

    #[test]
    fn test_url_images_are_not_supported() {
        let setting = LlmSetting::new("llava", 0.2);
        let prompt = LlmPrompt {
            user_images: vec![PromptImage::Url {
                url: "https://example.com/cat.png".to_string(),
            }],
            ..LlmPrompt::user("What animal is this?")
        };
        let err = OllamaContentGenerator::make_messages(&setting, &prompt, None).unwrap_err();
        assert!(err.is_capability_error());
    }

    #[test]
    fn test_items_from_json_accepts_both_shapes() {
        let items = items_from_json(&StructureClass::Text, json!({"items": ["a", "b"]})).unwrap();
        assert_eq!(items.len(), 2);
        let items = items_from_json(&StructureClass::Text, json!(["a"])).unwrap();
        assert_eq!(items.len(), 1);
        assert!(items_from_json(&StructureClass::Text, json!(3)).is_err());
    }

    #[tokio::test]
    async fn test_image_generation_is_a_capability_error() {
        let generator = OllamaContentGenerator::new(OllamaConfig::default());
        let err = generator
            .make_single_image(
                &JobMetadata::new("mission"),
                "flux",
                &ImggPrompt {
                    positive_text: "a fox".to_string(),
                },
                &ImggJobParams {
                    aspect_ratio: crate::cogt::imgg::AspectRatio::Square,
                    nb_steps: None,
                    guidance_scale: 3.5,
                    is_safety_checker_enabled: true,
                    safety_tolerance: 2,
                    is_raw: false,
                    output_format: crate::cogt::imgg::OutputFormat::Png,
                    seed: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_capability_error());
    }
}
