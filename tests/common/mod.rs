//! Shared fixtures: a scripted content generator and context helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use pipelex::cogt::imgg::{GeneratedImage, ImggJobParams, ImggPrompt};
use pipelex::cogt::llm::{LlmPrompt, LlmSetting};
use pipelex::cogt::ocr::{ExtractedImage, OcrInput, OcrJobParams, OcrOutput, OcrPage};
use pipelex::cogt::templating::{Jinja2Library, Jinja2TemplateCategory, PromptingStyle};
use pipelex::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One call received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub method: &'static str,
    pub handle: String,
    pub prompt: Option<String>,
    pub nb_items: Option<usize>,
}

/// Content generator answering from the prompt text.
///
/// Text answers are `"Generated from: <user text>"`. Calls whose prompt
/// contains a configured marker get delayed or fail.
pub struct MockContentGenerator {
    calls: Mutex<Vec<MockCall>>,
    delays: Vec<(String, Duration)>,
    failures: Vec<String>,
    list_size: Option<usize>,
    nb_ocr_pages: usize,
    templates: Jinja2Library,
}

impl Default for MockContentGenerator {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delays: Vec::new(),
            failures: Vec::new(),
            list_size: None,
            nb_ocr_pages: 2,
            templates: Jinja2Library::new(),
        }
    }
}

impl MockContentGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay_when(mut self, marker: &str, delay: Duration) -> Self {
        self.delays.push((marker.to_string(), delay));
        self
    }

    pub fn with_failure_when(mut self, marker: &str) -> Self {
        self.failures.push(marker.to_string());
        self
    }

    /// Forces how many objects list calls return, whatever was asked.
    pub fn with_list_size(mut self, list_size: usize) -> Self {
        self.list_size = Some(list_size);
        self
    }

    pub fn with_template(mut self, name: &str, source: &str) -> Self {
        self.templates.add_template(name, source);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<MockCall> {
        self.calls().into_iter().filter(|call| call.method == method).collect()
    }

    async fn answer(
        &self,
        method: &'static str,
        handle: &str,
        prompt: Option<&str>,
        nb_items: Option<usize>,
    ) -> Result<String, PipelexError> {
        self.calls.lock().unwrap().push(MockCall {
            method,
            handle: handle.to_string(),
            prompt: prompt.map(str::to_string),
            nb_items,
        });
        let prompt = prompt.unwrap_or_default();
        for (marker, delay) in &self.delays {
            if prompt.contains(marker.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
        if self.failures.iter().any(|marker| prompt.contains(marker.as_str())) {
            return Err(CogtError::InvalidResponse(format!("scripted failure on '{prompt}'")).into());
        }
        Ok(format!("Generated from: {prompt}"))
    }

    fn object(object_class: &StructureClass, text: String) -> Result<StuffContent, PipelexError> {
        StuffContent::from_json_value(object_class, json!({ "text": text }))
    }
}

#[async_trait]
impl ContentGenerator for MockContentGenerator {
    async fn make_llm_text(
        &self,
        _job_metadata: &JobMetadata,
        llm_setting_main: &LlmSetting,
        llm_prompt_for_text: &LlmPrompt,
    ) -> Result<String, PipelexError> {
        llm_prompt_for_text.validate_before_execution()?;
        self.answer(
            "make_llm_text",
            &llm_setting_main.llm_handle,
            llm_prompt_for_text.user_text.as_deref(),
            None,
        )
        .await
    }

    async fn make_object_direct(
        &self,
        _job_metadata: &JobMetadata,
        object_class: &StructureClass,
        llm_setting_for_object: &LlmSetting,
        llm_prompt_for_object: &LlmPrompt,
    ) -> Result<StuffContent, PipelexError> {
        let text = self
            .answer(
                "make_object_direct",
                &llm_setting_for_object.llm_handle,
                llm_prompt_for_object.user_text.as_deref(),
                None,
            )
            .await?;
        Self::object(object_class, text)
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
        let llm_prompt_for_object = match llm_prompt_factory_for_object {
            Some(factory) => {
                let mut args = Map::new();
                args.insert("preliminary_text".to_string(), Value::String(preliminary_text));
                factory.make_llm_prompt_from_args(args).await?
            }
            None => LlmPrompt::user(preliminary_text),
        };
        self.make_object_direct(job_metadata, object_class, llm_setting_for_object, &llm_prompt_for_object)
            .await
    }

    async fn make_object_list_direct(
        &self,
        _job_metadata: &JobMetadata,
        object_class: &StructureClass,
        llm_setting_for_object_list: &LlmSetting,
        llm_prompt_for_object_list: &LlmPrompt,
        nb_items: Option<usize>,
    ) -> Result<Vec<StuffContent>, PipelexError> {
        let text = self
            .answer(
                "make_object_list_direct",
                &llm_setting_for_object_list.llm_handle,
                llm_prompt_for_object_list.user_text.as_deref(),
                nb_items,
            )
            .await?;
        let size = self.list_size.or(nb_items).unwrap_or(2);
        (0..size)
            .map(|index| Self::object(object_class, format!("{text} #{index}")))
            .collect()
    }

    async fn make_text_then_object_list(
        &self,
        job_metadata: &JobMetadata,
        object_class: &StructureClass,
        llm_setting_main: &LlmSetting,
        llm_setting_for_object_list: &LlmSetting,
        llm_prompt_for_text: &LlmPrompt,
        _llm_prompt_factory_for_object_list: Option<&dyn LlmPromptFactory>,
        nb_items: Option<usize>,
    ) -> Result<Vec<StuffContent>, PipelexError> {
        let preliminary_text = self
            .make_llm_text(job_metadata, llm_setting_main, llm_prompt_for_text)
            .await?;
        self.make_object_list_direct(
            job_metadata,
            object_class,
            llm_setting_for_object_list,
            &LlmPrompt::user(preliminary_text),
            nb_items,
        )
        .await
    }

    async fn make_single_image(
        &self,
        _job_metadata: &JobMetadata,
        imgg_handle: &str,
        imgg_prompt: &ImggPrompt,
        _imgg_job_params: &ImggJobParams,
    ) -> Result<GeneratedImage, PipelexError> {
        self.answer("make_single_image", imgg_handle, Some(&imgg_prompt.positive_text), None)
            .await?;
        Ok(GeneratedImage {
            url: "mock://image/0".to_string(),
            width: Some(1024),
            height: Some(1024),
        })
    }

    async fn make_image_list(
        &self,
        _job_metadata: &JobMetadata,
        imgg_handle: &str,
        imgg_prompt: &ImggPrompt,
        nb_images: usize,
        _imgg_job_params: &ImggJobParams,
    ) -> Result<Vec<GeneratedImage>, PipelexError> {
        self.answer("make_image_list", imgg_handle, Some(&imgg_prompt.positive_text), Some(nb_images))
            .await?;
        Ok((0..nb_images)
            .map(|index| GeneratedImage {
                url: format!("mock://image/{index}"),
                width: Some(1024),
                height: Some(1024),
            })
            .collect())
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
        ocr_input: &OcrInput,
        ocr_handle: &str,
        ocr_job_params: &OcrJobParams,
    ) -> Result<OcrOutput, PipelexError> {
        let source = ocr_input
            .image_uri
            .clone()
            .or_else(|| ocr_input.pdf_uri.clone())
            .unwrap_or_default();
        self.answer("make_ocr_extract_pages", ocr_handle, Some(&source), None)
            .await?;
        let pages = (1..=self.nb_ocr_pages)
            .map(|page_number| {
                let page = OcrPage {
                    text: Some(format!("page {page_number} of {source}")),
                    extracted_images: vec![ExtractedImage {
                        image_id: format!("img-{page_number}"),
                        ..Default::default()
                    }],
                    screenshot: ocr_job_params.should_include_screenshots.then(|| ExtractedImage {
                        image_id: format!("screenshot-{page_number}"),
                        ..Default::default()
                    }),
                };
                (page_number, page)
            })
            .collect::<BTreeMap<_, _>>();
        Ok(OcrOutput { pages })
    }
}

/// Loads `libraries` and builds a context around `generator`.
pub fn make_context(
    generator: Arc<MockContentGenerator>,
    config: PipelexConfig,
    libraries: &[Value],
) -> PipelexContext {
    make_context_with(generator, config, libraries, |builder| builder)
}

pub fn make_context_with(
    generator: Arc<MockContentGenerator>,
    config: PipelexConfig,
    libraries: &[Value],
    customize: impl FnOnce(PipelexContextBuilder) -> PipelexContextBuilder,
) -> PipelexContext {
    let mut manager = LibraryManager::new(config).unwrap();
    manager.load_from_values(libraries).unwrap();
    let builder = manager.into_context_builder(generator).unwrap();
    customize(builder).build().unwrap()
}

/// A `zoo` library with LLM pipes used across the tests.
pub fn zoo_library() -> Value {
    json!({
        "domain": "zoo",
        "definition": "Everything about animals",
        "concept": {
            "Animal": "The name of an animal",
            "AnimalFact": {"definition": "A fact about an animal", "structure": "AnimalFact"},
            "VisualDescription": {"definition": "A description of what an image shows", "refines": "Text"}
        },
        "pipe": {
            "describe_animal": {
                "type": "PipeLLM",
                "input": "Animal",
                "output": "Text",
                "prompt_template": "Describe the {{ animal }}"
            },
            "describe_all_animals": {
                "type": "PipeBatch",
                "input": "Animal",
                "output": "Text",
                "branch_pipe_code": "describe_animal",
                "batch_params": {"input_list_stuff_name": "animals", "input_item_stuff_name": "animal"}
            },
            "list_facts": {
                "type": "PipeLLM",
                "input": "Animal",
                "output": "AnimalFact",
                "prompt_template": "Give facts about the {{ animal }}",
                "multiple_output": true
            },
            "list_three_facts": {
                "type": "PipeLLM",
                "input": "Animal",
                "output": "AnimalFact",
                "prompt_template": "Give facts about the {{ animal }}",
                "nb_output": 3
            },
            "describe_image": {
                "type": "PipeLLM",
                "input": "Image",
                "output": "VisualDescription",
                "prompt": "Describe what this image shows",
                "images": ["image"]
            },
            "summarize_description": {
                "type": "PipeLLM",
                "input": "VisualDescription",
                "output": "Text",
                "prompt_template": "Summarize: {{ visual_description }}"
            },
            "image_to_summary": {
                "type": "PipeSequence",
                "input": "Image",
                "output": "Text",
                "steps": [
                    {"pipe": "describe_image", "result": "visual_description"},
                    {"pipe": "summarize_description", "result": "summary"}
                ]
            }
        }
    })
}

/// Working memory holding the list of animals under `animals`.
pub fn animals_memory(names: &[&str]) -> WorkingMemory {
    let items = names.iter().map(|name| StuffContent::text(*name)).collect();
    let stuff = StuffFactory::make_stuff("zoo.Animal", StuffContent::list(items), Some("animals")).unwrap();
    WorkingMemoryFactory::make_from_single_stuff(stuff).unwrap()
}
