use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::cogt::error::CogtError;
use crate::cogt::llm::{LlmPrompt, PromptImage};
use crate::cogt::templating::{template_variables, Jinja2TemplateCategory, PromptingStyle};
use crate::cogt::LlmPromptFactory;
use crate::core::concept::NativeConcept;
use crate::core::context::PipelexContext;
use crate::core::error::PipelexError;
use crate::core::pipe_run_params::PipeRunParams;
use crate::core::stuff::StuffFactory;
use crate::core::stuff_content::{ContentKind, StuffContent};
use crate::core::working_memory::WorkingMemory;
use crate::mission::job_metadata::{JobCategory, JobMetadata};
use crate::pipe_operators::root_name;

/// Where one part of a prompt comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptSource {
    /// Used as is.
    Fixed(String),
    /// Inline template rendered against the working memory.
    Jinja2(String),
    /// Named template rendered against the working memory.
    Jinja2Name(String),
    /// Named template fetched without rendering.
    VerbatimName(String),
}

impl PromptSource {
    /// Picks the single source among the declared ones. `what` names the
    /// prompt part in the error.
    pub fn exactly_one(
        what: &str,
        fixed: Option<String>,
        jinja2: Option<String>,
        jinja2_name: Option<String>,
        verbatim_name: Option<String>,
    ) -> Result<Option<PromptSource>, String> {
        let mut sources: Vec<PromptSource> = [
            fixed.map(PromptSource::Fixed),
            jinja2.map(PromptSource::Jinja2),
            jinja2_name.map(PromptSource::Jinja2Name),
            verbatim_name.map(PromptSource::VerbatimName),
        ]
        .into_iter()
        .flatten()
        .collect();
        if sources.len() > 1 {
            return Err(format!("{what} got more than one of text, template, template name or verbatim name"));
        }
        Ok(sources.pop())
    }

    fn required_variables(&self) -> Vec<String> {
        match self {
            PromptSource::Jinja2(template) => template_variables(template),
            _ => Vec::new(),
        }
    }
}

/// Builds an [`LlmPrompt`] from the working memory. Used by `PipeLlm`,
/// never registered as a pipe of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeLlmPrompt {
    pub domain: String,
    pub prompting_style: Option<PromptingStyle>,
    pub system_prompt: Option<PromptSource>,
    pub user_prompt: PromptSource,
    pub user_images: Vec<String>,
}

impl PipeLlmPrompt {
    pub fn new(domain: impl Into<String>, user_prompt: PromptSource) -> Self {
        PipeLlmPrompt {
            domain: domain.into(),
            prompting_style: None,
            system_prompt: None,
            user_prompt,
            user_images: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: PromptSource) -> Self {
        self.system_prompt = Some(system_prompt);
        self
    }

    pub fn with_user_images(mut self, user_images: Vec<String>) -> Self {
        self.user_images = user_images;
        self
    }

    pub fn with_prompting_style(mut self, prompting_style: PromptingStyle) -> Self {
        self.prompting_style = Some(prompting_style);
        self
    }

    pub fn required_variables(&self) -> Vec<String> {
        let mut names = self.user_prompt.required_variables();
        if let Some(system_prompt) = &self.system_prompt {
            names.extend(system_prompt.required_variables());
        }
        names.extend(self.user_images.iter().map(|path| root_name(path)));
        names.sort();
        names.dedup();
        names
    }

    pub async fn make_llm_prompt(
        &self,
        ctx: &PipelexContext,
        job_metadata: &JobMetadata,
        working_memory: &WorkingMemory,
        run_params: &PipeRunParams,
    ) -> Result<LlmPrompt, PipelexError> {
        if run_params.is_multiple_output_required() {
            return Err(CogtError::Prompt(format!(
                "a prompt cannot be made with multiple outputs, got {:?}",
                run_params.output_multiplicity
            ))
            .into());
        }

        let mut user_images = Vec::with_capacity(self.user_images.len());
        for image_path in &self.user_images {
            log::debug!("Getting user image '{image_path}' from working memory");
            let content = working_memory.get_stuff_attribute(image_path, Some(ContentKind::Image))?;
            if let StuffContent::Image(image) = content {
                user_images.push(match image.base_64 {
                    Some(base_64) => PromptImage::Base64 { base_64 },
                    None => PromptImage::Url { url: image.url },
                });
            }
        }

        let mut user_text = self
            .unravel(ctx, job_metadata, working_memory, &self.user_prompt)
            .await?;
        if let Some(concept_code) = &run_params.dynamic_output_concept_code {
            user_text.push_str(&output_structure_prompt(ctx, concept_code)?);
        }

        let system_text = match &self.system_prompt {
            Some(source) => Some(self.unravel(ctx, job_metadata, working_memory, source).await?),
            None => None,
        };

        Ok(LlmPrompt {
            system_text,
            user_text: Some(user_text),
            user_images,
        })
    }

    async fn unravel(
        &self,
        ctx: &PipelexContext,
        job_metadata: &JobMetadata,
        working_memory: &WorkingMemory,
        source: &PromptSource,
    ) -> Result<String, PipelexError> {
        let job_metadata = job_metadata.for_content_generation("unravel_prompt", JobCategory::Jinja2Job);
        let (context, jinja2_name, jinja2) = match source {
            PromptSource::Fixed(text) => return Ok(text.clone()),
            PromptSource::Jinja2(template) => (working_memory.jinja2_context(), None, Some(template.as_str())),
            PromptSource::Jinja2Name(name) => (working_memory.jinja2_context(), Some(name.as_str()), None),
            PromptSource::VerbatimName(name) => return ctx.content_generator().get_template_source(name),
        };
        ctx.content_generator()
            .make_jinja2_text(
                &job_metadata,
                &context,
                jinja2_name,
                jinja2,
                self.prompting_style.as_ref(),
                Jinja2TemplateCategory::LlmPrompt,
            )
            .await
    }
}

fn output_structure_prompt(ctx: &PipelexContext, concept_code: &str) -> Result<String, PipelexError> {
    let concept = ctx.concept_library().get_required_concept(concept_code)?;
    Ok(format!(
        "\n\n---\nRequested output format: the output should be a '{}' ({}), of structure '{}'.\n\
         You do NOT need to output a formatted JSON object, another LLM will take care of that. \
         However, you MUST clearly output the values of its fields in your response.\n---\n",
        concept.name(),
        concept.definition,
        concept.structure_class
    ))
}

/// Second-stage prompt factory of a "text then object" generation: the
/// arguments become text stuffs and the prompt is rendered from them.
pub struct PipedLlmPromptFactory {
    ctx: PipelexContext,
    job_metadata: JobMetadata,
    pipe_llm_prompt: PipeLlmPrompt,
}

impl PipedLlmPromptFactory {
    pub fn new(ctx: PipelexContext, job_metadata: JobMetadata, pipe_llm_prompt: PipeLlmPrompt) -> Self {
        PipedLlmPromptFactory {
            ctx,
            job_metadata,
            pipe_llm_prompt,
        }
    }
}

#[async_trait]
impl LlmPromptFactory for PipedLlmPromptFactory {
    async fn make_llm_prompt_from_args(&self, arg_dict: Map<String, Value>) -> Result<LlmPrompt, PipelexError> {
        let mut working_memory = WorkingMemory::new();
        for (name, value) in arg_dict {
            let text = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            let stuff = StuffFactory::make_stuff(&NativeConcept::Text.code(), StuffContent::text(text), Some(&name))?;
            working_memory.add_new_stuff(&name, stuff, &[])?;
        }
        let run_params = PipeRunParams::new(self.ctx.config().pipe_run.pipe_stack_limit);
        self.pipe_llm_prompt
            .make_llm_prompt(&self.ctx, &self.job_metadata, &working_memory, &run_params)
            .await
    }
}
