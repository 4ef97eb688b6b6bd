use async_trait::async_trait;

use crate::cogt::templating::{template_variables, Jinja2TemplateCategory, PromptingStyle};
use crate::core::context::PipelexContext;
use crate::core::error::PipelexError;
use crate::core::pipe::{LibraryContext, Pipe, PipeCore, PipeKind};
use crate::core::pipe_run_params::PipeRunParams;
use crate::core::stuff::Stuff;
use crate::core::stuff_content::StuffContent;
use crate::core::working_memory::WorkingMemory;
use crate::mission::job_metadata::{JobCategory, JobMetadata};
use crate::pipe_operators::store_operator_output;

/// Renders a template (inline or by name) against the working memory.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeJinja2 {
    pub core: PipeCore,
    pub jinja2: Option<String>,
    pub jinja2_name: Option<String>,
    pub prompting_style: Option<PromptingStyle>,
    pub template_category: Jinja2TemplateCategory,
}

impl PipeJinja2 {
    pub fn from_template(core: PipeCore, jinja2: impl Into<String>) -> Self {
        PipeJinja2 {
            core,
            jinja2: Some(jinja2.into()),
            jinja2_name: None,
            prompting_style: None,
            template_category: Jinja2TemplateCategory::default(),
        }
    }

    pub fn from_template_name(core: PipeCore, jinja2_name: impl Into<String>) -> Self {
        PipeJinja2 {
            core,
            jinja2: None,
            jinja2_name: Some(jinja2_name.into()),
            prompting_style: None,
            template_category: Jinja2TemplateCategory::default(),
        }
    }

    pub fn with_prompting_style(mut self, prompting_style: PromptingStyle) -> Self {
        self.prompting_style = Some(prompting_style);
        self
    }

    pub fn with_template_category(mut self, template_category: Jinja2TemplateCategory) -> Self {
        self.template_category = template_category;
        self
    }

    /// Renders without touching the working memory.
    pub async fn render(
        &self,
        ctx: &PipelexContext,
        job_metadata: &JobMetadata,
        working_memory: &WorkingMemory,
    ) -> Result<String, PipelexError> {
        ctx.content_generator()
            .make_jinja2_text(
                &job_metadata.for_content_generation(&format!("{}_render", self.core.code), JobCategory::Jinja2Job),
                &working_memory.jinja2_context(),
                self.jinja2_name.as_deref(),
                self.jinja2.as_deref(),
                self.prompting_style.as_ref(),
                self.template_category,
            )
            .await
    }
}

#[async_trait]
impl Pipe for PipeJinja2 {
    fn core(&self) -> &PipeCore {
        &self.core
    }

    fn kind(&self) -> PipeKind {
        PipeKind::Jinja2
    }

    fn required_variables(&self) -> Vec<String> {
        self.jinja2.as_deref().map(template_variables).unwrap_or_default()
    }

    fn validate_with_libraries(&self, _libraries: &LibraryContext<'_>) -> Result<(), PipelexError> {
        if self.jinja2.is_some() == self.jinja2_name.is_some() {
            return Err(self
                .core
                .definition_error("exactly one of 'jinja2' or 'jinja2_name' must be provided"));
        }
        Ok(())
    }

    async fn run_pipe(
        &self,
        ctx: &PipelexContext,
        job_metadata: &JobMetadata,
        working_memory: &mut WorkingMemory,
        run_params: PipeRunParams,
        output_name: Option<&str>,
    ) -> Result<Stuff, PipelexError> {
        let rendered = self.render(ctx, job_metadata, working_memory).await?;
        store_operator_output(
            &self.core,
            &run_params,
            working_memory,
            &self.core.output_concept_code,
            StuffContent::text(rendered),
            &self.required_variables(),
            output_name,
        )
    }
}
