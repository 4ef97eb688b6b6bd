use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::cogt::templating::Jinja2TemplateCategory;
use crate::core::context::PipelexContext;
use crate::core::error::PipelexError;
use crate::core::pipe::{LibraryContext, Pipe, PipeCore, PipeKind};
use crate::core::pipe_run_params::PipeRunParams;
use crate::core::stuff::Stuff;
use crate::core::working_memory::WorkingMemory;
use crate::mission::job_metadata::{JobCategory, JobMetadata};

/// Picks the pipe to run by rendering an expression against the working
/// memory and looking the result up in `pipe_map`.
pub struct PipeCondition {
    pub core: PipeCore,
    expression_template: String,
    pub pipe_map: BTreeMap<String, String>,
    pub default_pipe_code: Option<String>,
}

impl PipeCondition {
    /// `expression` is a template expression such as `category.kind`.
    pub fn new(core: PipeCore, expression: &str, pipe_map: BTreeMap<String, String>) -> Self {
        Self::with_template(core, format!("{{{{ {} }}}}", expression.trim()), pipe_map)
    }

    /// Uses a full template whose rendered text is the outcome.
    pub fn with_template(
        core: PipeCore,
        expression_template: impl Into<String>,
        pipe_map: BTreeMap<String, String>,
    ) -> Self {
        PipeCondition {
            core,
            expression_template: expression_template.into(),
            pipe_map,
            default_pipe_code: None,
        }
    }

    pub fn with_default_pipe(mut self, default_pipe_code: impl Into<String>) -> Self {
        self.default_pipe_code = Some(default_pipe_code.into());
        self
    }

    pub fn expression_template(&self) -> &str {
        &self.expression_template
    }

    fn chosen_pipe_code(&self, evaluated: &str) -> Option<&str> {
        self.pipe_map
            .get(evaluated)
            .or(self.default_pipe_code.as_ref())
            .map(String::as_str)
    }
}

#[async_trait]
impl Pipe for PipeCondition {
    fn core(&self) -> &PipeCore {
        &self.core
    }

    fn kind(&self) -> PipeKind {
        PipeKind::Condition
    }

    fn pipe_dependencies(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.pipe_map.values().cloned().collect();
        codes.extend(self.default_pipe_code.clone());
        codes.sort();
        codes.dedup();
        codes
    }

    fn validate_with_libraries(&self, _libraries: &LibraryContext<'_>) -> Result<(), PipelexError> {
        if self.pipe_map.is_empty() && self.default_pipe_code.is_none() {
            return Err(self
                .core
                .definition_error("a condition needs a pipe map or a default pipe"));
        }
        if self.expression_template.trim().is_empty() {
            return Err(self.core.definition_error("the condition expression is empty"));
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
        let context = working_memory.jinja2_context();
        let rendered = ctx
            .content_generator()
            .make_jinja2_text(
                &job_metadata.for_content_generation("evaluate_condition", JobCategory::Jinja2Job),
                &context,
                None,
                Some(&self.expression_template),
                None,
                Jinja2TemplateCategory::Markdown,
            )
            .await?;
        let evaluated = rendered.trim();

        ctx.mission_tracker().add_condition_step(
            &job_metadata.mission_id,
            working_memory.get_main_stuff().ok(),
            &self.core.code,
            &self.expression_template,
            &run_params.pipe_layers,
            evaluated,
        );

        let chosen = self.chosen_pipe_code(evaluated).ok_or_else(|| PipelexError::PipeCondition {
            pipe_code: self.core.code.clone(),
            pipe_layers: run_params.pipe_layers.clone(),
            message: format!(
                "outcome '{evaluated}' matches none of [{}] and there is no default pipe",
                self.pipe_map.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
        })?;
        log::debug!("Condition '{}' evaluated to '{evaluated}', running '{chosen}'", self.core.code);

        let output = ctx
            .router()
            .run_pipe_code(ctx, chosen, working_memory, run_params.clone(), job_metadata, output_name)
            .await?;
        ctx.mission_tracker().add_choice_step(
            &job_metadata.mission_id,
            &self.core.code,
            &output,
            &run_params.pipe_layers,
            chosen,
        );
        Ok(output)
    }
}
