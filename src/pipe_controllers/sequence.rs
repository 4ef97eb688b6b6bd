use async_trait::async_trait;

use crate::core::context::PipelexContext;
use crate::core::error::PipelexError;
use crate::core::pipe::{LibraryContext, Pipe, PipeCore, PipeKind};
use crate::core::pipe_run_params::PipeRunParams;
use crate::core::stuff::Stuff;
use crate::core::working_memory::{WorkingMemory, MAIN_STUFF_NAME};
use crate::mission::job_metadata::JobMetadata;
use crate::pipe_controllers::sub_pipe::SubPipe;

/// Runs its steps in order against the same working memory.
///
/// The first failing step aborts the sequence; whatever earlier steps wrote
/// stays in the caller's working memory.
pub struct PipeSequence {
    pub core: PipeCore,
    pub steps: Vec<SubPipe>,
}

impl PipeSequence {
    pub fn new(core: PipeCore, steps: Vec<SubPipe>) -> Self {
        PipeSequence { core, steps }
    }
}

#[async_trait]
impl Pipe for PipeSequence {
    fn core(&self) -> &PipeCore {
        &self.core
    }

    fn kind(&self) -> PipeKind {
        PipeKind::Sequence
    }

    fn pipe_dependencies(&self) -> Vec<String> {
        self.steps.iter().map(|step| step.pipe_code.clone()).collect()
    }

    fn validate_with_libraries(&self, _libraries: &LibraryContext<'_>) -> Result<(), PipelexError> {
        if self.steps.is_empty() {
            return Err(self.core.definition_error("a sequence needs at least one step"));
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
        let last_index = self.steps.len().saturating_sub(1);
        let mut last_output: Option<Stuff> = None;
        for (index, step) in self.steps.iter().enumerate() {
            let mut step_run_params = run_params.clone();
            // only the last step produces the sequence's own output
            if index != last_index {
                step_run_params.final_stuff_code = None;
                step_run_params.output_multiplicity = None;
            }
            log::debug!(
                "Sequence '{}' step {}/{}: '{}'",
                self.core.code,
                index + 1,
                self.steps.len(),
                step.pipe_code
            );
            last_output = Some(step.run(ctx, job_metadata, working_memory, step_run_params).await?);
        }

        let output = last_output
            .ok_or_else(|| self.core.execution_error(&run_params, "the sequence has no steps"))?;

        if let Some(name) = output_name {
            let target = self
                .steps
                .last()
                .and_then(|step| step.output_name.clone())
                .unwrap_or_else(|| MAIN_STUFF_NAME.to_string());
            if name != target && working_memory.get_optional_stuff(name).is_none() {
                working_memory.set_alias(name, &target)?;
            }
        }
        Ok(output)
    }
}
