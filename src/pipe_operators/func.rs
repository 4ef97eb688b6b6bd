use async_trait::async_trait;

use crate::core::context::PipelexContext;
use crate::core::error::PipelexError;
use crate::core::pipe::{LibraryContext, Pipe, PipeCore, PipeKind};
use crate::core::pipe_run_params::PipeRunParams;
use crate::core::stuff::Stuff;
use crate::core::working_memory::WorkingMemory;
use crate::mission::job_metadata::JobMetadata;
use crate::pipe_operators::store_operator_output;

/// Applies a registered function to the working memory.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeFunc {
    pub core: PipeCore,
    pub function_name: String,
}

impl PipeFunc {
    pub fn new(core: PipeCore, function_name: impl Into<String>) -> Self {
        PipeFunc {
            core,
            function_name: function_name.into(),
        }
    }
}

#[async_trait]
impl Pipe for PipeFunc {
    fn core(&self) -> &PipeCore {
        &self.core
    }

    fn kind(&self) -> PipeKind {
        PipeKind::Func
    }

    fn validate_with_libraries(&self, _libraries: &LibraryContext<'_>) -> Result<(), PipelexError> {
        if self.function_name.trim().is_empty() {
            return Err(self.core.definition_error("function_name is empty"));
        }
        Ok(())
    }

    async fn run_pipe(
        &self,
        ctx: &PipelexContext,
        _job_metadata: &JobMetadata,
        working_memory: &mut WorkingMemory,
        run_params: PipeRunParams,
        output_name: Option<&str>,
    ) -> Result<Stuff, PipelexError> {
        log::debug!("Applying function '{}'", self.function_name);
        let function = ctx.func_registry().get_required_function(&self.function_name)?;
        let content = function(&*working_memory).map_err(|err| err.in_pipe(&self.core.code, &run_params.pipe_layers))?;
        store_operator_output(
            &self.core,
            &run_params,
            working_memory,
            &self.core.output_concept_code,
            content,
            &[],
            output_name,
        )
    }
}
