use async_trait::async_trait;

use crate::core::context::PipelexContext;
use crate::core::error::PipelexError;
use crate::core::pipe::{Pipe, PipeJob, PipeOutput};
use crate::core::pipe_run_params::PipeRunParams;
use crate::core::stuff::Stuff;
use crate::core::working_memory::WorkingMemory;
use crate::mission::job_metadata::JobMetadata;

/// The single dispatch point between pipes.
///
/// Controllers and operators never hold references to each other: they ask
/// the router to run a pipe code.
#[async_trait]
pub trait PipeRouterProtocol: Send + Sync {
    /// Runs a self-contained job, returning the working memory it owned.
    async fn run_pipe_job(&self, ctx: &PipelexContext, pipe_job: PipeJob) -> Result<PipeOutput, PipelexError>;

    /// Resolves `pipe_code` and runs it on the caller's working memory.
    async fn run_pipe_code(
        &self,
        ctx: &PipelexContext,
        pipe_code: &str,
        working_memory: &mut WorkingMemory,
        run_params: PipeRunParams,
        job_metadata: &JobMetadata,
        output_name: Option<&str>,
    ) -> Result<Stuff, PipelexError>;
}

/// Default router: no retries, no caching, no state.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipeRouter;

impl PipeRouter {
    async fn dispatch(
        ctx: &PipelexContext,
        pipe: &dyn Pipe,
        working_memory: &mut WorkingMemory,
        mut run_params: PipeRunParams,
        job_metadata: &JobMetadata,
        output_name: Option<&str>,
    ) -> Result<Stuff, PipelexError> {
        run_params.push_pipe_layer(pipe.code())?;
        log::debug!(
            "Running {} '{}' (stack: {})",
            pipe.kind(),
            pipe.code(),
            run_params.pipe_layers.join(" > ")
        );
        let job_metadata = job_metadata.for_pipe_job(pipe.code());
        let pipe_layers = run_params.pipe_layers.clone();
        pipe.run_pipe(ctx, &job_metadata, working_memory, run_params, output_name)
            .await
            .map_err(|err| err.with_pipe_context(pipe.code(), &pipe_layers))
    }
}

#[async_trait]
impl PipeRouterProtocol for PipeRouter {
    async fn run_pipe_job(&self, ctx: &PipelexContext, pipe_job: PipeJob) -> Result<PipeOutput, PipelexError> {
        let PipeJob {
            pipe,
            mut working_memory,
            run_params,
            job_metadata,
            output_name,
        } = pipe_job;
        Self::dispatch(
            ctx,
            pipe.as_ref(),
            &mut working_memory,
            run_params,
            &job_metadata,
            output_name.as_deref(),
        )
        .await?;
        Ok(PipeOutput::new(working_memory))
    }

    async fn run_pipe_code(
        &self,
        ctx: &PipelexContext,
        pipe_code: &str,
        working_memory: &mut WorkingMemory,
        run_params: PipeRunParams,
        job_metadata: &JobMetadata,
        output_name: Option<&str>,
    ) -> Result<Stuff, PipelexError> {
        let pipe = ctx.pipe_library().get_required_pipe(pipe_code)?;
        Self::dispatch(ctx, pipe.as_ref(), working_memory, run_params, job_metadata, output_name).await
    }
}
