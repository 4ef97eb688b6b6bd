use crate::core::context::PipelexContext;
use crate::core::error::PipelexError;
use crate::core::pipe::{check_required_variables, PipeJob, PipeOutput};
use crate::core::pipe_run_params::{PipeOutputMultiplicity, PipeRunParams};
use crate::core::working_memory::WorkingMemory;
use crate::mission::job_metadata::JobMetadata;

/// Runs `pipe_code` as a fresh mission.
///
/// The working memory is consumed; only the returned output and the
/// mission's tracked steps outlive the call. A failed run closes its mission
/// before the error is returned.
pub async fn execute_mission(
    ctx: &PipelexContext,
    pipe_code: &str,
    working_memory: Option<WorkingMemory>,
    output_name: Option<&str>,
    output_multiplicity: Option<PipeOutputMultiplicity>,
    dynamic_output_concept_code: Option<&str>,
) -> Result<(PipeOutput, String), PipelexError> {
    let pipe = ctx.pipe_library().get_required_pipe(pipe_code)?;
    let working_memory = working_memory.unwrap_or_default();
    working_memory.validate_concepts(ctx.concept_library())?;
    check_required_variables(pipe.as_ref(), &working_memory, &[])?;

    let mission = ctx.mission_manager().add_new_mission();
    ctx.report_manager().open_registry(&mission.mission_id);
    log::info!("Running pipe '{pipe_code}' in mission '{}'", mission.mission_id);

    let pipe_job = PipeJob {
        pipe,
        working_memory,
        run_params: PipeRunParams::new(ctx.config().pipe_run.pipe_stack_limit)
            .with_output_multiplicity(output_multiplicity)
            .with_dynamic_output_concept_code(dynamic_output_concept_code.map(str::to_string)),
        job_metadata: JobMetadata::new(mission.mission_id.clone()),
        output_name: output_name.map(str::to_string),
    };

    match ctx.router().run_pipe_job(ctx, pipe_job).await {
        Ok(pipe_output) => Ok((pipe_output, mission.mission_id)),
        Err(err) => {
            log::error!("Mission '{}' failed: {err}", mission.mission_id);
            ctx.close_mission(&mission.mission_id);
            Err(err)
        }
    }
}
