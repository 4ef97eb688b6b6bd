use serde::{Deserialize, Serialize};

use crate::core::context::PipelexContext;
use crate::core::error::PipelexError;
use crate::core::pipe::{check_required_variables, Pipe, PipeCore};
use crate::core::pipe_run_params::{BatchParams, PipeOutputMultiplicity, PipeRunParams};
use crate::core::stuff::Stuff;
use crate::core::working_memory::WorkingMemory;
use crate::mission::job_metadata::JobMetadata;
use crate::pipe_controllers::batch::PipeBatch;

/// One step of a sequence: which pipe to run, under what name, and whether
/// to fan it out over a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubPipe {
    #[serde(rename = "pipe")]
    pub pipe_code: String,
    #[serde(default, rename = "result")]
    pub output_name: Option<String>,
    #[serde(default, rename = "nb_output")]
    pub output_multiplicity: Option<PipeOutputMultiplicity>,
    #[serde(default)]
    pub batch_params: Option<BatchParams>,
}

impl SubPipe {
    pub fn new(pipe_code: impl Into<String>) -> Self {
        SubPipe {
            pipe_code: pipe_code.into(),
            output_name: None,
            output_multiplicity: None,
            batch_params: None,
        }
    }

    pub fn with_output_name(mut self, output_name: impl Into<String>) -> Self {
        self.output_name = Some(output_name.into());
        self
    }

    pub fn with_batch_params(mut self, batch_params: BatchParams) -> Self {
        self.batch_params = Some(batch_params);
        self
    }

    pub fn with_output_multiplicity(mut self, output_multiplicity: PipeOutputMultiplicity) -> Self {
        self.output_multiplicity = Some(output_multiplicity);
        self
    }

    /// Runs the step on the shared working memory.
    pub async fn run(
        &self,
        ctx: &PipelexContext,
        job_metadata: &JobMetadata,
        working_memory: &mut WorkingMemory,
        sub_run_params: PipeRunParams,
    ) -> Result<Stuff, PipelexError> {
        let run_params = sub_run_params.copy_by_injecting_multiplicity(self.output_multiplicity);
        let from_stuff = working_memory.get_main_stuff().ok().cloned();
        let pipe = ctx.pipe_library().get_required_pipe(&self.pipe_code)?;

        let output = if let Some(batch_params) = &self.batch_params {
            let pipe_batch = PipeBatch::new(
                PipeCore::new(
                    pipe.core().domain.clone(),
                    format!("{}_batch", self.pipe_code),
                    pipe.core().output_concept_code.clone(),
                ),
                self.pipe_code.clone(),
            )
            .with_batch_params(batch_params.clone());
            let mut batch_run_params = run_params.clone();
            batch_run_params.push_pipe_layer(pipe_batch.code())?;
            pipe_batch
                .run_pipe(ctx, job_metadata, working_memory, batch_run_params, self.output_name.as_deref())
                .await?
        } else {
            check_required_variables(pipe.as_ref(), working_memory, &run_params.pipe_layers)?;
            ctx.router()
                .run_pipe_code(
                    ctx,
                    &self.pipe_code,
                    working_memory,
                    run_params.clone(),
                    job_metadata,
                    self.output_name.as_deref(),
                )
                .await?
        };

        ctx.mission_tracker().add_pipe_step(
            &job_metadata.mission_id,
            from_stuff.as_ref(),
            &output,
            &self.pipe_code,
            self.output_name.as_deref().unwrap_or_default(),
            &run_params.pipe_layers,
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_declaration() {
        let step: SubPipe = serde_json::from_value(json!({
            "pipe": "describe_image",
            "result": "description",
            "batch_params": {"input_list_stuff_name": "images", "input_item_stuff_name": "image"}
        }))
        .unwrap();
        assert_eq!(step.pipe_code, "describe_image");
        assert_eq!(step.output_name.as_deref(), Some("description"));
        assert_eq!(step.batch_params.unwrap().input_item_stuff_name, "image");
    }
}
