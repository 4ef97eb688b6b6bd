use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::core::context::PipelexContext;
use crate::core::error::PipelexError;
use crate::core::pipe::{LibraryContext, Pipe, PipeCore, PipeJob, PipeKind};
use crate::core::pipe_run_params::{BatchParams, PipeRunParams};
use crate::core::stuff::{Stuff, StuffFactory};
use crate::core::stuff_content::StuffContent;
use crate::core::working_memory::WorkingMemory;
use crate::mission::job_metadata::JobMetadata;

/// Runs one branch pipe per item of an input list, concurrently, and
/// aggregates the branch outputs back into a list in input order.
///
/// Each branch gets its own deep copy of the working memory, with the item
/// stored as its main stuff. The first failing branch fails the batch.
pub struct PipeBatch {
    pub core: PipeCore,
    pub branch_pipe_code: String,
    pub batch_params: Option<BatchParams>,
    max_concurrency: Option<usize>,
}

impl PipeBatch {
    pub fn new(core: PipeCore, branch_pipe_code: impl Into<String>) -> Self {
        PipeBatch {
            core,
            branch_pipe_code: branch_pipe_code.into(),
            batch_params: None,
            max_concurrency: None,
        }
    }

    pub fn with_batch_params(mut self, batch_params: BatchParams) -> Self {
        self.batch_params = Some(batch_params);
        self
    }

    /// Caps the number of branches in flight, overriding the configured cap.
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        assert!(max_concurrency > 0, "Max concurrency must be greater than 0");
        self.max_concurrency = Some(max_concurrency);
        self
    }

    fn branch_output_name(output_name: &str, index: usize) -> String {
        format!("Batch result {} of {}", index + 1, output_name)
    }
}

#[async_trait]
impl Pipe for PipeBatch {
    fn core(&self) -> &PipeCore {
        &self.core
    }

    fn kind(&self) -> PipeKind {
        PipeKind::Batch
    }

    fn required_variables(&self) -> Vec<String> {
        vec![
            self.batch_params
                .clone()
                .unwrap_or_default()
                .input_list_stuff_name,
        ]
    }

    fn pipe_dependencies(&self) -> Vec<String> {
        vec![self.branch_pipe_code.clone()]
    }

    fn validate_with_libraries(&self, libraries: &LibraryContext<'_>) -> Result<(), PipelexError> {
        if self.branch_pipe_code == self.core.code {
            return Err(self.core.definition_error("a batch cannot use itself as branch pipe"));
        }
        if libraries.pipe_library.get_optional_pipe(&self.branch_pipe_code).is_none() {
            return Err(self
                .core
                .definition_error(format!("branch pipe '{}' is not in the library", self.branch_pipe_code)));
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
        let batch_params = run_params
            .batch_params
            .clone()
            .or_else(|| self.batch_params.clone())
            .unwrap_or_default();
        let branch_pipe = ctx.pipe_library().get_required_pipe(&self.branch_pipe_code)?;

        let input_stuff = working_memory
            .get_stuff(&batch_params.input_list_stuff_name)
            .map_err(|err| err.in_pipe(&self.core.code, &run_params.pipe_layers))?
            .clone();
        let mut items = match &input_stuff.content {
            StuffContent::List(list) => list.items.clone(),
            other => {
                return Err(self.core.run_params_error(
                    &run_params,
                    format!(
                        "batch input '{}' must be a list, got '{}'",
                        batch_params.input_list_stuff_name,
                        other.kind()
                    ),
                ));
            }
        };
        if let Some(limit) = ctx.config().tracker.applied_nb_items_limit {
            if items.len() > limit {
                log::debug!(
                    "Batch '{}' limited to {limit} of {} items",
                    self.core.code,
                    items.len()
                );
                items.truncate(limit);
            }
        }

        let batch_output_stuff_code = run_params
            .final_stuff_code
            .clone()
            .unwrap_or_else(StuffFactory::make_stuff_code);
        let output_label = output_name.unwrap_or(&self.core.code).to_string();
        let mut branch_run_params = run_params.clone();
        branch_run_params.batch_params = None;
        branch_run_params.output_multiplicity = None;

        let max_concurrency = self
            .max_concurrency
            .unwrap_or(ctx.config().pipe_run.batch_max_concurrency);
        log::info!(
            "Batch '{}' running '{}' over {} items (max concurrency {max_concurrency})",
            self.core.code,
            self.branch_pipe_code,
            items.len()
        );

        let source_memory: &WorkingMemory = working_memory;
        let mut branch_results: Vec<(usize, Stuff)> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let branch_pipe = branch_pipe.clone();
                let run_params = branch_run_params
                    .deep_copy_with_final_stuff_code(format!("{batch_output_stuff_code}-branch-{index}"));
                let branch_output_name = Self::branch_output_name(&output_label, index);
                let input_stuff = &input_stuff;
                let batch_params = &batch_params;
                async move {
                    let item_stuff = StuffFactory::make_stuff_with_code(
                        &input_stuff.concept_code,
                        item,
                        Some(&batch_params.input_item_stuff_name),
                        Some(&format!("{}-branch-{index}", input_stuff.stuff_code)),
                    )?;
                    ctx.mission_tracker().add_batch_step(
                        &job_metadata.mission_id,
                        Some(input_stuff),
                        &item_stuff,
                        index,
                        &run_params.pipe_layers,
                        &format!("batch item {}", index + 1),
                    );
                    let mut branch_memory = source_memory.make_deep_copy();
                    branch_memory.set_new_main_stuff(item_stuff, Some(&batch_params.input_item_stuff_name))?;

                    let pipe_job = PipeJob {
                        pipe: branch_pipe,
                        working_memory: branch_memory,
                        run_params,
                        job_metadata: job_metadata.clone(),
                        output_name: Some(branch_output_name),
                    };
                    let pipe_output = ctx.router().run_pipe_job(ctx, pipe_job).await?;
                    let branch_output = pipe_output.main_stuff()?.clone();
                    Ok::<_, PipelexError>((index, branch_output))
                }
            })
            .buffer_unordered(max_concurrency)
            .try_collect()
            .await?;
        branch_results.sort_by_key(|(index, _)| *index);

        let contents = branch_results
            .iter()
            .map(|(_, stuff)| stuff.content.clone())
            .collect();
        let input_codes = branch_results
            .iter()
            .map(|(_, stuff)| stuff.stuff_code.clone())
            .collect();
        let output_concept_code = run_params
            .dynamic_output_concept_code
            .as_deref()
            .unwrap_or(&self.core.output_concept_code);
        let output_stuff = StuffFactory::make_stuff_with_code(
            output_concept_code,
            StuffContent::list(contents),
            output_name,
            Some(&batch_output_stuff_code),
        )?
        .with_creation_record(self.core.creation_record(&run_params, input_codes));

        for (_, branch_output) in &branch_results {
            ctx.mission_tracker().add_aggregate_step(
                &job_metadata.mission_id,
                branch_output,
                &output_stuff,
                &run_params.pipe_layers,
                "batch aggregation",
            );
        }

        working_memory.set_new_main_stuff(output_stuff.clone(), output_name)?;
        Ok(output_stuff)
    }
}
