//! Operators are the leaf pipes: each one turns working-memory content into
//! a provider call and stores the result as the new main stuff.

pub mod func;
pub mod img_gen;
pub mod jinja2;
pub mod llm;
pub mod llm_prompt;
pub mod ocr;

pub use func::PipeFunc;
pub use img_gen::PipeImgGen;
pub use jinja2::PipeJinja2;
pub use llm::{PipeLlm, StructuringMethod};
pub use llm_prompt::{PipeLlmPrompt, PipedLlmPromptFactory, PromptSource};
pub use ocr::PipeOcr;

use crate::core::error::PipelexError;
use crate::core::pipe::PipeCore;
use crate::core::pipe_run_params::PipeRunParams;
use crate::core::stuff::{Stuff, StuffFactory};
use crate::core::stuff_content::StuffContent;
use crate::core::working_memory::WorkingMemory;

/// Wraps an operator's content into a stuff, pinned to the run's final
/// stuff code when there is one, and makes it the new main stuff.
pub(crate) fn store_operator_output(
    core: &PipeCore,
    run_params: &PipeRunParams,
    working_memory: &mut WorkingMemory,
    concept_code: &str,
    content: StuffContent,
    input_names: &[String],
    output_name: Option<&str>,
) -> Result<Stuff, PipelexError> {
    let input_stuff_codes = input_names
        .iter()
        .filter_map(|name| working_memory.get_optional_stuff(name))
        .map(|stuff| stuff.stuff_code.clone())
        .collect();
    let output_stuff = StuffFactory::make_stuff_with_code(
        concept_code,
        content,
        output_name,
        run_params.final_stuff_code.as_deref(),
    )?
    .with_creation_record(core.creation_record(run_params, input_stuff_codes));
    working_memory.set_new_main_stuff(output_stuff.clone(), output_name)?;
    Ok(output_stuff)
}

/// Root names a dotted working-memory path depends on.
pub(crate) fn root_name(path: &str) -> String {
    path.split('.').next().unwrap_or(path).to_string()
}
