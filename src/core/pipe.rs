use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::cogt::llm::LlmDeck;
use crate::core::concept_library::ConceptLibrary;
use crate::core::config::PipelexConfig;
use crate::core::context::PipelexContext;
use crate::core::domain::DomainLibrary;
use crate::core::error::PipelexError;
use crate::core::pipe_library::PipeLibrary;
use crate::core::pipe_run_params::PipeRunParams;
use crate::core::stuff::{Stuff, StuffCreationRecord};
use crate::core::stuff_content::{ImageContent, StuffContent};
use crate::core::working_memory::WorkingMemory;
use crate::mission::job_metadata::JobMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeKind {
    Llm,
    Jinja2,
    Ocr,
    ImgGen,
    Func,
    Sequence,
    Batch,
    Condition,
}

impl PipeKind {
    pub fn is_controller(&self) -> bool {
        matches!(self, PipeKind::Sequence | PipeKind::Batch | PipeKind::Condition)
    }

    /// Type name used in pipe declarations.
    pub fn type_name(&self) -> &'static str {
        match self {
            PipeKind::Llm => "PipeLLM",
            PipeKind::Jinja2 => "PipeJinja2",
            PipeKind::Ocr => "PipeOcr",
            PipeKind::ImgGen => "PipeImgGen",
            PipeKind::Func => "PipeFunc",
            PipeKind::Sequence => "PipeSequence",
            PipeKind::Batch => "PipeBatch",
            PipeKind::Condition => "PipeCondition",
        }
    }
}

impl fmt::Display for PipeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Data every pipe carries, whatever its kind.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeCore {
    pub code: String,
    pub domain: String,
    pub definition: Option<String>,
    pub input_concept_code: Option<String>,
    pub output_concept_code: String,
}

impl PipeCore {
    pub fn new(domain: impl Into<String>, code: impl Into<String>, output_concept_code: impl Into<String>) -> Self {
        PipeCore {
            code: code.into(),
            domain: domain.into(),
            definition: None,
            input_concept_code: None,
            output_concept_code: output_concept_code.into(),
        }
    }

    pub fn with_input(mut self, input_concept_code: impl Into<String>) -> Self {
        self.input_concept_code = Some(input_concept_code.into());
        self
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    pub fn definition_error(&self, message: impl Into<String>) -> PipelexError {
        PipelexError::PipeDefinition {
            pipe_code: self.code.clone(),
            message: message.into(),
        }
    }

    pub fn run_params_error(&self, run_params: &PipeRunParams, message: impl Into<String>) -> PipelexError {
        PipelexError::PipeRunParams {
            pipe_code: self.code.clone(),
            pipe_layers: run_params.pipe_layers.clone(),
            message: message.into(),
        }
    }

    pub fn execution_error(&self, run_params: &PipeRunParams, message: impl Into<String>) -> PipelexError {
        PipelexError::PipeExecution {
            pipe_code: self.code.clone(),
            pipe_layers: run_params.pipe_layers.clone(),
            message: message.into(),
        }
    }

    pub fn creation_record(&self, run_params: &PipeRunParams, input_stuff_codes: Vec<String>) -> StuffCreationRecord {
        StuffCreationRecord {
            pipe_code: self.code.clone(),
            pipe_layers: run_params.pipe_layers.clone(),
            input_stuff_codes,
        }
    }
}

/// Libraries a pipe may consult while validating its own definition.
#[derive(Clone, Copy)]
pub struct LibraryContext<'a> {
    pub config: &'a PipelexConfig,
    pub domain_library: &'a DomainLibrary,
    pub concept_library: &'a ConceptLibrary,
    pub pipe_library: &'a PipeLibrary,
    pub llm_deck: &'a LlmDeck,
}

/// An executable unit: either an operator calling a provider, or a
/// controller orchestrating other pipes through the router.
///
/// `run_pipe` mutates the working memory it is given and returns the stuff
/// it made the new main stuff.
#[async_trait]
pub trait Pipe: Send + Sync {
    fn core(&self) -> &PipeCore;

    fn kind(&self) -> PipeKind;

    fn code(&self) -> &str {
        &self.core().code
    }

    /// Working-memory names this pipe reads.
    fn required_variables(&self) -> Vec<String> {
        Vec::new()
    }

    /// Codes of the pipes this pipe runs through the router.
    fn pipe_dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn validate_with_libraries(&self, _libraries: &LibraryContext<'_>) -> Result<(), PipelexError> {
        Ok(())
    }

    async fn run_pipe(
        &self,
        ctx: &PipelexContext,
        job_metadata: &JobMetadata,
        working_memory: &mut WorkingMemory,
        run_params: PipeRunParams,
        output_name: Option<&str>,
    ) -> Result<Stuff, PipelexError>;
}

/// Fails with [`PipelexError::PipeInput`] when `pipe` reads names that the
/// working memory does not hold. Conditions resolve their inputs themselves.
pub fn check_required_variables(
    pipe: &dyn Pipe,
    working_memory: &WorkingMemory,
    parent_layers: &[String],
) -> Result<(), PipelexError> {
    if pipe.kind() == PipeKind::Condition {
        return Ok(());
    }
    let missing: Vec<String> = pipe
        .required_variables()
        .into_iter()
        .filter(|name| working_memory.get_optional_stuff(name).is_none())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    let mut pipe_layers = parent_layers.to_vec();
    pipe_layers.push(pipe.code().to_string());
    Err(PipelexError::PipeInput {
        pipe_code: pipe.code().to_string(),
        pipe_layers,
        message: format!(
            "required variables [{}] are missing, working memory holds [{}]",
            missing.join(", "),
            working_memory.list_keys().join(", ")
        ),
    })
}

/// A pipe together with everything it needs to run on its own.
pub struct PipeJob {
    pub pipe: Arc<dyn Pipe>,
    pub working_memory: WorkingMemory,
    pub run_params: PipeRunParams,
    pub job_metadata: JobMetadata,
    pub output_name: Option<String>,
}

/// The state left behind by a pipe run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeOutput {
    pub working_memory: WorkingMemory,
}

impl PipeOutput {
    pub fn new(working_memory: WorkingMemory) -> Self {
        PipeOutput { working_memory }
    }

    pub fn main_stuff(&self) -> Result<&Stuff, PipelexError> {
        self.working_memory.get_main_stuff()
    }

    pub fn main_stuff_as_text(&self) -> Result<&str, PipelexError> {
        self.working_memory.main_stuff_as_text()
    }

    pub fn main_stuff_as_number(&self) -> Result<f64, PipelexError> {
        self.main_stuff()?.as_number()
    }

    pub fn main_stuff_as_image(&self) -> Result<&ImageContent, PipelexError> {
        self.working_memory.main_stuff_as_image()
    }

    pub fn main_stuff_as_list(&self) -> Result<&[StuffContent], PipelexError> {
        self.working_memory.main_stuff_as_list()
    }

    /// The main stuff as a list of items, or as a single item.
    pub fn main_stuff_as_items(&self) -> Result<Vec<StuffContent>, PipelexError> {
        match &self.main_stuff()?.content {
            StuffContent::List(list) => Ok(list.items.clone()),
            other => Ok(vec![other.clone()]),
        }
    }

    /// URLs of the images in the main stuff.
    pub fn image_urls(&self) -> Result<Vec<String>, PipelexError> {
        Ok(self
            .main_stuff_as_items()?
            .into_iter()
            .filter_map(|item| match item {
                StuffContent::Image(image) => Some(image.url),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stuff::StuffFactory;

    #[test]
    fn test_pipe_output_accessors() {
        let images = StuffContent::list(vec![StuffContent::image("a.png"), StuffContent::image("b.png")]);
        let stuff = StuffFactory::make_stuff("native.Image", images, None).unwrap();
        let mut working_memory = WorkingMemory::new();
        working_memory.set_new_main_stuff(stuff, None).unwrap();
        let output = PipeOutput::new(working_memory);

        assert_eq!(output.image_urls().unwrap(), vec!["a.png", "b.png"]);
        assert_eq!(output.main_stuff_as_list().unwrap().len(), 2);
        assert!(output.main_stuff_as_text().is_err());
    }

    #[test]
    fn test_pipe_core_errors_carry_the_stack() {
        let core = PipeCore::new("zoo", "describe", "native.Text");
        let mut run_params = PipeRunParams::new(10);
        run_params.push_pipe_layer("outer").unwrap();
        run_params.push_pipe_layer("describe").unwrap();
        let err = core.execution_error(&run_params, "no output");
        assert_eq!(err.to_string(), "Pipe 'describe' failed (stack: outer > describe): no output");
    }
}
