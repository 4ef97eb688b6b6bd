use thiserror::Error;

use crate::cogt::error::CogtError;

/// Coarse classification of a [`PipelexError`], used by callers that want to
/// decide between aborting, skipping or falling back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed declarations, caught at library load.
    Definition,
    /// Invalid run parameters or missing inputs for one invocation.
    RunParams,
    /// A provider or model lacks the requested feature.
    Capability,
    /// Lookup or typing failures inside a working memory.
    WorkingMemory,
    /// Persisted form could not be read or written.
    Serialization,
}

#[derive(Debug, Error)]
pub enum PipelexError {
    // ---- definition errors ----
    #[error("Invalid concept code '{code}': {reason}")]
    ConceptCode { code: String, reason: String },

    #[error("Concept library error: {0}")]
    ConceptLibrary(String),

    #[error("Domain library error: {0}")]
    DomainLibrary(String),

    #[error("Pipe '{pipe_code}' is badly defined: {message}")]
    PipeDefinition { pipe_code: String, message: String },

    #[error("Pipe library error: {0}")]
    PipeLibrary(String),

    #[error("Library parsing error: {0}")]
    LibraryParsing(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // ---- run-parameter errors ----
    #[error("Run params error in pipe '{pipe_code}' (stack: {}): {message}", .pipe_layers.join(" > "))]
    PipeRunParams {
        pipe_code: String,
        pipe_layers: Vec<String>,
        message: String,
    },

    #[error(
        "Pipe stack limit of {limit} exceeded when entering pipe '{pipe_code}' (stack: {})",
        .pipe_layers.join(" > ")
    )]
    PipeStackOverflow {
        pipe_code: String,
        limit: usize,
        pipe_layers: Vec<String>,
    },

    #[error(
        "Missing input for pipe '{pipe_code}' (stack: {}): {message}",
        .pipe_layers.join(" > ")
    )]
    PipeInput {
        pipe_code: String,
        pipe_layers: Vec<String>,
        message: String,
    },

    #[error("Pipe '{pipe_code}' failed (stack: {}): {message}", .pipe_layers.join(" > "))]
    PipeExecution {
        pipe_code: String,
        pipe_layers: Vec<String>,
        message: String,
    },

    #[error("Condition pipe '{pipe_code}' (stack: {}): {message}", .pipe_layers.join(" > "))]
    PipeCondition {
        pipe_code: String,
        pipe_layers: Vec<String>,
        message: String,
    },

    #[error("Function '{0}' is not registered")]
    FuncNotFound(String),

    #[error("Pipe '{pipe_code}' failed (stack: {}): {source}", .pipe_layers.join(" > "))]
    InPipe {
        pipe_code: String,
        pipe_layers: Vec<String>,
        #[source]
        source: Box<PipelexError>,
    },

    // ---- capability errors ----
    #[error(transparent)]
    Cogt(#[from] CogtError),

    // ---- working-memory errors ----
    #[error("Stuff '{name}' not found in working memory, valid keys are: [{}]", .valid_keys.join(", "))]
    StuffNotFound {
        name: String,
        valid_keys: Vec<String>,
    },

    #[error("Attribute path '{path}' is invalid: {reason}")]
    StuffAttributeNotFound { path: String, reason: String },

    #[error("Stuff at '{path}' has content kind '{actual}' but '{wanted}' was wanted")]
    StuffContentType {
        path: String,
        wanted: String,
        actual: String,
    },

    #[error("Working memory alias error on '{alias}': {message}")]
    WorkingMemoryAlias { alias: String, message: String },

    #[error("Stuff code '{stuff_code}' is already used by entry '{existing_name}'")]
    DuplicateStuffCode {
        stuff_code: String,
        existing_name: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelexError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelexError::InPipe { source, .. } => source.category(),
            PipelexError::ConceptCode { .. }
            | PipelexError::ConceptLibrary(_)
            | PipelexError::DomainLibrary(_)
            | PipelexError::PipeDefinition { .. }
            | PipelexError::PipeLibrary(_)
            | PipelexError::LibraryParsing(_)
            | PipelexError::Config(_) => ErrorCategory::Definition,
            PipelexError::PipeRunParams { .. }
            | PipelexError::PipeStackOverflow { .. }
            | PipelexError::PipeInput { .. }
            | PipelexError::PipeExecution { .. }
            | PipelexError::PipeCondition { .. }
            | PipelexError::FuncNotFound(_) => ErrorCategory::RunParams,
            PipelexError::Cogt(err) if err.is_capability_error() => ErrorCategory::Capability,
            PipelexError::Cogt(_) => ErrorCategory::RunParams,
            PipelexError::StuffNotFound { .. }
            | PipelexError::StuffAttributeNotFound { .. }
            | PipelexError::StuffContentType { .. }
            | PipelexError::WorkingMemoryAlias { .. }
            | PipelexError::DuplicateStuffCode { .. } => ErrorCategory::WorkingMemory,
            PipelexError::Serialization(_) => ErrorCategory::Serialization,
        }
    }

    /// True when the failure comes from a provider lacking a feature, so the
    /// caller may skip or fall back instead of aborting.
    pub fn is_capability_error(&self) -> bool {
        matches!(self.root_cause(), PipelexError::Cogt(err) if err.is_capability_error())
    }

    /// The innermost error, with any pipe context peeled off.
    pub fn root_cause(&self) -> &PipelexError {
        match self {
            PipelexError::InPipe { source, .. } => source.root_cause(),
            other => other,
        }
    }

    fn carries_pipe_context(&self) -> bool {
        matches!(
            self,
            PipelexError::PipeRunParams { .. }
                | PipelexError::PipeStackOverflow { .. }
                | PipelexError::PipeInput { .. }
                | PipelexError::PipeExecution { .. }
                | PipelexError::PipeCondition { .. }
                | PipelexError::InPipe { .. }
        )
    }

    /// Wraps an error escaping a running pipe so that it names the pipe and
    /// its layer stack. Applied once, by the innermost pipe that failed.
    pub fn with_pipe_context(self, pipe_code: &str, pipe_layers: &[String]) -> PipelexError {
        if self.carries_pipe_context() {
            return self;
        }
        PipelexError::InPipe {
            pipe_code: pipe_code.to_string(),
            pipe_layers: pipe_layers.to_vec(),
            source: Box::new(self),
        }
    }

    /// Attaches the pipe code and layer stack to a working-memory error raised
    /// while an operator was gathering its inputs. Other errors pass through.
    pub fn in_pipe(self, pipe_code: &str, pipe_layers: &[String]) -> PipelexError {
        match self.category() {
            ErrorCategory::WorkingMemory => PipelexError::PipeInput {
                pipe_code: pipe_code.to_string(),
                pipe_layers: pipe_layers.to_vec(),
                message: self.to_string(),
            },
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_valid_keys() {
        let err = PipelexError::StuffNotFound {
            name: "nonexistent".to_string(),
            valid_keys: vec![],
        };
        assert_eq!(
            err.to_string(),
            "Stuff 'nonexistent' not found in working memory, valid keys are: []"
        );
        assert_eq!(err.category(), ErrorCategory::WorkingMemory);
    }

    #[test]
    fn test_in_pipe_wraps_only_working_memory_errors() {
        let layers = vec!["outer".to_string(), "inner".to_string()];
        let wrapped = PipelexError::StuffNotFound {
            name: "image".to_string(),
            valid_keys: vec!["text".to_string()],
        }
        .in_pipe("inner", &layers);
        let message = wrapped.to_string();
        assert!(message.contains("inner"));
        assert!(message.contains("outer > inner"));
        assert!(message.contains("valid keys are: [text]"));

        let untouched = PipelexError::PipeLibrary("boom".to_string()).in_pipe("inner", &layers);
        assert!(matches!(untouched, PipelexError::PipeLibrary(_)));
    }

    #[test]
    fn test_capability_errors_are_distinguishable() {
        let err: PipelexError = CogtError::Capability {
            handle: "gpt-4o-mini".to_string(),
            capability: "vision".to_string(),
        }
        .into();
        assert!(err.is_capability_error());
        assert_eq!(err.category(), ErrorCategory::Capability);

        let err: PipelexError = CogtError::CompletionEmpty("no choices".to_string()).into();
        assert!(!err.is_capability_error());
    }

    #[test]
    fn test_pipe_context_is_attached_once() {
        let inner_layers = vec!["batch".to_string(), "describe".to_string()];
        let err: PipelexError = CogtError::Capability {
            handle: "tiny-model".to_string(),
            capability: "vision".to_string(),
        }
        .into();

        let wrapped = err
            .with_pipe_context("describe", &inner_layers)
            .with_pipe_context("batch", &inner_layers[..1]);

        let PipelexError::InPipe { pipe_code, pipe_layers, .. } = &wrapped else {
            panic!("expected pipe context, got {wrapped:?}");
        };
        assert_eq!(pipe_code, "describe");
        assert_eq!(pipe_layers, &inner_layers);
        assert!(wrapped.to_string().contains("batch > describe"));
        assert!(wrapped.is_capability_error());
        assert_eq!(wrapped.category(), ErrorCategory::Capability);
        assert!(matches!(wrapped.root_cause(), PipelexError::Cogt(_)));
    }
}
