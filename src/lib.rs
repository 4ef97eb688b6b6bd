//! # Pipelex
//!
//! A typed pipe execution engine: declarative pipelines that chain LLM,
//! OCR, image-generation and templating calls over a shared working memory.
//!
//! ## Features
//!
//! - **Typed Data**: Every piece of data is a [`Stuff`] tagged with a concept code, checked against a concept library
//! - **Composable Pipes**: Operators call providers, controllers (sequence, batch, condition) orchestrate other pipes
//! - **Bounded Fan-out**: Batches run their branches concurrently with a configurable cap and stay ordered
//! - **Provider-agnostic**: Pipes only see the [`ContentGenerator`] trait; an Ollama backend is feature-gated
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pipelex::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(content_generator: Arc<dyn ContentGenerator>) -> Result<(), PipelexError> {
//! let mut manager = LibraryManager::new(PipelexConfig::default())?;
//! manager.load_from_json_str(
//!     r#"{
//!         "domain": "zoo",
//!         "definition": "Everything about animals",
//!         "pipe": {
//!             "describe": {
//!                 "type": "PipeLLM",
//!                 "input": "Text",
//!                 "output": "Text",
//!                 "prompt_template": "Describe this animal: {{ text }}"
//!             }
//!         }
//!     }"#,
//! )?;
//! let ctx = manager.into_context_builder(content_generator)?.build()?;
//!
//! let memory = WorkingMemoryFactory::make_from_text("a red fox", "native.Text", None)?;
//! let (output, mission_id) = ctx.execute("describe", Some(memory), None, None, None).await?;
//! println!("{}", output.main_stuff_as_text()?);
//! ctx.close_mission(&mission_id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`core`]: Concepts, stuffs, working memory, the pipe abstraction, router and context
//! - [`cogt`]: Content generation interface and its supporting types
//! - [`pipe_operators`]: Leaf pipes (LLM, Jinja2, OCR, image generation, functions)
//! - [`pipe_controllers`]: Sequence, batch and condition pipes
//! - [`library`]: Loading declared domains, concepts and pipes from JSON
//! - [`mission`]: Mission execution, job metadata, tracking and usage reports
//! - [`prelude`]: Commonly used types and traits (import with `use pipelex::prelude::*`)

// ============================================================================
// Modules
// ============================================================================

pub mod cogt;
pub mod core;
pub mod library;
pub mod mission;
pub mod pipe_controllers;
pub mod pipe_operators;

// ============================================================================
// Public Re-exports - Granular Imports
// ============================================================================

// Data model
pub use crate::core::concept::{Concept, NativeConcept, StructureClass};
pub use crate::core::stuff::{Stuff, StuffFactory};
pub use crate::core::stuff_content::{ContentKind, StuffContent};
pub use crate::core::working_memory::{WorkingMemory, WorkingMemoryFactory};

// Execution
pub use crate::core::config::PipelexConfig;
pub use crate::core::context::{PipelexContext, PipelexContextBuilder};
pub use crate::core::error::{ErrorCategory, PipelexError};
pub use crate::core::func_registry::FuncRegistry;
pub use crate::core::pipe::{Pipe, PipeCore, PipeJob, PipeKind, PipeOutput};
pub use crate::core::pipe_run_params::{BatchParams, PipeOutputMultiplicity, PipeRunParams};
pub use crate::core::router::{PipeRouter, PipeRouterProtocol};

// Content generation
pub use crate::cogt::error::CogtError;
pub use crate::cogt::{ContentGenerator, LlmPromptFactory};

// Libraries and missions
pub use crate::library::LibraryManager;
pub use crate::mission::job_metadata::JobMetadata;
pub use crate::mission::tracker::{MemoryMissionTracker, MissionTracker, NoopMissionTracker};

// ============================================================================
// Prelude Module - Convenient Bulk Imports
// ============================================================================

/// The main prelude: everything needed to load a library and run pipes.
///
/// # Example
/// ```rust
/// use pipelex::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        BatchParams,
        CogtError,
        Concept,
        ContentGenerator,
        ContentKind,
        ErrorCategory,
        FuncRegistry,
        JobMetadata,
        // Libraries
        LibraryManager,
        LlmPromptFactory,
        MemoryMissionTracker,
        MissionTracker,
        NativeConcept,
        NoopMissionTracker,
        // Pipes
        Pipe,
        PipeCore,
        PipeJob,
        PipeKind,
        PipeOutput,
        PipeOutputMultiplicity,
        PipeRouter,
        PipeRouterProtocol,
        PipeRunParams,
        PipelexConfig,
        // Context
        PipelexContext,
        PipelexContextBuilder,
        PipelexError,
        StructureClass,
        // Data
        Stuff,
        StuffContent,
        StuffFactory,
        WorkingMemory,
        WorkingMemoryFactory,
    };
}

// ============================================================================
// LLM Feature
// ============================================================================

#[cfg(feature = "llm")]
pub use crate::cogt::ollama::{OllamaConfig, OllamaContentGenerator};

// ============================================================================
// Re-export commonly used external types for convenience
// ============================================================================

pub use serde_json::Value as JsonValue;

// ============================================================================
// Library Metadata
// ============================================================================

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
