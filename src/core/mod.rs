pub mod concept;
pub mod concept_library;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod func_registry;
pub mod pipe;
pub mod pipe_library;
pub mod pipe_run_params;
pub mod router;
pub mod stuff;
pub mod stuff_content;
pub mod working_memory;
