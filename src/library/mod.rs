//! Declarative libraries: JSON documents declaring domains, concepts and
//! pipes, turned into the frozen libraries a [`PipelexContext`](crate::core::context::PipelexContext) runs on.

pub mod blueprint;
pub mod manager;

pub use blueprint::{ConceptBlueprint, PipeBlueprint};
pub use manager::LibraryManager;
