//! Controllers orchestrate other pipes through the router and never call a
//! provider themselves.

pub mod batch;
pub mod condition;
pub mod sequence;
pub mod sub_pipe;

pub use batch::PipeBatch;
pub use condition::PipeCondition;
pub use sequence::PipeSequence;
pub use sub_pipe::SubPipe;
