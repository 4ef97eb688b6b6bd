//! Missions group everything that happens during one end-to-end run: job
//! metadata, provenance tracking and usage reports.

pub mod execute;
pub mod job_metadata;
pub mod manager;
pub mod report;
pub mod tracker;
