//! Utility modules shared by the index, tools and pipeline.

pub mod exec;
pub mod fs;
