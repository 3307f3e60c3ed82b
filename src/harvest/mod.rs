//! Harvest module - paginated page collection.
//!
//! This module provides the core pieces of a harvest:
//! - **Pipeline**: stage coordinator via [`pipeline::HarvestPipeline`]
//! - **Assembly**: ordered page slots via [`assembler::ResultAssembler`]
//! - **Formats**: payload-to-page extraction via [`formats::ResponseShape`]

pub mod assembler;
pub mod formats;
pub mod pipeline;

// Re-export commonly used types
pub use assembler::ResultAssembler;
pub use formats::ResponseShape;
pub use pipeline::{HarvestError, HarvestOptions, HarvestPipeline, HarvestPipelineBuilder};
