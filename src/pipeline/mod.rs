//! Pipeline construction and lifecycle.
//!
//! A [`PipelineCore`] owns the filters of one engine and drives them through
//! their lifecycle as a unit.
//!
//! # Example
//!
//! ```rust,ignore
//! use avtrans::pipeline::PipelineCore;
//!
//! let pipeline = PipelineCore::new();
//! let input = pipeline.add_filter(input_filter)?;
//! let output = pipeline.add_filter(output_filter)?;
//! pipeline.link(input, output)?;
//!
//! pipeline.init(receiver)?;
//! pipeline.prepare()?;
//! pipeline.start()?;
//! ```

mod graph;

pub use graph::{PipelineCore, PipelineState};
