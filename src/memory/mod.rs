//! Cross-process shared memory.
//!
//! Only one kind of region is shared between pipelines: the master clock
//! published by the engine that owns the audio clock source.

mod shared;

pub use shared::{AvTransSharedMemory, CLOCK_REGION_LEN, ClockUnit, SharedClock};
