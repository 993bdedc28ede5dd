// Domain models for the stats stream

mod batch;
mod container;
mod sample;

pub use batch::Batch;
pub use container::{ContainerState, ContainerUsage};
pub use sample::Sample;
