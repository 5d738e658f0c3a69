#![doc = "Sampling engine for the shinobi CPU probe."]

pub mod channel;
pub mod sampler;
pub mod sampling_loop;
pub mod utilization;

pub use channel::*;
pub use sampler::*;
pub use sampling_loop::*;
pub use utilization::*;
