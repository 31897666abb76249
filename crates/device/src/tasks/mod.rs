//! Long-running tasks. Each owns its queue endpoints and recovers from
//! every error in-task; none of them ever exits.

pub mod alarm;
pub mod cloud;
pub mod command;
pub mod lcd;
pub mod monitor;
pub mod sampler;
