mod queue_scheduler;
mod status_producer;
mod subscription;

pub use queue_scheduler::*;
pub use status_producer::*;
pub use subscription::*;
