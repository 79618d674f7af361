mod memory_store;
mod rate_limiter;
mod request_handler;
mod sequence;
mod status_correlator;
mod submission;

pub use memory_store::*;
pub use rate_limiter::*;
pub use request_handler::*;
pub use sequence::*;
pub use status_correlator::*;
pub use submission::*;
