mod correlation;
mod error;
mod sms;
mod status;

pub use correlation::*;
pub use error::*;
pub use sms::*;
pub use status::*;
