mod notification_consumer;
mod session_link;

pub use notification_consumer::*;
pub use session_link::*;
