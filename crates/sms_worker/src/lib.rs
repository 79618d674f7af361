//! SMS worker: pulls send requests off the queue, submits them to the
//! operator, and turns operator acks and receipts into status events.

pub mod domain;
pub mod metrics;
pub mod nats;
pub mod operator;
pub mod periodic;
pub mod sms_worker;

pub use domain::*;
pub use metrics::*;
pub use nats::*;
pub use operator::*;
pub use periodic::*;
pub use sms_worker::*;
