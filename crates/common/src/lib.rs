pub mod domain;
pub mod nats;
pub mod redis_store;
pub mod telemetry;

pub use domain::*;
pub use nats::*;
pub use redis_store::*;
pub use telemetry::*;
