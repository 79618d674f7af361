mod client;
mod middleware;
mod traits;

pub use client::*;
pub use middleware::*;
pub use traits::*;
