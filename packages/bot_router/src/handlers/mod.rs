pub mod dispatch;
pub mod health;

pub use dispatch::dispatch;
pub use health::{health_handler, metrics_handler};
