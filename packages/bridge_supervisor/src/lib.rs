//! Bridge Supervisor - lifecycle management for terminal bridge processes
//!
//! This crate spawns backend bridge processes (e.g. `ttyd`) bound to loopback
//! ports, tracks whether they are still alive, and terminates them on request.
//! It has no HTTP dependencies and knows nothing about how the ports are used.
//!
//! # Example
//!
//! ```no_run
//! use bridge_supervisor::{BridgeConfig, BridgeSupervisor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let supervisor = BridgeSupervisor::new(13000);
//!
//!     let (id, handle) = supervisor
//!         .spawn(|port| BridgeConfig {
//!             program: "ttyd".to_string(),
//!             args: vec!["-p".to_string(), port.to_string(), "bash".to_string()],
//!             ..Default::default()
//!         })
//!         .await
//!         .unwrap();
//!
//!     println!("{} listening on 127.0.0.1:{}", id, handle.port());
//!
//!     // Wait for the process to go away
//!     let status = handle.exited().await;
//!     println!("{} finished: {:?}", id, status);
//! }
//! ```

mod bridge;
mod error;
mod ports;
mod supervisor;

pub use bridge::{BridgeConfig, BridgeHandle, BridgeState, BridgeStatus};
pub use error::SupervisorError;
pub use ports::PortAllocator;
pub use supervisor::{BridgeId, BridgeSupervisor};
