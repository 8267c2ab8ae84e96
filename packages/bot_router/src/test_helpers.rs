use bridge_supervisor::BridgeSupervisor;
use std::sync::Arc;
use std::time::Duration;

use crate::AppState;
use crate::auth::AuthGate;
use crate::directory::{MemoryDirectory, SessionDirectory};
use crate::launcher::BridgeLauncher;
use crate::readiness::ReadinessProbe;
use crate::registry::InstanceRegistry;

pub const TEST_TOKEN: &str = "test-token";

/// `AppState` over an in-memory directory whose bridges run `program args`.
///
/// Readiness waits are short so tests against bridges that never listen
/// finish quickly.
pub fn test_app_state_with(
    base_port: u16,
    program: &str,
    args: &[&str],
) -> (AppState, Arc<MemoryDirectory>) {
    let store = Arc::new(MemoryDirectory::new());
    let registry = InstanceRegistry::new(
        BridgeSupervisor::new(base_port),
        BridgeLauncher::new(
            program,
            args.iter().map(|s| s.to_string()).collect(),
            "/tmp/tmux-test/default",
        ),
    );
    let state = AppState::new(
        registry,
        SessionDirectory::new(store.clone()),
        AuthGate::new(TEST_TOKEN),
        ReadinessProbe::new(Duration::from_millis(100), Duration::from_millis(10)),
    );
    (state, store)
}

/// Bridges are `sleep 30`: alive, but never listening.
pub fn test_app_state(base_port: u16) -> (AppState, Arc<MemoryDirectory>) {
    test_app_state_with(base_port, "sleep", &["30"])
}
