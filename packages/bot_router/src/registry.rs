use bridge_supervisor::{BridgeHandle, BridgeId, BridgeSupervisor, SupervisorError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::launcher::BridgeLauncher;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Alive,
    Exited,
}

/// A bridge the router started for one bot
#[derive(Clone)]
pub struct InstanceRecord {
    pub bot_name: String,
    pub session_id: String,
    pub port: u16,
    pub bridge_id: BridgeId,
    pub started_at: DateTime<Utc>,
    handle: BridgeHandle,
}

impl InstanceRecord {
    /// Sampled from the bridge's exit notification at call time
    pub fn liveness(&self) -> Liveness {
        if self.handle.is_alive() {
            Liveness::Alive
        } else {
            Liveness::Exited
        }
    }

    pub fn handle(&self) -> &BridgeHandle {
        &self.handle
    }

    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            bot_name: self.bot_name.clone(),
            session_id: self.session_id.clone(),
            port: self.port,
            pid: self.handle.pid(),
            liveness: self.liveness(),
            started_at: self.started_at,
        }
    }
}

/// Serializable view of an [`InstanceRecord`]
#[derive(Clone, Debug, Serialize)]
pub struct InstanceSummary {
    pub bot_name: String,
    pub session_id: String,
    pub port: u16,
    pub pid: Option<u32>,
    pub liveness: Liveness,
    pub started_at: DateTime<Utc>,
}

/// Outcome of [`InstanceRegistry::ensure`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ensured {
    /// A live instance already existed
    Reused { port: u16 },
    /// This call started the bridge
    Spawned { port: u16 },
    /// Another caller started the bridge while this one waited for it
    Joined { port: u16 },
}

impl Ensured {
    pub fn port(&self) -> u16 {
        match *self {
            Ensured::Reused { port } | Ensured::Spawned { port } | Ensured::Joined { port } => port,
        }
    }

    /// Whether the bridge was started during this request and may not be
    /// listening yet
    pub fn is_fresh(&self) -> bool {
        !matches!(self, Ensured::Reused { .. })
    }
}

/// One entry per bot name, pointing at its most recent bridge.
///
/// Entries are never removed while the router runs. A dead entry is replaced
/// on the next `ensure`, with a fresh port.
pub struct InstanceRegistry {
    supervisor: BridgeSupervisor,
    launcher: BridgeLauncher,
    instances: RwLock<HashMap<String, InstanceRecord>>,
    /// Serializes spawns per bot name
    spawn_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InstanceRegistry {
    pub fn new(supervisor: BridgeSupervisor, launcher: BridgeLauncher) -> Self {
        Self {
            supervisor,
            launcher,
            instances: RwLock::new(HashMap::new()),
            spawn_guards: Mutex::new(HashMap::new()),
        }
    }

    /// Return the port of a live instance for `bot_name`, starting one if needed.
    ///
    /// Concurrent first calls for the same name start exactly one bridge: the
    /// loser of the race waits on the per-name guard and then finds the
    /// winner's instance.
    pub async fn ensure(&self, bot_name: &str, session_id: &str) -> Result<Ensured, SupervisorError> {
        if let Some(port) = self.live_port(bot_name).await {
            debug!("Reusing instance for {} on port {}", bot_name, port);
            return Ok(Ensured::Reused { port });
        }

        let guard = self.spawn_guard(bot_name).await;
        let _spawning = guard.lock().await;

        if let Some(port) = self.live_port(bot_name).await {
            debug!("Joined concurrent spawn for {} on port {}", bot_name, port);
            return Ok(Ensured::Joined { port });
        }

        let launcher = &self.launcher;
        let (bridge_id, handle) = self
            .supervisor
            .spawn(|port| launcher.command(bot_name, session_id, port))
            .await?;

        let port = handle.port();
        info!(
            "Started bridge for {} (session {}) on port {} (pid={:?})",
            bot_name,
            session_id,
            port,
            handle.pid()
        );

        let record = InstanceRecord {
            bot_name: bot_name.to_string(),
            session_id: session_id.to_string(),
            port,
            bridge_id,
            started_at: Utc::now(),
            handle,
        };

        if let Some(previous) = self
            .instances
            .write()
            .await
            .insert(bot_name.to_string(), record)
        {
            debug!(
                "Replaced exited instance for {} (was port {})",
                bot_name, previous.port
            );
        }

        Ok(Ensured::Spawned { port })
    }

    async fn spawn_guard(&self, bot_name: &str) -> Arc<Mutex<()>> {
        self.spawn_guards
            .lock()
            .await
            .entry(bot_name.to_string())
            .or_default()
            .clone()
    }

    pub async fn get(&self, bot_name: &str) -> Option<InstanceRecord> {
        self.instances.read().await.get(bot_name).cloned()
    }

    /// Port of the instance for `bot_name` if it has not exited
    pub async fn live_port(&self, bot_name: &str) -> Option<u16> {
        self.instances
            .read()
            .await
            .get(bot_name)
            .filter(|record| record.liveness() == Liveness::Alive)
            .map(|record| record.port)
    }

    pub async fn is_live(&self, bot_name: &str) -> bool {
        self.live_port(bot_name).await.is_some()
    }

    /// All instances, sorted by bot name
    pub async fn list(&self) -> Vec<InstanceSummary> {
        let mut list: Vec<InstanceSummary> = self
            .instances
            .read()
            .await
            .values()
            .map(InstanceRecord::summary)
            .collect();
        list.sort_by(|a, b| a.bot_name.cmp(&b.bot_name));
        list
    }

    /// Signal every bridge still running. Does not wait for them to exit.
    pub async fn shutdown(&self) -> usize {
        let signalled = self.supervisor.kill_all().await;
        info!("Signalled {} bridge(s) to terminate", signalled);
        signalled
    }

    pub fn supervisor(&self) -> &BridgeSupervisor {
        &self.supervisor
    }
}
