use chrono::{DateTime, Utc};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use crate::error::SupervisorError;

/// Configuration for spawning a bridge process
#[derive(Clone, Debug, Default)]
pub struct BridgeConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Liveness of a bridge process, as last reported by its actor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeStatus {
    Running,
    Exited { code: Option<i32> },
}

impl BridgeStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, BridgeStatus::Running)
    }
}

/// Snapshot of a bridge process
#[derive(Clone, Debug)]
pub struct BridgeState {
    pub running: bool,
    pub pid: Option<u32>,
    pub port: u16,
    pub program: String,
    pub args: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
}

/// Messages that can be sent to the bridge actor
pub(crate) enum BridgeMessage {
    GetState {
        respond_to: oneshot::Sender<BridgeState>,
    },
    Terminate {
        respond_to: oneshot::Sender<Result<(), SupervisorError>>,
    },
}

/// Handle to communicate with a bridge actor
#[derive(Clone)]
pub struct BridgeHandle {
    sender: mpsc::Sender<BridgeMessage>,
    status: watch::Receiver<BridgeStatus>,
    port: u16,
    pid: Option<u32>,
}

impl BridgeHandle {
    /// Loopback port the bridge was told to bind
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current liveness without talking to the actor
    pub fn status(&self) -> BridgeStatus {
        *self.status.borrow()
    }

    pub fn is_alive(&self) -> bool {
        self.status().is_running()
    }

    /// Resolves once the process has exited (immediately if it already has)
    pub async fn exited(&self) -> BridgeStatus {
        let mut rx = self.status.clone();
        if let Ok(status) = rx.wait_for(|s| !s.is_running()).await {
            return *status;
        }
        *rx.borrow()
    }

    /// Get the current state of the bridge
    pub async fn state(&self) -> Result<BridgeState, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BridgeMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| SupervisorError::ChannelError("Failed to send state message".into()))?;
        rx.await
            .map_err(|_| SupervisorError::ChannelError("Failed to receive state response".into()))
    }

    /// Ask the process to terminate. Does not wait for it to exit.
    pub async fn terminate(&self) -> Result<(), SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BridgeMessage::Terminate { respond_to: tx })
            .await
            .map_err(|_| {
                SupervisorError::ChannelError("Failed to send terminate message".into())
            })?;
        rx.await.map_err(|_| {
            SupervisorError::ChannelError("Failed to receive terminate response".into())
        })?
    }
}

/// The actor that owns a single bridge child process
pub struct BridgeActor {
    child: Child,
    state: BridgeState,
    receiver: mpsc::Receiver<BridgeMessage>,
    status_tx: watch::Sender<BridgeStatus>,
}

impl BridgeActor {
    /// Start the process and return a handle to it
    pub fn spawn(config: BridgeConfig, port: u16) -> Result<BridgeHandle, SupervisorError> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn bridge '{}': {}", config.program, e);
            SupervisorError::SpawnFailed(format!("{}: {}", config.program, e))
        })?;

        let pid = child.id();

        let state = BridgeState {
            running: true,
            pid,
            port,
            program: config.program,
            args: config.args,
            started_at: Utc::now(),
            exit_code: None,
        };

        let (status_tx, status_rx) = watch::channel(BridgeStatus::Running);
        let (msg_tx, msg_rx) = mpsc::channel(16);

        let actor = Self {
            child,
            state,
            receiver: msg_rx,
            status_tx,
        };

        tokio::spawn(actor.run());

        Ok(BridgeHandle {
            sender: msg_tx,
            status: status_rx,
            port,
            pid,
        })
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                status = self.child.wait() => {
                    let code = match status {
                        Ok(status) => status.code(),
                        Err(e) => {
                            warn!("Failed to wait on bridge {:?}: {}", self.state.pid, e);
                            None
                        }
                    };
                    info!(
                        "Bridge {} (port {}, pid {:?}) exited with code {:?}",
                        self.state.program, self.state.port, self.state.pid, code
                    );
                    self.state.running = false;
                    self.state.exit_code = code;
                    let _ = self.status_tx.send(BridgeStatus::Exited { code });
                    break;
                }
                Some(msg) = self.receiver.recv() => self.handle_message(msg),
            }
        }

        // Keep answering handles after exit so callers see a consistent state
        while let Some(msg) = self.receiver.recv().await {
            self.handle_message(msg);
        }
    }

    fn handle_message(&mut self, msg: BridgeMessage) {
        match msg {
            BridgeMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state.clone());
            }
            BridgeMessage::Terminate { respond_to } => {
                let _ = respond_to.send(self.handle_terminate());
            }
        }
    }

    fn handle_terminate(&mut self) -> Result<(), SupervisorError> {
        if !self.state.running {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Some(pid) = self.state.pid {
                kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                    .map_err(|e| SupervisorError::KillFailed(e.to_string()))?;
            }
        }
        #[cfg(not(unix))]
        {
            self.child
                .start_kill()
                .map_err(|e| SupervisorError::KillFailed(e.to_string()))?;
        }

        Ok(())
    }
}
