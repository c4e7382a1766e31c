use crate::liveness::ClientLivenessTracker;
use crate::multiplexer::TransportMultiplexer;
use crate::presence::{build_presence, PresenceOptions, PresenceState};
use crate::registry::SessionRegistry;
use crate::scheduler::{
    shutdown_decision, HookContext, HookOutcome, LivenessHook, UpdateScheduler,
};
use chrono::Utc;
use presence_core::documents::SessionSnapshot;
use presence_core::rpc::RpcCall;
use serde::Serialize;
use std::{path::Path, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

const COMMAND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct DaemonOptions {
    pub auto_update: bool,
    pub prevent_shutdown: bool,
    pub period: Duration,
    pub presence: PresenceOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RpcReply {
    Snapshot(SessionSnapshot),
    InvalidPath { valid: bool, path: String },
    Path { path: String },
    Status { status: bool },
}

#[derive(Debug)]
pub struct DaemonCommand {
    pub call: RpcCall,
    pub reply: oneshot::Sender<RpcReply>,
}

#[derive(Debug, Error)]
#[error("daemon event loop is no longer running")]
pub struct DaemonGone;

/// Cloneable front door to the event loop.
#[derive(Clone)]
pub struct DaemonHandle {
    tx: mpsc::Sender<DaemonCommand>,
}

impl DaemonHandle {
    pub fn channel() -> (Self, mpsc::Receiver<DaemonCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    pub async fn call(&self, call: RpcCall) -> Result<RpcReply, DaemonGone> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DaemonCommand { call, reply })
            .await
            .map_err(|_| DaemonGone)?;
        rx.await.map_err(|_| DaemonGone)
    }
}

/// Single owner of all mutable state. RPC commands and scheduler ticks are
/// handled one at a time on the loop in [`Daemon::run`].
pub struct Daemon {
    registry: SessionRegistry,
    liveness: ClientLivenessTracker,
    scheduler: UpdateScheduler,
    transports: TransportMultiplexer,
    presence: PresenceState,
    options: DaemonOptions,
    exit_requested: bool,
}

impl Daemon {
    pub fn new(
        registry: SessionRegistry,
        transports: TransportMultiplexer,
        options: DaemonOptions,
    ) -> Self {
        let mut scheduler = UpdateScheduler::new(options.period);
        scheduler.add_hook(Box::new(LivenessHook));
        Self {
            registry,
            liveness: ClientLivenessTracker::new(),
            scheduler,
            transports,
            presence: PresenceState::default(),
            options,
            exit_requested: false,
        }
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<DaemonCommand>,
        shutdown: Arc<watch::Sender<bool>>,
    ) {
        let mut shutdown_rx = shutdown.subscribe();
        if self.transports.is_empty() {
            warn!(event = "no_ipc_endpoints");
        }
        if self.registry.awaiting_repo() {
            self.scheduler.start();
        }
        info!(
            event = "daemon_start",
            endpoints = self.transports.len(),
            auto_update = self.options.auto_update,
            prevent_shutdown = self.options.prevent_shutdown
        );

        while !self.exit_requested {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                command = commands.recv() => {
                    let Some(DaemonCommand { call, reply }) = command else {
                        break;
                    };
                    let response = self.handle(call);
                    if reply.send(response).is_err() {
                        debug!(event = "rpc_reply_dropped");
                    }
                }
                _ = self.scheduler.wait() => self.tick(),
            }
        }

        self.scheduler.stop();
        debug!(event = "ipc_link_states", links = ?self.transports.states());
        self.transports.close_all();
        self.transports.shutdown().await;
        shutdown.send_replace(true);
        info!(event = "daemon_stop");
    }

    pub fn handle(&mut self, call: RpcCall) -> RpcReply {
        debug!(event = "rpc_call", method = call.method());
        match call {
            RpcCall::SetPath {
                client_id,
                path,
                editor,
            } => {
                self.liveness.record(client_id);
                let reply = match self
                    .registry
                    .set_active(client_id, Path::new(&path), editor.as_deref())
                {
                    Some(session) => RpcReply::Snapshot(session.snapshot()),
                    None => RpcReply::InvalidPath { valid: false, path },
                };
                if !self.presence.has_presence() && !self.scheduler.start() {
                    self.tick();
                }
                reply
            }
            RpcCall::GetPath => RpcReply::Path {
                path: self
                    .registry
                    .active_session()
                    .map(|session| session.root().display().to_string())
                    .unwrap_or_default(),
            },
            RpcCall::IsRunning => RpcReply::Status { status: true },
            RpcCall::Ping { client_id } => {
                self.liveness.record(client_id);
                RpcReply::Snapshot(self.registry.snapshot())
            }
            RpcCall::GitChange { name } => {
                if !self.options.auto_update && !name.is_empty() {
                    self.registry.refresh_by_name(&name);
                }
                RpcReply::Status { status: true }
            }
            RpcCall::Leave { client_id } => {
                let tracked = self.registry.drop_client(client_id);
                if tracked {
                    let outcome = shutdown_decision(&mut self.registry, self.options.prevent_shutdown);
                    self.apply_outcome(outcome);
                } else {
                    debug!(event = "leave_untracked", client_id);
                }
                RpcReply::Status { status: tracked }
            }
            RpcCall::GetInfo => RpcReply::Snapshot(self.registry.snapshot()),
            RpcCall::Shutdown => {
                info!(event = "shutdown_requested");
                let reply = RpcReply::Snapshot(self.registry.snapshot());
                self.apply_outcome(HookOutcome::Shutdown);
                reply
            }
        }
    }

    pub fn tick(&mut self) {
        if !self.registry.is_ready() && !self.registry.awaiting_repo() {
            debug!(event = "tick_skipped");
            return;
        }
        let outcome = {
            let mut ctx = HookContext {
                registry: &mut self.registry,
                liveness: &mut self.liveness,
                prevent_shutdown: self.options.prevent_shutdown,
            };
            self.scheduler.run_hooks(&mut ctx)
        };
        debug!(
            event = "tick",
            clients = self.registry.client_count(),
            sessions = self.registry.session_count(),
            outcome = ?outcome
        );
        if outcome != HookOutcome::Continue {
            self.apply_outcome(outcome);
            return;
        }

        if self.options.auto_update {
            self.registry.refresh_all();
        }

        if !self.registry.is_ready() && self.options.prevent_shutdown {
            self.clear_presence();
        } else {
            self.publish();
        }
    }

    fn apply_outcome(&mut self, outcome: HookOutcome) {
        match outcome {
            HookOutcome::Continue => {}
            HookOutcome::Pause => {
                self.scheduler.stop();
                self.clear_presence();
            }
            HookOutcome::Shutdown => {
                info!(event = "no_clients_exit", clients = self.registry.client_count());
                self.scheduler.stop();
                self.exit_requested = true;
            }
        }
    }

    fn publish(&mut self) {
        let started_at = self.presence.begin(Utc::now().timestamp());
        let document = build_presence(&self.registry, self.options.presence, started_at);
        match serde_json::to_string(&document) {
            Ok(payload) => {
                let accepted = self.transports.broadcast(&payload);
                debug!(
                    event = "presence_broadcast",
                    details = document.args.activity.details.as_deref().unwrap_or_default(),
                    links = accepted
                );
            }
            Err(err) => warn!(event = "presence_encode_error", error = %err),
        }
    }

    fn clear_presence(&mut self) {
        if self.presence.clear() {
            info!(event = "presence_cleared");
            self.transports.close_all();
        }
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}
