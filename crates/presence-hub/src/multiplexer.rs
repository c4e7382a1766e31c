use crate::transport::{ConnectionState, TransportConnection};
use futures_util::future::join_all;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

const LINK_QUEUE_CAPACITY: usize = 4;

#[derive(Debug)]
enum LinkCommand {
    Queue(String),
    Close,
}

struct Link {
    endpoint: PathBuf,
    tx: mpsc::Sender<LinkCommand>,
    state: watch::Receiver<ConnectionState>,
    handle: JoinHandle<()>,
}

/// Fans presence out to every endpoint. Each connection runs on its own task
/// so a stalled endpoint never delays the others.
pub struct TransportMultiplexer {
    links: Vec<Link>,
}

impl TransportMultiplexer {
    pub fn new(endpoints: Vec<PathBuf>, handshake: Arc<[u8]>, io_timeout: Duration) -> Self {
        let links = endpoints
            .into_iter()
            .map(|endpoint| {
                let conn = TransportConnection::new(endpoint.clone(), handshake.clone(), io_timeout);
                let (tx, rx) = mpsc::channel(LINK_QUEUE_CAPACITY);
                let (state_tx, state) = watch::channel(ConnectionState::Offline);
                let handle = tokio::spawn(run_link(conn, rx, state_tx));
                Link {
                    endpoint,
                    tx,
                    state,
                    handle,
                }
            })
            .collect();
        Self { links }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Hands the same document to every link. Returns how many accepted it.
    pub fn broadcast(&self, payload: &str) -> usize {
        let mut accepted = 0;
        for link in &self.links {
            match link.tx.try_send(LinkCommand::Queue(payload.to_string())) {
                Ok(()) => accepted += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(event = "ipc_link_backlog", endpoint = %link.endpoint.display());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(event = "ipc_link_closed", endpoint = %link.endpoint.display());
                }
            }
        }
        accepted
    }

    pub fn close_all(&self) {
        for link in &self.links {
            if let Err(mpsc::error::TrySendError::Full(command)) = link.tx.try_send(LinkCommand::Close)
            {
                let tx = link.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(command).await;
                });
            }
        }
    }

    pub fn states(&self) -> Vec<(PathBuf, ConnectionState)> {
        self.links
            .iter()
            .map(|link| (link.endpoint.clone(), *link.state.borrow()))
            .collect()
    }

    /// Stops every link task after it drains its queue and closes.
    pub async fn shutdown(self) {
        let handles: Vec<JoinHandle<()>> = self
            .links
            .into_iter()
            .map(|link| {
                drop(link.tx);
                link.handle
            })
            .collect();
        for result in join_all(handles).await {
            if let Err(err) = result {
                warn!(event = "ipc_link_join_error", error = %err);
            }
        }
    }
}

async fn run_link(
    mut conn: TransportConnection,
    mut rx: mpsc::Receiver<LinkCommand>,
    state_tx: watch::Sender<ConnectionState>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            LinkCommand::Queue(payload) => {
                conn.queue(payload).await;
            }
            LinkCommand::Close => conn.close(),
        }
        state_tx.send_replace(conn.state());
    }
    conn.close();
    state_tx.send_replace(conn.state());
    debug!(event = "ipc_link_stop", endpoint = %conn.endpoint().display());
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::transport::fake_host::{self, HostMode};
    use crate::transport::{endpoint_path, handshake_frame};
    use presence_core::documents::HandshakeDocument;
    use presence_core::ipc_frame::Opcode;
    use tempfile::TempDir;

    fn handshake() -> Arc<[u8]> {
        handshake_frame(&HandshakeDocument::new("383226320970055681")).expect("handshake")
    }

    async fn wait_state(mux: &TransportMultiplexer, idx: usize, expected: ConnectionState) {
        let mut state = mux.links[idx].state.clone();
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|state| *state == expected))
            .await
            .expect("state change in time")
            .expect("link alive");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stalled_endpoint_does_not_delay_others() {
        let dir = TempDir::new().expect("tempdir");
        let _silent = fake_host::spawn(&endpoint_path(dir.path(), 0), HostMode::Silent);
        let mut echo = fake_host::spawn(&endpoint_path(dir.path(), 1), HostMode::Echo);
        let mux = TransportMultiplexer::new(
            vec![
                endpoint_path(dir.path(), 0),
                endpoint_path(dir.path(), 1),
                endpoint_path(dir.path(), 2),
            ],
            handshake(),
            Duration::from_secs(10),
        );

        assert_eq!(mux.broadcast(r#"{"cmd":"SET_ACTIVITY"}"#), 3);

        let deadline = Duration::from_millis(1500);
        let first = tokio::time::timeout(deadline, echo.recv())
            .await
            .expect("handshake in time")
            .expect("frame");
        assert_eq!(first.opcode, Opcode::Handshake);
        let second = tokio::time::timeout(deadline, echo.recv())
            .await
            .expect("presence in time")
            .expect("frame");
        assert_eq!(second.opcode, Opcode::Frame);

        wait_state(&mux, 1, ConnectionState::Authenticated).await;
        wait_state(&mux, 2, ConnectionState::Offline).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_all_and_shutdown_take_links_offline() {
        let dir = TempDir::new().expect("tempdir");
        let _echo = fake_host::spawn(&endpoint_path(dir.path(), 0), HostMode::Echo);
        let mux = TransportMultiplexer::new(
            vec![endpoint_path(dir.path(), 0)],
            handshake(),
            Duration::from_secs(2),
        );

        mux.broadcast("{}");
        wait_state(&mux, 0, ConnectionState::Authenticated).await;
        mux.close_all();
        wait_state(&mux, 0, ConnectionState::Offline).await;

        mux.broadcast("{}");
        wait_state(&mux, 0, ConnectionState::Authenticated).await;
        let states = mux.states();
        assert_eq!(states.len(), 1);
        mux.shutdown().await;
    }
}
