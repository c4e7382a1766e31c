use crate::assets::editor_icon;
use crate::repo_stats::RepoStatSource;
use crate::session::Session;
use presence_core::documents::SessionSnapshot;
use presence_core::rpc::{ClientId, DEBUG_CLIENT_ID};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ClientRecord {
    pub editor_name: Option<String>,
    pub editor_icon: Option<String>,
    sessions: HashSet<PathBuf>,
}

impl ClientRecord {
    #[cfg(test)]
    pub fn sessions(&self) -> &HashSet<PathBuf> {
        &self.sessions
    }
}

/// Owns every cached session. Clients and history entries refer to sessions
/// by canonical root only.
pub struct SessionRegistry {
    source: Arc<dyn RepoStatSource>,
    sessions: HashMap<PathBuf, Session>,
    clients: HashMap<ClientId, ClientRecord>,
    history: Vec<(ClientId, PathBuf)>,
    previous_tick: HashSet<ClientId>,
    active_client: Option<ClientId>,
    active_session: Option<PathBuf>,
    waiting: bool,
    ready: bool,
    dont_await_repo: bool,
}

impl SessionRegistry {
    pub fn new(source: Arc<dyn RepoStatSource>, dont_await_repo: bool) -> Self {
        Self {
            source,
            sessions: HashMap::new(),
            clients: HashMap::new(),
            history: Vec::new(),
            previous_tick: HashSet::new(),
            active_client: None,
            active_session: None,
            waiting: true,
            ready: false,
            dont_await_repo,
        }
    }

    pub fn set_active(
        &mut self,
        client_id: ClientId,
        path: &Path,
        editor_name: Option<&str>,
    ) -> Option<&Session> {
        self.ready = true;
        let record = self.clients.entry(client_id).or_insert_with(|| {
            info!(event = "client_added", client_id);
            ClientRecord::default()
        });
        if let Some(editor) = editor_name {
            record.editor_icon = editor_icon(editor).map(str::to_string);
            record.editor_name = Some(editor.to_string());
        }

        let Some(root) = self.source.discover(path) else {
            warn!(event = "set_path_invalid", client_id, path = %path.display());
            self.waiting = true;
            return None;
        };

        match self.sessions.get_mut(&root) {
            Some(session) if session.valid => {
                debug!(event = "session_reused", client_id, repo = %session.name);
                session.add_parent(client_id);
                session.update_path(path.to_path_buf());
            }
            Some(session) => {
                debug!(event = "session_still_invalid", client_id, repo = %session.name);
                self.waiting = true;
                self.active_session = None;
                return None;
            }
            None => {
                let mut session = Session::new(root.clone(), path.to_path_buf());
                if !session.refresh(self.source.as_ref()) {
                    warn!(event = "session_unavailable", client_id, repo = %root.display());
                    self.waiting = true;
                    return None;
                }
                info!(event = "session_created", client_id, repo = %session.name);
                session.add_parent(client_id);
                self.sessions.insert(root.clone(), session);
            }
        }

        if let Some(record) = self.clients.get_mut(&client_id) {
            record.sessions.insert(root.clone());
        }
        self.push_history(client_id, root.clone());
        self.activate(client_id, root.clone());
        self.sessions.get(&root)
    }

    fn activate(&mut self, client_id: ClientId, root: PathBuf) {
        self.active_client = Some(client_id);
        self.active_session = Some(root);
        self.waiting = false;
    }

    fn push_history(&mut self, client_id: ClientId, root: PathBuf) {
        if self
            .history
            .last()
            .is_some_and(|(top_client, _)| *top_client == client_id)
        {
            self.history.pop();
        }
        self.history.push((client_id, root));
    }

    pub fn refresh_all(&mut self) {
        if self.waiting {
            return;
        }
        let source = self.source.as_ref();
        for session in self.sessions.values_mut() {
            session.refresh(source);
        }
    }

    /// Refreshes sessions whose raw or display name matches. Returns how many
    /// were touched.
    pub fn refresh_by_name(&mut self, name: &str) -> usize {
        if self.waiting {
            return 0;
        }
        let source = self.source.as_ref();
        let mut updated = 0;
        for session in self
            .sessions
            .values_mut()
            .filter(|session| session.name == name || session.pretty_name == name)
        {
            session.refresh(source);
            updated += 1;
        }
        info!(event = "refresh_by_name", repo = %name, updated);
        updated
    }

    /// Forgets a client and every session it alone owned. Returns false when the
    /// client was never tracked.
    pub fn drop_client(&mut self, client_id: ClientId) -> bool {
        let Some(record) = self.clients.remove(&client_id) else {
            return false;
        };
        for root in record.sessions {
            let orphaned = self
                .sessions
                .get_mut(&root)
                .is_some_and(|session| session.remove_parent(client_id));
            if orphaned {
                self.sessions.remove(&root);
                debug!(event = "session_dropped", repo = %root.display());
            }
        }
        self.history.retain(|(owner, _)| *owner != client_id);
        info!(
            event = "client_dropped",
            client_id,
            remaining = self.clients.len()
        );

        if self.active_client == Some(client_id) {
            self.fallback();
        }
        true
    }

    /// Drops clients seen last tick but not this one. Returns the dropped ids.
    pub fn reconcile_liveness(&mut self, mut current: HashSet<ClientId>) -> Vec<ClientId> {
        if self.previous_tick.contains(&DEBUG_CLIENT_ID) {
            current.insert(DEBUG_CLIENT_ID);
        }
        let mut departed: Vec<ClientId> = self.previous_tick.difference(&current).copied().collect();
        departed.sort_unstable();
        for client_id in &departed {
            self.drop_client(*client_id);
        }
        if self
            .active_client
            .is_some_and(|active| !current.contains(&active))
        {
            self.fallback();
        }
        self.previous_tick = current;
        departed
    }

    pub fn fallback(&mut self) -> bool {
        while let Some((client_id, root)) = self.history.last() {
            if self.sessions.get(root).is_some_and(|session| session.valid) {
                let (client_id, root) = (*client_id, root.clone());
                debug!(event = "fallback_selected", client_id, repo = %root.display());
                self.activate(client_id, root);
                return true;
            }
            self.history.pop();
        }
        info!(event = "fallback_exhausted");
        self.waiting = true;
        self.active_client = None;
        self.active_session = None;
        false
    }

    pub fn awaiting_repo(&self) -> bool {
        self.dont_await_repo && !self.ready
    }

    pub fn mark_not_ready(&mut self) {
        self.ready = false;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn has_clients(&self) -> bool {
        !self.clients.is_empty()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn session(&self, root: &Path) -> Option<&Session> {
        self.sessions.get(root)
    }

    pub fn client(&self, client_id: ClientId) -> Option<&ClientRecord> {
        self.clients.get(&client_id)
    }

    pub fn active_client_id(&self) -> Option<ClientId> {
        self.active_client
    }

    pub fn active_client(&self) -> Option<&ClientRecord> {
        self.active_client.and_then(|id| self.clients.get(&id))
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.active_session
            .as_ref()
            .and_then(|root| self.sessions.get(root))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.active_session()
            .map(Session::snapshot)
            .unwrap_or_else(SessionSnapshot::inactive)
    }
}
