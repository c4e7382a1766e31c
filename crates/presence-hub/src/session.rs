use crate::assets::{language_for_path, Language};
use crate::repo_stats::{RepoStatSource, RepoStats};
use presence_core::documents::{CacheSnapshot, SessionSnapshot};
use presence_core::rpc::ClientId;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Per-branch counters. Every value except the baselines is a delta against
/// the baseline captured when the branch was first observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchStat {
    pub local_baseline: i64,
    pub ahead_of_local: i64,
    pub local_captured: bool,
    pub remote_baseline: i64,
    pub ahead_of_remote: i64,
    pub pushed_to_remote: i64,
    pub remote_captured: bool,
}

impl BranchStat {
    fn observe(&mut self, stats: &RepoStats) {
        let head = stats.head_commits;
        if self.local_captured {
            self.ahead_of_local = head - self.local_baseline;
        } else {
            self.local_baseline = head;
            self.ahead_of_local = 0;
            self.local_captured = true;
        }

        match stats.origin_commits() {
            Some(origin) if !self.remote_captured => {
                self.remote_baseline = origin;
                self.pushed_to_remote = 0;
                self.ahead_of_remote = head - origin;
                self.remote_captured = true;
            }
            Some(origin) => {
                self.pushed_to_remote = origin - self.remote_baseline;
                self.ahead_of_remote = head - origin + self.pushed_to_remote;
            }
            None => {
                self.remote_captured = false;
                self.remote_baseline = 0;
                self.ahead_of_remote = 0;
                self.pushed_to_remote = 0;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    root: PathBuf,
    tracked_path: PathBuf,
    pub valid: bool,
    pub name: String,
    pub pretty_name: String,
    pub branch: String,
    pub has_origin: bool,
    pub language: Option<Language>,
    branches: HashMap<String, BranchStat>,
    parents: HashSet<ClientId>,
}

impl Session {
    pub fn new(root: PathBuf, tracked_path: PathBuf) -> Self {
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let pretty_name = prettify(&name);
        let language = language_for_path(&tracked_path);
        Self {
            root,
            tracked_path,
            valid: false,
            name,
            pretty_name,
            branch: String::new(),
            has_origin: false,
            language,
            branches: HashMap::new(),
            parents: HashSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[cfg(test)]
    pub fn tracked_path(&self) -> &Path {
        &self.tracked_path
    }

    pub fn update_path(&mut self, path: PathBuf) {
        self.language = language_for_path(&path);
        self.tracked_path = path;
    }

    #[cfg(test)]
    pub fn parents(&self) -> &HashSet<ClientId> {
        &self.parents
    }

    pub fn add_parent(&mut self, client_id: ClientId) {
        self.parents.insert(client_id);
    }

    /// Returns true once the last owner is gone.
    pub fn remove_parent(&mut self, client_id: ClientId) -> bool {
        self.parents.remove(&client_id);
        self.parents.is_empty()
    }

    #[cfg(test)]
    pub fn branch_stat(&self, branch: &str) -> Option<&BranchStat> {
        self.branches.get(branch)
    }

    pub fn active_branch(&self) -> BranchStat {
        self.branches.get(&self.branch).copied().unwrap_or_default()
    }

    /// Re-queries the repository behind the tracked path. Failures degrade the
    /// session to invalid and drop its counters; the session stays cached.
    pub fn refresh(&mut self, source: &dyn RepoStatSource) -> bool {
        let stats = source
            .discover(&self.tracked_path)
            .ok_or(None)
            .and_then(|root| source.stats(&root).map_err(Some));
        match stats {
            Ok(stats) => {
                self.apply(&stats);
                debug!(
                    event = "session_refresh",
                    repo = %self.name,
                    branch = %self.branch,
                    has_origin = self.has_origin
                );
            }
            Err(err) => {
                if self.valid {
                    let reason = match err {
                        Some(err) => err.to_string(),
                        None => "not a repository".to_string(),
                    };
                    info!(event = "session_invalid", repo = %self.name, error = %reason);
                }
                self.invalidate();
            }
        }
        self.valid
    }

    fn apply(&mut self, stats: &RepoStats) {
        self.valid = true;
        self.branch = stats.head_name.clone();
        self.has_origin = stats.has_upstream();
        self.language = language_for_path(&self.tracked_path);
        self.branches
            .entry(stats.head_name.clone())
            .or_default()
            .observe(stats);
    }

    fn invalidate(&mut self) {
        self.valid = false;
        self.has_origin = false;
        self.language = None;
        self.branches.clear();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let stat = self.active_branch();
        SessionSnapshot {
            valid: self.valid,
            name: self.name.clone(),
            pretty_name: self.pretty_name.clone(),
            branch: self.branch.clone(),
            path: self.root.display().to_string(),
            has_origin: self.has_origin,
            cache: CacheSnapshot {
                local_commits_on_start: stat.local_baseline,
                ahead_of_local: stat.ahead_of_local,
                remote_commits_on_start: stat.remote_baseline,
                ahead_of_remote: stat.ahead_of_remote,
                pushed_to_remote: stat.pushed_to_remote,
            },
        }
    }
}

/// Turns `my-repo` into `My Repo`. Names containing underscores are kept as-is.
pub fn prettify(name: &str) -> String {
    if name.contains('_') {
        return name.to_string();
    }
    let mut pretty = String::with_capacity(name.len());
    let mut capitalize = true;
    for ch in name.chars() {
        if ch == '-' {
            pretty.push(' ');
            capitalize = true;
        } else if capitalize {
            pretty.extend(ch.to_uppercase());
            capitalize = false;
        } else {
            pretty.push(ch);
        }
    }
    pretty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_stats::fake::{stats, FakeStatSource};

    const ROOT: &str = "/work/presence-hub";

    fn session_with(source: &FakeStatSource, head: i64) -> Session {
        source.set(ROOT, Some(stats("main", head, None)));
        let mut session = Session::new(PathBuf::from(ROOT), PathBuf::from(ROOT).join("src/main.rs"));
        assert!(session.refresh(source));
        session
    }

    #[test]
    fn prettify_capitalizes_words_and_is_idempotent() {
        assert_eq!(prettify("presence-hub"), "Presence Hub");
        assert_eq!(prettify("a-"), "A ");
        assert_eq!(prettify("my_repo-name"), "my_repo-name");
        assert_eq!(prettify(""), "");
        for name in ["presence-hub", "x--y", "already Pretty", "rust-lang-rust", "-lead"] {
            let once = prettify(name);
            assert_eq!(prettify(&once), once, "{name}");
        }
    }

    #[test]
    fn local_baseline_then_upstream_appears() {
        let source = FakeStatSource::default();
        let mut session = session_with(&source, 5);
        let stat = session.active_branch();
        assert_eq!((stat.local_baseline, stat.ahead_of_local), (5, 0));
        assert!(!session.has_origin);

        source.set(ROOT, Some(stats("main", 8, None)));
        session.refresh(&source);
        assert_eq!(session.active_branch().ahead_of_local, 3);

        source.set(ROOT, Some(stats("main", 8, Some(2))));
        session.refresh(&source);
        let stat = session.active_branch();
        assert!(session.has_origin);
        assert_eq!(stat.local_baseline, 5);
        assert_eq!(stat.ahead_of_local, 3);
        assert_eq!(stat.remote_baseline, 2);
        assert_eq!(stat.pushed_to_remote, 0);
        assert_eq!(stat.ahead_of_remote, 6);
    }

    #[test]
    fn push_keeps_ahead_of_remote_stable() {
        let source = FakeStatSource::default();
        source.set(ROOT, Some(stats("main", 8, Some(2))));
        let mut session = Session::new(PathBuf::from(ROOT), PathBuf::from(ROOT));
        session.refresh(&source);

        source.set(ROOT, Some(stats("main", 8, Some(5))));
        session.refresh(&source);
        let stat = session.active_branch();
        assert_eq!(stat.pushed_to_remote, 3);
        assert_eq!(stat.ahead_of_remote, 6);

        source.set(ROOT, Some(stats("main", 8, None)));
        session.refresh(&source);
        let stat = session.active_branch();
        assert!(!stat.remote_captured);
        assert_eq!(
            (stat.remote_baseline, stat.pushed_to_remote, stat.ahead_of_remote),
            (0, 0, 0)
        );
        assert_eq!(stat.ahead_of_local, 0);
    }

    #[test]
    fn ahead_of_local_tracks_head_growth() {
        let source = FakeStatSource::default();
        let mut session = session_with(&source, 10);
        let mut previous = session.active_branch().ahead_of_local;
        for head in [10, 11, 11, 14, 20] {
            source.set(ROOT, Some(stats("main", head, None)));
            session.refresh(&source);
            let ahead = session.active_branch().ahead_of_local;
            assert_eq!(ahead, head - 10);
            assert!(ahead >= previous);
            previous = ahead;
        }

        // pulled from elsewhere past the baseline
        source.set(ROOT, Some(stats("main", 7, None)));
        session.refresh(&source);
        assert_eq!(session.active_branch().ahead_of_local, -3);
    }

    #[test]
    fn baselines_are_kept_per_branch() {
        let source = FakeStatSource::default();
        let mut session = session_with(&source, 5);
        source.set(ROOT, Some(stats("feature", 9, None)));
        session.refresh(&source);
        assert_eq!(session.branch, "feature");
        assert_eq!(session.active_branch().local_baseline, 9);

        source.set(ROOT, Some(stats("main", 6, None)));
        session.refresh(&source);
        assert_eq!(session.active_branch().ahead_of_local, 1);
        assert_eq!(
            session.branch_stat("feature").map(|stat| stat.local_baseline),
            Some(9)
        );
    }

    #[test]
    fn failed_refresh_degrades_then_recovers() {
        let source = FakeStatSource::default();
        let mut session = session_with(&source, 5);
        assert_eq!(session.language.as_ref().map(|lang| lang.name.as_str()), Some("Rust"));

        source.set(ROOT, None);
        assert!(!session.refresh(&source));
        assert!(!session.valid);
        assert_eq!(session.language, None);
        assert_eq!(session.active_branch(), BranchStat::default());
        let snapshot = session.snapshot();
        assert!(!snapshot.valid);
        assert_eq!(snapshot.cache, CacheSnapshot::default());

        source.set(ROOT, Some(stats("main", 12, None)));
        assert!(session.refresh(&source));
        assert_eq!(session.active_branch().local_baseline, 12);
        assert_eq!(session.snapshot().path, ROOT);
        assert_eq!(session.snapshot().pretty_name, "Presence Hub");
    }
}
