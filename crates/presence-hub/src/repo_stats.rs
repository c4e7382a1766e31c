use git2::{Branch, Oid, Repository};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error("repository at {0} has no working tree")]
    Bare(PathBuf),
    #[error("HEAD is not on a branch")]
    DetachedHead,
    #[error("reference {0} has no target commit")]
    NoTarget(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamStats {
    pub name: String,
    pub reference: String,
    pub commits: i64,
}

/// Raw counts for one repository. Counts are absolute and only mean something
/// against a baseline captured earlier by the owning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStats {
    pub head_name: String,
    pub head_ref: String,
    pub head_commits: i64,
    pub upstream: Option<UpstreamStats>,
}

impl RepoStats {
    pub fn has_upstream(&self) -> bool {
        self.upstream.is_some()
    }

    pub fn origin_commits(&self) -> Option<i64> {
        self.upstream.as_ref().map(|upstream| upstream.commits)
    }
}

pub trait RepoStatSource: Send + Sync {
    /// Walks upward from `path` to the enclosing working tree and returns its
    /// canonical root, or `None` when no repository is found.
    fn discover(&self, path: &Path) -> Option<PathBuf>;

    fn stats(&self, root: &Path) -> Result<RepoStats, StatError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GitStatSource;

impl RepoStatSource for GitStatSource {
    fn discover(&self, path: &Path) -> Option<PathBuf> {
        let repo = Repository::discover(path).ok()?;
        let workdir = repo.workdir()?;
        std::fs::canonicalize(workdir).ok()
    }

    fn stats(&self, root: &Path) -> Result<RepoStats, StatError> {
        let repo = Repository::open(root)?;
        if repo.is_bare() {
            return Err(StatError::Bare(root.to_path_buf()));
        }
        let head = repo.head()?;
        if !head.is_branch() {
            return Err(StatError::DetachedHead);
        }
        let head_ref = head.name().unwrap_or("HEAD").to_string();
        let head_name = head.shorthand().unwrap_or(&head_ref).to_string();
        let head_oid = head
            .target()
            .ok_or_else(|| StatError::NoTarget(head_ref.clone()))?;
        let head_commits = count_commits(&repo, head_oid)?;

        let upstream = match Branch::wrap(head).upstream() {
            Ok(branch) => {
                let reference = branch.get();
                let name = reference.shorthand().unwrap_or_default().to_string();
                let full = reference.name().unwrap_or_default().to_string();
                let oid = reference
                    .target()
                    .ok_or_else(|| StatError::NoTarget(full.clone()))?;
                Some(UpstreamStats {
                    name,
                    reference: full,
                    commits: count_commits(&repo, oid)?,
                })
            }
            Err(_) => None,
        };

        Ok(RepoStats {
            head_name,
            head_ref,
            head_commits,
            upstream,
        })
    }
}

// Full traversal every time; the walk is the only source of truth for counts.
fn count_commits(repo: &Repository, tip: Oid) -> Result<i64, StatError> {
    let mut revwalk = repo.revwalk()?;
    revwalk.push(tip)?;
    let mut count = 0i64;
    for oid in revwalk {
        oid?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory source keyed by repository root. Any path below a registered
    /// root discovers to that root.
    #[derive(Default)]
    pub struct FakeStatSource {
        repos: Mutex<HashMap<PathBuf, Option<RepoStats>>>,
        calls: Mutex<HashMap<PathBuf, usize>>,
    }

    impl FakeStatSource {
        pub fn set(&self, root: &str, stats: Option<RepoStats>) {
            if let Ok(mut repos) = self.repos.lock() {
                repos.insert(PathBuf::from(root), stats);
            }
        }

        pub fn remove(&self, root: &str) {
            if let Ok(mut repos) = self.repos.lock() {
                repos.remove(Path::new(root));
            }
        }

        /// Number of `stats` queries made against `root` so far.
        pub fn stat_calls(&self, root: &str) -> usize {
            self.calls
                .lock()
                .ok()
                .and_then(|calls| calls.get(Path::new(root)).copied())
                .unwrap_or_default()
        }
    }

    pub fn stats(branch: &str, head: i64, origin: Option<i64>) -> RepoStats {
        RepoStats {
            head_name: branch.to_string(),
            head_ref: format!("refs/heads/{branch}"),
            head_commits: head,
            upstream: origin.map(|commits| UpstreamStats {
                name: format!("origin/{branch}"),
                reference: format!("refs/remotes/origin/{branch}"),
                commits,
            }),
        }
    }

    impl RepoStatSource for FakeStatSource {
        fn discover(&self, path: &Path) -> Option<PathBuf> {
            let repos = self.repos.lock().ok()?;
            path.ancestors()
                .find(|candidate| repos.contains_key(*candidate))
                .map(Path::to_path_buf)
        }

        fn stats(&self, root: &Path) -> Result<RepoStats, StatError> {
            if let Ok(mut calls) = self.calls.lock() {
                *calls.entry(root.to_path_buf()).or_default() += 1;
            }
            let repos = self
                .repos
                .lock()
                .map_err(|_| StatError::NoTarget(root.display().to_string()))?;
            match repos.get(root) {
                Some(Some(stats)) => Ok(stats.clone()),
                _ => Err(StatError::NoTarget(root.display().to_string())),
            }
        }
    }
}
