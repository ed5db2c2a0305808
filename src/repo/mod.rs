//! repo
//!
//! Single interface for all Git operations.
//!
//! Each configured repository is represented by one [`Repository`] that owns
//! the remote's coordinates and a per-repository lock. All mutation flows
//! through an ephemeral [`RepoSession`]: a brand-new clone in a temporary
//! directory, created for one webhook request and removed when the session
//! drops. Nothing is cached between requests, so a session can never observe
//! another request's staging state or a stale checkout.
//!
//! git2 calls are blocking; callers run the fetch → mutate → push sequence
//! on the blocking thread pool and hold the repository lock for its full
//! duration. The request deadline is threaded into the transport callbacks,
//! so an expired request aborts a clone or push mid-transfer.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use git2::build::RepoBuilder;
use git2::{Cred, FetchOptions, PushOptions, RemoteCallbacks};
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::RepositoryConfig;

/// Errors from repository operations.
///
/// Messages carry transport detail (authentication and network failures
/// included) for diagnostic logging; the HTTP layer never forwards them to
/// the caller.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The temporary working directory could not be created.
    #[error("failed to allocate session directory: {0}")]
    Workdir(#[source] std::io::Error),

    /// Cloning the remote failed.
    #[error("clone of '{url}' failed: {message}")]
    CloneFailed { url: String, message: String },

    /// Writing the committer identity into the clone failed.
    #[error("configuring repository failed: {message}")]
    ConfigFailed { message: String },

    /// Reading or writing the manifest inside the worktree failed.
    #[error("manifest access failed for '{path}': {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Staging or committing failed.
    #[error("commit failed: {message}")]
    CommitFailed { message: String },

    /// Pushing the branch upstream failed. `progress` holds any sideband
    /// output the server sent before the failure.
    #[error("push failed: {message}")]
    PushFailed { message: String, progress: String },

    /// The request deadline elapsed before or during a transfer.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Absolute deadline for one webhook request.
///
/// Checked before the expensive clone and from inside the git transport
/// callbacks, where returning `false` aborts the transfer.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    /// Whether the deadline has elapsed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// One configured remote repository and its exclusive-access lock.
///
/// The lock serializes all writes to the remote: it is acquired by the
/// dispatcher before [`Repository::fetch`] and held until the push finished
/// or failed. Requests against different repositories proceed in parallel.
pub struct Repository {
    config: RepositoryConfig,
    lock: Mutex<()>,
}

impl Repository {
    pub fn new(config: RepositoryConfig) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
        }
    }

    /// The repository's configured name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Acquire the per-repository exclusive lock.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Clone the configured branch into a fresh session.
    ///
    /// Every call allocates a new temporary directory and performs a full
    /// single-branch, no-tags clone; sessions are never reused. The clone's
    /// committer identity is set from configuration so that
    /// [`RepoSession::commit`] signs as the configured bot.
    ///
    /// Blocking; run on the blocking thread pool.
    pub fn fetch(&self, deadline: Deadline) -> Result<RepoSession, RepoError> {
        let workdir = TempDir::new().map_err(RepoError::Workdir)?;

        let mut callbacks = RemoteCallbacks::new();
        let (username, password) = (self.config.username.clone(), self.config.password.clone());
        callbacks.credentials(move |_url, _username_from_url, _allowed| {
            Cred::userpass_plaintext(&username, &password)
        });
        callbacks.transfer_progress(move |_progress| !deadline.expired());

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);
        fetch_options.download_tags(git2::AutotagOption::None);

        let branch = self.config.branch.clone();
        let single_branch_refspec =
            format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        let repo = RepoBuilder::new()
            .branch(&self.config.branch)
            .fetch_options(fetch_options)
            .remote_create(move |repo, name, url| {
                repo.remote_with_fetch(name, url, &single_branch_refspec)
            })
            .clone(&self.config.url, workdir.path())
            .map_err(|err| {
                if deadline.expired() {
                    RepoError::DeadlineExceeded
                } else {
                    RepoError::CloneFailed {
                        url: self.config.url.clone(),
                        message: git2_detail(&err),
                    }
                }
            })?;

        let config_failed = |err: git2::Error| RepoError::ConfigFailed {
            message: git2_detail(&err),
        };
        let mut git_config = repo.config().map_err(config_failed)?;
        git_config
            .set_str("user.name", &self.config.committer_name)
            .map_err(config_failed)?;
        git_config
            .set_str("user.email", &self.config.committer_email)
            .map_err(config_failed)?;

        Ok(RepoSession {
            workdir,
            repo,
            branch: self.config.branch.clone(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
        })
    }
}

impl std::fmt::Debug for Repository {
    // Credentials stay out of debug output
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.config.name)
            .field("url", &self.config.url)
            .field("branch", &self.config.branch)
            .finish()
    }
}

/// An ephemeral clone owned by one in-flight request.
///
/// Dropping the session removes the temporary clone; there is no separate
/// discard step to forget on an error path.
pub struct RepoSession {
    workdir: TempDir,
    repo: git2::Repository,
    branch: String,
    username: String,
    password: String,
}

impl RepoSession {
    /// Path of the checked-out working tree.
    pub fn worktree(&self) -> &Path {
        self.workdir.path()
    }

    /// Read a manifest file from the working tree.
    pub fn read_manifest(&self, rel_path: &str) -> Result<String, RepoError> {
        let path = self.workdir.path().join(rel_path);
        std::fs::read_to_string(&path).map_err(|source| RepoError::Manifest { path, source })
    }

    /// Write a manifest file back into the working tree.
    pub fn write_manifest(&self, rel_path: &str, contents: &str) -> Result<(), RepoError> {
        let path = self.workdir.path().join(rel_path);
        std::fs::write(&path, contents).map_err(|source| RepoError::Manifest { path, source })
    }

    /// Stage one path and commit it, returning the new commit id.
    pub fn commit(&self, rel_path: &str, message: &str) -> Result<String, RepoError> {
        let commit = || -> Result<git2::Oid, git2::Error> {
            let mut index = self.repo.index()?;
            index.add_path(Path::new(rel_path))?;
            index.write()?;
            let tree = self.repo.find_tree(index.write_tree()?)?;
            let signature = self.repo.signature()?;
            let parent = self.repo.head()?.peel_to_commit()?;
            self.repo.commit(
                Some("HEAD"),
                &signature,
                &signature,
                message,
                &tree,
                &[&parent],
            )
        };
        commit()
            .map(|oid| oid.to_string())
            .map_err(|err| RepoError::CommitFailed {
                message: git2_detail(&err),
            })
    }

    /// Push the session's branch upstream.
    ///
    /// Sideband output from the server is captured and returned with any
    /// error so the dispatcher can log transport diagnostics.
    pub fn push(&self, deadline: Deadline) -> Result<(), RepoError> {
        let progress = std::rc::Rc::new(std::cell::RefCell::new(String::new()));

        let mut callbacks = RemoteCallbacks::new();
        let (username, password) = (self.username.clone(), self.password.clone());
        callbacks.credentials(move |_url, _username_from_url, _allowed| {
            Cred::userpass_plaintext(&username, &password)
        });
        let sideband = progress.clone();
        callbacks.sideband_progress(move |data| {
            sideband
                .borrow_mut()
                .push_str(&String::from_utf8_lossy(data));
            !deadline.expired()
        });
        // A per-ref rejection (e.g. non-fast-forward) arrives here rather
        // than as a transport error.
        callbacks.push_update_reference(|refname, status| match status {
            Some(reason) => Err(git2::Error::from_str(&format!(
                "remote rejected {refname}: {reason}"
            ))),
            None => Ok(()),
        });

        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        let refspec = format!("refs/heads/{0}:refs/heads/{0}", self.branch);
        let result = self
            .repo
            .find_remote("origin")
            .and_then(|mut remote| remote.push(&[refspec.as_str()], Some(&mut options)));
        match result {
            Ok(()) => Ok(()),
            Err(_) if deadline.expired() => Err(RepoError::DeadlineExceeded),
            Err(err) => Err(RepoError::PushFailed {
                message: git2_detail(&err),
                progress: progress.borrow().clone(),
            }),
        }
    }
}

impl std::fmt::Debug for RepoSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoSession")
            .field("worktree", &self.workdir.path())
            .field("branch", &self.branch)
            .finish()
    }
}

/// Render a git2 error with its class and code, which often carry the only
/// hint distinguishing auth failures from network ones.
fn git2_detail(err: &git2::Error) -> String {
    format!(
        "{} (class={:?}, code={:?})",
        err.message(),
        err.class(),
        err.code()
    )
}
