//! # Git Operations Engine
//!
//! Repository operations over libgit2, all synchronous and all safe to
//! retry:
//!
//! - clone / init refuse to overwrite an existing repository
//! - fetch and push treat "already up to date" as success
//! - commit skips clean trees unless an empty commit is requested
//! - remote branch and tag creation check for existing refs first
//! - `add_remote_link` always converges on a single `origin`
//!
//! Every network operation materializes credentials for its own duration
//! only (see [`crate::ssh_key`]) and aborts when its [`OpContext`] is
//! cancelled.

use std::cell::{Cell, RefCell};
use std::path::Path;

use errors::{GitError, GitResult};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    AutotagOption, BranchType, CertificateCheckStatus, Commit, Cred, CredentialType, Direction,
    ErrorClass, ErrorCode, FetchOptions, IndexAddOption, Oid, PushOptions, Remote, RemoteCallbacks,
    Repository, Signature
};
use tracing::{debug, info, info_span, warn};

use crate::auth::AuthMethod;
use crate::context::OpContext;
use crate::reference;
use crate::refspec::{self, PUSH_ALL_BRANCHES, PUSH_ALL_TAGS};
use crate::ssh_key::SshKeyFile;

pub const ORIGIN: &str = "origin";

/// Credential callbacks give up after this many rounds instead of letting
/// libgit2 loop on a rejected credential.
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct GitEngine {
    author_name: String,
    author_email: String,
    verify_host_keys: bool
}

impl GitEngine {
    pub fn new(config: &config::GitConfig) -> Self {
        Self {
            author_name: config.author_name.clone(),
            author_email: config.author_email.clone(),
            verify_host_keys: config.verify_host_keys
        }
    }

    pub fn with_author(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            author_name: name.into(),
            author_email: email.into(),
            verify_host_keys: false
        }
    }

    pub fn verify_host_keys(mut self, verify: bool) -> Self {
        self.verify_host_keys = verify;
        self
    }

    /// Clones full history, all branches and tags into `dest`.
    ///
    /// Every remote branch gets a local tracking branch. On failure the
    /// partially written destination is removed.
    pub fn clone_repository(
        &self,
        ctx: &OpContext,
        auth: Option<&AuthMethod>,
        url: &str,
        dest: &Path
    ) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_clone", url = %url, path = %dest.display());
        let _enter = span.enter();
        ctx.ensure_active("clone")?;

        if Repository::open(dest).is_ok() {
            return Err(GitError::RepositoryExists {
                path: dest.to_path_buf()
            });
        }
        let dest_existed = dest.exists();

        let session = Session::open(auth)?;
        let mut fetch = FetchOptions::new();
        fetch
            .remote_callbacks(self.callbacks(ctx, &session))
            .download_tags(AutotagOption::All);
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch);

        let repo = match builder.clone(url, dest) {
            Ok(repo) => repo,
            Err(e) => {
                discard_partial_clone(dest, dest_existed);
                return Err(remote_error(ctx, "clone", url, &e));
            }
        };

        let tracked = track_remote_branches(&repo)?;
        info!(tracked_branches = tracked, "repository cloned");
        Ok(())
    }

    /// Creates an empty repository, failing with `AlreadyInitialized` if
    /// `path` already holds one.
    pub fn init(&self, ctx: &OpContext, path: &Path) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_init", path = %path.display());
        let _enter = span.enter();

        if Repository::open(path).is_ok() {
            return Err(GitError::AlreadyInitialized {
                path: path.to_path_buf()
            });
        }
        std::fs::create_dir_all(path).map_err(|e| GitError::io("create working copy", path, e))?;
        Repository::init(path).map_err(|e| GitError::backend(format!("init {}", path.display()), e.message()))?;
        info!("repository initialized");
        Ok(())
    }

    /// Fetches from `origin`, all configured refs or a single branch.
    ///
    /// Branches that appeared on `origin` since the last sync get a local
    /// tracking branch. Local branches that are strictly behind their
    /// `origin` counterpart are fast-forwarded; diverged branches are left
    /// for push to report.
    pub fn fetch(
        &self,
        ctx: &OpContext,
        auth: Option<&AuthMethod>,
        path: &Path,
        branch: Option<&str>
    ) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_fetch", path = %path.display(), branch = branch.unwrap_or("*"));
        let _enter = span.enter();
        ctx.ensure_active("fetch")?;

        let repo = open(path)?;
        let mut remote = find_origin(&repo)?;
        let url = remote.url().unwrap_or_default().to_string();
        let refspecs: Vec<String> = branch
            .map(|b| vec![format!("+refs/heads/{b}:refs/remotes/{ORIGIN}/{b}")])
            .unwrap_or_default();

        let session = Session::open(auth)?;
        let mut options = FetchOptions::new();
        options
            .remote_callbacks(self.callbacks(ctx, &session))
            .download_tags(AutotagOption::All);
        remote
            .fetch(&refspecs, Some(&mut options), None)
            .map_err(|e| remote_error(ctx, "fetch", &url, &e))?;
        debug!(received_objects = remote.stats().received_objects(), "fetch complete");

        let tracked = track_remote_branches(&repo)?;
        if tracked > 0 {
            info!(tracked_branches = tracked, "tracking new remote branches");
        }
        fast_forward_tracking_branches(&repo, branch)
    }

    /// Switches the working tree to `branch`, discarding local changes.
    ///
    /// With `remote` set, refs are fetched first and a missing local branch
    /// is created from `origin/<branch>` when the remote has it, otherwise
    /// from HEAD. Without `remote` the branch must already exist locally.
    pub fn checkout(
        &self,
        ctx: &OpContext,
        auth: Option<&AuthMethod>,
        path: &Path,
        branch: &str,
        remote: bool
    ) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_checkout", path = %path.display(), branch = %branch, remote);
        let _enter = span.enter();

        if remote {
            self.fetch(ctx, auth, path, None)?;
        }

        let repo = open(path)?;
        let local_ref = format!("refs/heads/{branch}");
        if repo.find_reference(&local_ref).is_err() {
            if !remote {
                return Err(GitError::ReferenceNotFound {
                    reference: branch.to_string()
                });
            }

            let start = match repo.find_reference(&format!("refs/remotes/{ORIGIN}/{branch}")) {
                Ok(remote_ref) => {
                    debug!("branch exists on remote, tracking it");
                    Some(remote_ref.peel_to_commit())
                }
                Err(_) => {
                    debug!("branch absent on remote, starting it from HEAD");
                    repo.head().ok().map(|head| head.peel_to_commit())
                }
            };

            match start {
                Some(commit) => {
                    let commit = commit.map_err(|e| GitError::backend(format!("resolve start of {branch}"), e.message()))?;
                    repo.branch(branch, &commit, false)
                        .map_err(|e| GitError::backend(format!("create branch {branch}"), e.message()))?;
                }
                None => {
                    // Nothing committed yet: point the unborn HEAD at the branch.
                    repo.set_head(&local_ref)
                        .map_err(|e| GitError::backend(format!("checkout {branch}"), e.message()))?;
                    return Ok(());
                }
            }
        }

        repo.set_head(&local_ref)
            .map_err(|e| GitError::backend(format!("checkout {branch}"), e.message()))?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))
            .map_err(|e| GitError::backend(format!("checkout {branch}"), e.message()))?;
        info!("checked out");
        Ok(())
    }

    /// Stages every change (including deletions) and commits it.
    ///
    /// Returns `Ok(None)` without committing when the staged tree equals
    /// HEAD's tree and `allow_empty` is false.
    pub fn commit(&self, ctx: &OpContext, path: &Path, message: &str, allow_empty: bool) -> GitResult<Option<Oid>> {
        let span = info_span!(parent: ctx.span(), "git_commit", path = %path.display(), allow_empty);
        let _enter = span.enter();

        let repo = open(path)?;
        let mut index = repo.index().map_err(|e| GitError::backend("read index", e.message()))?;
        stage_all(&mut index).map_err(|e| GitError::backend("stage changes", e.message()))?;
        let tree_id = index.write_tree().map_err(|e| GitError::backend("write tree", e.message()))?;

        let parent = head_commit(&repo)?;
        let unchanged = match &parent {
            Some(parent) => parent.tree_id() == tree_id,
            None => index.is_empty()
        };
        if unchanged && !allow_empty {
            debug!("working tree clean, nothing to commit");
            return Ok(None);
        }

        let tree = repo.find_tree(tree_id).map_err(|e| GitError::backend("find tree", e.message()))?;
        let signature = Signature::now(&self.author_name, &self.author_email)
            .map_err(|e| GitError::backend("build signature", e.message()))?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .map_err(|e| GitError::backend("commit", e.message()))?;

        info!(commit = %oid, "committed");
        Ok(Some(oid))
    }

    /// Pushes refspecs to `origin`. Pattern refspecs are expanded against
    /// local refs; when nothing matches no connection is made.
    pub fn push(&self, ctx: &OpContext, auth: Option<&AuthMethod>, path: &Path, refspecs: &[&str]) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_push", path = %path.display(), refspecs = ?refspecs);
        let _enter = span.enter();
        ctx.ensure_active("push")?;

        let repo = open(path)?;
        let mut remote = find_origin(&repo)?;
        let url = remote.url().unwrap_or_default().to_string();
        let expanded = refspec::expand(&repo, refspecs)?;
        if expanded.is_empty() {
            debug!("no local refs match, nothing to push");
            return Ok(());
        }

        let session = Session::open(auth)?;
        let rejected = RefCell::new(Vec::new());
        let mut callbacks = self.callbacks(ctx, &session);
        callbacks.push_update_reference(|reference, status| {
            if let Some(reason) = status {
                rejected
                    .borrow_mut()
                    .push((reference.to_string(), reason.to_string()));
            }
            Ok(())
        });
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        let pushed = remote.push(&expanded, Some(&mut options));
        drop(options);
        if let Err(e) = pushed {
            if e.code() == ErrorCode::NotFastForward {
                return Err(GitError::PushRejected {
                    reference: refspecs.join(" "),
                    reason: e.message().to_string()
                });
            }
            return Err(remote_error(ctx, "push", &url, &e));
        }
        if let Some((reference, reason)) = rejected.into_inner().into_iter().next() {
            return Err(GitError::PushRejected { reference, reason });
        }

        info!(refs = expanded.len(), "pushed");
        Ok(())
    }

    /// Publishes branch `name` starting at `from_ref` (empty means HEAD).
    ///
    /// A branch `origin` already has is left alone. A branch that exists
    /// only locally, e.g. from an attempt whose push failed, is pushed
    /// without being recreated.
    pub fn create_remote_branch(
        &self,
        ctx: &OpContext,
        auth: Option<&AuthMethod>,
        path: &Path,
        name: &str,
        from_ref: &str
    ) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_create_remote_branch", branch = %name, from = %from_ref);
        let _enter = span.enter();

        {
            let repo = open(path)?;
            let start = reference::resolve(&repo, from_ref)?;

            if repo
                .find_reference(&format!("refs/remotes/{ORIGIN}/{name}"))
                .is_ok()
            {
                info!("branch already exists on remote, skipping");
                return Ok(());
            }

            if repo.find_branch(name, BranchType::Local).is_ok() {
                debug!("branch exists locally, publishing it");
            } else {
                let commit = repo
                    .find_commit(start)
                    .map_err(|e| GitError::backend(format!("find commit {start}"), e.message()))?;
                repo.branch(name, &commit, false)
                    .map_err(|e| GitError::backend(format!("create branch {name}"), e.message()))?;
                info!(commit = %start, "branch created");
            }
        }

        self.push(ctx, auth, path, &[PUSH_ALL_BRANCHES])
    }

    /// Tags the tip of `branch` with `tag` and publishes all tags.
    ///
    /// An existing tag is never moved; tags are still pushed so a tag left
    /// behind by an interrupted attempt reaches the remote.
    pub fn create_remote_tag(
        &self,
        ctx: &OpContext,
        auth: Option<&AuthMethod>,
        path: &Path,
        branch: &str,
        tag: &str
    ) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_create_remote_tag", branch = %branch, tag = %tag);
        let _enter = span.enter();

        {
            let repo = open(path)?;
            if repo.find_reference(&format!("refs/tags/{tag}")).is_ok() {
                info!("tag already exists, skipping creation");
            } else {
                let commit = branch_tip(&repo, branch)?;
                repo.tag_lightweight(tag, commit.as_object(), false)
                    .map_err(|e| GitError::backend(format!("create tag {tag}"), e.message()))?;
                info!(commit = %commit.id(), "tag created");
            }
        }

        self.push(ctx, auth, path, &[PUSH_ALL_TAGS])
    }

    /// Deletes a local branch. The checked-out branch cannot be removed.
    pub fn remove_branch(&self, ctx: &OpContext, path: &Path, name: &str) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_remove_branch", branch = %name);
        let _enter = span.enter();

        let repo = open(path)?;
        let mut branch = find_local_branch(&repo, name)?;
        branch
            .delete()
            .map_err(|e| GitError::backend(format!("delete branch {name}"), e.message()))?;
        info!("branch removed");
        Ok(())
    }

    /// Renames a local branch; HEAD follows if it pointed at it.
    pub fn rename_branch(&self, ctx: &OpContext, path: &Path, current: &str, new: &str) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_rename_branch", from = %current, to = %new);
        let _enter = span.enter();

        let repo = open(path)?;
        let unborn_head = repo.head().is_err();
        if unborn_head && current_branch_of(&repo)?.as_deref() == Some(current) {
            repo.set_head(&format!("refs/heads/{new}"))
                .map_err(|e| GitError::backend(format!("rename branch {current}"), e.message()))?;
            debug!("renamed unborn HEAD branch");
            return Ok(());
        }

        let mut branch = find_local_branch(&repo, current)?;
        branch
            .rename(new, false)
            .map_err(|e| GitError::backend(format!("rename branch {current} to {new}"), e.message()))?;
        info!("branch renamed");
        Ok(())
    }

    /// Checks out `parent` and branches `child` off it, leaving `child`
    /// checked out.
    pub fn create_child_branch(&self, ctx: &OpContext, path: &Path, parent: &str, child: &str) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_create_child_branch", parent_branch = %parent, child = %child);
        let _enter = span.enter();

        self.checkout(ctx, None, path, parent, false)?;

        let repo = open(path)?;
        if repo.find_branch(child, BranchType::Local).is_err() {
            let commit = branch_tip(&repo, parent)?;
            repo.branch(child, &commit, false)
                .map_err(|e| GitError::backend(format!("create branch {child}"), e.message()))?;
        }
        drop(repo);

        self.checkout(ctx, None, path, child, false)
    }

    /// Verifies read access to `url` by listing its references.
    ///
    /// Without credentials the repository is assumed public and no
    /// connection is made. A reachable repository without any refs counts as
    /// accessible.
    pub fn check_permissions(&self, ctx: &OpContext, auth: Option<&AuthMethod>, url: &str) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_check_permissions", url = %url);
        let _enter = span.enter();

        let Some(auth) = auth else {
            debug!("no credentials configured, assuming public repository");
            return Ok(());
        };
        ctx.ensure_active("check permissions")?;

        let session = Session::open(Some(auth))?;
        let mut remote = Remote::create_detached(url).map_err(|e| GitError::InvalidReference {
            reference: url.to_string(),
            reason: e.message().to_string()
        })?;
        let connection = remote
            .connect_auth(Direction::Fetch, Some(self.callbacks(ctx, &session)), None)
            .map_err(|e| remote_error(ctx, "list refs", url, &e))?;
        let advertised = connection
            .list()
            .map_err(|e| remote_error(ctx, "list refs", url, &e))?
            .len();

        if advertised == 0 {
            info!("repository reachable but empty");
        } else {
            debug!(advertised, "repository accessible");
        }
        Ok(())
    }

    /// Validates that `reference` resolves; empty is always valid.
    pub fn check_reference(&self, ctx: &OpContext, path: &Path, reference: &str) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_check_reference", reference = %reference);
        let _enter = span.enter();

        if reference.is_empty() {
            return Ok(());
        }
        let repo = open(path)?;
        let commit = reference::resolve(&repo, reference)?;
        debug!(commit = %commit, "reference resolved");
        Ok(())
    }

    /// Looks up a commit by full hash. A well-formed but unknown hash is
    /// `Ok(false)`; a malformed one is `InvalidReference`.
    pub fn commit_exists(&self, ctx: &OpContext, path: &Path, hash: &str) -> GitResult<bool> {
        let span = info_span!(parent: ctx.span(), "git_commit_exists", hash = %hash);
        let _enter = span.enter();

        let well_formed = hash.len() == 40 && hash.chars().all(|c| c.is_ascii_hexdigit());
        let oid = Oid::from_str(hash)
            .ok()
            .filter(|_| well_formed)
            .ok_or_else(|| GitError::InvalidReference {
                reference: hash.to_string(),
                reason: "expected a 40 character hex commit id".to_string()
            })?;

        let repo = open(path)?;
        match repo.find_commit(oid) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(GitError::backend(format!("find commit {hash}"), e.message()))
        }
    }

    /// Points `origin` at `url`, replacing any previous definition.
    pub fn add_remote_link(&self, ctx: &OpContext, path: &Path, url: &str) -> GitResult<()> {
        let span = info_span!(parent: ctx.span(), "git_add_remote_link", url = %url);
        let _enter = span.enter();

        let repo = open(path)?;
        match repo.remote_delete(ORIGIN) {
            Ok(()) => debug!("removed previous origin"),
            Err(e) if e.code() == ErrorCode::NotFound => {}
            Err(e) => return Err(GitError::backend("remove remote origin", e.message()))
        }
        repo.remote(ORIGIN, url)
            .map_err(|e| GitError::backend(format!("add remote origin {url}"), e.message()))?;
        info!("remote linked");
        Ok(())
    }

    /// Commit HEAD points at; `None` while the branch is unborn.
    pub fn head(&self, path: &Path) -> GitResult<Option<Oid>> {
        let repo = open(path)?;
        Ok(head_commit(&repo)?.map(|commit| commit.id()))
    }

    /// Name of the branch HEAD points at, born or not.
    pub fn current_branch(&self, path: &Path) -> GitResult<Option<String>> {
        let repo = open(path)?;
        current_branch_of(&repo)
    }

    fn callbacks<'a>(&self, ctx: &'a OpContext, session: &'a Session<'_>) -> RemoteCallbacks<'a> {
        let mut callbacks = RemoteCallbacks::new();

        callbacks.credentials(move |_url, _username_from_url, allowed| session.provide(ctx, allowed));

        callbacks.transfer_progress(move |_progress| !ctx.is_cancelled());

        let verify = self.verify_host_keys;
        callbacks.certificate_check(move |_certificate, host| {
            if verify {
                Ok(CertificateCheckStatus::CertificatePassthrough)
            } else {
                debug!(host, "accepting host key without verification");
                Ok(CertificateCheckStatus::CertificateOk)
            }
        });

        callbacks
    }
}

/// Credentials materialized for the duration of one operation.
struct Session<'a> {
    auth: Option<&'a AuthMethod>,
    key_file: Option<SshKeyFile>,
    attempts: Cell<u32>
}

impl<'a> Session<'a> {
    fn open(auth: Option<&'a AuthMethod>) -> GitResult<Self> {
        let key_file = match auth {
            Some(AuthMethod::Ssh { key, .. }) => Some(SshKeyFile::write(key)?),
            _ => None
        };
        Ok(Self {
            auth,
            key_file,
            attempts: Cell::new(0)
        })
    }

    /// Answers one credential request from libgit2.
    fn provide(&self, ctx: &OpContext, allowed: CredentialType) -> Result<Cred, git2::Error> {
        if ctx.is_cancelled() {
            return Err(git2::Error::new(ErrorCode::User, ErrorClass::Callback, "operation cancelled"));
        }
        let attempts = self.attempts.get() + 1;
        self.attempts.set(attempts);
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Callback,
                "credentials rejected by remote"
            ));
        }
        self.credential(allowed)
    }

    fn credential(&self, allowed: CredentialType) -> Result<Cred, git2::Error> {
        match (self.auth, &self.key_file) {
            (Some(AuthMethod::Ssh { user, .. }), Some(key_file)) => {
                if allowed.contains(CredentialType::SSH_KEY) {
                    return Cred::ssh_key(user, None, key_file.path(), None);
                }
                if allowed.contains(CredentialType::USERNAME) {
                    return Cred::username(user);
                }
            }
            (Some(AuthMethod::UserPass { username, password }), _)
                if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) =>
            {
                return Cred::userpass_plaintext(username, password);
            }
            _ => {}
        }
        Err(git2::Error::new(
            ErrorCode::Auth,
            ErrorClass::Callback,
            format!("no configured credential satisfies {allowed:?}")
        ))
    }
}

fn open(path: &Path) -> GitResult<Repository> {
    Repository::open(path).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            GitError::RepositoryNotFound {
                path: path.to_path_buf()
            }
        } else {
            GitError::backend(format!("open {}", path.display()), e.message())
        }
    })
}

fn find_origin(repo: &Repository) -> GitResult<Remote<'_>> {
    repo.find_remote(ORIGIN)
        .map_err(|e| GitError::backend("find remote origin", e.message()))
}

fn find_local_branch<'r>(repo: &'r Repository, name: &str) -> GitResult<git2::Branch<'r>> {
    repo.find_branch(name, BranchType::Local).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            GitError::ReferenceNotFound {
                reference: name.to_string()
            }
        } else {
            GitError::backend(format!("find branch {name}"), e.message())
        }
    })
}

fn stage_all(index: &mut git2::Index) -> Result<(), git2::Error> {
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"].iter(), None)?;
    index.write()
}

fn head_commit(repo: &Repository) -> GitResult<Option<Commit<'_>>> {
    match repo.head() {
        Ok(head) => head
            .peel_to_commit()
            .map(Some)
            .map_err(|e| GitError::backend("resolve HEAD", e.message())),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(GitError::backend("resolve HEAD", e.message()))
    }
}

fn current_branch_of(repo: &Repository) -> GitResult<Option<String>> {
    let head = repo
        .find_reference("HEAD")
        .map_err(|e| GitError::backend("read HEAD", e.message()))?;
    Ok(head
        .symbolic_target()
        .and_then(|target| target.strip_prefix("refs/heads/"))
        .map(str::to_string))
}

/// Tip of a local branch, falling back to `origin/<branch>`.
fn branch_tip<'r>(repo: &'r Repository, branch: &str) -> GitResult<Commit<'r>> {
    let reference = repo
        .find_reference(&format!("refs/heads/{branch}"))
        .or_else(|_| repo.find_reference(&format!("refs/remotes/{ORIGIN}/{branch}")))
        .map_err(|_| GitError::ReferenceNotFound {
            reference: branch.to_string()
        })?;
    reference
        .peel_to_commit()
        .map_err(|e| GitError::backend(format!("resolve tip of {branch}"), e.message()))
}

fn track_remote_branches(repo: &Repository) -> GitResult<usize> {
    let prefix = format!("{ORIGIN}/");
    let branches = repo
        .branches(Some(BranchType::Remote))
        .map_err(|e| GitError::backend("list remote branches", e.message()))?;

    let mut created = 0;
    for entry in branches {
        let (remote_branch, _) = entry.map_err(|e| GitError::backend("list remote branches", e.message()))?;
        let Some(remote_name) = remote_branch.name().ok().flatten().map(str::to_string) else {
            continue;
        };
        let Some(name) = remote_name.strip_prefix(&prefix) else {
            continue;
        };
        if name == "HEAD" || repo.find_branch(name, BranchType::Local).is_ok() {
            continue;
        }

        let commit = remote_branch
            .get()
            .peel_to_commit()
            .map_err(|e| GitError::backend(format!("resolve {remote_name}"), e.message()))?;
        let mut local = repo
            .branch(name, &commit, false)
            .map_err(|e| GitError::backend(format!("create branch {name}"), e.message()))?;
        local
            .set_upstream(Some(remote_name.as_str()))
            .map_err(|e| GitError::backend(format!("track {remote_name}"), e.message()))?;
        created += 1;
    }
    Ok(created)
}

fn fast_forward_tracking_branches(repo: &Repository, only: Option<&str>) -> GitResult<()> {
    let head_ref = repo.head().ok().and_then(|head| head.name().map(str::to_string));
    let branches = repo
        .branches(Some(BranchType::Local))
        .map_err(|e| GitError::backend("list branches", e.message()))?;

    let mut head_moved = false;
    for entry in branches {
        let (mut branch, _) = entry.map_err(|e| GitError::backend("list branches", e.message()))?;
        let Some(name) = branch.name().ok().flatten().map(str::to_string) else {
            continue;
        };
        if only.is_some_and(|only| only != name) {
            continue;
        }
        let Ok(remote_ref) = repo.find_reference(&format!("refs/remotes/{ORIGIN}/{name}")) else {
            continue;
        };
        let (Some(local), Some(upstream)) = (branch.get().target(), remote_ref.target()) else {
            continue;
        };
        if local == upstream {
            continue;
        }
        if !repo.graph_descendant_of(upstream, local).unwrap_or(false) {
            warn!(branch = %name, "local branch diverged from origin, not fast-forwarding");
            continue;
        }

        branch
            .get_mut()
            .set_target(upstream, "fast-forward to origin")
            .map_err(|e| GitError::backend(format!("fast-forward {name}"), e.message()))?;
        if head_ref.as_deref() == Some(format!("refs/heads/{name}").as_str()) {
            head_moved = true;
        }
        debug!(branch = %name, to = %upstream, "fast-forwarded");
    }

    if head_moved {
        repo.checkout_head(Some(CheckoutBuilder::new().force()))
            .map_err(|e| GitError::backend("update working tree", e.message()))?;
    }
    Ok(())
}

fn discard_partial_clone(dest: &Path, dest_existed: bool) {
    let target = if dest_existed { dest.join(".git") } else { dest.to_path_buf() };
    match std::fs::remove_dir_all(&target) {
        Ok(()) => debug!(path = %target.display(), "removed partial clone"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %target.display(), error = %e, "failed to remove partial clone")
    }
}

/// Classifies a failed network operation.
///
/// Authentication and certificate failures become `PermissionDenied`,
/// callback aborts after cancellation become `Cancelled`, everything else
/// means the remote could not be used: `Network`.
fn remote_error(ctx: &OpContext, operation: &str, url: &str, err: &git2::Error) -> GitError {
    if ctx.is_cancelled() || err.code() == ErrorCode::User {
        return GitError::Cancelled {
            operation: format!("{operation} {url}")
        };
    }

    let message = err.message().to_lowercase();
    let denied = matches!(err.code(), ErrorCode::Auth | ErrorCode::Certificate)
        || ["401", "403", "authentication", "permission denied", "unauthorized", "access denied"]
            .iter()
            .any(|marker| message.contains(marker));
    if denied {
        return GitError::PermissionDenied {
            url: url.to_string(),
            reason: err.message().to_string()
        };
    }

    GitError::Network {
        operation: format!("{operation} {url}"),
        reason: err.message().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::openssh_pem;
    use crate::auth::SshPrivateKey;
    use zeroize::Zeroizing;

    fn ssh_auth() -> AuthMethod {
        AuthMethod::Ssh {
            user: "admin".to_string(),
            port: 29418,
            key: SshPrivateKey::parse(&openssh_pem("none")).unwrap()
        }
    }

    fn token_auth() -> AuthMethod {
        AuthMethod::UserPass {
            username: "oauth2".to_string(),
            password: Zeroizing::new("tkn".to_string())
        }
    }

    #[test]
    fn test_token_answers_plaintext_requests() {
        let auth = token_auth();
        let session = Session::open(Some(&auth)).unwrap();
        assert!(session.key_file.is_none());

        let cred = session
            .provide(&OpContext::default(), CredentialType::USER_PASS_PLAINTEXT)
            .unwrap();
        assert_eq!(cred.credtype(), CredentialType::USER_PASS_PLAINTEXT.bits());

        let err = session
            .provide(&OpContext::default(), CredentialType::SSH_KEY)
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::Auth);
    }

    #[test]
    fn test_ssh_key_file_lives_with_the_session() {
        let auth = ssh_auth();
        let session = Session::open(Some(&auth)).unwrap();
        let key_path = session.key_file.as_ref().unwrap().path().to_path_buf();
        assert!(key_path.is_file());

        let cred = session
            .provide(&OpContext::default(), CredentialType::SSH_KEY | CredentialType::USERNAME)
            .unwrap();
        assert_eq!(cred.credtype(), CredentialType::SSH_KEY.bits());

        let cred = session
            .provide(&OpContext::default(), CredentialType::USERNAME)
            .unwrap();
        assert_eq!(cred.credtype(), CredentialType::USERNAME.bits());

        let err = session
            .provide(&OpContext::default(), CredentialType::USER_PASS_PLAINTEXT)
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::Auth);

        drop(session);
        assert!(!key_path.exists());
    }

    #[test]
    fn test_public_session_has_nothing_to_offer() {
        let session = Session::open(None).unwrap();
        let err = session
            .provide(&OpContext::default(), CredentialType::all())
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::Auth);
    }

    #[test]
    fn test_credential_requests_are_capped() {
        let auth = token_auth();
        let session = Session::open(Some(&auth)).unwrap();
        let ctx = OpContext::default();

        for _ in 0..MAX_CREDENTIAL_ATTEMPTS {
            assert!(session.provide(&ctx, CredentialType::USER_PASS_PLAINTEXT).is_ok());
        }
        let err = session
            .provide(&ctx, CredentialType::USER_PASS_PLAINTEXT)
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::Auth);
        assert!(err.message().contains("rejected"));
    }

    #[test]
    fn test_cancelled_context_refuses_credentials() {
        let auth = token_auth();
        let session = Session::open(Some(&auth)).unwrap();
        let ctx = OpContext::default();
        ctx.cancel_handle().cancel();

        let err = session
            .provide(&ctx, CredentialType::USER_PASS_PLAINTEXT)
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::User);
        assert_eq!(session.attempts.get(), 0);
    }
}
