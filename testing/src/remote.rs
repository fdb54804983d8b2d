use std::path::{Path, PathBuf};

use git2::{BranchType, Oid, Repository, Signature};
use tempfile::TempDir;

/// A bare repository standing in for a git server, addressed by `file://`.
pub struct RemoteFixture {
    _dir: TempDir,
    path: PathBuf,
    repo: Repository
}

impl RemoteFixture {
    /// A repository with no commits; HEAD names `main`.
    pub fn empty() -> Self {
        let dir = TempDir::new().expect("create remote fixture dir");
        let path = dir.path().join("remote.git");
        let repo = Repository::init_bare(&path).expect("init bare remote");
        repo.set_head("refs/heads/main").expect("point HEAD at main");
        Self {
            _dir: dir,
            path,
            repo
        }
    }

    /// A repository whose `main` branch holds one commit with a README.
    pub fn with_main() -> Self {
        let fixture = Self::empty();
        fixture.commit_file("main", "README.md", "# fixture\n", "initial commit");
        fixture
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.path.display())
    }

    /// Commits `file` on top of `branch`, creating the branch if needed.
    pub fn commit_file(&self, branch: &str, file: &str, content: &str, message: &str) -> Oid {
        let signature = Signature::now("fixture", "fixture@example.com").expect("signature");
        let parent = self.branch_tip(branch).map(|oid| self.repo.find_commit(oid).expect("parent commit"));

        let blob = self.repo.blob(content.as_bytes()).expect("write blob");
        let parent_tree = parent.as_ref().map(|commit| commit.tree().expect("parent tree"));
        let mut builder = self.repo.treebuilder(parent_tree.as_ref()).expect("tree builder");
        builder.insert(file, blob, 0o100_644).expect("insert blob");
        let tree = self
            .repo
            .find_tree(builder.write().expect("write tree"))
            .expect("find tree");

        let parents: Vec<_> = parent.iter().collect();
        self.repo
            .commit(
                Some(&format!("refs/heads/{branch}")),
                &signature,
                &signature,
                message,
                &tree,
                &parents
            )
            .expect("commit")
    }

    pub fn create_branch(&self, name: &str, from: &str) {
        let tip = self.branch_tip(from).expect("source branch exists");
        let commit = self.repo.find_commit(tip).expect("source commit");
        self.repo.branch(name, &commit, false).expect("create branch");
    }

    pub fn branches(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .repo
            .branches(Some(BranchType::Local))
            .expect("list branches")
            .filter_map(Result::ok)
            .filter_map(|(branch, _)| branch.name().ok().flatten().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    pub fn tags(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .repo
            .tag_names(None)
            .expect("list tags")
            .iter()
            .flatten()
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    pub fn branch_tip(&self, name: &str) -> Option<Oid> {
        self.repo
            .find_reference(&format!("refs/heads/{name}"))
            .ok()
            .and_then(|reference| reference.target())
    }

    pub fn tag_target(&self, name: &str) -> Option<Oid> {
        self.repo
            .find_reference(&format!("refs/tags/{name}"))
            .ok()
            .and_then(|reference| reference.peel_to_commit().ok())
            .map(|commit| commit.id())
    }

    /// Number of commits reachable from `branch`.
    pub fn commit_count(&self, branch: &str) -> usize {
        let Some(tip) = self.branch_tip(branch) else {
            return 0;
        };
        let mut walk = self.repo.revwalk().expect("revwalk");
        walk.push(tip).expect("push tip");
        walk.count()
    }
}
