//! Sample objects for tests.

use cb_core::{
    Codebase, CodebaseBranch, CodebaseBranchSpec, CodebaseSpec, CodebaseStrategy, GitProvider,
    GitServer, GitServerSpec, GitServerStatus, GitTag, GitTagSpec, ObjectMeta
};

/// A GitServer that resolves to `base_url` and is already marked connected.
pub fn git_server(namespace: &str, name: &str, base_url: &str) -> GitServer {
    GitServer {
        meta: ObjectMeta::new(namespace, name),
        spec: GitServerSpec {
            host: String::new(),
            ssh_user: "git".to_string(),
            ssh_port: 22,
            provider: GitProvider::Other,
            secret_name: None,
            base_url: Some(base_url.to_string())
        },
        status: GitServerStatus {
            connected: true,
            ..Default::default()
        }
    }
}

/// A codebase at `/<name>` on `git_server` with `main` as default branch.
pub fn codebase(namespace: &str, name: &str, strategy: CodebaseStrategy, git_server: &str) -> Codebase {
    Codebase {
        meta: ObjectMeta::new(namespace, name),
        spec: CodebaseSpec {
            strategy,
            ci_tool: "tekton".to_string(),
            git_url_path: format!("/{name}"),
            git_server: git_server.to_string(),
            repository_url: None,
            repository_secret: None,
            default_branch: "main".to_string(),
            empty_project: true
        },
        status: Default::default()
    }
}

pub fn codebase_branch(namespace: &str, name: &str, codebase: &str, branch: &str) -> CodebaseBranch {
    CodebaseBranch {
        meta: ObjectMeta::new(namespace, name),
        spec: CodebaseBranchSpec {
            codebase_name: codebase.to_string(),
            branch_name: branch.to_string(),
            from_commit: None
        },
        status: Default::default()
    }
}

pub fn git_tag(namespace: &str, name: &str, codebase: &str, branch: &str, tag: &str) -> GitTag {
    GitTag {
        meta: ObjectMeta::new(namespace, name),
        spec: GitTagSpec {
            codebase: codebase.to_string(),
            branch: branch.to_string(),
            tag: tag.to_string()
        },
        status: Default::default()
    }
}
