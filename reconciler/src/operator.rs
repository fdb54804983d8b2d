//! Wires configuration and storage into one driver and queue per kind.

use std::sync::Arc;
use std::time::Duration;

use cb_core::{
    Codebase, CodebaseBranch, GitServer, GitTag, ObjectKey, ObjectStore, Resource, SecretStore
};
use chain::{NoCleanup, Services};
use config::Config;
use gitops::{GitEngine, OpContext, WorkingCopies};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::backoff::BackoffPolicy;
use crate::driver::{Reconcile, ReconcileDriver};
use crate::worker::{WorkQueue, run_workers};

/// Storage collaborators, one per kind plus secrets.
#[derive(Clone)]
pub struct Stores {
    pub codebases: Arc<dyn ObjectStore<Codebase>>,
    pub branches: Arc<dyn ObjectStore<CodebaseBranch>>,
    pub tags: Arc<dyn ObjectStore<GitTag>>,
    pub git_servers: Arc<dyn ObjectStore<GitServer>>,
    pub secrets: Arc<dyn SecretStore>
}

struct Controller {
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<dyn Reconcile>
}

impl Controller {
    fn new(reconciler: impl Reconcile + 'static) -> Self {
        Self {
            queue: WorkQueue::new(),
            reconciler: Arc::new(reconciler)
        }
    }
}

/// The four controllers of the operator.
///
/// The watch layer feeds keys in through [`Operator::enqueue`]; [`Operator::run`]
/// drives the worker pools until [`Operator::shutdown`].
pub struct Operator {
    controllers: Vec<Controller>,
    workers: usize,
    error_delay: Duration
}

impl Operator {
    pub fn new(config: &Config, stores: Stores) -> Self {
        let services = Arc::new(Services {
            engine: GitEngine::new(&config.git),
            working_copies: WorkingCopies::new(&config.workspace.root),
            codebases: Arc::clone(&stores.codebases),
            branches: Arc::clone(&stores.branches),
            git_servers: Arc::clone(&stores.git_servers),
            secrets: Arc::clone(&stores.secrets),
            dependency_delay: config.backoff.dependency_delay(),
            probe_timeout: config.git.probe_timeout()
        });
        let backoff = BackoffPolicy::from(&config.backoff);

        let controllers = vec![
            Controller::new(ReconcileDriver::new(
                stores.git_servers,
                chain::git_server_chain(Arc::clone(&services)),
                NoCleanup,
                backoff
            )),
            Controller::new(ReconcileDriver::new(
                stores.codebases,
                chain::codebase_chain(Arc::clone(&services)),
                chain::codebase_cleanup(Arc::clone(&services)),
                backoff
            )),
            Controller::new(ReconcileDriver::new(
                stores.branches,
                chain::branch_chain(Arc::clone(&services)),
                chain::branch_cleanup(Arc::clone(&services)),
                backoff
            )),
            Controller::new(ReconcileDriver::new(
                stores.tags,
                chain::tag_chain(Arc::clone(&services)),
                chain::tag_cleanup(services),
                backoff
            )),
        ];

        Self {
            controllers,
            workers: config.worker.workers,
            error_delay: backoff.min()
        }
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.controllers
            .iter()
            .map(|controller| controller.reconciler.kind())
            .collect()
    }

    /// Queues `key` for the controller of `kind`. Returns false for an
    /// unknown kind.
    pub fn enqueue(&self, kind: &str, key: ObjectKey) -> bool {
        match self.controller(kind) {
            Some(controller) => {
                controller.queue.add(key);
                true
            }
            None => {
                warn!(kind, key = %key, "no controller for kind");
                false
            }
        }
    }

    pub fn enqueue_object<T: Resource>(&self, object: &T) -> bool {
        self.enqueue(T::KIND, object.key())
    }

    /// Runs every controller's workers until shutdown.
    pub async fn run(&self, ctx: OpContext) {
        info!(kinds = ?self.kinds(), workers = self.workers, "operator starting");
        let mut pools = JoinSet::new();
        for controller in &self.controllers {
            pools.spawn(run_workers(
                controller.queue.clone(),
                Arc::clone(&controller.reconciler),
                self.workers,
                ctx.clone(),
                self.error_delay
            ));
        }
        while pools.join_next().await.is_some() {}
        info!("operator stopped");
    }

    /// Stops every queue; in-flight attempts finish first.
    pub fn shutdown(&self) {
        for controller in &self.controllers {
            controller.queue.shutdown();
        }
    }

    fn controller(&self, kind: &str) -> Option<&Controller> {
        self.controllers
            .iter()
            .find(|controller| controller.reconciler.kind() == kind)
    }
}
