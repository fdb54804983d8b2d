use std::sync::Arc;
use std::time::Duration;

use cb_core::{
    Codebase, CodebaseBranch, CodebaseStrategy, GitProgress, GitServer, GitTag, ObjectKey,
    Resource, StatusPhase
};
use config::Config;
use gitops::OpContext;
use reconciler::{Operator, Stores};
use tempfile::TempDir;
use testing::{InMemoryStore, RemoteFixture};

fn stores(store: &Arc<InMemoryStore>) -> Stores {
    Stores {
        codebases: store.clone(),
        branches: store.clone(),
        tags: store.clone(),
        git_servers: store.clone(),
        secrets: store.clone()
    }
}

async fn wait_until<T: Resource>(store: &InMemoryStore, key: &ObjectKey, ready: impl Fn(&T) -> bool) -> T {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if let Some(object) = store.fetch::<T>(key).filter(|object| ready(object)) {
                return object;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} {key} never became ready", T::KIND))
}

fn finished<T: Resource>(object: &T) -> bool {
    object.reconcile_status().phase == StatusPhase::Finished
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_codebase_branch_and_tag_end_to_end() {
    let remote = RemoteFixture::empty();
    let workspace = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());

    let mut config = Config::default();
    config.workspace.root = workspace.path().to_path_buf();
    config.backoff.min_delay_ms = 50;
    config.backoff.max_delay_ms = 200;
    config.backoff.dependency_delay_ms = 50;
    config.worker.workers = 2;

    let base = format!("file://{}", remote.path().parent().unwrap().display());
    let mut server = testing::git_server("dev", "server", &base);
    server.status.connected = false;
    let mut app = testing::codebase("dev", "app", CodebaseStrategy::Create, "server");
    app.spec.git_url_path = format!("/{}", remote.path().file_name().unwrap().to_string_lossy());
    store.insert(server.clone());
    store.insert(app.clone());

    let operator = Arc::new(Operator::new(&config, stores(&store)));
    assert_eq!(operator.kinds(), vec!["GitServer", "Codebase", "CodebaseBranch", "GitTag"]);
    let running = {
        let operator = Arc::clone(&operator);
        tokio::spawn(async move { operator.run(OpContext::default()).await })
    };

    // The codebase waits on the server's first probe.
    assert!(operator.enqueue_object(&app));
    assert!(operator.enqueue_object(&server));

    let server = wait_until::<GitServer>(&store, &server.key(), finished::<GitServer>).await;
    assert!(server.status.connected);
    let app = wait_until::<Codebase>(&store, &app.key(), finished::<Codebase>).await;
    assert_eq!(app.status.git, GitProgress::Synced);
    assert_eq!(remote.branches(), vec!["main"]);

    let main_key = ObjectKey::new("dev", "app-main");
    assert!(operator.enqueue("CodebaseBranch", main_key.clone()));
    wait_until::<CodebaseBranch>(&store, &main_key, finished::<CodebaseBranch>).await;

    let tag = testing::git_tag("dev", "app-v1", "app", "main", "v1");
    store.insert(tag.clone());
    operator.enqueue_object(&tag);
    wait_until::<GitTag>(&store, &tag.key(), finished::<GitTag>).await;
    assert_eq!(remote.tags(), vec!["v1"]);
    assert_eq!(remote.tag_target("v1"), remote.branch_tip("main"));

    assert!(!operator.enqueue("Pipeline", ObjectKey::new("dev", "x")));

    operator.shutdown();
    tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("operator stops after shutdown")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_codebase_records_failures() {
    let workspace = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());

    let mut config = Config::default();
    config.workspace.root = workspace.path().to_path_buf();
    config.backoff.min_delay_ms = 20;
    config.backoff.max_delay_ms = 40;
    config.worker.workers = 1;

    // Connected server pointing at a directory without the repository.
    let mirror = TempDir::new().unwrap();
    store.insert(testing::git_server("dev", "server", &format!("file://{}", mirror.path().display())));
    let mut app = testing::codebase("dev", "app", CodebaseStrategy::Import, "server");
    app.spec.git_url_path = "/missing.git".to_string();
    store.insert(app.clone());

    let operator = Arc::new(Operator::new(&config, stores(&store)));
    let running = {
        let operator = Arc::clone(&operator);
        tokio::spawn(async move { operator.run(OpContext::default()).await })
    };
    operator.enqueue_object(&app);

    let app = wait_until::<Codebase>(&store, &app.key(), |app: &Codebase| {
        app.status.reconcile.failure_count >= 2
    })
    .await;
    assert_eq!(app.status.reconcile.phase, StatusPhase::Failed);
    assert!(app.status.reconcile.message.starts_with("put_project:"));

    operator.shutdown();
    running.await.unwrap();
}
