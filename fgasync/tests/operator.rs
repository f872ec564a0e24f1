use fgasync::prelude::*;
use fgasync::conditions::find_condition;
use fgasync::READY;
use fgasync_reconcilers::{STORE_FINALIZER, STORE_TUPLES_FINALIZER};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const CORE: &str = "module core\ntype user";
const DOCS: &str = "module docs\ntype doc\n  relations\n    define viewer: [user]";

fn config() -> OperatorConfig {
    let mut config = OperatorConfig::default();
    config.controller = ControllerConfig::default()
        .with_backoff(Duration::from_millis(5), Duration::from_secs(1))
        .with_resync_interval(None);
    config
}

fn start(client: &InMemoryClient, mock: &Arc<MockBackend>) -> (CancellationToken, JoinHandle<()>) {
    let operator = Operator::new(client.clone(), mock.clone(), config());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(operator.run(shutdown.clone()));
    (shutdown, handle)
}

async fn stop(shutdown: CancellationToken, handle: JoinHandle<()>) {
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("operator did not stop")
        .unwrap();
}

async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

async fn store(client: &InMemoryClient, key: &ObjectKey) -> Store {
    client.get(key).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_store_and_model_converge() {
    let client = InMemoryClient::default();
    let mock = Arc::new(MockBackend::new());
    let (shutdown, handle) = start(&client, &mock);

    let acme = client
        .create(
            &Store::new("root:orgs", "acme", CORE)
                .with_tuples(vec![Tuple::new("doc:readme", "viewer", "user:alice")]),
        )
        .await
        .unwrap();
    let key = acme.key();
    client
        .create(
            &AuthorizationModel::new("root:orgs:acme", "docs", acme.store_ref(), DOCS)
                .with_tuples(vec![Tuple::new("doc:guide", "viewer", "user:bob")]),
        )
        .await
        .unwrap();

    let mut store_id = String::new();
    for _ in 0..1000 {
        let current = store(&client, &key).await;
        let ready = find_condition(&current.status.conditions, READY).is_some_and(|c| c.is_true());
        if ready && !current.status.authorization_model_id.is_empty() {
            let tuples = mock.tuples(&current.status.store_id);
            if tuples.len() == 2 {
                store_id = current.status.store_id.clone();
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!store_id.is_empty(), "store did not converge");

    let (_, model) = mock.latest_model(&store_id).unwrap();
    let mut types: Vec<&str> = model.type_names().collect();
    types.sort();
    assert_eq!(types, vec!["doc", "user"]);
    assert_eq!(
        mock.tuples(&store_id),
        vec![
            Tuple::new("doc:guide", "viewer", "user:bob"),
            Tuple::new("doc:readme", "viewer", "user:alice"),
        ]
    );

    stop(shutdown, handle).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_store_deletion_waits_for_its_models() {
    let client = InMemoryClient::default();
    let mock = Arc::new(MockBackend::new());
    let (shutdown, handle) = start(&client, &mock);

    let acme = client.create(&Store::new("root:orgs", "acme", CORE)).await.unwrap();
    let key = acme.key();
    let docs = client
        .create(&AuthorizationModel::new("root:orgs:acme", "docs", acme.store_ref(), DOCS))
        .await
        .unwrap();

    let mut store_id = String::new();
    for _ in 0..1000 {
        let current = store(&client, &key).await;
        if !current.status.authorization_model_id.is_empty() {
            store_id = current.status.store_id.clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!store_id.is_empty(), "store did not get a model");

    client.delete::<Store>(&key).await.unwrap();
    let mut blocked = false;
    for _ in 0..1000 {
        let current = store(&client, &key).await;
        if find_condition(&current.status.conditions, READY)
            .is_some_and(|c| c.reason == "BlockedByDependents")
        {
            blocked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(blocked, "store deletion was not blocked");
    assert!(mock.has_store(&store_id));

    client.delete::<AuthorizationModel>(&docs.key()).await.unwrap();

    let probe = client.clone();
    eventually("store removal", move || !probe.contains::<Store>(&key)).await;
    assert!(!mock.has_store(&store_id));
    assert_eq!(client.count::<AuthorizationModel>(), 0);

    stop(shutdown, handle).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocked_store_deletion_keeps_its_tuples() {
    let client = InMemoryClient::default();
    let mock = Arc::new(MockBackend::new());
    mock.set_strict_tuples(true);
    let (shutdown, handle) = start(&client, &mock);

    let readme = Tuple::new("doc:readme", "viewer", "user:alice");
    let acme = client
        .create(&Store::new("root:orgs", "acme", CORE).with_tuples(vec![readme.clone()]))
        .await
        .unwrap();
    let key = acme.key();
    client
        .create(&AuthorizationModel::new("root:orgs:acme", "docs", acme.store_ref(), DOCS))
        .await
        .unwrap();

    let mut store_id = String::new();
    for _ in 0..1000 {
        let current = store(&client, &key).await;
        if !current.status.managed_tuples.is_empty() && !current.status.authorization_model_id.is_empty() {
            store_id = current.status.store_id.clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!store_id.is_empty(), "store tuples were not applied");

    client.delete::<Store>(&key).await.unwrap();
    let mut blocked = None;
    for _ in 0..1000 {
        let current = store(&client, &key).await;
        if find_condition(&current.status.conditions, READY)
            .is_some_and(|c| c.reason == "BlockedByDependents")
        {
            blocked = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let blocked = blocked.expect("store deletion was not blocked");

    assert_eq!(mock.tuples(&store_id), vec![readme.clone()]);
    assert_eq!(blocked.status.managed_tuples, vec![readme]);
    assert!(blocked.meta.has_finalizer(STORE_FINALIZER));
    assert!(blocked.meta.has_finalizer(STORE_TUPLES_FINALIZER));

    stop(shutdown, handle).await;
}
