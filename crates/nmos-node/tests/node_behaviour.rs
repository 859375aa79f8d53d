//! End-to-end behaviour scenarios driven through fake transports.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use url::Url;

use nmos_model::{make_device, make_node, make_sender, NodeStore, ResourceId};
use nmos_node::{
    DiscoveredService, NodeBehaviour, NodeConfig, NodeResult, RegistrationRequest,
    RegistryTransport, ServiceAdvertiser, ServiceBrowser, TxtRecords,
};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Debug, Clone)]
enum Recorded {
    Post {
        base: String,
        type_name: String,
        id: String,
        data: serde_json::Value,
    },
    Delete {
        path: String,
    },
    Health {
        node_id: String,
    },
}

/// Registry transport with scripted status codes and a request log.
///
/// Unscripted calls answer with the success status for their method.
#[derive(Default)]
struct FakeRegistry {
    log: Mutex<Vec<Recorded>>,
    post_statuses: Mutex<VecDeque<u16>>,
    delete_statuses: Mutex<VecDeque<u16>>,
    health_statuses: Mutex<VecDeque<u16>>,
}

impl FakeRegistry {
    fn script_posts(&self, statuses: &[u16]) {
        self.post_statuses.lock().unwrap().extend(statuses.iter().copied());
    }

    fn script_health(&self, statuses: &[u16]) {
        self.health_statuses.lock().unwrap().extend(statuses.iter().copied());
    }

    fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    fn posts(&self) -> Vec<(String, String)> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Post { type_name, id, .. } => Some((type_name, id)),
                _ => None,
            })
            .collect()
    }

    fn deletes(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Delete { path } => Some(path),
                _ => None,
            })
            .collect()
    }

    fn health_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| matches!(r, Recorded::Health { .. }))
            .count()
    }

    fn request_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

#[async_trait]
impl RegistryTransport for FakeRegistry {
    async fn post_resource(&self, base: &Url, body: &RegistrationRequest) -> NodeResult<u16> {
        let status = self.post_statuses.lock().unwrap().pop_front().unwrap_or(201);
        self.log.lock().unwrap().push(Recorded::Post {
            base: base.to_string(),
            type_name: body.resource_type.name().to_string(),
            id: body.data["id"].as_str().unwrap_or_default().to_string(),
            data: body.data.clone(),
        });
        Ok(status)
    }

    async fn delete_resource(&self, _base: &Url, path: &str) -> NodeResult<u16> {
        let status = self.delete_statuses.lock().unwrap().pop_front().unwrap_or(204);
        self.log.lock().unwrap().push(Recorded::Delete {
            path: path.to_string(),
        });
        Ok(status)
    }

    async fn post_health(&self, _base: &Url, node_id: &ResourceId) -> NodeResult<u16> {
        let status = self.health_statuses.lock().unwrap().pop_front().unwrap_or(200);
        self.log.lock().unwrap().push(Recorded::Health {
            node_id: node_id.to_string(),
        });
        Ok(status)
    }
}

/// Advertiser that records every publication.
#[derive(Default)]
struct FakeAdvertiser {
    published: Mutex<Vec<TxtRecords>>,
}

impl FakeAdvertiser {
    fn publications(&self) -> Vec<TxtRecords> {
        self.published.lock().unwrap().clone()
    }

    /// Publications carrying ver_* records, decoded as
    /// [slf, dev, src, flw, snd, rcv].
    fn ver_publications(&self) -> Vec<[u64; 6]> {
        self.publications()
            .iter()
            .filter_map(|txt| {
                Some([
                    txt.get("ver_slf")?.parse().ok()?,
                    txt.get("ver_dev")?.parse().ok()?,
                    txt.get("ver_src")?.parse().ok()?,
                    txt.get("ver_flw")?.parse().ok()?,
                    txt.get("ver_snd")?.parse().ok()?,
                    txt.get("ver_rcv")?.parse().ok()?,
                ])
            })
            .collect()
    }
}

#[async_trait]
impl ServiceAdvertiser for FakeAdvertiser {
    async fn register_service(&self, _: &str, _: u16, txt: TxtRecords) -> NodeResult<()> {
        self.published.lock().unwrap().push(txt);
        Ok(())
    }

    async fn update_service(&self, _: &str, txt: TxtRecords) -> NodeResult<()> {
        self.published.lock().unwrap().push(txt);
        Ok(())
    }
}

/// Browser answering from a script, then with nothing.
#[derive(Default)]
struct FakeBrowser {
    scripted: Mutex<VecDeque<Vec<DiscoveredService>>>,
}

impl FakeBrowser {
    fn script(&self, answers: Vec<Vec<DiscoveredService>>) {
        self.scripted.lock().unwrap().extend(answers);
    }
}

#[async_trait]
impl ServiceBrowser for FakeBrowser {
    async fn browse(&self, _: &str) -> NodeResult<Vec<DiscoveredService>> {
        Ok(self.scripted.lock().unwrap().pop_front().unwrap_or_default())
    }
}

fn registry_answer(host: &str, port: u16, pri: u32) -> DiscoveredService {
    let mut txt = TxtRecords::new();
    txt.push("pri", pri.to_string());
    txt.push("api_proto", "http");
    txt.push("api_ver", "v1.0,v1.1,v1.2,v1.3");
    DiscoveredService {
        host: host.parse::<IpAddr>().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        port,
        txt,
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    registry: Arc<FakeRegistry>,
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<NodeResult<()>>,
}

fn test_config() -> NodeConfig {
    NodeConfig {
        pri: 30,
        ..Default::default()
    }
}

fn start(
    config: NodeConfig,
    store: NodeStore,
    registry: Arc<FakeRegistry>,
    advertiser: Arc<FakeAdvertiser>,
    browser: Arc<FakeBrowser>,
) -> Harness {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let behaviour = NodeBehaviour::new(
        Arc::new(config),
        store,
        registry.clone(),
        advertiser,
        browser,
    );
    let handle = tokio::spawn(behaviour.run(shutdown_rx));

    Harness {
        registry,
        shutdown_tx,
        handle,
    }
}

impl Harness {
    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        tokio::time::timeout(Duration::from_secs(120), self.handle)
            .await
            .expect("behaviour did not stop")
            .expect("behaviour task panicked")
            .expect("behaviour returned an error");
    }
}

async fn wait_until<F: FnMut() -> bool>(mut condition: F, what: &str) {
    for _ in 0..20_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn happy_path_registers_node_then_device_then_heartbeats() {
    let registry = Arc::new(FakeRegistry::default());
    let advertiser = Arc::new(FakeAdvertiser::default());
    let browser = Arc::new(FakeBrowser::default());
    browser.script(vec![vec![registry_answer("10.0.0.20", 8235, 100)]]);

    let store = NodeStore::new();
    let node_id = ResourceId::from_seed("test", "node");
    let device_id = ResourceId::from_seed("test", "device");
    let node = make_node(&node_id, "n", "http", &["10.0.0.1".into()], 3212);
    store.insert(node).await.unwrap();
    store
        .insert(make_device(&device_id, &node_id, "d", &[], &[]))
        .await
        .unwrap();

    let harness = start(test_config(), store, registry, advertiser, browser);

    let registry = harness.registry.clone();
    wait_until(
        || registry.posts().len() >= 2 && registry.health_count() >= 3,
        "node and device registered and heartbeats flowing",
    )
    .await;

    let posts = registry.posts();
    assert_eq!(posts[0], ("node".to_string(), node_id.to_string()));
    assert_eq!(posts[1], ("device".to_string(), device_id.to_string()));

    // requests target the discovered registry at its advertised version
    let requests = registry.requests();
    match &requests[0] {
        Recorded::Post { base, .. } => {
            assert_eq!(base, "http://10.0.0.20:8235/x-nmos/registration/v1.3");
        }
        other => panic!("expected a POST first, got {:?}", other),
    }

    // the first action on the newly selected registry is a heartbeat probe,
    // before the device event is dispatched
    let first_health = requests
        .iter()
        .position(|r| matches!(r, Recorded::Health { .. }))
        .unwrap();
    let device_post = requests
        .iter()
        .position(|r| matches!(r, Recorded::Post { type_name, .. } if type_name == "device"))
        .unwrap();
    assert!(first_health < device_post);

    // heartbeats carry the node's id
    assert!(requests.iter().any(|r| matches!(
        r,
        Recorded::Health { node_id: heartbeat_id } if *heartbeat_id == node_id.to_string()
    )));

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn empty_discovery_goes_peer_to_peer_without_http() {
    let registry = Arc::new(FakeRegistry::default());
    let advertiser = Arc::new(FakeAdvertiser::default());
    let browser = Arc::new(FakeBrowser::default());

    let store = NodeStore::new();
    let harness = start(
        test_config(),
        store.clone(),
        registry,
        advertiser.clone(),
        browser,
    );

    // wait for the peer-to-peer publication (with all-zero counters)
    wait_until(
        || !advertiser.ver_publications().is_empty(),
        "peer-to-peer publication",
    )
    .await;
    assert_eq!(advertiser.ver_publications()[0], [0, 0, 0, 0, 0, 0]);

    // three added events, folded into the counters one publication at a time
    let node_id = ResourceId::from_seed("test", "node");
    let device_id = ResourceId::from_seed("test", "device");
    let sender_id = ResourceId::from_seed("test", "sender");
    let flow_id = ResourceId::from_seed("test", "flow");

    store
        .insert(make_node(&node_id, "n", "http", &["10.0.0.1".into()], 3212))
        .await
        .unwrap();
    let publications = advertiser.clone();
    wait_until(
        || publications.ver_publications().last() == Some(&[1, 0, 0, 0, 0, 0]),
        "ver_slf=1",
    )
    .await;

    store
        .insert(make_device(&device_id, &node_id, "d", &[], &[]))
        .await
        .unwrap();
    wait_until(
        || publications.ver_publications().last() == Some(&[1, 1, 0, 0, 0, 0]),
        "ver_dev=1",
    )
    .await;

    store
        .insert(make_sender(&sender_id, &flow_id, &device_id, "s", "http://x/sdp", &[]))
        .await
        .unwrap();
    wait_until(
        || publications.ver_publications().last() == Some(&[1, 1, 0, 0, 1, 0]),
        "ver_snd=1",
    )
    .await;

    // counters are monotonically non-decreasing, componentwise
    let all = advertiser.ver_publications();
    for pair in all.windows(2) {
        for component in 0..6 {
            assert!(pair[0][component] <= pair[1][component]);
        }
    }

    // no registry traffic was ever issued
    assert_eq!(harness.registry.request_count(), 0);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn server_error_pops_registry_then_peer_to_peer() {
    let registry = Arc::new(FakeRegistry::default());
    registry.script_posts(&[201, 201, 503]);
    let advertiser = Arc::new(FakeAdvertiser::default());
    let browser = Arc::new(FakeBrowser::default());
    browser.script(vec![vec![registry_answer("10.0.0.20", 8235, 10)]]);

    let store = NodeStore::new();
    let node_id = ResourceId::from_seed("test", "node");
    let device_id = ResourceId::from_seed("test", "device");
    let sender_id = ResourceId::from_seed("test", "sender");
    let flow_id = ResourceId::from_seed("test", "flow");
    store
        .insert(make_node(&node_id, "n", "http", &["10.0.0.1".into()], 3212))
        .await
        .unwrap();
    store
        .insert(make_device(&device_id, &node_id, "d", &[], &[]))
        .await
        .unwrap();
    store
        .insert(make_sender(&sender_id, &flow_id, &device_id, "s", "http://x/sdp", &[]))
        .await
        .unwrap();

    let harness = start(test_config(), store, registry, advertiser.clone(), browser);

    // the failed sender event survives the popped registry and is folded
    // into the counters once peer-to-peer operation takes over
    wait_until(
        || advertiser.ver_publications().last() == Some(&[1, 1, 0, 0, 1, 0]),
        "sender event folded into ver_snd after 5xx",
    )
    .await;

    let posts = harness.registry.posts();
    assert_eq!(posts.len(), 3);
    assert_eq!(posts[2].0, "sender");

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_404_triggers_full_re_registration() {
    let registry = Arc::new(FakeRegistry::default());
    // probe, then three successful background heartbeats, then 404
    registry.script_health(&[200, 200, 200, 200, 404]);
    let advertiser = Arc::new(FakeAdvertiser::default());
    let browser = Arc::new(FakeBrowser::default());
    browser.script(vec![vec![registry_answer("10.0.0.20", 8235, 10)]]);

    let store = NodeStore::new();
    let node_id = ResourceId::from_seed("test", "node");
    store
        .insert(make_node(&node_id, "n", "http", &["10.0.0.1".into()], 3212))
        .await
        .unwrap();

    let harness = start(test_config(), store, registry.clone(), advertiser, browser);

    wait_until(
        || registry.posts().len() >= 2,
        "re-registration after heartbeat 404",
    )
    .await;

    let requests = harness.registry.requests();
    let node_posts: Vec<&serde_json::Value> = requests
        .iter()
        .filter_map(|r| match r {
            Recorded::Post { type_name, data, .. } if type_name == "node" => Some(data),
            _ => None,
        })
        .collect();

    // the first POST of the new registration epoch carries the original
    // node payload
    assert!(node_posts.len() >= 2);
    assert_eq!(node_posts[0], node_posts[1]);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn out_of_sync_200_causes_delete_then_repost() {
    let registry = Arc::new(FakeRegistry::default());
    registry.script_posts(&[200, 201]);
    let advertiser = Arc::new(FakeAdvertiser::default());
    let browser = Arc::new(FakeBrowser::default());
    browser.script(vec![vec![registry_answer("10.0.0.20", 8235, 10)]]);

    let store = NodeStore::new();
    let node_id = ResourceId::from_seed("test", "node");
    let device_id = ResourceId::from_seed("test", "device");
    store
        .insert(make_node(&node_id, "n", "http", &["10.0.0.1".into()], 3212))
        .await
        .unwrap();
    store
        .insert(make_device(&device_id, &node_id, "d", &[], &[]))
        .await
        .unwrap();

    let harness = start(test_config(), store, registry.clone(), advertiser, browser);

    wait_until(
        || registry.posts().len() >= 3,
        "delete-then-repost then device registration",
    )
    .await;

    let requests = harness.registry.requests();

    // exactly one DELETE, of the node's path, between the two node POSTs
    match (&requests[0], &requests[1], &requests[2]) {
        (
            Recorded::Post { type_name: first, .. },
            Recorded::Delete { path },
            Recorded::Post { type_name: second, .. },
        ) => {
            assert_eq!(first, "node");
            assert_eq!(path, &format!("nodes/{}", node_id));
            assert_eq!(second, "node");
        }
        other => panic!("unexpected request sequence: {:?}", other),
    }
    assert_eq!(harness.registry.deletes().len(), 1);

    // the device event proceeds only after the retried POST
    let device_post = requests
        .iter()
        .position(|r| matches!(r, Recorded::Post { type_name, .. } if type_name == "device"))
        .unwrap();
    assert!(device_post > 2);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rapid_churn_preserves_fifo_order() {
    let registry = Arc::new(FakeRegistry::default());
    let advertiser = Arc::new(FakeAdvertiser::default());
    let browser = Arc::new(FakeBrowser::default());
    browser.script(vec![vec![registry_answer("10.0.0.20", 8235, 10)]]);

    let store = NodeStore::new();
    let node_id = ResourceId::from_seed("test", "node");
    let device_id = ResourceId::from_seed("test", "device");
    store
        .insert(make_node(&node_id, "n", "http", &["10.0.0.1".into()], 3212))
        .await
        .unwrap();

    let flow_id = ResourceId::from_seed("test", "flow");
    let mut expected = Vec::new();
    for index in 0..5 {
        let sender_id = ResourceId::from_seed("test", &format!("sender/{}", index));
        store
            .insert(make_sender(
                &sender_id,
                &flow_id,
                &device_id,
                &format!("s{}", index),
                "http://x/sdp",
                &[],
            ))
            .await
            .unwrap();
        expected.push(sender_id.to_string());
    }

    let harness = start(test_config(), store, registry.clone(), advertiser, browser);

    wait_until(|| registry.posts().len() >= 6, "all senders registered").await;

    let sender_posts: Vec<String> = harness
        .registry
        .posts()
        .into_iter()
        .filter(|(type_name, _)| type_name == "sender")
        .map(|(_, id)| id)
        .collect();
    assert_eq!(sender_posts, expected);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn graceful_unregister_stops_heartbeats() {
    let registry = Arc::new(FakeRegistry::default());
    let advertiser = Arc::new(FakeAdvertiser::default());
    let browser = Arc::new(FakeBrowser::default());
    browser.script(vec![vec![registry_answer("10.0.0.20", 8235, 10)]]);

    let store = NodeStore::new();
    let node_id = ResourceId::from_seed("test", "node");
    store
        .insert(make_node(&node_id, "n", "http", &["10.0.0.1".into()], 3212))
        .await
        .unwrap();

    let harness = start(
        test_config(),
        store.clone(),
        registry.clone(),
        advertiser,
        browser,
    );

    wait_until(
        || registry.posts().len() >= 1 && registry.health_count() >= 2,
        "node registered and heartbeating",
    )
    .await;

    // the caller removes the node resource; the grain emits 'removed' last
    store.remove(&node_id).await.unwrap();

    wait_until(
        || !registry.deletes().is_empty(),
        "node registration deleted",
    )
    .await;
    assert_eq!(registry.deletes()[0], format!("nodes/{}", node_id));

    // heartbeats stop once the node is unregistered
    tokio::time::sleep(Duration::from_secs(20)).await;
    let settled = registry.health_count();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(registry.health_count(), settled);

    harness.shutdown().await;
}
