//! In-memory fakes for the storage and broker ports

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bucketsync_core::config::{AckPolicy, InboundWorkflow, OutboundWorkflow, Remote};
use bucketsync_core::credentials::CredentialResolver;
use bucketsync_core::domain::{Endpoint, WebDavTarget};
use bucketsync_core::ports::{
    Acknowledger, BrokerChannel, BrokerConnection, BrokerLink, Delivery, DeliveryStream,
    MessageBroker, ObjectReader, ObjectRef, QueueBinding, StorageBackend, StorageConnector,
};
use bucketsync_sync::InboundState;
use futures_util::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot, watch, Notify};

// ============================================================================
// Fixtures
// ============================================================================

pub fn remote(name: &str, endpoint: &str) -> Remote {
    Remote {
        name: name.to_string(),
        endpoint: endpoint.to_string(),
        access_key: "access".to_string(),
        secret_key: "secret".to_string(),
        region: "us-east-1".to_string(),
        secure: false,
    }
}

pub fn credentials() -> CredentialResolver {
    CredentialResolver::new(vec![remote("store", "store")])
}

pub fn outbound_workflow(dir: &Path, glob: &str, destination: &str) -> OutboundWorkflow {
    OutboundWorkflow {
        name: "reports".to_string(),
        source: dir.join(glob).to_string_lossy().into_owned(),
        destination: destination.to_string(),
        ..Default::default()
    }
}

pub fn inbound_workflow(source: &str, destination: &Path, ack_policy: AckPolicy) -> InboundWorkflow {
    InboundWorkflow {
        name: "incoming".to_string(),
        source: source.to_string(),
        exchange: "bucket-events".to_string(),
        queue: "bucketsyncd".to_string(),
        remote: "store".to_string(),
        destination: destination.to_path_buf(),
        ack_policy,
        ..Default::default()
    }
}

/// Notification body with one record per `(bucket, encoded key, size)`.
pub fn notification(records: &[(&str, &str, u64)]) -> Vec<u8> {
    let records: Vec<serde_json::Value> = records
        .iter()
        .map(|(bucket, key, size)| {
            serde_json::json!({
                "s3": { "bucket": { "name": bucket }, "object": { "key": key, "size": size } }
            })
        })
        .collect();
    serde_json::to_vec(&serde_json::json!({
        "EventName": "s3:ObjectCreated:Put",
        "Records": records,
    }))
    .unwrap()
}

// ============================================================================
// Waiting helpers
// ============================================================================

const WAIT_LIMIT: Duration = Duration::from_secs(60);

/// Polls `condition` every 10ms until it holds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state(rx: &mut watch::Receiver<InboundState>, state: InboundState) {
    tokio::time::timeout(WAIT_LIMIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state:?}"))
        .map(|_| ())
        .unwrap_or_else(|_| panic!("state channel closed before {state:?}"));
}

// ============================================================================
// MemoryStorage / MemoryConnector
// ============================================================================

/// Object store kept in a HashMap.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<ObjectRef, Vec<u8>>>,
    reported_sizes: Mutex<HashMap<ObjectRef, u64>>,
    puts: AtomicU32,
    gets: AtomicU32,
    get_gate: Mutex<Option<Arc<Notify>>>,
}

impl MemoryStorage {
    pub fn insert(&self, bucket: &str, key: &str, content: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(ObjectRef::new(bucket, key), content.to_vec());
    }

    /// Stores `content` but reports `size` on download.
    pub fn insert_with_reported_size(&self, bucket: &str, key: &str, content: &[u8], size: u64) {
        self.insert(bucket, key, content);
        self.reported_sizes
            .lock()
            .unwrap()
            .insert(ObjectRef::new(bucket, key), size);
    }

    pub fn object(&self, object: &ObjectRef) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(object).cloned()
    }

    pub fn put_count(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }

    /// Downloads started so far, including parked ones.
    pub fn get_count(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }

    /// Parks every later `get` until the returned `Notify` is signalled.
    pub fn hold_gets(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.get_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryStorage {
    async fn put(
        &self,
        object: &ObjectRef,
        mut file: tokio::fs::File,
        _size: u64,
    ) -> anyhow::Result<u64> {
        let mut content = Vec::new();
        file.read_to_end(&mut content).await?;
        let len = content.len() as u64;
        self.objects.lock().unwrap().insert(object.clone(), content);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(len)
    }

    async fn get(&self, object: &ObjectRef) -> anyhow::Result<ObjectReader> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let gate = self.get_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let content = self
            .object(object)
            .ok_or_else(|| anyhow::anyhow!("NoSuchKey: {object}"))?;
        let size = self
            .reported_sizes
            .lock()
            .unwrap()
            .get(object)
            .copied()
            .unwrap_or(content.len() as u64);
        Ok(ObjectReader {
            size,
            body: Box::pin(Cursor::new(content)),
        })
    }

    async fn exists(&self, object: &ObjectRef) -> anyhow::Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(object))
    }

    async fn delete(&self, object: &ObjectRef) -> anyhow::Result<()> {
        self.objects.lock().unwrap().remove(object);
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|o| o.bucket == bucket && o.key.starts_with(prefix))
            .map(|o| o.key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Hands out one shared [`MemoryStorage`] and records every request.
#[derive(Default)]
pub struct MemoryConnector {
    storage: Arc<MemoryStorage>,
    failures_left: AtomicU32,
    object_store_calls: Mutex<Vec<String>>,
    webdav_calls: Mutex<Vec<String>>,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the next `n` client constructions.
    pub fn failing(n: u32) -> Arc<Self> {
        let connector = Self::default();
        connector.failures_left.store(n, Ordering::SeqCst);
        Arc::new(connector)
    }

    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    /// `remote@host` of every object store request.
    pub fn object_store_calls(&self) -> Vec<String> {
        self.object_store_calls.lock().unwrap().clone()
    }

    /// Base URL + path of every WebDAV request.
    pub fn webdav_calls(&self) -> Vec<String> {
        self.webdav_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl StorageConnector for MemoryConnector {
    async fn object_store(
        &self,
        endpoint: &Endpoint,
        remote: &Remote,
    ) -> anyhow::Result<Arc<dyn StorageBackend>> {
        self.object_store_calls
            .lock()
            .unwrap()
            .push(format!("{}@{}", remote.name, endpoint.host));

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            anyhow::bail!("endpoint unreachable");
        }
        Ok(self.storage.clone())
    }

    async fn webdav(&self, target: &WebDavTarget) -> anyhow::Result<Arc<dyn StorageBackend>> {
        self.webdav_calls
            .lock()
            .unwrap()
            .push(format!("{}{}", target.base_url, target.path.trim_start_matches('/')));
        Ok(self.storage.clone())
    }
}

// ============================================================================
// Deliveries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Ack,
    Reject { requeue: bool },
}

pub type SettlementLog = Arc<Mutex<Vec<(u64, Settled)>>>;

/// Records settlements in `log`. A failing acker records nothing and
/// returns an error, as when the channel closed under the delivery.
struct FakeAcker {
    tag: u64,
    log: SettlementLog,
    fail: bool,
}

impl FakeAcker {
    fn settle(&self, settled: Settled) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("channel closed before delivery {} was settled", self.tag);
        }
        self.log.lock().unwrap().push((self.tag, settled));
        Ok(())
    }
}

#[async_trait::async_trait]
impl Acknowledger for FakeAcker {
    async fn ack(&self) -> anyhow::Result<()> {
        self.settle(Settled::Ack)
    }

    async fn reject(&self, requeue: bool) -> anyhow::Result<()> {
        self.settle(Settled::Reject { requeue })
    }
}

/// A standalone delivery and the log its settlement lands in.
pub fn delivery(tag: u64, body: &[u8]) -> (Delivery, SettlementLog) {
    settleable_delivery(tag, body, false)
}

/// A standalone delivery whose ack and reject both fail.
pub fn unsettleable_delivery(tag: u64, body: &[u8]) -> (Delivery, SettlementLog) {
    settleable_delivery(tag, body, true)
}

fn settleable_delivery(tag: u64, body: &[u8], fail: bool) -> (Delivery, SettlementLog) {
    let log = SettlementLog::default();
    let acker = FakeAcker {
        tag,
        log: log.clone(),
        fail,
    };
    (Delivery::new(tag, body.to_vec(), Box::new(acker)), log)
}

// ============================================================================
// FakeBroker
// ============================================================================

type DeliverySender = mpsc::UnboundedSender<anyhow::Result<Delivery>>;

struct FakeLink {
    open: bool,
    close_tx: Option<oneshot::Sender<String>>,
    deliveries: Option<DeliverySender>,
}

#[derive(Default)]
struct BrokerState {
    dials: u32,
    fail_dials: u32,
    failing_uris: Vec<String>,
    fail_bind: bool,
    connection_names: Vec<String>,
    bindings: Vec<QueueBinding>,
    consumers: Vec<(String, String)>,
    links: Vec<FakeLink>,
    next_tag: u64,
    failing_settlements: u32,
}

/// Broker whose connections live in memory. Dials, bindings and consumers
/// are recorded; tests publish messages and sever connections at will.
#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
    settlements: SettlementLog,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_dials(&self, n: u32) {
        self.state.lock().unwrap().fail_dials = n;
    }

    /// Every dial to `uri` fails.
    pub fn fail_uri(&self, uri: &str) {
        self.state.lock().unwrap().failing_uris.push(uri.to_string());
    }

    /// The next `n` published deliveries cannot be settled.
    pub fn fail_next_settlements(&self, n: u32) {
        self.state.lock().unwrap().failing_settlements = n;
    }

    pub fn fail_bind(&self) {
        self.state.lock().unwrap().fail_bind = true;
    }

    pub fn dials(&self) -> u32 {
        self.state.lock().unwrap().dials
    }

    pub fn connection_names(&self) -> Vec<String> {
        self.state.lock().unwrap().connection_names.clone()
    }

    pub fn bindings(&self) -> Vec<QueueBinding> {
        self.state.lock().unwrap().bindings.clone()
    }

    /// `(queue, consumer tag)` of every consumer started.
    pub fn consumers(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().consumers.clone()
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().links.iter().filter(|l| l.open).count()
    }

    pub fn closed_connections(&self) -> usize {
        self.state.lock().unwrap().links.iter().filter(|l| !l.open).count()
    }

    pub fn settlements(&self) -> Vec<(u64, Settled)> {
        self.settlements.lock().unwrap().clone()
    }

    /// Delivers `body` to the newest consumer. Returns the delivery tag.
    pub fn publish(&self, body: &[u8]) -> Option<u64> {
        let mut state = self.state.lock().unwrap();
        state.next_tag += 1;
        let tag = state.next_tag;

        let fail = state.failing_settlements > 0;
        state.failing_settlements = state.failing_settlements.saturating_sub(1);

        let sender = state
            .links
            .iter()
            .rev()
            .filter(|l| l.open)
            .find_map(|l| l.deliveries.as_ref())?;

        let acker = FakeAcker {
            tag,
            log: self.settlements.clone(),
            fail,
        };
        sender
            .send(Ok(Delivery::new(tag, body.to_vec(), Box::new(acker))))
            .ok()?;
        Some(tag)
    }

    /// Severs the newest open connection as a network failure would.
    pub fn drop_connection(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(link) = state.links.iter_mut().rev().find(|l| l.open) else {
            return false;
        };
        link.open = false;
        link.deliveries = None;
        if let Some(tx) = link.close_tx.take() {
            let _ = tx.send("connection reset by peer".to_string());
        }
        true
    }
}

#[async_trait::async_trait]
impl MessageBroker for FakeBroker {
    async fn dial(&self, uri: &str, connection_name: &str) -> anyhow::Result<BrokerLink> {
        let mut state = self.state.lock().unwrap();
        state.dials += 1;

        if state.failing_uris.iter().any(|u| u == uri) {
            anyhow::bail!("connection refused: {uri}");
        }
        if state.fail_dials > 0 {
            state.fail_dials -= 1;
            anyhow::bail!("connection refused");
        }

        state.connection_names.push(connection_name.to_string());
        let (close_tx, closed) = oneshot::channel();
        let id = state.links.len();
        state.links.push(FakeLink {
            open: true,
            close_tx: Some(close_tx),
            deliveries: None,
        });

        Ok(BrokerLink {
            connection: Box::new(FakeConnection {
                id,
                state: self.state.clone(),
            }),
            closed,
        })
    }
}

struct FakeConnection {
    id: usize,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait::async_trait]
impl BrokerConnection for FakeConnection {
    async fn open_channel(&self) -> anyhow::Result<Box<dyn BrokerChannel>> {
        if !self.state.lock().unwrap().links[self.id].open {
            anyhow::bail!("connection is closed");
        }
        Ok(Box::new(FakeChannel {
            id: self.id,
            state: self.state.clone(),
        }))
    }

    async fn close(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let link = &mut state.links[self.id];
        link.open = false;
        link.deliveries = None;
        link.close_tx = None;
        Ok(())
    }
}

struct FakeChannel {
    id: usize,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait::async_trait]
impl BrokerChannel for FakeChannel {
    async fn bind(&self, binding: &QueueBinding) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_bind {
            anyhow::bail!("NOT_FOUND - no exchange '{}'", binding.exchange);
        }
        state.bindings.push(binding.clone());
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> anyhow::Result<DeliveryStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock().unwrap();
            state.links[self.id].deliveries = Some(tx);
            state
                .consumers
                .push((queue.to_string(), consumer_tag.to_string()));
        }

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}

/// Reads a local file written by a pipeline.
pub fn read(path: impl Into<PathBuf>) -> Vec<u8> {
    std::fs::read(path.into()).unwrap()
}
