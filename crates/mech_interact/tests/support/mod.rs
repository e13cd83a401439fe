//! In-memory collaborators for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use mech_config::MechInteractConfig;
use mech_interact::{
    Collaborators, ContentId, ContentStore, ContractApi, Delivery, ManualClock, MechInfo,
    MechInteractBehaviours, MechInteractError, MechInteractResult, MechRegistryClient,
    MechResponseSource,
};
use mech_primitives::Address;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub fn addr(last: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0xbe;
    bytes[19] = last;
    Address::new(bytes)
}

pub const MECH: u8 = 1;
pub const MULTISEND: u8 = 2;
pub const SAFE: u8 = 3;
pub const MARKETPLACE: u8 = 4;
pub const TRACKER: u8 = 5;
pub const NFT: u8 = 6;

pub fn safe_hash() -> String {
    format!("0x{}", "ab".repeat(32))
}

/// Legacy direct deployment with instant retries.
pub fn legacy_config() -> MechInteractConfig {
    let mut config = MechInteractConfig::new(addr(MECH), addr(MULTISEND), addr(SAFE));
    config.request_retry_delay = 0;
    config.retry_attempts = 2;
    config
}

/// Marketplace deployment; the priority mech is [`MECH`].
pub fn marketplace_config() -> MechInteractConfig {
    let mut config = legacy_config();
    config.use_mech_marketplace = true;
    config.mech_marketplace_config.mech_marketplace_address = addr(MARKETPLACE);
    config.mech_marketplace_config.priority_mech_address = addr(MECH);
    config.nvm_balance_tracker_address = Some(addr(TRACKER));
    config
}

#[derive(Debug, Clone)]
pub enum Reply {
    Value(Value),
    Revert,
    Fail,
}

/// Scripted contract layer.
#[derive(Default)]
pub struct FakeContracts {
    replies: Mutex<BTreeMap<(Address, String), Reply>>,
    reads: Mutex<Vec<(Address, String, Value)>>,
    builds: Mutex<Vec<(Address, String, Value)>>,
}

impl FakeContracts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, contract: Address, method: &str, reply: Reply) {
        self.replies
            .lock()
            .insert((contract, method.to_string()), reply);
    }

    pub fn value(&self, contract: Address, method: &str, value: Value) {
        self.reply(contract, method, Reply::Value(value));
    }

    /// Scripts the safe hash so multisends can be built.
    pub fn with_safe(&self) {
        self.value(addr(SAFE), "get_raw_safe_transaction_hash", json!(safe_hash()));
    }

    pub fn reads_of(&self, method: &str) -> usize {
        self.reads.lock().iter().filter(|(_, m, _)| m == method).count()
    }

    pub fn builds(&self) -> Vec<(Address, String, Value)> {
        self.builds.lock().clone()
    }
}

#[async_trait]
impl ContractApi for FakeContracts {
    async fn read(&self, contract: Address, method: &str, args: Value) -> MechInteractResult<Value> {
        self.reads
            .lock()
            .push((contract, method.to_string(), args));
        let reply = self
            .replies
            .lock()
            .get(&(contract, method.to_string()))
            .cloned();
        match reply {
            Some(Reply::Value(value)) => Ok(value),
            Some(Reply::Revert) => Err(MechInteractError::ContractReverted {
                contract,
                method: method.to_string(),
            }),
            Some(Reply::Fail) | None => Err(MechInteractError::contract(format!(
                "{method} on {contract} unreachable"
            ))),
        }
    }

    async fn build_tx(
        &self,
        contract: Address,
        method: &str,
        args: Value,
    ) -> MechInteractResult<Vec<u8>> {
        let encoded = format!("{contract}:{method}:{args}").into_bytes();
        self.builds.lock().push((contract, method.to_string(), args));
        Ok(encoded)
    }
}

/// Content store keyed by the sha2-256 content id.
#[derive(Default)]
pub struct FakeContentStore {
    blobs: Mutex<BTreeMap<ContentId, Vec<u8>>>,
    gets: AtomicUsize,
    fail_gets: AtomicBool,
}

impl FakeContentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, bytes: &[u8]) -> ContentId {
        let id = ContentId::for_bytes(bytes);
        self.blobs.lock().insert(id.clone(), bytes.to_vec());
        id
    }

    pub fn insert_json(&self, value: &Value) -> ContentId {
        self.insert(value.to_string().as_bytes())
    }

    pub fn fetched(&self, id: &ContentId) -> Option<Value> {
        self.blobs
            .lock()
            .get(id)
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_gets.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for FakeContentStore {
    async fn get(&self, id: &ContentId) -> MechInteractResult<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(MechInteractError::content_store("gateway timeout"));
        }
        self.blobs
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| MechInteractError::content_store(format!("{id} not found")))
    }

    async fn put(&self, bytes: Vec<u8>) -> MechInteractResult<ContentId> {
        Ok(self.insert(&bytes))
    }
}

/// Paged registry over a fixed mech list.
#[derive(Default)]
pub struct FakeRegistry {
    mechs: Mutex<Vec<MechInfo>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl FakeRegistry {
    pub fn new(mechs: Vec<MechInfo>) -> Arc<Self> {
        Arc::new(Self {
            mechs: Mutex::new(mechs),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MechRegistryClient for FakeRegistry {
    async fn fetch_mechs(
        &self,
        id_gt: u64,
        first: usize,
        ignored: &[Address],
    ) -> MechInteractResult<Vec<MechInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(MechInteractError::registry_unavailable("subgraph returned 502"));
        }
        let mut page: Vec<MechInfo> = self
            .mechs
            .lock()
            .iter()
            .filter(|info| info.id > id_gt && !ignored.contains(&info.address))
            .cloned()
            .collect();
        page.sort_by_key(|info| info.id);
        page.truncate(first);
        Ok(page)
    }
}

/// Deliveries by request id.
#[derive(Default)]
pub struct FakeResponseSource {
    request_ids: Mutex<BTreeMap<String, Vec<String>>>,
    deliveries: Mutex<BTreeMap<String, Delivery>>,
    receipt_failure: Mutex<Option<String>>,
    polls: AtomicUsize,
}

impl FakeResponseSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn emit(&self, tx_hash: &str, ids: &[&str]) {
        self.request_ids.lock().insert(
            tx_hash.to_string(),
            ids.iter().map(|id| id.to_string()).collect(),
        );
    }

    pub fn deliver(&self, delivery: Delivery) {
        self.deliveries
            .lock()
            .insert(delivery.request_id.clone(), delivery);
    }

    /// Makes every receipt lookup fail with `message`.
    pub fn fail_receipts(&self, message: &str) {
        *self.receipt_failure.lock() = Some(message.to_string());
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MechResponseSource for FakeResponseSource {
    async fn request_ids(&self, tx_hash: &str) -> MechInteractResult<Vec<String>> {
        if let Some(message) = self.receipt_failure.lock().clone() {
            return Err(MechInteractError::contract(message));
        }
        self.request_ids
            .lock()
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| MechInteractError::contract(format!("no receipt for {tx_hash}")))
    }

    async fn poll(&self, request_id: &str) -> MechInteractResult<Option<Delivery>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.deliveries.lock().get(request_id).cloned())
    }
}

/// Every fake of one participant.
pub struct Harness {
    pub config: Arc<MechInteractConfig>,
    pub contracts: Arc<FakeContracts>,
    pub content: Arc<FakeContentStore>,
    pub registry: Arc<FakeRegistry>,
    pub responses: Arc<FakeResponseSource>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(config: MechInteractConfig) -> Self {
        Self {
            config: Arc::new(config),
            contracts: FakeContracts::new(),
            content: FakeContentStore::new(),
            registry: FakeRegistry::new(Vec::new()),
            responses: FakeResponseSource::new(),
            clock: Arc::new(ManualClock::new(1_000)),
        }
    }

    pub fn with_registry(mut self, mechs: Vec<MechInfo>) -> Self {
        self.registry = FakeRegistry::new(mechs);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            contracts: self.contracts.clone(),
            content: self.content.clone(),
            registry: self.registry.clone(),
            responses: self.responses.clone(),
            inbox: None,
        }
    }

    pub fn behaviours(&self) -> MechInteractBehaviours {
        MechInteractBehaviours::new(self.config.clone(), self.collaborators())
    }
}

/// Registry entry whose tools document is stored in `content`.
pub fn listed_mech(
    content: &FakeContentStore,
    last: u8,
    rate: u128,
    tools: &[&str],
) -> MechInfo {
    let id = content.insert_json(&json!({ "tools": tools }));
    let digest = id.digest_hex().map(str::to_string).unwrap_or_default();
    serde_json::from_value(json!({
        "id": u64::from(last),
        "address": addr(last),
        "service": { "metadata": [ { "metadata": format!("0x{digest}") } ] },
        "karma": 0,
        "receivedRequests": 0,
        "selfDeliveredFromReceived": 0,
        "maxDeliveryRate": rate as u64,
        "relevant_tools": tools,
    }))
    .unwrap_or_else(|e| panic!("invalid mech fixture: {e}"))
}
