//! Scripted clients and handlers for exercising a real `BlockPoller` without
//! a chain node.
//!
//! A [`ScriptedClient`] serves a fixed sequence of outcomes, asserting that
//! the poller requests heights in exactly the scripted order; counters record
//! how many blocks, skips, and errors each client produced so failover tests
//! can verify which client served what.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use siphon_core::{
    error::BoxedError,
    fetch::{BlockFetcher, BlockHandler, Fetched},
    types::Block,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Installs a test tracing subscriber honouring `RUST_LOG`; call at the top of
/// a test to see poller logs while debugging. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds a test block, deriving `number` and `parent_num` from the numeric
/// prefix of the ids (`"100a"` is block 100 with parent 99).
#[must_use]
pub fn blk(id: &str, parent_id: &str, lib_num: u64) -> Block {
    blk_num(id, parent_id, block_num_from_id(id), block_num_from_id(parent_id), lib_num)
}

/// Builds a test block with explicit numbers.
#[must_use]
pub fn blk_num(id: &str, parent_id: &str, number: u64, parent_num: u64, lib_num: u64) -> Block {
    Block {
        id: id.to_string(),
        number,
        parent_id: parent_id.to_string(),
        parent_num,
        lib_num,
        payload: Some(Arc::new(json!({ "id": id }))),
    }
}

fn block_num_from_id(id: &str) -> u64 {
    let digits: String = id.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// One scripted outcome of a client.
pub struct ScriptedItem {
    block: Block,
    skipped: bool,
    error: Option<String>,
    checked: bool,
}

/// The client produces this block.
#[must_use]
pub fn item(block: Block) -> ScriptedItem {
    ScriptedItem { block, skipped: false, error: None, checked: true }
}

/// The client reports this height as intentionally skipped.
#[must_use]
pub fn skipped(block: Block) -> ScriptedItem {
    ScriptedItem { block, skipped: true, error: None, checked: true }
}

/// The client fails this request.
#[must_use]
pub fn err(block: Block, message: &str) -> ScriptedItem {
    ScriptedItem { block, skipped: false, error: Some(message.to_string()), checked: true }
}

/// The client serves this block regardless of the requested height,
/// simulating a buggy node answering with the wrong block.
#[must_use]
pub fn stale(block: Block) -> ScriptedItem {
    ScriptedItem { block, skipped: false, error: None, checked: false }
}

/// A backend client serving a fixed script of outcomes in order.
pub struct ScriptedClient {
    name: &'static str,
    items: Mutex<Vec<ScriptedItem>>,
    cursor: AtomicUsize,
    pub block_produce_count: AtomicUsize,
    pub skipped_count: AtomicUsize,
    pub err_produce_count: AtomicUsize,
}

impl ScriptedClient {
    #[must_use]
    pub fn new(name: &'static str, items: Vec<ScriptedItem>) -> Arc<Self> {
        Arc::new(Self {
            name,
            items: Mutex::new(items),
            cursor: AtomicUsize::new(0),
            block_produce_count: AtomicUsize::new(0),
            skipped_count: AtomicUsize::new(0),
            err_produce_count: AtomicUsize::new(0),
        })
    }

    /// Whether every scripted item has been consumed.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.cursor.load(Ordering::SeqCst) >= self.items.lock().len()
    }

    fn get_block(&self, block_num: u64) -> Result<Fetched, BoxedError> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let items = self.items.lock();
        let Some(scripted) = items.get(index) else {
            return Err(format!("{}: no more scripted blocks (requested {block_num})", self.name).into());
        };

        if scripted.checked {
            assert_eq!(
                scripted.block.number, block_num,
                "{}: expected request for block {}, got {}",
                self.name, scripted.block.number, block_num
            );
        }

        if let Some(message) = &scripted.error {
            self.err_produce_count.fetch_add(1, Ordering::SeqCst);
            return Err(format!("{}: {message}", self.name).into());
        }

        if scripted.skipped {
            self.skipped_count.fetch_add(1, Ordering::SeqCst);
            return Ok(Fetched::Skipped);
        }

        self.block_produce_count.fetch_add(1, Ordering::SeqCst);
        Ok(Fetched::Block(scripted.block.clone()))
    }
}

/// Fetcher delegating straight to the scripted client.
pub struct ScriptedFetcher {
    pub available: bool,
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self { available: true }
    }
}

#[async_trait]
impl BlockFetcher<Arc<ScriptedClient>> for ScriptedFetcher {
    fn is_block_available(&self, _block_num: u64) -> bool {
        self.available
    }

    async fn fetch(
        &self,
        client: Arc<ScriptedClient>,
        block_num: u64,
    ) -> Result<Fetched, BoxedError> {
        client.get_block(block_num)
    }
}

/// Records every handled block id, optionally failing on a chosen one.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    handled: Arc<Mutex<Vec<String>>>,
    fail_on: Option<String>,
}

impl RecordingHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the poller when the block with `id` is handled.
    #[must_use]
    pub fn failing_on(id: &str) -> Self {
        Self { handled: Arc::default(), fail_on: Some(id.to_string()) }
    }

    #[must_use]
    pub fn handled_ids(&self) -> Vec<String> {
        self.handled.lock().clone()
    }
}

#[async_trait]
impl BlockHandler for RecordingHandler {
    async fn init(&self) {}

    async fn handle(&self, block: &Block) -> Result<(), BoxedError> {
        if self.fail_on.as_deref() == Some(block.id.as_str()) {
            return Err(format!("handler rejected block {}", block.id).into());
        }
        self.handled.lock().push(block.id.clone());
        Ok(())
    }
}
