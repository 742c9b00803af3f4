//! Shared fixtures: a scripted chain behind [`EvmRpcClient`] and helpers to
//! run a supervisor against it.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_core::sol_types::{SolCall, SolEvent};
use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use tokio::task::JoinHandle;

use launchindex_core::error::IndexerError;
use launchindex_core::indexer::DEFAULT_MULTICALL_ADDRESS;
use launchindex_core::retry::RetryConfig;
use launchindex_core::store::{Store, TokenQueries};
use launchindex_core::types::{BlockSummary, EventFilter, ProtocolVersion};
use launchindex_evm::abi::{b256_hex, common, multicall, v0, v1};
use launchindex_evm::{EvmRpcClient, IndexerBuilder, RawLog, SupervisorHandle};

// ─── Addresses ────────────────────────────────────────────────────────────────

pub const FACTORY_V0: u8 = 0xf0;
pub const FACTORY_V1: u8 = 0xf1;
pub const TOKEN: u8 = 0xaa;
pub const CONVICTION: u8 = 0xbb;
pub const POOL: u8 = 0xd1;
pub const CREATOR: u8 = 0xee;
pub const ALICE: u8 = 0xc1;
pub const BOB: u8 = 0xc2;

pub fn addr(b: u8) -> Address {
    Address::repeat_byte(b)
}

pub fn hex_addr(b: u8) -> String {
    format!("0x{}", format!("{b:02x}").repeat(20))
}

pub fn tx(n: u64) -> String {
    format!("0x{n:064x}")
}

// ─── Mock chain ───────────────────────────────────────────────────────────────

struct Details {
    version: ProtocolVersion,
    name: String,
    image: String,
}

#[derive(Default)]
struct ChainState {
    head: u64,
    fork_from: u64,
    fork_salt: u32,
    logs: Vec<RawLog>,
    senders: HashMap<String, String>,
    identities: HashMap<String, (String, String)>,
    details: HashMap<(String, String), Details>,
    rejected: HashSet<String>,
}

impl ChainState {
    fn hash(&self, n: u64) -> String {
        let salt = if self.fork_salt > 0 && n >= self.fork_from {
            self.fork_salt
        } else {
            0
        };
        format!("0x{n:056x}{salt:08x}")
    }
}

/// A chain whose logs and contract state are set up by the test.
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(head: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                head,
                ..Default::default()
            }),
        })
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Replace every block from `block` on with a different fork.
    pub fn reorg_from(&self, block: u64) {
        let mut s = self.state.lock().unwrap();
        s.fork_from = block;
        s.fork_salt += 1;
        let hashes: Vec<(usize, String)> = s
            .logs
            .iter()
            .enumerate()
            .filter(|(_, l)| parse(&l.block_number) >= block)
            .map(|(i, l)| (i, s.hash(parse(&l.block_number))))
            .collect();
        for (i, h) in hashes {
            s.logs[i].block_hash = h;
        }
    }

    pub fn emit<E: SolEvent>(&self, address: u8, block: u64, tx_n: u64, log_index: u32, event: &E) {
        let log = event.encode_log_data();
        self.emit_raw(
            address,
            block,
            tx_n,
            log_index,
            log.topics().iter().map(b256_hex).collect(),
            format!("0x{}", hex::encode(&log.data)),
        );
    }

    pub fn emit_raw(&self, address: u8, block: u64, tx_n: u64, log_index: u32, topics: Vec<String>, data: String) {
        let mut s = self.state.lock().unwrap();
        let block_hash = s.hash(block);
        s.logs.push(RawLog {
            address: hex_addr(address),
            topics,
            data,
            block_number: format!("0x{block:x}"),
            block_hash,
            tx_hash: tx(tx_n),
            tx_index: Some(format!("0x{:x}", tx_n % 100)),
            log_index: format!("0x{log_index:x}"),
            removed: None,
        });
    }

    pub fn set_sender(&self, tx_n: u64, from: u8) {
        self.state.lock().unwrap().senders.insert(tx(tx_n), hex_addr(from));
    }

    pub fn set_identity(&self, token: u8, name: &str, symbol: &str) {
        self.state
            .lock()
            .unwrap()
            .identities
            .insert(hex_addr(token), (name.into(), symbol.into()));
    }

    pub fn set_details(&self, collectible: u8, version: ProtocolVersion, id: u64, name: &str, image: &str) {
        self.state.lock().unwrap().details.insert(
            (hex_addr(collectible), id.to_string()),
            Details {
                version,
                name: name.into(),
                image: image.into(),
            },
        );
    }

    /// Make every `eth_getLogs` for `address` fail permanently.
    pub fn reject_logs(&self, address: u8) {
        self.state.lock().unwrap().rejected.insert(hex_addr(address));
    }

    fn answer_call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, IndexerError> {
        let s = self.state.lock().unwrap();
        if to.eq_ignore_ascii_case(DEFAULT_MULTICALL_ADDRESS) {
            let batch = multicall::aggregate3Call::abi_decode(data, true)
                .map_err(|e| IndexerError::permanent(e.to_string()))?;
            let results: Vec<multicall::Call3Result> = batch
                .calls
                .iter()
                .map(|call| {
                    let target = format!("0x{}", hex::encode(call.target.as_slice()));
                    let selector = call.callData.get(..4);
                    let answer = s.identities.get(&target).and_then(|(name, symbol)| {
                        if selector == Some(&common::nameCall::SELECTOR[..]) {
                            Some(common::nameCall::abi_encode_returns(&(name.clone(),)))
                        } else if selector == Some(&common::symbolCall::SELECTOR[..]) {
                            Some(common::symbolCall::abi_encode_returns(&(symbol.clone(),)))
                        } else {
                            None
                        }
                    });
                    match answer {
                        Some(ret) => multicall::Call3Result {
                            success: true,
                            returnData: Bytes::from(ret),
                        },
                        None => multicall::Call3Result {
                            success: false,
                            returnData: Bytes::new(),
                        },
                    }
                })
                .collect();
            return Ok(multicall::aggregate3Call::abi_encode_returns(&(results,)));
        }

        // v0 and v1 share the selector; the stored version picks the shape.
        let id = v1::convictionDetailsCall::abi_decode(data, true)
            .map_err(|e| IndexerError::permanent(e.to_string()))?
            .tokenId;
        let details = s
            .details
            .get(&(to.to_ascii_lowercase(), id.to_string()))
            .ok_or_else(|| IndexerError::permanent("execution reverted"))?;
        let amount = U256::from(10u64);
        let price = U256::from(25u64);
        let timestamp = U256::from(1_700_000_000u64);
        Ok(match details.version {
            ProtocolVersion::V0 => v0::convictionDetailsCall::abi_encode_returns(&(
                details.name.clone(),
                amount,
                price,
                timestamp,
            )),
            ProtocolVersion::V1 => v1::convictionDetailsCall::abi_encode_returns(&(
                details.name.clone(),
                details.image.clone(),
                amount,
                price,
                timestamp,
            )),
        })
    }
}

fn parse(hex_str: &str) -> u64 {
    u64::from_str_radix(hex_str.trim_start_matches("0x"), 16).unwrap()
}

#[async_trait]
impl EvmRpcClient for MockChain {
    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn get_block(&self, number: u64) -> Result<Option<BlockSummary>, IndexerError> {
        let s = self.state.lock().unwrap();
        if number > s.head {
            return Ok(None);
        }
        Ok(Some(BlockSummary {
            number,
            hash: s.hash(number),
            parent_hash: s.hash(number.saturating_sub(1)),
            timestamp: 1_700_000_000 + number as i64 * 2,
        }))
    }

    async fn get_logs(&self, from: u64, to: u64, filter: &EventFilter) -> Result<Vec<RawLog>, IndexerError> {
        let s = self.state.lock().unwrap();
        if filter.addresses.iter().any(|a| s.rejected.contains(a)) {
            return Err(IndexerError::permanent("query rejected"));
        }
        Ok(s.logs
            .iter()
            .filter(|l| {
                let n = parse(&l.block_number);
                n >= from
                    && n <= to
                    && n <= s.head
                    && filter.matches_address(&l.address)
                    && l.topics.first().map(|t| filter.matches_topic0(t)).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn get_transaction_sender(&self, tx_hash: &str) -> Result<Option<String>, IndexerError> {
        Ok(self.state.lock().unwrap().senders.get(tx_hash).cloned())
    }

    async fn call(&self, to: &str, data: &[u8], _block: u64) -> Result<Vec<u8>, IndexerError> {
        self.answer_call(to, data)
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

/// Builder with fast polling, no confirmation lag and no retries.
pub fn builder() -> IndexerBuilder {
    IndexerBuilder::new()
        .rpc_url("http://mock")
        .database_url("memory")
        .confirmation_depth(0)
        .batch_size(25)
        .poll_interval_ms(10)
        .retry(RetryConfig {
            max_retries: 0,
            ..Default::default()
        })
}

pub struct Running {
    pub handle: SupervisorHandle,
    task: JoinHandle<Result<(), IndexerError>>,
}

impl Running {
    pub async fn stop(self) {
        self.handle.shutdown();
        self.task.await.unwrap().unwrap();
    }
}

pub fn start(builder: IndexerBuilder, chain: Arc<MockChain>, store: Arc<dyn Store>) -> Running {
    let (supervisor, handle) = builder.build(chain, store).unwrap();
    Running {
        handle,
        task: tokio::spawn(supervisor.run()),
    }
}

/// Wait until every address has a checkpoint through `block`.
pub async fn wait_synced(queries: &dyn TokenQueries, addresses: &[u8], block: u64) {
    let wanted: Vec<String> = addresses.iter().map(|a| hex_addr(*a)).collect();
    for _ in 0..500 {
        let checkpoints = queries.checkpoints().await.unwrap();
        let done = wanted.iter().all(|w| {
            checkpoints
                .iter()
                .any(|cp| &cp.address == w && cp.block_number >= block && cp.log_index.is_none())
        });
        if done {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "not synced to {block}: {:?}",
        queries.checkpoints().await.unwrap()
    );
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

/// v1 launch: discovery at 100, a token transfer at 102, collectible 7 minted
/// to Alice at 105 and moved to Bob at 110.
pub fn launch_v1(chain: &MockChain) {
    chain.emit(
        FACTORY_V1,
        100,
        1,
        3,
        &v1::NewToken {
            token: addr(TOKEN),
            conviction: addr(CONVICTION),
            name: "Higher".into(),
            symbol: "HGR".into(),
            tokenType: 2,
        },
    );
    chain.set_sender(1, CREATOR);
    chain.emit(
        TOKEN,
        102,
        2,
        0,
        &common::Transfer {
            from: Address::ZERO,
            to: addr(ALICE),
            value: U256::from(1_000u64),
        },
    );
    chain.emit(
        CONVICTION,
        105,
        3,
        1,
        &common::collectible::Transfer {
            from: Address::ZERO,
            to: addr(ALICE),
            tokenId: U256::from(7u64),
        },
    );
    chain.emit(
        CONVICTION,
        110,
        4,
        0,
        &common::collectible::Transfer {
            from: addr(ALICE),
            to: addr(BOB),
            tokenId: U256::from(7u64),
        },
    );
    chain.set_details(CONVICTION, ProtocolVersion::V1, 7, "higher every day", "ipfs://seven");
}

pub fn graduation(chain: &MockChain, block: u64, tx_n: u64) {
    chain.emit(
        TOKEN,
        block,
        tx_n,
        0,
        &common::HigherrrrrrMarketGraduated {
            tokenAddress: addr(TOKEN),
            poolAddress: addr(POOL),
            totalEthLiquidity: U256::from(5u64),
            totalTokenLiquidity: U256::from(1_000_000u64),
            lpPositionId: U256::from(42u64),
            marketType: 1,
        },
    );
}
