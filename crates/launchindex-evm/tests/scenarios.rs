//! End-to-end ingestion against a scripted chain, on both store backends.

mod common;

use std::sync::Arc;

use alloy_primitives::{Address, U256};

use launchindex_core::indexer::IndexerState;
use launchindex_core::store::{Store, TokenQueries};
use launchindex_core::types::{ContractKind, MarketType, ProtocolVersion, TokenType};
use launchindex_evm::abi::{common as abi, v0};
use launchindex_storage::{InMemoryStore, SqliteStore};

use common::*;

// ─── Discovery ────────────────────────────────────────────────────────────────

async fn v1_discovery<S: Store + TokenQueries + 'static>(store: Arc<S>) {
    let chain = MockChain::new(120);
    launch_v1(&chain);

    let running = start(
        builder().factory(ProtocolVersion::V1, hex_addr(FACTORY_V1), 90),
        chain,
        store.clone(),
    );
    wait_synced(&*store, &[FACTORY_V1, TOKEN, CONVICTION], 120).await;

    let token = store.token(&hex_addr(TOKEN)).await.unwrap().unwrap();
    assert_eq!(token.conviction_address, hex_addr(CONVICTION));
    assert_eq!(token.name.as_deref(), Some("Higher"));
    assert_eq!(token.symbol.as_deref(), Some("HGR"));
    assert_eq!(token.token_type, TokenType::ImageEvolution);
    assert_eq!(token.market_type, MarketType::BondingCurve);
    assert_eq!(token.creator_address, hex_addr(CREATOR));
    assert_eq!(token.creation_tx_hash, tx(1));
    assert_eq!(token.creation_block_number, 100);
    assert_eq!(token.creation_block_timestamp, 1_700_000_200);

    let mapping = store.conviction_mapping(&hex_addr(CONVICTION)).await.unwrap().unwrap();
    assert_eq!(mapping.token_address, hex_addr(TOKEN));

    let subs = store.subscriptions().await.unwrap();
    let children: Vec<_> = subs.iter().filter(|s| s.kind != ContractKind::Factory).collect();
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|s| s.start_block == 100 && s.version == ProtocolVersion::V1));

    let transfers = store.transfers_by_token(&hex_addr(TOKEN), 10).await.unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].amount, "1000");
    assert_eq!(transfers[0].to, hex_addr(ALICE));
    assert_eq!(transfers[0].log_id, "0");
    assert_eq!(transfers[0].block_timestamp, 1_700_000_204);

    let status = running.handle.status().await.unwrap();
    assert_eq!(status.len(), 3);
    assert!(status.iter().all(|s| s.state == IndexerState::Live));

    running.stop().await;
}

#[tokio::test]
async fn v1_discovery_in_memory() {
    v1_discovery(Arc::new(InMemoryStore::new())).await;
}

#[tokio::test]
async fn v1_discovery_sqlite() {
    v1_discovery(Arc::new(SqliteStore::in_memory().await.unwrap())).await;
}

#[tokio::test]
async fn v0_discovery_reads_name_and_symbol() {
    let chain = MockChain::new(60);
    chain.emit(
        FACTORY_V0,
        50,
        1,
        0,
        &v0::NewToken {
            token: addr(TOKEN),
            conviction: addr(CONVICTION),
        },
    );
    chain.set_sender(1, CREATOR);
    chain.set_identity(TOKEN, "Higher", "HGR");
    // A second token whose name() and symbol() revert.
    chain.emit(
        FACTORY_V0,
        55,
        2,
        0,
        &v0::NewToken {
            token: addr(0xab),
            conviction: addr(0xbc),
        },
    );
    chain.set_sender(2, CREATOR);

    let store = Arc::new(InMemoryStore::new());
    let running = start(
        builder().factory(ProtocolVersion::V0, hex_addr(FACTORY_V0), 10),
        chain,
        store.clone(),
    );
    wait_synced(&*store, &[FACTORY_V0, TOKEN, CONVICTION, 0xab, 0xbc], 60).await;

    let token = store.token(&hex_addr(TOKEN)).await.unwrap().unwrap();
    assert_eq!(token.name.as_deref(), Some("Higher"));
    assert_eq!(token.symbol.as_deref(), Some("HGR"));
    assert_eq!(token.token_type, TokenType::TextEvolution);
    assert_eq!(token.protocol_version, ProtocolVersion::V0);

    let nameless = store.token(&hex_addr(0xab)).await.unwrap().unwrap();
    assert_eq!(nameless.name, None);
    assert_eq!(nameless.symbol, None);

    let latest = store.latest_tokens(10).await.unwrap();
    assert_eq!(latest[0].address, hex_addr(0xab));

    running.stop().await;
}

// ─── Collectibles ─────────────────────────────────────────────────────────────

async fn mint_then_transfer<S: Store + TokenQueries + 'static>(store: Arc<S>) {
    let chain = MockChain::new(120);
    launch_v1(&chain);

    let running = start(
        builder().factory(ProtocolVersion::V1, hex_addr(FACTORY_V1), 90),
        chain,
        store.clone(),
    );
    wait_synced(&*store, &[FACTORY_V1, TOKEN, CONVICTION], 120).await;

    let nft = store.conviction(&hex_addr(CONVICTION), "7").await.unwrap().unwrap();
    assert_eq!(nft.minter.as_deref(), Some(hex_addr(ALICE).as_str()));
    assert_eq!(nft.owner, hex_addr(BOB));
    assert_eq!(nft.token_address, hex_addr(TOKEN));
    let meta = nft.metadata.unwrap();
    assert_eq!(meta.name, "higher every day");
    assert_eq!(meta.image_uri.as_deref(), Some("ipfs://seven"));
    assert_eq!(meta.price, "25");
    assert_eq!(running.handle.stats().forward_references, 0);

    let owned = store.convictions_by_owner(&hex_addr(BOB)).await.unwrap();
    assert_eq!(owned.len(), 1);
    assert!(store.convictions_by_owner(&hex_addr(ALICE)).await.unwrap().is_empty());

    running.stop().await;
}

#[tokio::test]
async fn mint_then_transfer_in_memory() {
    mint_then_transfer(Arc::new(InMemoryStore::new())).await;
}

#[tokio::test]
async fn mint_then_transfer_sqlite() {
    mint_then_transfer(Arc::new(SqliteStore::in_memory().await.unwrap())).await;
}

async fn unseen_mint<S: Store + TokenQueries + 'static>(store: Arc<S>) {
    let chain = MockChain::new(120);
    launch_v1(&chain);

    // Children start at 108, after the mint at 105.
    let running = start(
        builder()
            .factory(ProtocolVersion::V1, hex_addr(FACTORY_V1), 90)
            .child_start_block(ProtocolVersion::V1, 108),
        chain,
        store.clone(),
    );
    wait_synced(&*store, &[FACTORY_V1, TOKEN, CONVICTION], 120).await;

    let nft = store.conviction(&hex_addr(CONVICTION), "7").await.unwrap().unwrap();
    assert_eq!(nft.minter, None);
    assert_eq!(nft.owner, hex_addr(BOB));
    assert_eq!(nft.metadata.unwrap().name, "higher every day");
    assert_eq!(running.handle.stats().forward_references, 1);

    // The token transfer at 102 predates the child start too.
    assert!(store.transfers_by_token(&hex_addr(TOKEN), 10).await.unwrap().is_empty());

    running.stop().await;
}

#[tokio::test]
async fn unseen_mint_in_memory() {
    unseen_mint(Arc::new(InMemoryStore::new())).await;
}

#[tokio::test]
async fn unseen_mint_sqlite() {
    unseen_mint(Arc::new(SqliteStore::in_memory().await.unwrap())).await;
}

#[tokio::test]
async fn unknown_collectible_is_skipped() {
    let chain = MockChain::new(30);
    let store = Arc::new(InMemoryStore::new());
    // A collectible subscription with no mapping behind it.
    store
        .ensure_subscription(&launchindex_core::registry::Subscription::new(
            hex_addr(CONVICTION),
            ProtocolVersion::V1,
            ContractKind::Conviction,
            10,
        ))
        .await
        .unwrap();
    chain.emit(
        CONVICTION,
        20,
        9,
        0,
        &abi::collectible::Transfer {
            from: Address::ZERO,
            to: addr(ALICE),
            tokenId: U256::from(1u64),
        },
    );
    chain.set_details(CONVICTION, ProtocolVersion::V1, 1, "orphan", "");

    let running = start(
        builder().factory(ProtocolVersion::V1, hex_addr(FACTORY_V1), 5),
        chain,
        store.clone(),
    );
    wait_synced(&*store, &[FACTORY_V1, CONVICTION], 30).await;

    assert!(store.conviction(&hex_addr(CONVICTION), "1").await.unwrap().is_none());
    assert!(store.dead_letters(10).await.unwrap().is_empty());

    running.stop().await;
}

// ─── Graduation ───────────────────────────────────────────────────────────────

async fn graduation_is_applied_once<S: Store + TokenQueries + 'static>(store: Arc<S>) {
    let chain = MockChain::new(210);
    launch_v1(&chain);
    graduation(&chain, 200, 20);
    // A second graduation naming another pool must not move the token.
    chain.emit(
        TOKEN,
        205,
        21,
        0,
        &abi::HigherrrrrrMarketGraduated {
            tokenAddress: addr(TOKEN),
            poolAddress: addr(0xd2),
            totalEthLiquidity: U256::ZERO,
            totalTokenLiquidity: U256::ZERO,
            lpPositionId: U256::ZERO,
            marketType: 1,
        },
    );

    let running = start(
        builder().factory(ProtocolVersion::V1, hex_addr(FACTORY_V1), 90),
        chain,
        store.clone(),
    );
    wait_synced(&*store, &[FACTORY_V1, TOKEN, CONVICTION], 210).await;

    let token = store.token(&hex_addr(TOKEN)).await.unwrap().unwrap();
    assert_eq!(token.market_type, MarketType::UniswapPool);
    assert_eq!(token.pool_address, Some(hex_addr(POOL)));

    running.stop().await;
}

#[tokio::test]
async fn graduation_in_memory() {
    graduation_is_applied_once(Arc::new(InMemoryStore::new())).await;
}

#[tokio::test]
async fn graduation_sqlite() {
    graduation_is_applied_once(Arc::new(SqliteStore::in_memory().await.unwrap())).await;
}

#[tokio::test]
async fn top_tokens_rank_by_recent_transfers() {
    let chain = MockChain::new(120);
    launch_v1(&chain);
    for i in 0..3u64 {
        chain.emit(
            TOKEN,
            111 + i,
            30 + i,
            0,
            &abi::Transfer {
                from: addr(ALICE),
                to: addr(BOB),
                value: U256::from(1u64),
            },
        );
    }

    let store = Arc::new(InMemoryStore::new());
    let running = start(
        builder().factory(ProtocolVersion::V1, hex_addr(FACTORY_V1), 90),
        chain,
        store.clone(),
    );
    wait_synced(&*store, &[FACTORY_V1, TOKEN, CONVICTION], 120).await;

    let top = store.top_tokens_by_transfers(0, 10).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].token.address, hex_addr(TOKEN));
    assert_eq!(top[0].transfer_count, 4);

    // Only the transfers at or after block 112 fall in this window.
    let top = store.top_tokens_by_transfers(1_700_000_224, 10).await.unwrap();
    assert_eq!(top[0].transfer_count, 2);

    running.stop().await;
}
