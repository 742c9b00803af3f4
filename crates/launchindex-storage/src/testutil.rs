//! Fixtures shared by the backend tests.

use async_trait::async_trait;

use launchindex_core::checkpoint::Checkpoint;
use launchindex_core::entity::{ConvictionMetadata, ConvictionNft, Token, TokenConvictionMapping, TokenTransfer};
use launchindex_core::error::IndexerError;
use launchindex_core::mutation::{CommitBatch, Mutation};
use launchindex_core::reconcile::{reconcile_transfer, CollectibleTransfer, MetadataSource};
use launchindex_core::registry::Subscription;
use launchindex_core::store::{Store, TokenQueries};
use launchindex_core::types::{ContractKind, EventPosition, MarketType, ProtocolVersion, TokenType, ZERO_ADDRESS};

pub const FACTORY: &str = "0x00000000000000000000000000000000000000f0";
pub const TOKEN_A: &str = "0x00000000000000000000000000000000000000a1";
pub const TOKEN_B: &str = "0x00000000000000000000000000000000000000a2";
pub const CONVICTION_A: &str = "0x00000000000000000000000000000000000000c1";
pub const CONVICTION_B: &str = "0x00000000000000000000000000000000000000c2";
pub const POOL: &str = "0x00000000000000000000000000000000000000b1";
pub const ALICE: &str = "0x00000000000000000000000000000000000000e1";
pub const BOB: &str = "0x00000000000000000000000000000000000000e2";
pub const CAROL: &str = "0x00000000000000000000000000000000000000e3";

pub fn token(address: &str, block: u64) -> Token {
    Token {
        address: address.into(),
        name: Some("Higher".into()),
        symbol: Some("HGR".into()),
        protocol_version: ProtocolVersion::V0,
        token_type: TokenType::TextEvolution,
        market_type: MarketType::BondingCurve,
        pool_address: None,
        conviction_address: CONVICTION_A.into(),
        creator_address: ALICE.into(),
        creation_tx_hash: format!("0x{block:064x}"),
        creation_block_number: block,
        creation_block_timestamp: 1_700_000_000 + block as i64,
    }
}

pub fn transfer(token: &str, tx_hash: &str, log_id: &str, timestamp: i64) -> TokenTransfer {
    TokenTransfer {
        token_address: token.into(),
        from: ALICE.into(),
        to: BOB.into(),
        amount: "1000000000000000000".into(),
        tx_hash: tx_hash.into(),
        block_number: 20,
        block_timestamp: timestamp,
        log_id: log_id.into(),
    }
}

pub fn mapping(token: &str, conviction: &str) -> TokenConvictionMapping {
    TokenConvictionMapping {
        token_address: token.into(),
        conviction_address: conviction.into(),
    }
}

pub fn nft(id: &str, owner: &str, position: EventPosition) -> ConvictionNft {
    ConvictionNft {
        address: CONVICTION_A.into(),
        id: id.into(),
        minter: Some(owner.into()),
        owner: owner.into(),
        token_address: TOKEN_A.into(),
        metadata: Some(metadata()),
        owner_position: position,
    }
}

pub fn metadata() -> ConvictionMetadata {
    ConvictionMetadata {
        name: "higher".into(),
        amount: "500".into(),
        price: "12".into(),
        timestamp: "1700000000".into(),
        image_uri: None,
    }
}

pub fn checkpoint(address: &str, block: u64) -> Checkpoint {
    Checkpoint::through_block(address, block, format!("0x{block:064x}"))
}

pub fn subscription(address: &str, start_block: u64) -> Subscription {
    Subscription::new(address, ProtocolVersion::V0, ContractKind::Token, start_block)
}

// ─── Event replay ───────────────────────────────────────────────────────────

/// Metadata that does not depend on the block it is read at.
pub struct FixedMetadata;

#[async_trait]
impl MetadataSource for FixedMetadata {
    async fn conviction_metadata(
        &self,
        _address: &str,
        _id: &str,
        _block: u64,
    ) -> Result<ConvictionMetadata, IndexerError> {
        Ok(metadata())
    }
}

/// A decoded event of TOKEN_A or its collectible contract CONVICTION_A.
#[derive(Debug, Clone)]
pub enum Step {
    TokenTransfer(TokenTransfer),
    Graduate { pool: String, block: u64 },
    Collectible(CollectibleTransfer),
}

impl Step {
    fn block(&self) -> u64 {
        match self {
            Step::TokenTransfer(t) => t.block_number,
            Step::Graduate { block, .. } => *block,
            Step::Collectible(t) => t.position.block_number,
        }
    }

    fn contract(&self) -> &str {
        match self {
            Step::Collectible(_) => CONVICTION_A,
            _ => TOKEN_A,
        }
    }
}

fn token_transfer(log_id: u32, block: u64) -> Step {
    Step::TokenTransfer(TokenTransfer {
        token_address: TOKEN_A.into(),
        from: ALICE.into(),
        to: BOB.into(),
        amount: format!("{}", 1_000 + block),
        tx_hash: format!("0x{block:064x}"),
        block_number: block,
        block_timestamp: 1_700_000_000 + block as i64,
        log_id: log_id.to_string(),
    })
}

fn collectible(id: &str, from: &str, to: &str, block: u64) -> Step {
    Step::Collectible(CollectibleTransfer {
        address: CONVICTION_A.into(),
        id: id.into(),
        from: from.into(),
        to: to.into(),
        position: EventPosition::new(block, 0),
    })
}

/// Token and collectible history in (block, log index) order: two token
/// transfers around a graduation, collectible 1 minted to Alice and passed
/// on twice, collectible 2 minted and never moved.
pub fn history() -> Vec<Step> {
    vec![
        token_transfer(0, 15),
        collectible("1", ZERO_ADDRESS, ALICE, 20),
        collectible("2", ZERO_ADDRESS, CAROL, 25),
        collectible("1", ALICE, BOB, 30),
        Step::Graduate {
            pool: POOL.into(),
            block: 35,
        },
        token_transfer(1, 38),
        collectible("1", BOB, CAROL, 40),
    ]
}

/// Token row and mapping as the factory would have written them.
pub async fn seed<S: Store>(store: &S) {
    store
        .apply(CommitBatch::new(
            vec![
                Mutation::InsertToken(token(TOKEN_A, 10)),
                Mutation::InsertConvictionMapping(mapping(TOKEN_A, CONVICTION_A)),
            ],
            checkpoint(FACTORY, 10),
        ))
        .await
        .unwrap();
}

/// Apply each step the way a pipeline does, including the fallback retry.
pub async fn replay<S: Store>(store: &S, steps: &[Step]) {
    for step in steps {
        let mutations = |force: bool| async move {
            match step {
                Step::TokenTransfer(t) => Ok(vec![Mutation::InsertTransfer(t.clone())]),
                Step::Graduate { pool, .. } => Ok(vec![Mutation::Graduate {
                    token: TOKEN_A.into(),
                    pool: pool.clone(),
                }]),
                Step::Collectible(t) => reconcile_transfer(t, store, &FixedMetadata, force).await,
            }
        };
        let cp = checkpoint(step.contract(), step.block());
        let first = mutations(false).await.unwrap();
        match store.apply(CommitBatch::new(first, cp.clone())).await {
            Ok(_) => {}
            Err(IndexerError::StaleRead { .. }) => {
                let retry = mutations(true).await.unwrap();
                store.apply(CommitBatch::new(retry, cp)).await.unwrap();
            }
            Err(e) => panic!("apply failed: {e}"),
        }
    }
}

/// Everything the queries expose about TOKEN_A.
#[derive(Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub token: Option<Token>,
    pub transfers: Vec<TokenTransfer>,
    pub convictions: Vec<ConvictionNft>,
}

pub async fn snapshot<Q: TokenQueries>(store: &Q) -> Snapshot {
    Snapshot {
        token: store.token(TOKEN_A).await.unwrap(),
        transfers: store.transfers_by_token(TOKEN_A, 100).await.unwrap(),
        convictions: store.convictions_by_token(TOKEN_A).await.unwrap(),
    }
}

/// Compare an out-of-order-then-in-order run against a strictly in-order
/// one. Everything must match except `minter` of collectible 1, whose mint
/// arrived after its transfers and therefore stays unknown.
pub fn assert_converged(in_order: &Snapshot, shuffled: &Snapshot) {
    assert_eq!(in_order.token, shuffled.token);
    assert_eq!(in_order.transfers, shuffled.transfers);
    assert_eq!(in_order.convictions.len(), shuffled.convictions.len());
    for (expected, got) in in_order.convictions.iter().zip(&shuffled.convictions) {
        assert_eq!(
            ConvictionNft {
                minter: None,
                ..expected.clone()
            },
            ConvictionNft {
                minter: None,
                ..got.clone()
            }
        );
    }

    let minters = |s: &Snapshot| {
        s.convictions
            .iter()
            .map(|n| (n.id.clone(), n.minter.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(
        minters(in_order),
        vec![("1".to_string(), Some(ALICE.to_string())), ("2".to_string(), Some(CAROL.to_string()))]
    );
    assert_eq!(
        minters(shuffled),
        vec![("1".to_string(), None), ("2".to_string(), Some(CAROL.to_string()))]
    );
}
