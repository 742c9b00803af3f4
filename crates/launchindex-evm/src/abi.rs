//! Contract ABIs and decoding helpers.
//!
//! v0 and v1 share event signatures for token and collectible transfers but
//! differ in the factory `NewToken` payload and in `convictionDetails`, so each
//! version gets its own module.

use alloy_core::sol_types::SolEvent;
use alloy_primitives::{Address, B256};

use launchindex_core::error::IndexerError;
use launchindex_core::event::ChainEvent;

/// Events and calls shared by both protocol versions.
pub mod common {
    use alloy_core::sol;

    sol! {
        /// ERC-20 transfer on a token contract.
        event Transfer(address indexed from, address indexed to, uint256 value);

        /// Emitted once when a token leaves its bonding curve.
        event HigherrrrrrMarketGraduated(
            address indexed tokenAddress,
            address indexed poolAddress,
            uint256 totalEthLiquidity,
            uint256 totalTokenLiquidity,
            uint256 lpPositionId,
            uint8 marketType
        );

        function name() external view returns (string);
        function symbol() external view returns (string);
    }

    /// ERC-721 transfer on a collectible contract; same topic0 as the ERC-20
    /// event, with the id indexed.
    pub mod collectible {
        use alloy_core::sol;

        sol! {
            #[derive(Debug)]
            event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
        }
    }
}

pub mod v0 {
    use alloy_core::sol;

    sol! {
        event NewToken(address indexed token, address indexed conviction);

        function convictionDetails(uint256 tokenId)
            external
            view
            returns (string name, uint256 amount, uint256 price, uint256 timestamp);
    }
}

pub mod v1 {
    use alloy_core::sol;

    sol! {
        #[derive(Debug)]
        event NewToken(
            address indexed token,
            address indexed conviction,
            string name,
            string symbol,
            uint8 tokenType
        );

        function convictionDetails(uint256 tokenId)
            external
            view
            returns (string name, string imageURI, uint256 amount, uint256 price, uint256 timestamp);
    }
}

/// Multicall3 `aggregate3`.
pub mod multicall {
    use alloy_core::sol;

    sol! {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Call3Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calls) external payable returns (Call3Result[] returnData);
    }
}

/// `0x`-prefixed lowercase hex of an address.
pub fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// `0x`-prefixed lowercase hex of a 32-byte word.
pub fn b256_hex(word: &B256) -> String {
    format!("0x{}", hex::encode(word.as_slice()))
}

/// topic0 of `E`, as it appears in RPC responses.
pub fn topic0<E: SolEvent>() -> String {
    b256_hex(&E::SIGNATURE_HASH)
}

/// Parse a `0x` hex string into bytes.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| format!("bad hex {s:?}: {e}"))
}

/// Parse an address string.
pub fn parse_address(s: &str) -> Result<Address, String> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 20 {
        return Err(format!("address {s:?} is {} bytes", bytes.len()));
    }
    Ok(Address::from_slice(&bytes))
}

fn parse_word(s: &str) -> Result<B256, String> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 32 {
        return Err(format!("topic {s:?} is {} bytes", bytes.len()));
    }
    Ok(B256::from_slice(&bytes))
}

/// Decode `event` as `E`, mapping any failure to [`IndexerError::Decode`].
pub fn decode_event<E: SolEvent>(event: &ChainEvent) -> Result<E, IndexerError> {
    let fail = |reason: String| IndexerError::Decode {
        tx_hash: event.tx.hash.clone(),
        log_index: event.log_index(),
        reason: format!("{}: {reason}", E::SIGNATURE),
    };
    let topics = event
        .topics
        .iter()
        .map(|t| parse_word(t))
        .collect::<Result<Vec<_>, _>>()
        .map_err(fail)?;
    let data = decode_hex(&event.data).map_err(fail)?;
    E::decode_raw_log(topics, &data, true).map_err(|e| fail(e.to_string()))
}
