//! Decoding of EVM JSON-RPC payloads into chain types.

use alloy_primitives::U256;
use serde_json::Value;

use chainqueue_core::error::IngestError;
use chainqueue_core::types::{ChainBlock, ChainTransaction, NewHead};

/// Parse a hex quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, IngestError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|e| IngestError::Decode(format!("{s}: {e}")))
}

/// Parse a hex quantity (with or without `0x`) to U256.
pub fn parse_hex_u256(s: &str) -> Result<U256, IngestError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|e| IngestError::Decode(format!("{s}: {e}")))
}

fn field<'a>(v: &'a Value, name: &str) -> Result<&'a str, IngestError> {
    v[name]
        .as_str()
        .ok_or_else(|| IngestError::Decode(format!("missing field '{name}'")))
}

fn optional_field(v: &Value, name: &str) -> Option<String> {
    v[name].as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

/// Convert an `eth_getBlockByNumber` result to a [`ChainBlock`].
///
/// Accepts both hash-only and full-object transaction lists.
pub fn block_from_json(v: &Value) -> Result<ChainBlock, IngestError> {
    let transactions = v["transactions"]
        .as_array()
        .map(|txs| {
            txs.iter()
                .filter_map(|tx| tx.as_str().or_else(|| tx["hash"].as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(ChainBlock {
        number: parse_hex_u64(field(v, "number")?)?,
        hash: field(v, "hash")?.to_string(),
        author: optional_field(v, "author"),
        miner: optional_field(v, "miner"),
        gas_used: parse_hex_u64(field(v, "gasUsed")?)?,
        size: v["size"].as_str().map(parse_hex_u64).transpose()?.unwrap_or(0),
        timestamp: parse_hex_u64(field(v, "timestamp")?)? as i64,
        transactions,
    })
}

/// Convert an `eth_getTransactionByHash` result to a [`ChainTransaction`].
pub fn transaction_from_json(v: &Value) -> Result<ChainTransaction, IngestError> {
    Ok(ChainTransaction {
        hash: field(v, "hash")?.to_string(),
        from: field(v, "from")?.to_string(),
        to: optional_field(v, "to"),
        value: parse_hex_u256(field(v, "value")?)?,
        gas: parse_hex_u64(field(v, "gas")?)?,
        gas_price: v["gasPrice"]
            .as_str()
            .map(parse_hex_u256)
            .transpose()?
            .unwrap_or(U256::ZERO),
        input: v["input"].as_str().unwrap_or("0x").to_string(),
        nonce: parse_hex_u64(field(v, "nonce")?)?,
        block_number: v["blockNumber"].as_str().map(parse_hex_u64).transpose()?,
    })
}

/// Extract the height from a `newHeads` notification payload.
pub fn new_head_from_json(v: &Value) -> Result<NewHead, IngestError> {
    Ok(NewHead {
        height: parse_hex_u64(field(v, "number")?)?,
    })
}
