// src/ens.rs
use alloy::primitives::{address, keccak256, Address, B256};
use tracing::debug;

use crate::error::Result;
use crate::parser;
use crate::rpc::Upstream;

/// ENS registry, same address on mainnet and testnets.
pub const ENS_REGISTRY: Address = address!("00000000000C2E074eC69A0dFb2997BA6C7d2e1e");

const RESOLVER_SELECTOR: [u8; 4] = [0x01, 0x78, 0xb8, 0xbf]; // resolver(bytes32)
const ADDR_SELECTOR: [u8; 4] = [0x3b, 0x3b, 0x57, 0xde]; // addr(bytes32)
const NAME_SELECTOR: [u8; 4] = [0x69, 0x1f, 0x34, 0x31]; // name(bytes32)

/// EIP-137 namehash. Labels are lower-cased; full UTS-46 normalisation is not applied.
pub fn namehash(name: &str) -> B256 {
    let mut node = B256::ZERO;
    if name.is_empty() {
        return node;
    }
    for label in name.to_lowercase().rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(node.as_slice());
        buf[32..].copy_from_slice(label_hash.as_slice());
        node = keccak256(buf);
    }
    node
}

fn calldata(selector: [u8; 4], node: B256) -> Vec<u8> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&selector);
    data.extend_from_slice(node.as_slice());
    data
}

async fn resolver_for(upstream: &Upstream, node: B256) -> Result<Option<Address>> {
    let ret = upstream
        .eth_call(ENS_REGISTRY, &calldata(RESOLVER_SELECTOR, node))
        .await?;
    Ok(parser::word_to_address(&ret).filter(|a| *a != Address::ZERO))
}

/// Forward lookup: name → address. `Ok(None)` when the name has no record.
pub async fn resolve_name(upstream: &Upstream, name: &str) -> Result<Option<Address>> {
    let node = namehash(name);
    let Some(resolver) = resolver_for(upstream, node).await? else {
        debug!(name, "no ENS resolver set");
        return Ok(None);
    };
    let ret = upstream.eth_call(resolver, &calldata(ADDR_SELECTOR, node)).await?;
    Ok(parser::word_to_address(&ret).filter(|a| *a != Address::ZERO))
}

/// Reverse lookup: address → primary name, accepted only if it resolves back.
pub async fn lookup_address(upstream: &Upstream, address: Address) -> Result<Option<String>> {
    let reverse = format!("{}.addr.reverse", hex::encode(address.as_slice()));
    let node = namehash(&reverse);
    let Some(resolver) = resolver_for(upstream, node).await? else {
        return Ok(None);
    };
    let ret = upstream.eth_call(resolver, &calldata(NAME_SELECTOR, node)).await?;
    let Some(name) = parser::decode_abi_string(&ret).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    if resolve_name(upstream, &name).await? == Some(address) {
        Ok(Some(name))
    } else {
        debug!(%address, name = %name, "reverse record does not resolve back");
        Ok(None)
    }
}
