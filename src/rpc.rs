// src/rpc.rs
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, WalletError};
use crate::models::{Category, NftPage, TokenBalances, TransferPage};
use crate::parser;

/// Page size requested from `alchemy_getAssetTransfers` (provider maximum).
pub const TRANSFER_PAGE_SIZE: u64 = 1000;

/// Transport for provider calls: one JSON-RPC request, one parsed `result`.
///
/// No retries happen at this layer.
#[async_trait]
pub trait JsonRpc: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// JSON-RPC over HTTP to an Alchemy-compatible endpoint.
pub struct AlchemyRpc {
    client: Client,
    url: String,
}

impl AlchemyRpc {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl JsonRpc for AlchemyRpc {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!(method, "sending upstream request");

        let resp = self.client.post(&self.url).json(&payload).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(WalletError::Upstream(format!("HTTP {status}: {text}")));
        }

        let parsed: RpcResponse = serde_json::from_str(&text)
            .map_err(|e| WalletError::Upstream(format!("unparseable response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(WalletError::Upstream(err.to_string()));
        }

        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

/// Parameters of one `alchemy_getAssetTransfers` call.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetTransferRequest {
    pub from_block: String,
    pub from_address: Option<Address>,
    pub to_address: Option<Address>,
    pub categories: Vec<Category>,
    pub page_key: Option<String>,
    pub max_count: u64,
}

impl AssetTransferRequest {
    fn to_params(&self) -> Value {
        let categories: Vec<&str> = self.categories.iter().map(Category::as_str).collect();
        let mut params = json!({
            "fromBlock": self.from_block,
            "toBlock": "latest",
            "category": categories,
            "withMetadata": true,
            "maxCount": format!("0x{:x}", self.max_count),
        });
        if let Some(addr) = self.from_address {
            params["fromAddress"] = json!(addr.to_checksum(None));
        }
        if let Some(addr) = self.to_address {
            params["toAddress"] = json!(addr.to_checksum(None));
        }
        if let Some(key) = &self.page_key {
            params["pageKey"] = json!(key);
        }
        json!([params])
    }
}

fn decode<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| WalletError::Upstream(format!("unexpected {method} payload: {e}")))
}

fn as_hex_str<'a>(method: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| WalletError::Upstream(format!("unexpected {method} payload: {value}")))
}

/// Typed access to the blockchain data provider.
///
/// Cheap to clone; every clone shares the same transport.
#[derive(Clone)]
pub struct Upstream {
    rpc: Arc<dyn JsonRpc>,
}

impl Upstream {
    pub fn new(rpc: Arc<dyn JsonRpc>) -> Self {
        Self { rpc }
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.rpc.request(method, params).await
    }

    pub async fn get_asset_transfers(&self, req: &AssetTransferRequest) -> Result<TransferPage> {
        let method = "alchemy_getAssetTransfers";
        let mut page: TransferPage = decode(method, self.request(method, req.to_params()).await?)?;
        page.page_key = page.page_key.filter(|k| !k.is_empty());
        Ok(page)
    }

    pub async fn get_token_balances(&self, address: Address) -> Result<TokenBalances> {
        let method = "alchemy_getTokenBalances";
        let checksummed = address.to_checksum(None);
        let result = self.request(method, json!([checksummed, "erc20"])).await?;
        let mut balances: TokenBalances = decode(
            method,
            json!({
                "address": checksummed,
                "tokenBalances": result.get("tokenBalances").cloned().unwrap_or(json!([])),
            }),
        )?;
        balances.address = checksummed;
        Ok(balances)
    }

    pub async fn get_nfts(
        &self,
        owner: Address,
        page_size: u32,
        page_key: Option<&str>,
    ) -> Result<NftPage> {
        let method = "alchemy_getNFTs";
        let mut params = json!({
            "owner": owner.to_checksum(None),
            "pageSize": page_size,
        });
        if let Some(key) = page_key {
            params["pageKey"] = json!(key);
        }
        let mut page: NftPage = decode(method, self.request(method, json!([params])).await?)?;
        page.page_key = page.page_key.filter(|k| !k.is_empty());
        Ok(page)
    }

    pub async fn get_balance(&self, address: Address) -> Result<U256> {
        let method = "eth_getBalance";
        let result = self
            .request(method, json!([address.to_checksum(None), "latest"]))
            .await?;
        parser::hex_to_u256(as_hex_str(method, &result)?)
    }

    pub async fn get_transaction_count(&self, address: Address) -> Result<u64> {
        let method = "eth_getTransactionCount";
        let result = self
            .request(method, json!([address.to_checksum(None), "latest"]))
            .await?;
        parser::hex_to_u64(as_hex_str(method, &result)?)
    }

    pub async fn eth_call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>> {
        let method = "eth_call";
        let call = json!({
            "to": to.to_checksum(None),
            "data": format!("0x{}", hex::encode(data)),
        });
        let result = self.request(method, json!([call, "latest"])).await?;
        parser::hex_to_bytes(as_hex_str(method, &result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rpc_for(server: &MockServer) -> AlchemyRpc {
        AlchemyRpc::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn returns_result_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_getTransactionCount" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": "0x2a" })),
            )
            .mount(&server)
            .await;

        let upstream = Upstream::new(Arc::new(rpc_for(&server)));
        let count = upstream.get_transaction_count(Address::ZERO).await.unwrap();
        assert_eq!(count, 42);
    }

    #[tokio::test]
    async fn in_band_error_carries_provider_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32602, "message": "invalid fromBlock" }
            })))
            .mount(&server)
            .await;

        let err = rpc_for(&server)
            .request("alchemy_getAssetTransfers", json!([]))
            .await
            .unwrap_err();
        match err {
            WalletError::Upstream(msg) => assert!(msg.contains("invalid fromBlock"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_success_status_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = rpc_for(&server).request("eth_chainId", json!([])).await.unwrap_err();
        match err {
            WalletError::Upstream(msg) => {
                assert!(msg.contains("429"), "{msg}");
                assert!(msg.contains("rate limited"), "{msg}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn asset_transfer_params_shape() {
        let addr = Address::from([0xab; 20]);
        let req = AssetTransferRequest {
            from_block: "0x0".to_string(),
            from_address: None,
            to_address: Some(addr),
            categories: vec![Category::External, Category::Erc20],
            page_key: Some("next".to_string()),
            max_count: TRANSFER_PAGE_SIZE,
        };
        let params = req.to_params();
        let obj = &params[0];
        assert_eq!(obj["maxCount"], "0x3e8");
        assert_eq!(obj["toBlock"], "latest");
        assert_eq!(obj["category"], json!(["external", "erc20"]));
        assert_eq!(obj["toAddress"], json!(addr.to_checksum(None)));
        assert_eq!(obj["pageKey"], "next");
        assert!(obj.get("fromAddress").is_none());
    }
}
