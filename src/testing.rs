// src/testing.rs
//! Scripted in-process upstream for unit tests.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::models::Transfer;
use crate::rpc::{JsonRpc, Upstream};

type Handler = dyn Fn(&str, &Value) -> Result<Value> + Send + Sync;

pub struct MockRpc {
    handler: Box<Handler>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockRpc {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&str, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn upstream(self: &Arc<Self>) -> Upstream {
        Upstream::new(self.clone())
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl JsonRpc for MockRpc {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));
        (self.handler)(method, &params)
    }
}

/// `n` external transfers tagged with `prefix` so tests can tell pages apart.
pub fn transfers(prefix: &str, n: usize) -> Vec<Transfer> {
    (0..n)
        .map(|i| Transfer {
            hash: Some(format!("0x{prefix}{i:x}")),
            category: crate::models::Category::External,
            ..Default::default()
        })
        .collect()
}

pub fn transfer_page(prefix: &str, n: usize, page_key: Option<&str>) -> Value {
    json!({ "transfers": transfers(prefix, n), "pageKey": page_key })
}

pub fn nft_page(n: usize, total: u64, page_key: Option<&str>) -> Value {
    let nfts: Vec<Value> = (0..n).map(|i| json!({ "tokenId": format!("0x{i:x}") })).collect();
    json!({ "ownedNfts": nfts, "totalCount": total, "pageKey": page_key })
}
