//! JSON-RPC 2.0 client for the wallet node

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("RPC HTTP status {0}")]
    HttpStatus(u16),

    #[error("{message}")]
    Rpc { code: i64, message: String },

    #[error("RPC response to '{0}' has no result")]
    MissingResult(String),

    #[error("RPC response parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The four wallet calls the wallet monitor chains together
#[async_trait]
pub trait WalletRpc: Send + Sync {
    async fn block_count(&self) -> Result<u64, RpcError>;

    async fn accounts_count(&self) -> Result<u64, RpcError>;

    async fn balance(&self) -> Result<f64, RpcError>;

    /// The most recent block, `None` if the node returned no block
    async fn latest_block(&self) -> Result<Option<Value>, RpcError>;
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    message: String,
}

/// HTTP JSON-RPC client bound to one wallet endpoint
pub struct WalletClient {
    client: reqwest::Client,
    url: String,
    b58_pubkey: Option<String>,
    next_id: AtomicU64,
}

impl WalletClient {
    pub fn new(url: String, b58_pubkey: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            b58_pubkey: b58_pubkey.filter(|key| !key.is_empty()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Parameters scoping a query to the configured public key, if any
    fn key_params(&self) -> Option<Value> {
        self.b58_pubkey
            .as_ref()
            .map(|key| json!({ "b58_pubkey": key }))
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        });
        if let Some(params) = params {
            body["params"] = params;
        }

        trace!("calling {method} on {}", self.url);

        let response = self.client.post(&self.url).json(&body).send().await?;

        let status = response.status();
        // RPC errors may come with a non-200 status, the envelope wins when present
        let envelope: Result<RpcEnvelope, _> = response.json().await;

        match envelope {
            Ok(RpcEnvelope {
                error: Some(error), ..
            }) => Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            }),
            Ok(_) if !status.is_success() => Err(RpcError::HttpStatus(status.as_u16())),
            Ok(RpcEnvelope {
                result: Some(result),
                ..
            }) => Ok(serde_json::from_value(result)?),
            Ok(_) => Err(RpcError::MissingResult(method.to_string())),
            Err(_) if !status.is_success() => Err(RpcError::HttpStatus(status.as_u16())),
            Err(e) => Err(RpcError::Transport(e)),
        }
    }
}

#[async_trait]
impl WalletRpc for WalletClient {
    async fn block_count(&self) -> Result<u64, RpcError> {
        self.call("getblockcount", None).await
    }

    async fn accounts_count(&self) -> Result<u64, RpcError> {
        self.call("getwalletaccountscount", self.key_params()).await
    }

    async fn balance(&self) -> Result<f64, RpcError> {
        self.call("getwalletcoins", self.key_params()).await
    }

    async fn latest_block(&self) -> Result<Option<Value>, RpcError> {
        let blocks: Value = self.call("getblocks", Some(json!({ "last": 1 }))).await?;

        Ok(match blocks {
            Value::Array(blocks) => blocks.into_iter().next(),
            Value::Null => None,
            block => Some(block),
        })
    }
}
