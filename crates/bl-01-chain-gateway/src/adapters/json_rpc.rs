//! JSON-RPC chain client.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::domain::storage_node::StorageNode;
use crate::domain::transaction::{TransactionBuilder, TxnHash, TxnStatus, STORAGE_CONTRACT_ADDRESS};
use crate::error::GatewayError;
use crate::ports::{PriceFeed, StorageContractReader, TransactionGateway};

/// Error code the chain uses when a transaction is refused.
pub const RPC_REJECTED: i64 = -32001;
/// Error code for an unknown transaction hash.
pub const RPC_NOT_FOUND: i64 = -32004;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<R> {
    result: Option<R>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResult {
    hash: TxnHash,
}

/// Chain gateway speaking JSON-RPC over HTTP.
pub struct JsonRpcGateway {
    client: Client,
    endpoint: String,
    timeout_ms: u64,
    request_id: AtomicU64,
    builder: TransactionBuilder,
}

impl JsonRpcGateway {
    pub fn new(config: &GatewayConfig, builder: TransactionBuilder) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        info!("[bl-01] Chain gateway targeting {}", config.endpoint);
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            timeout_ms: config.request_timeout_ms,
            request_id: AtomicU64::new(1),
            builder,
        })
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn map_http(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout {
                ms: self.timeout_ms,
            }
        } else if e.is_decode() {
            GatewayError::InvalidResponse(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<Option<R>, GatewayError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id(),
        };

        let response: JsonRpcResponse<R> = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_http(e))?
            .json()
            .await
            .map_err(|e| self.map_http(e))?;

        match response.error {
            Some(err) if err.code == RPC_REJECTED => Err(GatewayError::Rejected(err.message)),
            Some(err) if err.code == RPC_NOT_FOUND => Err(GatewayError::NotFound(err.message)),
            Some(err) => Err(GatewayError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(response.result),
        }
    }

    async fn call_required<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, GatewayError> {
        self.call(method, params)
            .await?
            .ok_or_else(|| GatewayError::InvalidResponse(format!("{}: missing result", method)))
    }
}

#[async_trait]
impl TransactionGateway for JsonRpcGateway {
    async fn submit(
        &self,
        contract: &str,
        function: &str,
        payload: serde_json::Value,
    ) -> Result<TxnHash, GatewayError> {
        let txn = self.builder.build(contract, function, payload)?;
        debug!("[bl-01] Submitting {} txn {}", function, txn.hash);

        let result: SubmitResult = self.call_required("txn_submit", [&txn]).await?;
        if result.hash != txn.hash {
            return Err(GatewayError::InvalidResponse(format!(
                "chain acknowledged {} for txn {}",
                result.hash, txn.hash
            )));
        }
        Ok(result.hash)
    }

    async fn verify(&self, txn_hash: &str) -> Result<TxnStatus, GatewayError> {
        self.call_required("txn_status", serde_json::json!({ "hash": txn_hash }))
            .await
    }
}

#[async_trait]
impl StorageContractReader for JsonRpcGateway {
    async fn get_blobber(&self, id: &str) -> Result<Option<StorageNode>, GatewayError> {
        match self
            .call(
                "sc_getBlobber",
                serde_json::json!({ "contract": STORAGE_CONTRACT_ADDRESS, "id": id }),
            )
            .await
        {
            Err(GatewayError::NotFound(_)) => Ok(None),
            other => other,
        }
    }

    async fn list_blobbers(&self) -> Result<Vec<StorageNode>, GatewayError> {
        let blobbers: Option<Vec<StorageNode>> = self
            .call(
                "sc_listBlobbers",
                serde_json::json!({ "contract": STORAGE_CONTRACT_ADDRESS }),
            )
            .await?;
        Ok(blobbers.unwrap_or_default())
    }
}

#[async_trait]
impl PriceFeed for JsonRpcGateway {
    async fn token_price_usd(&self) -> Result<f64, GatewayError> {
        self.call_required("price_tokenUsd", [(); 0]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{NodeIdentity, Sha256Strategy, SystemTimeSource};
    use std::sync::Arc;

    #[test]
    fn test_request_shape() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: "txn_status",
            params: serde_json::json!({"hash": "ab"}),
            id: 7,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["method"], "txn_status");
        assert_eq!(json["params"]["hash"], "ab");
        assert_eq!(json["id"], 7);
    }

    #[test]
    fn test_error_response_parses() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32001,"message":"duplicate"}}"#;
        let parsed: JsonRpcResponse<TxnStatus> = serde_json::from_str(raw).unwrap();
        assert!(parsed.result.is_none());
        assert_eq!(parsed.error.unwrap().code, RPC_REJECTED);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_retryable() {
        let config = GatewayConfig {
            endpoint: "http://127.0.0.1:9/rpc".into(),
            request_timeout_ms: 500,
            connect_timeout_ms: 200,
            ..Default::default()
        };
        let builder = TransactionBuilder::new(
            NodeIdentity::from_secret([5; 32]),
            Arc::new(Sha256Strategy),
            Arc::new(SystemTimeSource),
        );
        let gateway = JsonRpcGateway::new(&config, builder).unwrap();

        let err = gateway.verify("ab").await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
