pub mod bridge;
pub mod frame;
pub mod methods;

pub use bridge::{BridgeConfig, ConnectionState, RpcBridge, RpcConnection};
pub use methods::WorkerApi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CipherdeskError, TransportError};

/// Result of one worker call: the worker's own success flag plus payload.
///
/// `success = false` is a logical failure reported by the worker; channel
/// failures never produce a reply and surface as `TransportError` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    pub success: bool,
    pub payload: Vec<Value>,
}

impl RpcReply {
    pub fn ok(payload: Vec<Value>) -> Self {
        Self {
            success: true,
            payload,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: vec![Value::String(message.into())],
        }
    }

    /// First payload element as text, if it is a string.
    pub fn message(&self) -> Option<&str> {
        self.payload.first().and_then(Value::as_str)
    }

    /// Turn a `success = false` reply into `LogicalFailure`.
    pub fn into_result(self, method: &str) -> Result<Self, CipherdeskError> {
        if self.success {
            return Ok(self);
        }
        let message = match self.message() {
            Some(message) => message.to_owned(),
            None => format!("worker reported an unspecified {} failure", method),
        };
        Err(CipherdeskError::LogicalFailure { message })
    }
}

/// Issues named calls to the worker.
#[async_trait]
pub trait RpcInvoker: Send + Sync {
    /// Call `method` and wait for its correlated reply.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<RpcReply, TransportError>;

    /// Send a message that expects no reply.
    async fn notify(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError>;
}
