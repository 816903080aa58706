use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use super::{RpcInvoker, RpcReply};
use crate::error::TransportError;

pub const GET_DATASET_TITLE: &str = "get_dataset_title";
pub const ENCRYPT: &str = "encrypt";
pub const DECRYPT: &str = "decrypt";
pub const SET_INPUT_PATH: &str = "set_input_path";

/// Typed view of the worker's method surface.
#[derive(Clone)]
pub struct WorkerApi {
    invoker: Arc<dyn RpcInvoker>,
}

impl WorkerApi {
    pub fn new(invoker: Arc<dyn RpcInvoker>) -> Self {
        Self { invoker }
    }

    /// Title of a dataset, or `None` if the worker failed or had none.
    pub async fn get_dataset_title(
        &self,
        dataset_id: &str,
    ) -> Result<Option<String>, TransportError> {
        let reply = self
            .invoker
            .invoke(GET_DATASET_TITLE, vec![json!(dataset_id)])
            .await?;
        if !reply.success {
            tracing::debug!(dataset_id, "worker could not resolve dataset title");
            return Ok(None);
        }
        Ok(reply.message().map(str::to_owned))
    }

    /// On success the reply message is the produced artifact path.
    pub async fn encrypt(&self, input: &Path, output: &Path) -> Result<RpcReply, TransportError> {
        self.invoker
            .invoke(ENCRYPT, vec![path_arg(input), path_arg(output)])
            .await
    }

    pub async fn decrypt(
        &self,
        input: &Path,
        output: &Path,
        url: &str,
    ) -> Result<RpcReply, TransportError> {
        self.invoker
            .invoke(DECRYPT, vec![path_arg(input), path_arg(output), json!(url)])
            .await
    }

    /// Tell single-path tools which path the user picked. No reply expected.
    pub async fn set_input_path(&self, path: &Path) -> Result<(), TransportError> {
        self.invoker.notify(SET_INPUT_PATH, vec![path_arg(path)]).await
    }
}

fn path_arg(path: &Path) -> Value {
    Value::String(path.display().to_string())
}
