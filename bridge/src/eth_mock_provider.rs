// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Keyed JSON-RPC transport for tests.
//!
//! Responses are looked up by `(method, serialized params)` first, then by method
//! alone. Unlike `ethers::providers::MockProvider` the answer does not depend on
//! call order, so one response can serve any number of identical requests.

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, JsonRpcError, ProviderError, RpcError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum EthMockError {
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error("no mocked response for {0}")]
    NoResponse(String),
    #[error("{0}")]
    JsonRpc(JsonRpcError),
}

impl RpcError for EthMockError {
    fn as_error_response(&self) -> Option<&JsonRpcError> {
        match self {
            EthMockError::JsonRpc(e) => Some(e),
            _ => None,
        }
    }

    fn as_serde_error(&self) -> Option<&serde_json::Error> {
        match self {
            EthMockError::SerdeJson(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EthMockError> for ProviderError {
    fn from(e: EthMockError) -> Self {
        ProviderError::JsonRpcClientError(Box::new(e))
    }
}

#[derive(Debug, Clone)]
enum MockResponse {
    Value(Value),
    Error { code: i64, message: String },
}

#[derive(Clone, Debug, Default)]
pub struct EthMockProvider {
    responses: Arc<Mutex<HashMap<(String, String), MockResponse>>>,
    method_responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    requests: Arc<Mutex<Vec<(String, String)>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
}

impl EthMockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method` called with exactly `params`.
    pub fn add_response<P: Serialize, R: Serialize>(
        &self,
        method: &str,
        params: P,
        response: R,
    ) -> Result<(), EthMockError> {
        let params = serde_json::to_string(&params)?;
        let value = serde_json::to_value(response)?;
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_owned(), params), MockResponse::Value(value));
        Ok(())
    }

    /// Answer `method` whatever its params, unless an exact response exists.
    pub fn add_method_response<R: Serialize>(
        &self,
        method: &str,
        response: R,
    ) -> Result<(), EthMockError> {
        let value = serde_json::to_value(response)?;
        self.method_responses
            .lock()
            .unwrap()
            .insert(method.to_owned(), MockResponse::Value(value));
        Ok(())
    }

    /// Fail every call of `method` with a JSON-RPC error.
    pub fn add_method_error(&self, method: &str, code: i64, message: &str) {
        self.method_responses.lock().unwrap().insert(
            method.to_owned(),
            MockResponse::Error {
                code,
                message: message.to_owned(),
            },
        );
    }

    /// Hold every call of `method` for `delay` before answering.
    pub fn add_method_delay(&self, method: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(method.to_owned(), delay);
    }

    pub fn remove_method_response(&self, method: &str) {
        self.method_responses.lock().unwrap().remove(method);
        self.responses
            .lock()
            .unwrap()
            .retain(|(m, _), _| m != method);
    }

    /// Number of requests made for `method`.
    pub fn request_count(&self, method: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    /// Serialized params of every request made for `method`.
    pub fn request_params(&self, method: &str) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl JsonRpcClient for EthMockProvider {
    type Error = EthMockError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, EthMockError> {
        let params = serde_json::to_string(&params)?;
        self.requests
            .lock()
            .unwrap()
            .push((method.to_owned(), params.clone()));
        let delay = self.delays.lock().unwrap().get(method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let exact = self
            .responses
            .lock()
            .unwrap()
            .get(&(method.to_owned(), params.clone()))
            .cloned();
        let response = match exact {
            Some(response) => response,
            None => self
                .method_responses
                .lock()
                .unwrap()
                .get(method)
                .cloned()
                .ok_or_else(|| EthMockError::NoResponse(format!("{method} {params}")))?,
        };
        match response {
            MockResponse::Value(value) => Ok(serde_json::from_value(value)?),
            MockResponse::Error { code, message } => Err(EthMockError::JsonRpc(JsonRpcError {
                code,
                message,
                data: None,
            })),
        }
    }
}
