// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::metrics::BridgeMetrics;
use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::{ParseError, Url};

const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Http transport that counts and times every query per chain, caps concurrent
/// requests, and retries responses that look like provider rate limiting.
#[derive(Debug, Clone)]
pub struct MeteredEthHttpProvider {
    inner: Http,
    chain: String,
    metrics: Arc<BridgeMetrics>,
    semaphore: Arc<Semaphore>,
}

fn is_rate_limit(err: &HttpClientError) -> bool {
    // Some providers answer with non-standard bodies like
    // {"code":-32005,"message":"Too Many Requests"} that fail deserialization
    let error_str = format!("{:?}", err).to_lowercase();
    error_str.contains("rate limit")
        || error_str.contains("429")
        || error_str.contains("too many requests")
        || error_str.contains("quota exceeded")
        || error_str.contains("-32005")
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl JsonRpcClient for MeteredEthHttpProvider {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, HttpClientError> {
        // The semaphore is never closed, so a failed acquire only happens on drop
        let _permit = self.semaphore.acquire().await.ok();

        self.metrics
            .rpc_queries
            .with_label_values(&[&self.chain, method])
            .inc();
        let _guard = self
            .metrics
            .rpc_queries_latency
            .with_label_values(&[&self.chain, method])
            .start_timer();

        let mut result = self.inner.request(method, &params).await;
        let mut retry_count = 0;
        while retry_count < MAX_RATE_LIMIT_RETRIES {
            match &result {
                Err(e) if is_rate_limit(e) => {}
                _ => break,
            }
            // 1s, 2s, 4s
            let backoff_duration = Duration::from_secs(1 << retry_count);
            tracing::warn!(
                "[{}] Rate limit error detected, retrying after {:?} (attempt {}/{})",
                self.chain,
                backoff_duration,
                retry_count + 1,
                MAX_RATE_LIMIT_RETRIES
            );
            tokio::time::sleep(backoff_duration).await;
            result = self.inner.request(method, &params).await;
            retry_count += 1;
        }

        self.metrics
            .rpc_node_connected
            .with_label_values(&[&self.chain])
            .set(i64::from(result.is_ok()));
        result
    }
}

impl MeteredEthHttpProvider {
    pub fn new(
        url: impl Into<Url>,
        chain: impl Into<String>,
        max_concurrent_requests: usize,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            inner: Http::new(url),
            chain: chain.into(),
            metrics,
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
        }
    }
}

pub fn new_metered_eth_provider(
    url: &str,
    chain: &str,
    max_concurrent_requests: usize,
    metrics: Arc<BridgeMetrics>,
) -> Result<Provider<MeteredEthHttpProvider>, ParseError> {
    let http_provider =
        MeteredEthHttpProvider::new(Url::parse(url)?, chain, max_concurrent_requests, metrics);
    Ok(Provider::new(http_provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::Middleware;

    #[tokio::test]
    async fn test_metered_eth_provider() {
        let metrics = Arc::new(BridgeMetrics::new_for_testing());
        let provider =
            new_metered_eth_provider("http://localhost:9876", "eth", 2, metrics.clone()).unwrap();

        assert_eq!(
            metrics
                .rpc_queries
                .get_metric_with_label_values(&["eth", "eth_blockNumber"])
                .unwrap()
                .get(),
            0
        );

        provider.get_block_number().await.unwrap_err(); // the rpc call will fail but we don't care

        assert_eq!(
            metrics
                .rpc_queries
                .get_metric_with_label_values(&["eth", "eth_blockNumber"])
                .unwrap()
                .get(),
            1
        );
        assert_eq!(
            metrics
                .rpc_queries_latency
                .get_metric_with_label_values(&["eth", "eth_blockNumber"])
                .unwrap()
                .get_sample_count(),
            1
        );
        assert_eq!(
            metrics
                .rpc_node_connected
                .get_metric_with_label_values(&["eth"])
                .unwrap()
                .get(),
            0
        );
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let metrics = Arc::new(BridgeMetrics::new_for_testing());
        assert!(new_metered_eth_provider("not a url", "eth", 1, metrics).is_err());
    }
}
