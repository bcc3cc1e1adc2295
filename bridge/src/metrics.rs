// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, HistogramVec, IntCounterVec, IntGaugeVec, Registry,
};

const FINE_GRAINED_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.6, 0.7, 0.8, 0.9,
    1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0, 3.5, 4.0, 5.0, 6.0, 6.5, 7.0, 7.5, 8.0, 8.5, 9.0, 9.5,
    10., 15., 20., 25., 30., 35., 40., 45., 50., 60., 70., 80., 90., 100., 120.,
];

/// Metrics of the observer, labelled by chain name.
#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    pub(crate) rpc_queries: IntCounterVec,
    pub(crate) rpc_queries_latency: HistogramVec,
    pub(crate) rpc_node_connected: IntGaugeVec,

    pub(crate) last_scanned_height: IntGaugeVec,
    pub(crate) chain_tip_height: IntGaugeVec,
    pub(crate) chain_healthy: IntGaugeVec,
    pub(crate) fetch_errors: IntCounterVec,

    pub(crate) inbound_batches: IntCounterVec,
    pub(crate) inbound_items: IntCounterVec,
    pub(crate) dropped_items: IntCounterVec,
    pub(crate) pending_batches: IntGaugeVec,

    pub(crate) reorgs_detected: IntCounterVec,
    pub(crate) errata_txs: IntCounterVec,

    pub(crate) gas_estimate_wei: IntGaugeVec,
    pub(crate) network_fee_reports: IntCounterVec,
    pub(crate) solvency_reports: IntCounterVec,

    pub(crate) signer_with_cache_hit: IntCounterVec,
    pub(crate) signer_with_cache_miss: IntCounterVec,
    pub(crate) keysign_failures: IntCounterVec,
    pub(crate) broadcasts: IntCounterVec,
    pub(crate) signer_errors: IntCounterVec,
}

impl BridgeMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            rpc_queries: register_int_counter_vec_with_registry!(
                "bridge_rpc_queries",
                "Total number of queries issued to chain rpc, by chain and method",
                &["chain", "method"],
                registry,
            )
            .unwrap(),
            rpc_queries_latency: register_histogram_vec_with_registry!(
                "bridge_rpc_queries_latency",
                "Latency of chain rpc queries, by chain and method",
                &["chain", "method"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            rpc_node_connected: register_int_gauge_vec_with_registry!(
                "bridge_rpc_node_connected",
                "Whether the last rpc query to the chain succeeded (1) or not (0)",
                &["chain"],
                registry,
            )
            .unwrap(),
            last_scanned_height: register_int_gauge_vec_with_registry!(
                "bridge_last_scanned_height",
                "Last height fully processed by the block scanner",
                &["chain"],
                registry,
            )
            .unwrap(),
            chain_tip_height: register_int_gauge_vec_with_registry!(
                "bridge_chain_tip_height",
                "Latest chain tip height seen by the block scanner",
                &["chain"],
                registry,
            )
            .unwrap(),
            chain_healthy: register_int_gauge_vec_with_registry!(
                "bridge_chain_healthy",
                "Whether the block scanner considers the chain healthy",
                &["chain"],
                registry,
            )
            .unwrap(),
            fetch_errors: register_int_counter_vec_with_registry!(
                "bridge_fetch_errors",
                "Total number of failed block or mempool fetches, by chain and kind",
                &["chain", "kind"],
                registry,
            )
            .unwrap(),
            inbound_batches: register_int_counter_vec_with_registry!(
                "bridge_inbound_batches",
                "Total number of inbound batches handed off, by chain and batch kind",
                &["chain", "kind"],
                registry,
            )
            .unwrap(),
            inbound_items: register_int_counter_vec_with_registry!(
                "bridge_inbound_items",
                "Total number of inbound items handed off, by chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            dropped_items: register_int_counter_vec_with_registry!(
                "bridge_dropped_items",
                "Total number of bridge logs dropped as unparsable or zero value",
                &["chain"],
                registry,
            )
            .unwrap(),
            pending_batches: register_int_gauge_vec_with_registry!(
                "bridge_pending_batches",
                "Number of inbound batches waiting for confirmations",
                &["chain"],
                registry,
            )
            .unwrap(),
            reorgs_detected: register_int_counter_vec_with_registry!(
                "bridge_reorgs_detected",
                "Total number of chain reorganizations detected",
                &["chain"],
                registry,
            )
            .unwrap(),
            errata_txs: register_int_counter_vec_with_registry!(
                "bridge_errata_txs",
                "Total number of errata transactions emitted",
                &["chain"],
                registry,
            )
            .unwrap(),
            gas_estimate_wei: register_int_gauge_vec_with_registry!(
                "bridge_gas_estimate_wei",
                "Current smoothed outbound gas price estimate in wei",
                &["chain"],
                registry,
            )
            .unwrap(),
            network_fee_reports: register_int_counter_vec_with_registry!(
                "bridge_network_fee_reports",
                "Total number of network fee updates pushed",
                &["chain"],
                registry,
            )
            .unwrap(),
            solvency_reports: register_int_counter_vec_with_registry!(
                "bridge_solvency_reports",
                "Total number of solvency reports pushed",
                &["chain"],
                registry,
            )
            .unwrap(),
            signer_with_cache_hit: register_int_counter_vec_with_registry!(
                "bridge_signer_with_cache_hit",
                "Total number of outbound instructions skipped because already signed",
                &["chain"],
                registry,
            )
            .unwrap(),
            signer_with_cache_miss: register_int_counter_vec_with_registry!(
                "bridge_signer_with_cache_miss",
                "Total number of outbound instructions not found in the signer cache",
                &["chain"],
                registry,
            )
            .unwrap(),
            keysign_failures: register_int_counter_vec_with_registry!(
                "bridge_keysign_failures",
                "Total number of keysign failures forwarded with blame",
                &["chain"],
                registry,
            )
            .unwrap(),
            broadcasts: register_int_counter_vec_with_registry!(
                "bridge_broadcasts",
                "Total number of outbound broadcasts, by chain and result",
                &["chain", "result"],
                registry,
            )
            .unwrap(),
            signer_errors: register_int_counter_vec_with_registry!(
                "bridge_signer_errors",
                "Total number of signer errors, by chain and error type",
                &["chain", "error_type"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
