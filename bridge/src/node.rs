// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wiring of the per-chain components:
//!
//! ```text
//! EthChainClient ─▶ BlockScanner ─▶ ConfirmationGate ─▶ relay queue ─▶ coordination
//!       │                                                   ▲
//!       └─ errata / fee / solvency queues ──────────────────┘
//! outbound instructions ─▶ OutboundSigner ─▶ EthOutboundChain
//! ```

use crate::chain_syncer::eth::{EthChainClient, EthChainConfig, EthOutboundChain};
use crate::chain_syncer::{BlockScanner, ScannerHandle, ScannerState};
use crate::config::BridgeNodeConfig;
use crate::coordination::{
    BridgeQueues, CachedCoordinationClient, CoordinationClient, StandaloneCoordinator,
};
use crate::error::{BridgeError, BridgeResult};
use crate::finality::{
    ConfirmationPolicy, FixedConfirmations, InstantFinality, SecuritySource, ValueAtRiskPolicy,
};
use crate::metered_eth_provider::new_metered_eth_provider;
use crate::metrics::BridgeMetrics;
use crate::pending_events::ConfirmationGate;
use crate::retry_with_max_elapsed_time;
use crate::server::{run_server, ServerState};
use crate::signer::{OutboundSigner, RemoteSigner};
use crate::storage::{MemoryKvStore, ScanCursorStore, SharedKvStore};
use crate::types::OutboundInstruction;
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// How long an unreachable endpoint is retried at startup
const CONNECT_RETRY_TIMEOUT: Duration = Duration::from_secs(60);

/// Collaborators the node does not own.
#[derive(Clone)]
pub struct NodeCollaborators {
    pub coordination: Arc<dyn CoordinationClient>,
    /// Prices batches for the value-at-risk policy. Without it non-instant
    /// chains wait for their minimum confirmations.
    pub security: Option<Arc<dyn SecuritySource>>,
    /// Without a signer the node only observes.
    pub remote_signer: Option<Arc<dyn RemoteSigner>>,
}

/// Running components of one chain.
pub struct ChainHandle {
    pub chain: String,
    pub chain_id: u64,
    scanner: ScannerHandle,
    tasks: Vec<JoinHandle<()>>,
    outbound: Option<mpsc::Sender<OutboundInstruction>>,
}

impl ChainHandle {
    pub fn state(&self) -> Arc<ScannerState> {
        self.scanner.state()
    }

    /// Queue feeding the outbound signer, if a remote signer was supplied.
    pub fn outbound_sender(&self) -> Option<mpsc::Sender<OutboundInstruction>> {
        self.outbound.clone()
    }

    async fn join(self) {
        self.scanner.join().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("[{}] Task panicked: {:?}", self.chain, e);
            }
        }
    }
}

/// Open the configured store. Without a path, or without RocksDB support,
/// everything is kept in memory.
pub fn open_store(db_path: Option<&Path>) -> BridgeResult<SharedKvStore> {
    match db_path {
        #[cfg(feature = "rocksdb")]
        Some(path) => {
            info!("Opening RocksDB store at {}", path.display());
            Ok(Arc::new(crate::storage::RocksKvStore::open(path)?))
        }
        #[cfg(not(feature = "rocksdb"))]
        Some(path) => {
            warn!(
                "db-path {} ignored, built without RocksDB support; using memory store",
                path.display()
            );
            Ok(Arc::new(MemoryKvStore::new()))
        }
        None => {
            warn!("No db-path configured, scan progress and signer cache are not persisted");
            Ok(Arc::new(MemoryKvStore::new()))
        }
    }
}

fn confirmation_policy(
    config: &EthChainConfig,
    security: Option<&Arc<dyn SecuritySource>>,
) -> Arc<dyn ConfirmationPolicy> {
    if config.confirmation.instant_finality {
        return Arc::new(InstantFinality);
    }
    match security {
        Some(source) => Arc::new(ValueAtRiskPolicy::new(
            &config.chain_name,
            config.confirmation.clone(),
            source.clone(),
        )),
        None => Arc::new(FixedConfirmations(config.confirmation.min_confirmations)),
    }
}

/// Build and start every component of one chain.
#[allow(clippy::too_many_arguments)]
pub async fn start_chain<P>(
    config: EthChainConfig,
    provider: Arc<Provider<P>>,
    store: SharedKvStore,
    queues: &BridgeQueues,
    queue_capacity: usize,
    collaborators: &NodeCollaborators,
    metrics: Arc<BridgeMetrics>,
    cancel: &CancellationToken,
) -> BridgeResult<ChainHandle>
where
    P: JsonRpcClient + 'static,
{
    let chain = config.chain_name.clone();
    let cancel = cancel.child_token();
    let state = Arc::new(ScannerState::new());
    let client = Arc::new(
        EthChainClient::new(
            config.clone(),
            provider.clone(),
            store.clone(),
            queues,
            state.clone(),
            cancel.clone(),
        )?
        .with_metrics(metrics.clone()),
    );

    retry_with_max_elapsed_time!(provider.get_chainid(), CONNECT_RETRY_TIMEOUT)??;
    let chain_id = client.verify_chain_id().await?;

    let (batch_tx, batch_rx) = mpsc::channel(queue_capacity);
    let scanner = BlockScanner::new(
        client.clone(),
        config.scanner.clone(),
        ScanCursorStore::new(store.clone()),
        collaborators.coordination.clone(),
        confirmation_policy(&config, collaborators.security.as_ref()),
        batch_tx,
    )
    .with_state(state)
    .with_fee_queue(queues.network_fee.clone())
    .with_start_height(config.start_height)
    .with_metrics(metrics.clone());

    let mut tasks = vec![ConfirmationGate::new(
        &chain,
        store,
        queues.inbound.clone(),
        config.confirmation.check_interval,
    )?
    .with_metrics(metrics.clone())
    .spawn(batch_rx, scanner.tip_receiver(), cancel.clone())];

    let outbound = collaborators.remote_signer.as_ref().map(|remote| {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let signer = OutboundSigner::new(
            Arc::new(EthOutboundChain::new(client.clone(), chain_id)),
            remote.clone(),
            collaborators.coordination.clone(),
            client.signer_cache().clone(),
            config.max_pending_nonces,
        )
        .with_metrics(metrics.clone());
        tasks.push(Arc::new(signer).spawn(rx, cancel.clone()));
        tx
    });
    if outbound.is_none() {
        info!("[{}] No remote signer configured, observing only", chain);
    }

    let scanner = scanner.start(cancel).await?;
    info!("[{}] Chain started (chain id {})", chain, chain_id);
    Ok(ChainHandle {
        chain,
        chain_id,
        scanner,
        tasks,
        outbound,
    })
}

pub struct BridgeNodeHandle {
    cancel: CancellationToken,
    chains: Vec<ChainHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl BridgeNodeHandle {
    pub fn chains(&self) -> &[ChainHandle] {
        &self.chains
    }

    pub fn outbound_senders(&self) -> HashMap<String, mpsc::Sender<OutboundInstruction>> {
        self.chains
            .iter()
            .filter_map(|c| c.outbound_sender().map(|tx| (c.chain.clone(), tx)))
            .collect()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Raise the stop signal and wait for every component.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.join().await;
    }

    pub async fn join(self) {
        for chain in self.chains {
            chain.join().await;
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Task panicked: {:?}", e);
            }
        }
    }
}

/// Start a node on the in-process coordinator.
pub async fn run_bridge_node(
    config: BridgeNodeConfig,
    prometheus_registry: prometheus::Registry,
) -> anyhow::Result<BridgeNodeHandle> {
    config.validate()?;
    let metrics = Arc::new(BridgeMetrics::new(&prometheus_registry));
    let store = open_store(config.db_path.as_deref())?;
    let cancel = CancellationToken::new();

    let (queues, receivers) = BridgeQueues::new(config.queue_capacity);
    let coordinator = Arc::new(StandaloneCoordinator::new());
    let mut tasks = vec![coordinator.clone().spawn(receivers, cancel.clone())];
    let collaborators = NodeCollaborators {
        coordination: Arc::new(CachedCoordinationClient::new(
            coordinator,
            config.coordination_cache_ttl,
        )),
        security: None,
        remote_signer: None,
    };

    let mut chains = Vec::with_capacity(config.chains.len());
    for chain_config in &config.chains {
        let provider = new_metered_eth_provider(
            &chain_config.rpc_url,
            &chain_config.chain_name,
            chain_config.max_concurrent_requests,
            metrics.clone(),
        )
        .map_err(|e| BridgeError::InvalidConfig(format!("rpc-url: {e}")))?;
        let handle = start_chain(
            chain_config.clone(),
            Arc::new(provider),
            store.clone(),
            &queues,
            config.queue_capacity,
            &collaborators,
            metrics.clone(),
            &cancel,
        )
        .await?;
        chains.push(handle);
    }

    let socket_address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), config.metrics_port);
    let states = chains
        .iter()
        .map(|c| (c.chain.clone(), c.state()))
        .collect();
    tasks.push(run_server(
        &socket_address,
        ServerState::new(prometheus_registry, states),
    ));

    Ok(BridgeNodeHandle {
        cancel,
        chains,
        tasks,
    })
}
