//! Sync orchestration
//!
//! One sync runs in three nested scopes:
//!
//! 1. login to every destination (all-or-fail, nothing else starts on failure);
//! 2. one task per bundle, each serving its own ephemeral registry; the first
//!    failing bundle cancels the others;
//! 3. inside a bundle, one task per destination doing discovery then transfer;
//!    a failing destination does not stop its siblings.
//!
//! The bundle registry is shut down once its destination tasks are done,
//! whatever their outcome.

pub mod group;
pub mod login;

pub use group::{GroupMode, TaskGroup};
pub use login::login_all;

use crate::bundle::ImageBundle;
use crate::config::{ServerConfig, SyncConfig, SystemContext, LOCALHOST};
use crate::error::{Result, SyncError};
use crate::logging::Logger;
use crate::policy::{default_policy_context, PolicyContext};
use crate::registry::{
    discover, resolve_registry_address, transfer_images, HttpTransport, ImageCopier, RegistryAddress,
    RegistryTransport,
};
use crate::server::{EphemeralRegistry, ServingRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Images copied from one bundle to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationReport {
    pub registry: RegistryAddress,
    pub images_copied: usize,
}

#[derive(Debug, Clone)]
pub struct BundleReport {
    pub bundle: String,
    pub source: RegistryAddress,
    pub destinations: Vec<DestinationReport>,
}

/// Outcome of a successful sync.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub bundles: Vec<BundleReport>,
}

impl SyncReport {
    pub fn images_copied(&self) -> usize {
        self.bundles
            .iter()
            .flat_map(|b| &b.destinations)
            .map(|d| d.images_copied)
            .sum()
    }
}

/// Everything a bundle task needs, shared across tasks.
#[derive(Clone)]
struct SyncShared {
    sys: Arc<SystemContext>,
    policy: Arc<PolicyContext>,
    transport: Arc<dyn RegistryTransport>,
    copier: Arc<dyn ImageCopier>,
    destinations: Arc<Vec<RegistryAddress>>,
}

pub struct Syncer {
    bundles: Vec<ImageBundle>,
    config: SyncConfig,
    transport: Arc<dyn RegistryTransport>,
    copier: Arc<dyn ImageCopier>,
    logger: Logger,
}

impl Syncer {
    pub fn new(
        bundles: Vec<ImageBundle>,
        config: SyncConfig,
        transport: Arc<dyn RegistryTransport>,
        copier: Arc<dyn ImageCopier>,
    ) -> Self {
        Self {
            bundles,
            config,
            transport,
            copier,
            logger: Logger::default(),
        }
    }

    /// A syncer speaking HTTP to every registry through one shared client.
    pub fn with_http_transport(bundles: Vec<ImageBundle>, config: SyncConfig) -> Result<Self> {
        let http = Arc::new(HttpTransport::new(&config.system)?);
        Ok(Self::new(bundles, config, http.clone(), http))
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn bundles(&self) -> &[ImageBundle] {
        &self.bundles
    }

    /// Mirror every bundle to every host.
    ///
    /// Cancelling `cancel` (or reaching the configured timeout) stops new
    /// work; in-flight copies finish and every registry is shut down before
    /// this returns.
    pub async fn sync(&self, hosts: &[String], cancel: &CancellationToken) -> Result<SyncReport> {
        let token = cancel.child_token();
        let run = self.run(hosts, &token);
        tokio::pin!(run);

        if let Some(limit) = self.config.timeout() {
            tokio::select! {
                result = &mut run => return result,
                _ = tokio::time::sleep(limit) => {
                    self.logger.warning(&format!(
                        "sync exceeded {}, cancelling",
                        self.logger.format_duration(limit)
                    ));
                    token.cancel();
                }
            }
        }
        run.await
    }

    async fn run(&self, hosts: &[String], cancel: &CancellationToken) -> Result<SyncReport> {
        let sys = Arc::new(self.config.system.clone());

        self.logger.section("Login");
        let destinations = login_all(
            self.transport.clone(),
            sys.clone(),
            &self.config.credentials,
            hosts,
            cancel,
        )
        .await?;

        let policy = Arc::new(default_policy_context(&sys)?);
        let shared = SyncShared {
            sys,
            policy: policy.clone(),
            transport: self.transport.clone(),
            copier: self.copier.clone(),
            destinations: Arc::new(destinations),
        };

        self.logger.section("Sync");
        let mut group = TaskGroup::new("bundles", cancel, GroupMode::CancelOnError);
        for bundle in &self.bundles {
            let server_config = self.config.server_config(bundle.registry_root());
            let span = tracing::info_span!("bundle", name = %bundle.name());
            let token = group.token();
            group.spawn(sync_bundle(bundle.clone(), server_config, shared.clone(), token).instrument(span));
        }
        let result = group.wait().await;

        drop(shared);
        match Arc::try_unwrap(policy) {
            Ok(policy) => policy.destroy(),
            Err(_) => tracing::warn!("policy context still shared after sync"),
        }

        let report = SyncReport { bundles: result? };
        self.logger.success(&format!(
            "synced {} image(s) from {} bundle(s) in {}",
            report.images_copied(),
            report.bundles.len(),
            self.logger.format_duration(self.logger.elapsed())
        ));
        Ok(report)
    }
}

async fn sync_bundle(
    bundle: ImageBundle,
    server_config: ServerConfig,
    shared: SyncShared,
    cancel: CancellationToken,
) -> Result<BundleReport> {
    let pending = EphemeralRegistry::create(bundle.name(), server_config);
    let registry = pending.bind().await?;
    let source = resolve_registry_address(LOCALHOST, Some(&registry.local_addr().to_string()))?;
    let mut serving = registry.serve();

    let mut hosts = TaskGroup::new("destinations", &cancel, GroupMode::Independent);
    let hosts_token = hosts.token();
    for destination in shared.destinations.iter() {
        let span = tracing::info_span!("destination", registry = %destination);
        let pair = sync_pair(shared.clone(), source.clone(), destination.clone(), hosts_token.clone());
        hosts.spawn(pair.instrument(span));
    }

    let outcome = await_pairs(hosts.wait(), &mut serving, &hosts_token).await;

    if let Err(e) = serving.shutdown().await {
        tracing::warn!(error = %e, "registry shutdown failed");
    }

    let destinations = outcome?;
    Ok(BundleReport {
        bundle: bundle.name().to_string(),
        source,
        destinations,
    })
}

/// Wait for the destination pairs while the bundle registry is serving. If the
/// registry stops first, the pairs are cancelled and awaited, and the bundle
/// fails with the serve error.
async fn await_pairs<F>(
    pairs: F,
    serving: &mut ServingRegistry,
    pairs_token: &CancellationToken,
) -> Result<Vec<DestinationReport>>
where
    F: Future<Output = Result<Vec<DestinationReport>>>,
{
    tokio::pin!(pairs);
    tokio::select! {
        result = &mut pairs => result,
        served = serving.wait() => {
            pairs_token.cancel();
            let _ = pairs.await;
            Err(served.err().unwrap_or_else(|| SyncError::Serve {
                bundle: serving.bundle().to_string(),
                reason: "server stopped before transfers finished".to_string(),
            }))
        }
    }
}

async fn sync_pair(
    shared: SyncShared,
    source: RegistryAddress,
    destination: RegistryAddress,
    cancel: CancellationToken,
) -> Result<DestinationReport> {
    let images = discover(shared.transport.as_ref(), &shared.sys, &source, &cancel).await?;
    if images.is_empty() {
        return Ok(DestinationReport {
            registry: destination,
            images_copied: 0,
        });
    }
    tracing::info!(count = images.len(), "images discovered");

    let images_copied = transfer_images(
        shared.copier.as_ref(),
        &shared.policy,
        shared.sys.clone(),
        &images,
        &source,
        &destination,
        &cancel,
    )
    .await?;

    Ok(DestinationReport {
        registry: destination,
        images_copied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_pairs_finish_while_serving() {
        let dir = TempDir::new().unwrap();
        let mut serving = EphemeralRegistry::bind("a", ServerConfig::with_root(dir.path()))
            .await
            .unwrap()
            .serve();
        let token = CancellationToken::new();

        let result = await_pairs(async { Ok(Vec::new()) }, &mut serving, &token).await;
        assert!(result.unwrap().is_empty());
        assert!(!token.is_cancelled());
        serving.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_stopping_early_cancels_pairs() {
        let dir = TempDir::new().unwrap();
        let mut serving = EphemeralRegistry::bind("a", ServerConfig::with_root(dir.path()))
            .await
            .unwrap()
            .serve();
        let token = CancellationToken::new();
        let observed = Arc::new(AtomicBool::new(false));

        let pairs = {
            let token = token.clone();
            let observed = observed.clone();
            async move {
                token.cancelled().await;
                observed.store(true, Ordering::SeqCst);
                Err(SyncError::Cancelled)
            }
        };

        serving.abort_server();
        let err = await_pairs(pairs, &mut serving, &token).await.unwrap_err();
        assert!(matches!(err, SyncError::Serve { ref bundle, .. } if bundle == "a"), "{}", err);
        assert!(observed.load(Ordering::SeqCst));
        serving.shutdown().await.unwrap();
    }
}
