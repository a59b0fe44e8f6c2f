//! Concurrent login to every destination before any transfer starts.

use crate::config::SystemContext;
use crate::credentials::CredentialResolver;
use crate::error::{Result, SyncError};
use crate::registry::{resolve_registry_address, RegistryAddress, RegistryTransport};
use crate::sync::group::{GroupMode, TaskGroup};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Log in to every host; returns the resolved addresses in input order.
///
/// All hosts are resolved up front. The first failing login cancels the rest.
pub async fn login_all(
    transport: Arc<dyn RegistryTransport>,
    sys: Arc<SystemContext>,
    resolver: &CredentialResolver,
    hosts: &[String],
    cancel: &CancellationToken,
) -> Result<Vec<RegistryAddress>> {
    let addresses = hosts
        .iter()
        .map(|host| resolve_registry_address(host, None))
        .collect::<Result<Vec<_>>>()?;

    let mut group = TaskGroup::new("login", cancel, GroupMode::CancelOnError);
    for address in &addresses {
        let transport = transport.clone();
        let sys = sys.clone();
        let address = address.clone();
        let credentials = resolver.resolve(&address);
        let token = group.token();

        group.spawn(async move {
            let login = transport.login(&sys, &address, &credentials);
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(SyncError::Cancelled),
                result = login => result,
            };
            match result {
                Ok(()) => {
                    tracing::info!(registry = %address, username = %credentials.username, "logged in");
                    Ok(())
                }
                Err(e) if e.is_cancelled() => Err(e),
                Err(e) => Err(SyncError::Login {
                    registry: address.to_string(),
                    source: Box::new(e),
                }),
            }
        });
    }

    group.wait().await?;
    Ok(addresses)
}
