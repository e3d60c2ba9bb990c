//! The `holdfastd` run loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::orchestrator::{Orchestrator, OrchestratorOptions};
use crate::registry::{AdapterRegistry, ProviderFactory};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::store::{AccountStore, FileStore};

/// How long shutdown waits for a background job to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Builds an orchestrator from the configuration and the accounts in the store.
pub async fn build(config: &OrchestratorConfig) -> OrchestratorResult<Orchestrator> {
    let store = Arc::new(FileStore::open(&config.store_path)?);
    info!(path = %store.path().display(), "Store opened");

    let accounts = store.active_accounts(&config.owner_id).await?;
    let factory = ProviderFactory::from_config(config)?;
    let mut registry =
        AdapterRegistry::from_accounts(accounts, &factory, config.availability.max_accounts);
    let failures = registry.initialize_all().await;
    if !failures.is_empty() {
        warn!(failed = failures.len(), "Some calendars are unavailable");
    }
    if registry.is_empty() {
        return Err(OrchestratorError::NoCalendarsConfigured);
    }
    info!(owner = %config.owner_id, calendars = registry.len(), "Calendars ready");

    Ok(Orchestrator::new(
        OrchestratorOptions::from(config),
        registry,
        store,
    ))
}

/// Runs the daemon until Ctrl-C.
///
/// Expired holds are swept on start and then every `sweep_interval_secs`.
/// When a webhook address is configured, channels are opened on start and
/// renewed every `renewal_interval_secs`.
pub async fn run(config: OrchestratorConfig) -> OrchestratorResult<()> {
    let orchestrator = Arc::new(build(&config).await?);

    let mut handles = Vec::new();
    let mut tasks = Vec::new();

    let sweeper = Scheduler::new(SchedulerConfig::new("sweeper", config.sweep_interval()));
    handles.push(sweeper.handle());
    let sweep_orchestrator = orchestrator.clone();
    tasks.push(tokio::spawn(sweeper.run(move || {
        let orchestrator = sweep_orchestrator.clone();
        async move {
            orchestrator
                .cleanup_expired_holds()
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
    })));

    if let Some(address) = &config.webhooks.address {
        let opened = orchestrator.subscribe_webhooks(address).await;
        info!(opened, address = %address, "Webhook channels opened");

        let renewal = Scheduler::new(
            SchedulerConfig::new("webhook-renewal", config.renewal_interval())
                .with_run_on_start(false),
        );
        handles.push(renewal.handle());
        let renew_orchestrator = orchestrator.clone();
        tasks.push(tokio::spawn(renewal.run(move || {
            let orchestrator = renew_orchestrator.clone();
            async move {
                let expected = orchestrator.registry().subscriptions().await.len();
                let renewed = orchestrator.renew_webhook_subscriptions().await;
                if renewed < expected {
                    Err(format!("renewed {} of {} webhook channels", renewed, expected))
                } else {
                    Ok(())
                }
            }
        })));
    } else {
        info!("No webhook address configured, relying on cache TTL");
    }

    info!("holdfastd running");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
    }

    info!("Shutting down...");
    for handle in &handles {
        if let Err(e) = handle.stop().await {
            warn!(error = %e, "Failed to send stop command to scheduler");
        }
    }
    for task in tasks {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
    }

    info!("holdfastd stopped");
    Ok(())
}
