//! `maildelta` - audit pending server-bound mail work
//!
//! Loads the persisted complex task state, re-derives the pending markers of
//! every configured account and compares them with the persisted marker set.
//!
//! Usage: `maildelta [--json] [config.json]`

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod audit;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use maildelta_core::{
    DataOverlayManager, EngineConfig, ResourceLocks, TaskRegistry, TaskStateRepository,
    register_stock_tasks,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audit::AccountAudit;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maildelta=info,maildelta_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut json = false;
    let mut config_path = None;
    for arg in std::env::args().skip(1) {
        if arg == "--json" {
            json = true;
        } else {
            config_path = Some(PathBuf::from(arg));
        }
    }

    let config = match &config_path {
        Some(path) => EngineConfig::load(path)
            .await
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::load_default().await?,
    };

    let audits = run_audit(&config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&audits)?);
    } else {
        for audit in &audits {
            print!("{audit}");
        }
    }

    let drifting = audits.iter().filter(|a| a.has_drift()).count();
    if drifting > 0 {
        bail!("{drifting} account(s) with marker drift");
    }
    Ok(())
}

async fn run_audit(config: &EngineConfig) -> anyhow::Result<Vec<AccountAudit>> {
    let database_path = config.database_path();
    if let Some(parent) = database_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let repository = TaskStateRepository::new(&database_path.to_string_lossy())
        .await
        .with_context(|| format!("opening {}", database_path.display()))?;
    info!("Auditing task state in {}", database_path.display());

    let mut registry = TaskRegistry::new(
        Arc::new(DataOverlayManager::from_config(config)),
        Arc::new(ResourceLocks::new()),
    );
    register_stock_tasks(&mut registry);

    let (keys, values) = repository.load_state_rows().await?;
    registry.initialize_from_database_state(keys, values)?;

    let mut audits = Vec::with_capacity(config.accounts.len());
    for binding in &config.accounts {
        if !registry.is_account_type_known(&binding.account_type) {
            warn!(
                "Skipping account {}: unknown account type {}",
                binding.id, binding.account_type
            );
            continue;
        }

        let derived = registry
            .account_exists_init_tasks(binding.id, &binding.account_type)
            .await?;
        let persisted = repository.load_markers(binding.id).await?;
        audits.push(AccountAudit::new(binding, &derived, &persisted));
    }
    Ok(audits)
}
