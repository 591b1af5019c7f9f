//! Command implementations against the Postgres store.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use stockledger_core::UuidIdGenerator;
use stockledger_infra::{EngineConfig, PostgresStore, StockSyncEngine, run_migrations};

use crate::Command;

type Engine = StockSyncEngine<Arc<PostgresStore>, Arc<PostgresStore>>;

#[derive(Serialize)]
struct Cleanup {
    orphans_deleted: u64,
}

#[derive(Serialize)]
struct Migrated {
    migrated: bool,
}

fn print<T: Serialize>(report: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to render report")?;
    println!("{json}");
    Ok(())
}

pub async fn run(database_url: &str, command: Command) -> anyhow::Result<()> {
    let store = Arc::new(
        PostgresStore::connect(database_url)
            .await
            .context("failed to connect to the database")?,
    );

    if command == Command::Migrate {
        run_migrations(store.pool())
            .await
            .context("failed to run migrations")?;
        info!("migrations applied");
        return print(&Migrated { migrated: true });
    }

    let config = EngineConfig::from_env();
    let engine: Engine = StockSyncEngine::new(
        store.clone(),
        store,
        Arc::new(UuidIdGenerator),
        config,
    );

    match command {
        Command::Migrate => Ok(()),
        Command::Resync => print(&engine.sync_all_products().await.context("resync failed")?),
        Command::CleanupOrphans => {
            let orphans_deleted = engine
                .cleanup_orphaned_rows()
                .await
                .context("orphan cleanup failed")?;
            print(&Cleanup { orphans_deleted })
        }
        Command::Integrity => print(
            &engine
                .validate_integrity()
                .await
                .context("integrity check failed")?,
        ),
        Command::FixIntegrity => print(&engine.fix_integrity().await.context("integrity fix failed")?),
        Command::Stats => print(&engine.statistics().await.context("statistics failed")?),
    }
}
