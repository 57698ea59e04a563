use std::process;

use tracing::{error, info, warn};

use tracker_import::{
    AppConfig, CancellationToken, DuckDBStore, PersistenceStore, Result, SyncReport, SyncService,
    TrackerClient, init_logging,
};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // ロガー設定前なので標準エラーへ
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = init_logging(&config.log) {
        eprintln!("{}", e);
        process::exit(1);
    }

    match run(config).await {
        Ok(report) if report.is_complete() => {}
        Ok(report) => {
            warn!(
                failed_issue_keys = ?report.failed_issue_keys,
                "Sync completed with issues whose changelog could not be fetched"
            );
        }
        Err(e) => {
            error!(error = %e, "Sync failed");
            process::exit(1);
        }
    }
}

async fn run(config: AppConfig) -> Result<SyncReport> {
    info!(
        database = %config.database_path.display(),
        organization_id = config.organization_id(),
        "Opening store"
    );
    let store = DuckDBStore::new(&config.database_path, config.organization_id())?;
    store.initialize().await?;

    let client = TrackerClient::new(config.tracker.clone())?;
    let service = SyncService::new(client, store, config.sync.clone())?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling sync");
            signal_token.cancel();
        }
    });

    match service.count_matching_issues(&cancel).await {
        Ok(total) => info!(total, "Issues matching filter"),
        Err(e) => warn!(error = %e, "Failed to count matching issues"),
    }

    service.run(&cancel).await
}
