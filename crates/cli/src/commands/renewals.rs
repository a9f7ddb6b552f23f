//! One renewal pass from the command line.
//!
//! Uses the full server configuration (gateway keys, SMTP, pricing, renewal
//! settings) so it bills exactly as the in-process scheduler would. Useful
//! from cron when the server runs with `RENEWAL_ENABLED=false`.

use larder_api::config::ApiConfig;
use larder_api::db;
use larder_api::state::AppState;

use super::CliError;

/// Run one pass and wait for its emails.
pub async fn run() -> Result<(), CliError> {
    let config = ApiConfig::from_env()?;
    let pool = db::create_pool(&config.database_url).await?;
    let state = AppState::new(config, pool)?;

    let summary = state.renewal_service().run_once().await?;
    state.notifier().drain().await;

    tracing::info!(
        processed = summary.processed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        paused = summary.paused,
        errors = summary.errors,
        "Renewal run complete"
    );
    if summary.errors > 0 {
        return Err(CliError::Invalid(format!(
            "{} subscription(s) could not be processed; see logs",
            summary.errors
        )));
    }
    Ok(())
}
