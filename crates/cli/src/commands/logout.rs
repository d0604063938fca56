//! `answerflow logout`: tear down the session's cached answers.

use answerflow_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let cache = super::cache::open(&config).await;
    let stats = cache.stats().await;

    cache.teardown().await?;
    println!(
        "Logged out, cleared {} cached entr{}",
        stats.entries,
        if stats.entries == 1 { "y" } else { "ies" }
    );
    Ok(())
}
