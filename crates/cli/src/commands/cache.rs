//! `answerflow cache`: inspect and evict cached answers.

use answerflow_cache::{ResponseCache, SystemClock};
use answerflow_config::AppConfig;
use answerflow_pipeline::{build_store, cache_policy};
use clap::Subcommand;
use std::sync::Arc;

#[derive(Subcommand)]
pub enum CacheAction {
    /// List cached keys, or show one entry in full
    Show {
        #[arg(short, long)]
        assessment: Option<String>,
        #[arg(short, long, requires = "assessment")]
        control: Option<String>,
    },
    /// Print entry and answer counts
    Stats,
    /// Evict one control, a whole assessment, or everything
    Evict {
        #[arg(short, long, required_unless_present = "all")]
        assessment: Option<String>,
        #[arg(short, long, requires = "assessment")]
        control: Option<String>,
        #[arg(long, conflicts_with = "assessment")]
        all: bool,
    },
    /// Drop answers older than the TTL
    Purge,
}

/// Open the configured cache, falling back to an empty one.
pub async fn open(config: &AppConfig) -> ResponseCache {
    ResponseCache::restore_or_empty(
        build_store(&config.cache),
        Arc::new(SystemClock),
        cache_policy(&config.cache),
    )
    .await
}

pub async fn run(action: CacheAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.cache.backend != "file" {
        eprintln!(
            "  Note: cache backend is '{}', nothing outlives this process",
            config.cache.backend
        );
    }
    let cache = open(&config).await;

    match action {
        CacheAction::Show {
            assessment: Some(assessment),
            control: Some(control),
        } => show_entry(&cache, &assessment, &control).await?,
        CacheAction::Show { assessment, .. } => list(&cache, assessment.as_deref()).await,
        CacheAction::Stats => {
            let stats = cache.stats().await;
            println!("Response cache ({})", cache.store_name());
            println!("  Entries:        {}", stats.entries);
            println!("  Fresh answers:  {}", stats.fresh_answers);
            println!("  Expired:        {}", stats.expired_answers);
            println!("  History turns:  {}", stats.conversation_turns);
            println!("  TTL:            {}s", config.cache.ttl_secs);
        }
        CacheAction::Evict {
            assessment,
            control,
            all,
        } => {
            let removed = match (assessment, control) {
                _ if all => cache.evict_all().await?,
                (Some(assessment), Some(control)) => {
                    usize::from(cache.evict_key(&assessment, &control).await?)
                }
                (Some(assessment), None) => cache.evict_assessment(&assessment).await?,
                (None, _) => 0,
            };
            println!("Evicted {removed} entr{}", if removed == 1 { "y" } else { "ies" });
        }
        CacheAction::Purge => {
            let purged = cache.purge_expired().await?;
            println!("Purged {purged} expired answer(s)");
        }
    }

    Ok(())
}

async fn list(cache: &ResponseCache, assessment: Option<&str>) {
    let keys: Vec<_> = cache
        .keys()
        .await
        .into_iter()
        .filter(|key| assessment.is_none_or(|a| key.assessment_id == a))
        .collect();
    if keys.is_empty() {
        println!("No cached answers");
        return;
    }

    for key in keys {
        let answered = cache
            .get(&key.assessment_id, &key.control_id)
            .await
            .is_some();
        let turns = cache
            .list_conversation(&key.assessment_id, &key.control_id)
            .await
            .len();
        println!(
            "  {:<32} {:<8} {turns} turn(s)",
            key.to_string(),
            if answered { "fresh" } else { "-" }
        );
    }
}

async fn show_entry(
    cache: &ResponseCache,
    assessment: &str,
    control: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(entry) = cache.entry(assessment, control).await else {
        return Err(format!("Nothing cached for {assessment}/{control}").into());
    };
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}
