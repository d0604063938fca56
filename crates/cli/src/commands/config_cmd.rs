//! `answerflow config`: configuration management commands.

use answerflow_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("  Config parsed successfully");

            let mut warnings = Vec::new();
            if config.cache.backend == "none" {
                warnings.push("Cache backend is 'none': answers are never reused across runs");
            }
            if config.cache.ttl_secs < 60 {
                warnings.push("Cache TTL under a minute: most lookups will miss");
            }

            if warnings.is_empty() {
                println!("  All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("  Warning: {w}");
                }
            }

            println!();
            println!("  Language:     {}", config.default_language);
            println!("  Cache:        {}", config.cache.backend);
            println!("  TTL:          {}s", config.cache.ttl_secs);
            println!("  History:      {} turns", config.cache.max_history);
            if config.cache.backend == "file" {
                println!("  Cache file:   {}", config.cache.file_path().display());
            }
        }
        Err(e) => {
            println!("  Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    tracing::info!(path = %config_path.display(), "Wrote default config");
    println!("Wrote {}", config_path.display());
    Ok(())
}
