use anyhow::Context as _;
use hotswap::core::config_manager;
use hotswap::{Config, UpdateManager, UpdatePhase};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hotswap=info,hotswap_services=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = parse_config_path();
    let config = load_config_or_default(&config_path);
    log::info!("Config loaded from {}", config_path.display());

    let manager = UpdateManager::from_config(&config)
        .await
        .context("Failed to initialize update manager")?;

    manager.subscribe(|event| {
        if event.phase_changed() {
            log::info!(
                "Update phase: {} -> {}",
                event.previous_phase,
                event.state.phase
            );
        } else if event.state.phase == UpdatePhase::Downloading {
            log::debug!("Download progress: {:.0}%", event.state.progress_percent);
        }
    });

    // A bundle URL on the command line skips the backend check.
    if let Some(bundle_url) = parse_flag("--bundle") {
        manager.get_current_version().await;
        let outcome = manager.start_update(&bundle_url).await;
        log::info!("Update result: {:?}", outcome);
    } else if config.update.check_on_launch {
        let report = manager.run_launch_sequence().await;
        log::info!("Pending update: {:?}", report.pending);
        log::info!("Update check: {:?}", report.check);
    } else {
        log::info!("Update check on launch disabled");
        manager.get_current_version().await;
    }

    manager.wait_for_restart().await;
    Ok(())
}

/// Value following `flag` on the command line, if any
fn parse_flag(flag: &str) -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

/// Parse config path from command line arguments or use user data directory
fn parse_config_path() -> PathBuf {
    if let Some(value) = parse_flag("--config") {
        return PathBuf::from(value);
    }

    // No custom config specified, use user data directory
    match config_manager::initialize_user_config() {
        Ok(path) => path,
        Err(e) => {
            log::error!("Failed to initialize user config: {:#}", e);
            let fallback = config_manager::get_user_config_path_or_temp();
            if let Err(err) = config_manager::ensure_default_config_at(&fallback) {
                log::error!(
                    "Failed to create fallback config at {}: {:#}",
                    fallback.display(),
                    err
                );
            }
            log::warn!("Falling back to {}", fallback.display());
            fallback
        }
    }
}

fn load_config_or_default(path: &Path) -> Config {
    match config_manager::load_config(path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{:#}, using embedded defaults", e);
            config_manager::load_default_config().unwrap_or_default()
        }
    }
}
