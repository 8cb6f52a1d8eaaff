use scripting::{ScriptManager, Subsystem};

use game_host::config::parse_cli_args;
use game_host::{install_engine_api, register_builtin_classes, HostInfo};

fn main() {
    observability::init_logging();

    let config = parse_cli_args();
    tracing::info!("{} starting...", config.host.title);

    let manager = ScriptManager::new(config.to_script_config());
    if !manager.on_initialize() {
        tracing::error!("Script subsystem failed to initialize");
        std::process::exit(1);
    }

    if let Err(e) = register_builtin_classes(&manager) {
        tracing::error!("Failed to register script classes: {}", e);
        std::process::exit(1);
    }
    let info = HostInfo {
        title: config.host.title.clone(),
    };
    if let Err(e) = install_engine_api(&manager, info) {
        tracing::error!("Failed to install engine API: {}", e);
        std::process::exit(1);
    }

    // The error was already logged by the run scope.
    if manager.load(&config.scripting.entry, false).is_err() {
        tracing::warn!("Entry script {} did not complete", config.scripting.entry);
    }

    if let Some(stats) = manager.stats() {
        tracing::info!(
            classes = stats.classes,
            components = stats.components,
            modules = stats.modules,
            natives = stats.natives,
            memory_bytes = stats.memory_bytes,
            "script runtime stats"
        );
    }

    manager.on_terminate();
    tracing::info!("{} stopped.", config.host.title);
}
