//! `media-server` process entrypoint.
//!
//! Mirrors `examples/mrecords121-ephyr`'s `main.rs`: parse [`cli::Opts`],
//! load configuration, initialize the global logger, then hand off to the
//! async server entrypoint. Exit code 1 on a failure that occurs before the
//! logger is up (missing/invalid configuration); 1 again if the server
//! exits with an error once running, 0 on a clean shutdown (spec §6
//! "Process exit codes").

use media_server::cli::Opts;
use media_server::config::Config;
use media_server::server::{self, AppState};
use media_server::task::TaskManager;
use std::sync::Arc;
use structopt::StructOpt;

fn main() {
    let opts = Opts::from_args();

    let mut config = match Config::load(&opts.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {e}", opts.config.display());
            std::process::exit(1);
        }
    };
    if let Some(level) = opts.verbose {
        config.log.level = level;
    }

    let _guard = match mediasrv_log::init(&config.log) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            std::process::exit(1);
        }
    };

    let system = actix_rt::System::new();
    if let Err(e) = system.block_on(run(config)) {
        slog_scope::error!("media-server exited with an error"; "error" => %e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let tasks = TaskManager::new(config.max_tasks, config.max_queue);
    let state = AppState {
        tasks: tasks.clone(),
        config: Arc::clone(&config),
    };

    server::run(state).await?;
    tasks.shutdown();
    Ok(())
}
