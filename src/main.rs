mod accesslog;
mod cache;
mod compress;
mod config;
mod http;
mod limiter;
mod pool;
mod resolve;
mod server;

use std::path::PathBuf;

use clap::Parser;

use config::Config;

#[derive(Parser)]
#[command(name = "rampart", version, about = "Edge-caching HTTP/1.1 static content server")]
struct Args {
    /// Path to the configuration file.
    config: Option<PathBuf>,

    /// Enable development mode (disables DoS protection).
    #[arg(short = 'd', long = "dev")]
    dev: bool,

    /// Internal: run as a worker process with the given id.
    #[arg(long, hide = true)]
    worker: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if args.dev {
        config.server.development_mode = true;
    }

    let level = config
        .log
        .level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(level)
        .init();

    // A peer closing mid-write must surface as an I/O error, not a signal.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    if config.server.development_mode {
        tracing::warn!("DEVELOPMENT MODE ACTIVE - rate limiting disabled");
        tracing::warn!("this should never be used in production");
    }

    match args.worker {
        Some(id) => server::worker::run(id, config, args.config),
        None => server::supervisor::run(config, args.config, args.dev),
    }
}
