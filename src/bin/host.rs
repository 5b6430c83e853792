//! sim-control-host binary
//!
//! Runs the reference engine and serves it to one client at a time over a
//! FIFO pair or over HTTP.
//!
//! ## Configuration (CLI / env / TOML via `config` crate)
//!
//! | Key / flag                  | Default           | Description                        |
//! |-----------------------------|-------------------|------------------------------------|
//! | `--transport`, `SIM_HOST_TRANSPORT` | `http`    | `http` or `pipe`                   |
//! | `--bind`, `SIM_HOST_BIND`   | `127.0.0.1:8200`  | HTTP listen address                |
//! | `--to-engine`, `SIM_HOST_TO_ENGINE` | `/tmp/sim-control.in` | FIFO the client writes to |
//! | `--from-engine`, `SIM_HOST_FROM_ENGINE` | `/tmp/sim-control.out` | FIFO the client reads from |
//! | `--config`, `SIM_HOST_CONFIG` | *(none)*        | TOML file with `EngineConfig` keys |
//! | `SIM_HOST_ENGINE__<KEY>`    |                   | overrides one `EngineConfig` key   |
//! | `--scene`, `--width`, `--height` |              | override the file / env values     |

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sim_control::engine::Engine;
use sim_control::host::{serve_fifos, serve_http, HostState};
use sim_control::types::EngineConfig;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportKind {
    Http,
    Pipe,
}

#[derive(Parser, Debug)]
#[command(name = "sim-control-host", about = "Sim Control engine host", version)]
struct Args {
    /// Transport to serve on
    #[arg(long, env = "SIM_HOST_TRANSPORT", value_enum, default_value = "http")]
    transport: TransportKind,

    /// HTTP listen address
    #[arg(long, env = "SIM_HOST_BIND", default_value = "127.0.0.1:8200")]
    bind: String,

    /// FIFO carrying actions into the engine
    #[arg(long, env = "SIM_HOST_TO_ENGINE", default_value = "/tmp/sim-control.in")]
    to_engine: PathBuf,

    /// FIFO carrying responses out of the engine
    #[arg(long, env = "SIM_HOST_FROM_ENGINE", default_value = "/tmp/sim-control.out")]
    from_engine: PathBuf,

    /// Engine configuration file (TOML)
    #[arg(long, env = "SIM_HOST_CONFIG")]
    config: Option<PathBuf>,

    /// Scene loaded at start-up
    #[arg(long)]
    scene: Option<String>,

    /// Initial frame width
    #[arg(long)]
    width: Option<u32>,

    /// Initial frame height
    #[arg(long)]
    height: Option<u32>,
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = &args.config {
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }
    let mut engine: EngineConfig = builder
        .add_source(config::Environment::with_prefix("SIM_HOST_ENGINE").separator("__"))
        .build()
        .context("reading engine configuration")?
        .try_deserialize()
        .context("parsing engine configuration")?;

    if let Some(scene) = &args.scene {
        engine.scene = scene.clone();
    }
    if let Some(width) = args.width {
        engine.width = width;
    }
    if let Some(height) = args.height {
        engine.height = height;
    }
    Ok(engine)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sim_control=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    log::info!(
        "Starting sim-control-host (transport={:?}, scene='{}', {}x{})",
        args.transport,
        config.scene,
        config.width,
        config.height,
    );

    let engine = Engine::new(config).context("starting engine")?;

    match args.transport {
        TransportKind::Http => {
            let listener = tokio::net::TcpListener::bind(&args.bind)
                .await
                .with_context(|| format!("binding {}", args.bind))?;
            let state = HostState::new(engine);
            tokio::select! {
                served = serve_http(listener, state) => served.context("serving http")?,
                _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
            }
        }
        TransportKind::Pipe => {
            let (to_engine, from_engine) = (args.to_engine.clone(), args.from_engine.clone());
            let sessions = tokio::task::spawn_blocking(move || -> Result<()> {
                let mut engine = engine;
                loop {
                    serve_fifos(&mut engine, &to_engine, &from_engine)
                        .context("serving fifo session")?;
                }
            });
            tokio::select! {
                done = sessions => done.context("fifo host thread")??,
                _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
            }
        }
    }

    log::info!("sim-control-host stopped");
    Ok(())
}
