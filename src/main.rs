//! humansig CLI
//!
//! Passive behavioral humanness verification service.

use clap::{Parser, Subcommand};
use humansig::{
    config::Config,
    server::{self, ServerConfig},
    signal::{AnalysisEngine, AnalysisPhase, SampleEvent},
    VERSION,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "humansig")]
#[command(version = VERSION)]
#[command(about = "Passive behavioral humanness verification", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the verification API server
    Serve {
        /// Port to bind (overrides config; 0 for random)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Replay a captured sample trace through the analysis engine
    Replay {
        /// JSONL file of samples, one event per line
        input: PathBuf,

        /// Milliseconds of analysis time per tick
        #[arg(long, default_value = "16")]
        tick_ms: u64,
    },

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => cmd_serve(port).await,
        Commands::Replay { input, tick_ms } => cmd_replay(&input, tick_ms),
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    }
}

async fn cmd_serve(port: Option<u16>) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    if let Err(e) = config.ensure_directories() {
        tracing::warn!("Could not create directories: {e}");
    }

    let server_config = ServerConfig::new(
        port.unwrap_or(config.port),
        config.allowed_origins.clone(),
    );
    let (addr, shutdown_tx) = server::run(server_config).await?;

    println!("humansig v{VERSION}");
    println!("Listening on http://{addr}");
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    let _ = shutdown_tx.send(());
    Ok(())
}

/// Feed a recorded trace through the engine at a fixed tick rate and print
/// how the score evolves. Events are applied in timestamp order; each tick
/// advances analysis time by `tick_ms`.
fn cmd_replay(input: &PathBuf, tick_ms: u64) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(input)?;
    let mut events: Vec<SampleEvent> = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: SampleEvent = serde_json::from_str(line)
            .map_err(|e| anyhow::anyhow!("line {}: {e}", lineno + 1))?;
        events.push(event);
    }
    events.sort_by(|a, b| a.t().total_cmp(&b.t()));

    println!("Replaying {} events from {input:?}", events.len());

    let mut engine = AnalysisEngine::new();
    let mut now_ms = 0.0;
    let mut next_event = 0;
    let tick = tick_ms as f64;

    loop {
        while next_event < events.len() && events[next_event].t() <= now_ms {
            engine.push(events[next_event]);
            next_event += 1;
        }
        engine.tick(now_ms);

        let snapshot = engine.snapshot();
        if (now_ms as u64) % 1000 < tick_ms {
            println!(
                "[{:>6.0}ms] phase={:?} score={:.3} progress={:.0}%",
                now_ms,
                snapshot.phase,
                snapshot.overall_score,
                snapshot.progress * 100.0
            );
        }

        if snapshot.phase == AnalysisPhase::Complete {
            break;
        }
        if next_event >= events.len() && snapshot.phase == AnalysisPhase::Idle {
            println!("Trace exhausted before analysis started");
            break;
        }
        now_ms += tick;
    }

    let final_snapshot = engine.snapshot();
    println!();
    println!("Final score: {:.3}", final_snapshot.overall_score);
    println!(
        "Channels: pointer={:.3} scroll={:.3} keystroke={:.3} tremor={:.3} coherence={:.3}",
        final_snapshot.scores.pointer,
        final_snapshot.scores.scroll,
        final_snapshot.scores.keystroke,
        final_snapshot.scores.tremor,
        final_snapshot.scores.coherence
    );
    Ok(())
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
