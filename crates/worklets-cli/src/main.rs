//! # Worklets CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Run 60 frame ticks at ~60fps
//! worklets run -s animation.js
//!
//! # Deliver a scroll event before the first frame, run 3 frame ticks
//! worklets run -s scroll.js --frames 3 --event 'onScroll={"y":120}'
//!
//! # Inspect the output
//! worklets run -s animation.js | jq '.props'
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;
use worklets_cli::host::{self, HostOptions, JsonLinesCommitter};
use worklets_runtime::{ResourceLimits, RuntimeConfig};

#[derive(FromArgs)]
/// Worklets - run scripts against a main and a UI JavaScript runtime
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Run(RunArgs),
}

/// Arguments for running a script.
///
/// The script is evaluated on the main runtime, where the `worklets` global
/// is available. Worklets, mappers and event handlers it starts run on the
/// UI runtime.
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
/// run a script and render frames
struct RunArgs {
    /// path to the JavaScript file to evaluate on the main runtime
    #[argh(option, short = 's')]
    script: String,

    /// number of vsync ticks to run before exiting; frames render only when requested
    #[argh(option, default = "60")]
    frames: u32,

    /// time between frames in milliseconds
    #[argh(option, long = "frame-interval-ms", default = "16")]
    frame_interval_ms: u64,

    /// optional cap on the iterations of any single loop
    ///
    /// Guards the UI thread against runaway worklets.
    #[argh(option, long = "max-loop-iterations")]
    max_loop_iterations: Option<u64>,

    /// event to deliver before the first frame, as name=json
    ///
    /// Can be given multiple times; events are delivered in order.
    #[argh(option, long = "event")]
    events: Vec<String>,
}

impl RunArgs {
    fn into_options(self) -> Result<HostOptions> {
        if self.frame_interval_ms == 0 {
            return Err(anyhow::anyhow!("--frame-interval-ms must be greater than zero"));
        }

        let mut limits = ResourceLimits::new();
        if let Some(limit) = self.max_loop_iterations {
            limits = limits.with_loop_iteration_limit(limit);
        }
        let config = RuntimeConfig::new().with_limits(limits);
        config.validate().map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

        let events = self
            .events
            .iter()
            .map(|event| host::parse_event(event))
            .collect::<Result<Vec<_>>>()?;

        Ok(HostOptions {
            script: PathBuf::from(self.script),
            frames: self.frames,
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            config,
            events,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Logs go to stderr, stdout carries only props lines.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Running script: {}", args.script);
            let options = args.into_options()?;
            let report = host::run(options, Arc::new(JsonLinesCommitter::stdout())).await?;
            if !report.errors.is_empty() {
                tracing::warn!("{} worklet error(s) were reported", report.errors.len());
            }
            Ok(())
        }
    }
}
