//! Two-thread host for the worklet runtimes.
//!
//! The calling task owns the main runtime and evaluates the script; a
//! dedicated OS thread owns the UI runtime and drives the frame clock. The
//! scheduler's wake hooks are [`Notify`] handles, so each side sleeps until
//! the other enqueues work or the next frame is due.
//!
//! A vsync tick only renders when a frame was requested through the
//! [`FrameSignal`] or a mapper is still dirty; other ticks stay idle.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context as _, Result};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use worklets_common::{FrameSignal, Props, PropsCommitter, QueueScheduler, RuntimeKind};
use worklets_runtime::{Runtime, RuntimeConfig, WorkletModule};

/// Everything a single `run` needs.
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub script: PathBuf,
    /// Vsync ticks to run before shutting down
    pub frames: u32,
    pub frame_interval: Duration,
    pub config: RuntimeConfig,
    /// Delivered in order before the first frame.
    pub events: Vec<(String, JsonValue)>,
}

/// What happened during a run.
#[derive(Debug, Default)]
pub struct HostReport {
    /// Vsync ticks that elapsed
    pub frames: u32,
    /// Ticks on which a requested frame was rendered
    pub frames_rendered: u32,
    /// Worklet errors delivered to the main runtime, oldest first.
    pub errors: Vec<String>,
}

#[derive(Serialize)]
struct PropsLine<'a> {
    #[serde(rename = "viewTag")]
    view_tag: i64,
    props: &'a Props,
}

/// Writes every props commit as one JSON line.
pub struct JsonLinesCommitter<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesCommitter<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }
}

impl JsonLinesCommitter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> PropsCommitter for JsonLinesCommitter<W> {
    fn commit(&self, view_tag: i64, props: Props) {
        let line = match serde_json::to_string(&PropsLine { view_tag, props: &props }) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize props for view {}: {}", view_tag, e);
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::warn!("Failed to write props for view {}: {}", view_tag, e);
        }
    }
}

/// Parses a `name=json` event argument.
pub fn parse_event(arg: &str) -> Result<(String, JsonValue)> {
    let (name, payload) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid event '{}': expected name=json", arg))?;
    if name.is_empty() {
        return Err(anyhow!("Invalid event '{}': missing event name", arg));
    }
    let payload = serde_json::from_str(payload)
        .map_err(|e| anyhow!("Invalid JSON payload for event {}: {}", name, e))?;
    Ok((name.to_string(), payload))
}

/// Runs the script on a fresh pair of runtimes and renders the requested
/// frames.
///
/// # Errors
///
/// Returns an error if the script cannot be read or fails to evaluate, or if
/// the UI runtime cannot be created.
pub async fn run(options: HostOptions, props: Arc<dyn PropsCommitter>) -> Result<HostReport> {
    let source = std::fs::read_to_string(&options.script)
        .with_context(|| format!("Failed to read script {}", options.script.display()))?;

    let main_wake = Arc::new(Notify::new());
    let ui_wake = Arc::new(Notify::new());
    let scheduler: Arc<QueueScheduler<Runtime>> = Arc::new({
        let (ui_wake, main_wake) = (ui_wake.clone(), main_wake.clone());
        QueueScheduler::with_wakers(move || ui_wake.notify_one(), move || main_wake.notify_one())
    });
    let frames = Arc::new(FrameSignal::new());
    let module = WorkletModule::new(scheduler.clone(), frames.clone(), props);

    let mut main = Runtime::new(RuntimeKind::Main, module.clone(), options.config.clone())?;
    tracing::info!("Evaluating {}", options.script.display());
    main.eval(&source)?;

    for (name, payload) in options.events.iter().cloned() {
        module.dispatch_event(name, payload);
    }

    let ui_done = Arc::new(Notify::new());
    let ui_thread = {
        let (module, scheduler, frames, ui_wake, ui_done) =
            (module.clone(), scheduler.clone(), frames.clone(), ui_wake.clone(), ui_done.clone());
        let config = options.config.clone();
        let (count, interval) = (options.frames, options.frame_interval);
        std::thread::Builder::new()
            .name("worklets-ui".to_string())
            .spawn(move || {
                let result = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .map_err(anyhow::Error::from)
                    .and_then(|rt| {
                        rt.block_on(ui_loop(module, scheduler, frames, ui_wake, config, count, interval))
                    });
                ui_done.notify_one();
                result
            })
            .context("Failed to spawn the UI thread")?
    };

    loop {
        tokio::select! {
            _ = main_wake.notified() => {
                scheduler.trigger_js(&mut main);
                main.run_microtasks();
            }
            _ = ui_done.notified() => break,
        }
    }

    let (frames, frames_rendered) = ui_thread
        .join()
        .map_err(|_| anyhow!("UI thread panicked"))??;
    scheduler.trigger_js(&mut main);
    main.run_microtasks();

    Ok(HostReport {
        frames,
        frames_rendered,
        errors: main.reported_errors(),
    })
}

async fn ui_loop(
    module: Arc<WorkletModule>,
    scheduler: Arc<QueueScheduler<Runtime>>,
    frames: Arc<FrameSignal>,
    wake: Arc<Notify>,
    config: RuntimeConfig,
    count: u32,
    interval: Duration,
) -> Result<(u32, u32)> {
    let mut ui = Runtime::new(RuntimeKind::Ui, module, config)?;
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    let (mut ticks, mut rendered) = (0, 0);

    while ticks < count {
        tokio::select! {
            _ = wake.notified() => {
                scheduler.trigger_ui(&mut ui);
                ui.run_microtasks();
            }
            _ = ticker.tick() => {
                ticks += 1;
                scheduler.trigger_ui(&mut ui);
                ui.run_microtasks();
                if frames.take() || ui.need_run_on_render() {
                    let timestamp = started.elapsed().as_secs_f64() * 1000.0;
                    if let Err(e) = ui.on_render(timestamp) {
                        tracing::warn!("Frame {} failed: {}", ticks, e);
                    }
                    rendered += 1;
                }
            }
        }
    }

    scheduler.trigger_ui(&mut ui);
    ui.run_microtasks();
    tracing::info!("Rendered {} of {} frames", rendered, ticks);
    Ok((ticks, rendered))
}
