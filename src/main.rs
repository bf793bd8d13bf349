mod actions;
mod app;
mod aws;
mod cli;
mod config;
mod input;
mod jump_host;
mod limiter;
mod loader;
mod model;
mod service;
mod tunnel;
mod ui;

use actions::{ActionOutcome, run_action};
use anyhow::{Context, Result};
use app::{App, AppCommand};
use aws::AwsCli;
use clap::Parser;
use cli::CliArgs;
use config::{RuntimeSettings, VawsConfig};
use crossterm::event::{
    Event, EventStream, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use futures::StreamExt;
use limiter::ConcurrencyLimiter;
use loader::{LoadEvent, ResourceLoader};
use model::{LoadScope, ResourceDetail, ResourceKind};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tunnel::{TunnelEvent, TunnelOrchestrator};

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;
const LOAD_CHANNEL_CAPACITY: usize = 32;
const ACTION_CHANNEL_CAPACITY: usize = 8;

struct LoadMessage {
    kind: ResourceKind,
    generation: u64,
    event: LoadEvent<ResourceDetail>,
}

struct ActiveLoad {
    generation: u64,
    loader: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl ActiveLoad {
    fn abort(self) {
        self.forwarder.abort();
        self.loader.abort();
    }
}

/// Background machinery driven by [`AppCommand`]s.
struct Runtime {
    aws: Arc<AwsCli>,
    loader: ResourceLoader<AwsCli>,
    orchestrator: Arc<TunnelOrchestrator<AwsCli>>,
    loads: HashMap<ResourceKind, ActiveLoad>,
    load_tx: mpsc::Sender<LoadMessage>,
    action_tx: mpsc::Sender<ActionOutcome>,
    call_timeout: Duration,
}

impl Runtime {
    fn start_load(&mut self, kind: ResourceKind, scope: LoadScope, generation: u64) {
        if let Some(previous) = self.loads.remove(&kind) {
            debug!("superseding {} load", kind.title());
            previous.abort();
        }

        let (mut stream, loader) = self.loader.spawn_load(kind, scope);
        let load_tx = self.load_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                let message = LoadMessage {
                    kind,
                    generation,
                    event,
                };
                if load_tx.send(message).await.is_err() {
                    break;
                }
            }
        });
        self.loads.insert(
            kind,
            ActiveLoad {
                generation,
                loader,
                forwarder,
            },
        );
    }

    fn finish_load(&mut self, kind: ResourceKind, generation: u64) {
        if self
            .loads
            .get(&kind)
            .is_some_and(|load| load.generation == generation)
        {
            self.loads.remove(&kind);
        }
    }

    fn run_action(&self, request: actions::ActionRequest) {
        let aws = Arc::clone(&self.aws);
        let action_tx = self.action_tx.clone();
        let call_timeout = self.call_timeout;
        tokio::spawn(async move {
            let outcome = run_action(aws.as_ref(), request, call_timeout).await;
            if action_tx.send(outcome).await.is_err() {
                debug!("dropped action outcome after shutdown");
            }
        });
    }

    fn shutdown_loads(&mut self) {
        for (_, load) in self.loads.drain() {
            load.abort();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter, args.log_file.as_deref())?;

    let (config, source) = VawsConfig::load(args.config.as_deref())?;
    let profile = args
        .profile
        .clone()
        .or_else(|| std::env::var("AWS_PROFILE").ok());
    let mut settings = config.resolve(profile.as_deref(), args.concurrency, args.page_size);
    settings.source = source.map(|path| path.display().to_string());
    info!(
        "starting vaws (config: {}, concurrency: {}, page size: {})",
        settings.source.as_deref().unwrap_or("defaults"),
        settings.concurrency,
        settings.page_size
    );

    let aws = Arc::new(AwsCli::new(profile, args.region.clone()));
    let mut app = App::new(aws.profile_label().to_string(), aws.region_label());

    run(&mut app, aws, settings, args.refresh_ms.max(250)).await
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    // stdout belongs to the TUI
    let _ = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::sink).try_init(),
    };

    Ok(())
}

async fn run(
    app: &mut App,
    aws: Arc<AwsCli>,
    settings: RuntimeSettings,
    refresh_ms: u64,
) -> Result<()> {
    let (load_tx, load_rx) = mpsc::channel(LOAD_CHANNEL_CAPACITY);
    let (action_tx, action_rx) = mpsc::channel(ACTION_CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let loader = ResourceLoader::new(
        Arc::clone(&aws),
        ConcurrencyLimiter::new(settings.concurrency),
        settings.page_size,
    )
    .with_call_timeout(settings.call_timeout);
    let orchestrator = Arc::new(
        TunnelOrchestrator::new(Arc::clone(&aws), settings.jump_host_rules)
            .with_events(event_tx)
            .with_timeouts(settings.resolve_timeout, settings.establish_timeout),
    );
    let mut runtime = Runtime {
        aws,
        loader,
        orchestrator: Arc::clone(&orchestrator),
        loads: HashMap::new(),
        load_tx,
        action_tx,
        call_timeout: settings.call_timeout,
    };

    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(
        &mut terminal,
        app,
        &mut runtime,
        Channels {
            load_rx,
            action_rx,
            event_rx,
        },
        refresh_ms,
    )
    .await;
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    runtime.shutdown_loads();
    orchestrator.shutdown().await;

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            )
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

struct Channels {
    load_rx: mpsc::Receiver<LoadMessage>,
    action_rx: mpsc::Receiver<ActionOutcome>,
    event_rx: mpsc::UnboundedReceiver<TunnelEvent>,
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    runtime: &mut Runtime,
    channels: Channels,
    refresh_ms: u64,
) -> Result<()> {
    let Channels {
        mut load_rx,
        mut action_rx,
        mut event_rx,
    } = channels;
    app.set_status("Loading stacks…");
    let initial = app.request_load(app.active_kind());
    execute_app_command(app, runtime, initial);

    let mut reader = EventStream::new();
    let mut ticker = interval(Duration::from_millis(refresh_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = input::map_key(app.mode(), key) {
                            debug!("action={action:?}");
                            let command = app.apply_action(action);
                            execute_app_command(app, runtime, command);
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                app.set_tunnels(runtime.orchestrator.list_active());
                app.sync_pending(runtime.orchestrator.pending().as_ref());
                let limiter = runtime.loader.limiter();
                app.set_load_pressure(limiter.in_flight(), limiter.capacity());
                let command = app.poll_tail();
                execute_app_command(app, runtime, command);
            }
            maybe_message = load_rx.recv() => {
                if let Some(message) = maybe_message {
                    apply_load_message(app, runtime, message);
                }
            }
            maybe_outcome = action_rx.recv() => {
                if let Some(outcome) = maybe_outcome {
                    app.apply_action_outcome(outcome);
                }
            }
            maybe_event = event_rx.recv() => {
                if let Some(event) = maybe_event {
                    app.apply_tunnel_event(&event);
                    app.set_tunnels(runtime.orchestrator.list_active());
                }
            }
        }
    }

    Ok(())
}

fn apply_load_message(app: &mut App, runtime: &mut Runtime, message: LoadMessage) {
    let LoadMessage {
        kind,
        generation,
        event,
    } = message;
    match event {
        LoadEvent::Batch(batch) => {
            if !app.apply_batch(kind, generation, batch) {
                debug!("dropped stale {} batch (generation {generation})", kind.title());
            }
        }
        LoadEvent::Finished(report) => {
            debug!(
                "{} load finished: {} pages, {} items, {} dropped",
                kind.title(),
                report.pages,
                report.items,
                report.dropped
            );
            app.finish_load(kind, generation, report);
            runtime.finish_load(kind, generation);
        }
        LoadEvent::Failed(error) => {
            app.fail_load(kind, generation, &error);
            runtime.finish_load(kind, generation);
        }
    }
}

fn execute_app_command(app: &mut App, runtime: &mut Runtime, command: AppCommand) {
    match command {
        AppCommand::None => {}
        AppCommand::Load {
            kind,
            scope,
            generation,
        } => {
            runtime.start_load(kind, scope, generation);
        }
        AppCommand::SwitchRegion {
            region,
            kind,
            generation,
        } => {
            info!("switching region to {region}");
            runtime.shutdown_loads();
            runtime.aws.set_region(&region);
            runtime.start_load(kind, LoadScope::All, generation);
        }
        AppCommand::RunAction(request) => runtime.run_action(request),
        AppCommand::StartTunnel(request) => {
            let orchestrator = Arc::clone(&runtime.orchestrator);
            tokio::spawn(async move {
                if let Err(error) = orchestrator.start_tunnel(request).await {
                    debug!("tunnel start ended: {error}");
                }
            });
        }
        AppCommand::StopTunnel(id) => {
            if runtime.orchestrator.get(id).is_none() {
                app.set_status(format!("No tunnel {id}"));
                return;
            }
            let orchestrator = Arc::clone(&runtime.orchestrator);
            tokio::spawn(async move {
                if let Err(error) = orchestrator.stop_tunnel(id).await {
                    warn!("failed to stop tunnel {id}: {error}");
                }
            });
        }
        AppCommand::CancelPendingTunnel => {
            if !runtime.orchestrator.cancel_pending() {
                app.set_status("No pending tunnel to cancel");
            }
        }
    }
}
