// src/main.rs
use std::collections::BTreeMap;
use std::error::Error;
use std::fs::OpenOptions;
use std::io::Stdout;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CEvent, KeyEventKind};
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

mod app;
mod cache;
mod cluster;
mod config;
mod discovery;
mod error;
mod iib;
mod model;
mod providers;
mod report;
mod runtime;
mod ui;

use app::App;
use cache::ResultCache;
use cluster::{ClusterConnector, Endpoints, FsTargetDirectory, OpenShiftConnector, TargetDirectory};
use config::{Cli, Commands, Settings};
use error::ProviderError;
use model::{AppEvent, ClusterScope};
use providers::{DefaultProviderFactory, ProviderFactory};
use iib::IibLookup;
use runtime::{Clipboard, Runtime, SystemClipboard};
use ui::draw_ui;

type Tui = Terminal<CrosstermBackend<Stdout>>;

/// Log to a file only: the terminal belongs to the UI.
fn init_tracing(log_file: &Path) -> Result<(), Box<dyn Error>> {
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let fmt_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false);
    Registry::default().with(filter).with(fmt_layer).try_init()?;
    info!("Tracing initialized to {} (debug)", log_file.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::load();
    let settings = cli.settings.clone();
    if settings.debug {
        init_tracing(&settings.log_file)?;
    }
    info!("Starting mtv-dev");

    let directory: Arc<dyn TargetDirectory> = Arc::new(FsTargetDirectory::new(
        settings.clusters_root.clone(),
        settings.cluster_prefixes.clone(),
    ));
    let connector: Arc<dyn ClusterConnector> = Arc::new(OpenShiftConnector::new(
        settings.clusters_root.clone(),
        Endpoints::Domain(settings.cluster_domain.clone()),
        settings.cluster_timeout,
    )?);
    let factory: Arc<dyn ProviderFactory> = Arc::new(DefaultProviderFactory::new(
        settings.provider_config.clone(),
        settings.provider_timeout,
    ));

    match cli.command() {
        Commands::Tui => run_tui(&settings, directory, connector, factory).await?,
        Commands::ListClusters { output } => {
            let outcome = runtime::cluster_round(
                directory.as_ref(),
                connector,
                ClusterScope::All,
                settings.cluster_timeout,
            )
            .await?;
            print!("{}", report::clusters(&outcome, output));
        }
        Commands::ClusterPassword { name, no_copy } => {
            let password = connector.fetch_secret(&name).await?;
            println!("{password}");
            if !no_copy {
                copy_to_clipboard(&password, "Password");
            }
        }
        Commands::ClusterLogin { name, output, no_copy } => {
            let info = connector.fetch_info(&name).await?;
            let password = connector.fetch_secret(&name).await?;
            print!("{}", report::cluster_login(&info, &password, output));
            if !no_copy {
                copy_to_clipboard(&info.login_command(&password), "Login command");
            }
        }
        Commands::GetIib { mtv_version, output } => {
            let lookup = IibLookup::new(settings.datagrepper_url.clone(), settings.cluster_timeout)?;
            let builds = lookup.latest(&mtv_version).await?;
            if builds.is_empty() && output != config::OutputFormat::Json {
                eprintln!("No builds found for MTV {mtv_version}");
            }
            print!("{}", report::iib(&builds, output));
        }
        Commands::GetVms {
            provider,
            running,
            output,
            list_providers,
        } => {
            let mut configs = runtime::provider_configs(Arc::clone(&factory)).await?;
            if list_providers {
                print!("{}", report::providers(&configs, output));
                return Ok(());
            }
            if let Some(name) = provider {
                let config = configs
                    .remove(&name)
                    .ok_or_else(|| ProviderError::UnknownProvider(name.clone()))?;
                configs = BTreeMap::from([(name, config)]);
            }
            let outcome = runtime::provider_round(factory, configs, settings.provider_timeout).await;
            print!("{}", report::vms(&outcome, running, output));
        }
    }

    info!("Exiting mtv-dev");
    Ok(())
}

/// Clipboard failures only warn: the value is already on stdout.
fn copy_to_clipboard(text: &str, what: &str) {
    match SystemClipboard.copy(text) {
        Ok(()) => eprintln!("{what} copied to clipboard"),
        Err(e) => {
            warn!("Clipboard copy failed: {e}");
            eprintln!("Could not copy {} to clipboard: {e}", what.to_lowercase());
        }
    }
}

async fn run_tui(
    settings: &Settings,
    directory: Arc<dyn TargetDirectory>,
    connector: Arc<dyn ClusterConnector>,
    factory: Arc<dyn ProviderFactory>,
) -> Result<(), Box<dyn Error>> {
    // Channel for background tasks -> UI
    let (tx, mut rx) = mpsc::unbounded_channel::<AppEvent>();
    let runtime = Runtime::new(
        directory,
        connector,
        factory,
        Arc::new(SystemClipboard),
        settings.cluster_timeout,
        settings.provider_timeout,
        tx,
    );
    let mut app = App::new(
        Arc::new(ResultCache::new()),
        Arc::new(ResultCache::new()),
        settings.notification_ttl,
    );

    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    enable_raw_mode()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = event_loop(&mut terminal, &mut app, &runtime, &mut rx);

    // Cleanup runs even when the loop failed.
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

/// Feeds one event through the state machine and runs what it asks for.
/// Returns false once the app wants to quit.
fn apply(app: &mut App, runtime: &Runtime, event: AppEvent) -> bool {
    for cmd in app.update(event, Instant::now()) {
        if !runtime.execute(cmd) {
            return false;
        }
    }
    !app.quit
}

fn event_loop(
    terminal: &mut Tui,
    app: &mut App,
    runtime: &Runtime,
    rx: &mut UnboundedReceiver<AppEvent>,
) -> Result<(), Box<dyn Error>> {
    for cmd in app.init() {
        runtime.execute(cmd);
    }

    let tick_rate = Duration::from_millis(50);
    let mut last_tick = Instant::now();

    loop {
        // Advance spinner + expire notifications + redraw periodically
        if last_tick.elapsed() >= tick_rate {
            if !apply(app, runtime, AppEvent::Tick) {
                return Ok(());
            }
            terminal.draw(|f| draw_ui(f, app))?;
            last_tick = Instant::now();
        }

        // Drain background events
        while let Ok(ev) = rx.try_recv() {
            if !apply(app, runtime, ev) {
                return Ok(());
            }
        }

        // Input handling
        if event::poll(Duration::from_millis(20))? {
            let ev = match event::read()? {
                CEvent::Key(key) if key.kind == KeyEventKind::Press => AppEvent::Key(key),
                CEvent::Resize(width, height) => AppEvent::Resize(width, height),
                _ => continue,
            };
            if !apply(app, runtime, ev) {
                debug!("Quit requested");
                return Ok(());
            }
        }
    }
}
