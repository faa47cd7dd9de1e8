//! CLI Entry Point for nfs-scanner
//!
//! Provides command-line access to:
//! - One-off scans and the persisted scan queue (mock hardware)
//! - Task listing and manifests
//! - Heatmap rendering and CSV/PNG export of stored traces
//!
//! # Usage
//!
//! ```bash
//! nfs-scanner scan --x-min 0 --x-max 2 --y-min 0 --y-max 2 --step 1
//! nfs-scanner queue add --step 0.5 --traces Trc1_S21
//! nfs-scanner queue run
//! nfs-scanner export <task-id> Trc1_S21
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use nfs_scanner::config::ScannerConfig;
use nfs_scanner::export::{export_heatmap_png, export_task_trace, render_task_trace};
use nfs_scanner::hardware::mock::{MockInstrument, MockMotion};
use nfs_scanner::hardware::Instrument;
use nfs_scanner::logging;
use nfs_scanner::paths::AppPaths;
use nfs_scanner::render::LutRegistry;
use nfs_scanner::scan::{
    JsonTaskLedger, QueueController, ScanEvent, ScanJob, ScanParams, ScanQueue, ScanRunner,
    TaskDir, TaskLedger, TraceInfo,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "nfs-scanner")]
#[command(about = "Near-field scanner: raster acquisition, scan queue and heatmaps", long_about = None)]
struct Cli {
    /// Configuration file (default: <home>/config/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Application home directory
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),

    /// List the traces the instrument offers
    Traces,

    /// Run one scan now
    Scan(ScanArgs),

    /// Manage and run the scan queue
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Inspect recorded tasks
    #[command(subcommand)]
    Tasks(TasksCommand),

    /// Render one trace of a task to PNG
    Render {
        task_id: String,
        trace: String,
        /// Output file (default: <task>/exports/heatmap_<trace>.png)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Colour map name
        #[arg(long)]
        lut: Option<String>,
        /// Leave out the colourbar
        #[arg(long)]
        no_colorbar: bool,
    },

    /// Write the CSV table and PNG heatmap of one trace
    Export { task_id: String, trace: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write the effective configuration to the config file
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Enqueue a scan request
    Add(ScanArgs),
    /// List queue items
    List {
        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Mark a waiting item skipped
    Skip { id: String },
    /// Remove an item (not while it runs)
    Delete { id: String },
    /// Execute queued items one at a time until none remain
    Run,
}

#[derive(Subcommand)]
enum TasksCommand {
    /// Most recent tasks first
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Ledger record and manifest of one task
    Show { id: String },
}

/// Scan area overrides; unset values come from `scan.defaults`.
#[derive(Args)]
struct ScanArgs {
    #[arg(long, allow_hyphen_values = true)]
    x_min: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    x_max: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    y_min: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    y_max: Option<f64>,
    #[arg(long)]
    step: Option<f64>,
    #[arg(long)]
    z_height: Option<f64>,
    #[arg(long)]
    feed: Option<f64>,
    #[arg(long)]
    freq: Option<f64>,
    /// Comma-separated trace names (default: all)
    #[arg(long, value_delimiter = ',')]
    traces: Vec<String>,
}

impl ScanArgs {
    fn params(&self, defaults: ScanParams) -> ScanParams {
        ScanParams {
            x_min: self.x_min.unwrap_or(defaults.x_min),
            x_max: self.x_max.unwrap_or(defaults.x_max),
            y_min: self.y_min.unwrap_or(defaults.y_min),
            y_max: self.y_max.unwrap_or(defaults.y_max),
            step: self.step.unwrap_or(defaults.step),
            z_height: self.z_height.unwrap_or(defaults.z_height),
            feed: self.feed.unwrap_or(defaults.feed),
            freq: self.freq.unwrap_or(defaults.freq),
        }
    }
}

/// Resolved configuration, directories and mock drivers.
struct App {
    config: ScannerConfig,
    paths: AppPaths,
    config_file: PathBuf,
    motion: Arc<MockMotion>,
    instrument: Arc<MockInstrument>,
}

impl App {
    fn load(cli: &Cli) -> Result<Self> {
        let mut paths = AppPaths::resolve(cli.home.as_deref());
        let config_file = cli.config.clone().unwrap_or_else(|| paths.config_file());
        let mut config = ScannerConfig::load_from(&config_file)
            .with_context(|| format!("loading {}", config_file.display()))?;
        if let Some(level) = &cli.log_level {
            config.application.log_level = level.clone();
        }
        if cli.home.is_none() {
            if let Some(home) = &config.storage.home {
                paths = AppPaths::from_home(home.clone());
            }
        }
        paths.ensure()?;
        Ok(Self {
            config,
            paths,
            config_file,
            motion: Arc::new(MockMotion::new()),
            instrument: Arc::new(MockInstrument::new()),
        })
    }

    fn luts(&self) -> LutRegistry {
        let dir = self
            .config
            .visualization
            .lut_dir
            .clone()
            .unwrap_or_else(|| self.paths.colormaps_dir());
        LutRegistry::with_dir(dir)
    }

    fn ledger(&self) -> Result<Arc<JsonTaskLedger>> {
        Ok(Arc::new(JsonTaskLedger::open(self.paths.ledger_file())?))
    }

    fn queue(&self) -> Result<Arc<ScanQueue>> {
        Ok(Arc::new(ScanQueue::open(self.paths.queue_file())?))
    }

    /// Instrument traces filtered to `names` (all when empty).
    async fn select_traces(&self, names: &[String]) -> Result<Vec<TraceInfo>> {
        let available = self.instrument.list_traces().await?;
        if names.is_empty() {
            return Ok(available);
        }
        names
            .iter()
            .map(|name| {
                available
                    .iter()
                    .find(|t| &t.name == name)
                    .cloned()
                    .with_context(|| format!("unknown trace '{name}'"))
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app = App::load(&cli)?;
    logging::init_from_config(&app.config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Config(cmd) => config_command(&app, cmd),
        Commands::Traces => list_traces(&app).await,
        Commands::Scan(args) => run_scan(&app, args).await,
        Commands::Queue(cmd) => queue_command(&app, cmd).await,
        Commands::Tasks(cmd) => tasks_command(&app, cmd),
        Commands::Render {
            task_id,
            trace,
            out,
            lut,
            no_colorbar,
        } => render(&app, &task_id, &trace, out, lut, !no_colorbar),
        Commands::Export { task_id, trace } => export(&app, &task_id, &trace),
    }
}

fn config_command(app: &App, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Init { force } => {
            if app.config_file.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    app.config_file.display()
                );
            }
            app.config.save_to(&app.config_file)?;
            println!("✅ Wrote {}", app.config_file.display());
        }
        ConfigCommand::Show => {
            println!("# {}", app.config_file.display());
            print!("{}", toml::to_string_pretty(&app.config)?);
        }
    }
    Ok(())
}

async fn list_traces(app: &App) -> Result<()> {
    for t in app.instrument.list_traces().await? {
        println!("{:<16} {:<6} {}", t.name, t.kind, t.unit_or_default());
    }
    Ok(())
}

fn print_event(item: Option<&str>, event: &ScanEvent) {
    let prefix = item.map(|id| format!("[{id}] ")).unwrap_or_default();
    match event {
        ScanEvent::Progress { done, total } => eprintln!("{prefix}{done}/{total}"),
        ScanEvent::Status(text) => eprintln!("{prefix}{text}"),
        ScanEvent::Finished { task_id, ok, message } => {
            let mark = if *ok { "✅" } else { "❌" };
            eprintln!("{prefix}{mark} task {task_id}: {message}");
        }
    }
}

async fn run_scan(app: &App, args: ScanArgs) -> Result<()> {
    let params = args.params(app.config.scan.defaults);
    let traces = app.select_traces(&args.traces).await?;
    let settings = app.config.scan.run_settings();

    let job = ScanJob::new(params, traces, app.paths.scans.clone());
    println!("▶️  Scan {} ({} points)", job.task_id, params.point_count());

    let runner = ScanRunner::new(job, app.motion.clone(), app.instrument.clone())
        .with_ledger(app.ledger()?)
        .with_pause_poll(settings.pause_poll)
        .with_point_timeout(settings.point_timeout);
    let mut handle = runner.spawn(settings.event_capacity);

    let control = handle.control.clone();
    let stopper = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            control.request_stop();
        }
    });

    while let Some(event) = handle.events.recv().await {
        print_event(None, &event);
    }
    let outcome = handle.wait().await?;
    stopper.abort();

    if outcome.ok {
        println!("{}", outcome.task_id);
        Ok(())
    } else {
        bail!("scan {} failed: {}", outcome.task_id, outcome.message)
    }
}

async fn queue_command(app: &App, cmd: QueueCommand) -> Result<()> {
    let queue = app.queue()?;
    match cmd {
        QueueCommand::Add(args) => {
            let params = args.params(app.config.scan.defaults);
            params.validate()?;
            let traces = app.select_traces(&args.traces).await?;
            let id = queue.add(params, traces)?;
            println!("{id}");
        }
        QueueCommand::List { limit } => {
            for item in queue.list(limit) {
                println!(
                    "{}  {:<8}  {}  task={}  {}",
                    item.id,
                    item.status,
                    item.created_at.format("%Y-%m-%d %H:%M:%S"),
                    item.task_id.as_deref().unwrap_or("-"),
                    item.message
                );
            }
        }
        QueueCommand::Skip { id } => queue.skip(&id)?,
        QueueCommand::Delete { id } => queue.delete(&id)?,
        QueueCommand::Run => {
            let settings = app.config.scan.run_settings();
            let controller = Arc::new(
                QueueController::new(
                    queue,
                    app.motion.clone(),
                    app.instrument.clone(),
                    app.paths.scans.clone(),
                )
                .with_ledger(app.ledger()?)
                .with_settings(settings),
            );

            let (tx, mut rx) = mpsc::channel::<(String, ScanEvent)>(settings.event_capacity);
            let printer = tokio::spawn(async move {
                while let Some((id, event)) = rx.recv().await {
                    print_event(Some(&id), &event);
                }
            });
            let halter = {
                let controller = controller.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        controller.halt();
                    }
                })
            };

            let summary = controller.run_all(Some(tx)).await?;
            halter.abort();
            printer.await?;
            println!("Queue drained: {} done, {} failed", summary.done, summary.failed);
        }
    }
    Ok(())
}

fn tasks_command(app: &App, cmd: TasksCommand) -> Result<()> {
    let ledger = app.ledger()?;
    match cmd {
        TasksCommand::List { limit } => {
            for task in ledger.list_tasks(limit)? {
                println!(
                    "{}  {:<7}  {}  {:>6} pts  {}",
                    task.id, task.status, task.created_at, task.point_count, task.name
                );
            }
        }
        TasksCommand::Show { id } => {
            if let Some(task) = ledger.get_task(&id)? {
                println!("{}", serde_json::to_string_pretty(&task)?);
            }
            let dir = TaskDir::open(&app.paths.scans, &id)?;
            let manifest = dir.read_manifest()?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            for trace in dir.trace_store()?.list()? {
                println!("trace: {trace}");
            }
        }
    }
    Ok(())
}

fn render(
    app: &App,
    task_id: &str,
    trace: &str,
    out: Option<PathBuf>,
    lut: Option<String>,
    colorbar: bool,
) -> Result<()> {
    let task = TaskDir::open(&app.paths.scans, task_id)?;
    let mut opts = app.config.visualization.render_options(colorbar);
    if let Some(lut) = lut {
        opts.lut = lut;
    }
    let (_, heatmap) = render_task_trace(&task, trace, &app.luts(), &opts)?;
    let out = out.unwrap_or_else(|| task.png_export_path(trace));
    export_heatmap_png(&heatmap, &out)?;
    println!(
        "{} ({}x{}, vmin={}, vmax={})",
        out.display(),
        heatmap.width,
        heatmap.height,
        heatmap.vmin,
        heatmap.vmax
    );
    Ok(())
}

fn export(app: &App, task_id: &str, trace: &str) -> Result<()> {
    let task = TaskDir::open(&app.paths.scans, task_id)?;
    let result = export_task_trace(&task, trace, &app.luts(), &app.config.visualization)?;
    println!("{}", result.csv.display());
    println!("{}", result.png.display());
    Ok(())
}
