//! Binary entry point for the portmesh service.
#![forbid(unsafe_code)]

#[path = "portmesh/ui.rs"]
mod ui;

use std::error::Error;
use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use portmesh::{
    api,
    config::ServiceConfig,
    load::{self, LoadPlan},
    reconciler::ReconcilerStats,
    Reconciler, WidgetService,
};
use serde::Serialize;
use tokio::task;

use ui::{ColorMode, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "portmesh",
    version,
    about = "Widget port graph with a write-behind cache",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "PORTMESH_CONFIG",
        value_name = "FILE",
        help = "Config file (defaults to <config dir>/portmesh/portmesh.toml)"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = ColorMode::Auto, help = "Color summaries")]
    color: ColorMode,

    #[arg(long, global = true, help = "Plain, unadorned output")]
    quiet: bool,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for summaries"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and the reconciler.
    Serve(ServeCmd),
    /// Write random associations in-process and report throughput.
    Load(LoadCmd),
    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
struct ServeCmd {
    #[arg(long, env = "PORTMESH_HOST", help = "Override [api] host")]
    host: Option<IpAddr>,

    #[arg(long, env = "PORTMESH_PORT", help = "Override [api] port")]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct LoadCmd {
    #[arg(long, default_value_t = 1000, help = "Widget pool size")]
    widgets: usize,

    #[arg(long, default_value_t = 10_000, help = "Associations to write")]
    associations: usize,

    #[arg(long, default_value_t = 0, help = "RNG seed")]
    seed: u64,

    #[arg(long, help = "Do not create the pool widgets first")]
    skip_create: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct LoadSummary {
    widgets_created: usize,
    associations: usize,
    elapsed_ms: u64,
    throughput_per_sec: f64,
    pending_before_flush: usize,
    reconciler: ReconcilerStats,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let ui = Ui::new(cli.color, cli.quiet);

    match cli.command {
        Command::Serve(cmd) => {
            api::install_tracing_subscriber();
            let config = ServiceConfig::load(cli.config)?;
            let mut options = config.api_options();
            if let Some(host) = cmd.host {
                options.host = host;
            }
            if let Some(port) = cmd.port {
                options.port = port;
            }
            let service = open_service(&config)?;
            let reconciler = Reconciler::new(
                service.fast().clone(),
                service.durable().clone(),
                config.reconciler_config(),
            )
            .spawn();
            if let Some(stats) = api::serve(options, service, Some(reconciler)).await? {
                emit(cli.format, &stats, || print_stats(&ui, &stats))?;
            }
        }
        Command::Load(cmd) => {
            let config = ServiceConfig::load(cli.config)?;
            let service = open_service(&config)?;
            let reconciler = Reconciler::new(
                service.fast().clone(),
                service.durable().clone(),
                config.reconciler_config(),
            )
            .spawn();

            let plan = LoadPlan {
                widgets: cmd.widgets,
                associations: cmd.associations,
                seed: cmd.seed,
                create_widgets: !cmd.skip_create,
            };
            let pb = ui.progress(plan.associations as u64, "associations");
            let bar = pb.clone();
            let worker = service.clone();
            let report = task::spawn_blocking(move || {
                load::run(&worker, &plan, |count, window| {
                    bar.set_position(count as u64);
                    bar.set_message(format!(
                        "{:.0}/s",
                        load::REPORT_EVERY as f64 / window.as_secs_f64().max(f64::EPSILON)
                    ));
                    tracing::debug!(count, window_ms = window.as_millis() as u64, "load.progress");
                })
            })
            .await??;
            pb.finish_and_clear();

            let pending = service.fast().pending_len()?;
            let stats = reconciler.shutdown_and_flush().await;
            let summary = LoadSummary {
                widgets_created: report.widgets_created,
                associations: report.associations,
                elapsed_ms: report.elapsed.as_millis() as u64,
                throughput_per_sec: report.throughput(),
                pending_before_flush: pending,
                reconciler: stats,
            };
            emit(cli.format, &summary, || print_load(&ui, &summary))?;
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "portmesh", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn open_service(config: &ServiceConfig) -> Result<WidgetService, Box<dyn Error>> {
    Ok(WidgetService::new(
        config.open_fast_store()?,
        config.open_durable_store()?,
    ))
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_load(ui: &Ui, summary: &LoadSummary) {
    ui.success(&format!(
        "wrote {} associations in {:.2}s",
        summary.associations,
        summary.elapsed_ms as f64 / 1000.0
    ));
    ui.section(
        "Load",
        [
            ("widgets created", summary.widgets_created.to_string()),
            ("associations", summary.associations.to_string()),
            ("throughput", format!("{:.0}/s", summary.throughput_per_sec)),
            ("pending before flush", summary.pending_before_flush.to_string()),
        ],
    );
    print_stats(ui, &summary.reconciler);
}

fn print_stats(ui: &Ui, stats: &ReconcilerStats) {
    ui.section(
        "Reconciler",
        [
            ("cycles", stats.cycles),
            ("batches persisted", stats.batches_persisted),
            ("records persisted", stats.records_persisted),
            ("retrieve failures", stats.retrieve_failures),
            ("persist failures", stats.persist_failures),
            ("records dropped", stats.records_dropped),
            ("records requeued", stats.records_requeued),
        ],
    );
    if stats.cycles == 0 {
        ui.info("reconciler never ran");
    }
}
