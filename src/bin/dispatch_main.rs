// dispatch_main.rs
use clap::Parser;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::process::ExitCode;
use taxi_dispatch::config::SimConfig;
use taxi_dispatch::error::SimError;
use taxi_dispatch::intake::{Command, CommandParser};
use taxi_dispatch::monitoring::telemetry::{run_monitor, TelemetrySender};
use taxi_dispatch::simulation_engine::map_loader::MapLayout;
use taxi_dispatch::simulation_engine::simulation::Simulation;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Duration;

/// Runs the taxi fleet simulation and reads requests and road commands from
/// standard input, one per line:
/// `(r,c)(r,c)`, `open(r,c)(r,c)`, `close(r,c)(r,c)` or `status`.
#[derive(Parser, Debug)]
#[command(version, about)]
struct InputArgs {
    /// JSON file overriding the default settings.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Road map file. A random map is generated when omitted.
    #[arg(long)]
    map: Option<PathBuf>,
    /// Crossing file marking planar (1) and grade-separated (0) cells.
    #[arg(long, requires = "map")]
    cross: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    /// Append telemetry events to this CSV file.
    #[arg(long)]
    csv: Option<PathBuf>,
}

fn load_setup(args: &InputArgs) -> Result<(SimConfig, MapLayout), SimError> {
    let mut config = match &args.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.csv.is_some() {
        config.telemetry_csv = args.csv.clone();
    }
    let layout = match &args.map {
        Some(path) => MapLayout::load(path, args.cross.as_deref())?,
        None => {
            let mut rng = SmallRng::seed_from_u64(config.seed);
            MapLayout::generate(config.rows, config.cols, &mut rng)
        }
    };
    Ok((config, layout))
}

fn handle_line(sim: &Simulation, parser: &CommandParser, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    match parser.parse(line) {
        Ok(Command::Request {
            origin,
            destination,
        }) => {
            if let Err(e) = sim.submit_request(origin, destination) {
                log::warn!("request {line:?} refused: {e}");
            }
        }
        Ok(Command::Open(a, b)) => {
            if let Err(e) = sim.open_road(a, b) {
                log::warn!("cannot open {a}<->{b}: {e}");
            }
        }
        Ok(Command::Close(a, b)) => {
            if let Err(e) = sim.close_road(a, b) {
                log::warn!("cannot close {a}<->{b}: {e}");
            }
        }
        Ok(Command::Status) => {
            let idle = sim.idle_report();
            log::info!("{} idle taxis", idle.len());
            for taxi in idle {
                log::info!("  {} at {} credit {}", taxi.id, taxi.position, taxi.credit);
            }
        }
        Err(e) => log::warn!("{e}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = InputArgs::parse();

    let (config, layout) = match load_setup(&args) {
        Ok(setup) => setup,
        Err(e) => {
            log::error!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let parser = match CommandParser::new() {
        Ok(parser) => parser,
        Err(e) => {
            log::error!("command patterns failed to compile: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (telemetry, events) = TelemetrySender::channel();
    let monitor = tokio::spawn(run_monitor(events, config.telemetry_csv.clone()));

    let sim = match Simulation::new(config, &layout, telemetry) {
        Ok(sim) => sim,
        Err(e) => {
            log::error!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut tasks = sim.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let code = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&sim, &parser, &line),
                Ok(None) => {
                    log::info!("input closed, shutting down");
                    break ExitCode::SUCCESS;
                }
                Err(e) => {
                    log::error!("failed to read input: {e}");
                    break ExitCode::FAILURE;
                }
            },
            Some(finished) = tasks.join_next() => {
                match finished {
                    Ok(Err(e)) => log::error!("simulation stopped: {e}"),
                    Ok(Ok(())) => log::error!("simulation task ended unexpectedly"),
                    Err(e) => log::error!("simulation task panicked: {e}"),
                }
                break ExitCode::FAILURE;
            }
        }
    };

    tasks.shutdown().await;
    drop(sim);
    // pending dispatches still hold senders; give the monitor a moment to drain
    let _ = tokio::time::timeout(Duration::from_secs(1), monitor).await;
    code
}
