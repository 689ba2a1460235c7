use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use farmbot_client::command::{CorrelationTracker, ExecutorConfig, ReplyRouter};
use farmbot_client::connection::SessionConfig;
use farmbot_client::shared::{limits, RpcReply};
use farmbot_client::sweep::{run_sweep, LocationLog, SweepPlan};
use farmbot_client::transport::{BusTransport, LoopbackBus};
use farmbot_client::FarmbotClient;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Drive a FarmBot over its MQTT RPC channel
#[derive(Parser, Debug)]
#[command(name = "farmbot", version)]
struct Cli {
    /// Device identity (broker username)
    #[arg(long, env = "FARMBOT_DEVICE_ID")]
    device_id: Option<String>,

    /// Device token (broker password)
    #[arg(long, env = "FARMBOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Broker host
    #[arg(long, default_value = "clever-octopus.rmq.cloudamqp.com")]
    broker: String,

    /// Broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// Attempts per request
    #[arg(long, default_value_t = limits::MAX_ATTEMPTS)]
    attempts: u32,

    /// Also append plain-text logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log request/reply traffic
    #[arg(short, long)]
    verbose: bool,

    /// Use an in-process device that accepts every request
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Move to an absolute position (clamped to the device envelope)
    #[command(allow_negative_numbers = true)]
    Move {
        #[arg(value_parser = finite)]
        x: f64,
        #[arg(value_parser = finite)]
        y: f64,
        #[arg(value_parser = finite)]
        z: f64,
        #[arg(long, default_value_t = limits::DEFAULT_SPEED)]
        speed: u32,
    },
    /// Take a photo at the current position
    Photo,
    /// Sweep the bed in a zig-zag, taking a photo at each stop
    Sweep {
        #[command(flatten)]
        plan: PlanArgs,
        /// Directory the visited positions are written to
        #[arg(long, default_value = "img/locations")]
        locations: PathBuf,
        /// Print the stops and exit without driving the device
        #[arg(long)]
        plan_only: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct PlanArgs {
    #[arg(long, default_value_t = 0)]
    min_x: i64,
    #[arg(long, default_value_t = 1300)]
    max_x: i64,
    #[arg(long, default_value_t = 0)]
    min_y: i64,
    #[arg(long, default_value_t = 1000)]
    max_y: i64,
    #[arg(long, default_value_t = 1000)]
    delta: i64,
    #[arg(long, default_value_t = 0)]
    offset: i64,
    /// Sweep height
    #[arg(long, default_value_t = 0)]
    height: i64,
}

impl From<&PlanArgs> for SweepPlan {
    fn from(args: &PlanArgs) -> Self {
        SweepPlan {
            min_x: args.min_x,
            max_x: args.max_x,
            min_y: args.min_y,
            max_y: args.max_y,
            delta: args.delta,
            offset: args.offset,
            z: args.height,
        }
    }
}

fn finite(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Err(format!("{} is not a finite number", s)),
        Err(e) => Err(e.to_string()),
    }
}

const DRY_RUN_DEVICE: &str = "dry-run";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_deref())?;

    if let Action::Sweep {
        plan,
        plan_only: true,
        ..
    } = &cli.action
    {
        for (x, y) in SweepPlan::from(plan).points() {
            println!("{} {} {}", x, y, plan.height);
        }
        return Ok(());
    }

    let config = ExecutorConfig {
        max_attempts: cli.attempts,
        ..Default::default()
    };

    let ok = if cli.dry_run {
        info!("Dry run: requests are answered in-process");
        let tracker = Arc::new(CorrelationTracker::new());
        let bus = Arc::new(LoopbackBus::always(
            ReplyRouter::new(DRY_RUN_DEVICE, tracker.clone()),
            RpcReply::OK,
        ));
        let client = FarmbotClient::with_transport(bus, tracker, DRY_RUN_DEVICE, config);
        run(&client, &cli.action).await?
    } else {
        let device_id = cli
            .device_id
            .clone()
            .ok_or_else(|| anyhow!("--device-id or FARMBOT_DEVICE_ID is required"))?;
        let token = cli
            .token
            .clone()
            .ok_or_else(|| anyhow!("--token or FARMBOT_TOKEN is required"))?;

        let session = SessionConfig {
            broker_host: cli.broker.clone(),
            broker_port: cli.port,
            ..SessionConfig::new(device_id, token)
        };
        let client = FarmbotClient::connect(session, config);
        run(&client, &cli.action).await?
    };

    if !ok {
        bail!("request did not succeed");
    }
    Ok(())
}

/// Run `action`, then shut the session down whatever happened
async fn run<T: BusTransport>(client: &FarmbotClient<T>, action: &Action) -> anyhow::Result<bool> {
    let result = tokio::select! {
        result = drive(client, action) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; abandoning the request in flight");
            Ok(false)
        }
    };

    if let Err(e) = client.shutdown().await {
        error!("Shutdown failed: {}", e);
    }
    result
}

async fn drive<T: BusTransport>(client: &FarmbotClient<T>, action: &Action) -> anyhow::Result<bool> {
    match action {
        Action::Move { x, y, z, speed } => Ok(client.move_to_with_speed(*x, *y, *z, *speed).await?),
        Action::Photo => Ok(client.take_photo().await?),
        Action::Sweep {
            plan, locations, ..
        } => {
            let plan = SweepPlan::from(plan);
            let report = run_sweep(client, &plan).await?;
            LocationLog::write(locations, &report.visited, plan.z)
                .with_context(|| format!("writing locations to {}", locations.display()))?;
            Ok(report.failed_moves == 0)
        }
    }
}

fn init_tracing(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(fmt::layer());

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => registry.init(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_negative_move() {
        let cli = Cli::try_parse_from(["farmbot", "--dry-run", "move", "-5", "3000", "10"]).unwrap();
        match cli.action {
            Action::Move { x, y, z, speed } => {
                assert_eq!((x, y, z), (-5.0, 3000.0, 10.0));
                assert_eq!(speed, limits::DEFAULT_SPEED);
            }
            other => panic!("unexpected action {:?}", other),
        }
        assert!(cli.dry_run);
    }

    #[test]
    fn test_cli_rejects_non_finite_move() {
        for bad in ["NaN", "inf", "-inf"] {
            let parsed = Cli::try_parse_from(["farmbot", "--dry-run", "move", bad, "0", "0"]);
            assert!(parsed.is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_plan_args_defaults_match_plan() {
        let cli = Cli::try_parse_from(["farmbot", "sweep", "--plan-only"]).unwrap();
        match cli.action {
            Action::Sweep { plan, plan_only, .. } => {
                assert!(plan_only);
                assert_eq!(SweepPlan::from(&plan), SweepPlan::default());
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_sweep_writes_locations() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(CorrelationTracker::new());
        let bus = Arc::new(LoopbackBus::always(
            ReplyRouter::new(DRY_RUN_DEVICE, tracker.clone()),
            RpcReply::OK,
        ));
        let client =
            FarmbotClient::with_transport(bus, tracker, DRY_RUN_DEVICE, ExecutorConfig::default());

        let action = Action::Sweep {
            plan: PlanArgs {
                min_x: 0,
                max_x: 200,
                min_y: 0,
                max_y: 200,
                delta: 100,
                offset: 0,
                height: 3,
            },
            locations: dir.path().to_path_buf(),
            plan_only: false,
        };

        assert!(run(&client, &action).await.unwrap());
        let text = std::fs::read_to_string(dir.path().join("location.txt")).unwrap();
        assert_eq!(text, "0 0 3\n0 100 3\n100 100 3\n100 0 3\n");
    }
}
