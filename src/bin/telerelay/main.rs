//! The telerelay command line: run a local, host or driver session, or
//! replay and dump trajectory logs.

use clap::Parser;
use log::{error, info, warn};
use std::{
    fs,
    process::exit,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use telerelay::{
    args::{CommandTask, RelayArgs},
    config::SessionConfig,
    interface::Role,
    kinematic_sim::KinematicSim,
    relay::{Relay, RelayClient},
    session::{record_path, replay, Session, SessionError},
    trajectory_log::TrajectoryLog,
};

// Example:
// cargo run --bin telerelay -- --config scene.ron host --port 5000 --record demo
// cargo run --bin telerelay -- drive 127.0.0.1:5000
// cargo run --bin telerelay -- dump data/record/trajectory/traj.demo_1700000000 -n 8

fn main() {
    env_logger::init();
    let args = RelayArgs::parse();

    if let Err(e) = run(args) {
        error!("{}", e);
        exit(1);
    }
}

fn run(args: RelayArgs) -> Result<(), SessionError> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_path(path)?,
        None => SessionConfig::default(),
    };
    if let Some(tick_ms) = args.tick_ms {
        config.tick_ms = tick_ms;
        config.validate()?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::Release);
    }) {
        warn!("cannot catch Ctrl-C: {}", e);
    }

    match args.command {
        CommandTask::Local(local) => {
            let mut session = Session::from_config(&config, Role::Local)?;
            if let Some(name) = local.record {
                start_recording(&mut session, &config, &name)?;
            }
            session.run_local(&stop)?;
        }

        CommandTask::Host(host) => {
            if let Some(port) = host.port {
                config.port = port;
            }
            let mut session = Session::from_config(&config, Role::Host)?;
            if let Some(name) = host.record {
                start_recording(&mut session, &config, &name)?;
            }
            let mut relay = Relay::listen(config.port, config.buffer_size)?;
            session.run_host(&mut relay, config.recv_timeout(), &stop)?;
        }

        CommandTask::Drive(drive) => {
            let addr = drive
                .addr
                .unwrap_or_else(|| format!("{}:{}", config.host, config.port));
            let mut session = Session::from_config(&config, Role::Driver)?;
            let mut client = RelayClient::connect(addr.as_str())?;
            session.run_driver(&mut client, &stop)?;
        }

        CommandTask::Replay(replay_cmd) => {
            let log = TrajectoryLog::from_path(&replay_cmd.file)?;
            let records = log.trajectory_records()?;
            info!(
                "replaying {} records from {}",
                records.len(),
                replay_cmd.file.display()
            );
            let mut engine = KinematicSim::from_config(&config)?;
            let played = replay(
                &mut engine,
                &records,
                Duration::from_millis(replay_cmd.delay_ms),
                &stop,
            )?;
            info!("replayed {} records", played);
        }

        CommandTask::Dump(dump) => {
            let log = TrajectoryLog::from_path(&dump.file)?;
            let header = log.header();
            println!("{}", header.columns.join(","));
            println!("{}", header.format);
            let limit = dump.limit.unwrap_or(usize::MAX);
            for record in log.records().iter().take(limit) {
                let row: Vec<String> = record.iter().map(|v| v.to_string()).collect();
                println!("{}", row.join(","));
            }
            if log.dropped_chunks() > 0 {
                warn!("{} chunks were not whole records", log.dropped_chunks());
            }
        }
    }

    Ok(())
}

fn start_recording(
    session: &mut Session<KinematicSim>,
    config: &SessionConfig,
    name: &str,
) -> Result<(), SessionError> {
    fs::create_dir_all(&config.trajectory_dir).map_err(|e| {
        SessionError::Setup(format!(
            "cannot create {}: {}",
            config.trajectory_dir, e
        ))
    })?;
    session.record_to(record_path(&config.trajectory_dir, name))
}
