mod gui;

use clap::Parser;
use log::{error, info};
use std::{
    sync::{Arc, Mutex, PoisonError},
    thread,
};

use gui::{engage_gui, BodyPoints};
use telerelay::{
    frame_decoder::{Frame, Hook},
    relay::{RelayClient, RelayError},
};

/// Watch a telerelay host from the terminal
#[derive(Debug, Parser)]
#[clap(version, about)]
struct MonitorArgs {
    /// Host address as `host:port`
    #[arg(default_value = "127.0.0.1:5000")]
    addr: String,
}

fn main() {
    env_logger::init();
    let args = MonitorArgs::parse();

    let connected = RelayClient::connect(args.addr.as_str()).and_then(|mut client| {
        client.send_frame(&Frame::Hook(Hook::Observe))?;
        Ok(client)
    });
    let mut client = match connected {
        Ok(client) => client,
        Err(e) => {
            error!("cannot reach {}: {}", args.addr, e);
            std::process::exit(1);
        }
    };
    info!("observing {}", args.addr);

    let latest = Arc::new(Mutex::new(BodyPoints::default()));
    let reader_latest = latest.clone();

    thread::spawn(move || loop {
        match client.recv_signal() {
            Ok(signal) => {
                let points = BodyPoints::from_signal(&signal);
                *reader_latest.lock().unwrap_or_else(PoisonError::into_inner) = points;
            }
            Err(RelayError::PeerOffline(_)) => {
                info!("host closed the connection");
                break;
            }
            Err(e) => {
                error!("{}", e);
                break;
            }
        }
    });

    if let Err(e) = engage_gui(Box::new(move || {
        latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    })) {
        error!("{}", e);
    }
}
