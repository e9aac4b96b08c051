#![doc = include_str!("../README.md")]

/*
 * GNSS-SMS-TRACKER: GNSS asset tracker reporting over SMS.
 * This program is shipped under Mozilla Public V2 license.
 */

use env_logger::{Builder, Target};

use hifitime::prelude::{Epoch, TimeScale};

use log::{error, info};

use std::sync::Arc;

use tokio::{signal, sync::watch};

mod cli;
mod dispatcher;
mod error;
mod gps;
mod inbox;
mod modem;
mod runtime;
mod settings;
mod store;
mod worker;

use crate::{
    cli::Cli,
    dispatcher::{Dispatcher, ReportingMode, Session},
    gps::Decoder,
    modem::{Modem, SerialInterface, commands::Sms},
    runtime::Runtime,
    settings::Settings,
    store::PositionStore,
};

#[tokio::main]
pub async fn main() {
    let mut builder = Builder::from_default_env();

    builder
        .target(Target::Stdout)
        .format_timestamp_secs()
        .format_module_path(false)
        .init();

    let t_utc = Epoch::now()
        .unwrap_or_else(|e| panic!("Failed to determine system time: {}", e))
        .to_time_scale(TimeScale::UTC);

    // cli
    let cli = Cli::new();

    let mut settings = match cli.config_file() {
        Some(path) => Settings::from_file(path)
            .unwrap_or_else(|e| panic!("Failed to load settings from {}: {}", path, e)),
        None => Settings::default(),
    };

    cli.apply(&mut settings);

    settings
        .validate()
        .unwrap_or_else(|e| panic!("Invalid settings: {}", e));

    // shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store = Arc::new(PositionStore::new(settings.capacity));
    info!("{} - retaining up to {} positions", t_utc, store.capacity());

    // positioning receiver
    if let Some(port) = cli.gps_port() {
        let receiver = SerialInterface::open(port, cli.gps_baud_rate())
            .unwrap_or_else(|e| panic!("Failed to open {} port: {}", port, e));

        let decoder = Decoder::new(store.clone());
        let shutdown = shutdown_rx.clone();

        tokio::task::spawn_blocking(move || gps::ingest(receiver, decoder, shutdown));
        info!("{} - receiver ingestion deployed", t_utc);
    }

    // cellular modem
    let port = cli.modem_port();
    let interface = SerialInterface::open(port, cli.modem_baud_rate())
        .unwrap_or_else(|e| panic!("Failed to open {} port: {}", port, e));

    let modem = Modem::new(interface)
        .with_lock_wait(settings.lock_wait())
        .with_max_response(settings.max_response);

    let sms = Sms::new(modem, settings.timeouts());
    sms.handshake().await;

    let dispatcher = Dispatcher::new(sms, store.clone(), Arc::new(Session::new()), &settings);
    let session = dispatcher.session();

    tokio::spawn(async move {
        signal::ctrl_c()
            .await
            .unwrap_or_else(|e| panic!("Tokio signal handling error: {}", e));

        shutdown_tx
            .send(true)
            .unwrap_or_else(|e| panic!("Tokio: signaling error: {}", e));
    });

    // main task
    let mut rtm = Runtime::new(t_utc);
    let mut shutdown = shutdown_rx;
    let mut poll = tokio::time::interval(settings.poll_period());

    info!("{} - application deployed", rtm.utc_time());

    loop {
        tokio::select! {
            _ = poll.tick() => {},
            _ = shutdown.changed() => break,
        }

        let dispatched = dispatcher.check_inbound().await;

        match Epoch::now() {
            Ok(now) => rtm.new_cycle(now, dispatched),
            Err(e) => error!("Failed to determine system time: {}", e),
        }

        info!(
            "{} - poll #{} - {} message(s) ({} total) - mode: {} - {} worker(s) - uptime {}",
            rtm.utc_time(),
            rtm.cycles,
            dispatched,
            rtm.dispatched,
            session.mode(),
            session.active_workers(),
            rtm.uptime,
        );
    }

    // lets workers observe their termination condition
    session.set_mode(ReportingMode::OnDemand);

    info!("{} - shutting down", rtm.utc_time());
}
