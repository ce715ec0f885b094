use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use log::{info, warn};

mod api;
mod config;
mod db;
mod error;
mod probe;
mod queue;
mod record;
mod remote;
mod schema;
mod utils;
mod worker;

use crate::config::Config;
use crate::queue::DeliveryQueue;
use crate::record::{Outbound, ReadingEntry, SeatEntry};
use crate::worker::Worker;

#[actix_web::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    if config.remote.accept_invalid_certs {
        warn!(
            "TLS certificate verification is disabled for {}",
            config.remote.base_url
        );
    }

    let db = Arc::new(Mutex::new(db::Db::connect(&config.database_url)?));
    let readings = Arc::new(DeliveryQueue::<ReadingEntry>::new());
    let seats = Arc::new(DeliveryQueue::<SeatEntry>::new());

    if config.recover_unsynced {
        worker::recover(&db, &readings)?;
        worker::recover(&db, &seats)?;
    }

    let probe = probe::TcpProbe::new(config.probe_addr.clone(), config.probe_timeout);
    let sender = remote::RemoteSender::new(&config.remote)?;

    let retry = config.retry;
    let reading_worker = worker::supervise(ReadingEntry::KIND, {
        let (queue, db) = (readings.clone(), db.clone());
        let (probe, sender) = (probe.clone(), sender.clone());
        move || Worker::new(queue.clone(), db.clone(), probe.clone(), sender.clone(), retry).run()
    });
    let seat_worker = worker::supervise(SeatEntry::KIND, {
        let (queue, db) = (seats.clone(), db.clone());
        move || Worker::new(queue.clone(), db.clone(), probe.clone(), sender.clone(), retry).run()
    });

    let state = api::AppState {
        db,
        readings,
        seats,
    };

    info!("Listening on {}...", config.listen_addr);
    tokio::select! {
        res = api::new_http_server(state, &config.listen_addr, config.cors_origin.clone()) => res?,
        _ = reading_worker => return Err(anyhow!("readings worker stopped")),
        _ = seat_worker => return Err(anyhow!("seats worker stopped")),
    }

    Ok(())
}
