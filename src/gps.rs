//! NMEA receiver ingestion, feeding the [PositionStore].

use hifitime::prelude::Epoch;
use itertools::Itertools;
use log::{debug, error, info, warn};
use nmea0183::{ParseResult, Parser, RMC};

use std::{sync::Arc, time::Duration};

use tokio::sync::watch::Receiver as WatchRx;

use crate::{
    modem::Transport,
    store::{Fix, PositionStore},
};

/// Fixes drained for diagnostics when the receiver loses its fix
const DIAGNOSTIC_DRAIN: usize = 10;

/// Receiver polling timeout
const READ_TIMEOUT: Duration = Duration::from_millis(20);

const KNOTS_TO_KMH: f32 = 1.852;

/// UTC instant of an RMC solution
fn rmc_epoch(rmc: &RMC) -> Option<Epoch> {
    let (date, time) = (&rmc.datetime.date, &rmc.datetime.time);

    // two digit years are in the 21st century
    let year = match date.year {
        year if year < 100 => 2000 + year as i32,
        year => year as i32,
    };

    Epoch::maybe_from_gregorian_utc(
        year,
        date.month,
        date.day,
        time.hours,
        time.minutes,
        time.seconds.trunc() as u8,
        (time.seconds.fract() * 1.0E9) as u32,
    )
    .ok()
}

pub struct Decoder {
    parser: Parser,
    store: Arc<PositionStore>,
}

impl Decoder {
    pub fn new(store: Arc<PositionStore>) -> Self {
        Self {
            store,
            parser: Parser::new(),
        }
    }

    /// Consumes receiver bytes, returns the number of new [Fix]es
    pub fn consume(&mut self, bytes: &[u8]) -> usize {
        let mut fixes = 0;

        for &byte in bytes {
            match self.parser.parse_from_byte(byte) {
                Some(Ok(ParseResult::RMC(Some(rmc)))) => {
                    let fix = Fix::from_degrees(rmc.latitude.as_f64(), rmc.longitude.as_f64());

                    match rmc_epoch(&rmc) {
                        Some(epoch) => debug!(
                            "{} - new fix {} - {:.2} km/h",
                            epoch,
                            fix,
                            rmc.speed.as_knots() * KNOTS_TO_KMH
                        ),
                        None => debug!(
                            "new fix {} - {:.2} km/h",
                            fix,
                            rmc.speed.as_knots() * KNOTS_TO_KMH
                        ),
                    }

                    self.store.push(fix);
                    fixes += 1;
                },
                Some(Ok(ParseResult::RMC(None))) => {
                    warn!("receiver has no valid fix");
                    self.drain_history();
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    debug!("NMEA parsing error: {}", e);
                },
                None => {},
            }
        }

        fixes
    }

    /// Drains and logs the oldest stored fixes
    pub fn drain_history(&self) -> Vec<Fix> {
        let fixes = self.store.pop_recent(DIAGNOSTIC_DRAIN);

        if fixes.is_empty() {
            info!("no positions available");
        } else {
            info!("last {} positions: {}", fixes.len(), fixes.iter().join(" "));

            match serde_json::to_string(&fixes) {
                Ok(json) => debug!("{}", json),
                Err(e) => error!("failed to serialize positions: {}", e),
            }
        }

        fixes
    }
}

/// Reads the receiver until `shutdown` is raised. Blocking.
pub fn ingest<T: Transport>(mut receiver: T, mut decoder: Decoder, shutdown: WatchRx<bool>) {
    let mut buffer = [0u8; 1024];

    while !*shutdown.borrow() {
        match receiver.read(&mut buffer, READ_TIMEOUT) {
            Ok(0) => {},
            Ok(size) => {
                decoder.consume(&buffer[..size]);
            },
            Err(e) => {
                error!("receiver I/O error: {}", e);
                std::thread::sleep(Duration::from_secs(1));
            },
        }
    }

    info!("receiver ingestion terminated");
}
