use log::{debug, error, info, warn};

use std::{sync::Arc, time::Duration};

use tokio::sync::watch::Receiver as WatchRx;

use crate::{
    dispatcher::{ReportingMode, Session, location_report},
    modem::{Transport, commands::Sms},
    store::PositionStore,
};

/// Periodic location reports to one recipient, for as long
/// as [ReportingMode::Continuous] holds.
pub struct Worker<T> {
    /// Modem access
    sms: Sms<T>,

    /// Latest fix source and history sink
    store: Arc<PositionStore>,

    /// Reporting state, observed at every cycle
    session: Arc<Session>,

    /// Wakes the worker up on mode change
    mode: WatchRx<ReportingMode>,

    /// Bound recipient
    recipient: String,

    /// Pause between two reports
    interval: Duration,
}

impl<T: Transport> Worker<T> {
    pub fn new(
        sms: Sms<T>,
        store: Arc<PositionStore>,
        session: Arc<Session>,
        recipient: &str,
        interval: Duration,
    ) -> Self {
        Self {
            sms,
            store,
            mode: session.subscribe(),
            session,
            interval,
            recipient: recipient.to_string(),
        }
    }

    pub async fn run(mut self) {
        info!("continuous reporting to {} deployed", self.recipient);

        loop {
            self.mode.borrow_and_update();

            if self.session.retire_worker(&self.recipient) {
                break;
            }

            match self.store.latest() {
                Some(fix) => {
                    match self.sms.send_text(&self.recipient, &location_report(&fix)).await {
                        Ok(_) => debug!("{} - reported {}", self.recipient, fix),
                        Err(e) => error!("{} - failed to report: {}", self.recipient, e),
                    }

                    self.store.push(fix);
                },
                None => {
                    warn!("{} - no fix to report yet", self.recipient);
                },
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = self.mode.changed() => {},
            }
        }

        info!("continuous reporting to {} terminated", self.recipient);
    }
}
