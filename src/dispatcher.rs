//! Inbound command interpretation and reporting mode state machine.

use log::{debug, error, info, warn};

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};

use crate::{
    error::Result,
    inbox::{InboundMessage, keep_valid},
    modem::{Outcome, Transport, commands::Sms},
    settings::{CommandSet, Settings},
    store::{Fix, PositionStore},
    worker::Worker,
};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ReportingMode {
    /// Report only when asked
    #[default]
    OnDemand,

    /// Report on a fixed interval
    Continuous,
}

impl std::fmt::Display for ReportingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnDemand => write!(f, "on-demand"),
            Self::Continuous => write!(f, "continuous"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    Locate,
    OnDemand,
    Continuous,
}

impl CommandSet {
    /// Case sensitive, exact match
    pub fn recognize(&self, body: &str) -> Option<Command> {
        if body == self.locate {
            Some(Command::Locate)
        } else if body == self.on_demand {
            Some(Command::OnDemand)
        } else if body == self.continuous {
            Some(Command::Continuous)
        } else {
            None
        }
    }
}

/// Location report text
pub fn location_report(fix: &Fix) -> String {
    format!(
        "GPS Location: https://maps.google.com/?q={},{}",
        fix.latitude, fix.longitude
    )
}

/// Reporting state shared by the dispatcher and its workers
#[derive(Debug)]
pub struct Session {
    /// Current [ReportingMode]
    mode: watch::Sender<ReportingMode>,

    /// Continuous reporting workers, per recipient
    workers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (mode, _) = watch::channel(ReportingMode::default());
        Self {
            mode,
            workers: Default::default(),
        }
    }

    pub fn mode(&self) -> ReportingMode {
        *self.mode.borrow()
    }

    /// Updates the [ReportingMode]. Returns true on actual change;
    /// observers are only woken up in that case.
    pub fn set_mode(&self, mode: ReportingMode) -> bool {
        self.mode.send_if_modified(|current| {
            if *current == mode {
                false
            } else {
                *current = mode;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ReportingMode> {
        self.mode.subscribe()
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of live workers
    pub fn active_workers(&self) -> usize {
        self.workers()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    #[cfg(test)]
    pub fn is_reporting_to(&self, recipient: &str) -> bool {
        self.workers()
            .get(recipient)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns a worker for `recipient` unless one is still alive.
    /// Returns true when a new worker was spawned.
    pub fn ensure_worker<F>(&self, recipient: &str, spawn: F) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut workers = self.workers();

        workers.retain(|_, handle| !handle.is_finished());

        if workers.contains_key(recipient) {
            return false;
        }

        workers.insert(recipient.to_string(), spawn());
        true
    }

    /// Unregisters the worker bound to `recipient`, unless reporting is
    /// continuous. Returns true when the worker must terminate.
    /// Serialized with [Session::ensure_worker], so a request accepted
    /// as a no-op always finds its worker still reporting.
    pub fn retire_worker(&self, recipient: &str) -> bool {
        let mut workers = self.workers();

        if self.mode() == ReportingMode::Continuous {
            return false;
        }

        workers.remove(recipient);
        true
    }
}

/// Turns inbound messages into reports and mode changes
pub struct Dispatcher<T> {
    sms: Sms<T>,
    store: Arc<PositionStore>,
    session: Arc<Session>,
    commands: CommandSet,
    report_interval: Duration,
    no_fix_reply: Option<String>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(
        sms: Sms<T>,
        store: Arc<PositionStore>,
        session: Arc<Session>,
        settings: &Settings,
    ) -> Self {
        Self {
            sms,
            store,
            session,
            commands: settings.commands.clone(),
            report_interval: settings.report_interval(),
            no_fix_reply: settings.no_fix_reply.clone(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Handles one inbound message. Unrecognized bodies are ignored.
    pub async fn dispatch(&self, message: &InboundMessage) {
        match self.commands.recognize(&message.body) {
            Some(Command::OnDemand) => {
                if self.session.set_mode(ReportingMode::OnDemand) {
                    info!("{} - switched to {} reporting", message.sender, ReportingMode::OnDemand);
                }
            },
            Some(Command::Continuous) => {
                if self.session.set_mode(ReportingMode::Continuous) {
                    info!("{} - switched to {} reporting", message.sender, ReportingMode::Continuous);
                }
            },
            Some(Command::Locate) => match self.session.mode() {
                ReportingMode::OnDemand => {
                    if let Err(e) = self.report_once(&message.sender).await {
                        error!("{} - failed to report location: {}", message.sender, e);
                    }
                },
                ReportingMode::Continuous => {
                    self.start_worker(&message.sender);
                },
            },
            None => {
                debug!("{} - ignored {:?}", message.sender, message.body);
            },
        }
    }

    /// Sends the latest fix to `recipient`
    async fn report_once(&self, recipient: &str) -> Result<()> {
        match self.store.latest() {
            Some(fix) => {
                self.sms.send_text(recipient, &location_report(&fix)).await?;
                info!("{} - reported {}", recipient, fix);
            },
            None => match &self.no_fix_reply {
                Some(reply) => {
                    self.sms.send_text(recipient, reply).await?;
                    info!("{} - no fix yet, replied", recipient);
                },
                None => {
                    warn!("{} - no fix yet, nothing to report", recipient);
                },
            },
        }
        Ok(())
    }

    fn start_worker(&self, recipient: &str) {
        let spawned = self.session.ensure_worker(recipient, || {
            let worker = Worker::new(
                self.sms.clone(),
                self.store.clone(),
                self.session.clone(),
                recipient,
                self.report_interval,
            );
            tokio::spawn(worker.run())
        });

        if !spawned {
            debug!("{} - already reporting continuously", recipient);
        }
    }

    /// Polling entry point: retrieves, clears and dispatches every
    /// inbound message. Returns the number of messages dispatched.
    ///
    /// A complete listing clears the whole inbox. A truncated one only
    /// deletes the messages it fully delivered, the others are left
    /// for the next cycle.
    pub async fn check_inbound(&self) -> usize {
        if let Err(e) = self.sms.set_text_mode().await.and_then(Outcome::into_result) {
            error!("failed to set text mode: {}", e);
            return 0;
        }

        let listing = match self.sms.list_messages().await {
            Ok(listing) => listing,
            Err(e) => {
                error!("failed to read inbox: {}", e);
                return 0;
            },
        };

        if listing.is_empty() {
            return 0;
        }

        let mut records = listing.messages().collect::<Vec<_>>();

        if !listing.is_complete() {
            // last group may be cut short
            records.pop();
        }

        let messages = records
            .into_iter()
            .filter_map(keep_valid)
            .collect::<Vec<_>>();

        // duplicates on the next cycle are tolerated
        if listing.is_complete() {
            if let Err(e) = self.sms.clear().await {
                error!("failed to clear inbox: {}", e);
            }
        } else {
            warn!(
                "inbox listing truncated, {} message(s) retrieved this cycle",
                messages.len()
            );

            for message in messages.iter() {
                if let Err(e) = self.sms.delete(message.index).await {
                    error!("failed to delete message #{}: {}", message.index, e);
                }
            }
        }

        for message in messages.iter() {
            info!("received {}", message);
            self.dispatch(message).await;
        }

        messages.len()
    }
}
