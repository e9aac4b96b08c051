use serde::Deserialize;

use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::{
    error::{Error, Result},
    modem::{DEFAULT_MAX_RESPONSE, commands::Timeouts},
    store::DEFAULT_CAPACITY,
};

/// Recognized inbound commands, compared exactly
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CommandSet {
    /// Requests the current location
    pub locate: String,

    /// Switches to on-demand reporting
    pub on_demand: String,

    /// Switches to continuous reporting
    pub continuous: String,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            locate: "GET_POSITION".to_string(),
            on_demand: "SET_MODE_REQUEST".to_string(),
            continuous: "SET_MODE_CONTINUOUS".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Position history depth
    pub capacity: usize,

    /// Inbox polling period, in seconds
    pub poll_period_s: u64,

    /// Continuous reporting interval, in seconds
    pub report_interval_s: u64,

    /// Acknowledged command timeout, in milliseconds
    pub command_timeout_ms: u64,

    /// Inbox listing timeout, in milliseconds
    pub listing_timeout_ms: u64,

    /// Text submission timeout, in milliseconds
    pub submit_timeout_ms: u64,

    /// Maximal wait on the modem channel, in milliseconds
    pub lock_wait_ms: u64,

    /// Handshake retry delay, in milliseconds
    pub retry_delay_ms: u64,

    /// Upper bound on a single modem response, in bytes
    pub max_response: usize,

    /// Inbound command literals
    pub commands: CommandSet,

    /// Sent in response to a location request when no fix exists yet.
    /// Nothing is sent when undefined.
    pub no_fix_reply: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            poll_period_s: 60,
            report_interval_s: 60,
            command_timeout_ms: 1_000,
            listing_timeout_ms: 5_000,
            submit_timeout_ms: 10_000,
            lock_wait_ms: 3_000,
            retry_delay_ms: 1_000,
            max_response: DEFAULT_MAX_RESPONSE,
            commands: CommandSet::default(),
            no_fix_reply: None,
        }
    }
}

impl Settings {
    /// Loads [Settings] from a JSON file. Missing fields take their default value.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let fd = File::open(path)?;
        let settings: Self = serde_json::from_reader(BufReader::new(fd))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config("null position capacity".to_string()));
        }
        if self.poll_period_s == 0 || self.report_interval_s == 0 {
            return Err(Error::Config("null period".to_string()));
        }

        let commands = [
            &self.commands.locate,
            &self.commands.on_demand,
            &self.commands.continuous,
        ];

        if commands.iter().any(|cmd| cmd.is_empty()) {
            return Err(Error::Config("empty command literal".to_string()));
        }

        if commands[0] == commands[1] || commands[0] == commands[2] || commands[1] == commands[2] {
            return Err(Error::Config("ambiguous command literals".to_string()));
        }

        Ok(())
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_s)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_s)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            command: Duration::from_millis(self.command_timeout_ms),
            listing: Duration::from_millis(self.listing_timeout_ms),
            submit: Duration::from_millis(self.submit_timeout_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "report_interval_s": 120,
                "commands": { "locate": "WHERE" },
                "no_fix_reply": "No fix yet"
            }"#,
        )
        .unwrap();

        assert_eq!(settings.report_interval(), Duration::from_secs(120));
        assert_eq!(settings.poll_period(), Duration::from_secs(60));
        assert_eq!(settings.capacity, 300);
        assert_eq!(settings.commands.locate, "WHERE");
        assert_eq!(settings.commands.continuous, "SET_MODE_CONTINUOUS");
        assert_eq!(settings.no_fix_reply.as_deref(), Some("No fix yet"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn invalid_settings() {
        let mut settings = Settings::default();
        settings.commands.on_demand = settings.commands.locate.clone();
        assert!(matches!(settings.validate(), Err(Error::Config(_))));

        let settings = Settings {
            capacity: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn default_timeouts() {
        let timeouts = Settings::default().timeouts();
        assert_eq!(timeouts.command, Duration::from_secs(1));
        assert_eq!(timeouts.listing, Duration::from_secs(5));
    }
}
