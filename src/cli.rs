use clap::{Arg, ArgAction, ArgMatches, ColorChoice, Command};

use crate::settings::Settings;

pub struct Cli {
    /// Arguments passed by user
    matches: ArgMatches,
}

impl Cli {
    /// Build new command line interface
    pub fn new() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    fn from_matches(matches: ArgMatches) -> Self {
        Self { matches }
    }

    fn command() -> Command {
        Command::new("gnss-sms-tracker")
            .version(env!("CARGO_PKG_VERSION"))
            .about("GNSS asset tracker, reporting its location over SMS")
            .color(ColorChoice::Always)
            .arg_required_else_help(true)
            .next_help_heading("Cellular modem")
            .arg(
                Arg::new("modem")
                    .short('m')
                    .long("modem")
                    .value_name("PORT")
                    .required(true)
                    .help("Modem serial port. Example /dev/ttyUSB0 on Linux"),
            )
            .arg(
                Arg::new("modem-baud")
                    .long("modem-baud")
                    .value_name("Baudrate (u32)")
                    .value_parser(clap::value_parser!(u32))
                    .help("Modem baud rate. By default we use 115_200"),
            )
            .next_help_heading("GNSS receiver")
            .arg(
                Arg::new("gps")
                    .short('g')
                    .long("gps")
                    .value_name("PORT")
                    .help("NMEA receiver serial port. Without it, the tracker has no new fix to report"),
            )
            .arg(
                Arg::new("gps-baud")
                    .long("gps-baud")
                    .value_name("Baudrate (u32)")
                    .value_parser(clap::value_parser!(u32))
                    .help("Receiver baud rate. By default we use 9_600"),
            )
            .next_help_heading("Reporting")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("JSON settings file. Command line values take precedence"),
            )
            .arg(
                Arg::new("capacity")
                    .long("capacity")
                    .value_parser(clap::value_parser!(usize))
                    .help("Number of positions retained. Default is 300"),
            )
            .arg(
                Arg::new("poll")
                    .short('p')
                    .long("poll")
                    .value_name("SECONDS")
                    .value_parser(clap::value_parser!(u64))
                    .help("Inbox polling period. Default is 60s"),
            )
            .arg(
                Arg::new("interval")
                    .short('i')
                    .long("interval")
                    .value_name("SECONDS")
                    .value_parser(clap::value_parser!(u64))
                    .help("Continuous reporting interval. Default is 60s"),
            )
            .arg(
                Arg::new("no-fix-reply")
                    .long("no-fix-reply")
                    .action(ArgAction::Set)
                    .help("Reply sent to location requests while no fix exists yet. Nothing is sent by default"),
            )
    }

    /// Returns modem serial port
    pub fn modem_port(&self) -> &str {
        self.matches
            .get_one::<String>("modem")
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn modem_baud_rate(&self) -> u32 {
        self.matches
            .get_one::<u32>("modem-baud")
            .copied()
            .unwrap_or(115_200)
    }

    /// Returns receiver serial port, if any
    pub fn gps_port(&self) -> Option<&String> {
        self.matches.get_one::<String>("gps")
    }

    pub fn gps_baud_rate(&self) -> u32 {
        self.matches
            .get_one::<u32>("gps-baud")
            .copied()
            .unwrap_or(9_600)
    }

    pub fn config_file(&self) -> Option<&String> {
        self.matches.get_one::<String>("config")
    }

    /// Applies command line overrides to `settings`
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(capacity) = self.matches.get_one::<usize>("capacity") {
            settings.capacity = *capacity;
        }
        if let Some(poll) = self.matches.get_one::<u64>("poll") {
            settings.poll_period_s = *poll;
        }
        if let Some(interval) = self.matches.get_one::<u64>("interval") {
            settings.report_interval_s = *interval;
        }
        if let Some(reply) = self.matches.get_one::<String>("no-fix-reply") {
            settings.no_fix_reply = Some(reply.to_string());
        }
    }
}
