//! Inbound text retrieval and `+CMGL` listing scanner.
//!
//! A listing is a series of groups: one header line
//! `+CMGL: <index>,<status>,<sender>,<alpha>,<timestamp>` followed by
//! body line(s) up to the next header. The final result code closes
//! the last group.

use itertools::Itertools;
use log::{debug, warn};

use std::{iter::Peekable, str::Lines};

use crate::{
    error::{Error, Result},
    modem::{
        Outcome, Transaction, Transport,
        commands::{LIST_ALL, LISTING_MARKER, Sms},
        ends_with_closing_result, is_final_result,
    },
};

/// Longest accepted sender address
pub const MAX_SENDER_LEN: usize = 32;

/// Longest retained body
pub const MAX_BODY_LEN: usize = 480;

/// One received text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Storage slot in the SIM
    pub index: u32,
    /// Origin address
    pub sender: String,
    pub body: String,
}

impl std::fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.sender, self.body)
    }
}

fn is_header(line: &str) -> bool {
    line.starts_with(LISTING_MARKER)
}

/// Index is the first comma separated field, after the marker
fn index_field(header: &str) -> Option<u32> {
    header
        .strip_prefix(LISTING_MARKER)?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Sender is the third comma separated field
fn sender_field(header: &str) -> Option<&str> {
    let sender = header.split(',').nth(2)?.trim().trim_matches('"');

    if sender.is_empty() || sender.len() > MAX_SENDER_LEN {
        None
    } else {
        Some(sender)
    }
}

/// Lazy scanner over a listing response. Malformed groups come
/// out as [Error::ParseSkip] and scanning goes on with the next one.
pub struct Messages<'a> {
    lines: Peekable<Lines<'a>>,
}

impl<'a> Messages<'a> {
    pub fn new(listing: &'a str) -> Self {
        Self {
            lines: listing.lines().peekable(),
        }
    }
}

/// Logs and drops a skipped group
pub fn keep_valid(record: Result<InboundMessage>) -> Option<InboundMessage> {
    match record {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("{}", e);
            None
        },
    }
}

impl Iterator for Messages<'_> {
    type Item = Result<InboundMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = loop {
            let line = self.lines.next()?;
            if is_header(line) {
                break line;
            }
        };

        let group = self
            .lines
            .peeking_take_while(|line| !is_header(line))
            .collect::<Vec<_>>();

        let body = group
            .iter()
            .map(|line| line.trim_end_matches('\r'))
            .take_while(|line| !is_final_result(line))
            .filter(|line| !line.is_empty())
            .join("\n");

        let (index, sender) = match (index_field(header), sender_field(header)) {
            (Some(index), Some(sender)) => (index, sender),
            _ => {
                return Some(Err(Error::ParseSkip(format!(
                    "malformed header {:?}",
                    header.trim_end()
                ))));
            },
        };

        if body.is_empty() {
            return Some(Err(Error::ParseSkip(format!("no body from {}", sender))));
        }

        Some(Ok(InboundMessage {
            index,
            sender: sender.to_string(),
            body: body.chars().take(MAX_BODY_LEN).collect(),
        }))
    }
}

/// Scans a listing response
pub fn parse_listing(listing: &str) -> Messages<'_> {
    Messages::new(listing)
}

/// Raw listing response, valid for one retrieval cycle
#[derive(Debug, Clone)]
pub struct Listing {
    raw: String,
    complete: bool,
}

impl Default for Listing {
    fn default() -> Self {
        Self {
            raw: String::new(),
            complete: true,
        }
    }
}

impl Listing {
    pub fn new(raw: String) -> Self {
        Self {
            complete: ends_with_closing_result(raw.as_bytes()),
            raw,
        }
    }

    /// False when the response was cut short (size bound or deadline):
    /// stored messages may be missing and the last group may be partial.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// True when the modem reported no stored message
    pub fn is_empty(&self) -> bool {
        !self.raw.contains(LISTING_MARKER)
    }

    pub fn messages(&self) -> Messages<'_> {
        parse_listing(&self.raw)
    }
}

impl<T: Transport> Sms<T> {
    /// Lists every stored message. A plain `OK` is an empty [Listing].
    pub async fn list_messages(&self) -> Result<Listing> {
        let list = Transaction::new(LIST_ALL, LISTING_MARKER, self.timeouts.listing);

        match self.modem().execute_capturing(&list).await? {
            Outcome::Matched(bytes) => Ok(Listing::new(String::from_utf8_lossy(&bytes).to_string())),
            Outcome::NoMatch(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let last = text.lines().map(str::trim).rfind(|line| !line.is_empty());

                if last == Some("OK") {
                    debug!("inbox is empty");
                    Ok(Listing::default())
                } else {
                    Err(Error::NoMatch(text.to_string()))
                }
            },
            Outcome::Timeout => Err(Error::Timeout),
        }
    }
}
