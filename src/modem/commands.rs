use log::{debug, error, info, warn};

use std::{future::Future, time::Duration};

use crate::{
    error::{Error, Result},
    modem::{Modem, Outcome, Transaction, Transport},
};

pub const AT: &str = "AT\r\n";
pub const OK: &str = "OK\r\n";
pub const SET_TEXT_MODE: &str = "AT+CMGF=1\r\n";
pub const LIST_ALL: &str = "AT+CMGL=\"ALL\"\r\n";
pub const LISTING_MARKER: &str = "+CMGL:";
pub const DELETE_ALL: &str = "AT+CMGDA=\"DEL ALL\"\r\n";
pub const SUBMIT_PROMPT: &str = ">";
pub const SUBMIT_ACK: &str = "+CMGS:";

/// Terminates a submitted text
const CTRL_Z: char = '\x1a';

/// Longest single-part text
pub const MAX_TEXT_LEN: usize = 160;

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Short acknowledged commands
    pub command: Duration,
    /// Listing of the inbox
    pub listing: Duration,
    /// Network submission of one text
    pub submit: Duration,
    /// Pause between handshake attempts
    pub retry_delay: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(1),
            listing: Duration::from_secs(5),
            submit: Duration::from_secs(10),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Text messaging over the [Modem] transaction engine
pub struct Sms<T> {
    modem: Modem<T>,
    pub timeouts: Timeouts,
}

impl<T> Clone for Sms<T> {
    fn clone(&self) -> Self {
        Self {
            modem: self.modem.clone(),
            timeouts: self.timeouts,
        }
    }
}

/// Runs `attempt` until it matches, pausing `delay` in between.
/// Unbounded when `max_attempts` is None; otherwise the last failure is returned.
pub async fn retry_until_matched<F, Fut>(
    what: &str,
    delay: Duration,
    max_attempts: Option<usize>,
    mut attempt: F,
) -> Result<Vec<u8>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Outcome>>,
{
    let mut nth = 0;

    loop {
        nth += 1;

        let failure = match attempt().await {
            Ok(outcome) => match outcome.into_result() {
                Ok(bytes) => return Ok(bytes),
                Err(e) => e,
            },
            Err(e) => e,
        };

        warn!("{} attempt #{} failed: {}", what, nth, failure);

        if max_attempts.is_some_and(|max| nth >= max) {
            return Err(failure);
        }

        tokio::time::sleep(delay).await;
    }
}

/// Restricts `text` to the 7-bit printable subset, bounded to a single part
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii() && (!c.is_ascii_control() || c == '\n' || c == '\r') {
                c
            } else {
                '?'
            }
        })
        .take(MAX_TEXT_LEN)
        .collect()
}

fn valid_recipient(number: &str) -> bool {
    !number.is_empty()
        && number
            .chars()
            .all(|c| c.is_ascii_digit() || c == '+' || c == '#' || c == '*')
}

impl<T: Transport> Sms<T> {
    pub fn new(modem: Modem<T>, timeouts: Timeouts) -> Self {
        Self { modem, timeouts }
    }

    pub fn modem(&self) -> &Modem<T> {
        &self.modem
    }

    fn ack(&self, request: &str) -> Transaction {
        Transaction::new(request, OK, self.timeouts.command)
    }

    pub async fn probe(&self) -> Result<Outcome> {
        self.modem.execute(&self.ack(AT)).await
    }

    pub async fn set_text_mode(&self) -> Result<Outcome> {
        self.modem.execute(&self.ack(SET_TEXT_MODE)).await
    }

    /// Brings the modem up: probe, then text mode, both retried until
    /// they succeed, followed by a best-effort inbox clear.
    pub async fn handshake(&self) {
        let delay = self.timeouts.retry_delay;

        // unbounded: nothing works without it
        let _ = retry_until_matched("modem probe", delay, None, || self.probe()).await;
        info!("modem is responding");

        let _ = retry_until_matched("text mode", delay, None, || self.set_text_mode()).await;
        debug!("text mode activated");

        if let Err(e) = self.clear().await {
            error!("failed to clear inbox: {}", e);
        }
    }

    /// Deletes every stored message
    pub async fn clear(&self) -> Result<()> {
        self.modem
            .execute(&self.ack(DELETE_ALL))
            .await?
            .into_result()?;
        Ok(())
    }

    /// Deletes the message stored at `index`
    pub async fn delete(&self, index: u32) -> Result<()> {
        let request = format!("AT+CMGD={}\r\n", index);

        self.modem
            .execute(&self.ack(&request))
            .await?
            .into_result()?;
        Ok(())
    }

    /// Sends `text` to `number`
    pub async fn send_text(&self, number: &str, text: &str) -> Result<()> {
        if !valid_recipient(number) {
            return Err(Error::InvalidRecipient(number.to_string()));
        }

        self.set_text_mode().await?.into_result()?;

        let body = format!("{}{}", sanitize_text(text), CTRL_Z);

        let steps = [
            Transaction::new(
                format!("AT+CMGS=\"{}\"\r", number),
                SUBMIT_PROMPT,
                self.timeouts.command,
            ),
            Transaction::new(body, SUBMIT_ACK, self.timeouts.submit),
        ];

        self.modem.execute_sequence(&steps).await?.into_result()?;

        debug!("text sent to {}", number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::mock::MockModem;

    fn sms(mock: &MockModem) -> Sms<MockModem> {
        let timeouts = Timeouts {
            command: Duration::from_millis(200),
            listing: Duration::from_millis(500),
            submit: Duration::from_millis(500),
            retry_delay: Duration::from_millis(10),
        };
        Sms::new(Modem::new(mock.clone()), timeouts)
    }

    #[tokio::test]
    async fn send_text_dialog() {
        let mock = MockModem::new();
        let sms = sms(&mock);

        sms.send_text("+15550001234", "GPS Location: here").await.unwrap();

        assert_eq!(
            mock.writes(),
            vec![
                "AT+CMGF=1\r\n",
                "AT+CMGS=\"+15550001234\"\r",
                "GPS Location: here\x1a",
            ]
        );
        assert_eq!(
            mock.sent(),
            vec![("+15550001234".to_string(), "GPS Location: here".to_string())]
        );
    }

    #[tokio::test]
    async fn send_text_rejects_odd_recipients() {
        let mock = MockModem::new();
        let sms = sms(&mock);

        assert!(matches!(
            sms.send_text("\"; AT+CFUN=0", "x").await,
            Err(Error::InvalidRecipient(_))
        ));
        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn send_text_stops_without_text_mode() {
        let mock = MockModem::new();
        mock.state().text_mode_failures = 1;
        let sms = sms(&mock);

        assert!(matches!(
            sms.send_text("+1555", "x").await,
            Err(Error::NoMatch(_))
        ));
        assert_eq!(mock.writes(), vec!["AT+CMGF=1\r\n"]);
    }

    #[tokio::test]
    async fn handshake_retries_text_mode() {
        let mock = MockModem::new();
        mock.state().text_mode_failures = 3;
        mock.receive("+1555", "stale");
        let sms = sms(&mock);

        sms.handshake().await;

        let writes = mock.writes();
        assert_eq!(writes.iter().filter(|w| *w == "AT+CMGF=1\r\n").count(), 4);
        assert_eq!(writes.last().map(String::as_str), Some(DELETE_ALL));
        assert!(mock.state().inbox.is_empty());
    }

    #[tokio::test]
    async fn delete_single_message() {
        let mock = MockModem::new();
        mock.receive("+1555", "first");
        mock.receive("+1666", "second");
        let sms = sms(&mock);

        sms.delete(1).await.unwrap();
        assert_eq!(mock.writes(), vec!["AT+CMGD=1\r\n"]);
        assert_eq!(mock.state().inbox.len(), 1);
        assert_eq!(mock.state().inbox[0].1, "+1666");

        assert!(matches!(sms.delete(1).await, Err(Error::NoMatch(_))));
    }

    #[tokio::test]
    async fn bounded_retry_gives_up() {
        let mock = MockModem::new();
        mock.state().mute = true;
        let sms = sms(&mock);

        let result =
            retry_until_matched("probe", Duration::from_millis(1), Some(2), || sms.probe()).await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(mock.writes().len(), 2);
    }

    #[test]
    fn text_sanitization() {
        assert_eq!(sanitize_text("Olá\x1b!"), "Ol??!");
        assert_eq!(sanitize_text(&"a".repeat(200)).len(), MAX_TEXT_LEN);
    }
}
