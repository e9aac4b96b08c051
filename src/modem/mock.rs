//! Scripted in-memory modem, answering the AT dialect we use.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use super::interface::Transport;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Write(Vec<u8>),
    Read(Vec<u8>),
}

#[derive(Debug, Default)]
pub struct State {
    /// (index, sender, body) waiting in the SIM
    pub inbox: Vec<(usize, String, String)>,
    /// (number, text) submitted through +CMGS
    pub sent: Vec<(String, String)>,
    /// Wire activity, in order
    pub log: Vec<Event>,
    /// Reply latency
    pub latency: Duration,
    /// Bytes per read
    pub chunk: Option<usize>,
    /// Never answers
    pub mute: bool,
    /// Answers this instead of the regular reply
    pub garbage: Option<Vec<u8>>,
    /// Delete-all answers ERROR
    pub fail_clear: bool,
    /// Submission answers ERROR
    pub fail_submit: bool,
    /// Text mode answers ERROR this many times
    pub text_mode_failures: usize,
    next_index: usize,
    pending: VecDeque<u8>,
    ready_at: Option<Instant>,
    recipient: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockModem {
    state: Arc<Mutex<State>>,
}

impl MockModem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn receive(&self, sender: &str, body: &str) {
        let mut state = self.state();
        state.next_index += 1;
        let index = state.next_index;
        state.inbox.push((index, sender.to_string(), body.to_string()));
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.state().sent.clone()
    }

    pub fn writes(&self) -> Vec<String> {
        self.state()
            .log
            .iter()
            .filter_map(|event| match event {
                Event::Write(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
                _ => None,
            })
            .collect()
    }
}

fn listing(inbox: &[(usize, String, String)]) -> String {
    let mut text = String::from("AT+CMGL=\"ALL\"\r\r\n");
    for (index, sender, body) in inbox.iter() {
        text.push_str(&format!(
            "+CMGL: {},\"REC UNREAD\",\"{}\",\"\",\"24/05/01,10:00:00+00\"\r\n{}\r\n",
            index, sender, body
        ));
    }
    text.push_str("\r\nOK\r\n");
    text
}

impl State {
    fn answer(&mut self, request: &[u8]) -> Vec<u8> {
        let text = String::from_utf8_lossy(request).to_string();

        if let Some(number) = self.recipient.take() {
            if text.ends_with('\x1a') {
                if self.fail_submit {
                    return b"\r\n+CMS ERROR: 500\r\n".to_vec();
                }
                let body = text.trim_end_matches('\x1a').to_string();
                self.sent.push((number, body));
                return b"\r\n+CMGS: 7\r\n\r\nOK\r\n".to_vec();
            }
            // ESC aborts the prompt
            return Vec::new();
        }

        if text == "AT\r\n" {
            b"AT\r\r\nOK\r\n".to_vec()
        } else if text == "AT+CMGF=1\r\n" {
            if self.text_mode_failures > 0 {
                self.text_mode_failures -= 1;
                b"\r\nERROR\r\n".to_vec()
            } else {
                b"\r\nOK\r\n".to_vec()
            }
        } else if text == "AT+CMGL=\"ALL\"\r\n" {
            listing(&self.inbox).into_bytes()
        } else if text == "AT+CMGDA=\"DEL ALL\"\r\n" {
            if self.fail_clear {
                b"\r\nERROR\r\n".to_vec()
            } else {
                self.inbox.clear();
                b"\r\nOK\r\n".to_vec()
            }
        } else if let Some(index) = text.strip_prefix("AT+CMGD=") {
            let index = index.trim_end().parse::<usize>().ok();
            let before = self.inbox.len();

            if !self.fail_clear {
                self.inbox.retain(|(i, _, _)| Some(*i) != index);
            }

            if self.inbox.len() == before {
                b"\r\n+CMS ERROR: 321\r\n".to_vec()
            } else {
                b"\r\nOK\r\n".to_vec()
            }
        } else if let Some(rest) = text.strip_prefix("AT+CMGS=\"") {
            self.recipient = Some(rest.trim_end_matches("\"\r").to_string());
            b"\r\n> ".to_vec()
        } else {
            b"\r\nERROR\r\n".to_vec()
        }
    }
}

impl Transport for MockModem {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let mut state = self.state();
        state.log.push(Event::Write(bytes.to_vec()));

        if state.mute {
            return Ok(());
        }

        let reply = match state.garbage.clone() {
            Some(garbage) => garbage,
            None => state.answer(bytes),
        };

        state.pending.extend(reply);
        state.ready_at = Some(Instant::now() + state.latency);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        let wait = {
            let mut state = self.state();
            let now = Instant::now();
            let ready = state.ready_at.map(|t| t <= now).unwrap_or(true);

            if ready && !state.pending.is_empty() {
                let n = buf
                    .len()
                    .min(state.pending.len())
                    .min(state.chunk.unwrap_or(usize::MAX));

                for (i, byte) in state.pending.drain(..n).enumerate() {
                    buf[i] = byte;
                }

                state.log.push(Event::Read(buf[..n].to_vec()));
                return Ok(n);
            }

            match state.ready_at {
                Some(t) if t > now && !state.pending.is_empty() => (t - now).min(timeout),
                _ => timeout.min(Duration::from_millis(5)),
            }
        };

        std::thread::sleep(wait);
        Ok(0)
    }

    fn discard_input(&mut self) -> std::io::Result<()> {
        let mut state = self.state();
        state.pending.clear();
        state.ready_at = None;
        Ok(())
    }
}
