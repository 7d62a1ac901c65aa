use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::{TlsConnector, TlsStream};
use tracing::trace;

use crate::imap::error::ImapError;

#[derive(Debug, Clone, Copy)]
pub struct ImapServer<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub secret: &'a str,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Default)]
struct Response {
    untagged: Vec<String>,
    literals: Vec<Vec<u8>>,
}

pub struct ImapSession {
    reader: BufReader<TlsStream<TcpStream>>,
    tag: u32,
}

impl ImapSession {
    /// Connects with TLS from the first byte and logs in.
    pub fn login(server: &ImapServer<'_>, connector: &TlsConnector) -> Result<Self, ImapError> {
        let connect_err = |source| ImapError::Connect {
            host: server.host.to_string(),
            source,
        };
        let addr = (server.host, server.port)
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| ImapError::Protocol(format!("{} did not resolve", server.host)))?;
        let tcp = match server.timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        }
        .map_err(connect_err)?;
        tcp.set_read_timeout(server.timeout).map_err(ImapError::io)?;
        tcp.set_write_timeout(server.timeout).map_err(ImapError::io)?;

        let tls = connector
            .connect(server.host, tcp)
            .map_err(|err| ImapError::Tls(err.to_string()))?;
        let mut session = Self {
            reader: BufReader::new(tls),
            tag: 0,
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(ImapError::Protocol(format!("unexpected greeting: {greeting}")));
        }

        let login = format!("LOGIN {} {}", quote(server.user), quote(server.secret));
        session.run("LOGIN", &login)?;
        Ok(session)
    }

    pub fn select(&mut self, mailbox: &str) -> Result<(), ImapError> {
        self.run("SELECT", &format!("SELECT {}", quote(mailbox)))
            .map(|_| ())
    }

    /// `SEARCH <criteria>`; returns message sequence numbers.
    pub fn search(&mut self, criteria: &str) -> Result<Vec<u32>, ImapError> {
        let response = self.run("SEARCH", &format!("SEARCH {criteria}"))?;
        Ok(response
            .untagged
            .iter()
            .flat_map(|line| parse_search(line))
            .collect())
    }

    pub fn fetch_rfc822(&mut self, seq: u32) -> Result<Option<Vec<u8>>, ImapError> {
        let response = self.run("FETCH", &format!("FETCH {seq} RFC822"))?;
        Ok(response.literals.into_iter().next())
    }

    pub fn mark_seen(&mut self, seq: u32) -> Result<(), ImapError> {
        self.run("STORE", &format!("STORE {seq} +FLAGS (\\Seen)"))
            .map(|_| ())
    }

    pub fn logout(mut self) {
        self.run("LOGOUT", "LOGOUT").ok();
    }

    fn run(&mut self, label: &'static str, command: &str) -> Result<Response, ImapError> {
        self.tag += 1;
        let tag = format!("a{:03}", self.tag);
        if label == "LOGIN" {
            trace!(tag = %tag, "C: LOGIN <redacted>");
        } else {
            trace!(tag = %tag, "C: {command}");
        }

        let stream = self.reader.get_mut();
        stream
            .write_all(format!("{tag} {command}\r\n").as_bytes())
            .map_err(ImapError::io)?;
        stream.flush().map_err(ImapError::io)?;

        let prefix = format!("{tag} ");
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(rest) = line.strip_prefix(&prefix) {
                let (status, text) = rest.split_once(' ').unwrap_or((rest, ""));
                if status.eq_ignore_ascii_case("OK") {
                    return Ok(response);
                }
                return Err(ImapError::Command {
                    command: label,
                    status: status.to_string(),
                    text: text.to_string(),
                });
            }
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.reader
                    .read_exact(&mut literal)
                    .map_err(ImapError::io)?;
                response.literals.push(literal);
            }
            response.untagged.push(line);
        }
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut buf)
            .map_err(ImapError::io)?;
        if read == 0 {
            return Err(ImapError::Protocol("connection closed".into()));
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// IMAP quoted string.
pub(crate) fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Sequence numbers of an untagged `* SEARCH` line; empty for anything else.
fn parse_search(line: &str) -> Vec<u32> {
    let Some(rest) = line.strip_prefix("* SEARCH") else {
        return Vec::new();
    };
    rest.split_whitespace()
        .filter_map(|token| token.parse().ok())
        .collect()
}

fn literal_len(line: &str) -> Option<usize> {
    let open = line.rfind('{')?;
    line[open + 1..].strip_suffix('}')?.parse().ok()
}
