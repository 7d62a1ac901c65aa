use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use native_tls::{HandshakeError, TlsConnector, TlsStream};

use crate::smtp::error::SmtpError;

#[derive(Debug, Clone)]
pub struct SmtpReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl SmtpReply {
    pub fn is_positive_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_positive_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    pub fn is_transient_failure(&self) -> bool {
        (400..500).contains(&self.code)
    }

    pub fn is_permanent_failure(&self) -> bool {
        (500..600).contains(&self.code)
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.lines.iter().any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|token| token.eq_ignore_ascii_case(cap))
        })
    }

    pub fn text(&self) -> String {
        self.lines.join(" ")
    }
}

#[derive(Debug)]
enum StreamState {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Invalid,
}

#[derive(Debug)]
pub struct SmtpStream {
    state: StreamState,
    buffer: Vec<u8>,
}

impl SmtpStream {
    pub fn connect(addr: &SocketAddr, timeout: Option<Duration>) -> Result<Self, SmtpError> {
        let stream = match timeout {
            Some(timeout) => TcpStream::connect_timeout(addr, timeout),
            None => TcpStream::connect(addr),
        }
        .map_err(|err| SmtpError::connect(addr.to_string(), err))?;
        stream.set_read_timeout(timeout).map_err(SmtpError::io)?;
        stream.set_write_timeout(timeout).map_err(SmtpError::io)?;
        Ok(Self {
            state: StreamState::Plain(stream),
            buffer: Vec::new(),
        })
    }

    /// Wraps the current plain connection in TLS (STARTTLS or implicit TLS on
    /// port 465). Already-encrypted streams are left untouched.
    pub fn upgrade_tls(
        &mut self,
        domain: &str,
        connector: &TlsConnector,
        timeout: Option<Duration>,
    ) -> Result<(), SmtpError> {
        let plain = match std::mem::replace(&mut self.state, StreamState::Invalid) {
            StreamState::Plain(stream) => stream,
            StreamState::Tls(stream) => {
                self.state = StreamState::Tls(stream);
                return Ok(());
            }
            StreamState::Invalid => {
                return Err(SmtpError::Protocol("invalid stream state".into()));
            }
        };

        let mut tls = complete_handshake(connector, domain, plain)?;
        tls.get_mut()
            .set_read_timeout(timeout)
            .map_err(SmtpError::io)?;
        tls.get_mut()
            .set_write_timeout(timeout)
            .map_err(SmtpError::io)?;
        self.state = StreamState::Tls(Box::new(tls));
        // anything buffered before the handshake belongs to the plain session
        self.buffer.clear();
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.state, StreamState::Tls(_))
    }

    pub fn send_command(&mut self, command: &str) -> Result<(), SmtpError> {
        let mut data = Vec::with_capacity(command.len() + 2);
        data.extend_from_slice(command.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.write_all(&data)
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), SmtpError> {
        let io = self.io()?;
        io.write_all(data).map_err(SmtpError::io)?;
        io.flush().map_err(SmtpError::io)
    }

    pub fn read_reply(&mut self) -> Result<SmtpReply, SmtpError> {
        let mut lines = Vec::new();
        let mut code: Option<u16> = None;
        loop {
            let line = self.read_line()?;
            if line.len() < 3 {
                return Err(SmtpError::Protocol(format!("invalid reply: {line}")));
            }
            let parsed_code = line[..3]
                .parse::<u16>()
                .map_err(|_| SmtpError::Protocol(format!("invalid code in line: {line}")))?;
            match code {
                Some(existing) if existing != parsed_code => {
                    return Err(SmtpError::Protocol(format!(
                        "inconsistent reply codes: {existing} vs {parsed_code}"
                    )));
                }
                Some(_) => {}
                None => code = Some(parsed_code),
            }
            let is_last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line.get(4..).unwrap_or_default().to_string());
            if is_last {
                break;
            }
        }
        Ok(SmtpReply {
            code: code.unwrap_or(0),
            lines,
        })
    }

    fn io(&mut self) -> Result<&mut dyn ReadWrite, SmtpError> {
        match &mut self.state {
            StreamState::Plain(stream) => Ok(stream),
            StreamState::Tls(stream) => Ok(stream.as_mut()),
            StreamState::Invalid => Err(SmtpError::Protocol("invalid stream state".into())),
        }
    }

    fn read_line(&mut self) -> Result<String, SmtpError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
                let mut line = self.buffer.drain(..=pos).collect::<Vec<_>>();
                while matches!(line.last(), Some(b'\n' | b'\r')) {
                    line.pop();
                }
                return String::from_utf8(line)
                    .map_err(|err| SmtpError::Protocol(format!("utf8 error: {err}")));
            }

            let mut buf = [0u8; 512];
            let read = self.io()?.read(&mut buf).map_err(SmtpError::io)?;
            if read == 0 {
                return Err(SmtpError::io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }
            self.buffer.extend_from_slice(&buf[..read]);
        }
    }
}

trait ReadWrite: Read + Write {}
impl<T: Read + Write> ReadWrite for T {}

fn complete_handshake(
    connector: &TlsConnector,
    domain: &str,
    stream: TcpStream,
) -> Result<TlsStream<TcpStream>, SmtpError> {
    match connector.connect(domain, stream) {
        Ok(tls) => Ok(tls),
        Err(HandshakeError::Failure(err)) => Err(SmtpError::Tls { source: err }),
        Err(HandshakeError::WouldBlock(mut mid)) => loop {
            match mid.handshake() {
                Ok(tls) => break Ok(tls),
                Err(HandshakeError::Failure(err)) => {
                    break Err(SmtpError::Tls { source: err });
                }
                Err(HandshakeError::WouldBlock(next)) => mid = next,
            }
        },
    }
}

pub struct SmtpSession {
    host: String,
    pub stream: SmtpStream,
    pub transcript: Vec<String>,
}

impl SmtpSession {
    pub fn connect(
        host: &str,
        addresses: &[SocketAddr],
        timeout: Option<Duration>,
    ) -> Result<Self, SmtpError> {
        let mut last_err = None;
        for addr in addresses {
            match SmtpStream::connect(addr, timeout) {
                Ok(stream) => {
                    return Ok(Self {
                        host: host.to_string(),
                        stream,
                        transcript: Vec::new(),
                    });
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or(SmtpError::NoSmtpServers))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn record(&mut self, direction: &str, message: &str) {
        self.transcript
            .push(format!("[{}] {direction}: {message}", self.host));
    }

    pub fn read_banner(&mut self) -> Result<SmtpReply, SmtpError> {
        let reply = self.stream.read_reply()?;
        self.record_reply(&reply);
        Ok(reply)
    }

    pub fn send_command(&mut self, command: &str) -> Result<SmtpReply, SmtpError> {
        self.record("C", command);
        self.exchange(command)
    }

    pub fn starttls(
        &mut self,
        connector: &TlsConnector,
        timeout: Option<Duration>,
    ) -> Result<SmtpReply, SmtpError> {
        let reply = self.send_command("STARTTLS")?;
        if !reply.is_positive_completion() {
            return Ok(reply);
        }
        let host = self.host.clone();
        self.stream.upgrade_tls(&host, connector, timeout)?;
        Ok(reply)
    }

    /// `AUTH LOGIN`; credentials never reach the transcript.
    pub fn auth_login(&mut self, user: &str, secret: &str) -> Result<(), SmtpError> {
        self.record("C", "AUTH LOGIN <redacted>");
        let reply = self.exchange("AUTH LOGIN")?;
        if !reply.is_positive_intermediate() {
            return Err(SmtpError::auth(reply.code, reply.text()));
        }
        let reply = self.exchange(&BASE64.encode(user))?;
        if !reply.is_positive_intermediate() {
            return Err(SmtpError::auth(reply.code, reply.text()));
        }
        let reply = self.exchange(&BASE64.encode(secret))?;
        if !reply.is_positive_completion() {
            return Err(SmtpError::auth(reply.code, reply.text()));
        }
        Ok(())
    }

    /// Sends `DATA` followed by the dot-stuffed payload.
    pub fn send_data(&mut self, payload: &str) -> Result<SmtpReply, SmtpError> {
        let reply = self.send_command("DATA")?;
        if reply.code != 354 {
            return Err(SmtpError::rejected("DATA", reply.code, reply.text()));
        }
        let mut body = String::with_capacity(payload.len() + 8);
        for line in payload.lines() {
            if line.starts_with('.') {
                body.push('.');
            }
            body.push_str(line);
            body.push_str("\r\n");
        }
        body.push_str(".\r\n");
        self.record("C", "<message body>");
        self.stream.write_all(body.as_bytes())?;
        let reply = self.stream.read_reply()?;
        self.record_reply(&reply);
        Ok(reply)
    }

    pub fn quit(&mut self) -> Result<(), SmtpError> {
        self.record("C", "QUIT");
        self.stream.send_command("QUIT")?;
        if let Ok(reply) = self.stream.read_reply() {
            self.record_reply(&reply);
        }
        Ok(())
    }

    fn exchange(&mut self, command: &str) -> Result<SmtpReply, SmtpError> {
        self.stream.send_command(command)?;
        let reply = self.stream.read_reply()?;
        self.record_reply(&reply);
        Ok(reply)
    }

    fn record_reply(&mut self, reply: &SmtpReply) {
        if reply.lines.is_empty() {
            self.record("S", &format!("{}", reply.code));
        } else {
            for line in &reply.lines {
                self.record("S", &format!("{} {}", reply.code, line));
            }
        }
    }
}
