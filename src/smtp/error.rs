use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmtpError {
    #[error("invalid email address: {reasons:?}")]
    InvalidEmail { reasons: Vec<String> },
    #[error("MX lookup failed: {source}")]
    Lookup {
        #[source]
        source: crate::mx::Error,
    },
    #[error("no SMTP servers available for the domain")]
    NoSmtpServers,
    #[error("connection to {host} failed: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
    #[error("TLS handshake failed: {source}")]
    Tls {
        #[source]
        source: native_tls::Error,
    },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("STARTTLS required but not advertised by {host}")]
    StartTlsUnavailable { host: String },
    #[error("authentication failed ({code}): {message}")]
    Auth { code: u16, message: String },
    #[error("{command} rejected ({code}): {message}")]
    Rejected {
        command: &'static str,
        code: u16,
        message: String,
    },
}

impl SmtpError {
    pub(crate) fn io(source: std::io::Error) -> Self {
        Self::Io { source }
    }

    pub(crate) fn connect(host: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connect {
            host: host.into(),
            source,
        }
    }

    pub(crate) fn auth(code: u16, message: impl Into<String>) -> Self {
        Self::Auth {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn rejected(command: &'static str, code: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            command,
            code,
            message: message.into(),
        }
    }
}
