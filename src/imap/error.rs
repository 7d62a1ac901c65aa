use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImapError {
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
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("{command} failed: {status} {text}")]
    Command {
        command: &'static str,
        status: String,
        text: String,
    },
}

impl ImapError {
    pub(crate) fn io(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}
