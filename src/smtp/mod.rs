//! SMTP client pieces (`with-smtp-verify` feature).
//!
//! Two dialogues live here:
//! - the RCPT handshake used by the pipeline ([`HandshakeProbe`],
//!   [`SmtpHandshake`]), which never sends a message body;
//! - authenticated submission ([`submit_message`]) used to send bounce
//!   probes from a configured account.

mod dns;
mod error;
mod options;
mod probe;
mod session;
mod submit;
mod types;
mod util;

pub use error::SmtpError;
pub use options::SmtpProbeOptions;
pub use probe::{HandshakeProbe, SmtpHandshake};
pub use submit::{OutgoingMessage, SubmissionServer, submit_message};
pub use types::{Existence, SmtpProbeReport};
