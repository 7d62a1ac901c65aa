//! Minimal IMAP4rev1 client over implicit TLS (`with-smtp-verify` feature).
//!
//! Only what the bounce scanner needs: LOGIN, SELECT, SEARCH, FETCH RFC822,
//! STORE +FLAGS and LOGOUT.

mod error;
mod session;

pub use error::ImapError;
pub use session::{ImapServer, ImapSession};

pub(crate) use session::quote;
