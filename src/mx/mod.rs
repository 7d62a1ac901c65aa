//! DNS MX resolution (optional `with-mx` feature).
//!
//! [`check_mx`] performs a synchronous lookup with the system resolver. The
//! [`LookupMx`] seam lets the pipeline's domain strategy run against any
//! resolver, including the stub used in tests.

mod error;
mod resolver;
mod types;

pub use error::MxError as Error;
pub use resolver::{LookupMx, SystemResolver, check_mx, resolve_with};
pub use types::{MxRecord, MxStatus};
