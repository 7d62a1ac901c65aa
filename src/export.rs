//! CSV export of a job's outcomes.

use std::io::Write;

use crate::jobs::VerificationJob;
use crate::outcome::{Category, VerificationOutcome};

pub const CSV_HEADER: [&str; 6] = ["email", "category", "reason", "provider", "strategy", "timestamp"];

/// Writes one row per outcome, in address order, optionally restricted to
/// one category.
pub fn write_outcomes<W: Write>(
    job: &VerificationJob,
    only: Option<Category>,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(CSV_HEADER)?;
    let outcomes: Vec<&VerificationOutcome> = match only {
        Some(category) => job.in_category(category).collect(),
        None => job.outcomes.values().collect(),
    };
    for outcome in outcomes {
        let timestamp = outcome.timestamp.to_rfc3339();
        wtr.write_record([
            outcome.email.as_str(),
            outcome.category.as_str(),
            outcome.reason.as_str(),
            outcome.provider.as_str(),
            outcome.strategy.as_str(),
            timestamp.as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
