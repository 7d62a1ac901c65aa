#[cfg(feature = "with-csv")]
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

#[cfg(feature = "with-csv")]
use anyhow::Context;
use anyhow::{Result, bail};
use serde::Serialize;

use crate::args::Format;
use mailcheck_batch::bounce::{AddressState, BatchReport, CheckSummary};
use mailcheck_batch::jobs::{GlobalStats, HistoryEntry, JobSummary};
use mailcheck_batch::{Address, Category, CategoryCounts, ProgressEvent, VerificationJob};

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_ndjson<'a, T: Serialize + 'a>(rows: impl IntoIterator<Item = &'a T>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn counts_line(counts: &CategoryCounts) -> String {
    Category::ALL
        .iter()
        .map(|c| format!("{c}={}", counts.get(*c)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn tag(category: Category) -> &'static str {
    match category {
        Category::Valid => "[OK]     ",
        Category::Invalid => "[INVALID]",
        Category::Risky => "[RISKY]  ",
        Category::Custom => "[CUSTOM] ",
    }
}

/// One progress event in the requested format. `Csv` prints nothing here,
/// the caller exports once the job is finished.
pub fn write_event(event: &ProgressEvent, format: Format) -> Result<()> {
    match format {
        Format::Ndjson => print_ndjson([event]),
        Format::Human => {
            match event {
                ProgressEvent::Started(e) => {
                    println!("job {} started: {} address(es)", e.job_id, e.total_emails);
                }
                ProgressEvent::Outcome(e) => {
                    println!("{} {} :: {}", tag(e.status), e.email, e.reason);
                }
                ProgressEvent::Finished(e) => {
                    println!(
                        "job {} {}: {}/{} verified ({})",
                        e.job_id,
                        e.status,
                        e.verified_emails,
                        e.total_emails,
                        counts_line(&e.results_by_category)
                    );
                    if let Some(error) = &e.error {
                        println!("        error: {error}");
                    }
                }
            }
            Ok(())
        }
        Format::Json | Format::Csv => Ok(()),
    }
}

pub fn write_job(job: &VerificationJob, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(job),
        Format::Ndjson => print_ndjson(job.outcomes.values()),
        Format::Csv => write_csv(job, None, None),
        Format::Human => {
            let summary = job.summary();
            write_summary_human(&summary);
            if let Some(batch) = &job.bounce_batch {
                println!("        bounce batch: {batch}");
            }
            for outcome in job.outcomes.values() {
                println!("  {} {} :: {}", tag(outcome.category), outcome.email, outcome.reason);
            }
            let unresolved = job.unresolved().count();
            if unresolved > 0 {
                println!("  ({unresolved} address(es) not resolved yet)");
            }
            Ok(())
        }
    }
}

fn write_summary_human(summary: &JobSummary) {
    let label = summary
        .label
        .as_deref()
        .map(|l| format!(" [{l}]"))
        .unwrap_or_default();
    println!(
        "{}{label} {} {}/{} ({}) started {}",
        summary.job_id,
        summary.status,
        summary.verified_emails,
        summary.total_emails,
        counts_line(&summary.results_by_category),
        summary.started.format("%Y-%m-%d %H:%M:%S")
    );
}

pub fn write_jobs(jobs: &[VerificationJob], format: Format) -> Result<()> {
    let summaries: Vec<JobSummary> = jobs.iter().map(VerificationJob::summary).collect();
    match format {
        Format::Json => print_json(&summaries),
        Format::Ndjson => print_ndjson(&summaries),
        Format::Csv => bail!("format=csv is only available for job results (use `export`)"),
        Format::Human => {
            if summaries.is_empty() {
                println!("no jobs");
            }
            summaries.iter().for_each(write_summary_human);
            Ok(())
        }
    }
}

pub fn write_stats(stats: &GlobalStats, top: usize, format: Format) -> Result<()> {
    match format {
        Format::Json | Format::Ndjson => print_json(stats),
        Format::Csv => bail!("format=csv is not available for stats"),
        Format::Human => {
            println!(
                "{} job(s), {} outcome(s): {}",
                stats.jobs,
                stats.addresses,
                counts_line(&stats.results_by_category)
            );
            for (domain, counts) in stats.top_domains(top) {
                println!("  {domain:<30} {:>6}  {}", counts.total(), counts_line(counts));
            }
            for (category, reasons) in &stats.reasons {
                println!("{category}:");
                let mut reasons: Vec<_> = reasons.iter().collect();
                reasons.sort_by(|a, b| b.1.cmp(a.1));
                for (reason, n) in reasons {
                    println!("  {n:>6}  {reason}");
                }
            }
            Ok(())
        }
    }
}

pub fn write_history(email: &str, entries: &[HistoryEntry], format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(entries),
        Format::Ndjson => print_ndjson(entries),
        Format::Csv => bail!("format=csv is not available for history"),
        Format::Human => {
            if entries.is_empty() {
                println!("{email}: never verified");
            }
            for entry in entries {
                println!(
                    "{} {} {} :: {} ({})",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.job_id,
                    tag(entry.category),
                    entry.reason,
                    entry.strategy
                );
            }
            Ok(())
        }
    }
}

pub fn write_batch_reports(reports: &[BatchReport], format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(reports),
        Format::Ndjson => print_ndjson(reports),
        Format::Csv => bail!("format=csv is not available for bounce batches"),
        Format::Human => {
            if reports.is_empty() {
                println!("no bounce batches");
            }
            for report in reports {
                let estimate = report
                    .remaining_time_estimate
                    .as_deref()
                    .map(|e| format!(", {e} left"))
                    .unwrap_or_default();
                println!(
                    "{} {} {:.0}% valid={} invalid={} risky={} pending={} attempts={}{estimate}",
                    report.batch_id,
                    report.status,
                    report.progress_percentage,
                    report.valid,
                    report.invalid,
                    report.risky,
                    report.pending,
                    report.checking_attempts,
                );
            }
            Ok(())
        }
    }
}

pub fn write_check(
    batch_id: &str,
    summary: &CheckSummary,
    dry_run: bool,
    format: Format,
) -> Result<()> {
    match format {
        Format::Json | Format::Ndjson => print_json(summary),
        Format::Csv => bail!("format=csv is not available for bounce checks"),
        Format::Human => {
            let mode = if dry_run { " (dry run, nothing recorded)" } else { "" };
            println!("{batch_id}{mode}");
            for address in &summary.invalid {
                println!("  {} {address} :: bounce received", tag(Category::Invalid));
            }
            for address in &summary.valid {
                println!("  {} {address} :: no bounce received", tag(Category::Valid));
            }
            for account in &summary.skipped_accounts {
                println!("  skipped account {account}");
            }
            Ok(())
        }
    }
}

#[cfg(feature = "with-csv")]
pub fn write_csv(job: &VerificationJob, only: Option<Category>, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
            mailcheck_batch::export::write_outcomes(job, only, file)?;
        }
        None => mailcheck_batch::export::write_outcomes(job, only, io::stdout().lock())?,
    }
    Ok(())
}

#[cfg(not(feature = "with-csv"))]
pub fn write_csv(_: &VerificationJob, _: Option<Category>, _: Option<&Path>) -> Result<()> {
    bail!("format=csv nécessite la feature 'with-csv'")
}

#[cfg(feature = "with-csv")]
pub fn write_address_csv(addresses: &[Address], state: AddressState) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(io::stdout());
    wtr.write_record(["email", "state"])?;
    for address in addresses {
        wtr.write_record([address.as_str(), state.as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(not(feature = "with-csv"))]
pub fn write_address_csv(_: &[Address], _: AddressState) -> Result<()> {
    bail!("format=csv nécessite la feature 'with-csv'")
}
