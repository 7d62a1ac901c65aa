use anyhow::{Context, Result};
use futures::StreamExt;
use tracing::info;

use crate::args::Format;
use crate::output;
use mailcheck_batch::{Config, JobOrchestrator, VerificationJob};

/// Submits the batch, prints progress as it arrives and returns the final
/// job snapshot.
pub async fn run(
    config: &Config,
    emails: &[String],
    batch: Option<&str>,
    label: Option<String>,
    format: Format,
) -> Result<VerificationJob> {
    let orchestrator = JobOrchestrator::from_config(config).context("set up verification")?;
    info!(
        strategies = ?orchestrator.pipeline().strategy_names(),
        accounts = orchestrator.bounce().accounts().len(),
        "starting verification"
    );

    let job_id = orchestrator
        .submit(emails, batch)
        .await
        .context("submit batch")?;
    if label.is_some() {
        orchestrator.set_label(&job_id, label)?;
    }

    let mut stream = orchestrator.stream(&job_id)?;
    while let Some(event) = stream.next().await {
        output::write_event(&event, format)?;
        if event.is_final() {
            break;
        }
    }

    let job = orchestrator.wait(&job_id).await?;
    match format {
        Format::Json => output::print_json(&job)?,
        Format::Csv => output::write_csv(&job, None, None)?,
        Format::Human | Format::Ndjson => {}
    }
    Ok(job)
}
