use anyhow::{Context, Result, bail};

use crate::args::{BounceCommand, Format, require_addresses};
use crate::output;
use mailcheck_batch::{Address, BounceProbeEngine, Config};

pub async fn run(config: &Config, cmd: &BounceCommand, format: Format) -> Result<()> {
    let engine = BounceProbeEngine::from_config(config).context("set up bounce transports")?;

    match cmd {
        BounceCommand::Send { input, batch } => {
            if !engine.has_accounts() {
                bail!("no accounts configured, add [[accounts]] to the configuration");
            }
            let addresses: Vec<Address> = require_addresses(input)?
                .iter()
                .map(|raw| Address::normalize(raw))
                .collect();
            let report = engine.send_probes(&addresses, batch.as_deref()).await?;
            match format {
                Format::Human => {
                    println!("{}: {} probe(s) sent", report.batch_id, report.sent.len());
                    for (address, error) in &report.failed {
                        println!("  [FAILED] {address} :: {error}");
                    }
                    for (address, state) in &report.already_resolved {
                        println!("  [SKIPPED] {address} :: already {state}");
                    }
                }
                _ => output::print_json(&engine.status(&report.batch_id)?)?,
            }
        }
        BounceCommand::Check { batch_id, dry_run } => {
            let summary = engine.check_responses(batch_id, !dry_run).await?;
            output::write_check(batch_id, &summary, *dry_run, format)?;
            if format == Format::Human {
                output::write_batch_reports(&[engine.status(batch_id)?], format)?;
            }
        }
        BounceCommand::Status { batch_id } => {
            output::write_batch_reports(&[engine.status(batch_id)?], format)?;
        }
        BounceCommand::List => {
            output::write_batch_reports(&engine.list_batches()?, format)?;
        }
        BounceCommand::Pending { batch_id, state } => {
            let addresses = engine.addresses_in_state(batch_id, *state)?;
            match format {
                Format::Human => addresses.iter().for_each(|a| println!("{a}")),
                Format::Json => output::print_json(&addresses)?,
                Format::Ndjson => output::print_ndjson(&addresses)?,
                Format::Csv => output::write_address_csv(&addresses, *state)?,
            }
        }
    }
    Ok(())
}

