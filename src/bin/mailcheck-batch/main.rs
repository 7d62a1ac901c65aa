mod args;
mod bounce;
mod output;
mod verify;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use args::{Cli, Commands, require_addresses};
use mailcheck_batch::jobs::{GlobalStats, JobStatusStore, history};
use mailcheck_batch::{Address, Category, Config, ConfigBuilder};

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout reste réservé aux résultats (NDJSON)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("install tracing subscriber")
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut builder = ConfigBuilder::new();
    if let Some(path) = &cli.config {
        builder = builder.file(path);
    }
    if let Some(dir) = &cli.data_dir {
        builder = builder.data_dir(dir);
    }
    builder.build().context("load configuration")
}

fn job_store(config: &Config) -> JobStatusStore {
    JobStatusStore::new(config.storage.data_dir.join("jobs"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    debug!(data_dir = %config.storage.data_dir.display(), "configuration ready");
    let format = cli.format;

    match &cli.cmd {
        Commands::Verify {
            input,
            batch,
            label,
        } => {
            let emails = require_addresses(input)?;
            let job = verify::run(&config, &emails, batch.as_deref(), label.clone(), format).await?;
            // codes de sortie : 0 OK, 2 invalids, 1 fatal
            if job.counts.get(Category::Invalid) > 0 {
                std::process::exit(2);
            }
        }
        Commands::Status { job_id } => {
            let job = job_store(&config).load(job_id)?;
            output::write_job(&job, format)?;
        }
        Commands::Jobs => {
            output::write_jobs(&job_store(&config).list()?, format)?;
        }
        Commands::Label { job_id, label } => {
            job_store(&config).set_label(job_id, label.clone())?;
            match label {
                Some(label) => println!("{job_id}: labelled '{label}'"),
                None => println!("{job_id}: label removed"),
            }
        }
        Commands::Delete { job_id } => {
            job_store(&config).delete(job_id)?;
            println!("{job_id}: deleted");
        }
        Commands::Stats { top } => {
            let jobs = job_store(&config).list()?;
            output::write_stats(&GlobalStats::collect(&jobs), *top, format)?;
        }
        Commands::History { email } => {
            let jobs = job_store(&config).list()?;
            let entries = history(&jobs, &Address::normalize(email));
            output::write_history(email, &entries, format)?;
        }
        Commands::Export {
            job_id,
            category,
            out,
        } => {
            let job = job_store(&config).load(job_id)?;
            output::write_csv(&job, *category, out.as_deref())?;
        }
        Commands::Bounce(cmd) => bounce::run(&config, cmd, format).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::args::{BounceCommand, Cli, Commands, Format, require_addresses};

    #[test]
    fn parses_verify_with_global_options() {
        let cli = Cli::try_parse_from([
            "mailcheck-batch",
            "verify",
            "a@example.org",
            "b@example.org",
            "--batch",
            "bounce_1_abcdef12",
            "--format",
            "ndjson",
        ])
        .unwrap();
        assert!(cli.format == Format::Ndjson);
        let Commands::Verify { input, batch, .. } = cli.cmd else {
            panic!("expected verify");
        };
        assert_eq!(input.emails.len(), 2);
        assert_eq!(batch.as_deref(), Some("bounce_1_abcdef12"));
    }

    #[test]
    fn parses_bounce_check_dry_run() {
        let cli =
            Cli::try_parse_from(["mailcheck-batch", "bounce", "check", "bounce_1_x", "--dry-run"])
                .unwrap();
        assert!(matches!(
            cli.cmd,
            Commands::Bounce(BounceCommand::Check { dry_run: true, .. })
        ));
    }

    #[test]
    fn reads_addresses_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.txt");
        std::fs::write(&list, "# export CRM\n\n  c@example.org \nd@example.org\n").unwrap();

        let path = list.to_str().unwrap();
        let cli =
            Cli::try_parse_from(["mailcheck-batch", "bounce", "send", "a@example.org", "--file", path])
                .unwrap();
        let Commands::Bounce(BounceCommand::Send { input, .. }) = cli.cmd else {
            panic!("expected bounce send");
        };
        assert_eq!(
            require_addresses(&input).unwrap(),
            vec!["a@example.org", "c@example.org", "d@example.org"]
        );
    }

    #[test]
    fn rejects_unknown_export_category() {
        assert!(
            Cli::try_parse_from(["mailcheck-batch", "export", "job_1", "--category", "maybe"])
                .is_err()
        );
    }
}
