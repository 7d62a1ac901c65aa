use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mailcheck_batch::Category;
use mailcheck_batch::bounce::AddressState;

#[derive(Parser)]
#[command(name = "mailcheck-batch", version, about = "Vérification d'adresses e-mail en masse")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,

    /// fichier de configuration TOML
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// répertoire des données (prend le pas sur [storage] data_dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// format: human|json|ndjson|csv
    #[arg(long, value_enum, default_value_t = Format::Human, global = true)]
    pub format: Format,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Human,
    Json,
    Ndjson,
    Csv,
}

/// Where addresses come from: positional arguments, a file, or stdin.
#[derive(Args)]
pub struct AddressInput {
    /// adresses à vérifier
    pub emails: Vec<String>,

    /// lit des adresses depuis stdin (une par ligne)
    #[arg(long)]
    pub stdin: bool,

    /// lit des adresses depuis un fichier (une par ligne)
    #[arg(long, conflicts_with = "stdin")]
    pub file: Option<PathBuf>,
}

impl AddressInput {
    /// Every non-empty, non-comment line, plus positional addresses.
    pub fn collect(&self) -> Result<Vec<String>> {
        let mut emails = self.emails.clone();
        if self.stdin {
            for line in io::stdin().lock().lines() {
                push_line(&mut emails, &line.context("read stdin")?);
            }
        }
        if let Some(path) = &self.file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("read {}", path.display()))?;
            for line in content.lines() {
                push_line(&mut emails, line);
            }
        }
        Ok(emails)
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && !self.stdin && self.file.is_none()
    }
}

fn push_line(emails: &mut Vec<String>, line: &str) {
    let line = line.trim();
    if !line.is_empty() && !line.starts_with('#') {
        emails.push(line.to_string());
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// soumet un lot et suit sa progression
    Verify {
        #[command(flatten)]
        input: AddressInput,
        /// réutilise un lot de bounce existant
        #[arg(long)]
        batch: Option<String>,
        /// libellé attaché au job
        #[arg(long)]
        label: Option<String>,
    },
    /// état complet d'un job
    Status { job_id: String },
    /// liste des jobs connus
    Jobs,
    /// attache (ou retire) un libellé
    Label {
        job_id: String,
        /// sans valeur: retire le libellé
        label: Option<String>,
    },
    /// supprime l'enregistrement d'un job
    Delete { job_id: String },
    /// statistiques globales sur tous les jobs
    Stats {
        /// nombre de domaines affichés
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// historique d'une adresse à travers les jobs
    History { email: String },
    /// exporte les résultats d'un job en CSV
    Export {
        job_id: String,
        /// valid|invalid|risky|custom
        #[arg(long, value_parser = parse_category)]
        category: Option<Category>,
        /// fichier de sortie (stdout sinon)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// lots de bounce probes
    #[command(subcommand)]
    Bounce(BounceCommand),
}

#[derive(Subcommand)]
pub enum BounceCommand {
    /// envoie des probes (nouveau lot ou --batch)
    Send {
        #[command(flatten)]
        input: AddressInput,
        #[arg(long)]
        batch: Option<String>,
    },
    /// scanne les boîtes de réception
    Check {
        batch_id: String,
        /// n'enregistre rien, ne compte pas comme tentative
        #[arg(long)]
        dry_run: bool,
    },
    Status { batch_id: String },
    List,
    /// adresses d'un lot dans un état donné
    Pending {
        batch_id: String,
        /// pending|valid|invalid
        #[arg(long, default_value = "pending", value_parser = parse_state)]
        state: AddressState,
    },
}

fn parse_category(s: &str) -> Result<Category, String> {
    s.parse()
}

fn parse_state(s: &str) -> Result<AddressState, String> {
    s.parse()
}

pub fn require_addresses(input: &AddressInput) -> Result<Vec<String>> {
    if input.is_empty() {
        bail!("no addresses given (pass them as arguments, --stdin or --file)");
    }
    input.collect()
}
