//! Ordered verification strategies.
//!
//! Each address runs through the stages in order (syntax, MX, handshake,
//! heuristics) and the first stage that reaches a verdict wins. An address
//! every stage defers on is left for the bounce prober.

mod error;
mod heuristic;
mod syntax;

#[cfg(feature = "with-mx")]
mod domain;
#[cfg(feature = "with-smtp-verify")]
mod handshake;

pub use error::PipelineError;
pub use heuristic::HeuristicStrategy;
pub use syntax::SyntaxStrategy;

#[cfg(feature = "with-mx")]
pub use domain::MxStrategy;
#[cfg(feature = "with-smtp-verify")]
pub use handshake::HandshakeStrategy;

use tracing::debug;

use crate::address::Address;
use crate::config::Config;
use crate::outcome::{Category, VerificationOutcome};

/// What a single stage concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Classified { category: Category, reason: String },
    /// No opinion; the next stage decides.
    Defer,
}

impl Verdict {
    pub fn classified(category: Category, reason: impl Into<String>) -> Self {
        Self::Classified {
            category,
            reason: reason.into(),
        }
    }
}

/// One verification stage.
///
/// Implementations are pure functions of the address and their own
/// configuration, so one instance is shared by every worker. Network errors
/// are turned into a `Risky` verdict, never returned.
pub trait VerificationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn classify(&self, address: &Address) -> Verdict;
}

/// Result of running the whole pipeline on one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Decided(VerificationOutcome),
    /// Every stage deferred: hand the address to the bounce prober.
    Deferred,
}

pub struct Pipeline {
    strategies: Vec<Box<dyn VerificationStrategy>>,
}

impl Pipeline {
    pub fn new(strategies: Vec<Box<dyn VerificationStrategy>>) -> Self {
        Self { strategies }
    }

    /// Stages enabled by `config`, in canonical order. MX and handshake
    /// stages share one system resolver.
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let mut strategies: Vec<Box<dyn VerificationStrategy>> =
            vec![Box::new(SyntaxStrategy::new(config.pipeline.validation_mode))];

        #[cfg(feature = "with-mx")]
        {
            use std::sync::Arc;

            let pipeline = &config.pipeline;
            if pipeline.mx || pipeline.handshake {
                let resolver: Arc<dyn crate::mx::LookupMx> =
                    Arc::new(crate::mx::SystemResolver::from_system_conf()?);
                if pipeline.mx {
                    strategies.push(Box::new(MxStrategy::new(resolver.clone())));
                }
                #[cfg(feature = "with-smtp-verify")]
                {
                    if pipeline.handshake {
                        let probe =
                            crate::smtp::SmtpHandshake::new(resolver, config.handshake.clone())?;
                        strategies.push(Box::new(HandshakeStrategy::new(Arc::new(probe))));
                    }
                }
            }
        }

        strategies.push(Box::new(HeuristicStrategy::new(config.heuristics.clone())));
        Ok(Self::new(strategies))
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn classify(&self, address: &Address) -> Resolution {
        for strategy in &self.strategies {
            match strategy.classify(address) {
                Verdict::Classified { category, reason } => {
                    debug!(%address, strategy = strategy.name(), %category, %reason, "classified");
                    return Resolution::Decided(VerificationOutcome::new(
                        address.clone(),
                        category,
                        reason,
                        strategy.name(),
                    ));
                }
                Verdict::Defer => {}
            }
        }
        debug!(%address, "every stage deferred");
        Resolution::Deferred
    }
}
