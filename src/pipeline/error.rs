use thiserror::Error;

/// Failure to build the pipeline. Classification itself never fails.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[cfg(feature = "with-mx")]
    #[error("cannot set up MX resolver: {0}")]
    Resolver(#[from] crate::mx::Error),
    #[cfg(feature = "with-smtp-verify")]
    #[error("cannot set up SMTP handshake: {0}")]
    Handshake(#[from] crate::smtp::SmtpError),
}
