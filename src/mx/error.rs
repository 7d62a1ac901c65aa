use thiserror::Error;

#[derive(Debug, Error)]
pub enum MxError {
    #[error("domain is empty")]
    EmptyDomain,
    #[error("domain IDNA conversion failed")]
    IdnaConversion {
        #[source]
        source: idna::Errors,
    },
    #[error("resolver initialization failed: {source}")]
    ResolverInit {
        #[source]
        source: std::io::Error,
    },
    #[error("MX lookup failed: {source}")]
    Lookup {
        #[source]
        source: trust_dns_resolver::error::ResolveError,
    },
}

impl MxError {
    pub(crate) fn idna(source: idna::Errors) -> Self {
        Self::IdnaConversion { source }
    }

    pub(crate) fn resolver_init(source: std::io::Error) -> Self {
        Self::ResolverInit { source }
    }

    pub(crate) fn lookup(source: trust_dns_resolver::error::ResolveError) -> Self {
        Self::Lookup { source }
    }

    /// True when the failure says the domain does not exist at all (NXDOMAIN),
    /// as opposed to a resolver or network problem.
    pub fn is_nonexistent_domain(&self) -> bool {
        match self {
            Self::Lookup { source } => matches!(
                source.kind(),
                trust_dns_resolver::error::ResolveErrorKind::NoRecordsFound {
                    response_code: trust_dns_resolver::proto::op::ResponseCode::NXDomain,
                    ..
                }
            ),
            _ => false,
        }
    }
}
