use trust_dns_resolver::Resolver;
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::op::ResponseCode;

use super::{Error, MxRecord, MxStatus};

/// Lookup MX records for `domain` using the system resolver.
///
/// The domain is normalized via IDNA before querying DNS. The resulting
/// [`MxStatus`] contains the sorted list of records (ascending preference).
pub fn check_mx(domain: &str) -> Result<MxStatus, Error> {
    let ascii = normalize_domain(domain)?;
    let resolver = SystemResolver::from_system_conf()?;
    resolve_with(&resolver, &ascii)
}

pub fn resolve_with<R>(resolver: &R, ascii_domain: &str) -> Result<MxStatus, Error>
where
    R: LookupMx + ?Sized,
{
    let mut records = resolver.lookup_mx(ascii_domain).map_err(Error::lookup)?;

    records.sort();
    records.dedup();

    if records.is_empty() {
        Ok(MxStatus::NoRecords)
    } else {
        Ok(MxStatus::Records(records))
    }
}

pub(crate) fn normalize_domain(domain: &str) -> Result<String, Error> {
    let trimmed = domain.trim();
    if trimmed.is_empty() {
        return Err(Error::EmptyDomain);
    }
    idna::domain_to_ascii(trimmed).map_err(Error::idna)
}

pub(crate) fn normalize_exchange(exchange: String) -> String {
    let trimmed = exchange.trim_end_matches('.');
    trimmed.to_ascii_lowercase()
}

/// Source of MX records. Implementations must be shareable across workers.
pub trait LookupMx: Send + Sync {
    fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, ResolveError>;
}

/// Blocking resolver backed by the system configuration.
pub struct SystemResolver {
    inner: Resolver,
}

impl SystemResolver {
    pub fn from_system_conf() -> Result<Self, Error> {
        let inner = Resolver::from_system_conf().map_err(Error::resolver_init)?;
        Ok(Self { inner })
    }
}

impl LookupMx for SystemResolver {
    fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, ResolveError> {
        let lookup = match self.inner.mx_lookup(domain) {
            Ok(lookup) => lookup,
            // pas de MX mais le domaine existe: liste vide, pas une erreur
            Err(err) if is_empty_answer(&err) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(lookup
            .iter()
            .map(|mx| {
                MxRecord::new(
                    mx.preference(),
                    normalize_exchange(mx.exchange().to_utf8()),
                )
            })
            .collect())
    }
}

fn is_empty_answer(err: &ResolveError) -> bool {
    matches!(
        err.kind(),
        ResolveErrorKind::NoRecordsFound { response_code, .. }
            if *response_code != ResponseCode::NXDomain
    )
}
