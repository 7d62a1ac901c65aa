use std::sync::Arc;

use crate::address::Address;
use crate::mx::{LookupMx, MxStatus, resolve_with};
use crate::outcome::Category;
use crate::pipeline::{Verdict, VerificationStrategy};

/// Domain existence through its MX records.
pub struct MxStrategy {
    resolver: Arc<dyn LookupMx>,
}

impl MxStrategy {
    pub fn new(resolver: Arc<dyn LookupMx>) -> Self {
        Self { resolver }
    }
}

impl VerificationStrategy for MxStrategy {
    fn name(&self) -> &'static str {
        "mx"
    }

    fn classify(&self, address: &Address) -> Verdict {
        let ascii = match idna::domain_to_ascii(address.domain()) {
            Ok(ascii) if !ascii.is_empty() => ascii,
            _ => return Verdict::classified(Category::Invalid, "domain cannot be encoded"),
        };

        match resolve_with(self.resolver.as_ref(), &ascii) {
            Ok(MxStatus::Records(_)) => Verdict::Defer,
            Ok(MxStatus::NoRecords) => {
                Verdict::classified(Category::Invalid, "domain has no MX records")
            }
            Err(err) if err.is_nonexistent_domain() => {
                Verdict::classified(Category::Invalid, "domain does not exist")
            }
            Err(err) => Verdict::classified(Category::Risky, err.to_string()),
        }
    }
}
