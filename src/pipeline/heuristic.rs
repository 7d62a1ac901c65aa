use std::collections::HashSet;

use crate::address::{Address, analyze_charset};
use crate::config::HeuristicOptions;
use crate::outcome::Category;
use crate::pipeline::{Verdict, VerificationStrategy};

/// Judgment calls on the address text alone.
pub struct HeuristicStrategy {
    role_locals: HashSet<String>,
    disposable_domains: HashSet<String>,
    flag_confusables: bool,
}

impl HeuristicStrategy {
    pub fn new(options: HeuristicOptions) -> Self {
        let lower = |items: Vec<String>| -> HashSet<String> {
            items.into_iter().map(|s| s.trim().to_lowercase()).collect()
        };
        Self {
            role_locals: lower(options.role_locals),
            disposable_domains: lower(options.disposable_domains),
            flag_confusables: options.flag_confusables,
        }
    }

    fn is_disposable(&self, domain: &str) -> bool {
        // sub.mailinator.com compte aussi
        let mut rest = domain;
        loop {
            if self.disposable_domains.contains(rest) {
                return true;
            }
            match rest.split_once('.') {
                Some((_, parent)) if parent.contains('.') => rest = parent,
                _ => return false,
            }
        }
    }
}

impl VerificationStrategy for HeuristicStrategy {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn classify(&self, address: &Address) -> Verdict {
        if self.flag_confusables {
            let report = analyze_charset(address.local(), address.domain());
            if let Some(reason) = report.describe() {
                return Verdict::classified(Category::Risky, reason);
            }
        }

        if self.is_disposable(address.domain()) {
            return Verdict::classified(Category::Risky, "disposable domain");
        }

        let local = address.local();
        let base = local.split_once('+').map_or(local, |(base, _)| base);
        if self.role_locals.contains(base) {
            return Verdict::classified(Category::Custom, "role-based address");
        }

        Verdict::Defer
    }
}
