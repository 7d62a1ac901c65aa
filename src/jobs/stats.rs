//! Aggregates over every persisted job.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::address::Address;
use crate::jobs::types::{JobId, VerificationJob};
use crate::outcome::{Category, CategoryCounts};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub jobs: usize,
    pub addresses: usize,
    pub results_by_category: CategoryCounts,
    pub by_domain: BTreeMap<String, CategoryCounts>,
    /// Category → reason → count.
    pub reasons: BTreeMap<Category, BTreeMap<String, usize>>,
}

impl GlobalStats {
    pub fn collect<'a>(jobs: impl IntoIterator<Item = &'a VerificationJob>) -> Self {
        let mut stats = Self::default();
        for job in jobs {
            stats.jobs += 1;
            for outcome in job.outcomes.values() {
                stats.addresses += 1;
                stats.results_by_category.increment(outcome.category);
                stats
                    .by_domain
                    .entry(outcome.email.domain().to_string())
                    .or_default()
                    .increment(outcome.category);
                *stats
                    .reasons
                    .entry(outcome.category)
                    .or_default()
                    .entry(outcome.reason.clone())
                    .or_default() += 1;
            }
        }
        stats
    }

    /// Domains by number of outcomes, largest first.
    pub fn top_domains(&self, limit: usize) -> Vec<(&str, &CategoryCounts)> {
        let mut domains: Vec<(&str, &CategoryCounts)> = self
            .by_domain
            .iter()
            .map(|(domain, counts)| (domain.as_str(), counts))
            .collect();
        domains.sort_by(|a, b| b.1.total().cmp(&a.1.total()).then_with(|| a.0.cmp(b.0)));
        domains.truncate(limit);
        domains
    }
}

/// One verification of an address, as recorded by some job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub category: Category,
    pub reason: String,
    pub strategy: String,
    pub timestamp: DateTime<Utc>,
}

/// Every recorded outcome for `address`, oldest first.
pub fn history<'a>(
    jobs: impl IntoIterator<Item = &'a VerificationJob>,
    address: &Address,
) -> Vec<HistoryEntry> {
    let mut entries: Vec<HistoryEntry> = jobs
        .into_iter()
        .filter_map(|job| {
            job.outcomes.get(address).map(|outcome| HistoryEntry {
                job_id: job.id.clone(),
                label: job.label.clone(),
                category: outcome.category,
                reason: outcome.reason.clone(),
                strategy: outcome.strategy.clone(),
                timestamp: outcome.timestamp,
            })
        })
        .collect();
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    entries
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::outcome::VerificationOutcome;

    fn job(id: &str, outcomes: &[(&str, Category, &str, i64)]) -> VerificationJob {
        let addresses = outcomes.iter().map(|(a, ..)| Address::normalize(a)).collect();
        let mut job = VerificationJob::new(id, addresses, Utc.timestamp_opt(0, 0).unwrap());
        for (email, category, reason, second) in outcomes {
            let mut outcome =
                VerificationOutcome::new(Address::normalize(email), *category, *reason, "test");
            outcome.timestamp = Utc.timestamp_opt(*second, 0).unwrap();
            job.merge(outcome);
        }
        job
    }

    #[test]
    fn totals_domains_and_reasons() {
        let jobs = [
            job(
                "job_1",
                &[
                    ("a@example.org", Category::Valid, "mailbox accepted by server", 1),
                    ("b@example.org", Category::Invalid, "domain has no MX records", 2),
                ],
            ),
            job(
                "job_2",
                &[
                    ("a@example.org", Category::Risky, "failed to send probe", 3),
                    ("c@other.net", Category::Invalid, "domain has no MX records", 4),
                ],
            ),
        ];
        let stats = GlobalStats::collect(&jobs);
        assert_eq!(stats.jobs, 2);
        assert_eq!(stats.addresses, 4);
        assert_eq!(stats.results_by_category.invalid, 2);
        assert_eq!(stats.by_domain["example.org"].total(), 3);
        assert_eq!(stats.reasons[&Category::Invalid]["domain has no MX records"], 2);
        assert_eq!(stats.top_domains(1), vec![("example.org", &stats.by_domain["example.org"])]);
    }

    #[test]
    fn history_is_chronological() {
        let jobs = [
            job("job_2", &[("a@example.org", Category::Risky, "later", 20)]),
            job("job_1", &[("a@example.org", Category::Valid, "earlier", 10)]),
            job("job_3", &[("z@example.org", Category::Valid, "other", 5)]),
        ];
        let entries = history(&jobs, &Address::normalize("A@example.org"));
        let ids: Vec<&str> = entries.iter().map(|e| e.job_id.as_str()).collect();
        assert_eq!(ids, vec!["job_1", "job_2"]);
        assert_eq!(entries[0].category, Category::Valid);
    }
}
