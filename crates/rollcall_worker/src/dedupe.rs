//! In-file duplicate detection, last occurrence wins.
//!
//! State spans the whole file, across chunk boundaries, and is rebuilt from
//! the discarded prefix when an attempt resumes mid-file. Only valid rows
//! enter the maps.

use rollcall_protocol::types::DuplicateKey;
use std::collections::HashMap;

/// An earlier row superseded by the row just observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorDuplicate {
    pub prior_row: u64,
    pub key: DuplicateKey,
}

/// Tracks the last row seen per employee number and per (case-folded) email.
#[derive(Debug, Default)]
pub struct DuplicateDetector {
    by_number: HashMap<String, u64>,
    by_email: HashMap<String, u64>,
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a valid row's keys; returns every earlier occurrence the row
    /// supersedes, one entry per conflicting key.
    pub fn observe(&mut self, row_number: u64, employee_number: &str, email_lower: &str) -> Vec<PriorDuplicate> {
        let mut priors = Vec::new();

        if let Some(prior) = self
            .by_number
            .insert(employee_number.to_string(), row_number)
        {
            if prior < row_number {
                priors.push(PriorDuplicate {
                    prior_row: prior,
                    key: DuplicateKey::EmployeeNumber,
                });
            }
        }
        if let Some(prior) = self.by_email.insert(email_lower.to_string(), row_number) {
            if prior < row_number {
                priors.push(PriorDuplicate {
                    prior_row: prior,
                    key: DuplicateKey::Email,
                });
            }
        }

        priors
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty() && self.by_email.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_rows_flag_nothing() {
        let mut detector = DuplicateDetector::new();
        assert!(detector.observe(1, "E1", "a@x.co").is_empty());
        assert!(detector.observe(2, "E2", "b@x.co").is_empty());
    }

    #[test]
    fn later_row_supersedes_earlier_per_key() {
        let mut detector = DuplicateDetector::new();
        detector.observe(1, "E5", "e@x.co");

        // Same number, different email.
        let priors = detector.observe(5, "E5", "e2@x.co");
        assert_eq!(
            priors,
            vec![PriorDuplicate {
                prior_row: 1,
                key: DuplicateKey::EmployeeNumber,
            }]
        );
    }

    #[test]
    fn both_keys_can_conflict_at_once() {
        let mut detector = DuplicateDetector::new();
        detector.observe(1, "E1", "a@x.co");
        detector.observe(2, "E2", "b@x.co");

        // Row 3 carries row 1's number and row 2's email.
        let priors = detector.observe(3, "E1", "b@x.co");
        assert_eq!(priors.len(), 2);
        assert!(priors.contains(&PriorDuplicate {
            prior_row: 1,
            key: DuplicateKey::EmployeeNumber,
        }));
        assert!(priors.contains(&PriorDuplicate {
            prior_row: 2,
            key: DuplicateKey::Email,
        }));
    }

    #[test]
    fn chains_flag_only_the_latest_predecessor() {
        let mut detector = DuplicateDetector::new();
        detector.observe(1, "E1", "a@x.co");
        let second = detector.observe(4, "E1", "a@x.co");
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|p| p.prior_row == 1));

        // Row 1 was already superseded; only row 4 is flagged now.
        let third = detector.observe(9, "E1", "a@x.co");
        assert_eq!(third.len(), 2);
        assert!(third.iter().all(|p| p.prior_row == 4));
    }
}
