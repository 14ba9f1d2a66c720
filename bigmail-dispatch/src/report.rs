use std::fmt;

/// Outcome of a completed job.
///
/// Every recipient entry read is either sent or failed, so
/// `sent + failed == read` for a job that ran to completion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// Recipient entries read from the source.
    pub read: usize,
    /// Messages the relay accepted.
    pub sent: usize,
    /// Messages that were not delivered.
    pub failed: usize,
    /// Workers started to replace failed ones.
    pub respawned: usize,
    /// Recipients of each failed message, in the order failures were seen.
    pub failures: Vec<Vec<String>>,
}

impl JobReport {
    pub(crate) fn record_failure(&mut self, recipients: Vec<String>) {
        self.failed += 1;
        self.failures.push(recipients);
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sent: {}, Failed: {}", self.sent, self.failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line() {
        let report = JobReport {
            read: 3,
            sent: 2,
            failed: 1,
            respawned: 1,
            failures: vec![vec!["a@x".to_string()]],
        };
        assert_eq!(report.to_string(), "Sent: 2, Failed: 1");
    }
}
