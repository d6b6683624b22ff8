use serde::{Deserialize, Serialize};

use super::models::{DestinationId, OutcomeStatus, StoredUploadLog};

/// Which destinations a log entry must include to match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DestinationFilter {
    #[default]
    All,
    BuiltIn,
    /// Any external account.
    External,
    Id(DestinationId),
}

impl From<String> for DestinationFilter {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "all" => Self::All,
            "builtin" => Self::BuiltIn,
            "external" => Self::External,
            _ => Self::Id(DestinationId::new(value)),
        }
    }
}

impl From<DestinationFilter> for String {
    fn from(value: DestinationFilter) -> Self {
        match value {
            DestinationFilter::All => "all".into(),
            DestinationFilter::BuiltIn => "builtin".into(),
            DestinationFilter::External => "external".into(),
            DestinationFilter::Id(id) => id.to_string(),
        }
    }
}

impl DestinationFilter {
    fn matches(&self, destinations: &[DestinationId]) -> bool {
        match self {
            Self::All => true,
            Self::BuiltIn => destinations.iter().any(|d| d.is_builtin()),
            Self::External => destinations.iter().any(|d| !d.is_builtin()),
            Self::Id(id) => destinations.contains(id),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    /// Keep entries with at least one outcome of this status.
    #[serde(default)]
    pub status: Option<OutcomeStatus>,
    #[serde(default)]
    pub destination: DestinationFilter,
    /// Case-insensitive substring of the file name.
    #[serde(default)]
    pub search: Option<String>,
}

impl LogFilter {
    pub fn matches(&self, log: &StoredUploadLog) -> bool {
        let entry = &log.entry;

        if let Some(term) = self.search.as_deref().filter(|t| !t.is_empty()) {
            if !entry.file_name.to_lowercase().contains(&term.to_lowercase()) {
                return false;
            }
        }

        if let Some(status) = self.status {
            if !entry.results.iter().any(|r| r.status == status) {
                return false;
            }
        }

        self.destination.matches(&entry.destinations)
    }

    pub fn apply(&self, logs: Vec<StoredUploadLog>) -> Vec<StoredUploadLog> {
        logs.into_iter().filter(|log| self.matches(log)).collect()
    }
}

/// Outcome counts across a set of log entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    pub entries: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl LogStats {
    pub fn from_logs(logs: &[StoredUploadLog]) -> Self {
        logs.iter().fold(
            Self {
                entries: logs.len(),
                ..Default::default()
            },
            |mut stats, log| {
                stats.succeeded += log.entry.succeeded();
                stats.failed += log.entry.failed();
                stats
            },
        )
    }
}
