use serde::Serialize;

/// Reviewer's verdict on a stored analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserLabel {
    Unset,
    Valid,
    Invalid,
}

impl UserLabel {
    /// Column value: NULL / 1 / 0.
    pub fn to_column(self) -> Option<i64> {
        match self {
            Self::Unset => None,
            Self::Valid => Some(1),
            Self::Invalid => Some(0),
        }
    }

    pub fn from_column(v: Option<i64>) -> Self {
        match v {
            None => Self::Unset,
            Some(0) => Self::Invalid,
            Some(_) => Self::Valid,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }
}

impl From<bool> for UserLabel {
    fn from(valid: bool) -> Self {
        if valid { Self::Valid } else { Self::Invalid }
    }
}

/// Data for inserting or replacing the score fields of a record.
#[derive(Debug, Clone)]
pub struct NewVerdict {
    pub hash: String,
    pub filename: String,
    pub score: f64,
    pub quality_score: Option<f64>,
    /// "ok" or "defective".
    pub status: String,
    pub verdict: Option<String>,
}

/// A record read from the store.
#[derive(Debug, Clone, Serialize)]
pub struct VerdictRecord {
    pub hash: String,
    pub filename: String,
    pub score: f64,
    pub user_label: UserLabel,
    pub quality_score: Option<f64>,
    pub status: String,
    pub verdict: Option<String>,
    pub analyzed_at: Option<String>,
    pub labeled_at: Option<String>,
}

/// A label event keyed by content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEntry {
    pub hash: String,
    pub valid: bool,
}

pub struct StoreStats {
    pub total: u64,
    pub valid: u64,
    pub invalid: u64,
    pub unset: u64,
    pub defective: u64,
    pub mean_score: Option<f64>,
}
