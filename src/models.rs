use crate::error::{PennyError, Result};

/// Review lifecycle of a ledger row.
/// pending_review → pending_save (staged) → confirmed,
/// or straight to auto_confirmed at ingestion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    PendingReview,
    PendingSave,
    Confirmed,
    AutoConfirmed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::PendingReview => "pending_review",
            ReviewStatus::PendingSave => "pending_save",
            ReviewStatus::Confirmed => "confirmed",
            ReviewStatus::AutoConfirmed => "auto_confirmed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending_review" => Ok(ReviewStatus::PendingReview),
            "pending_save" => Ok(ReviewStatus::PendingSave),
            "confirmed" => Ok(ReviewStatus::Confirmed),
            "auto_confirmed" => Ok(ReviewStatus::AutoConfirmed),
            other => Err(PennyError::InvalidState(format!("unknown status: {other}"))),
        }
    }

    /// User edits on these rows must survive later syncs of the same
    /// external id (description/merchant stay put, amounts may correct).
    pub fn protects_edits(&self) -> bool {
        matches!(self, ReviewStatus::Confirmed | ReviewStatus::PendingSave)
    }
}

/// Which ingestion path created a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    ExternalSync,
    ArchiveImport,
    FileImport,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::ExternalSync => "external_sync",
            Source::ArchiveImport => "archive_import",
            Source::FileImport => "file_import",
        }
    }
}

/// Which cascade tier produced a categorization. `unmatched` marks rows a
/// batch run attempted and found nothing for, so later runs skip them.
pub mod tier {
    pub const AMOUNT_RULE: &str = "amount_rule";
    pub const MERCHANT_MAP: &str = "merchant_map";
    pub const AI: &str = "ai";
    pub const UNMATCHED: &str = "unmatched";
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: i64,
    pub key: String,
    pub display_name: String,
    pub parent_id: Option<i64>,
    pub is_income: bool,
    pub is_recurring: bool,
}

/// Normalized row shape produced by archive/file parsers, already in the
/// ledger sign convention (positive = expense).
#[derive(Debug, Clone)]
pub struct NormalizedRow {
    pub date: String,
    pub description: String,
    pub merchant: Option<String>,
    pub amount: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in [
            ReviewStatus::PendingReview,
            ReviewStatus::PendingSave,
            ReviewStatus::Confirmed,
            ReviewStatus::AutoConfirmed,
        ] {
            assert_eq!(ReviewStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(ReviewStatus::parse("bogus").is_err());
    }

    #[test]
    fn test_protected_statuses() {
        assert!(ReviewStatus::Confirmed.protects_edits());
        assert!(ReviewStatus::PendingSave.protects_edits());
        assert!(!ReviewStatus::PendingReview.protects_edits());
        assert!(!ReviewStatus::AutoConfirmed.protects_edits());
    }
}
