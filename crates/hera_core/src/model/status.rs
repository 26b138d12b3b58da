//! Lifecycle status values for organizations, entities and transactions.

use serde::{Deserialize, Serialize};

/// Lifecycle status for organizations and entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Inactive,
    /// Retired but kept because something references it.
    Archived,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Transaction header lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Draft,
    Pending,
    Approved,
    Posted,
    Completed,
    Cancelled,
    Voided,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Posted => "posted",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Voided => "voided",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "posted" => Some(Self::Posted),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "voided" => Some(Self::Voided),
            _ => None,
        }
    }

    /// Voided and cancelled transactions only surface in audit mode.
    pub fn is_hidden_by_default(self) -> bool {
        matches!(self, Self::Voided | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::{RecordStatus, TransactionStatus};

    #[test]
    fn status_strings_roundtrip_through_parse() {
        for status in [
            RecordStatus::Active,
            RecordStatus::Inactive,
            RecordStatus::Archived,
        ] {
            assert_eq!(RecordStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(
            TransactionStatus::parse("voided"),
            Some(TransactionStatus::Voided)
        );
        assert_eq!(TransactionStatus::parse("VOIDED"), None);
    }

    #[test]
    fn only_voided_and_cancelled_are_hidden() {
        assert!(TransactionStatus::Voided.is_hidden_by_default());
        assert!(TransactionStatus::Cancelled.is_hidden_by_default());
        assert!(!TransactionStatus::Posted.is_hidden_by_default());
        assert!(!TransactionStatus::Draft.is_hidden_by_default());
    }
}
