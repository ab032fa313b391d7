use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle state of an external invoice. Unknown states are preserved
/// verbatim rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
    Expired,
    Other(String),
}

impl From<String> for InvoiceStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "unpaid" => InvoiceStatus::Unpaid,
            "paid" => InvoiceStatus::Paid,
            "expired" => InvoiceStatus::Expired,
            _ => InvoiceStatus::Other(s),
        }
    }
}

impl From<InvoiceStatus> for String {
    fn from(s: InvoiceStatus) -> Self {
        match s {
            InvoiceStatus::Unpaid => "unpaid".to_string(),
            InvoiceStatus::Paid => "paid".to_string(),
            InvoiceStatus::Expired => "expired".to_string(),
            InvoiceStatus::Other(s) => s,
        }
    }
}

/// An invoice as the charge server reports it. Owned and mutated entirely by
/// the server; this crate only reads these and creates new ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invoice {
    pub id: String,
    /// Absent for open-amount (donation) invoices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    pub status: InvoiceStatus,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Creation payload for a new invoice. `amount`/`currency` are omitted
/// entirely for open-amount invoices.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoiceProps {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}
