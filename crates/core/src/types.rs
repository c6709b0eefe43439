use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account role. Process-wide reference data; the serialized names are the
/// canonical strings persisted in the database and exchanged over the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Vendor,
    User,
}

impl Role {
    /// Returns the canonical database representation for the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Vendor => "VENDOR",
            Self::User => "USER",
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }

    /// All roles, in the order they are surfaced as reference data.
    pub fn all() -> [Role; 3] {
        [Self::Admin, Self::Vendor, Self::User]
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ADMIN" => Ok(Self::Admin),
            "VENDOR" => Ok(Self::Vendor),
            "USER" => Ok(Self::User),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status shared by billing notes and receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Voided,
}

impl DocumentStatus {
    /// Returns the canonical database representation for the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Voided => "VOIDED",
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_approved(self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Voided)
    }
}

impl FromStr for DocumentStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "DRAFT" => Ok(Self::Draft),
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "VOIDED" => Ok(Self::Voided),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vendor account. Owns users, jobs, billing notes and receipts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vendor {
    pub id: String,
    pub company_name: String,
    pub tax_id: String,
    /// Stored VAT rate in percent; `None` falls back to the default rate.
    pub vat_rate_text: Option<String>,
    /// Whether submitted subtotals already contain VAT.
    pub vat_inclusive: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An account able to authenticate against the API. The password hash is
/// never serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub vendor_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A unit of billable work submitted by a vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub vendor_id: String,
    pub title: String,
    pub amount: Decimal,
    pub submitted_by: String,
    pub created_at: DateTime<Utc>,
}

/// Vendor-submitted billing document pending admin review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingNote {
    pub id: String,
    /// Stable human-readable identifier, assigned once at creation.
    pub billing_ref: String,
    pub vendor_id: String,
    pub job_ids: Vec<String>,
    /// Amount as submitted. VAT-inclusive unless the vendor is configured
    /// otherwise.
    pub subtotal: Decimal,
    pub vat_rate_text: Option<String>,
    /// Derived pre-tax price, two fixed fractional digits. `None` until
    /// computed; once set it is authoritative and never recomputed.
    pub price_before_vat: Option<Decimal>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Document issued against one or more approved billing notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: String,
    pub receipt_ref: String,
    pub vendor_id: String,
    pub billing_note_ids: Vec<String>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin-issued settlement record against approved receipts. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVoucher {
    pub id: String,
    pub voucher_ref: String,
    pub receipt_ids: Vec<String>,
    pub issued_by: String,
    pub issued_at: DateTime<Utc>,
}

/// Live per-vendor counts of documents awaiting review. Always computed
/// from the store, never cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCounts {
    pub pending_billing_count: u32,
    pub pending_receipt_count: u32,
}
