use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Builds a stable human-readable document reference such as
/// `BN-20240101-1A2B3C`.
///
/// Assigned exactly once at creation; the reference is persisted and never
/// regenerated afterwards. Uniqueness is enforced by the store.
pub fn document_ref(prefix: &str, issued_at: DateTime<Utc>) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!(
        "{prefix}-{}-{}",
        issued_at.format("%Y%m%d"),
        id[..6].to_uppercase()
    )
}
