use serde::Serialize;
use thiserror::Error;

use crate::types::Role;

/// Authenticated principal evaluated against the capability matrix.
///
/// Built per request from the session token; there is no ambient global
/// actor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
    pub vendor_id: Option<String>,
}

/// Outcome of a denied capability check.
///
/// `Forbidden` means the role may never perform the action and is surfaced
/// as 403. `OutOfScope` means the target sits outside the actor's
/// visibility and must surface as 404 so existence never leaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("actor is not permitted to perform this action")]
    Forbidden,
    #[error("target is outside the actor's visibility scope")]
    OutOfScope,
}

impl Actor {
    fn owns_vendor(&self, vendor_id: &str) -> bool {
        self.vendor_id.as_deref() == Some(vendor_id)
    }

    /// Admin-only gate used for document review and voucher issuing.
    pub fn require_admin(&self) -> Result<(), AccessError> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(AccessError::Forbidden)
        }
    }

    /// Read access to a vendor's documents. Vendors and attached users see
    /// their own vendor only; everything else is out of scope.
    pub fn can_view_vendor(&self, vendor_id: &str) -> Result<(), AccessError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Vendor | Role::User => {
                if self.owns_vendor(vendor_id) {
                    Ok(())
                } else {
                    Err(AccessError::OutOfScope)
                }
            }
        }
    }

    /// Write access to a vendor's documents (job submission, billing note
    /// and receipt creation). USER accounts are read-only.
    pub fn can_create_vendor_documents(&self, vendor_id: &str) -> Result<(), AccessError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Vendor => {
                if self.owns_vendor(vendor_id) {
                    Ok(())
                } else {
                    Err(AccessError::OutOfScope)
                }
            }
            Role::User => Err(AccessError::Forbidden),
        }
    }

    /// Create/edit access for a user account with the given role and vendor
    /// attachment.
    ///
    /// Admins manage anyone, other admins included. Vendors manage USER and
    /// VENDOR accounts of their own vendor; touching an ADMIN account or
    /// assigning the ADMIN role is forbidden outright.
    pub fn can_manage_user(
        &self,
        target_role: Role,
        target_vendor: Option<&str>,
    ) -> Result<(), AccessError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Vendor => {
                if target_role.is_admin() {
                    return Err(AccessError::Forbidden);
                }
                match target_vendor {
                    Some(vendor_id) if self.owns_vendor(vendor_id) => Ok(()),
                    Some(_) => Err(AccessError::OutOfScope),
                    None => Err(AccessError::Forbidden),
                }
            }
            Role::User => Err(AccessError::Forbidden),
        }
    }

    /// Listing users is limited to actors that can manage at least some
    /// accounts.
    pub fn can_list_users(&self) -> Result<(), AccessError> {
        match self.role {
            Role::Admin | Role::Vendor => Ok(()),
            Role::User => Err(AccessError::Forbidden),
        }
    }

    /// User deletion is admin-only. The additional "target must not be an
    /// ADMIN account" rule is a lifecycle invariant checked by the caller,
    /// not a visibility concern.
    pub fn can_delete_users(&self) -> Result<(), AccessError> {
        self.require_admin()
    }
}

/// Enabled capabilities for a role, used by callers to drive surface
/// visibility as a pure function of (role, has_vendor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewOwnDocuments,
    ViewAllDocuments,
    SubmitDocuments,
    ReviewDocuments,
    ManageUsers,
    ManageOwnUsers,
    IssuePaymentVouchers,
}

/// Returns the capability set for a role.
pub fn capabilities_for(role: Role, has_vendor: bool) -> Vec<Capability> {
    match role {
        Role::Admin => vec![
            Capability::ViewOwnDocuments,
            Capability::ViewAllDocuments,
            Capability::SubmitDocuments,
            Capability::ReviewDocuments,
            Capability::ManageUsers,
            Capability::IssuePaymentVouchers,
        ],
        Role::Vendor if has_vendor => vec![
            Capability::ViewOwnDocuments,
            Capability::SubmitDocuments,
            Capability::ManageOwnUsers,
        ],
        Role::Vendor => Vec::new(),
        Role::User if has_vendor => vec![Capability::ViewOwnDocuments],
        Role::User => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role, vendor_id: Option<&str>) -> Actor {
        Actor {
            user_id: "u-1".to_string(),
            role,
            vendor_id: vendor_id.map(str::to_string),
        }
    }

    #[test]
    fn admin_sees_every_vendor() {
        let admin = actor(Role::Admin, None);
        assert_eq!(admin.can_view_vendor("v-1"), Ok(()));
        assert_eq!(admin.can_view_vendor("v-2"), Ok(()));
    }

    #[test]
    fn vendor_sees_own_vendor_only() {
        let vendor = actor(Role::Vendor, Some("v-1"));
        assert_eq!(vendor.can_view_vendor("v-1"), Ok(()));
        assert_eq!(vendor.can_view_vendor("v-2"), Err(AccessError::OutOfScope));
    }

    #[test]
    fn attached_user_may_view_but_not_write() {
        let user = actor(Role::User, Some("v-1"));
        assert_eq!(user.can_view_vendor("v-1"), Ok(()));
        assert_eq!(
            user.can_create_vendor_documents("v-1"),
            Err(AccessError::Forbidden)
        );
    }

    #[test]
    fn unattached_user_sees_nothing() {
        let user = actor(Role::User, None);
        assert_eq!(user.can_view_vendor("v-1"), Err(AccessError::OutOfScope));
    }

    #[test]
    fn review_is_admin_only() {
        assert_eq!(actor(Role::Admin, None).require_admin(), Ok(()));
        assert_eq!(
            actor(Role::Vendor, Some("v-1")).require_admin(),
            Err(AccessError::Forbidden)
        );
        assert_eq!(
            actor(Role::User, Some("v-1")).require_admin(),
            Err(AccessError::Forbidden)
        );
    }

    #[test]
    fn vendor_manages_own_non_admin_users_only() {
        let vendor = actor(Role::Vendor, Some("v-1"));
        assert_eq!(vendor.can_manage_user(Role::User, Some("v-1")), Ok(()));
        assert_eq!(vendor.can_manage_user(Role::Vendor, Some("v-1")), Ok(()));
        assert_eq!(
            vendor.can_manage_user(Role::User, Some("v-2")),
            Err(AccessError::OutOfScope)
        );
        assert_eq!(
            vendor.can_manage_user(Role::Admin, Some("v-1")),
            Err(AccessError::Forbidden)
        );
        assert_eq!(
            vendor.can_manage_user(Role::User, None),
            Err(AccessError::Forbidden)
        );
    }

    #[test]
    fn admin_manages_other_admins() {
        let admin = actor(Role::Admin, None);
        assert_eq!(admin.can_manage_user(Role::Admin, None), Ok(()));
    }

    #[test]
    fn deletion_gate_is_role_based() {
        assert_eq!(actor(Role::Admin, None).can_delete_users(), Ok(()));
        assert_eq!(
            actor(Role::Vendor, Some("v-1")).can_delete_users(),
            Err(AccessError::Forbidden)
        );
    }

    #[test]
    fn capability_sets_follow_role_and_attachment() {
        let admin = capabilities_for(Role::Admin, false);
        assert!(admin.contains(&Capability::ReviewDocuments));
        assert!(admin.contains(&Capability::IssuePaymentVouchers));

        let vendor = capabilities_for(Role::Vendor, true);
        assert!(vendor.contains(&Capability::SubmitDocuments));
        assert!(!vendor.contains(&Capability::ReviewDocuments));

        assert!(capabilities_for(Role::Vendor, false).is_empty());
        assert_eq!(
            capabilities_for(Role::User, true),
            vec![Capability::ViewOwnDocuments]
        );
        assert!(capabilities_for(Role::User, false).is_empty());
    }
}
