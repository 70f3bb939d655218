use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Capability levels in order of increasing access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum PermissionLevel {
    None = 0,
    Reader = 1,
    Commenter = 2,
    Writer = 3,
    Manager = 4,
}

impl PermissionLevel {
    pub fn from_i16(value: i16) -> Self {
        match value {
            1 => PermissionLevel::Reader,
            2 => PermissionLevel::Commenter,
            3 => PermissionLevel::Writer,
            4 => PermissionLevel::Manager,
            _ => PermissionLevel::None,
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn can_read(self) -> bool {
        self >= PermissionLevel::Reader
    }

    pub fn can_comment(self) -> bool {
        self >= PermissionLevel::Commenter
    }

    pub fn can_write(self) -> bool {
        self >= PermissionLevel::Writer
    }

    pub fn can_manage(self) -> bool {
        self >= PermissionLevel::Manager
    }
}

impl Default for PermissionLevel {
    fn default() -> Self {
        PermissionLevel::None
    }
}

/// Capability bitmask persisted as an i32 column on permission grants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct CapabilityFlags(pub i32);

impl CapabilityFlags {
    pub const READ: CapabilityFlags = CapabilityFlags(1);
    pub const WRITE: CapabilityFlags = CapabilityFlags(1 << 1);
    pub const DELETE: CapabilityFlags = CapabilityFlags(1 << 2);
    pub const SHARE: CapabilityFlags = CapabilityFlags(1 << 3);
    pub const MANAGE: CapabilityFlags = CapabilityFlags(1 << 4);
    pub const DOWNLOAD: CapabilityFlags = CapabilityFlags(1 << 5);
    pub const PRINT: CapabilityFlags = CapabilityFlags(1 << 6);
    pub const COMMENT: CapabilityFlags = CapabilityFlags(1 << 7);
    pub const CHECKOUT: CapabilityFlags = CapabilityFlags(1 << 8);
    pub const APPROVE: CapabilityFlags = CapabilityFlags(1 << 9);

    pub fn none() -> Self {
        CapabilityFlags(0)
    }

    /// Every capability, held by owners and admins.
    pub fn full() -> Self {
        CapabilityFlags((1 << 10) - 1)
    }

    /// The bundle public files expose to any active user.
    pub fn read_only() -> Self {
        Self::READ
    }

    pub fn contains(self, other: CapabilityFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for CapabilityFlags {
    type Output = CapabilityFlags;

    fn bitor(self, rhs: CapabilityFlags) -> CapabilityFlags {
        CapabilityFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for CapabilityFlags {
    fn bitor_assign(&mut self, rhs: CapabilityFlags) {
        self.0 |= rhs.0;
    }
}

/// Which precedence step produced an effective permission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionSource {
    Owner,
    Direct,
    Role,
    Public,
    None,
}

/// The final capability set computed for a (user, file) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EffectivePermission {
    pub level: PermissionLevel,
    pub flags: CapabilityFlags,
    pub source: PermissionSource,
    pub expires_at: Option<DateTime<Utc>>,
}

impl EffectivePermission {
    pub fn deny_all() -> Self {
        Self {
            level: PermissionLevel::None,
            flags: CapabilityFlags::none(),
            source: PermissionSource::None,
            expires_at: None,
        }
    }

    pub fn owner() -> Self {
        Self {
            level: PermissionLevel::Manager,
            flags: CapabilityFlags::full(),
            source: PermissionSource::Owner,
            expires_at: None,
        }
    }
}

/// Authenticated request identity attached by the auth middleware.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthContext {
    pub session_id: String,
    pub user_id: String,
    pub is_admin: bool,
    pub roles: Vec<String>,
}

/// Why a session token was rejected. Internal only; the API boundary
/// collapses every variant to a generic 401.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionRejection {
    NotFound,
    Deactivated,
    Expired,
    UserDisabled,
}

impl fmt::Display for SessionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionRejection::NotFound => "not_found",
            SessionRejection::Deactivated => "deactivated",
            SessionRejection::Expired => "expired",
            SessionRejection::UserDisabled => "user_disabled",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a session validation. Storage failures are never folded
/// into `Invalid`; they surface as errors from the service instead.
#[derive(Clone, Debug)]
pub enum SessionValidation {
    Valid(AuthContext),
    Invalid(SessionRejection),
}

/// The operation a share-link visitor is attempting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ShareOperation {
    View,
    Download,
}

impl ShareOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            ShareOperation::View => "view",
            ShareOperation::Download => "download",
        }
    }
}

/// Why share access was denied. `LimitReached` is the only variant the
/// API keeps distinguishable; the rest collapse to one generic denial.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareDenial {
    NotFound,
    Revoked,
    Expired,
    LimitReached,
    BadPassword,
    OperationNotAllowed,
}

impl fmt::Display for ShareDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShareDenial::NotFound => "not_found",
            ShareDenial::Revoked => "revoked",
            ShareDenial::Expired => "expired",
            ShareDenial::LimitReached => "limit_reached",
            ShareDenial::BadPassword => "bad_password",
            ShareDenial::OperationNotAllowed => "operation_not_allowed",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of resolving a share token for one operation.
#[derive(Clone, Debug)]
pub enum ShareAccess {
    Granted(crate::entities::share_links::Model),
    Denied(ShareDenial),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(PermissionLevel::Manager > PermissionLevel::Writer);
        assert!(PermissionLevel::Writer > PermissionLevel::Commenter);
        assert!(PermissionLevel::Commenter > PermissionLevel::Reader);
        assert!(PermissionLevel::Reader > PermissionLevel::None);
    }

    #[test]
    fn test_level_roundtrip() {
        for v in 0..=4i16 {
            assert_eq!(PermissionLevel::from_i16(v).as_i16(), v);
        }
        assert_eq!(PermissionLevel::from_i16(99), PermissionLevel::None);
    }

    #[test]
    fn test_level_capabilities() {
        assert!(PermissionLevel::Reader.can_read());
        assert!(!PermissionLevel::Reader.can_comment());
        assert!(PermissionLevel::Commenter.can_comment());
        assert!(!PermissionLevel::Commenter.can_write());
        assert!(PermissionLevel::Manager.can_manage());
        assert!(!PermissionLevel::Writer.can_manage());
    }

    #[test]
    fn test_flag_union_and_contains() {
        let flags = CapabilityFlags::READ | CapabilityFlags::DOWNLOAD;
        assert!(flags.contains(CapabilityFlags::READ));
        assert!(flags.contains(CapabilityFlags::DOWNLOAD));
        assert!(!flags.contains(CapabilityFlags::WRITE));
        assert!(CapabilityFlags::full().contains(flags | CapabilityFlags::APPROVE));
        assert!(CapabilityFlags::none().is_empty());
    }
}
