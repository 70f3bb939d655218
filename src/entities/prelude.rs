pub use super::audit_logs::Entity as AuditLogs;
pub use super::files::Entity as Files;
pub use super::permission_grants::Entity as PermissionGrants;
pub use super::sessions::Entity as Sessions;
pub use super::share_access_logs::Entity as ShareAccessLogs;
pub use super::share_links::Entity as ShareLinks;
pub use super::user_roles::Entity as UserRoles;
pub use super::users::Entity as Users;
