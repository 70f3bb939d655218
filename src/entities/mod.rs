pub mod prelude;

pub mod audit_logs;
pub mod files;
pub mod permission_grants;
pub mod sessions;
pub mod share_access_logs;
pub mod share_links;
pub mod user_roles;
pub mod users;
