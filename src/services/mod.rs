pub mod audit_service;
pub mod permission_service;
pub mod session_service;
pub mod share_service;
pub mod version_guard;
