pub mod access_guard;
pub mod expiry_sweeper;
pub mod lifecycle_service;
pub mod policy;
