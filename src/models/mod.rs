//! Data models for self-destructing objects.
//!
//! Records are serialized with `bincode` before they reach the store; the
//! encoding is versionless and carries no expiry information.

pub mod record;
