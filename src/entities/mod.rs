// Entity Models
//
// Client accounts are created outside the import pipeline and only
// referenced by it:
// - Stable identity (UUID) that never changes
// - Display name and the name the ads platform exports
// - Registry for account-name resolution

pub mod client;

pub use client::{ClientAccount, ClientRegistry};
