//! Shared error types for the jarcloak workspace.
pub mod errors;
