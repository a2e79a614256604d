//! Command line front end of the jarcloak obfuscator.
pub mod archive;
pub mod commands;
pub mod runtime;
