//! Cross-crate scenario tests for the jarcloak workspace.
//!
//! Every scenario builds small classes with [`fixtures`], encodes them, runs a whole job and
//! parses the output back.
pub mod fixtures;

#[cfg(test)]
mod class_file;
#[cfg(test)]
mod transforms;
