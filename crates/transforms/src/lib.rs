//! Obfuscation transformers and the pipeline that runs them.
//!
//! Every pass implements [`Transform`]. The [`obfuscator`] module owns the explicit, ordered
//! list of passes and runs them phase by phase over a loaded archive: renamers first, then one
//! global remap, then everything else, each per-method change wrapped by the [`guard`].
pub mod config;
pub mod constant;
pub mod context;
pub mod control_flow;
pub mod crasher;
pub mod debug_info;
pub mod entries;
pub mod exclusion;
pub mod guard;
pub mod names;
pub mod obfuscator;
pub mod pass;
pub mod remap;
pub mod renamer;
pub mod shuffle;
pub mod symbol_map;
pub mod util;
pub mod watermark;
pub mod writer;

use context::{ClassContext, JobContext};
use entries::{OutputArchive, Resource};
use jarcloak_core::{ClassModel, MethodModel};
use jarcloak_utils::errors::TransformError;
use serde::{Deserialize, Serialize};
use symbol_map::SymbolMap;

pub use config::{ObfuscationConfig, ObfuscationOptions};
pub use guard::{Degradation, DegradationKind};
pub use obfuscator::{obfuscate, ObfuscationResult, Obfuscator};

/// Stability tier of a transformer, used for grouping in front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    /// Safe on virtually any input.
    Stable,
    /// Changes code shape; may expose verifier or tooling bugs.
    Advanced,
    /// Embeds identifying text.
    Watermark,
}

/// Trait for class file obfuscation transforms.
///
/// All hooks default to doing nothing, so a transformer only implements what it touches. The
/// pipeline calls the class hook first, then the field hook for every non-excluded field, then
/// the method hook for every non-excluded method, each method call wrapped in the safety guard.
pub trait Transform: Send + Sync {
    /// Returns the transform's name for logging, exclusion scopes and RNG derivation.
    fn name(&self) -> &'static str;

    fn category(&self) -> Category;

    /// Whether the options switch this transformer on.
    fn is_enabled(&self, options: &ObfuscationOptions) -> bool;

    /// The symbol table of a renamer. Transformers returning `Some` run in the renaming phase.
    fn symbols(&self) -> Option<&SymbolMap> {
        None
    }

    /// Whether classes over the complexity limits are skipped.
    fn complexity_guarded(&self) -> bool {
        false
    }

    /// Runs once before any class is transformed.
    fn pre(&self, _classes: &mut Vec<ClassModel>, _cx: &JobContext<'_>) {}

    /// Runs once after every class has been transformed.
    fn post(&self, _classes: &mut Vec<ClassModel>, _cx: &JobContext<'_>) {}

    fn transform_class(&self, _class: &mut ClassModel, _cx: &mut ClassContext<'_>) {}

    /// Called with the index of the field inside `class.fields`.
    fn transform_field(&self, _class: &mut ClassModel, _field: usize, _cx: &mut ClassContext<'_>) {
    }

    /// Called with the method detached from `class`. The methods of `class` are detached for
    /// the whole method phase, so declared methods have to be looked up through the
    /// [`context::MemberIndex`].
    fn transform_method(
        &self,
        _class: &ClassModel,
        _method: &mut MethodModel,
        _cx: &mut ClassContext<'_>,
    ) -> Result<(), TransformError> {
        Ok(())
    }

    fn transform_resource(&self, _resource: &mut Resource, _cx: &JobContext<'_>) {}

    /// Adds entries to, or adjusts, the finished archive.
    fn transform_output(&self, _output: &mut OutputArchive, _cx: &JobContext<'_>) {}
}
