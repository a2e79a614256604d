//! Renaming transformers.
//!
//! Renamers only decide names: each fills its own [`SymbolMap`] during the renaming phase and
//! never touches a reference. The global remap in [`crate::remap`] applies all maps at once.
mod class;
mod field;
mod method;

pub use class::ClassRenamer;
pub use field::FieldRenamer;
pub use method::MethodRenamer;

use crate::context::{ClassContext, JobContext};
use crate::guard::{Degradation, DegradationKind};
use crate::names::{NameGenerator, NameStrategy};
use jarcloak_core::hierarchy::Lookup;
use jarcloak_utils::errors::CapacityError;
use std::sync::OnceLock;
use tracing::warn;

/// Which names a generator must steer clear of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reserved {
    Classes,
    Fields,
    Methods,
}

/// A name generator created on first use, once the job's member index exists.
#[derive(Debug, Default)]
struct LazyGenerator {
    cell: OnceLock<NameGenerator>,
}

impl LazyGenerator {
    fn get(&self, cx: &JobContext<'_>, reserved: Reserved) -> &NameGenerator {
        self.cell.get_or_init(|| {
            let config = cx.config;
            let strategy = NameStrategy::from_option(config.options.rename, config.confusable_length)
                .unwrap_or(NameStrategy::Alphabet);
            let names = match reserved {
                Reserved::Classes => cx.members.class_names(),
                Reserved::Fields => cx.members.member_names().0,
                Reserved::Methods => cx.members.member_names().1,
            };
            NameGenerator::new(strategy, names)
        })
    }
}

/// Loaded descendants of `owner` that see its member through their superclass chain without
/// any class in between (the descendant included) declaring a member that hides it.
///
/// `declares` tells whether a class declares the hiding member.
fn unshadowed_descendants<F>(cx: &JobContext<'_>, owner: &str, declares: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    cx.hierarchy
        .descendants(owner)
        .filter(|sub| {
            let mut chain = std::iter::once(sub.name.as_str()).chain(
                cx.hierarchy
                    .ancestors(&sub.name)
                    .filter_map(Lookup::resolved)
                    .map(|h| h.name.as_str())
                    .take_while(|name| *name != owner),
            );
            !chain.any(&declares)
        })
        .map(|sub| sub.name.clone())
        .collect()
}

/// Records that `target` keeps its name because the generator ran out of names.
fn record_exhausted(cx: &mut ClassContext<'_>, renamer: &str, target: &str, error: &CapacityError) {
    warn!("{renamer}: {target} keeps its name: {error}");
    cx.record(Degradation::new(
        renamer,
        target,
        DegradationKind::RenameSkipped,
        error.to_string(),
    ));
}

/// Methods the platform or the language calls by name.
const KEPT_METHODS: &[&str] = &[
    "main",
    "premain",
    "agentmain",
    "toString",
    "clone",
    "equals",
    "hashCode",
    "finalize",
    "readObject",
    "writeObject",
    "readObjectNoData",
    "readResolve",
    "writeReplace",
];

fn is_kept_method_name(name: &str) -> bool {
    KEPT_METHODS.contains(&name)
}
