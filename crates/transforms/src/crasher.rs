use crate::context::JobContext;
use crate::entries::OutputArchive;
use crate::watermark::{encode_injected, V1_5};
use crate::{Category, ObfuscationOptions, Transform};
use jarcloak_core::{access, ClassModel, OBJECT};
use rand::Rng;

/// Entry name of the bait class: blanks only, which many archive tools cannot extract.
pub const BAIT_ENTRY: &str = "    .class";

const PACKAGES: [&str; 4] = ["com", "net", "io", "org"];
const SEGMENT: &str = "\u{1}/";

/// Adds a bait entry whose class name is a package path nested as deep as the constant pool
/// allows, built from control characters.
#[derive(Debug, Default)]
pub struct Crasher;

impl Crasher {
    pub fn new() -> Self {
        Self
    }

    /// The bait class name: one top level package followed by `\u{1}/` segments, just short
    /// of the 65535 byte `Utf8` limit.
    fn bait_name(prefix: &str) -> String {
        let segments = usize::from(u16::MAX) / SEGMENT.len() - prefix.len();
        format!("{prefix}{}", SEGMENT.repeat(segments))
    }
}

impl Transform for Crasher {
    fn name(&self) -> &'static str {
        "Crasher"
    }

    fn category(&self) -> Category {
        Category::Advanced
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.crasher
    }

    fn transform_output(&self, output: &mut OutputArchive, cx: &JobContext<'_>) {
        let mut rng = cx.rng(self.name(), BAIT_ENTRY);
        let prefix = PACKAGES[rng.random_range(0..PACKAGES.len())];
        let mut class = ClassModel::new(&Self::bait_name(prefix), Some(OBJECT));
        class.version = V1_5;
        class.access = access::PUBLIC;
        if let Some(bytes) = encode_injected(self.name(), &class) {
            output.inject(BAIT_ENTRY, bytes);
        }
    }
}
