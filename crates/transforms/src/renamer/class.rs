use super::{record_exhausted, LazyGenerator, Reserved};
use crate::config::RenameOption;
use crate::context::{ClassContext, JobContext};
use crate::entries::Resource;
use crate::symbol_map::SymbolMap;
use crate::{Category, ObfuscationOptions, Transform};
use jarcloak_core::ClassModel;
use std::sync::OnceLock;
use tracing::debug;

/// Gives every class a new name in the default package.
///
/// Also rewrites dotted class names inside text resources (manifests, service files,
/// properties). That is a plain substring replacement and can hit unrelated text.
#[derive(Debug, Default)]
pub struct ClassRenamer {
    symbols: SymbolMap,
    names: LazyGenerator,
    /// `(old dotted, new dotted)` pairs, longest old name first. Built on the first resource.
    replacements: OnceLock<Vec<(String, String)>>,
}

impl ClassRenamer {
    pub fn new() -> Self {
        Self::default()
    }

    fn replacements(&self) -> &[(String, String)] {
        self.replacements.get_or_init(|| {
            let mut pairs: Vec<(String, String)> = self
                .symbols
                .snapshot()
                .into_iter()
                .map(|(old, new)| (old.replace('/', "."), new.replace('/', ".")))
                .collect();
            pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
            pairs
        })
    }
}

impl Transform for ClassRenamer {
    fn name(&self) -> &'static str {
        "ClassRenamer"
    }

    fn category(&self) -> Category {
        Category::Stable
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.rename != RenameOption::Off
    }

    fn symbols(&self) -> Option<&SymbolMap> {
        Some(&self.symbols)
    }

    fn transform_class(&self, class: &mut ClassModel, cx: &mut ClassContext<'_>) {
        let names = self.names.get(cx.job, Reserved::Classes);
        let rng = &mut cx.rng;
        if let Err(error) = self.symbols.try_claim(&class.name, || names.next("", rng)) {
            record_exhausted(cx, self.name(), &class.name, &error);
        }
    }

    fn transform_resource(&self, resource: &mut Resource, _cx: &JobContext<'_>) {
        let Some(text) = resource.text() else {
            return;
        };
        let replacements = self.replacements();
        let mut changed = false;
        let mut out = text.to_string();
        for (old, new) in replacements {
            if out.contains(old.as_str()) {
                out = out.replace(old.as_str(), new);
                changed = true;
            }
        }
        if changed {
            debug!("rewrote class names in {}", resource.name);
            resource.bytes = out.into_bytes();
            resource.modified = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::DegradationKind;
    use crate::renamer::test_support::{class, Fixture};
    use jarcloak_core::OBJECT;

    #[test]
    fn classes_move_to_the_default_package() {
        let mut classes = vec![
            class("com/acme/Main", OBJECT, &[]),
            class("com/acme/Util", OBJECT, &[]),
        ];
        let fixture = Fixture::new(&classes, "");
        let job = fixture.job();
        let renamer = ClassRenamer::new();
        for class in &mut classes {
            let mut cx = ClassContext::new(&job, renamer.name(), &class.name.clone());
            renamer.transform_class(class, &mut cx);
        }
        let map = renamer.symbols.snapshot();
        assert_eq!(map.get("com/acme/Main").map(String::as_str), Some("AA"));
        assert_eq!(map.get("com/acme/Util").map(String::as_str), Some("AB"));

        let mut manifest = Resource::new(
            "META-INF/MANIFEST.MF",
            b"Main-Class: com.acme.Main\nClass-Path: com.acme.MainLib\n".to_vec(),
        );
        renamer.transform_resource(&mut manifest, &job);
        assert!(manifest.modified);
        assert_eq!(
            manifest.text(),
            Some("Main-Class: AA\nClass-Path: AALib\n"),
            "substring replacement also hits longer names"
        );
    }

    #[test]
    fn classes_keep_their_names_once_names_run_out() {
        let mut classes = vec![
            class("a/One", OBJECT, &[]),
            class("a/Two", OBJECT, &[]),
            class("a/Three", OBJECT, &[]),
        ];
        let mut fixture = Fixture::new(&classes, "");
        fixture.config.options.rename = RenameOption::Confusable;
        fixture.config.confusable_length = 1;
        let job = fixture.job();
        let renamer = ClassRenamer::new();
        let mut skipped = Vec::new();
        for class in &mut classes {
            let mut cx = ClassContext::new(&job, renamer.name(), &class.name.clone());
            renamer.transform_class(class, &mut cx);
            skipped.extend(cx.degradations);
        }
        assert_eq!(renamer.symbols.len(), 2, "only `I` and `l` exist");
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].kind, DegradationKind::RenameSkipped);
        assert_eq!(skipped[0].target, "a/Three");
    }

    #[test]
    fn binary_resources_are_left_alone() {
        let classes = vec![class("a/A", OBJECT, &[])];
        let fixture = Fixture::new(&classes, "");
        let job = fixture.job();
        let renamer = ClassRenamer::new();
        let mut blob = Resource::new("logo.png", vec![0xff, 0xfe, b'a', b'.', b'A']);
        renamer.transform_resource(&mut blob, &job);
        assert!(!blob.modified);
    }
}
