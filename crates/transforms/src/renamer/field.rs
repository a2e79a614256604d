use super::{record_exhausted, unshadowed_descendants, LazyGenerator, Reserved};
use crate::config::RenameOption;
use crate::context::ClassContext;
use crate::symbol_map::{field_key, SymbolMap};
use crate::{Category, ObfuscationOptions, Transform};
use jarcloak_core::ClassModel;

/// Renames fields.
///
/// Fields are not polymorphic, so each declaration gets its own name. The name is then copied
/// to every subclass (and implementor, for interface constants) through which the field can be
/// reached, so `getfield Sub.count` follows `Base.count` when `Sub` does not hide it.
#[derive(Debug, Default)]
pub struct FieldRenamer {
    symbols: SymbolMap,
    names: LazyGenerator,
}

impl FieldRenamer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transform for FieldRenamer {
    fn name(&self) -> &'static str {
        "FieldRenamer"
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

    fn transform_field(&self, class: &mut ClassModel, field: usize, cx: &mut ClassContext<'_>) {
        let Some(field) = class.fields.get(field) else {
            return;
        };
        let names = self.names.get(cx.job, Reserved::Fields);
        let rng = &mut cx.rng;
        let key = field_key(&class.name, &field.name);
        let new_name = match self.symbols.try_claim(&key, || names.next(&field.desc, rng)) {
            Ok(name) => name,
            Err(error) => {
                record_exhausted(cx, self.name(), &key, &error);
                return;
            }
        };

        let members = cx.job.members;
        let visible = unshadowed_descendants(cx.job, &class.name, |owner| {
            members.field(owner, &field.name).is_some()
        });
        for sub in visible {
            self.symbols
                .insert_if_absent(&field_key(&sub, &field.name), &new_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renamer::test_support::{class, interface, Fixture};
    use jarcloak_core::{access, FieldModel, OBJECT};

    fn run(classes: &mut [ClassModel], exclusions: &str) -> std::collections::HashMap<String, String> {
        let fixture = Fixture::new(classes, exclusions);
        let job = fixture.job();
        let renamer = FieldRenamer::new();
        for class in classes.iter_mut() {
            let name = class.name.clone();
            let mut cx = ClassContext::new(&job, renamer.name(), &name);
            for index in 0..class.fields.len() {
                let key = field_key(&name, &class.fields[index].name);
                if !job.is_excluded(renamer.name(), &key) {
                    renamer.transform_field(class, index, &mut cx);
                }
            }
        }
        renamer.symbols.snapshot()
    }

    #[test]
    fn inherited_fields_follow_the_declaration() {
        let mut base = class("a/Base", OBJECT, &[]);
        base.fields.push(FieldModel::new(access::PROTECTED, "count", "I"));
        let mid = class("a/Mid", "a/Base", &[]);
        let mut shadow = class("a/Shadow", "a/Mid", &[]);
        shadow.fields.push(FieldModel::new(access::PROTECTED, "count", "I"));
        let below = class("a/Below", "a/Shadow", &[]);
        let mut classes = vec![base, mid, shadow, below];
        let map = run(&mut classes, "");

        let base_name = map.get("a/Base.count").cloned();
        assert!(base_name.is_some());
        assert_eq!(map.get("a/Mid.count").cloned(), base_name, "Mid sees Base.count");
        assert_ne!(map.get("a/Shadow.count").cloned(), base_name, "Shadow hides it");
        assert_eq!(
            map.get("a/Below.count"),
            map.get("a/Shadow.count"),
            "Below sees the hiding field"
        );
    }

    #[test]
    fn interface_constants_reach_implementors() {
        let mut constants = interface("a/Constants", &[]);
        let mut limit = FieldModel::new(access::PUBLIC | access::STATIC | access::FINAL, "LIMIT", "I");
        limit.value = Some(jarcloak_core::Constant::Int(10));
        constants.fields.push(limit);
        let user = class("a/User", OBJECT, &["a/Constants"]);
        let mut classes = vec![constants, user];
        let map = run(&mut classes, "");
        assert_eq!(map.get("a/User.LIMIT"), map.get("a/Constants.LIMIT"));
    }

    #[test]
    fn excluded_fields_keep_their_names() {
        let mut base = class("a/Base", OBJECT, &[]);
        base.fields.push(FieldModel::new(access::PRIVATE, "secret", "J"));
        base.fields.push(FieldModel::new(access::PRIVATE, "other", "J"));
        let mut classes = vec![base];
        let map = run(&mut classes, "FieldRenamer:a.Base.secret");
        assert!(!map.contains_key("a/Base.secret"));
        assert!(map.contains_key("a/Base.other"));
    }
}
