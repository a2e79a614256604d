use super::{
    is_kept_method_name, record_exhausted, unshadowed_descendants, LazyGenerator, Reserved,
};
use crate::config::RenameOption;
use crate::context::{ClassContext, JobContext};
use crate::symbol_map::{method_key, SymbolMap};
use crate::{Category, ObfuscationOptions, Transform};
use jarcloak_core::hierarchy::Lookup;
use jarcloak_core::{access, ClassModel, MethodModel};
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

/// Renames methods without breaking virtual dispatch.
///
/// Static and private methods are renamed per declaring class. An instance method is renamed
/// together with its override-equivalence set: every class and interface whose declaration of
/// the same name and descriptor overrides, is overridden by, or inherits it. The whole set is
/// given one name, claimed through the set's smallest key so the outcome does not depend on
/// which member is visited first. A set is left alone when any member reaches outside the
/// loaded classes, is excluded, or is native.
#[derive(Debug, Default)]
pub struct MethodRenamer {
    symbols: SymbolMap,
    names: LazyGenerator,
}

impl MethodRenamer {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_renamable(class: &ClassModel, method: &MethodModel) -> bool {
        if method.is_initializer() || method.is_native() || is_kept_method_name(&method.name) {
            return false;
        }
        let enum_accessor = class.super_name.as_deref() == Some("java/lang/Enum")
            && method.is_static()
            && matches!(method.name.as_str(), "values" | "valueOf");
        !enum_accessor
    }

    fn rename_static_or_private(
        &self,
        class: &ClassModel,
        method: &MethodModel,
        cx: &mut ClassContext<'_>,
    ) {
        let names = self.names.get(cx.job, Reserved::Methods);
        let rng = &mut cx.rng;
        let key = method_key(&class.name, &method.name, &method.desc);
        let new_name = match self.symbols.try_claim(&key, || names.next(&method.desc, rng)) {
            Ok(name) => name,
            Err(error) => {
                record_exhausted(cx, self.name(), &key, &error);
                return;
            }
        };
        if method.is_private() {
            return;
        }
        // `invokestatic Sub.helper` resolves to the inherited declaration
        let members = cx.job.members;
        let visible = unshadowed_descendants(cx.job, &class.name, |owner| {
            members.method(owner, &method.name, &method.desc).is_some()
        });
        for sub in visible {
            self.symbols
                .insert_if_absent(&method_key(&sub, &method.name, &method.desc), &new_name);
        }
    }

    /// Classes whose key for `name desc` must share one new name with `start`'s, or `None`
    /// when the set cannot be renamed safely.
    fn equivalence_set(
        &self,
        cx: &JobContext<'_>,
        start: &str,
        name: &str,
        desc: &str,
    ) -> Option<BTreeSet<String>> {
        let hierarchy = cx.hierarchy;
        let members = cx.members;
        let declares_virtual = |owner: &str| {
            members
                .method(owner, name, desc)
                .is_some_and(|m| m.is_virtual())
        };

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut set = BTreeSet::new();
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(owner) = queue.pop_front() {
            if !seen.insert(owner.clone()) {
                continue;
            }
            let Some(header) = hierarchy.get(&owner) else {
                return None;
            };
            if !hierarchy.is_fully_resolved(&owner)
                || header.access & access::ANNOTATION != 0
                || cx.is_excluded(self.name(), &owner)
                || cx.is_excluded(self.name(), &method_key(&owner, name, desc))
            {
                debug!(
                    "{}: keeping {}.{}{}, set reaches {}",
                    self.name(),
                    start,
                    name,
                    desc,
                    owner
                );
                return None;
            }
            match members.method(&owner, name, desc) {
                Some(m) if m.access & access::NATIVE != 0 => return None,
                // a static or private redeclaration keeps its own name
                Some(m) if !m.is_virtual() => {}
                _ => {
                    set.insert(owner.clone());
                }
            }

            // superclasses, up to each one declaring the method
            let chain: Vec<&str> = hierarchy
                .ancestors(&owner)
                .filter_map(Lookup::resolved)
                .map(|h| h.name.as_str())
                .collect();
            for (depth, ancestor) in chain.iter().enumerate() {
                if declares_virtual(ancestor) {
                    queue.extend(chain[..=depth].iter().map(|s| s.to_string()));
                }
            }

            // interfaces declaring or inheriting it
            for interface in hierarchy.interfaces(&owner) {
                let interface = interface.name();
                let inherits = declares_virtual(interface)
                    || hierarchy
                        .interfaces(interface)
                        .iter()
                        .any(|parent| declares_virtual(parent.name()));
                if inherits {
                    queue.push_back(interface.to_string());
                }
            }

            queue.extend(hierarchy.descendants(&owner).map(|sub| sub.name.clone()));
        }
        Some(set)
    }

    fn rename_virtual(&self, class: &ClassModel, method: &MethodModel, cx: &mut ClassContext<'_>) {
        let key = method_key(&class.name, &method.name, &method.desc);
        if self.symbols.contains(&key) {
            return;
        }
        let Some(set) = self.equivalence_set(cx.job, &class.name, &method.name, &method.desc)
        else {
            return;
        };
        let keys: Vec<String> = set
            .iter()
            .map(|owner| method_key(owner, &method.name, &method.desc))
            .collect();
        let Some(canonical) = keys.iter().min() else {
            return;
        };
        let names = self.names.get(cx.job, Reserved::Methods);
        let rng = &mut cx.rng;
        let claimed = match keys.iter().find_map(|k| self.symbols.get(k)) {
            Some(existing) => Ok(existing),
            None => self.symbols.try_claim(canonical, || names.next(&method.desc, rng)),
        };
        let new_name = match claimed {
            Ok(name) => name,
            Err(error) => {
                record_exhausted(cx, self.name(), canonical, &error);
                return;
            }
        };
        for key in &keys {
            self.symbols.insert_if_absent(key, &new_name);
        }
    }
}

impl Transform for MethodRenamer {
    fn name(&self) -> &'static str {
        "MethodRenamer"
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
        if class.is_annotation() {
            return;
        }
        for method in &class.methods {
            if !Self::is_renamable(class, method) {
                continue;
            }
            let key = method_key(&class.name, &method.name, &method.desc);
            if cx.job.is_excluded(self.name(), &key) {
                continue;
            }
            if method.is_static() || method.is_private() {
                self.rename_static_or_private(class, method, cx);
            } else {
                self.rename_virtual(class, method, cx);
            }
        }
    }
}
