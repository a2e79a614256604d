//! State shared by every transformer call of a job.
//!
//! [`JobContext`] is built once after loading and is read-only afterwards, so worker threads
//! share it by reference. [`ClassContext`] is created per (transformer, class) and carries that
//! pair's RNG stream plus the degradations recorded while the class was processed.
use crate::config::ObfuscationConfig;
use crate::exclusion::ExclusionMatcher;
use crate::guard::Degradation;
use crate::util;
use jarcloak_core::{access, ClassModel, HierarchyIndex};
use rand::rngs::StdRng;
use std::collections::{HashMap, HashSet};

/// A declared field or method: name, descriptor and access flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: String,
    pub desc: String,
    pub access: u16,
}

impl MemberInfo {
    pub const fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    pub const fn is_private(&self) -> bool {
        self.access & access::PRIVATE != 0
    }

    /// Instance, non-private: a method that takes part in overriding.
    pub const fn is_virtual(&self) -> bool {
        !self.is_static() && !self.is_private()
    }
}

#[derive(Debug, Clone, Default)]
struct ClassMembers {
    fields: Vec<MemberInfo>,
    methods: Vec<MemberInfo>,
}

/// Declared members of every loaded class, captured before renaming starts.
#[derive(Debug, Clone, Default)]
pub struct MemberIndex {
    classes: HashMap<String, ClassMembers>,
}

impl MemberIndex {
    pub fn build<'a, I>(classes: I) -> Self
    where
        I: IntoIterator<Item = &'a ClassModel>,
    {
        let mut index = Self::default();
        for class in classes {
            let info = |name: &str, desc: &str, access: u16| MemberInfo {
                name: name.to_string(),
                desc: desc.to_string(),
                access,
            };
            index
                .classes
                .entry(class.name.clone())
                .or_insert_with(|| ClassMembers {
                    fields: class
                        .fields
                        .iter()
                        .map(|f| info(&f.name, &f.desc, f.access))
                        .collect(),
                    methods: class
                        .methods
                        .iter()
                        .map(|m| info(&m.name, &m.desc, m.access))
                        .collect(),
                });
        }
        index
    }

    pub fn fields(&self, class: &str) -> &[MemberInfo] {
        self.classes
            .get(class)
            .map_or(&[][..], |members| members.fields.as_slice())
    }

    pub fn methods(&self, class: &str) -> &[MemberInfo] {
        self.classes
            .get(class)
            .map_or(&[][..], |members| members.methods.as_slice())
    }

    pub fn field(&self, class: &str, name: &str) -> Option<&MemberInfo> {
        self.fields(class).iter().find(|f| f.name == name)
    }

    pub fn method(&self, class: &str, name: &str, desc: &str) -> Option<&MemberInfo> {
        self.methods(class)
            .iter()
            .find(|m| m.name == name && m.desc == desc)
    }

    /// Every field name and every method name in the input, for the name generators.
    pub fn member_names(&self) -> (HashSet<String>, HashSet<String>) {
        let mut fields = HashSet::new();
        let mut methods = HashSet::new();
        for members in self.classes.values() {
            fields.extend(members.fields.iter().map(|f| f.name.clone()));
            methods.extend(members.methods.iter().map(|m| m.name.clone()));
        }
        (fields, methods)
    }

    pub fn class_names(&self) -> HashSet<String> {
        self.classes.keys().cloned().collect()
    }
}

/// Read-only job state handed to every hook.
#[derive(Debug)]
pub struct JobContext<'a> {
    pub config: &'a ObfuscationConfig,
    pub hierarchy: &'a HierarchyIndex,
    pub members: &'a MemberIndex,
    pub exclusions: &'a ExclusionMatcher,
    seed: u64,
}

impl<'a> JobContext<'a> {
    pub const fn new(
        config: &'a ObfuscationConfig,
        hierarchy: &'a HierarchyIndex,
        members: &'a MemberIndex,
        exclusions: &'a ExclusionMatcher,
        seed: u64,
    ) -> Self {
        Self {
            config,
            hierarchy,
            members,
            exclusions,
            seed,
        }
    }

    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// An RNG stream for `transformer` working on `scope`.
    pub fn rng(&self, transformer: &str, scope: &str) -> StdRng {
        util::scoped_rng(self.seed, transformer, scope)
    }

    /// Whether `name` is excluded from `transformer`, by a scoped or an unscoped rule.
    pub fn is_excluded(&self, transformer: &str, name: &str) -> bool {
        self.exclusions.is_excluded(Some(transformer), name)
    }
}

/// Per (transformer, class) state.
#[derive(Debug)]
pub struct ClassContext<'a> {
    pub job: &'a JobContext<'a>,
    pub rng: StdRng,
    pub degradations: Vec<Degradation>,
}

impl<'a> ClassContext<'a> {
    pub fn new(job: &'a JobContext<'a>, transformer: &str, class: &str) -> Self {
        Self {
            job,
            rng: job.rng(transformer, class),
            degradations: Vec::new(),
        }
    }

    pub fn record(&mut self, degradation: Degradation) {
        self.degradations.push(degradation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarcloak_core::{FieldModel, MethodModel};

    #[test]
    fn member_index_keeps_first_class_of_a_name() {
        let mut a = ClassModel::new("a/A", Some("java/lang/Object"));
        a.fields.push(FieldModel::new(access::PRIVATE, "count", "I"));
        a.methods.push(MethodModel::new(access::PUBLIC, "run", "()V"));
        let mut dup = ClassModel::new("a/A", Some("java/lang/Object"));
        dup.methods.push(MethodModel::new(access::STATIC, "other", "()V"));
        let index = MemberIndex::build([&a, &dup]);
        assert!(index.method("a/A", "run", "()V").is_some_and(MemberInfo::is_virtual));
        assert!(index.method("a/A", "other", "()V").is_none(), "duplicates are ignored");
        assert!(index.field("a/A", "count").is_some_and(MemberInfo::is_private));
        let (fields, methods) = index.member_names();
        assert!(fields.contains("count") && methods.contains("run"));
    }
}
