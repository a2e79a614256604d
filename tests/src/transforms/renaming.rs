use crate::fixtures::*;
use jarcloak_core::{access, ClassModel, Insn, Opcode, OBJECT};
use jarcloak_transform::config::RenameOption;
use jarcloak_transform::names::MIN_CONFUSABLE_LENGTH;
use jarcloak_transform::{DegradationKind, ObfuscationConfig, Obfuscator};
use jarcloak_utils::errors::ConstructionError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};

/// Renames members only: class names stay put so the output can be matched to the input.
fn member_renaming() -> ObfuscationConfig {
    let mut config = config();
    config.options.rename = RenameOption::Alphabet;
    config.exclusions = "ClassRenamer:a.**".to_string();
    config
}

/// `a/Named { label() }`, `a/A implements a/Named { foo() bar() label() }`,
/// `a/B extends a/A { foo() baz() }` and a caller going through `a/B` and `a/Named`.
fn shapes() -> Vec<ClassModel> {
    let mut named = interface("a/Named");
    named.methods.push(abstract_method("label", "()V"));

    let mut a = class("a/A", OBJECT);
    a.interfaces.push("a/Named".into());
    a.methods.extend([empty("foo"), empty("bar"), empty("label")]);

    let mut b = class("a/B", "a/A");
    b.methods.extend([empty("foo"), empty("baz")]);

    let mut caller = class("a/Caller", OBJECT);
    caller.methods.push(method(
        access::PUBLIC | access::STATIC,
        "call",
        "(La/B;)V",
        [
            this(),
            Insn::method(Opcode::INVOKEVIRTUAL, "a/B", "foo", "()V"),
            this(),
            Insn::method(Opcode::INVOKEINTERFACE, "a/Named", "label", "()V"),
            Insn::op(Opcode::RETURN),
        ],
    ));
    vec![named, a, b, caller]
}

/// Output method name of `name` in `class`, looked up by its position in the input.
fn renamed<'a>(input: &ClassModel, output: &'a [ClassModel], name: &str) -> &'a str {
    let index = input
        .methods
        .iter()
        .position(|m| m.name == name)
        .unwrap_or_else(|| panic!("{}.{name} not declared", input.name));
    &find(output, &input.name).methods[index].name
}

#[test]
fn overriding_methods_share_one_name() {
    let input = shapes();
    let result = run(&input, member_renaming());
    let output = output_classes(&result);
    let (named, a, b) = (&input[0], &input[1], &input[2]);

    let foo = renamed(a, &output, "foo");
    assert_ne!(foo, "foo", "A.foo is renamed");
    assert_eq!(renamed(b, &output, "foo"), foo, "B.foo overrides A.foo");

    let label = renamed(a, &output, "label");
    assert_ne!(label, "label");
    assert_eq!(renamed(named, &output, "label"), label, "A.label implements Named.label");

    let call = &find(&output, "a/Caller").methods[1];
    assert_eq!(called_names(call, "()V"), [foo, label], "call sites follow their targets");
    assert_eq!(renamed(a, &output, "<init>"), "<init>");
}

#[test]
fn unrelated_methods_never_collide_in_one_hierarchy() {
    let input = shapes();
    let result = run(&input, member_renaming());
    let output = output_classes(&result);
    let (a, b) = (&input[1], &input[2]);

    let names: BTreeSet<&str> = [
        renamed(a, &output, "foo"),
        renamed(a, &output, "bar"),
        renamed(a, &output, "label"),
        renamed(b, &output, "baz"),
    ]
    .into();
    assert_eq!(names.len(), 4, "four distinct override sets, four names: {names:?}");
}

/// Random single-inheritance hierarchies: overriding declarations always agree on their new
/// name and two different sets never share one along a superclass chain.
#[test]
fn random_hierarchies_keep_dispatch_intact() {
    let mut rng = StdRng::seed_from_u64(42);
    let pool = ["alpha", "beta", "gamma", "delta", "eps", "zeta"];
    for round in 0..8 {
        let mut input: Vec<ClassModel> = Vec::new();
        for i in 0..12 {
            let super_name = if i == 0 || rng.random_bool(0.2) {
                OBJECT.to_string()
            } else {
                input[rng.random_range(0..i)].name.clone()
            };
            let mut c = class(&format!("a/C{i}"), &super_name);
            for name in pool {
                if rng.random_bool(0.4) {
                    c.methods.push(empty(name));
                }
            }
            input.push(c);
        }
        let mut config = member_renaming();
        config.seed = Some(round);
        let output = output_classes(&run(&input, config));

        // new name of each (class, original name) pair
        let mut new_names = BTreeMap::new();
        for class in &input {
            for m in class.methods.iter().filter(|m| m.name != "<init>") {
                new_names.insert((class.name.clone(), m.name.clone()), renamed(class, &output, &m.name));
            }
        }
        let declaring = |class: &ClassModel, name: &str| -> Option<String> {
            let mut current = Some(class.name.clone());
            while let Some(owner) = current {
                let c = input.iter().find(|c| c.name == owner)?;
                if c.methods.iter().any(|m| m.name == name) {
                    return Some(owner);
                }
                current = c.super_name.clone();
            }
            None
        };
        for class in &input {
            let Some(super_name) = &class.super_name else { continue };
            let Some(parent) = input.iter().find(|c| &c.name == super_name) else { continue };
            for m in class.methods.iter().filter(|m| m.name != "<init>") {
                let mine = new_names[&(class.name.clone(), m.name.clone())];
                // the inherited declaration this method overrides keeps the same name
                if let Some(owner) = declaring(parent, &m.name) {
                    assert_eq!(mine, new_names[&(owner, m.name.clone())], "round {round}: {}", class.name);
                }
                // any other visible method of the chain got a different name
                for other in pool.iter().filter(|&&o| o != m.name) {
                    if let Some(owner) = declaring(class, other) {
                        assert_ne!(mine, new_names[&(owner, other.to_string())], "round {round}");
                    }
                }
            }
        }
    }
}

#[test]
fn rename_off_keeps_every_name() {
    let mut input = shapes();
    input[1].fields.push(field(access::PRIVATE, "count", "I"));
    let result = run(&input, config());
    let output = output_classes(&result);
    assert_eq!(names(&output), names(&input));
    for (before, after) in input.iter().zip(&output) {
        let members = |c: &ClassModel| -> Vec<String> {
            c.fields
                .iter()
                .map(|f| f.name.clone())
                .chain(c.methods.iter().map(|m| format!("{}{}", m.name, m.desc)))
                .collect()
        };
        assert_eq!(members(before), members(after), "{}", before.name);
    }
}

#[test]
fn inherited_field_accesses_follow_the_declaration() {
    let mut base = class("a/Base", OBJECT);
    base.fields.push(field(access::PROTECTED, "count", "I"));
    let mut sub = class("a/Sub", "a/Base");
    sub.methods.push(method(
        access::PUBLIC,
        "read",
        "()I",
        [
            this(),
            Insn::field(Opcode::GETFIELD, "a/Sub", "count", "I"),
            Insn::op(Opcode::IRETURN),
        ],
    ));
    let result = run(&[base, sub], member_renaming());
    let output = output_classes(&result);

    let declared = &find(&output, "a/Base").fields[0].name;
    assert_ne!(declared, "count");
    let read = &find(&output, "a/Sub").methods[1];
    let accessed: Vec<&str> = read
        .instructions
        .iter()
        .filter_map(|insn| match insn {
            Insn::Field { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(accessed, [declared.as_str()]);
}

#[test]
fn scoped_exclusions_only_bind_their_transformer() {
    let mut keep = class("a/Keep", OBJECT);
    keep.methods.push(empty("work"));
    let mut other = class("a/Other", OBJECT);
    other.methods.push(empty("work"));
    let input = [keep, other];

    let mut config = config();
    config.options.rename = RenameOption::Alphabet;
    config.exclusions = "ClassRenamer:a.Keep".to_string();
    let output = output_classes(&run(&input, config.clone()));
    let kept = find(&output, "a/Keep");
    assert_ne!(kept.methods[1].name, "work", "MethodRenamer is not bound by the rule");
    assert!(!names(&output).contains(&"a/Other"), "a/Other is renamed");

    config.exclusions = "a.Keep".to_string();
    let output = output_classes(&run(&input, config));
    let kept = find(&output, "a/Keep");
    assert_eq!(kept.methods[1].name, "work", "unscoped rules bind every transformer");
}

#[test]
fn rename_scope_keeps_class_and_member_names() {
    let mut keep = class("a/Keep", OBJECT);
    keep.fields.push(field(access::PRIVATE, "state", "I"));
    keep.methods.push(empty("work"));
    let mut other = class("a/Other", OBJECT);
    other.methods.push(empty("work"));

    let mut config = config();
    config.options.rename = RenameOption::Alphabet;
    config.exclusions = "Rename:a.Keep**".to_string();
    let output = output_classes(&run(&[keep, other], config));
    let kept = find(&output, "a/Keep");
    assert_eq!(kept.fields[0].name, "state");
    assert_eq!(kept.methods[1].name, "work");
    assert!(!names(&output).contains(&"a/Other"), "rules for other names do not apply");
}

#[test]
fn confusable_lengths_too_short_for_a_job_are_rejected_up_front() {
    let mut config = config();
    config.options.rename = RenameOption::Confusable;
    config.confusable_length = 1;
    assert!(matches!(
        Obfuscator::new(config),
        Err(ConstructionError::InvalidOption { .. })
    ));
}

#[test]
fn shortest_confusable_names_stay_distinct() {
    let mut config = config();
    config.options.rename = RenameOption::Confusable;
    config.confusable_length = MIN_CONFUSABLE_LENGTH;
    let result = run(&shapes(), config);
    assert_eq!(result.report.count(DegradationKind::RenameSkipped), 0);

    let output = output_classes(&result);
    let class_names: BTreeSet<&str> = names(&output).into_iter().collect();
    assert_eq!(class_names.len(), 4);
    for name in class_names {
        assert_eq!(name.len(), MIN_CONFUSABLE_LENGTH, "{name}");
        assert!(name.chars().all(|c| c == 'I' || c == 'l'), "{name}");
    }
}
