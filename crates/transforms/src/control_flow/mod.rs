//! Control flow obfuscation.
//!
//! Both strengths wrap call, field access and allocation sites in opaque predicates keyed on a
//! synthetic static `long` field of the class. A guard either compares the field against a
//! constant it can never equal, or dispatches through a lookup switch whose only live case is
//! the one the field selects. All injected sequences leave the operand stack exactly as they
//! found it on every path, so the writer can compute frames for them.
mod heavy;
mod light;

pub use heavy::HeavyControlFlow;
pub use light::LightControlFlow;

use crate::util;
use jarcloak_analysis::metrics;
use jarcloak_analysis::ComplexityLimits;
use jarcloak_core::{access, ClassModel, Constant, FieldModel, Insn, Label, MethodModel, Opcode};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::BTreeSet;

const FIELD_ACCESS: [u16; 4] = [0, access::PUBLIC, access::PRIVATE, access::PROTECTED];

/// Adds the static flow field `name` with `value` unless the class already declares it.
fn add_flow_field(class: &mut ClassModel, name: &str, value: i64, rng: &mut StdRng) {
    if class.field(name).is_some() {
        return;
    }
    let flags = FIELD_ACCESS[rng.random_range(0..FIELD_ACCESS.len())] | access::STATIC;
    let mut field = FieldModel::new(flags, name, "J");
    field.value = Some(Constant::Long(value));
    class.fields.push(field);
}

/// Whether a guard may be injected into `method`.
fn is_target(class: &ClassModel, method: &MethodModel, limits: &ComplexityLimits) -> bool {
    util::is_method_eligible(class, method) && !metrics::is_method_too_large(method, limits)
}

/// Prepends a branch that always falls through when the method has no conditional jump.
///
/// ```text
///     iconst_1
///     goto L1
/// L0: iconst_5
/// L1: iconst_m1
///     if_icmple L0
/// ```
fn ensure_branch(method: &mut MethodModel) {
    let has_branch = method
        .instructions
        .iter()
        .any(|insn| insn.opcode().is_some_and(Opcode::is_conditional_jump));
    if has_branch {
        return;
    }
    let (l0, l1) = (Label::new(), Label::new());
    method.instructions.prepend([
        Insn::op(Opcode::ICONST_1),
        Insn::jump(Opcode::GOTO, l1),
        Insn::Label(l0),
        Insn::op(Opcode::ICONST_5),
        Insn::Label(l1),
        Insn::op(Opcode::ICONST_M1),
        Insn::jump(Opcode::IF_ICMPLE, l0),
    ]);
}

/// `size - 1` distinct random keys other than `exclude`.
fn decoy_keys(rng: &mut StdRng, size: usize, exclude: i32) -> BTreeSet<i32> {
    let mut keys = BTreeSet::new();
    while keys.len() + 1 < size {
        let key: i32 = rng.random();
        if key != exclude {
            keys.insert(key);
        }
    }
    keys
}

/// A lookup switch over the int on top of the stack.
///
/// The case for `target_key` runs `target`; every other case runs a block from `decoy`; the
/// default case runs `default`. Each case ends in a jump past the switch.
///
/// # Arguments
/// * `rng` - Source of the decoy keys and blocks.
/// * `size` - Number of cases, the target included.
/// * `target_key` - The key the guarded value always produces.
/// * `target` - Code of the live case.
/// * `decoy` - Produces the code of one dead case.
/// * `default` - Code of the default case.
fn random_lookup_switch<F>(
    rng: &mut StdRng,
    size: usize,
    target_key: i32,
    target: Vec<Insn>,
    mut decoy: F,
    default: Vec<Insn>,
) -> Vec<Insn>
where
    F: FnMut(&mut StdRng) -> Vec<Insn>,
{
    let mut keys = decoy_keys(rng, size, target_key);
    keys.insert(target_key);
    let keys: Vec<i32> = keys.into_iter().collect();
    let default_label = Label::new();
    let end = Label::new();
    let labels: Vec<Label> = keys.iter().map(|_| Label::new()).collect();

    let mut out = vec![Insn::LookupSwitch {
        default: default_label,
        keys: keys.clone(),
        targets: labels.clone(),
    }];
    let mut target = Some(target);
    for (key, label) in keys.iter().zip(&labels) {
        out.push(Insn::Label(*label));
        let block = if *key == target_key {
            target.take().unwrap_or_default()
        } else {
            decoy(rng)
        };
        out.extend(block);
        out.push(Insn::jump(Opcode::GOTO, end));
    }
    out.push(Insn::Label(default_label));
    out.extend(default);
    out.push(Insn::Label(end));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn lookup_switch_has_one_live_case() {
        let mut rng = StdRng::seed_from_u64(42);
        let live = Label::new();
        let code = random_lookup_switch(
            &mut rng,
            4,
            17,
            vec![Insn::jump(Opcode::GOTO, live)],
            |_| vec![Insn::op(Opcode::NOP)],
            vec![Insn::op(Opcode::ACONST_NULL), Insn::op(Opcode::ATHROW)],
        );
        let Insn::LookupSwitch { keys, targets, .. } = &code[0] else {
            panic!("switch first");
        };
        assert_eq!(keys.len(), 4);
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "keys are sorted and unique");
        let position = keys.iter().position(|k| *k == 17).expect("target key present");
        let start = code
            .iter()
            .position(|insn| *insn == Insn::Label(targets[position]))
            .expect("case label emitted");
        assert_eq!(code[start + 1], Insn::jump(Opcode::GOTO, live));
        let nops = code.iter().filter(|i| **i == Insn::op(Opcode::NOP)).count();
        assert_eq!(nops, 3);
    }

    #[test]
    fn tautology_is_added_once() {
        let mut method = MethodModel::new(access::PUBLIC, "run", "()V");
        method.instructions.push(Insn::op(Opcode::RETURN));
        ensure_branch(&mut method);
        let len = method.instructions.len();
        ensure_branch(&mut method);
        assert_eq!(method.instructions.len(), len);
        assert_eq!(method.instructions.get(0), Some(&Insn::op(Opcode::ICONST_1)));
    }

    #[test]
    fn flow_field_is_static_long() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut class = ClassModel::new("a/A", Some("java/lang/Object"));
        add_flow_field(&mut class, "\u{13E8}", 5, &mut rng);
        add_flow_field(&mut class, "\u{13E8}", 6, &mut rng);
        assert_eq!(class.fields.len(), 1);
        let field = &class.fields[0];
        assert!(field.is_static());
        assert_eq!(field.desc, "J");
        assert_eq!(field.value, Some(Constant::Long(5)));
    }
}
