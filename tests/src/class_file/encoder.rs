use crate::fixtures::*;
use jarcloak_core::encoder::{self, WriteMode};
use jarcloak_core::{access, decoder, ClassVersion, Insn, Label, MethodModel, Opcode, OBJECT};
use jarcloak_utils::errors::EncodeError;

fn with_method(method: MethodModel) -> jarcloak_core::ClassModel {
    let mut class = class("a/Code", OBJECT);
    class.methods.push(method);
    class
}

fn nops(count: usize) -> impl Iterator<Item = Insn> {
    (0..count).map(|_| Insn::op(Opcode::NOP))
}

#[test]
fn long_jumps_are_widened() {
    let end = Label::new();
    let mut method = MethodModel::new(access::PUBLIC | access::STATIC, "far", "(I)V");
    method.instructions.extend([
        Insn::Var {
            opcode: Opcode::ILOAD,
            index: 0,
        },
        Insn::jump(Opcode::IFEQ, end),
    ]);
    method.instructions.extend(nops(40_000));
    method.instructions.extend([Insn::Label(end), Insn::op(Opcode::RETURN)]);

    let read = decoder::read_class(&encode(&with_method(method))).unwrap();
    let far = read.method("far", "(I)V").unwrap();
    let code = &far.instructions;
    // an inverted branch over a `goto_w`, or a plain wide jump
    let reaches_end = code.iter().any(|insn| match insn {
        Insn::Jump { target, .. } => code.position_of(*target).is_some_and(|at| at > 40_000),
        _ => false,
    });
    assert!(reaches_end, "a jump still reaches the end");
    let nop_count = code.iter().filter(|i| **i == Insn::op(Opcode::NOP)).count();
    assert_eq!(nop_count, 40_000);
}

#[test]
fn oversized_code_is_rejected() {
    let mut method = MethodModel::new(access::PUBLIC | access::STATIC, "huge", "()V");
    method.instructions.extend(nops(70_000));
    method.instructions.push(Insn::op(Opcode::RETURN));
    let mut resolver = |_: &str, _: &str| OBJECT.to_string();
    let result = encoder::write_class(&with_method(method), WriteMode::ComputeMaxs, &mut resolver);
    assert!(matches!(result, Err(EncodeError::MethodTooLarge { .. })), "{result:?}");
}

#[test]
fn frames_are_only_written_for_java_6_and_later() {
    let skip = Label::new();
    let branchy = || {
        let mut method = MethodModel::new(access::PUBLIC | access::STATIC, "branchy", "(I)I");
        method.instructions.extend([
            Insn::Var {
                opcode: Opcode::ILOAD,
                index: 0,
            },
            Insn::jump(Opcode::IFGE, skip),
            Insn::op(Opcode::ICONST_0),
            Insn::op(Opcode::IRETURN),
            Insn::Label(skip),
            Insn::Var {
                opcode: Opcode::ILOAD,
                index: 0,
            },
            Insn::op(Opcode::IRETURN),
        ]);
        method
    };
    let has_frames = |class: &jarcloak_core::ClassModel| {
        let read = decoder::read_class(&encode(class)).unwrap();
        let method = read.method("branchy", "(I)I").unwrap();
        method.instructions.iter().any(|i| matches!(i, Insn::Frame(_)))
    };

    let modern = with_method(branchy());
    assert!(has_frames(&modern));

    let mut legacy = with_method(branchy());
    legacy.version = ClassVersion { major: 49, minor: 0 };
    assert!(!has_frames(&legacy));
}
