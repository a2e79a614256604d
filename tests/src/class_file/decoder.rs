use crate::fixtures::*;
use jarcloak_core::model::TryCatchBlock;
use jarcloak_core::{access, decoder, Insn, Label, MethodModel, Opcode, OBJECT};
use jarcloak_utils::errors::DecodeError;

#[test]
fn rejects_foreign_and_truncated_data() {
    assert!(matches!(
        decoder::read_class(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52]),
        Err(DecodeError::BadMagic(0xDEAD_BEEF))
    ));
    let bytes = encode(&class("a/A", OBJECT));
    for cut in [3, 10, bytes.len() / 2, bytes.len() - 1] {
        assert!(decoder::read_class(&bytes[..cut]).is_err(), "cut at {cut}");
    }
}

#[test]
fn header_only_read_matches_the_full_read() {
    let mut class = class("a/Impl", "a/Base");
    class.interfaces = vec!["java/lang/Runnable".into(), "a/Marker".into()];
    class.methods.push(empty("run"));
    let bytes = encode(&class);
    let header = decoder::read_header(&bytes).unwrap();
    let full = decoder::read_class(&bytes).unwrap();
    assert_eq!(header.name, "a/Impl");
    assert_eq!(header.super_name.as_deref(), Some("a/Base"));
    assert_eq!(header.interfaces, full.interfaces);
    assert_eq!(header.access, full.access);
}

#[test]
fn exception_handlers_survive_a_write_and_read() {
    let (start, end, handler) = (Label::new(), Label::new(), Label::new());
    let mut method = MethodModel::new(access::PUBLIC | access::STATIC, "guarded", "()V");
    method.instructions.extend([
        Insn::Label(start),
        Insn::method(Opcode::INVOKESTATIC, "a/Guarded", "risky", "()V"),
        Insn::Label(end),
        Insn::op(Opcode::RETURN),
        Insn::Label(handler),
        Insn::Var {
            opcode: Opcode::ASTORE,
            index: 0,
        },
        Insn::op(Opcode::RETURN),
    ]);
    method.try_catch_blocks.push(TryCatchBlock {
        start,
        end,
        handler,
        catch_type: Some("java/lang/RuntimeException".into()),
    });
    let mut class = class("a/Guarded", OBJECT);
    class.methods.push(method);
    class.methods.push(MethodModel::new(access::PUBLIC | access::STATIC, "risky", "()V"));
    class.methods[2].instructions.push(Insn::op(Opcode::RETURN));

    let read = decoder::read_class(&encode(&class)).unwrap();
    let guarded = read.method("guarded", "()V").unwrap();
    assert_eq!(guarded.try_catch_blocks.len(), 1);
    let block = &guarded.try_catch_blocks[0];
    assert_eq!(block.catch_type.as_deref(), Some("java/lang/RuntimeException"));
    let code = &guarded.instructions;
    let at = |label| code.position_of(label).unwrap();
    assert!(at(block.start) < at(block.end) && at(block.end) < at(block.handler));
    assert!(
        code.iter().any(|i| matches!(i, Insn::Frame(_))),
        "the handler needs a stack map frame"
    );
}
