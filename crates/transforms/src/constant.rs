//! Constant obfuscation.
//!
//! Integer and long literals are replaced by a two-operand decode (`xor` against a random mask,
//! or a shift pair when no bits can be lost). The `flow` strength additionally routes each
//! decode through an opaque branch on two random longs. Short Latin-1 strings are rebuilt from
//! a byte array filled in random order, and static string constants are moved out of the
//! `ConstantValue` attribute into `<clinit>`.
use crate::config::ConstantOption;
use crate::context::ClassContext;
use crate::{util, Category, ObfuscationOptions, Transform};
use jarcloak_analysis::metrics;
use jarcloak_core::{ClassModel, Constant, Insn, InsnList, Label, MethodModel, Opcode};
use jarcloak_utils::errors::TransformError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

/// `newarray` operand for `byte[]`.
const T_BYTE: i32 = 8;
const SHIFT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Literal {
    Int(i32),
    Long(i64),
}

impl Literal {
    fn of(insn: &Insn) -> Option<Self> {
        insn.int_literal()
            .map(Self::Int)
            .or_else(|| insn.long_literal().map(Self::Long))
    }

    /// Whether `value << 2 >>> 2` gives the value back.
    const fn can_shift(self) -> bool {
        match self {
            Self::Int(value) => value >= 0 && value >> (i32::BITS - SHIFT) == 0,
            Self::Long(value) => value >= 0 && value >> (i64::BITS - SHIFT) == 0,
        }
    }

    fn encode(self, rng: &mut StdRng) -> [Insn; 3] {
        let shift = self.can_shift() && rng.random_bool(0.5);
        match (self, shift) {
            (Self::Int(value), true) => [
                Insn::push_int(value << SHIFT),
                Insn::push_int(SHIFT as i32),
                Insn::op(Opcode::IUSHR),
            ],
            (Self::Long(value), true) => [
                Insn::push_long(value << SHIFT),
                Insn::push_int(SHIFT as i32),
                Insn::op(Opcode::LUSHR),
            ],
            (Self::Int(value), false) => {
                let mask = rng.random_range(0..i32::from(i16::MAX));
                [
                    Insn::push_int(mask),
                    Insn::push_int(value ^ mask),
                    Insn::op(Opcode::IXOR),
                ]
            }
            (Self::Long(value), false) => {
                let mask = i64::from(rng.random_range(0..i16::MAX));
                [
                    Insn::push_long(mask),
                    Insn::push_long(value ^ mask),
                    Insn::op(Opcode::LXOR),
                ]
            }
        }
    }

    fn random(self, rng: &mut StdRng) -> Insn {
        match self {
            Self::Int(_) => Insn::push_int(rng.random()),
            Self::Long(_) => Insn::push_long(rng.random()),
        }
    }

    const fn pop(self) -> Opcode {
        match self {
            Self::Int(_) => Opcode::POP,
            Self::Long(_) => Opcode::POP2,
        }
    }
}

/// Rewrites literals and strings.
#[derive(Debug, Default)]
pub struct ConstantTransformer;

impl ConstantTransformer {
    pub fn new() -> Self {
        Self
    }

    /// Wraps an encoded literal in an opaque branch. `slot` holds an int scratch value.
    ///
    /// ```text
    ///     ldc r0
    ///     ldc r1
    ///     lcmp
    ///     istore slot
    ///     iload slot
    ///     ifne L0
    /// L3: push random
    ///     goto L1
    /// L0: <encoded>
    /// L1: iload slot
    ///     push positive
    ///     iadd
    ///     push negative
    ///     if_icmpne L2
    ///     pop
    ///     goto L3
    /// L2:
    /// ```
    ///
    /// The compare result is 1 or -1, so the sum is never negative and the loop back to `L3`
    /// is never taken.
    fn flow(literal: Literal, encoded: [Insn; 3], slot: u16, rng: &mut StdRng, out: &mut InsnList) {
        let (l0, l1, l2, l3) = (Label::new(), Label::new(), Label::new(), Label::new());
        let r0: i64 = rng.random();
        let r1 = loop {
            let candidate: i64 = rng.random();
            if candidate != r0 {
                break candidate;
            }
        };
        let positive = rng.random_range(1..i32::MAX);
        let negative = -rng.random_range(1..=i32::MAX);
        out.extend([
            Insn::push_long(r0),
            Insn::push_long(r1),
            Insn::op(Opcode::LCMP),
            Insn::Var {
                opcode: Opcode::ISTORE,
                index: slot,
            },
            Insn::Var {
                opcode: Opcode::ILOAD,
                index: slot,
            },
            Insn::jump(Opcode::IFNE, l0),
            Insn::Label(l3),
            literal.random(rng),
            Insn::jump(Opcode::GOTO, l1),
            Insn::Label(l0),
        ]);
        out.extend(encoded);
        out.extend([
            Insn::Label(l1),
            Insn::Var {
                opcode: Opcode::ILOAD,
                index: slot,
            },
            Insn::push_int(positive),
            Insn::op(Opcode::IADD),
            Insn::push_int(negative),
            Insn::jump(Opcode::IF_ICMPNE, l2),
            Insn::op(literal.pop()),
            Insn::jump(Opcode::GOTO, l3),
            Insn::Label(l2),
        ]);
    }

    /// Builds `value` from a `byte[]` stored in `slot`, filled in random order after one decoy
    /// store. Every char must fit in Latin-1.
    fn build_string(value: &str, slot: u16, rng: &mut StdRng, out: &mut InsnList) {
        let bytes: Vec<u8> = value.chars().map(|c| c as u32 as u8).collect();
        let mut order: Vec<usize> = (0..bytes.len()).collect();
        order.shuffle(rng);

        let load = Insn::Var {
            opcode: Opcode::ALOAD,
            index: slot,
        };
        let store = |index: usize, byte: i8, out: &mut InsnList| {
            out.extend([
                load.clone(),
                Insn::push_int(index as i32),
                Insn::push_int(i32::from(byte)),
                Insn::op(Opcode::BASTORE),
            ]);
        };

        out.extend([
            Insn::push_int(bytes.len() as i32),
            Insn::Int {
                opcode: Opcode::NEWARRAY,
                operand: T_BYTE,
            },
            Insn::Var {
                opcode: Opcode::ASTORE,
                index: slot,
            },
        ]);
        if let Some(first) = order.first() {
            store(*first, rng.random(), out);
        }
        for index in order {
            store(index, bytes[index] as i8, out);
        }
        out.extend([
            Insn::type_insn(Opcode::NEW, "java/lang/String"),
            Insn::op(Opcode::DUP),
            load.clone(),
            Insn::field(
                Opcode::GETSTATIC,
                "java/nio/charset/StandardCharsets",
                "ISO_8859_1",
                "Ljava/nio/charset/Charset;",
            ),
            Insn::method(
                Opcode::INVOKESPECIAL,
                "java/lang/String",
                "<init>",
                "([BLjava/nio/charset/Charset;)V",
            ),
        ]);
    }

    fn is_encodable_string(value: &str, max_len: usize) -> bool {
        let len = value.chars().count();
        (1..=max_len).contains(&len) && value.chars().all(|c| (c as u32) <= 0xFF)
    }
}

impl Transform for ConstantTransformer {
    fn name(&self) -> &'static str {
        "Constant"
    }

    fn category(&self) -> Category {
        Category::Advanced
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.constants != ConstantOption::Off
    }

    fn complexity_guarded(&self) -> bool {
        true
    }

    /// Moves a static string `ConstantValue` into `<clinit>`. Instance fields ignore the
    /// attribute at runtime, so theirs is simply dropped.
    fn transform_field(&self, class: &mut ClassModel, field: usize, _cx: &mut ClassContext<'_>) {
        let Some(field) = class.fields.get_mut(field) else {
            return;
        };
        if !matches!(field.value, Some(Constant::String(_))) {
            return;
        }
        let Some(value) = field.value.take() else {
            return;
        };
        if !field.is_static() {
            return;
        }
        let store = Insn::field(Opcode::PUTSTATIC, &class.name, &field.name, &field.desc);
        class
            .find_or_create_clinit()
            .instructions
            .prepend([Insn::Ldc(value), store]);
    }

    fn transform_method(
        &self,
        class: &ClassModel,
        method: &mut MethodModel,
        cx: &mut ClassContext<'_>,
    ) -> Result<(), TransformError> {
        let config = cx.job.config;
        if !method.has_code() {
            return Ok(());
        }
        if metrics::is_method_too_large(method, &config.limits) {
            debug!("{}: skipping large method {}.{}", self.name(), class.name, method.name);
            return Ok(());
        }
        let rate = config.constants.injection_rate;
        let max_len = config.constants.max_string_length;
        let flow = config.options.constants == ConstantOption::Flow;
        let base = method.next_free_local();
        let rng = &mut cx.rng;
        let mut used_slots = false;

        util::rewrite(&mut method.instructions, |insn, out| {
            if let Insn::Ldc(Constant::String(value)) = &insn {
                if Self::is_encodable_string(value, max_len) && rng.random::<f64>() <= rate {
                    Self::build_string(value, base, rng, out);
                    used_slots = true;
                    return;
                }
            }
            match Literal::of(&insn) {
                Some(literal) if rng.random::<f64>() <= rate => {
                    let encoded = literal.encode(rng);
                    if flow {
                        Self::flow(literal, encoded, base + 1, rng, out);
                        used_slots = true;
                    } else {
                        out.extend(encoded);
                    }
                }
                _ => out.push(insn),
            }
        });
        if used_slots {
            method.max_locals = method.max_locals.max(base + 2);
        }
        Ok(())
    }
}
