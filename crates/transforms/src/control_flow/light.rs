use super::{add_flow_field, ensure_branch, is_target, random_lookup_switch};
use crate::config::ControlFlowOption;
use crate::context::ClassContext;
use crate::{util, Category, ObfuscationOptions, Transform};
use jarcloak_core::{ClassModel, Constant, Insn, InsnList, Label, MethodModel, Opcode};
use jarcloak_utils::errors::TransformError;
use rand::rngs::StdRng;
use rand::Rng;

/// Name of the flow field.
pub(crate) const FLOW_FIELD: &str = "\u{13E8}";

/// Guards every call, field access and allocation site.
///
/// The flow field holds a random `long` chosen per class; guards compare it against another
/// random value or switch on its low 32 bits.
#[derive(Debug, Default)]
pub struct LightControlFlow;

impl LightControlFlow {
    pub fn new() -> Self {
        Self
    }

    /// ```text
    ///     goto L3
    /// L2: pop
    /// L3: getstatic flow
    ///     ldc other
    ///     lcmp
    ///     dup
    ///     ifeq L2
    ///     push sign(flow - other)
    ///     if_icmpne L5
    ///     <site>
    ///     goto L6
    /// L5: push random
    ///     goto L2
    /// L6:
    /// ```
    fn compare_guard(
        owner: &str,
        value: i64,
        rng: &mut StdRng,
        site: Insn,
        out: &mut InsnList,
    ) {
        let (l2, l3, l5, l6) = (Label::new(), Label::new(), Label::new(), Label::new());
        let other = loop {
            let candidate: i64 = rng.random();
            if candidate != value {
                break candidate;
            }
        };
        out.extend([
            Insn::jump(Opcode::GOTO, l3),
            Insn::Label(l2),
            Insn::op(Opcode::POP),
            Insn::Label(l3),
            Insn::field(Opcode::GETSTATIC, owner, FLOW_FIELD, "J"),
            Insn::push_long(other),
            Insn::op(Opcode::LCMP),
            Insn::op(Opcode::DUP),
            Insn::jump(Opcode::IFEQ, l2),
            Insn::push_int(if value > other { 1 } else { -1 }),
            Insn::jump(Opcode::IF_ICMPNE, l5),
            site,
            Insn::jump(Opcode::GOTO, l6),
            Insn::Label(l5),
            Insn::push_int(rng.random()),
            Insn::jump(Opcode::GOTO, l2),
            Insn::Label(l6),
        ]);
    }

    /// ```text
    ///     getstatic flow
    ///     goto L1
    /// L0: ldc random
    ///     ldiv
    /// L1: l2i
    ///     lookupswitch (int) flow -> goto L4, others -> ldc random; goto L0
    /// L4: <site>
    /// ```
    fn switch_guard(owner: &str, value: i64, rng: &mut StdRng, site: Insn, out: &mut InsnList) {
        let (l0, l1, l4) = (Label::new(), Label::new(), Label::new());
        out.extend([
            Insn::field(Opcode::GETSTATIC, owner, FLOW_FIELD, "J"),
            Insn::jump(Opcode::GOTO, l1),
            Insn::Label(l0),
            Insn::push_long(rng.random()),
            Insn::op(Opcode::LDIV),
            Insn::Label(l1),
            Insn::op(Opcode::L2I),
        ]);
        let size = 2 + rng.random_range(0..3);
        let switch = random_lookup_switch(
            rng,
            size,
            value as i32,
            vec![Insn::jump(Opcode::GOTO, l4)],
            |rng| vec![Insn::push_long(rng.random()), Insn::jump(Opcode::GOTO, l0)],
            Vec::new(),
        );
        out.extend(switch);
        out.extend([Insn::Label(l4), site]);
    }
}

impl Transform for LightControlFlow {
    fn name(&self) -> &'static str {
        "LightControlFlow"
    }

    fn category(&self) -> Category {
        Category::Advanced
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.control_flow == ControlFlowOption::Light
    }

    fn complexity_guarded(&self) -> bool {
        true
    }

    fn transform_class(&self, class: &mut ClassModel, cx: &mut ClassContext<'_>) {
        if !util::is_class_eligible(class) {
            return;
        }
        let value: i64 = cx.rng.random();
        add_flow_field(class, FLOW_FIELD, value, &mut cx.rng);
    }

    fn transform_method(
        &self,
        class: &ClassModel,
        method: &mut MethodModel,
        cx: &mut ClassContext<'_>,
    ) -> Result<(), TransformError> {
        if !is_target(class, method, &cx.job.config.limits) {
            return Ok(());
        }
        let Some(Constant::Long(value)) = class.field(FLOW_FIELD).and_then(|f| f.value.clone())
        else {
            return Ok(());
        };
        ensure_branch(method);
        let owner = class.name.as_str();
        let rng = &mut cx.rng;
        util::rewrite(&mut method.instructions, |insn, out| {
            if !util::is_guard_site(&insn) {
                out.push(insn);
            } else if rng.random_bool(0.5) {
                Self::compare_guard(owner, value, rng, insn, out);
            } else {
                Self::switch_guard(owner, value, rng, insn, out);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renamer::test_support::Fixture;
    use jarcloak_core::{access, OBJECT};

    #[test]
    fn every_site_is_guarded() {
        let mut class = ClassModel::new("a/A", Some(OBJECT));
        let mut method = MethodModel::new(access::PUBLIC, "run", "()V");
        method.instructions.extend([
            Insn::field(Opcode::GETSTATIC, "java/lang/System", "out", "Ljava/io/PrintStream;"),
            Insn::method(Opcode::INVOKEVIRTUAL, "java/io/PrintStream", "println", "()V"),
            Insn::op(Opcode::RETURN),
        ]);
        let fixture = Fixture::new(std::slice::from_ref(&class), "");
        let job = fixture.job();
        let transform = LightControlFlow::new();
        let mut cx = ClassContext::new(&job, transform.name(), "a/A");
        transform.transform_class(&mut class, &mut cx);
        assert!(class.field(FLOW_FIELD).is_some_and(|f| f.is_static()));

        transform
            .transform_method(&class, &mut method, &mut cx)
            .expect("light flow never fails");
        let code = method.instructions.as_slice();
        let guard_reads = code
            .iter()
            .filter(|insn| matches!(insn, Insn::Field { name, .. } if name == FLOW_FIELD))
            .count();
        assert_eq!(guard_reads, 2, "one guard per site");
        assert!(
            code.iter().any(|i| i.opcode().is_some_and(Opcode::is_conditional_jump)),
            "method has a branch"
        );
        assert_eq!(code.last(), Some(&Insn::op(Opcode::RETURN)));
    }

    #[test]
    fn interfaces_get_no_flow_field() {
        let mut class = ClassModel::new("a/I", Some(OBJECT));
        class.access |= access::INTERFACE | access::ABSTRACT;
        let fixture = Fixture::new(std::slice::from_ref(&class), "");
        let job = fixture.job();
        let transform = LightControlFlow::new();
        let mut cx = ClassContext::new(&job, transform.name(), "a/I");
        transform.transform_class(&mut class, &mut cx);
        assert!(class.fields.is_empty());
    }
}
