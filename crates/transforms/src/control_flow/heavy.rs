use super::{add_flow_field, ensure_branch, is_target, random_lookup_switch};
use crate::config::ControlFlowOption;
use crate::context::ClassContext;
use crate::{util, Category, ObfuscationOptions, Transform};
use jarcloak_core::{ClassModel, Insn, InsnList, Label, MethodModel, Opcode};
use jarcloak_utils::errors::TransformError;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

/// Name of the flow field.
pub(crate) const FLOW_FIELD: &str = "\u{13E9}";

/// Guards a sample of sites with denser predicates.
///
/// The flow field is always zero. Each site is guarded with probability
/// `control_flow.heavy_injection_rate`; the switch form sends its default case to
/// `aconst_null; athrow`.
#[derive(Debug, Default)]
pub struct HeavyControlFlow;

impl HeavyControlFlow {
    pub fn new() -> Self {
        Self
    }

    /// ```text
    ///     push random
    ///     push random
    /// L2: pop2
    ///     getstatic flow
    ///     ldc nonzero
    ///     lcmp
    ///     iconst_0
    ///     swap
    ///     dup
    ///     ifeq L0
    ///     ifeq L3
    ///     pop
    ///     <site>
    ///     goto L1
    /// L0: pop
    /// L3: iconst_0
    ///     goto L2
    /// L1:
    /// ```
    fn compare_guard(owner: &str, rng: &mut StdRng, site: Insn, out: &mut InsnList) {
        let (l0, l1, l2, l3) = (Label::new(), Label::new(), Label::new(), Label::new());
        let nonzero = loop {
            let candidate: i64 = rng.random();
            if candidate != 0 {
                break candidate;
            }
        };
        out.extend([
            Insn::push_int(rng.random()),
            Insn::push_int(rng.random()),
            Insn::Label(l2),
            Insn::op(Opcode::POP2),
            Insn::field(Opcode::GETSTATIC, owner, FLOW_FIELD, "J"),
            Insn::push_long(nonzero),
            Insn::op(Opcode::LCMP),
            Insn::op(Opcode::ICONST_0),
            Insn::op(Opcode::SWAP),
            Insn::op(Opcode::DUP),
            Insn::jump(Opcode::IFEQ, l0),
            Insn::jump(Opcode::IFEQ, l3),
            Insn::op(Opcode::POP),
            site,
            Insn::jump(Opcode::GOTO, l1),
            Insn::Label(l0),
            Insn::op(Opcode::POP),
            Insn::Label(l3),
            Insn::op(Opcode::ICONST_0),
            Insn::jump(Opcode::GOTO, l2),
            Insn::Label(l1),
        ]);
    }

    fn switch_guard(owner: &str, rng: &mut StdRng, site: Insn, out: &mut InsnList) {
        out.extend([
            Insn::field(Opcode::GETSTATIC, owner, FLOW_FIELD, "J"),
            Insn::op(Opcode::L2I),
        ]);
        let size = 2 + rng.random_range(0..3);
        let switch = random_lookup_switch(
            rng,
            size,
            0,
            Vec::new(),
            |_| Vec::new(),
            vec![Insn::op(Opcode::ACONST_NULL), Insn::op(Opcode::ATHROW)],
        );
        out.extend(switch);
        out.push(site);
    }
}

impl Transform for HeavyControlFlow {
    fn name(&self) -> &'static str {
        "HeavyControlFlow"
    }

    fn category(&self) -> Category {
        Category::Advanced
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.control_flow == ControlFlowOption::Heavy
    }

    fn complexity_guarded(&self) -> bool {
        true
    }

    fn transform_class(&self, class: &mut ClassModel, cx: &mut ClassContext<'_>) {
        if util::is_class_eligible(class) {
            add_flow_field(class, FLOW_FIELD, 0, &mut cx.rng);
        }
    }

    fn transform_method(
        &self,
        class: &ClassModel,
        method: &mut MethodModel,
        cx: &mut ClassContext<'_>,
    ) -> Result<(), TransformError> {
        if !is_target(class, method, &cx.job.config.limits) {
            if method.has_code() {
                debug!("{}: skipping {}.{}", self.name(), class.name, method.name);
            }
            return Ok(());
        }
        if class.field(FLOW_FIELD).is_none() {
            return Ok(());
        }
        ensure_branch(method);
        let rate = cx.job.config.control_flow.heavy_injection_rate;
        let owner = class.name.as_str();
        let rng = &mut cx.rng;
        util::rewrite(&mut method.instructions, |insn, out| {
            if !util::is_guard_site(&insn) || rng.random::<f64>() > rate {
                out.push(insn);
            } else if rng.random_bool(0.5) {
                Self::compare_guard(owner, rng, insn, out);
            } else {
                Self::switch_guard(owner, rng, insn, out);
            }
        });
        Ok(())
    }
}
