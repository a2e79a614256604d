//! Per-method safety guard and the degradation records it produces.
//!
//! Every method-level transform runs against a snapshot of the method's code. If the transform
//! fails, or leaves the code larger than a `Code` attribute can hold, the snapshot is restored
//! and the job carries on. Nothing here aborts a job; everything is recorded.
use crate::context::ClassContext;
use crate::Transform;
use jarcloak_core::{ClassModel, MethodModel, MAX_CODE_SIZE};
use jarcloak_utils::errors::TransformError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What kind of fallback a job took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradationKind {
    /// A method grew past the code size limit and was reverted.
    SizeRevert,
    /// A method transform failed and was reverted.
    TransformFailed,
    /// Stack map frames could not be computed; the class was written without them.
    FrameFallback,
    /// A type needed for frame computation was missing; `java/lang/Object` was assumed.
    ResolutionFallback,
    /// A class could not be written at all and was dropped from the output.
    ClassSkipped,
    /// A second input entry with an already seen name was ignored.
    DuplicateEntry,
    /// A renamer ran out of generated names; the symbol kept its original name.
    RenameSkipped,
}

/// One recorded fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    /// Transformer or phase that degraded.
    pub transformer: String,
    /// Class, `class.method(desc)` or entry name.
    pub target: String,
    pub kind: DegradationKind,
    pub reason: String,
}

impl Degradation {
    pub fn new(
        transformer: impl Into<String>,
        target: impl Into<String>,
        kind: DegradationKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            transformer: transformer.into(),
            target: target.into(),
            kind,
            reason: reason.into(),
        }
    }
}

/// Runs `transform` on `method` and reverts it when the result is unusable.
///
/// # Arguments
/// * `transform` - The transformer whose method hook is run.
/// * `class` - The owning class, with its methods detached.
/// * `method` - The method to transform in place.
/// * `cx` - Class context; any degradation is recorded here.
///
/// # Returns
/// `true` if the transformed code was kept.
pub fn guarded_method_transform(
    transform: &dyn Transform,
    class: &ClassModel,
    method: &mut MethodModel,
    cx: &mut ClassContext<'_>,
) -> bool {
    let snapshot = method.snapshot();
    let failure = match transform.transform_method(class, method, cx) {
        Ok(()) => {
            // conservative: a method whose exact encoding would just fit can still be reverted
            let size = method.instructions.code_size();
            (size > MAX_CODE_SIZE).then(|| {
                let error = TransformError::SizeLimitExceeded {
                    method: method.name.clone(),
                    size,
                    limit: MAX_CODE_SIZE,
                };
                (DegradationKind::SizeRevert, error)
            })
        }
        Err(error) => Some((DegradationKind::TransformFailed, error)),
    };

    let Some((kind, error)) = failure else {
        return true;
    };
    method.restore(snapshot);
    let target = format!("{}.{}{}", class.name, method.name, method.desc);
    warn!("{} reverted on {}: {}", transform.name(), target, error);
    cx.record(Degradation::new(transform.name(), target, kind, error.to_string()));
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObfuscationConfig;
    use crate::context::{JobContext, MemberIndex};
    use crate::exclusion::ExclusionMatcher;
    use crate::{Category, ObfuscationOptions};
    use jarcloak_core::{access, HierarchyIndex, Insn, Opcode};

    struct Bloat;

    impl Transform for Bloat {
        fn name(&self) -> &'static str {
            "Bloat"
        }

        fn category(&self) -> Category {
            Category::Advanced
        }

        fn is_enabled(&self, _options: &ObfuscationOptions) -> bool {
            true
        }

        fn transform_method(
            &self,
            _class: &ClassModel,
            method: &mut MethodModel,
            _cx: &mut ClassContext<'_>,
        ) -> Result<(), TransformError> {
            let nops = (0..MAX_CODE_SIZE).map(|_| Insn::op(Opcode::NOP));
            method.instructions.prepend(nops);
            Ok(())
        }
    }

    struct Failing;

    impl Transform for Failing {
        fn name(&self) -> &'static str {
            "Failing"
        }

        fn category(&self) -> Category {
            Category::Advanced
        }

        fn is_enabled(&self, _options: &ObfuscationOptions) -> bool {
            true
        }

        fn transform_method(
            &self,
            _class: &ClassModel,
            method: &mut MethodModel,
            _cx: &mut ClassContext<'_>,
        ) -> Result<(), TransformError> {
            method.instructions.prepend([Insn::op(Opcode::NOP)]);
            Err(TransformError::Generic("boom".into()))
        }
    }

    fn run(transform: &dyn Transform) -> (MethodModel, MethodModel, Vec<Degradation>, bool) {
        let config = ObfuscationConfig::default();
        let hierarchy = HierarchyIndex::default();
        let members = MemberIndex::default();
        let exclusions = ExclusionMatcher::default();
        let job = JobContext::new(&config, &hierarchy, &members, &exclusions, 7);
        let class = ClassModel::new("a/A", Some("java/lang/Object"));
        let mut method = MethodModel::new(access::PUBLIC, "run", "()V");
        method.instructions.push(Insn::op(Opcode::RETURN));
        let before = method.clone();
        let mut cx = ClassContext::new(&job, transform.name(), &class.name);
        let kept = guarded_method_transform(transform, &class, &mut method, &mut cx);
        (before, method, cx.degradations, kept)
    }

    #[test]
    fn oversized_method_is_reverted() {
        let (before, after, degradations, kept) = run(&Bloat);
        assert!(!kept);
        assert_eq!(before, after, "original code is restored");
        assert_eq!(degradations.len(), 1);
        assert_eq!(degradations[0].kind, DegradationKind::SizeRevert);
        assert_eq!(degradations[0].target, "a/A.run()V");
    }

    #[test]
    fn failed_transform_is_reverted() {
        let (before, after, degradations, kept) = run(&Failing);
        assert!(!kept);
        assert_eq!(before, after);
        assert_eq!(degradations[0].kind, DegradationKind::TransformFailed);
        assert_eq!(degradations[0].transformer, "Failing");
    }
}
