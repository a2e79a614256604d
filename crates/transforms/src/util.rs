use jarcloak_core::insn::Insn;
use jarcloak_core::{ClassModel, InsnList, MethodModel, Opcode};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha3::{Digest, Keccak256};

/// Derives an independent RNG seed for one transformer working on one scope.
///
/// The job seed, transformer name and scope are hashed with Keccak-256, so the stream a class
/// receives does not depend on the order in which classes are scheduled.
///
/// # Arguments
/// * `seed` - The job seed.
/// * `transformer` - Name of the transformer asking for randomness.
/// * `scope` - Usually the internal name of the class being transformed.
///
/// # Returns
/// The first eight bytes of the digest as a little-endian `u64`.
pub fn derive_seed(seed: u64, transformer: &str, scope: &str) -> u64 {
    let mut hasher = Keccak256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(transformer.as_bytes());
    hasher.update([0]);
    hasher.update(scope.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// An RNG for `transformer` working on `scope`. See [`derive_seed`].
pub fn scoped_rng(seed: u64, transformer: &str, scope: &str) -> StdRng {
    StdRng::seed_from_u64(derive_seed(seed, transformer, scope))
}

/// Whether code may be injected into methods of `class`. Interfaces are left alone because
/// they cannot declare the mutable static fields the guards rely on.
pub const fn is_class_eligible(class: &ClassModel) -> bool {
    !class.is_interface()
}

/// Whether code may be injected into `method` of `class`.
pub fn is_method_eligible(class: &ClassModel, method: &MethodModel) -> bool {
    is_class_eligible(class) && method.has_code()
}

/// Calls, field accesses and allocations: the sites control flow guards wrap.
pub fn is_guard_site(insn: &Insn) -> bool {
    insn.opcode()
        .is_some_and(|op| op.is_invoke() || op.is_field_access() || op == Opcode::NEW)
}

/// Rebuilds `list`, letting `rewrite` replace each instruction with any sequence.
///
/// `rewrite` receives every instruction, labels included, and pushes what should take its
/// place into the output list. Labels stay valid because they are markers, not positions.
pub fn rewrite<F>(list: &mut InsnList, mut rewrite: F)
where
    F: FnMut(Insn, &mut InsnList),
{
    let old = std::mem::take(list);
    let mut out = InsnList::new();
    for insn in old {
        rewrite(insn, &mut out);
    }
    *list = out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarcloak_core::access;
    use rand::Rng;

    #[test]
    fn scoped_streams_are_stable_and_distinct() {
        let a = derive_seed(42, "Constant", "a/A");
        assert_eq!(a, derive_seed(42, "Constant", "a/A"), "same inputs, same seed");
        assert_ne!(a, derive_seed(42, "Constant", "a/B"));
        assert_ne!(a, derive_seed(42, "LightControlFlow", "a/A"));
        assert_ne!(a, derive_seed(43, "Constant", "a/A"));
        let x: u64 = scoped_rng(42, "Constant", "a/A").random();
        let y: u64 = scoped_rng(42, "Constant", "a/A").random();
        assert_eq!(x, y);
    }

    #[test]
    fn interfaces_and_abstract_methods_are_not_eligible() {
        let mut class = ClassModel::new("a/A", Some("java/lang/Object"));
        let mut method = MethodModel::new(access::PUBLIC, "run", "()V");
        method.instructions.push(Insn::op(Opcode::RETURN));
        assert!(is_method_eligible(&class, &method));
        let abstract_method = MethodModel::new(access::PUBLIC | access::ABSTRACT, "f", "()V");
        assert!(!is_method_eligible(&class, &abstract_method));
        class.access |= access::INTERFACE;
        assert!(!is_method_eligible(&class, &method));
    }

    #[test]
    fn guard_sites() {
        assert!(is_guard_site(&Insn::type_insn(Opcode::NEW, "a/A")));
        assert!(is_guard_site(&Insn::field(Opcode::GETSTATIC, "a/A", "f", "I")));
        assert!(is_guard_site(&Insn::method(Opcode::INVOKEVIRTUAL, "a/A", "m", "()V")));
        assert!(!is_guard_site(&Insn::op(Opcode::IADD)));
        assert!(!is_guard_site(&Insn::Label(jarcloak_core::Label::new())));
    }
}
