//! The global remap.
//!
//! Runs once, after every renamer has finished, and rewrites every symbolic reference in every
//! class against the combined symbol map. All lookups use the names as they were before
//! renaming, so the pass reads the old class set and produces a new one that replaces it in
//! one step.
use crate::symbol_map::{field_key, method_key};
use jarcloak_core::descriptor::{remap_descriptor, remap_signature, remap_type};
use jarcloak_core::insn::{ConstantDynamic, FrameNode, Handle, VerificationType};
use jarcloak_core::model::{Annotation, ElementValue, InnerClass};
use jarcloak_core::{ClassModel, Constant, Insn, MethodModel};
use rayon::prelude::*;
use std::collections::HashMap;

const LAMBDA_METAFACTORY: &str = "java/lang/invoke/LambdaMetafactory";

/// Applies a combined old-name to new-name table to class models.
#[derive(Debug, Clone, Default)]
pub struct Remapper {
    map: HashMap<String, String>,
}

impl Remapper {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The new name of class `old`, if it was renamed.
    pub fn class(&self, old: &str) -> Option<String> {
        self.map.get(old).cloned()
    }

    pub fn map_type(&self, name: &str) -> String {
        remap_type(name, &|n: &str| self.class(n))
    }

    pub fn map_desc(&self, desc: &str) -> String {
        remap_descriptor(desc, &|n: &str| self.class(n))
    }

    /// Malformed signatures are kept as they are.
    pub fn map_signature(&self, signature: &str) -> String {
        remap_signature(signature, &|n: &str| self.class(n))
            .unwrap_or_else(|| signature.to_string())
    }

    pub fn map_field(&self, owner: &str, name: &str) -> String {
        self.map
            .get(&field_key(owner, name))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub fn map_method(&self, owner: &str, name: &str, desc: &str) -> String {
        self.map
            .get(&method_key(owner, name, desc))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Rewrites one class. `class` still carries its old names.
    pub fn remap_class(&self, class: ClassModel) -> ClassModel {
        let old_name = class.name.clone();
        let ClassModel {
            version,
            access,
            name,
            super_name,
            interfaces,
            signature,
            source_file,
            source_debug,
            inner_classes,
            enclosing_method,
            nest_host,
            nest_members,
            permitted_subclasses,
            visible_annotations,
            invisible_annotations,
            deprecated,
            fields,
            methods,
        } = class;

        let enclosing_method = enclosing_method.map(|mut enclosing| {
            let name = match (&enclosing.name, &enclosing.desc) {
                (Some(name), Some(desc)) => Some(self.map_method(&enclosing.owner, name, desc)),
                (name, _) => name.clone(),
            };
            enclosing.name = name;
            enclosing.desc = enclosing.desc.map(|d| self.map_desc(&d));
            enclosing.owner = self.map_type(&enclosing.owner);
            enclosing
        });

        let fields = fields
            .into_iter()
            .map(|mut field| {
                field.name = self.map_field(&old_name, &field.name);
                field.desc = self.map_desc(&field.desc);
                field.signature = field.signature.map(|s| self.map_signature(&s));
                field.value = field.value.map(|v| self.map_constant(v));
                field.visible_annotations = self.map_annotations(field.visible_annotations);
                field.invisible_annotations = self.map_annotations(field.invisible_annotations);
                field
            })
            .collect();

        let methods = methods
            .into_iter()
            .map(|method| self.remap_method(&old_name, method))
            .collect();

        ClassModel {
            version,
            access,
            name: self.map_type(&name),
            super_name: super_name.map(|s| self.map_type(&s)),
            interfaces: interfaces.iter().map(|i| self.map_type(i)).collect(),
            signature: signature.map(|s| self.map_signature(&s)),
            source_file,
            source_debug,
            inner_classes: inner_classes
                .into_iter()
                .map(|inner| self.map_inner_class(inner))
                .collect(),
            enclosing_method,
            nest_host: nest_host.map(|n| self.map_type(&n)),
            nest_members: nest_members.iter().map(|n| self.map_type(n)).collect(),
            permitted_subclasses: permitted_subclasses
                .iter()
                .map(|n| self.map_type(n))
                .collect(),
            visible_annotations: self.map_annotations(visible_annotations),
            invisible_annotations: self.map_annotations(invisible_annotations),
            deprecated,
            fields,
            methods,
        }
    }

    fn map_inner_class(&self, inner: InnerClass) -> InnerClass {
        let renamed = self.class(&inner.name);
        let inner_name = match (&renamed, inner.inner_name) {
            (Some(new), Some(_)) => {
                let simple = new.rsplit('/').next().unwrap_or(new.as_str());
                Some(simple.to_string())
            }
            (_, inner_name) => inner_name,
        };
        InnerClass {
            name: renamed.unwrap_or(inner.name),
            outer_name: inner.outer_name.map(|o| self.map_type(&o)),
            inner_name,
            access: inner.access,
        }
    }

    fn remap_method(&self, owner: &str, mut method: MethodModel) -> MethodModel {
        method.name = self.map_method(owner, &method.name, &method.desc);
        method.desc = self.map_desc(&method.desc);
        method.signature = method.signature.map(|s| self.map_signature(&s));
        method.exceptions = method.exceptions.iter().map(|e| self.map_type(e)).collect();
        method.visible_annotations = self.map_annotations(method.visible_annotations);
        method.invisible_annotations = self.map_annotations(method.invisible_annotations);
        method.annotation_default = method
            .annotation_default
            .map(|value| self.map_element(value));
        for block in &mut method.try_catch_blocks {
            block.catch_type = block.catch_type.as_deref().map(|t| self.map_type(t));
        }
        for local in &mut method.local_variables {
            local.desc = self.map_desc(&local.desc);
            local.signature = local.signature.as_deref().map(|s| self.map_signature(s));
        }
        for insn in method.instructions.iter_mut() {
            self.map_insn(insn);
        }
        method
    }

    fn map_insn(&self, insn: &mut Insn) {
        match insn {
            Insn::Type { class, .. } => *class = self.map_type(class),
            Insn::Field {
                owner, name, desc, ..
            } => {
                *name = self.map_field(owner, name);
                *desc = self.map_desc(desc);
                *owner = self.map_type(owner);
            }
            Insn::Method {
                owner, name, desc, ..
            } => {
                *name = self.map_method(owner, name, desc);
                *desc = self.map_desc(desc);
                *owner = self.map_type(owner);
            }
            Insn::InvokeDynamic {
                name,
                desc,
                bootstrap,
                args,
            } => {
                if let Some(renamed) = self.lambda_name(name, desc, bootstrap, args) {
                    *name = renamed;
                }
                *desc = self.map_desc(desc);
                *bootstrap = self.map_handle(bootstrap);
                let old = std::mem::take(args);
                *args = old.into_iter().map(|arg| self.map_constant(arg)).collect();
            }
            Insn::Ldc(constant) => {
                let old = std::mem::replace(constant, Constant::Int(0));
                *constant = self.map_constant(old);
            }
            Insn::MultiANewArray { desc, .. } => *desc = self.map_desc(desc),
            Insn::Frame(FrameNode { locals, stack }) => {
                for slot in locals.iter_mut().chain(stack.iter_mut()) {
                    if let VerificationType::Object(name) = slot {
                        *name = self.map_type(name);
                    }
                }
            }
            _ => {}
        }
    }

    /// New name of the functional interface method a `LambdaMetafactory` call site implements.
    fn lambda_name(
        &self,
        name: &str,
        desc: &str,
        bootstrap: &Handle,
        args: &[Constant],
    ) -> Option<String> {
        if bootstrap.owner != LAMBDA_METAFACTORY {
            return None;
        }
        let interface = desc
            .rsplit(')')
            .next()
            .and_then(|ret| ret.strip_prefix('L'))
            .and_then(|ret| ret.strip_suffix(';'))?;
        let Some(Constant::MethodType(sam_desc)) = args.first() else {
            return None;
        };
        self.map
            .get(&method_key(interface, name, sam_desc))
            .cloned()
    }

    fn map_handle(&self, handle: &Handle) -> Handle {
        let name = if handle.is_field() {
            self.map_field(&handle.owner, &handle.name)
        } else {
            self.map_method(&handle.owner, &handle.name, &handle.desc)
        };
        Handle {
            kind: handle.kind,
            owner: self.map_type(&handle.owner),
            name,
            desc: self.map_desc(&handle.desc),
            interface: handle.interface,
        }
    }

    fn map_constant(&self, constant: Constant) -> Constant {
        match constant {
            Constant::Class(name) => Constant::Class(self.map_type(&name)),
            Constant::MethodType(desc) => Constant::MethodType(self.map_desc(&desc)),
            Constant::MethodHandle(handle) => Constant::MethodHandle(self.map_handle(&handle)),
            Constant::Dynamic(dynamic) => {
                let ConstantDynamic {
                    name,
                    desc,
                    bootstrap,
                    args,
                } = *dynamic;
                Constant::Dynamic(Box::new(ConstantDynamic {
                    name,
                    desc: self.map_desc(&desc),
                    bootstrap: self.map_handle(&bootstrap),
                    args: args.into_iter().map(|arg| self.map_constant(arg)).collect(),
                }))
            }
            other => other,
        }
    }

    fn map_annotations(&self, annotations: Vec<Annotation>) -> Vec<Annotation> {
        annotations
            .into_iter()
            .map(|annotation| self.map_annotation(annotation))
            .collect()
    }

    fn map_annotation(&self, annotation: Annotation) -> Annotation {
        Annotation {
            desc: self.map_desc(&annotation.desc),
            values: annotation
                .values
                .into_iter()
                .map(|(name, value)| (name, self.map_element(value)))
                .collect(),
        }
    }

    fn map_element(&self, value: ElementValue) -> ElementValue {
        match value {
            ElementValue::Enum { desc, name } => {
                let owner = desc
                    .strip_prefix('L')
                    .and_then(|d| d.strip_suffix(';'))
                    .unwrap_or(&desc);
                ElementValue::Enum {
                    name: self.map_field(owner, &name),
                    desc: self.map_desc(&desc),
                }
            }
            ElementValue::Class(desc) => ElementValue::Class(self.map_desc(&desc)),
            ElementValue::Annotation(nested) => {
                ElementValue::Annotation(self.map_annotation(nested))
            }
            ElementValue::Array(values) => ElementValue::Array(
                values
                    .into_iter()
                    .map(|value| self.map_element(value))
                    .collect(),
            ),
            constant @ ElementValue::Const(..) => constant,
        }
    }
}

/// Rewrites every class against `remapper` and returns the new class set, in the same order.
pub fn remap_all(classes: Vec<ClassModel>, remapper: &Remapper, parallel: bool) -> Vec<ClassModel> {
    if remapper.is_empty() {
        return classes;
    }
    if parallel {
        classes
            .into_par_iter()
            .map(|class| remapper.remap_class(class))
            .collect()
    } else {
        classes
            .into_iter()
            .map(|class| remapper.remap_class(class))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarcloak_core::insn::handle_kind;
    use jarcloak_core::model::TryCatchBlock;
    use jarcloak_core::{access, FieldModel, Label, Opcode, OBJECT};

    fn remapper() -> Remapper {
        Remapper::new(HashMap::from([
            ("com/acme/Shape".to_string(), "AA".to_string()),
            ("com/acme/Shape$Kind".to_string(), "AB".to_string()),
            ("com/acme/Shape.area()D".to_string(), "AC".to_string()),
            ("com/acme/Shape.sides".to_string(), "AD".to_string()),
            ("com/acme/Shape$Kind.ROUND".to_string(), "AE".to_string()),
        ]))
    }

    #[test]
    fn declarations_and_references_are_renamed() {
        let mut class = ClassModel::new("com/acme/Shape", Some(OBJECT));
        class.fields.push(FieldModel::new(access::PRIVATE, "sides", "I"));
        let mut method = MethodModel::new(access::PUBLIC, "area", "()D");
        let handler = Label::new();
        method.instructions.extend([
            Insn::field(Opcode::GETFIELD, "com/acme/Shape", "sides", "I"),
            Insn::type_insn(Opcode::CHECKCAST, "[Lcom/acme/Shape;"),
            Insn::method(Opcode::INVOKEVIRTUAL, "com/acme/Shape", "area", "()D"),
            Insn::Ldc(Constant::Class("com/acme/Shape".into())),
            Insn::Label(handler),
            Insn::Frame(FrameNode {
                locals: vec![VerificationType::Object("com/acme/Shape".into())],
                stack: vec![],
            }),
        ]);
        method.try_catch_blocks.push(TryCatchBlock {
            start: handler,
            end: handler,
            handler,
            catch_type: Some("com/acme/Shape".into()),
        });
        class.methods.push(method);

        let out = remapper().remap_class(class);
        assert_eq!(out.name, "AA");
        assert_eq!(out.fields[0].name, "AD");
        let method = &out.methods[0];
        assert_eq!(method.name, "AC");
        let insns = method.instructions.as_slice();
        assert_eq!(insns[0], Insn::field(Opcode::GETFIELD, "AA", "AD", "I"));
        assert_eq!(insns[1], Insn::type_insn(Opcode::CHECKCAST, "[LAA;"));
        assert_eq!(insns[2], Insn::method(Opcode::INVOKEVIRTUAL, "AA", "AC", "()D"));
        assert_eq!(insns[3], Insn::Ldc(Constant::Class("AA".into())));
        let Insn::Frame(frame) = &insns[5] else {
            panic!("frame expected");
        };
        assert_eq!(frame.locals[0], VerificationType::Object("AA".into()));
        assert_eq!(method.try_catch_blocks[0].catch_type.as_deref(), Some("AA"));
    }

    #[test]
    fn inner_class_names_follow_the_new_name() {
        let mut class = ClassModel::new("com/acme/Shape", Some(OBJECT));
        class.inner_classes.push(InnerClass {
            name: "com/acme/Shape$Kind".into(),
            outer_name: Some("com/acme/Shape".into()),
            inner_name: Some("Kind".into()),
            access: access::PUBLIC | access::STATIC,
        });
        class.visible_annotations.push(Annotation {
            desc: "Lcom/acme/Tag;".into(),
            values: vec![(
                "kind".into(),
                ElementValue::Enum {
                    desc: "Lcom/acme/Shape$Kind;".into(),
                    name: "ROUND".into(),
                },
            )],
        });
        let out = remapper().remap_class(class);
        let inner = &out.inner_classes[0];
        assert_eq!(inner.name, "AB");
        assert_eq!(inner.outer_name.as_deref(), Some("AA"));
        assert_eq!(inner.inner_name.as_deref(), Some("AB"));
        assert_eq!(
            out.visible_annotations[0].values[0].1,
            ElementValue::Enum {
                desc: "LAB;".into(),
                name: "AE".into()
            }
        );
    }

    #[test]
    fn lambda_call_sites_follow_the_interface() {
        let remapper = Remapper::new(HashMap::from([
            ("a/Op".to_string(), "AA".to_string()),
            ("a/Op.apply(I)I".to_string(), "AB".to_string()),
        ]));
        let mut insn = Insn::InvokeDynamic {
            name: "apply".into(),
            desc: "()La/Op;".into(),
            bootstrap: Handle {
                kind: handle_kind::INVOKE_STATIC,
                owner: LAMBDA_METAFACTORY.into(),
                name: "metafactory".into(),
                desc: "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;".into(),
                interface: false,
            },
            args: vec![Constant::MethodType("(I)I".into())],
        };
        remapper.map_insn(&mut insn);
        let Insn::InvokeDynamic { name, desc, .. } = insn else {
            panic!("invokedynamic expected");
        };
        assert_eq!(name, "AB");
        assert_eq!(desc, "()LAA;");
    }

    #[test]
    fn remapping_is_a_no_op_without_renames() {
        let class = ClassModel::new("a/A", Some(OBJECT));
        let out = remap_all(vec![class.clone()], &Remapper::default(), true);
        assert_eq!(out, vec![class]);
    }
}
