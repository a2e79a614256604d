/// Module for computing size and complexity metrics of class files.
///
/// Metrics serve two purposes: the complexity guard that keeps the heavier transforms away from
/// classes already close to the JVM limits, and the before/after size totals reported at the
/// end of a job. Control-flow complexity is measured on a basic-block graph built with
/// `petgraph`.
///
/// # Usage
/// ```rust,ignore
/// let class = decoder::read_class(&bytes).unwrap();
/// let metrics = metrics::collect_class_metrics(&class);
/// if metrics::is_class_too_complex(&metrics, &ComplexityLimits::default()) {
///     // skip control flow obfuscation for this class
/// }
/// ```
use jarcloak_core::insn::{Insn, Label};
use jarcloak_core::model::{ClassModel, MethodModel};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Thresholds above which a class is considered too complex for code-growing transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityLimits {
    /// Maximum number of methods in one class.
    pub max_methods: usize,
    /// Maximum number of real instructions summed over all methods of a class.
    pub max_instructions: usize,
    /// Maximum serialized code size of a single method, in bytes.
    pub max_code_size: usize,
}

impl Default for ComplexityLimits {
    fn default() -> Self {
        Self {
            max_methods: 400,
            max_instructions: 100_000,
            max_code_size: 30_000,
        }
    }
}

/// Metrics of a single method body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodMetrics {
    pub name: String,
    pub desc: String,
    /// Real instructions, excluding labels and frames.
    pub instruction_count: usize,
    /// Upper bound of the serialized code size in bytes.
    pub code_size: usize,
    /// Number of basic blocks.
    pub block_count: usize,
    /// Edges between basic blocks, including exception edges.
    pub edge_count: usize,
    /// McCabe complexity, `edges - blocks + 2`.
    pub cyclomatic: usize,
}

/// Metrics of a whole class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub name: String,
    pub field_count: usize,
    pub method_count: usize,
    /// Real instructions over all methods.
    pub instruction_count: usize,
    /// Sum of the code size upper bounds of all methods.
    pub code_size: usize,
    /// Largest code size upper bound of any single method.
    pub max_method_code_size: usize,
    pub methods: Vec<MethodMetrics>,
}

/// Totals over a collection of classes, used for the job report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeTotals {
    pub classes: usize,
    pub methods: usize,
    pub instructions: usize,
    pub code_size: usize,
}

/// Collects the metrics of one method.
///
/// # Arguments
/// * `method` - The method to measure. Abstract and native methods yield empty metrics.
///
/// # Returns
/// The instruction count, code size and basic-block complexity of the method.
pub fn collect_method_metrics(method: &MethodModel) -> MethodMetrics {
    let (block_count, edge_count) = block_graph(method)
        .map(|graph| (graph.node_count(), graph.edge_count()))
        .unwrap_or((0, 0));
    MethodMetrics {
        name: method.name.clone(),
        desc: method.desc.clone(),
        instruction_count: method.instructions.real_len(),
        code_size: method.instructions.code_size(),
        block_count,
        edge_count,
        cyclomatic: if block_count == 0 {
            0
        } else {
            (edge_count + 2).saturating_sub(block_count)
        },
    }
}

/// Collects the metrics of one class and all of its methods.
///
/// # Arguments
/// * `class` - The class to measure.
///
/// # Returns
/// A `ClassMetrics` with per-method metrics in declaration order.
pub fn collect_class_metrics(class: &ClassModel) -> ClassMetrics {
    let methods: Vec<MethodMetrics> = class.methods.iter().map(collect_method_metrics).collect();
    ClassMetrics {
        name: class.name.clone(),
        field_count: class.fields.len(),
        method_count: class.methods.len(),
        instruction_count: methods.iter().map(|m| m.instruction_count).sum(),
        code_size: methods.iter().map(|m| m.code_size).sum(),
        max_method_code_size: methods.iter().map(|m| m.code_size).max().unwrap_or(0),
        methods,
    }
}

/// Whether a class exceeds any class-level complexity threshold.
///
/// Only the method count and the total instruction count are checked here; per-method code size
/// is checked separately with [`is_method_too_large`] so a single oversized method does not
/// exclude the rest of its class.
pub fn is_class_too_complex(metrics: &ClassMetrics, limits: &ComplexityLimits) -> bool {
    let too_complex = metrics.method_count > limits.max_methods
        || metrics.instruction_count > limits.max_instructions;
    if too_complex {
        tracing::debug!(
            "{} exceeds complexity limits ({} methods, {} instructions)",
            metrics.name,
            metrics.method_count,
            metrics.instruction_count
        );
    }
    too_complex
}

/// Whether a method is already too large to receive more code.
pub fn is_method_too_large(method: &MethodModel, limits: &ComplexityLimits) -> bool {
    method.instructions.code_size() > limits.max_code_size
}

/// Sums method, instruction and code size counts over `classes`.
pub fn size_totals<'a, I>(classes: I) -> SizeTotals
where
    I: IntoIterator<Item = &'a ClassModel>,
{
    classes
        .into_iter()
        .fold(SizeTotals::default(), |mut totals, class| {
            totals.classes += 1;
            totals.methods += class.methods.len();
            for method in &class.methods {
                totals.instructions += method.instructions.real_len();
                totals.code_size += method.instructions.code_size();
            }
            totals
        })
}

/// Relative code growth between two totals, `0.0` when nothing was there before.
///
/// # Arguments
/// * `before` - Totals of the input classes.
/// * `after` - Totals of the transformed classes.
///
/// # Returns
/// `after / before - 1` over the code size, so `0.5` means the code grew by half.
pub fn growth(before: &SizeTotals, after: &SizeTotals) -> f64 {
    if before.code_size == 0 {
        0.0
    } else {
        after.code_size as f64 / before.code_size as f64 - 1.0
    }
}

/// Builds the basic-block graph of a method.
///
/// Blocks start at the first instruction, at every branch target and handler, and after every
/// jump or instruction that does not fall through. Returns `None` for methods without code or with
/// jumps to labels outside the method.
fn block_graph(method: &MethodModel) -> Option<DiGraph<usize, ()>> {
    let insns = method.instructions.as_slice();
    let real: Vec<usize> = (0..insns.len()).filter(|i| !insns[*i].is_pseudo()).collect();
    if real.is_empty() {
        return None;
    }

    // a label anchors to the first real instruction at or after it
    let mut anchors: HashMap<Label, usize> = HashMap::new();
    let mut pending = Vec::new();
    for (index, insn) in insns.iter().enumerate() {
        match insn {
            Insn::Label(label) => pending.push(*label),
            Insn::Frame(_) => {}
            _ => {
                for label in pending.drain(..) {
                    anchors.insert(label, index);
                }
            }
        }
    }

    let mut leaders = vec![real[0]];
    for (position, &index) in real.iter().enumerate() {
        let insn = &insns[index];
        for target in insn.branch_targets() {
            leaders.push(*anchors.get(&target)?);
        }
        if insn.opcode().is_some_and(|op| op.ends_block() || op.is_jump()) {
            if let Some(next) = real.get(position + 1) {
                leaders.push(*next);
            }
        }
    }
    for block in &method.try_catch_blocks {
        leaders.push(*anchors.get(&block.handler)?);
    }
    leaders.sort_unstable();
    leaders.dedup();

    let mut graph = DiGraph::new();
    let nodes: HashMap<usize, NodeIndex> = leaders
        .iter()
        .map(|leader| (*leader, graph.add_node(*leader)))
        .collect();
    let block_of = |index: usize| {
        let position = leaders.partition_point(|leader| *leader <= index);
        nodes[&leaders[position - 1]]
    };

    for (position, &index) in real.iter().enumerate() {
        let insn = &insns[index];
        let from = block_of(index);
        for target in insn.branch_targets() {
            graph.update_edge(from, block_of(anchors[&target]), ());
        }
        let falls_through = !insn.opcode().is_some_and(|op| op.ends_block());
        if let Some(&next) = real.get(position + 1) {
            if falls_through && nodes.contains_key(&next) {
                graph.update_edge(from, nodes[&next], ());
            }
        }
    }
    for block in &method.try_catch_blocks {
        let (Some(&start), Some(&handler)) = (anchors.get(&block.start), anchors.get(&block.handler))
        else {
            continue;
        };
        graph.update_edge(block_of(start), block_of(handler), ());
    }
    Some(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarcloak_core::model::{access, FieldModel, OBJECT};
    use jarcloak_core::opcode::Opcode;

    fn branching_method() -> MethodModel {
        let skip = Label::new();
        let mut method = MethodModel::new(access::STATIC, "abs", "(I)I");
        method.instructions = vec![
            Insn::Var {
                opcode: Opcode::ILOAD,
                index: 0,
            },
            Insn::jump(Opcode::IFGE, skip),
            Insn::Var {
                opcode: Opcode::ILOAD,
                index: 0,
            },
            Insn::Op(Opcode::INEG),
            Insn::Op(Opcode::IRETURN),
            Insn::Label(skip),
            Insn::Var {
                opcode: Opcode::ILOAD,
                index: 0,
            },
            Insn::Op(Opcode::IRETURN),
        ]
        .into();
        method
    }

    /// A single conditional gives three blocks and one decision.
    #[test]
    fn test_branching_method_metrics() {
        let metrics = collect_method_metrics(&branching_method());
        assert_eq!(metrics.instruction_count, 7, "Instruction count mismatch");
        assert_eq!(metrics.block_count, 3, "Block count mismatch");
        assert_eq!(metrics.edge_count, 2, "Edge count mismatch");
        assert_eq!(metrics.cyclomatic, 1, "edges - blocks + 2 for one diamond half");
    }

    /// Linear code is one block with complexity one.
    #[test]
    fn test_straight_line_metrics() {
        let mut method = MethodModel::new(access::STATIC, "noop", "()V");
        method.instructions.push(Insn::Op(Opcode::RETURN));
        let metrics = collect_method_metrics(&method);
        assert_eq!(metrics.block_count, 1);
        assert_eq!(metrics.cyclomatic, 1);
        assert_eq!(metrics.code_size, 1);
    }

    /// Abstract methods have no blocks at all.
    #[test]
    fn test_abstract_method_metrics() {
        let method = MethodModel::new(access::ABSTRACT, "run", "()V");
        let metrics = collect_method_metrics(&method);
        assert_eq!(metrics.block_count, 0);
        assert_eq!(metrics.cyclomatic, 0);
    }

    /// The class-level guard trips on method count but not on one large method.
    #[test]
    fn test_complexity_guard() {
        let limits = ComplexityLimits {
            max_methods: 2,
            ..ComplexityLimits::default()
        };
        let mut class = ClassModel::new("a/Busy", Some(OBJECT));
        class.fields.push(FieldModel::new(access::PRIVATE, "x", "I"));
        class.methods.push(branching_method());
        class.methods.push(branching_method());
        let metrics = collect_class_metrics(&class);
        assert_eq!(metrics.field_count, 1);
        assert!(!is_class_too_complex(&metrics, &limits), "two methods are within the limit");
        class.methods.push(branching_method());
        assert!(
            is_class_too_complex(&collect_class_metrics(&class), &limits),
            "three methods exceed the limit"
        );
        assert!(!is_method_too_large(&class.methods[0], &limits));
    }

    /// Totals and growth over a class collection.
    #[test]
    fn test_size_totals_and_growth() {
        let mut class = ClassModel::new("a/B", Some(OBJECT));
        class.methods.push(branching_method());
        let before = size_totals([&class]);
        assert_eq!(before.classes, 1);
        assert_eq!(before.instructions, 7);
        class.methods.push(branching_method());
        let after = size_totals([&class]);
        assert!((growth(&before, &after) - 1.0).abs() < f64::EPSILON, "code size doubled");
        assert_eq!(growth(&SizeTotals::default(), &after), 0.0);
    }
}
