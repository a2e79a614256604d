//! Dispatch of one transformer over the classes and resources of a job.
//!
//! A class is visited hook by hook: the class hook, then the field hook for every non-excluded
//! field, then the method hook for every non-excluded method. Method hooks run with the methods
//! detached from the class and each call goes through [`guarded_method_transform`].
use crate::context::{ClassContext, JobContext};
use crate::entries::Resource;
use crate::guard::{guarded_method_transform, Degradation};
use crate::symbol_map::{field_key, method_key};
use crate::Transform;
use jarcloak_analysis::metrics;
use jarcloak_core::ClassModel;
use rayon::prelude::*;
use tracing::{debug, info};

/// What one transformer did over a job.
#[derive(Debug, Default)]
pub struct PassSummary {
    /// Classes the hooks ran on.
    pub visited: usize,
    /// Classes left alone because of an exclusion or the complexity guard.
    pub skipped: usize,
    /// Method transforms undone by the safety guard.
    pub reverted: usize,
    pub degradations: Vec<Degradation>,
}

impl PassSummary {
    fn merge(mut self, other: Self) -> Self {
        self.visited += other.visited;
        self.skipped += other.skipped;
        self.reverted += other.reverted;
        self.degradations.extend(other.degradations);
        self
    }

    fn skipped() -> Self {
        Self {
            skipped: 1,
            ..Self::default()
        }
    }
}

/// Runs every hook of `transform` on one class.
fn run_on_class(transform: &dyn Transform, class: &mut ClassModel, job: &JobContext<'_>) -> PassSummary {
    let name = transform.name();
    if job.is_excluded(name, &class.name) {
        debug!("{name}: {} is excluded", class.name);
        return PassSummary::skipped();
    }
    if transform.complexity_guarded()
        && metrics::is_class_too_complex(&metrics::collect_class_metrics(class), &job.config.limits)
    {
        debug!("{name}: {} is too complex, skipping", class.name);
        return PassSummary::skipped();
    }

    let mut cx = ClassContext::new(job, name, &class.name);
    transform.transform_class(class, &mut cx);

    for index in 0..class.fields.len() {
        let key = field_key(&class.name, &class.fields[index].name);
        if !job.is_excluded(name, &key) {
            transform.transform_field(class, index, &mut cx);
        }
    }

    let mut reverted = 0;
    let mut methods = std::mem::take(&mut class.methods);
    for method in &mut methods {
        let key = method_key(&class.name, &method.name, &method.desc);
        if job.is_excluded(name, &key) {
            continue;
        }
        if !guarded_method_transform(transform, class, method, &mut cx) {
            reverted += 1;
        }
    }
    class.methods = methods;

    PassSummary {
        visited: 1,
        skipped: 0,
        reverted,
        degradations: cx.degradations,
    }
}

/// Runs `transform` over every class, on the rayon pool when `parallel` is set.
///
/// Each class gets its own RNG stream, so the result does not depend on scheduling.
pub fn run_transformer(
    transform: &dyn Transform,
    classes: &mut [ClassModel],
    job: &JobContext<'_>,
    parallel: bool,
) -> PassSummary {
    let summary = if parallel {
        classes
            .par_iter_mut()
            .map(|class| run_on_class(transform, class, job))
            .reduce(PassSummary::default, PassSummary::merge)
    } else {
        classes
            .iter_mut()
            .map(|class| run_on_class(transform, class, job))
            .fold(PassSummary::default(), PassSummary::merge)
    };
    info!(
        "{:>14} {} classes, {} skipped, {} reverted",
        transform.name(),
        summary.visited,
        summary.skipped,
        summary.reverted
    );
    summary
}

/// Runs a renamer over every class in input order, then over every non-excluded resource.
///
/// Renamers only claim names; nothing is rewritten until the global remap.
pub fn run_renamer(
    renamer: &dyn Transform,
    classes: &mut [ClassModel],
    resources: &mut [Resource],
    job: &JobContext<'_>,
) -> PassSummary {
    let summary = classes
        .iter_mut()
        .map(|class| run_on_class(renamer, class, job))
        .fold(PassSummary::default(), PassSummary::merge);
    for resource in resources.iter_mut() {
        if !job.is_excluded(renamer.name(), &resource.name) {
            renamer.transform_resource(resource, job);
        }
    }
    let claimed = renamer.symbols().map_or(0, |symbols| symbols.len());
    info!(
        "{:>14} {} classes, {} names claimed",
        renamer.name(),
        summary.visited,
        claimed
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ClassContext;
    use crate::renamer::test_support::{concrete, Fixture};
    use crate::{Category, ObfuscationOptions};
    use jarcloak_core::{access, FieldModel, MethodModel, OBJECT};
    use jarcloak_utils::errors::TransformError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts hook calls and marks every method it sees.
    #[derive(Default)]
    struct Counter {
        fields: AtomicUsize,
        methods: AtomicUsize,
    }

    impl Transform for Counter {
        fn name(&self) -> &'static str {
            "Counter"
        }

        fn category(&self) -> Category {
            Category::Stable
        }

        fn is_enabled(&self, _options: &ObfuscationOptions) -> bool {
            true
        }

        fn complexity_guarded(&self) -> bool {
            true
        }

        fn transform_class(&self, class: &mut ClassModel, _cx: &mut ClassContext<'_>) {
            class.find_or_create_clinit();
        }

        fn transform_field(&self, _class: &mut ClassModel, _field: usize, _cx: &mut ClassContext<'_>) {
            self.fields.fetch_add(1, Ordering::Relaxed);
        }

        fn transform_method(
            &self,
            _class: &ClassModel,
            method: &mut MethodModel,
            _cx: &mut ClassContext<'_>,
        ) -> Result<(), TransformError> {
            self.methods.fetch_add(1, Ordering::Relaxed);
            method.deprecated = true;
            Ok(())
        }
    }

    fn sample(name: &str, methods: usize) -> ClassModel {
        let mut class = ClassModel::new(name, Some(OBJECT));
        class.fields.push(FieldModel::new(access::PRIVATE, "secret", "I"));
        class.fields.push(FieldModel::new(access::PRIVATE, "open", "I"));
        for i in 0..methods {
            class.methods.push(concrete(access::PUBLIC, &format!("m{i}"), "()V"));
        }
        class
    }

    #[test]
    fn exclusions_skip_classes_and_members() {
        let mut classes = vec![sample("a/A", 2), sample("a/Keep", 2)];
        let fixture = Fixture::new(&classes, "Counter:a.Keep\nCounter:a.A.secret\na.A.m1()V");
        let job = fixture.job();
        let counter = Counter::default();
        let summary = run_transformer(&counter, &mut classes, &job, false);
        assert_eq!((summary.visited, summary.skipped), (1, 1));
        assert_eq!(counter.fields.load(Ordering::Relaxed), 1, "a/A.secret is excluded");
        // m0 and the <clinit> added by the class hook
        assert_eq!(counter.methods.load(Ordering::Relaxed), 2);
        let a = &classes[0];
        assert!(a.method("m0", "()V").is_some_and(|m| m.deprecated));
        assert!(a.method("m1", "()V").is_some_and(|m| !m.deprecated));
        assert!(classes[1].method("<clinit>", "()V").is_none(), "excluded class untouched");
    }

    #[test]
    fn complexity_guard_skips_large_classes() {
        let mut classes = vec![sample("a/Big", 5), sample("a/Small", 1)];
        let mut fixture = Fixture::new(&classes, "");
        fixture.config.limits.max_methods = 3;
        let job = fixture.job();
        let summary = run_transformer(&Counter::default(), &mut classes, &job, true);
        assert_eq!((summary.visited, summary.skipped), (1, 1));
        assert_eq!(classes[0].methods.len(), 5, "guarded class untouched");
        assert_eq!(classes[1].methods.len(), 2, "method added by the class hook is kept");
    }
}
