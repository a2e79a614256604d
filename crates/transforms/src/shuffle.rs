use crate::context::JobContext;
use crate::{Category, ObfuscationOptions, Transform};
use jarcloak_core::ClassModel;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

/// Shuffles class order and, per class, field, method and interface order.
///
/// Runs in both the pre and the post hook, so members added by other transformers are mixed in
/// as well. Method parameters are never reordered.
#[derive(Debug, Default)]
pub struct Shuffle;

impl Shuffle {
    pub fn new() -> Self {
        Self
    }

    fn shuffle_all(&self, classes: &mut [ClassModel], rng: &mut StdRng) {
        classes.shuffle(rng);
        for class in classes.iter_mut() {
            class.fields.shuffle(rng);
            class.methods.shuffle(rng);
            class.interfaces.shuffle(rng);
        }
        debug!("{}: shuffled {} classes", self.name(), classes.len());
    }
}

impl Transform for Shuffle {
    fn name(&self) -> &'static str {
        "Shuffle"
    }

    fn category(&self) -> Category {
        Category::Stable
    }

    fn is_enabled(&self, options: &ObfuscationOptions) -> bool {
        options.shuffle
    }

    fn pre(&self, classes: &mut Vec<ClassModel>, cx: &JobContext<'_>) {
        self.shuffle_all(classes, &mut cx.rng(self.name(), "pre"));
    }

    fn post(&self, classes: &mut Vec<ClassModel>, cx: &JobContext<'_>) {
        self.shuffle_all(classes, &mut cx.rng(self.name(), "post"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renamer::test_support::{concrete, Fixture};
    use jarcloak_core::{access, FieldModel, OBJECT};

    fn sample() -> Vec<ClassModel> {
        (0..8)
            .map(|i| {
                let mut class = ClassModel::new(&format!("a/C{i}"), Some(OBJECT));
                for j in 0..8 {
                    class.fields.push(FieldModel::new(access::PRIVATE, &format!("f{j}"), "I"));
                    class.methods.push(concrete(access::PUBLIC, &format!("m{j}"), "()V"));
                }
                class
            })
            .collect()
    }

    fn names(classes: &[ClassModel]) -> Vec<String> {
        classes.iter().map(|c| c.name.clone()).collect()
    }

    #[test]
    fn shuffling_is_a_seeded_permutation() {
        let fixture = Fixture::new(&[], "");
        let job = fixture.job();
        let mut first = sample();
        let mut second = sample();
        Shuffle::new().pre(&mut first, &job);
        Shuffle::new().pre(&mut second, &job);
        assert_eq!(first, second, "same seed, same order");

        let mut sorted = names(&first);
        sorted.sort();
        assert_eq!(sorted, names(&sample()), "no class lost or duplicated");
        assert_ne!(names(&first), names(&sample()), "8! orders make the identity unlikely");
        assert!(first.iter().all(|c| c.fields.len() == 8 && c.methods.len() == 8));
    }
}
