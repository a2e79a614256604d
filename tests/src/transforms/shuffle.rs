use crate::fixtures::*;
use jarcloak_core::{access, ClassModel, OBJECT};
use std::collections::BTreeSet;

fn members(class: &ClassModel) -> (Vec<String>, Vec<String>, Vec<String>) {
    (
        class.fields.iter().map(|f| f.name.clone()).collect(),
        class.methods.iter().map(|m| m.name.clone()).collect(),
        class.interfaces.clone(),
    )
}

fn sample() -> Vec<ClassModel> {
    (0..10)
        .map(|i| {
            let mut c = class(&format!("s/C{i}"), OBJECT);
            c.interfaces = vec!["java/io/Serializable".into(), "java/lang/Cloneable".into()];
            for f in 0..6 {
                c.fields.push(field(access::PRIVATE, &format!("f{f}"), "I"));
            }
            for m in 0..6 {
                c.methods.push(empty(&format!("m{m}")));
            }
            c
        })
        .collect()
}

#[test]
fn shuffle_reorders_without_losing_members() {
    let input = sample();
    let mut config = config();
    config.options.shuffle = true;
    let output = output_classes(&run(&input, config));

    let sorted = |v: &[String]| v.iter().cloned().collect::<BTreeSet<_>>();
    let mut moved = false;
    for before in &input {
        let after = find(&output, &before.name);
        let (bf, bm, bi) = members(before);
        let (af, am, ai) = members(after);
        assert_eq!(sorted(&bf), sorted(&af), "{} fields", before.name);
        assert_eq!(sorted(&bm), sorted(&am), "{} methods", before.name);
        assert_eq!(sorted(&bi), sorted(&ai), "{} interfaces", before.name);
        moved |= bf != af || bm != am;
    }
    assert!(moved, "ten classes of six fields and seven methods kept their order");
    assert_ne!(names(&output), names(&input), "class order is shuffled too");
}

#[test]
fn shuffle_is_reproducible() {
    let input = sample();
    let mut config = config();
    config.options.shuffle = true;
    let first = run(&input, config.clone());
    let second = run(&input, config);
    assert_eq!(
        names(&output_classes(&first)),
        names(&output_classes(&second))
    );
    for ((a, x), (b, y)) in first.archive.iter().zip(second.archive.iter()) {
        assert_eq!((a, x), (b, y));
    }
}
