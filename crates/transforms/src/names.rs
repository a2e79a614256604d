//! Generated identifier allocation.
//!
//! A [`NameGenerator`] hands out names in independent scopes: the renamers use one scope for
//! class names and one per descriptor for members, so two members only share a generated name
//! when their descriptors differ. Names that already exist in the input are reserved and never
//! handed out.
use crate::config::RenameOption;
use dashmap::{DashMap, DashSet};
use jarcloak_utils::errors::CapacityError;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashSet;

/// First code point used by the invisible strategy.
const INVISIBLE_BASE: u32 = 0x3050;
/// End of the invisible range, exclusive; stops short of the surrogate block.
const INVISIBLE_END: u32 = 0xD800;
/// Rejected confusable draws tolerated before a scope counts as exhausted.
pub const CONFUSABLE_ATTEMPTS: usize = 4096;
/// Shortest confusable length accepted by the configuration. `2^32` values keep rejection
/// sampling cheap for any class count an archive can hold.
pub const MIN_CONFUSABLE_LENGTH: usize = 32;

/// How a name is derived from its allocation index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStrategy {
    /// `AA`, `AB`, ... over `A-Z` and `a-z`, growing in length as needed.
    Alphabet,
    /// Single code points from `U+3050` upward, then pairs of them.
    Invisible,
    /// Random strings of `I` and `l` of a fixed length.
    Confusable { length: usize },
}

impl NameStrategy {
    /// The strategy for a rename option, `None` when renaming is off.
    pub const fn from_option(option: RenameOption, confusable_length: usize) -> Option<Self> {
        match option {
            RenameOption::Off => None,
            RenameOption::Alphabet => Some(Self::Alphabet),
            RenameOption::Invisible => Some(Self::Invisible),
            RenameOption::Confusable => Some(Self::Confusable {
                length: confusable_length,
            }),
        }
    }
}

fn alphabet() -> impl Iterator<Item = char> {
    ('A'..='Z').chain('a'..='z')
}

/// Bijective numbering over `digits`, starting at `min_len` characters.
fn nth_sequence(mut index: u64, digits: &[char], min_len: u32) -> String {
    let base = digits.len() as u64;
    let mut len = min_len;
    loop {
        let count = base.saturating_pow(len);
        if index < count {
            break;
        }
        index -= count;
        len += 1;
    }
    let mut out = vec![digits[0]; len as usize];
    for slot in out.iter_mut().rev() {
        *slot = digits[(index % base) as usize];
        index /= base;
    }
    out.into_iter().collect()
}

/// Allocates unique names per scope.
#[derive(Debug)]
pub struct NameGenerator {
    strategy: NameStrategy,
    reserved: HashSet<String>,
    counters: DashMap<String, u64>,
    issued: DashSet<String>,
    letters: Vec<char>,
    invisible: Vec<char>,
}

impl NameGenerator {
    /// A generator that never returns any of `reserved`.
    pub fn new(strategy: NameStrategy, reserved: HashSet<String>) -> Self {
        Self {
            strategy,
            reserved,
            counters: DashMap::new(),
            issued: DashSet::new(),
            letters: alphabet().collect(),
            invisible: (INVISIBLE_BASE..INVISIBLE_END)
                .filter_map(char::from_u32)
                .collect(),
        }
    }

    pub const fn strategy(&self) -> NameStrategy {
        self.strategy
    }

    /// Returns the next unused name of `scope`.
    ///
    /// Sequential strategies count per scope, so the allocation for one scope is atomic with
    /// respect to concurrent callers on the same scope. The confusable strategy rejects any
    /// value it has issued before in any scope and gives up after [`CONFUSABLE_ATTEMPTS`]
    /// rejections in a row.
    pub fn next(&self, scope: &str, rng: &mut StdRng) -> Result<String, CapacityError> {
        match self.strategy {
            NameStrategy::Confusable { length } => {
                for _ in 0..CONFUSABLE_ATTEMPTS {
                    let candidate: String = (0..length)
                        .map(|_| if rng.random::<bool>() { 'I' } else { 'l' })
                        .collect();
                    if !self.reserved.contains(&candidate) && self.issued.insert(candidate.clone())
                    {
                        return Ok(candidate);
                    }
                }
                Err(CapacityError::NamesExhausted {
                    scope: scope.to_string(),
                    attempts: CONFUSABLE_ATTEMPTS,
                })
            }
            NameStrategy::Alphabet | NameStrategy::Invisible => {
                let mut counter = self.counters.entry(scope.to_string()).or_insert(0);
                loop {
                    let index = *counter;
                    *counter += 1;
                    let candidate = match self.strategy {
                        NameStrategy::Alphabet => nth_sequence(index, &self.letters, 2),
                        _ => nth_sequence(index, &self.invisible, 1),
                    };
                    if !self.reserved.contains(&candidate) {
                        return Ok(candidate);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn alphabet_names_grow_in_length() {
        let letters: Vec<char> = alphabet().collect();
        assert_eq!(letters.len(), 52);
        assert_eq!(nth_sequence(0, &letters, 2), "AA");
        assert_eq!(nth_sequence(1, &letters, 2), "AB");
        assert_eq!(nth_sequence(52, &letters, 2), "BA");
        assert_eq!(nth_sequence(52 * 52, &letters, 2), "AAA");
    }

    #[test]
    fn scopes_are_independent_and_reserved_names_skipped() {
        let reserved = HashSet::from(["AA".to_string()]);
        let names = NameGenerator::new(NameStrategy::Alphabet, reserved);
        let mut rng = StdRng::seed_from_u64(42);
        assert_eq!(names.next("()V", &mut rng).unwrap(), "AB", "existing names are never reused");
        assert_eq!(names.next("()V", &mut rng).unwrap(), "AC");
        assert_eq!(names.next("(I)V", &mut rng).unwrap(), "AB");
    }

    #[test]
    fn invisible_names_start_at_base() {
        let names = NameGenerator::new(NameStrategy::Invisible, HashSet::new());
        let mut rng = StdRng::seed_from_u64(42);
        assert_eq!(names.next("", &mut rng).unwrap(), "\u{3050}");
        assert_eq!(names.next("", &mut rng).unwrap(), "\u{3051}");
    }

    #[test]
    fn confusable_names_are_unique() {
        let names = NameGenerator::new(NameStrategy::Confusable { length: 4 }, HashSet::new());
        let mut rng = StdRng::seed_from_u64(42);
        let issued: HashSet<String> = (0..16).map(|_| names.next("x", &mut rng).unwrap()).collect();
        assert_eq!(issued.len(), 16, "all 2^4 values are handed out exactly once");
        assert!(issued.iter().all(|n| n.chars().all(|c| c == 'I' || c == 'l')));
    }

    #[test]
    fn exhausted_confusable_space_is_an_error() {
        let reserved = HashSet::from(["I".to_string()]);
        let names = NameGenerator::new(NameStrategy::Confusable { length: 1 }, reserved);
        let mut rng = StdRng::seed_from_u64(42);
        assert_eq!(names.next("()V", &mut rng).unwrap(), "l");
        let err = names.next("()V", &mut rng).expect_err("both one-letter names are taken");
        assert!(
            matches!(err, CapacityError::NamesExhausted { attempts: CONFUSABLE_ATTEMPTS, .. }),
            "{err}"
        );
    }
}
