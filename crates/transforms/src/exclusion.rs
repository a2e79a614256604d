//! Exclusion rules.
//!
//! One rule per line, `[Transformer:]pattern`. The scope `Rename` stands for all three
//! renamers (`ClassRenamer`, `FieldRenamer` and `MethodRenamer`), so one rule keeps a name
//! stable without exempting it from other transformers. Names are compared in dotted form, so
//! `com/acme/Foo.bar(Ljava/lang/String;)V` is checked as `com.acme.Foo.bar(Ljava.lang.String;)V`.
//!
//! Pattern forms:
//! * `com.acme.Foo` matches exactly that name
//! * `com.acme.**` or `com.acme**` matches every name starting with the prefix
//! * `com.acme.*` matches names starting with the prefix that have no further package segment
//! * `*Test` or `**Test` matches every name ending with the suffix
//!
//! Anything else is matched literally. Rules never fail to parse.
use tracing::debug;

/// Scope alias matching every renamer.
pub const RENAME_SCOPE: &str = "Rename";
const RENAMERS: [&str; 3] = ["ClassRenamer", "FieldRenamer", "MethodRenamer"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    Prefix(String),
    /// Prefix match where the candidate has as many dots as the pattern.
    SameDepth { prefix: String, depth: usize },
    Suffix(String),
}

impl Pattern {
    fn parse(text: &str) -> Self {
        if let Some(prefix) = text.strip_suffix("**") {
            return Self::Prefix(prefix.to_string());
        }
        if let Some(prefix) = text.strip_suffix('*') {
            if !prefix.contains('*') {
                return Self::SameDepth {
                    prefix: prefix.to_string(),
                    depth: dots(prefix),
                };
            }
        }
        if let Some(suffix) = text.strip_prefix("**").or_else(|| text.strip_prefix('*')) {
            if !suffix.contains('*') {
                return Self::Suffix(suffix.to_string());
            }
        }
        Self::Exact(text.to_string())
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => name == exact,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Self::SameDepth { prefix, depth } => {
                name.starts_with(prefix.as_str()) && dots(name) == *depth
            }
            Self::Suffix(suffix) => name.ends_with(suffix.as_str()),
        }
    }
}

/// Number of package separators before any member descriptor.
fn dots(name: &str) -> usize {
    let head = name.split('(').next().unwrap_or(name);
    head.matches('.').count()
}

/// A single parsed exclusion rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionRule {
    /// Transformer the rule is restricted to, `None` for all of them.
    pub scope: Option<String>,
    pattern: Pattern,
}

impl ExclusionRule {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        // `Name:pattern`, where the name is a plain identifier
        let (scope, text) = match line.split_once(':') {
            Some((scope, rest))
                if !scope.is_empty() && scope.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                (Some(scope.to_string()), rest)
            }
            _ => (None, line),
        };
        let pattern = Pattern::parse(&text.replace('/', "."));
        if let Pattern::Exact(text) = &pattern {
            if text.contains('*') {
                debug!("exclusion rule `{line}` uses an unsupported wildcard, matching literally");
            }
        }
        Self { scope, pattern }
    }

    /// Whether the rule excludes `name` from `transformer`.
    pub fn matches(&self, transformer: Option<&str>, name: &str) -> bool {
        let in_scope = match (&self.scope, transformer) {
            (None, _) => true,
            (Some(scope), Some(transformer)) => {
                scope == transformer || (scope == RENAME_SCOPE && RENAMERS.contains(&transformer))
            }
            (Some(_), None) => false,
        };
        in_scope && self.pattern.matches(name)
    }
}

/// All exclusion rules of a job.
#[derive(Debug, Clone, Default)]
pub struct ExclusionMatcher {
    rules: Vec<ExclusionRule>,
}

impl ExclusionMatcher {
    /// Parses rule text, one rule per line. Blank lines and `#` comments are ignored.
    pub fn new(text: &str) -> Self {
        let rules = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ExclusionRule::parse)
            .collect();
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `name` (internal or dotted form) is excluded from `transformer`. With
    /// `transformer` set to `None` only unscoped rules apply.
    pub fn is_excluded(&self, transformer: Option<&str>, name: &str) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let dotted = name.replace('/', ".");
        self.rules
            .iter()
            .any(|rule| rule.matches(transformer, &dotted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_rules_match_internal_names() {
        let matcher = ExclusionMatcher::new("com.example.Keep\n\n# comment\n");
        assert_eq!(matcher.len(), 1);
        assert!(matcher.is_excluded(Some("ClassRenamer"), "com/example/Keep"));
        assert!(!matcher.is_excluded(Some("ClassRenamer"), "com/example/Keeper"));
    }

    #[test]
    fn scoped_rules_apply_to_their_transformer_only() {
        let matcher = ExclusionMatcher::new("Renamer:com.example.Keep");
        assert!(matcher.is_excluded(Some("Renamer"), "com.example.Keep"));
        assert!(!matcher.is_excluded(Some("Constant"), "com.example.Keep"));
        assert!(!matcher.is_excluded(None, "com.example.Keep"));
    }

    #[test]
    fn rename_scope_covers_every_renamer() {
        let matcher = ExclusionMatcher::new("Rename:com.acme.Api");
        for renamer in RENAMERS {
            assert!(matcher.is_excluded(Some(renamer), "com/acme/Api"), "{renamer}");
        }
        assert!(!matcher.is_excluded(Some("ConstantTransformer"), "com/acme/Api"));
        assert!(!matcher.is_excluded(None, "com/acme/Api"));
        assert!(!matcher.is_excluded(Some("ClassRenamer"), "com/acme/Impl"));
    }

    #[test]
    fn prefix_and_depth_wildcards() {
        let matcher = ExclusionMatcher::new("com.acme.**\norg.lib.*");
        assert!(matcher.is_excluded(None, "com/acme/deep/Nested"));
        assert!(matcher.is_excluded(None, "com/acme/Foo.bar(I)V"));
        assert!(matcher.is_excluded(None, "org/lib/Util"));
        assert!(
            !matcher.is_excluded(None, "org/lib/sub/Util"),
            "a single star does not cross package segments"
        );
        assert!(matcher.is_excluded(None, "org/lib/Util(Ljava/lang/String;)V"));
    }

    #[test]
    fn suffix_wildcards() {
        let matcher = ExclusionMatcher::new("*Test\n**Mixin");
        assert!(matcher.is_excluded(None, "a/b/FooTest"));
        assert!(matcher.is_excluded(None, "MyMixin"));
        assert!(!matcher.is_excluded(None, "a/b/Testing"));
    }

    #[test]
    fn odd_patterns_are_literal() {
        let matcher = ExclusionMatcher::new("a*b*c\nregex:.*");
        assert!(matcher.is_excluded(None, "a*b*c"));
        assert!(!matcher.is_excluded(None, "anything"));
        assert!(!matcher.is_excluded(Some("regex"), "anything"));
    }
}
