//! Tag selectors and the lenient version ordering they compare with.
//!
//! A tag selector is one of:
//!
//! - an exact tag name, e.g. `latest`
//! - a version comparison `<op><version>` with `op` one of `==`, `<`, `<=`, `>`, `>=`,
//!   e.g. `>=1.1.0`
//! - a pattern, matched against the start of the tag (`rc` matches `rc1`)
//! - a custom predicate
//!
//! A [`TagMatcher`] holds a list of selectors and matches a tag if any of them does.

use std::{cmp::Ordering, fmt, sync::Arc};

use regex_automata::{meta::Regex, Anchored, Input};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Component {
    /// Decimal digits without leading zeros, so that ordering by (length, text) is numeric.
    Number(String),
    Text(String),
}

impl Component {
    fn cmp_numeric(a: &str, b: &str) -> Ordering {
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }

    /// Components of different kinds do not compare.
    fn try_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Component::Number(a), Component::Number(b)) => Some(Self::cmp_numeric(a, b)),
            (Component::Text(a), Component::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// A loosely parsed version number.
///
/// The string is split into runs of digits, runs of lowercase ASCII letters and
/// runs of anything else; dots only separate. `1.10.0-rc2` becomes
/// `[1, 10, 0, "-", "rc", 2]`.
///
/// Versions are totally ordered: numbers compare numerically, text compares by
/// character, text sorts after numbers and a missing component sorts first.
/// This gives a stable order for mixed tag schemes without claiming that the order
/// is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    components: Vec<Component>,
}

/// Two versions diverge at components of different kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Incomparable;

impl Version {
    pub fn parse(text: &str) -> Self {
        let mut components = vec![];
        let mut rest = text;
        while let Some(first) = rest.chars().next() {
            let end = if first.is_ascii_digit() {
                rest.find(|c: char| !c.is_ascii_digit())
            } else if first.is_ascii_lowercase() {
                rest.find(|c: char| !c.is_ascii_lowercase())
            } else if first == '.' {
                Some(1)
            } else {
                rest.find(|c: char| c.is_ascii_digit() || c.is_ascii_lowercase() || c == '.')
            }
            .unwrap_or(rest.len());

            let (part, tail) = rest.split_at(end);
            rest = tail;
            if part == "." {
                continue;
            }
            if first.is_ascii_digit() {
                let trimmed = part.trim_start_matches('0');
                let number = if trimmed.is_empty() { "0" } else { trimmed };
                components.push(Component::Number(number.to_string()));
            } else {
                components.push(Component::Text(part.to_string()));
            }
        }
        Self { components }
    }

    /// Strict comparison: fails where the first differing components are a number
    /// and a text, e.g. `1.0` against `latest`.
    pub fn try_cmp(&self, other: &Self) -> std::result::Result<Ordering, Incomparable> {
        for (a, b) in self.components.iter().zip(&other.components) {
            if a == b {
                continue;
            }
            return a.try_cmp(b).ok_or(Incomparable);
        }
        Ok(self.components.len().cmp(&other.components.len()))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let ordering = match (self.components.get(i), other.components.get(i)) {
                (Some(a), Some(b)) if a == b => continue,
                (Some(a), Some(b)) => a.try_cmp(b).unwrap_or(match a {
                    Component::Text(_) => Ordering::Greater,
                    Component::Number(_) => Ordering::Less,
                }),
                (None, _) => Ordering::Less,
                (_, None) => Ordering::Greater,
            };
            return ordering;
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut previous_number = false;
        for component in &self.components {
            match component {
                Component::Number(n) => {
                    if previous_number {
                        f.write_str(".")?;
                    }
                    f.write_str(n)?;
                    previous_number = true;
                }
                Component::Text(t) => {
                    f.write_str(t)?;
                    previous_number = false;
                }
            }
        }
        Ok(())
    }
}

/// Comparison operator of a version selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl VersionOp {
    // longest operators first, so that `<=` is not read as `<` followed by `=...`
    const PREFIXES: [(&'static str, VersionOp); 5] = [
        ("==", VersionOp::Eq),
        ("<=", VersionOp::Le),
        (">=", VersionOp::Ge),
        ("<", VersionOp::Lt),
        (">", VersionOp::Gt),
    ];

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            VersionOp::Eq => ordering == Ordering::Equal,
            VersionOp::Lt => ordering == Ordering::Less,
            VersionOp::Le => ordering != Ordering::Greater,
            VersionOp::Gt => ordering == Ordering::Greater,
            VersionOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Predicate type for [`Selector::Custom`].
pub type TagPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A single tag selector.
#[derive(Clone)]
pub enum Selector {
    Exact(String),
    Version(VersionOp, Version),
    Pattern(Regex),
    Custom(TagPredicate),
}

impl Selector {
    /// Reads a version comparison such as `>=1.0.0`; anything else selects by exact name.
    pub fn parse(value: &str) -> Self {
        for (prefix, op) in VersionOp::PREFIXES {
            if let Some(version) = value.strip_prefix(prefix) {
                if !version.is_empty() {
                    return Selector::Version(op, Version::parse(version));
                }
            }
        }
        Selector::Exact(value.to_string())
    }

    /// Compiles a pattern that has to match at the start of a tag.
    pub fn pattern(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source: Box::new(source),
        })?;
        Ok(Selector::Pattern(regex))
    }

    pub fn custom(predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Selector::Custom(Arc::new(predicate))
    }

    /// Whether `tag` is selected. Version selectors fail with [`Incomparable`] on tags
    /// that do not compare with their version.
    pub fn matches(&self, tag: &str) -> std::result::Result<bool, Incomparable> {
        match self {
            Selector::Exact(name) => Ok(name == tag),
            Selector::Version(op, version) => {
                if *op == VersionOp::Eq {
                    return Ok(Version::parse(tag) == *version);
                }
                let ordering = Version::parse(tag).try_cmp(version)?;
                Ok(op.accepts(ordering))
            }
            Selector::Pattern(regex) => {
                Ok(regex.is_match(Input::new(tag).anchored(Anchored::Yes)))
            }
            Selector::Custom(predicate) => Ok(predicate(tag)),
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Exact(name) => f.debug_tuple("Exact").field(name).finish(),
            Selector::Version(op, version) => f
                .debug_tuple("Version")
                .field(op)
                .field(&version.to_string())
                .finish(),
            Selector::Pattern(regex) => f.debug_tuple("Pattern").field(regex).finish(),
            Selector::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<&str> for Selector {
    fn from(value: &str) -> Self {
        Selector::parse(value)
    }
}

impl From<String> for Selector {
    fn from(value: String) -> Self {
        Selector::parse(&value)
    }
}

/// A disjunction of selectors.
#[derive(Debug, Clone, Default)]
pub struct TagMatcher {
    selectors: Vec<Selector>,
}

impl TagMatcher {
    pub fn new(selectors: impl IntoIterator<Item = Selector>) -> Self {
        Self {
            selectors: selectors.into_iter().collect(),
        }
    }

    /// Builds a matcher from selector strings and patterns, as given on the command line.
    pub fn from_args<S: AsRef<str>>(values: &[S], patterns: &[S]) -> Result<Self> {
        let mut selectors: Vec<Selector> = values.iter().map(|v| Selector::parse(v.as_ref())).collect();
        for pattern in patterns {
            selectors.push(Selector::pattern(pattern.as_ref())?);
        }
        Ok(Self { selectors })
    }

    pub fn push(&mut self, selector: Selector) {
        self.selectors.push(selector);
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    /// True if any selector matches `tag`. Selectors that cannot compare with the tag
    /// count as not matching.
    pub fn any_matches(&self, tag: &str) -> bool {
        self.selectors
            .iter()
            .any(|selector| selector.matches(tag).unwrap_or(false))
    }
}

impl FromIterator<Selector> for TagMatcher {
    fn from_iter<I: IntoIterator<Item = Selector>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> FromIterator<&'a str> for TagMatcher {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Selector::parse))
    }
}
