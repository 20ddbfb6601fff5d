//! A predicate over [`Version`], built from a string expression such as
//! `">=1.2.3,<2.0"` or `"1.2.*"`.
//!
//! Grounded on `conda/models/version.py`'s `VersionSpec`/`get_matcher`/
//! `OPERATOR_MAP`/`merge`/`union` for the leaf-classification and matching
//! semantics (the teacher's own `rattler_conda_types::VersionSpec` uses a
//! modern `Range`-based model instead of the tagged-tree model this type
//! needs, per the design note directing a sum over
//! `{Leaf(Relational|Regex|Glob|Literal|AlwaysTrue), And, Or}`).

mod build_number;
mod tree;

pub use build_number::{BuildNumberSpec, ParseBuildNumberSpecError};

use crate::version::Version;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tree::{treeify, untreeify, ParseTreeError, RawTree};

/// The relational operators a leaf may carry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `=`: the version string must start with this prefix.
    StartsWith,
    /// `!=startswith`: the version string must not start with this prefix.
    NotStartsWith,
    /// `~=`: compatible-release match.
    Compatible,
}

impl Operator {
    fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::StartsWith => "=",
            Operator::NotStartsWith => "!=startswith",
            Operator::Compatible => "~=",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ParseVersionSpecError {
    #[error("invalid version spec '{0}': {1}")]
    InvalidExpression(String, ParseTreeError),
    #[error("invalid version spec '{0}': regex leaf must both start with '^' and end with '$'")]
    UnbalancedRegexAnchors(String),
    #[error("invalid version spec '{0}': '~=' does not support a trailing '.*'")]
    CompatibleWithWildcard(String),
    #[error("invalid version spec '{0}': {1}")]
    InvalidVersion(String, #[source] crate::version::ParseVersionError),
    #[error("invalid version spec '{0}': bad regex: {1}")]
    InvalidRegex(String, #[source] regex::Error),
}

#[derive(Clone)]
enum Leaf {
    Relational(Operator, Version),
    Regex(String, Arc<Regex>),
    Glob(String, Arc<Regex>),
    /// Exact string equality, used only for `@`-containing version strings
    /// which cannot be parsed as a [`Version`].
    Literal(String),
    AlwaysTrue,
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leaf::Relational(op, v) => write!(f, "Relational({op:?}, {v})"),
            Leaf::Regex(s, _) => write!(f, "Regex({s})"),
            Leaf::Glob(s, _) => write!(f, "Glob({s})"),
            Leaf::Literal(s) => write!(f, "Literal({s})"),
            Leaf::AlwaysTrue => write!(f, "AlwaysTrue"),
        }
    }
}

impl PartialEq for Leaf {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Leaf::Relational(a, av), Leaf::Relational(b, bv)) => a == b && av == bv,
            (Leaf::Regex(a, _), Leaf::Regex(b, _)) => a == b,
            (Leaf::Glob(a, _), Leaf::Glob(b, _)) => a == b,
            (Leaf::Literal(a), Leaf::Literal(b)) => a == b,
            (Leaf::AlwaysTrue, Leaf::AlwaysTrue) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(Leaf),
    And(Vec<Node>),
    Or(Vec<Node>),
}

impl Node {
    fn matches(&self, version: &Version) -> bool {
        match self {
            Node::Leaf(leaf) => leaf_matches(leaf, version),
            Node::And(children) => children.iter().all(|c| c.matches(version)),
            Node::Or(children) => children.iter().any(|c| c.matches(version)),
        }
    }
}

fn leaf_matches(leaf: &Leaf, version: &Version) -> bool {
    match leaf {
        Leaf::AlwaysTrue => true,
        Leaf::Literal(s) => version.to_string() == *s,
        Leaf::Regex(_, re) | Leaf::Glob(_, re) => re.is_match(&version.to_string()),
        Leaf::Relational(op, rhs) => match op {
            Operator::Eq => version == rhs,
            Operator::Ne => version != rhs,
            Operator::Lt => version < rhs,
            Operator::Le => version <= rhs,
            Operator::Gt => version > rhs,
            Operator::Ge => version >= rhs,
            Operator::StartsWith => version.starts_with(rhs),
            Operator::NotStartsWith => !version.starts_with(rhs),
            Operator::Compatible => {
                let truncated = rhs.truncate_last_component();
                version >= rhs && version.starts_with(&truncated)
            }
        },
    }
}

/// Escapes everything except `*`, which becomes `.*`, anchoring the whole
/// pattern with `^...$`.
fn glob_to_regex(glob: &str) -> String {
    let mut pattern = String::from("^");
    for part in glob.split('*') {
        pattern.push_str(&regex::escape(part));
        pattern.push_str(".*");
    }
    // remove the trailing ".*" we always add, then anchor the end
    pattern.truncate(pattern.len() - 2);
    pattern.push('$');
    pattern
}

static RELATIONAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(==|!=|<=|>=|~=|<|>|=)(\S+)$").expect("valid regex"));

fn classify_leaf(source: &str) -> Result<Leaf, ParseVersionSpecError> {
    let trimmed = source.trim();

    if let Some(inner) = trimmed.strip_prefix('^') {
        return if inner.ends_with('$') {
            let re = Regex::new(trimmed)
                .map_err(|e| ParseVersionSpecError::InvalidRegex(source.to_string(), e))?;
            Ok(Leaf::Regex(trimmed.to_string(), Arc::new(re)))
        } else {
            Err(ParseVersionSpecError::UnbalancedRegexAnchors(
                source.to_string(),
            ))
        };
    }

    if trimmed.starts_with(['=', '<', '>', '!', '~']) {
        if let Some(caps) = RELATIONAL_RE.captures(trimmed) {
            let op_str = &caps[1];
            let mut value = caps[2].to_string();
            let mut op = match op_str {
                "==" => Operator::Eq,
                "!=" => Operator::Ne,
                "<" => Operator::Lt,
                "<=" => Operator::Le,
                ">" => Operator::Gt,
                ">=" => Operator::Ge,
                "=" => Operator::StartsWith,
                "~=" => Operator::Compatible,
                _ => unreachable!(),
            };
            if let Some(stripped) = value.strip_suffix(".*") {
                match op {
                    Operator::Compatible => {
                        return Err(ParseVersionSpecError::CompatibleWithWildcard(
                            source.to_string(),
                        ))
                    }
                    Operator::Ne => {
                        op = Operator::NotStartsWith;
                        value = stripped.to_string();
                    }
                    Operator::StartsWith | Operator::Ge => {
                        value = stripped.to_string();
                    }
                    _ => {
                        tracing::warn!(
                            spec = source,
                            "trailing '.*' on a relational version spec is deprecated"
                        );
                        value = stripped.to_string();
                    }
                }
            }
            let version = Version::from_str(&value)
                .map_err(|e| ParseVersionSpecError::InvalidVersion(source.to_string(), e))?;
            return Ok(Leaf::Relational(op, version));
        }
    }

    if trimmed == "*" {
        return Ok(Leaf::AlwaysTrue);
    }

    if let Some(star_idx) = trimmed.find('*') {
        let is_trailing_only = star_idx == trimmed.len() - 1;
        if is_trailing_only {
            let prefix = trimmed[..star_idx].strip_suffix('.').unwrap_or(&trimmed[..star_idx]);
            let version = Version::from_str(prefix)
                .map_err(|e| ParseVersionSpecError::InvalidVersion(source.to_string(), e))?;
            return Ok(Leaf::Relational(Operator::StartsWith, version));
        }
        let re = Regex::new(&glob_to_regex(trimmed))
            .map_err(|e| ParseVersionSpecError::InvalidRegex(source.to_string(), e))?;
        return Ok(Leaf::Glob(trimmed.to_string(), Arc::new(re)));
    }

    if trimmed.contains('@') {
        return Ok(Leaf::Literal(trimmed.to_string()));
    }

    let version = Version::from_str(trimmed)
        .map_err(|e| ParseVersionSpecError::InvalidVersion(source.to_string(), e))?;
    Ok(Leaf::Relational(Operator::Eq, version))
}

fn classify_tree(tree: &RawTree) -> Result<Node, ParseVersionSpecError> {
    match tree {
        RawTree::Leaf(s) => Ok(Node::Leaf(classify_leaf(s)?)),
        RawTree::Group(tree::LogicalOp::And, children) => Ok(Node::And(
            children.iter().map(classify_tree).collect::<Result<_, _>>()?,
        )),
        RawTree::Group(tree::LogicalOp::Or, children) => Ok(Node::Or(
            children.iter().map(classify_tree).collect::<Result<_, _>>()?,
        )),
    }
}

/// A predicate over [`Version`] built from a conjunction/disjunction
/// expression of relational, glob, regex, and literal leaves.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionSpec {
    source: String,
    node: Node,
}

impl VersionSpec {
    /// Returns true if `version` satisfies this spec.
    pub fn matches(&self, version: &Version) -> bool {
        self.node.matches(version)
    }

    /// True only for a bare `==v` (or bare literal version) spec with no
    /// surrounding conjunction/disjunction.
    pub fn is_exact(&self) -> bool {
        matches!(&self.node, Node::Leaf(Leaf::Relational(Operator::Eq, _)))
    }

    /// The canonical source string this spec was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Merges (conjoins) two specs by sorting and comma-joining their source
    /// strings and reparsing — matching the original's string-level `merge`.
    pub fn merge(&self, other: &VersionSpec) -> Result<VersionSpec, ParseVersionSpecError> {
        let mut parts = vec![self.source.clone(), other.source.clone()];
        parts.sort();
        parts.dedup();
        VersionSpec::from_str(&parts.join(","))
    }

    /// Unions (disjoins) two specs by sorting and pipe-joining their source
    /// strings and reparsing.
    pub fn union(&self, other: &VersionSpec) -> Result<VersionSpec, ParseVersionSpecError> {
        let mut parts = vec![self.source.clone(), other.source.clone()];
        parts.sort();
        parts.dedup();
        VersionSpec::from_str(&parts.join("|"))
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl FromStr for VersionSpec {
    type Err = ParseVersionSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let tree = treeify(trimmed)
            .map_err(|e| ParseVersionSpecError::InvalidExpression(trimmed.to_string(), e))?;
        let node = classify_tree(&tree)?;
        Ok(VersionSpec {
            source: trimmed.to_string(),
            node,
        })
    }
}

impl serde::Serialize for VersionSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.source)
    }
}

impl<'de> serde::Deserialize<'de> for VersionSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        VersionSpec::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A process-wide intern map from canonical source string to a shared
/// [`VersionSpec`], per the "class-level cache" design note.
static INTERN: Lazy<Mutex<HashMap<String, Arc<VersionSpec>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Parses (or returns a cached, shared) [`VersionSpec`] for `source`.
pub fn intern(source: &str) -> Result<Arc<VersionSpec>, ParseVersionSpecError> {
    let mut map = INTERN.lock().expect("version spec intern lock poisoned");
    if let Some(existing) = map.get(source) {
        return Ok(Arc::clone(existing));
    }
    let spec = Arc::new(VersionSpec::from_str(source)?);
    map.insert(source.to_string(), Arc::clone(&spec));
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(">=1.2.3,<2.0", "1.9.0", true)]
    #[case(">=1.2.3,<2.0", "2.0.0", false)]
    #[case(">=1.2.3,<2.0", "1.2.2", false)]
    fn scenario_range(#[case] spec: &str, #[case] version: &str, #[case] expected: bool) {
        let spec = VersionSpec::from_str(spec).unwrap();
        let version = Version::from_str(version).unwrap();
        assert_eq!(spec.matches(&version), expected);
    }

    #[rstest]
    #[case("1.2.*", "1.2.7", true)]
    #[case("1.2.*", "1.3.0", false)]
    fn scenario_wildcard(#[case] spec: &str, #[case] version: &str, #[case] expected: bool) {
        let spec = VersionSpec::from_str(spec).unwrap();
        let version = Version::from_str(version).unwrap();
        assert_eq!(spec.matches(&version), expected);
        assert_eq!(spec.to_string(), "1.2.*");
    }

    #[test]
    fn always_true() {
        let spec = VersionSpec::from_str("*").unwrap();
        assert!(spec.matches(&Version::from_str("9.9.9").unwrap()));
    }

    #[test]
    fn compatible_release() {
        let spec = VersionSpec::from_str("~=2.2").unwrap();
        assert!(spec.matches(&Version::from_str("2.3.0").unwrap()));
        assert!(!spec.matches(&Version::from_str("3.0.0").unwrap()));
        assert!(!spec.matches(&Version::from_str("2.1.0").unwrap()));
    }

    #[test]
    fn glob_leaf() {
        let spec = VersionSpec::from_str("1.*.3").unwrap();
        assert!(spec.matches(&Version::from_str("1.2.3").unwrap()));
        assert!(!spec.matches(&Version::from_str("1.2.4").unwrap()));
    }

    #[test]
    fn is_exact_only_for_bare_eq() {
        assert!(VersionSpec::from_str("1.2.3").unwrap().is_exact());
        assert!(VersionSpec::from_str("==1.2.3").unwrap().is_exact());
        assert!(!VersionSpec::from_str(">=1.2.3").unwrap().is_exact());
        assert!(!VersionSpec::from_str("1.2.3,<2.0").unwrap().is_exact());
    }

    #[test]
    fn merge_and_union_sort_and_join() {
        let a = VersionSpec::from_str(">=2.0").unwrap();
        let b = VersionSpec::from_str("<3.0").unwrap();
        assert_eq!(a.merge(&b).unwrap().source(), "<3.0,>=2.0");
        assert_eq!(a.union(&b).unwrap().source(), "<3.0|>=2.0");
    }

    #[test]
    fn intern_returns_shared_instance() {
        let a = intern("1.2.3").unwrap();
        let b = intern("1.2.3").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
