//! Filter specification strings
//!
//! A spec is a `;`-separated list of elements. Each element is either a
//! limit (`maxdepth=N`, `maxarray=N`, `maxrefs=N`, `maxbytes=N`) or a class
//! pattern:
//!
//! | pattern        | matches                                          |
//! |----------------|--------------------------------------------------|
//! | `a.b.C`        | exactly `a.b.C`                                  |
//! | `a.b.*`        | classes directly in package `a.b`                |
//! | `a.b.**`       | classes in `a.b` and every subpackage            |
//! | `a.b.Pre*`     | any class name starting with `a.b.Pre`           |
//! | `!pattern`     | the same set, but rejecting                      |
//!
//! Limits are checked before any pattern. Rejecting patterns are consulted
//! before accepting ones; within each group the first match decides.

use crate::filter::{ElementType, FilterFault, FilterInfo, FilterStatus, UnmarshallingFilter};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A malformed filter specification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid filter element `{element}`: {reason}")]
pub struct FilterSpecError {
    /// The offending element, as written
    pub element: String,
    /// What is wrong with it
    pub reason: &'static str,
}

impl FilterSpecError {
    fn new(element: &str, reason: &'static str) -> Self {
        Self {
            element: element.to_string(),
            reason,
        }
    }
}

/// Numeric ceilings; `None` means unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterLimits {
    /// Deepest allowed graph depth
    pub max_depth: Option<u64>,
    /// Longest allowed array
    pub max_array: Option<u64>,
    /// Most object references allowed
    pub max_refs: Option<u64>,
    /// Most stream bytes allowed
    pub max_bytes: Option<u64>,
}

impl FilterLimits {
    /// Check the counters of `info`; `Some(Rejected)` when any is out of range
    pub fn check(&self, info: &FilterInfo<'_>) -> Option<FilterStatus> {
        if info.references < 0 || info.depth < 0 || info.stream_bytes < 0 {
            return Some(FilterStatus::Rejected);
        }
        let over = |value: i64, ceiling: Option<u64>| ceiling.is_some_and(|max| value as u64 > max);
        if over(info.depth, self.max_depth)
            || over(info.references, self.max_refs)
            || over(info.stream_bytes, self.max_bytes)
            || (info.array_length >= 0 && over(info.array_length, self.max_array))
        {
            return Some(FilterStatus::Rejected);
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    /// Whole class name
    Exact(String),
    /// `pkg.*`; stored with the trailing dot
    Package(String),
    /// `pkg.**`; stored with the trailing dot
    PackageTree(String),
    /// `prefix*`
    Prefix(String),
}

impl Pattern {
    fn matches(&self, name: &str) -> bool {
        match self {
            Pattern::Exact(exact) => name == exact,
            Pattern::Package(pkg) => name
                .strip_prefix(pkg.as_str())
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('.')),
            Pattern::PackageTree(pkg) => name.len() > pkg.len() && name.starts_with(pkg.as_str()),
            Pattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    pattern: Pattern,
    reject: bool,
}

/// Filter parsed from a specification string
///
/// Ceilings are checked first, then `!` rules, then allow rules. Rule order
/// only matters among rules of the same polarity, so a deny rule wins over
/// an allow rule wherever either is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleFilter {
    spec: String,
    limits: FilterLimits,
    rules: Vec<Rule>,
}

impl SimpleFilter {
    /// Parse a specification string
    pub fn parse(spec: &str) -> Result<Self, FilterSpecError> {
        let mut limits = FilterLimits::default();
        let mut rules = Vec::new();

        for raw in spec.split(';') {
            let element = raw.trim();
            if element.is_empty() {
                continue;
            }
            if let Some((key, value)) = element.split_once('=') {
                let parsed = parse_limit(element, value.trim())?;
                match key.trim() {
                    "maxdepth" => limits.max_depth = Some(parsed),
                    "maxarray" => limits.max_array = Some(parsed),
                    "maxrefs" => limits.max_refs = Some(parsed),
                    "maxbytes" => limits.max_bytes = Some(parsed),
                    _ => return Err(FilterSpecError::new(element, "unknown limit")),
                }
            } else {
                rules.push(parse_rule(element)?);
            }
        }

        Ok(Self {
            spec: spec.to_string(),
            limits,
            rules,
        })
    }

    /// The numeric ceilings
    pub fn limits(&self) -> &FilterLimits {
        &self.limits
    }

    /// Number of class-name rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Source string this filter was parsed from
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Infallible form of [`UnmarshallingFilter::check_input`]
    pub fn check(&self, info: &FilterInfo<'_>) -> FilterStatus {
        if let Some(status) = self.limits.check(info) {
            return status;
        }
        let Some(candidate) = info.candidate else {
            return FilterStatus::Undecided;
        };
        let name = match candidate.element {
            ElementType::Primitive(_) => return FilterStatus::Undecided,
            ElementType::Named(name) => name,
        };
        if self
            .rules
            .iter()
            .any(|rule| rule.reject && rule.pattern.matches(name))
        {
            return FilterStatus::Rejected;
        }
        if self
            .rules
            .iter()
            .any(|rule| !rule.reject && rule.pattern.matches(name))
        {
            return FilterStatus::Allowed;
        }
        FilterStatus::Undecided
    }
}

impl UnmarshallingFilter for SimpleFilter {
    fn check_input(&self, info: &FilterInfo<'_>) -> Result<FilterStatus, FilterFault> {
        Ok(self.check(info))
    }
}

impl FromStr for SimpleFilter {
    type Err = FilterSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SimpleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

fn parse_limit(element: &str, value: &str) -> Result<u64, FilterSpecError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FilterSpecError::new(
            element,
            "limit value must be a non-negative integer",
        ));
    }
    value
        .parse()
        .map_err(|_| FilterSpecError::new(element, "limit value out of range"))
}

fn parse_rule(element: &str) -> Result<Rule, FilterSpecError> {
    let (reject, body) = match element.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, element),
    };
    if body.is_empty() {
        return Err(FilterSpecError::new(element, "empty pattern"));
    }
    if body.contains('/') {
        return Err(FilterSpecError::new(element, "module-scoped patterns are not supported"));
    }

    let pattern = if let Some(pkg) = body.strip_suffix(".**") {
        check_segments(element, pkg, false)?;
        Pattern::PackageTree(format!("{pkg}."))
    } else if let Some(pkg) = body.strip_suffix(".*") {
        check_segments(element, pkg, false)?;
        Pattern::Package(format!("{pkg}."))
    } else if let Some(prefix) = body.strip_suffix('*') {
        check_segments(element, prefix, true)?;
        Pattern::Prefix(prefix.to_string())
    } else {
        check_segments(element, body, false)?;
        Pattern::Exact(body.to_string())
    };
    Ok(Rule { pattern, reject })
}

/// Reject stray wildcards and empty package segments
///
/// A prefix pattern may be empty (`*` alone) and its last segment may be
/// partial, but never empty.
fn check_segments(element: &str, name: &str, prefix: bool) -> Result<(), FilterSpecError> {
    if name.contains('*') {
        return Err(FilterSpecError::new(element, "wildcard is only allowed at the end"));
    }
    if prefix && name.is_empty() {
        return Ok(());
    }
    if name.split('.').any(str::is_empty) {
        return Err(FilterSpecError::new(element, "empty package segment"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(FilterSpecError::new(element, "whitespace inside pattern"));
    }
    Ok(())
}
