//! Filter inputs, decisions and composition

use std::fmt;
use std::sync::Arc;

/// Outcome of a filter check
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FilterStatus {
    /// The input is explicitly allowed
    Allowed,
    /// The input is explicitly rejected
    Rejected,
    /// The filter has no opinion
    Undecided,
}

impl FilterStatus {
    /// Whether this status settles the question
    pub fn is_decided(self) -> bool {
        !matches!(self, FilterStatus::Undecided)
    }
}

impl fmt::Display for FilterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterStatus::Allowed => "allowed",
            FilterStatus::Rejected => "rejected",
            FilterStatus::Undecided => "undecided",
        };
        f.write_str(s)
    }
}

/// What to do with an `Undecided` verdict
///
/// No `Default`: a caller installing a filter picks one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UndecidedPolicy {
    /// Treat undecided input as allowed
    Accept,
    /// Treat undecided input as rejected
    Reject,
}

impl UndecidedPolicy {
    /// Collapse a status into allow (`true`) or reject (`false`)
    pub fn admits(self, status: FilterStatus) -> bool {
        match status {
            FilterStatus::Allowed => true,
            FilterStatus::Rejected => false,
            FilterStatus::Undecided => self == UndecidedPolicy::Accept,
        }
    }
}

/// Innermost type of a candidate class
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ElementType<'a> {
    /// A primitive type; never matched by name
    Primitive(&'a str),
    /// A named class such as `com.acme.Widget`
    Named(&'a str),
}

/// A class under consideration, with array dimensions unwrapped
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Candidate<'a> {
    /// Element type after stripping every array dimension
    pub element: ElementType<'a>,
    /// Number of array dimensions (0 for non-arrays)
    pub dimensions: u8,
}

impl<'a> Candidate<'a> {
    /// A plain named class
    pub fn named(name: &'a str) -> Self {
        Self {
            element: ElementType::Named(name),
            dimensions: 0,
        }
    }

    /// A primitive type
    pub fn primitive(name: &'a str) -> Self {
        Self {
            element: ElementType::Primitive(name),
            dimensions: 0,
        }
    }

    /// Same element type with `dimensions` array dimensions
    pub fn with_dimensions(self, dimensions: u8) -> Self {
        Self { dimensions, ..self }
    }

    /// Whether this is an array type
    pub fn is_array(&self) -> bool {
        self.dimensions > 0
    }

    /// Element class name, if the element is not primitive
    pub fn element_name(&self) -> Option<&'a str> {
        match self.element {
            ElementType::Named(name) => Some(name),
            ElementType::Primitive(_) => None,
        }
    }
}

impl fmt::Display for Candidate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.element {
            ElementType::Named(name) | ElementType::Primitive(name) => f.write_str(name)?,
        }
        for _ in 0..self.dimensions {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

/// Everything a filter may base its decision on
#[derive(Debug, Copy, Clone)]
pub struct FilterInfo<'a> {
    /// Class about to be resolved or instantiated, if any
    pub candidate: Option<Candidate<'a>>,
    /// Declared array length, or -1 when not allocating an array
    pub array_length: i64,
    /// Current graph depth
    pub depth: i64,
    /// Number of object references read so far
    pub references: i64,
    /// Bytes consumed from the stream so far
    pub stream_bytes: i64,
}

impl<'a> FilterInfo<'a> {
    /// Bundle a check
    pub fn new(
        candidate: Option<Candidate<'a>>,
        array_length: i64,
        depth: i64,
        references: i64,
        stream_bytes: i64,
    ) -> Self {
        Self {
            candidate,
            array_length,
            depth,
            references,
            stream_bytes,
        }
    }
}

/// Error raised while evaluating a filter; callers treat it as a rejection
pub type FilterFault = Box<dyn std::error::Error + Send + Sync>;

/// A gate consulted before classes are resolved and arrays are allocated
pub trait UnmarshallingFilter: Send + Sync {
    /// Decide on one input
    fn check_input(&self, info: &FilterInfo<'_>) -> Result<FilterStatus, FilterFault>;
}

impl<T: UnmarshallingFilter + ?Sized> UnmarshallingFilter for Arc<T> {
    fn check_input(&self, info: &FilterInfo<'_>) -> Result<FilterStatus, FilterFault> {
        (**self).check_input(info)
    }
}

/// Adapter turning a closure into a filter
pub struct FnFilter<F>(F);

impl<F> FnFilter<F>
where
    F: Fn(&FilterInfo<'_>) -> Result<FilterStatus, FilterFault> + Send + Sync,
{
    /// Wrap `f`
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> UnmarshallingFilter for FnFilter<F>
where
    F: Fn(&FilterInfo<'_>) -> Result<FilterStatus, FilterFault> + Send + Sync,
{
    fn check_input(&self, info: &FilterInfo<'_>) -> Result<FilterStatus, FilterFault> {
        (self.0)(info)
    }
}

/// Filters evaluated left to right; the first decided verdict wins
#[derive(Clone, Default)]
pub struct ChainedFilter {
    filters: Vec<Arc<dyn UnmarshallingFilter>>,
}

impl ChainedFilter {
    /// Empty chain (always undecided)
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain over `filters`
    pub fn from_filters(filters: Vec<Arc<dyn UnmarshallingFilter>>) -> Self {
        Self { filters }
    }

    /// Append a filter to the end of the chain
    pub fn push(&mut self, filter: Arc<dyn UnmarshallingFilter>) {
        self.filters.push(filter);
    }

    /// Number of chained filters
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl UnmarshallingFilter for ChainedFilter {
    fn check_input(&self, info: &FilterInfo<'_>) -> Result<FilterStatus, FilterFault> {
        for filter in &self.filters {
            let status = filter.check_input(info)?;
            if status.is_decided() {
                return Ok(status);
            }
        }
        Ok(FilterStatus::Undecided)
    }
}

impl fmt::Debug for ChainedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedFilter")
            .field("filters", &self.filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(status: FilterStatus) -> Arc<dyn UnmarshallingFilter> {
        Arc::new(FnFilter::new(move |_| Ok(status)))
    }

    #[test]
    fn test_chain_short_circuits_on_first_decision() {
        let chain = ChainedFilter::from_filters(vec![
            fixed(FilterStatus::Undecided),
            fixed(FilterStatus::Rejected),
            fixed(FilterStatus::Allowed),
        ]);
        let info = FilterInfo::new(None, -1, 1, 0, 0);
        assert_eq!(chain.check_input(&info).unwrap(), FilterStatus::Rejected);
    }

    #[test]
    fn test_all_undecided_stays_undecided() {
        let chain = ChainedFilter::from_filters(vec![fixed(FilterStatus::Undecided)]);
        let info = FilterInfo::new(None, -1, 1, 0, 0);
        assert_eq!(chain.check_input(&info).unwrap(), FilterStatus::Undecided);
        assert_eq!(ChainedFilter::new().check_input(&info).unwrap(), FilterStatus::Undecided);
    }

    #[test]
    fn test_chain_propagates_fault() {
        let faulty: Arc<dyn UnmarshallingFilter> =
            Arc::new(FnFilter::new(|_| Err("broken filter".into())));
        let chain = ChainedFilter::from_filters(vec![faulty, fixed(FilterStatus::Allowed)]);
        let info = FilterInfo::new(None, -1, 1, 0, 0);
        assert!(chain.check_input(&info).is_err());
    }

    #[test]
    fn test_policy_collapses_undecided() {
        assert!(UndecidedPolicy::Accept.admits(FilterStatus::Undecided));
        assert!(!UndecidedPolicy::Reject.admits(FilterStatus::Undecided));
        assert!(UndecidedPolicy::Reject.admits(FilterStatus::Allowed));
        assert!(!UndecidedPolicy::Accept.admits(FilterStatus::Rejected));
    }

    #[test]
    fn test_candidate_display() {
        let c = Candidate::named("com.acme.Widget").with_dimensions(2);
        assert_eq!(c.to_string(), "com.acme.Widget[][]");
        assert!(c.is_array());
        assert_eq!(Candidate::primitive("int").element_name(), None);
    }
}
