//! Rivet admission filters
//!
//! An unmarshaller consults an [`UnmarshallingFilter`] before it resolves a
//! class or allocates an array. Filters look at the candidate class and at
//! the resource counters of the running session and answer with a
//! [`FilterStatus`].
//!
//! - [`SimpleFilter`] is parsed from a `;`-separated spec string
//! - [`ChainedFilter`] composes filters, first decided verdict wins
//! - [`FnFilter`] adapts a closure

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod filter;
pub mod spec;

pub use filter::{
    Candidate, ChainedFilter, ElementType, FilterFault, FilterInfo, FilterStatus, FnFilter,
    UndecidedPolicy, UnmarshallingFilter,
};
pub use spec::{FilterLimits, FilterSpecError, SimpleFilter};
