//! Ordered two-element tuple

use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered pair with structural equality and hashing over both halves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pair<A, B> {
    /// First element
    pub a: A,
    /// Second element
    pub b: B,
}

impl<A, B> Pair<A, B> {
    /// Create a pair
    pub fn new(a: A, b: B) -> Self {
        Self { a, b }
    }

    /// First element
    pub fn first(&self) -> &A {
        &self.a
    }

    /// Second element
    pub fn second(&self) -> &B {
        &self.b
    }

    /// Borrow both elements
    pub fn by_ref(&self) -> Pair<&A, &B> {
        Pair::new(&self.a, &self.b)
    }

    /// Split into a tuple
    pub fn into_tuple(self) -> (A, B) {
        (self.a, self.b)
    }
}

impl<A, B> From<(A, B)> for Pair<A, B> {
    fn from((a, b): (A, B)) -> Self {
        Pair::new(a, b)
    }
}

impl<A: fmt::Display, B: fmt::Display> fmt::Display for Pair<A, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.a, self.b)
    }
}
