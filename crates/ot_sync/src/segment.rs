//! Ordered element segments carried by insert and delete components.
//!
//! The same sequence algebra runs over characters (collaborative strings) and
//! over JSON values (collaborative lists). [`Segment`] is the small set of
//! operations the algebra needs from either.

use std::fmt;

/// An ordered run of elements.
///
/// Lengths and offsets count elements: chars for `String`, items for `Vec<T>`.
pub trait Segment: Clone + PartialEq + fmt::Debug {
    /// The segment with no elements.
    fn empty() -> Self;

    /// Number of elements.
    fn len(&self) -> usize;

    /// Whether the segment has no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A new segment holding `self` followed by `other`.
    fn concat(&self, other: &Self) -> Self;

    /// Append `other` in place.
    fn append(&mut self, other: &Self) {
        *self = self.concat(other);
    }

    /// The `len` elements starting at `start`. Callers keep the range in bounds.
    fn subrange(&self, start: usize, len: usize) -> Self;

    /// Whether `prefix` is a prefix of `self`.
    fn starts_with(&self, prefix: &Self) -> bool;

    /// Split into the first `at` elements and the rest.
    fn split_at(&self, at: usize) -> (Self, Self) {
        (self.subrange(0, at), self.subrange(at, self.len() - at))
    }

    /// Consecutive runs of the given lengths from the front, cut in one
    /// pass. The lengths must not add up to more than `len()`.
    fn runs(&self, lens: &[usize]) -> Vec<Self> {
        let mut start = 0;
        lens.iter()
            .map(|&n| {
                let run = self.subrange(start, n);
                start += n;
                run
            })
            .collect()
    }
}

/// Byte offset of the `n`th char of `s`, or `s.len()` past the end.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

impl Segment for String {
    fn empty() -> Self {
        String::new()
    }

    fn len(&self) -> usize {
        self.chars().count()
    }

    fn concat(&self, other: &Self) -> Self {
        let mut out = String::with_capacity(self.len() + other.len());
        out.push_str(self);
        out.push_str(other);
        out
    }

    fn append(&mut self, other: &Self) {
        self.push_str(other);
    }

    fn subrange(&self, start: usize, len: usize) -> Self {
        let from = byte_offset(self, start);
        let to = from + byte_offset(&self[from..], len);
        self[from..to].to_string()
    }

    fn starts_with(&self, prefix: &Self) -> bool {
        str::starts_with(self, prefix.as_str())
    }

    fn runs(&self, lens: &[usize]) -> Vec<Self> {
        let mut rest = self.as_str();
        lens.iter()
            .map(|&n| {
                let (run, tail) = rest.split_at(byte_offset(rest, n));
                rest = tail;
                run.to_string()
            })
            .collect()
    }
}

impl<T: Clone + PartialEq + fmt::Debug> Segment for Vec<T> {
    fn empty() -> Self {
        Vec::new()
    }

    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn concat(&self, other: &Self) -> Self {
        let mut out = Vec::with_capacity(<[T]>::len(self) + <[T]>::len(other));
        out.extend_from_slice(self);
        out.extend_from_slice(other);
        out
    }

    fn append(&mut self, other: &Self) {
        self.extend_from_slice(other);
    }

    fn subrange(&self, start: usize, len: usize) -> Self {
        self[start..start + len].to_vec()
    }

    fn starts_with(&self, prefix: &Self) -> bool {
        <[T]>::starts_with(self, prefix)
    }
}
