//! Query expressions used by [`crate::table::EntryTable::scan`].
//!
//! The spec explicitly rules out a general query language (see the
//! non-goals in `SPEC_FULL.md` §1); this is a small structured predicate
//! tree over entry fields instead of a string DSL, in the same spirit as
//! the reference codebase's tagged `InvalidationEvent`/`InvalidationReason`
//! enums in `invalidation.rs`.

use crate::entry::{now_millis, Entry};
use std::sync::Arc;

/// A structured predicate over `(key, modified, ttl, value)`.
///
/// `ValueWhere` and `KeyWhere` hold arbitrary closures rather than a
/// field-comparison DSL, so predicates can inspect `V`/`K` without the
/// engine needing to know anything about their shape.
pub enum Predicate<K, V> {
    /// Matches every entry.
    True,
    /// Matches no entry.
    False,
    /// Both sub-predicates must match.
    And(Box<Predicate<K, V>>, Box<Predicate<K, V>>),
    /// Either sub-predicate must match.
    Or(Box<Predicate<K, V>>, Box<Predicate<K, V>>),
    /// The sub-predicate must not match.
    Not(Box<Predicate<K, V>>),
    /// `modified < millis`.
    ModifiedLt(u64),
    /// `modified > millis`.
    ModifiedGt(u64),
    /// The entry carries no TTL.
    TtlIsNone,
    /// The entry carries a TTL.
    TtlIsSome,
    /// Arbitrary predicate over the key.
    KeyWhere(Arc<dyn Fn(&K) -> bool + Send + Sync>),
    /// Arbitrary predicate over the value.
    ValueWhere(Arc<dyn Fn(&V) -> bool + Send + Sync>),
    /// Entries that are not expired as of `now`; see [`unexpired`].
    Unexpired(u64),
}

impl<K, V> Predicate<K, V> {
    /// Evaluate this predicate against a key/entry pair.
    pub fn matches(&self, key: &K, entry: &Entry<V>) -> bool {
        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::And(a, b) => a.matches(key, entry) && b.matches(key, entry),
            Predicate::Or(a, b) => a.matches(key, entry) || b.matches(key, entry),
            Predicate::Not(p) => !p.matches(key, entry),
            Predicate::ModifiedLt(m) => entry.modified < *m,
            Predicate::ModifiedGt(m) => entry.modified > *m,
            Predicate::TtlIsNone => entry.ttl.is_none(),
            Predicate::TtlIsSome => entry.ttl.is_some(),
            Predicate::KeyWhere(f) => f(key),
            Predicate::ValueWhere(f) => f(&entry.value),
            Predicate::Unexpired(now) => !entry.is_expired_at(*now),
        }
    }

    /// Combine with another predicate via logical AND.
    pub fn and(self, other: Predicate<K, V>) -> Predicate<K, V> {
        Predicate::And(Box::new(self), Box::new(other))
    }
}

/// Produce a clause restricting results to unexpired entries, per the
/// `ttl = none ∨ modified + ttl > now` helper named in the spec.
pub fn unexpired<K, V>() -> Predicate<K, V> {
    Predicate::Unexpired(now_millis())
}

/// Wrap an existing predicate so it additionally requires the entry to
/// be unexpired.
pub fn and_unexpired<K, V>(predicate: Predicate<K, V>) -> Predicate<K, V> {
    predicate.and(unexpired())
}

/// What a [`crate::table::EntryTable::scan`] should project out of each
/// matching `(key, entry)` pair.
#[derive(Clone, Copy, Debug)]
pub enum Projection {
    /// Project the whole entry (returned alongside its key).
    Entry,
    /// Project the key only.
    Key,
    /// Project the value only.
    Value,
}

/// The result of projecting a matched `(key, entry)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projected<K, V> {
    /// A full `(key, entry)` pair.
    Entry(K, Entry<V>),
    /// A key alone.
    Key(K),
    /// A value alone.
    Value(V),
}

impl Projection {
    /// Apply this projection to a matched pair.
    pub fn project<K: Clone, V: Clone>(&self, key: &K, entry: &Entry<V>) -> Projected<K, V> {
        match self {
            Projection::Entry => Projected::Entry(key.clone(), entry.clone()),
            Projection::Key => Projected::Key(key.clone()),
            Projection::Value => Projected::Value(entry.value.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(modified: u64, ttl: Option<u64>) -> Entry<i32> {
        Entry {
            modified,
            ttl,
            value: 7,
        }
    }

    #[test]
    fn true_matches_everything() {
        let p: Predicate<&str, i32> = Predicate::True;
        assert!(p.matches(&"k", &entry(1, None)));
    }

    #[test]
    fn and_or_not_compose() {
        let p: Predicate<&str, i32> = Predicate::ModifiedGt(10).and(Predicate::TtlIsNone);
        assert!(p.matches(&"k", &entry(20, None)));
        assert!(!p.matches(&"k", &entry(5, None)));
        assert!(!p.matches(&"k", &entry(20, Some(5))));
    }

    #[test]
    fn unexpired_excludes_expired_entries() {
        let now = now_millis();
        let p: Predicate<&str, i32> = Predicate::Unexpired(now);
        assert!(p.matches(&"k", &entry(now - 10, None)));
        assert!(!p.matches(&"k", &entry(now - 1_000, Some(10))));
    }

    #[test]
    fn projection_extracts_requested_field() {
        let e = entry(1, None);
        assert_eq!(Projection::Key.project(&"k", &e), Projected::Key("k"));
        assert_eq!(Projection::Value.project(&"k", &e), Projected::Value(7));
    }
}
