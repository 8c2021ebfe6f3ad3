//! Version ordering for picking the newest of several artifacts.
//!
//! Versions are compared segment by segment, splitting on `.`, `-`, `_` and
//! `+`. Numeric segments compare as numbers, everything else as text, and a
//! numeric segment sorts after a textual one so `1.0.0` is newer than
//! `1.0.0rc1`'s `0rc1` tail.

use std::cmp::Ordering;

/// Version resolver - pure functions over version strings.
pub struct VersionResolver;

impl VersionResolver {
    /// Check if two version strings match.
    ///
    /// Handles the 'v' prefix flexibly (e.g., "v1.0.0" matches "1.0.0").
    pub fn versions_match(v1: &str, v2: &str) -> bool {
        strip_prefix(v1) == strip_prefix(v2)
    }

    /// Compare two version strings.
    pub fn compare(a: &str, b: &str) -> Ordering {
        let mut left = segments(strip_prefix(a));
        let mut right = segments(strip_prefix(b));
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (Some(_), None) => return Ordering::Greater,
                (None, Some(_)) => return Ordering::Less,
                (Some(l), Some(r)) => {
                    let ord = compare_segment(l, r);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }

    /// Pick the newest item by the version `key` returns.
    pub fn newest<'a, T, F>(items: &'a [T], key: F) -> Option<&'a T>
    where
        F: Fn(&T) -> &str,
    {
        items
            .iter()
            .max_by(|a, b| Self::compare(key(a), key(b)))
    }

    /// Sort items newest first.
    pub fn sort_newest_first<T, F>(items: &mut [T], key: F)
    where
        F: Fn(&T) -> &str,
    {
        items.sort_by(|a, b| Self::compare(key(b), key(a)));
    }
}

fn strip_prefix(v: &str) -> &str {
    v.strip_prefix('v').unwrap_or(v)
}

fn segments(v: &str) -> impl Iterator<Item = &str> {
    v.split(['.', '-', '_', '+']).filter(|s| !s.is_empty())
}

fn compare_segment(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
