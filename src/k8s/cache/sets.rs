//! Small string-set helpers shared by the namespace set and the registry.

use std::collections::BTreeSet;

/// Collect names into a duplicate-free, ordered set
pub fn to_set<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

/// Members of `left` that are not in `right`, in order
#[must_use]
pub fn difference(left: &BTreeSet<String>, right: &BTreeSet<String>) -> Vec<String> {
    left.difference(right).cloned().collect()
}

/// Sorted snapshot of a set
#[must_use]
pub fn sorted(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_set_dedupes_and_sorts() {
        let set = to_set(["b", "a", "b"]);
        assert_eq!(sorted(&set), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_difference() {
        let old = to_set(["a", "b", "c"]);
        let new = to_set(["b", "d"]);
        assert_eq!(difference(&old, &new), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(difference(&new, &old), vec!["d".to_string()]);
        assert!(difference(&old, &old).is_empty());
    }
}
