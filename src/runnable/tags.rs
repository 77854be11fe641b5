// src/runnable/tags.rs

//! Tag filtering.
//!
//! Each filter string is one comma separated group; a runnable is kept when
//! any group accepts it. Inside a group `-tag` excludes, `key:val` requires
//! `val` among the values of `key`, `key:-val` forbids it and a bare tag is
//! required.

use std::collections::{BTreeMap, BTreeSet};

use crate::runnable::Runnable;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TagGroup {
    must: BTreeSet<String>,
    must_not: BTreeSet<String>,
    key_vals: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    groups: Vec<TagGroup>,
    include_empty: bool,
    include_empty_key: bool,
}

impl TagFilter {
    pub fn parse<S: AsRef<str>>(filters: &[S], include_empty: bool, include_empty_key: bool) -> Self {
        let groups = filters
            .iter()
            .map(|raw| {
                let mut group = TagGroup::default();
                for tag in raw.as_ref().split(',').map(str::trim).filter(|t| !t.is_empty()) {
                    if let Some(excluded) = tag.strip_prefix('-') {
                        group.must_not.insert(excluded.to_string());
                    } else if let Some((k, v)) = tag.split_once(':') {
                        group.key_vals.insert(k.to_string(), v.to_string());
                    } else {
                        group.must.insert(tag.to_string());
                    }
                }
                group
            })
            .collect();

        Self {
            groups,
            include_empty,
            include_empty_key,
        }
    }

    /// No groups: filtering is disabled.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn matches(&self, runnable: &Runnable) -> bool {
        let tags = runnable.tags();
        if tags.is_empty() && self.include_empty {
            return true;
        }

        self.groups.iter().any(|group| {
            if group.must_not.iter().any(|t| tags.contains_key(t)) {
                return false;
            }
            if !self.key_vals_match(&group.key_vals, tags) {
                return false;
            }
            group.must.iter().all(|t| tags.contains_key(t))
        })
    }

    /// Keep matching runnables, in order. An empty filter keeps everything.
    pub fn filter(&self, runnables: Vec<Runnable>) -> Vec<Runnable> {
        if self.is_empty() {
            return runnables;
        }
        runnables.into_iter().filter(|r| self.matches(r)).collect()
    }

    fn key_vals_match(
        &self,
        wanted: &BTreeMap<String, String>,
        tags: &BTreeMap<String, Option<BTreeSet<String>>>,
    ) -> bool {
        for (key, value) in wanted {
            let Some(values) = tags.get(key) else {
                if self.include_empty_key {
                    continue;
                }
                return false;
            };
            let has = |v: &str| values.as_ref().is_some_and(|set| set.contains(v));
            match value.strip_prefix('-') {
                Some(forbidden) => {
                    if has(forbidden) {
                        return false;
                    }
                }
                None => {
                    if !has(value) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(tags: &[(&str, Option<&[&str]>)]) -> Runnable {
        tags.iter()
            .fold(Runnable::new("noop", "t"), |r, (k, v)| r.with_tag(*k, *v))
    }

    #[test]
    fn groups_are_ored() {
        let f = TagFilter::parse(&["fast", "slow"], false, false);
        assert!(f.matches(&tagged(&[("slow", None)])));
        assert!(!f.matches(&tagged(&[("net", None)])));
    }

    #[test]
    fn exclusions_win_inside_a_group() {
        let f = TagFilter::parse(&["fast,-net"], false, false);
        assert!(f.matches(&tagged(&[("fast", None)])));
        assert!(!f.matches(&tagged(&[("fast", None), ("net", None)])));
    }

    #[test]
    fn key_values() {
        let f = TagFilter::parse(&["arch:x86_64"], false, false);
        assert!(f.matches(&tagged(&[("arch", Some(&["x86_64", "arm"]))])));
        assert!(!f.matches(&tagged(&[("arch", Some(&["arm"]))])));
        assert!(!f.matches(&tagged(&[("fast", None)])));

        let lenient = TagFilter::parse(&["arch:x86_64"], false, true);
        assert!(lenient.matches(&tagged(&[("fast", None)])));

        let negated = TagFilter::parse(&["arch:-arm"], false, false);
        assert!(negated.matches(&tagged(&[("arch", Some(&["x86_64"]))])));
        assert!(!negated.matches(&tagged(&[("arch", Some(&["arm"]))])));
    }

    #[test]
    fn untagged_runnables_need_include_empty() {
        let untagged = Runnable::new("noop", "t");
        assert!(!TagFilter::parse(&["fast"], false, false).matches(&untagged));
        assert!(TagFilter::parse(&["fast"], true, false).matches(&untagged));
    }

    #[test]
    fn empty_filter_keeps_all() {
        let f = TagFilter::parse::<&str>(&[], false, false);
        let kept = f.filter(vec![Runnable::new("noop", "a"), Runnable::new("noop", "b")]);
        assert_eq!(kept.len(), 2);
    }
}
