use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::TargetList;

/// How repeated targets are removed from a [`TargetList`].
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    /// Drop a whole group once any of its targets was seen in an earlier
    /// group, or earlier in the same group.
    #[default]
    Group,

    /// Keep the first occurrence of every target, later occurrences are
    /// removed from their groups and groups left empty are dropped.
    Address,
}

impl FromStr for DedupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(DedupStrategy::Group),
            "address" => Ok(DedupStrategy::Address),
            _ => Err(format!("unknown dedup strategy {s:?}, expect group or address")),
        }
    }
}

impl fmt::Display for DedupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupStrategy::Group => f.write_str("group"),
            DedupStrategy::Address => f.write_str("address"),
        }
    }
}

/// Remove repeated targets, the order of what is kept does not change.
pub fn deduplicate(list: TargetList, strategy: DedupStrategy) -> TargetList {
    let mut seen = HashSet::new();

    match strategy {
        DedupStrategy::Group => list
            .into_iter()
            .filter(|group| {
                let mut repeated = false;
                for target in &group.targets {
                    // every target is recorded, even after a repeat is found
                    if !seen.insert(target.clone()) {
                        repeated = true;
                    }
                }

                !repeated
            })
            .collect(),
        DedupStrategy::Address => list
            .into_iter()
            .filter_map(|mut group| {
                if group.targets.is_empty() {
                    return Some(group);
                }

                group.targets.retain(|target| seen.insert(target.clone()));
                (!group.targets.is_empty()).then_some(group)
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::targets::TargetGroup;

    fn list(groups: &[&[&str]]) -> TargetList {
        groups
            .iter()
            .map(|targets| TargetGroup {
                targets: targets.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn group_drops_whole_group() {
        let input = list(&[
            &["a:15020"],
            &["b:15020", "a:15020"],
            &["c:15020"],
            &["a:15020"],
        ]);

        assert_eq!(
            deduplicate(input, DedupStrategy::Group),
            list(&[&["a:15020"], &["c:15020"]])
        );
    }

    #[test]
    fn group_records_targets_of_dropped_groups() {
        // "b" is only seen in a dropped group, but the later group is still
        // a repeat
        let input = list(&[&["a:15020"], &["a:15020", "b:15020"], &["b:15020"]]);

        assert_eq!(
            deduplicate(input, DedupStrategy::Group),
            list(&[&["a:15020"]])
        );
    }

    #[test]
    fn group_repeat_within_group() {
        let input = list(&[&["a:15020", "a:15020"], &["b:15020"]]);

        assert_eq!(
            deduplicate(input, DedupStrategy::Group),
            list(&[&["b:15020"]])
        );
    }

    #[test]
    fn address_keeps_first_occurrence() {
        let input = list(&[
            &["a:15020"],
            &["b:15020", "a:15020"],
            &["a:15020"],
            &["c:15020", "c:15020"],
        ]);

        assert_eq!(
            deduplicate(input, DedupStrategy::Address),
            list(&[&["a:15020"], &["b:15020"], &["c:15020"]])
        );
    }

    #[test]
    fn strategies_agree_on_single_target_groups() {
        let input = list(&[&["a:15020"], &["b:15020"], &["a:15020"], &["b:15020"]]);

        let want = list(&[&["a:15020"], &["b:15020"]]);
        assert_eq!(deduplicate(input.clone(), DedupStrategy::Group), want);
        assert_eq!(deduplicate(input, DedupStrategy::Address), want);
    }

    #[test]
    fn unique_list_is_untouched() {
        let input = list(&[&["a:15020", "b:15020"], &[], &["c:15020"]]);

        for strategy in [DedupStrategy::Group, DedupStrategy::Address] {
            assert_eq!(deduplicate(input.clone(), strategy), input, "{strategy}");
        }
    }

    #[test]
    fn idempotent() {
        let input = list(&[
            &["a:15020", "b:15020"],
            &["b:15020"],
            &["c:15020", "a:15020"],
            &["d:15020"],
            &["d:15020", "e:15020"],
        ]);

        for strategy in [DedupStrategy::Group, DedupStrategy::Address] {
            let once = deduplicate(input.clone(), strategy);
            let twice = deduplicate(once.clone(), strategy);
            assert_eq!(once, twice, "{strategy}");
        }
    }

    #[test]
    fn parse_strategy() {
        assert_eq!("group".parse::<DedupStrategy>(), Ok(DedupStrategy::Group));
        assert_eq!(
            "address".parse::<DedupStrategy>(),
            Ok(DedupStrategy::Address)
        );
        assert!("label".parse::<DedupStrategy>().is_err());
        assert_eq!(DedupStrategy::default(), DedupStrategy::Group);
    }
}
