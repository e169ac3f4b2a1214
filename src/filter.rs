use crate::record::{Level, Record};
use serde::Deserialize;
use std::collections::BTreeSet;

/// Decides whether a record reaches a handler or logger.
pub trait Filter: Send + Sync {
    fn allows(&self, record: &Record) -> bool;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IgnoreLevelsConfig {
    #[serde(default)]
    pub levels: BTreeSet<Level>,
}

/// Suppresses records whose level is in a fixed set, e.g. to keep INFO
/// chatter out of an error-only webhook while still passing CRITICAL.
#[derive(Debug, Clone, Default)]
pub struct IgnoreLevels {
    levels: BTreeSet<Level>,
}

impl IgnoreLevels {
    pub fn new(levels: impl IntoIterator<Item = Level>) -> Self {
        IgnoreLevels {
            levels: levels.into_iter().collect(),
        }
    }

    pub fn levels(&self) -> &BTreeSet<Level> {
        &self.levels
    }
}

impl From<IgnoreLevelsConfig> for IgnoreLevels {
    fn from(config: IgnoreLevelsConfig) -> Self {
        IgnoreLevels {
            levels: config.levels,
        }
    }
}

impl Filter for IgnoreLevels {
    fn allows(&self, record: &Record) -> bool {
        !self.levels.contains(&record.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_only_listed_levels() {
        let filter = IgnoreLevels::new([Level::Debug, Level::Info]);
        assert!(!filter.allows(&Record::new(Level::Debug, "a", "x")));
        assert!(!filter.allows(&Record::new(Level::Info, "a", "x")));
        assert!(filter.allows(&Record::new(Level::Warning, "a", "x")));
    }

    #[test]
    fn config_levels_are_kept() {
        let config: IgnoreLevelsConfig =
            serde_json::from_value(serde_json::json!({ "levels": ["INFO", "DEBUG"] })).unwrap();
        let filter = IgnoreLevels::from(config);
        assert_eq!(
            filter.levels().iter().copied().collect::<Vec<_>>(),
            vec![Level::Debug, Level::Info]
        );
    }

    #[test]
    fn empty_set_allows_everything() {
        let filter = IgnoreLevels::default();
        assert!(Level::ALL
            .iter()
            .all(|l| filter.allows(&Record::new(*l, "a", "x"))));
    }
}
