use serde::{Deserialize, Serialize};

use crate::chain::Name;

/// One `account:name` pattern with its decode opt-in. Either side of the
/// pattern may be `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterSpec {
    pub filter: String,
    #[serde(default = "default_deserialize")]
    pub deserialize: bool,
}

fn default_deserialize() -> bool {
    true
}

impl FilterSpec {
    pub fn new(filter: &str, deserialize: bool) -> Self {
        Self {
            filter: filter.to_string(),
            deserialize,
        }
    }

    fn matches(&self, account: &Name, name: &Name) -> bool {
        let Some((account_pattern, name_pattern)) = self.filter.split_once(':') else {
            return false;
        };

        (account_pattern == "*" || account_pattern == account.to_string())
            && (name_pattern == "*" || name_pattern == name.to_string())
    }
}

/// The trace and delta subscriptions of one contract handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeFilter {
    #[serde(default)]
    pub actions: Vec<FilterSpec>,
    #[serde(default)]
    pub tables: Vec<FilterSpec>,
}

impl ScopeFilter {
    /// Match an action trace; returns the `deserialize` flag of the first
    /// matching pattern.
    pub fn match_action(&self, contract: &Name, action: &Name) -> Option<bool> {
        self.actions
            .iter()
            .find(|spec| spec.matches(contract, action))
            .map(|spec| spec.deserialize)
    }

    /// Match a table delta; returns the `deserialize` flag of the first
    /// matching pattern.
    pub fn match_table(&self, contract: &Name, table: &Name) -> Option<bool> {
        self.tables
            .iter()
            .find(|spec| spec.matches(contract, table))
            .map(|spec| spec.deserialize)
    }

    /// Does any pattern of this scope target the given account
    pub fn watches_account(&self, account: &Name) -> bool {
        let account = account.to_string();
        self.actions
            .iter()
            .chain(self.tables.iter())
            .filter_map(|spec| spec.filter.split_once(':'))
            .any(|(pattern, _)| pattern == "*" || pattern == account)
    }

    /// Union of several handler scopes, used by the receiver to know which
    /// traces and deltas can be dropped before dispatch.
    pub fn merge(filters: impl IntoIterator<Item = Self>) -> Self {
        let mut merged = Self::default();
        for filter in filters {
            merged.actions.extend(filter.actions);
            merged.tables.extend(filter.tables);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let filter = ScopeFilter {
            actions: vec![FilterSpec::new("atomicassets:logmint", true)],
            tables: vec![],
        };

        assert_eq!(
            filter.match_action(&name("atomicassets"), &name("logmint")),
            Some(true)
        );
        assert_eq!(
            filter.match_action(&name("atomicassets"), &name("logburnasset")),
            None
        );
        assert_eq!(
            filter.match_action(&name("othercontract"), &name("logmint")),
            None
        );
    }

    #[test]
    fn test_wildcards() {
        let filter = ScopeFilter {
            actions: vec![
                FilterSpec::new("atomicassets:setabi", false),
                FilterSpec::new("atomicassets:*", true),
            ],
            tables: vec![FilterSpec::new("*:offers", true)],
        };

        // first matching pattern wins
        assert_eq!(
            filter.match_action(&name("atomicassets"), &name("setabi")),
            Some(false)
        );
        assert_eq!(
            filter.match_action(&name("atomicassets"), &name("anything")),
            Some(true)
        );
        assert_eq!(
            filter.match_table(&name("whatever"), &name("offers")),
            Some(true)
        );
    }

    #[test]
    fn test_merge() {
        let merged = ScopeFilter::merge([
            ScopeFilter {
                actions: vec![FilterSpec::new("a:x", true)],
                tables: vec![],
            },
            ScopeFilter {
                actions: vec![FilterSpec::new("b:y", false)],
                tables: vec![FilterSpec::new("b:t", true)],
            },
        ]);

        assert_eq!(merged.actions.len(), 2);
        assert_eq!(merged.match_action(&name("b"), &name("y")), Some(false));
        assert_eq!(merged.match_table(&name("b"), &name("t")), Some(true));
    }
}
