// Copyright 2025 The Multicluster Observability Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Metric allow-lists: the default list shipped with the hub merged with an optional
//! custom override.

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::collections::{BTreeMap, HashSet};

/// Entries with this prefix in a custom list remove the entry from the default list.
pub const REMOVE_PREFIX: char = '-';

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("malformed {} allow-list: {}", which, source))]
    Parse {
        which: String,
        source: serde_yaml_ng::Error,
    },

    #[snafu(display("failed to encode allow-list: {}", source))]
    Encode { source: serde_yaml_ng::Error },
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordingRule {
    pub record: String,
    pub expr: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct MetricsAllowlist {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub renames: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recording_rules: Vec<RecordingRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collect_rules: Vec<serde_json::Value>,
}

impl MetricsAllowlist {
    pub fn parse(which: &str, text: &str) -> Result<Self, Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(text).context(ParseSnafu { which })
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml_ng::to_string(self).context(EncodeSnafu)
    }

    /// Applies `custom` on top of `self`.
    pub fn merge(&self, custom: &MetricsAllowlist) -> MetricsAllowlist {
        let mut renames = self.renames.clone();
        renames.extend(custom.renames.clone());

        let mut collect_rules = self.collect_rules.clone();
        collect_rules.extend(custom.collect_rules.iter().cloned());

        MetricsAllowlist {
            names: merge_entries(&self.names, &custom.names),
            matches: merge_entries(&self.matches, &custom.matches),
            renames,
            recording_rules: merge_rules(&self.recording_rules, &custom.recording_rules),
            collect_rules,
        }
    }
}

/// Appends `custom` to `default`, drops every entry named by a `-` prefixed custom
/// entry and keeps the first occurrence of each remaining entry.
pub fn merge_entries(default: &[String], custom: &[String]) -> Vec<String> {
    let removed: HashSet<&str> = custom
        .iter()
        .filter_map(|entry| entry.strip_prefix(REMOVE_PREFIX))
        .collect();

    let mut seen = HashSet::new();
    default
        .iter()
        .chain(custom.iter().filter(|e| !e.starts_with(REMOVE_PREFIX)))
        .filter(|entry| !removed.contains(entry.as_str()))
        .filter(|entry| seen.insert(entry.as_str()))
        .cloned()
        .collect()
}

/// Same law as `merge_entries`, keyed by the rule's `record`.
pub fn merge_rules(default: &[RecordingRule], custom: &[RecordingRule]) -> Vec<RecordingRule> {
    let removed: HashSet<&str> = custom
        .iter()
        .filter_map(|rule| rule.record.strip_prefix(REMOVE_PREFIX))
        .collect();

    let mut seen = HashSet::new();
    default
        .iter()
        .chain(custom.iter().filter(|r| !r.record.starts_with(REMOVE_PREFIX)))
        .filter(|rule| !removed.contains(rule.record.as_str()))
        .filter(|rule| seen.insert(rule.record.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_merge_subtracts_and_appends() {
        assert_eq!(
            merge_entries(&list(&["a", "b"]), &list(&["c", "-b"])),
            list(&["a", "c"])
        );
    }

    #[test]
    fn test_merge_dedups_and_ignores_unknown_subtraction() {
        assert_eq!(merge_entries(&list(&["a", "a"]), &list(&["a", "-b"])), list(&["a"]));
    }

    #[test]
    fn test_merge_keeps_first_occurrence_order() {
        assert_eq!(
            merge_entries(&list(&["x", "y", "z"]), &list(&["w", "x"])),
            list(&["x", "y", "z", "w"])
        );
    }

    #[test]
    fn test_merge_full_allowlists() {
        let default = MetricsAllowlist::parse(
            "default",
            r#"
names: [up, cluster_version]
matches: ['__name__="etcd_up"']
renames:
  old_a: new_a
  old_b: new_b
recording_rules:
  - record: r1
    expr: sum(up)
  - record: r2
    expr: count(up)
"#,
        )
        .unwrap();
        let custom = MetricsAllowlist::parse(
            "custom",
            r#"
names: [-cluster_version, my_metric]
renames:
  old_b: custom_b
recording_rules:
  - record: r1
    expr: max(up)
  - record: -r2
    expr: ""
  - record: r3
    expr: min(up)
collect_rules:
  - group: keep-etcd
"#,
        )
        .unwrap();

        let merged = default.merge(&custom);
        assert_eq!(merged.names, list(&["up", "my_metric"]));
        assert_eq!(merged.matches, list(&[r#"__name__="etcd_up""#]));
        assert_eq!(merged.renames["old_a"], "new_a");
        assert_eq!(merged.renames["old_b"], "custom_b");

        let records: Vec<(&str, &str)> = merged
            .recording_rules
            .iter()
            .map(|r| (r.record.as_str(), r.expr.as_str()))
            .collect();
        assert_eq!(records, vec![("r1", "sum(up)"), ("r3", "min(up)")]);
        assert_eq!(merged.collect_rules.len(), 1);
    }

    #[test]
    fn test_parse_rejects_malformed_yaml() {
        let err = MetricsAllowlist::parse("custom", "names: {unclosed").unwrap_err();
        assert!(err.to_string().contains("custom"));
    }

    #[test]
    fn test_empty_text_is_empty_list() {
        assert_eq!(MetricsAllowlist::parse("custom", "  ").unwrap(), MetricsAllowlist::default());
    }
}
