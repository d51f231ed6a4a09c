use std::collections::HashMap;

use serde_json::{Map, Value};

/// Expansions requested for a single level of a resource. Children apply to
/// resources nested below it; the wildcard bit covers any field not named
/// explicitly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpansionLevel {
    pub expansions: HashMap<String, ExpansionLevel>,
    pub wildcard: bool,
}

/// Reads the `expand` key out of decoded request data. A string becomes a
/// one-element list, a list is taken as-is, anything else produces no
/// expansions.
pub fn extract_expansions(data: &Map<String, Value>) -> Option<ExpansionLevel> {
    let expand = data.get("expand")?;

    match expand {
        Value::String(s) => Some(parse_expansion_levels(vec![s.clone()])),
        Value::Array(items) => {
            let expansions: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            if expansions.len() != items.len() {
                return None;
            }
            Some(parse_expansion_levels(expansions))
        }
        _ => None,
    }
}

/// Splits each raw expansion on `.` and merges the pieces into a prefix
/// tree.
pub fn parse_expansion_levels(mut raw: Vec<String>) -> ExpansionLevel {
    raw.sort();

    let mut level = ExpansionLevel::default();
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();

    for expansion in &raw {
        match expansion.split_once('.') {
            None => {
                if expansion == "*" {
                    level.wildcard = true;
                } else {
                    level
                        .expansions
                        .insert(expansion.clone(), ExpansionLevel::default());
                }
            }
            Some((head, rest)) => {
                groups.entry(head.to_string()).or_default().push(rest.to_string());
            }
        }
    }

    for (key, subexpansions) in groups {
        level
            .expansions
            .insert(key, parse_expansion_levels(subexpansions));
    }

    level
}
