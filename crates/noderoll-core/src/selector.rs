//! Kubernetes-style label selector expressions.
//!
//! Supports the set-based grammar used by `kubectl -l`:
//!
//! ```text
//! tier=worker,zone!=us-east-1a    equality / inequality
//! gpu, !spot                      existence / non-existence
//! pool in (a, b), os notin (win)  set membership
//! ```
//!
//! Expressions are parsed before any API call so a typo fails the campaign
//! as a configuration error instead of silently matching nothing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// A single selector term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
            Requirement::In(k, vs) => labels.get(k).is_some_and(|v| vs.contains(v)),
            Requirement::NotIn(k, vs) => labels.get(k).is_none_or(|v| !vs.contains(v)),
        }
    }
}

/// A parsed label selector. The empty selector matches every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    raw: String,
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// The expression as given, for passing through to the API server.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Evaluate against a node's labels. All terms must match.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for LabelSelector {
    type Err = ConfigError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidSelector {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let mut requirements = Vec::new();
        for term in split_terms(trimmed).map_err(|r| invalid(&r))? {
            requirements.push(parse_term(term).map_err(|r| invalid(&r))?);
        }

        Ok(Self {
            raw: trimmed.to_string(),
            requirements,
        })
    }
}

/// Split on commas that are not inside a `( ... )` value list.
fn split_terms(expr: &str) -> Result<Vec<&str>, String> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ')'".to_string())?;
            }
            ',' if depth == 0 => {
                terms.push(expr[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    terms.push(expr[start..].trim());
    if terms.iter().any(|t| t.is_empty()) {
        return Err("empty term".to_string());
    }
    Ok(terms)
}

fn parse_term(term: &str) -> Result<Requirement, String> {
    if let Some(open) = term.find('(') {
        let head: Vec<&str> = term[..open].split_whitespace().collect();
        let [key, op] = head.as_slice() else {
            return Err(format!("expected `key in (...)` in {term:?}"));
        };
        let body = term[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| format!("trailing input after ')' in {term:?}"))?;
        let values = body
            .split(',')
            .map(|v| validate_value(v.trim()).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;
        let key = validate_key(key)?.to_string();
        return match *op {
            "in" => Ok(Requirement::In(key, values)),
            "notin" => Ok(Requirement::NotIn(key, values)),
            other => Err(format!("unknown set operator {other:?}")),
        };
    }

    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::NotExists(validate_key(key.trim())?.to_string()));
    }
    if let Some((k, v)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(
            validate_key(k.trim())?.to_string(),
            validate_value(v.trim())?.to_string(),
        ));
    }
    if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Requirement::Equals(
            validate_key(k.trim())?.to_string(),
            validate_value(v.trim())?.to_string(),
        ));
    }
    Ok(Requirement::Exists(validate_key(term)?.to_string()))
}

fn validate_key(key: &str) -> Result<&str, String> {
    if key.is_empty() {
        return Err("empty label key".to_string());
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(format!("invalid label key {key:?}"));
    }
    Ok(key)
}

fn validate_value(value: &str) -> Result<&str, String> {
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(format!("invalid label value {value:?}"));
    }
    Ok(value)
}
