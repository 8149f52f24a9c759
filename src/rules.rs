// 🏷️ Normalization Rules - Rules as Data
// Ordered regex rewrites applied to leader-name keys, most conservative first

use crate::error::{ClusterError, Result};
use anyhow::Context as AnyhowContext;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ============================================================================
// RULE DEFINITION
// ============================================================================

/// Computed replacements, applied to the whole matched span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTransform {
    Lowercase,
    Uppercase,
    /// Each run of one repeated character becomes a single instance
    CollapseRepeats,
}

impl MatchTransform {
    pub fn apply(&self, matched: &str) -> String {
        match self {
            MatchTransform::Lowercase => matched.to_lowercase(),
            MatchTransform::Uppercase => matched.to_uppercase(),
            MatchTransform::CollapseRepeats => {
                let mut out = String::with_capacity(matched.len());
                let mut previous = None;
                for c in matched.chars() {
                    if previous != Some(c) {
                        out.push(c);
                    }
                    previous = Some(c);
                }
                out
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Replacement {
    /// Regex template; `$1` / `${1}` reference capture groups
    Template(String),

    /// Named function of the matched text
    Transform(MatchTransform),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Shown in step reports
    pub description: String,

    /// Regex matched against the current key
    pub pattern: String,

    /// Serialized as either `"template": "..."` or `"transform": "lowercase"`
    #[serde(flatten)]
    pub replacement: Replacement,
}

impl Rule {
    pub fn template(description: &str, pattern: &str, template: &str) -> Self {
        Rule {
            description: description.to_string(),
            pattern: pattern.to_string(),
            replacement: Replacement::Template(template.to_string()),
        }
    }

    pub fn transform(description: &str, pattern: &str, transform: MatchTransform) -> Self {
        Rule {
            description: description.to_string(),
            pattern: pattern.to_string(),
            replacement: Replacement::Transform(transform),
        }
    }
}

/// The canonical step sequence. Later steps assume earlier ones already ran.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::template("Uppercase I -> lowercase l", r"(\S)I", "${1}l"),
        Rule::transform("Lowercase", ".+", MatchTransform::Lowercase),
        Rule::template(r#"Add space after "." for abbreviations"#, r"\.(\S)", ". ${1}"),
        Rule::template("Smart apostrophes -> straight apostrophes", "\u{2019}", "'"),
        Rule::template("Hyphens -> spaces", "-", " "),
        Rule::template("Remove punctuation", "[[:punct:]]", ""),
        Rule::template("Remove trailing E and H", r"[eh]\b", ""),
        Rule::template("Remove trailing ES", r"es\b", "s"),
        // No back-references in the regex crate, so (.)\1+ becomes a transform
        Rule::transform("Double letters -> single letters", ".+", MatchTransform::CollapseRepeats),
        Rule::template("ey/ye -> y", "ey|ye", "y"),
        Rule::template("ei/ie/y -> e", "ei|ie|y", "e"),
        Rule::template("Replace multiple vowels", "([aeiouy])[aeiouy]+", "${1}"),
        Rule::template("Wildcard vowels", "[aeiouy]", "*"),
    ]
}

/// Load rules from a JSON array file
pub fn load_rules<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<Rule>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

    let rules: Vec<Rule> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse rules JSON: {:?}", path.as_ref()))?;

    Ok(rules)
}

// ============================================================================
// COMPILED RULES
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompiledRule {
    step: usize,
    rule: Rule,
    regex: Regex,
}

impl CompiledRule {
    pub fn compile(step: usize, rule: &Rule) -> Result<Self> {
        let regex = Regex::new(&rule.pattern).map_err(|source| ClusterError::InvalidPattern {
            step,
            description: rule.description.clone(),
            source,
        })?;

        Ok(CompiledRule {
            step,
            rule: rule.clone(),
            regex,
        })
    }

    /// Replace every non-overlapping match in `key`. Total over any input.
    pub fn apply(&self, key: &str) -> String {
        match &self.rule.replacement {
            Replacement::Template(template) => {
                self.regex.replace_all(key, template.as_str()).into_owned()
            }
            Replacement::Transform(transform) => self
                .regex
                .replace_all(key, |caps: &Captures| transform.apply(&caps[0]))
                .into_owned(),
        }
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn description(&self) -> &str {
        &self.rule.description
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }
}

// ============================================================================
// RULE TABLE
// ============================================================================

#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<CompiledRule>,
}

impl RuleTable {
    /// Compile every rule up front; nothing runs if any pattern is bad
    pub fn compile(rules: &[Rule]) -> Result<Self> {
        if rules.is_empty() {
            return Err(ClusterError::EmptyRuleTable);
        }

        let rules = rules
            .iter()
            .enumerate()
            .map(|(step, rule)| CompiledRule::compile(step, rule))
            .collect::<Result<Vec<_>>>()?;

        Ok(RuleTable { rules })
    }

    pub fn defaults() -> Result<Self> {
        Self::compile(&default_rules())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, step: usize) -> Option<&CompiledRule> {
        self.rules.get(step)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    /// Apply a single step in isolation
    pub fn apply_step(&self, step: usize, key: &str) -> Result<String> {
        let rule = self.get(step).ok_or(ClusterError::StepOutOfRange {
            step,
            len: self.len(),
        })?;
        Ok(rule.apply(key))
    }

    /// Apply every step in order
    pub fn normalize(&self, name: &str) -> String {
        self.rules
            .iter()
            .fold(name.to_string(), |key, rule| rule.apply(&key))
    }

    /// Key after each step, for showing how a name is rewritten
    pub fn trace(&self, name: &str) -> Vec<(&str, String)> {
        let mut key = name.to_string();
        self.rules
            .iter()
            .map(|rule| {
                key = rule.apply(&key);
                (rule.description(), key.clone())
            })
            .collect()
    }
}

// ============================================================================
// NON-ASCII AUDIT
// ============================================================================

/// Characters of `name` outside ASCII, in order
pub fn non_ascii_chars(name: &str) -> String {
    name.chars().filter(|c| !c.is_ascii()).collect()
}

/// Every non-ASCII character across `names`, with occurrence counts.
/// Used to spot Unicode punctuation the rule table doesn't handle yet.
pub fn non_ascii_inventory<'a, I>(names: I) -> BTreeMap<char, usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut inventory = BTreeMap::new();
    for name in names {
        for c in non_ascii_chars(name).chars() {
            *inventory.entry(c).or_insert(0) += 1;
        }
    }
    inventory
}

// ============================================================================
// TESTS
// ============================================================================
