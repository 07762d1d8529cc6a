//! Content validation for produced payloads.
//!
//! The validator walks every string-valued leaf of a payload — recursing
//! through arrays and objects — and checks each against minimum-length rules,
//! a deny-list of placeholder patterns, and any domain predicates the calling
//! unit registered. All violations across the whole payload are collected
//! into one [`ValidationReport`]; the pass never short-circuits, so a retry
//! decision is always made against the complete picture.
//!
//! The deny-list is empirically derived from observed bad outputs, not a
//! principled grammar, which is exactly why it is configuration rather than
//! code: callers extend or replace [`ValidationRules::default_deny_list`] as
//! new failure modes show up.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use pipeline::{FieldPath, ValidationReport, ValidationViolation};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// One deny-list entry: a pattern that marks a string leaf as placeholder or
/// boilerplate content.
#[derive(Debug, Clone)]
pub struct DenyPattern {
    /// Short label used in violation messages (e.g. `"bracketed placeholder"`).
    pub label: String,
    /// The pattern itself.
    pub pattern: Regex,
}

impl DenyPattern {
    /// Creates a deny pattern, returning `None` if the regex does not compile.
    #[must_use]
    pub fn new(label: impl Into<String>, pattern: &str) -> Option<Self> {
        Regex::new(pattern).ok().map(|pattern| Self {
            label: label.into(),
            pattern,
        })
    }
}

/// A caller-registered, domain-specific check applied to every string leaf.
///
/// Returns `Some(message)` to report a violation for that leaf, `None` to
/// accept it. Example: "name must not match a known generic archetype list".
pub type DomainPredicate = Arc<dyn Fn(&FieldPath, &str) -> Option<String> + Send + Sync>;

/// The configurable rule set one [`ContentValidator`] applies.
#[derive(Clone, Default)]
pub struct ValidationRules {
    /// Minimum character count per leaf key (field class). A leaf whose key
    /// has no entry here falls back to `default_min_length`.
    min_lengths: BTreeMap<String, usize>,
    /// Minimum character count applied to every string leaf without a
    /// per-field entry. Zero disables the check.
    default_min_length: usize,
    deny: Vec<DenyPattern>,
    predicates: Vec<DomainPredicate>,
}

impl ValidationRules {
    /// Creates an empty rule set (accepts everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum length for every string leaf not covered by a
    /// per-field rule.
    pub fn default_min_length(mut self, chars: usize) -> Self {
        self.default_min_length = chars;
        self
    }

    /// Sets a minimum length for leaves whose key is `field`.
    pub fn min_length(mut self, field: impl Into<String>, chars: usize) -> Self {
        self.min_lengths.insert(field.into(), chars);
        self
    }

    /// Appends one deny pattern.
    pub fn deny(mut self, pattern: DenyPattern) -> Self {
        self.deny.push(pattern);
        self
    }

    /// Appends every pattern in `patterns`.
    pub fn deny_all(mut self, patterns: impl IntoIterator<Item = DenyPattern>) -> Self {
        self.deny.extend(patterns);
        self
    }

    /// Appends a domain predicate.
    pub fn predicate(mut self, predicate: DomainPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// The stock deny-list, covering the placeholder classes observed in bad
    /// producer outputs:
    ///
    /// - bracketed template placeholders (`[insert name]`, `{{title}}`, `<NAME>`)
    /// - numbered generic names (`Entity 1`, `Character 12`, `Location 3`)
    /// - sentinel values (`TBD`, `Unknown`, `N/A`, `placeholder`, …)
    /// - boilerplate fallback phrasing (`As an AI…`, `I cannot…`)
    pub fn default_deny_list() -> Vec<DenyPattern> {
        [
            ("bracketed placeholder", r"\[[^\]]*\]|\{\{[^}]*\}\}|<[A-Z][A-Z0-9_]*>"),
            (
                "numbered generic name",
                r"(?i)\b(?:entity|character|person|item|place|location|region|faction|npc)\s+\d+\b",
            ),
            (
                "sentinel value",
                r"(?i)^\s*(?:tbd|todo|unknown|n/?a|none|null|placeholder|lorem ipsum.*)\s*$",
            ),
            ("unresolved TBD marker", r"\bTBD\b|\bFIXME\b"),
            (
                "boilerplate fallback phrase",
                r"(?i)\bas an ai\b|\bi cannot (?:assist|help|generate)\b|\berror generating\b|\bfailed to generate\b",
            ),
        ]
        .into_iter()
        .filter_map(|(label, pattern)| DenyPattern::new(label, pattern))
        .collect()
    }

    fn min_length_for(&self, leaf_key: Option<&str>) -> usize {
        leaf_key
            .and_then(|key| self.min_lengths.get(key).copied())
            .unwrap_or(self.default_min_length)
    }
}

impl std::fmt::Debug for ValidationRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationRules")
            .field("min_lengths", &self.min_lengths)
            .field("default_min_length", &self.default_min_length)
            .field("deny", &self.deny.len())
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Applies a [`ValidationRules`] set to whole payloads.
#[derive(Debug, Clone)]
pub struct ContentValidator {
    rules: Arc<ValidationRules>,
}

impl ContentValidator {
    /// Creates a validator over the given rules.
    pub fn new(rules: Arc<ValidationRules>) -> Self {
        Self { rules }
    }

    /// Validates `payload`, returning the full accounting of every violation
    /// found in one pass.
    pub fn validate(&self, payload: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.walk(&FieldPath::root(), payload, &mut report);
        report
    }

    fn walk(&self, path: &FieldPath, value: &Value, report: &mut ValidationReport) {
        match value {
            Value::String(s) => self.check_leaf(path, s, report),
            Value::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    self.walk(&path.index(idx), item, report);
                }
            }
            Value::Object(map) => {
                for (key, item) in map {
                    self.walk(&path.key(key), item, report);
                }
            }
            // Numbers, booleans and nulls carry no text to check.
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    fn check_leaf(&self, path: &FieldPath, text: &str, report: &mut ValidationReport) {
        let min = self.rules.min_length_for(path.leaf_key());
        let len = text.chars().count();
        if len < min {
            report.errors.push(ValidationViolation {
                field: path.clone(),
                message: format!("{len} character(s), minimum is {min}"),
            });
        }

        for deny in &self.rules.deny {
            if deny.pattern.is_match(text) {
                report.errors.push(ValidationViolation {
                    field: path.clone(),
                    message: format!("{} matched: '{}'", deny.label, truncate(text, 80)),
                });
            }
        }

        for predicate in &self.rules.predicates {
            if let Some(message) = predicate(path, text) {
                report.errors.push(ValidationViolation {
                    field: path.clone(),
                    message,
                });
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator(rules: ValidationRules) -> ContentValidator {
        ContentValidator::new(Arc::new(rules))
    }

    fn default_validator() -> ContentValidator {
        validator(
            ValidationRules::new()
                .default_min_length(1)
                .deny_all(ValidationRules::default_deny_list()),
        )
    }

    #[test]
    fn one_denied_field_among_ten_valid_yields_exactly_one_error() {
        let payload = json!({
            "a": "The weathered harbour town of Skellen.",
            "b": "Iron mines in the northern hills.",
            "c": "A river delta rich in silt.",
            "d": "Terraced vineyards above the cliffs.",
            "e": "A salt road crossing the steppe.",
            "f": "Granite quarries near the pass.",
            "g": "Cedar forests along the coast.",
            "h": "Hot springs feeding the valley.",
            "i": "An old watchtower on the ridge.",
            "offender": "[insert region name]",
        });
        let report = default_validator().validate(&payload);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].field.as_str(), "offender");
    }

    #[test]
    fn walk_recurses_into_nested_arrays_and_objects() {
        let payload = json!({
            "regions": [
                { "name": "Skellen", "settlements": [ { "name": "TBD" } ] },
                { "name": "Entity 2" },
            ],
        });
        let report = default_validator().validate(&payload);
        let fields: Vec<_> = report.errors.iter().map(|v| v.field.as_str().to_string()).collect();
        assert!(fields.contains(&"regions[0].settlements[0].name".to_string()));
        assert!(fields.contains(&"regions[1].name".to_string()));
    }

    #[test]
    fn all_violations_are_collected_not_just_the_first() {
        let payload = json!({
            "name": "",
            "summary": "Unknown",
            "motto": "{{motto}}",
        });
        let report = default_validator().validate(&payload);
        // Empty name (min length), sentinel summary, bracketed motto.
        assert!(report.errors.len() >= 3);
        assert!(!report.is_valid());
    }

    #[test]
    fn per_field_minimum_length_overrides_the_default() {
        let v = validator(
            ValidationRules::new()
                .default_min_length(1)
                .min_length("description", 20),
        );
        let report = v.validate(&json!({
            "name": "Ok",
            "description": "too short",
        }));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].field.as_str(), "description");
    }

    #[test]
    fn sentinel_matching_is_whole_value_for_common_words() {
        let v = default_validator();
        // "unknown" as a full value is denied…
        assert!(!v.validate(&json!({ "origin": "Unknown" })).is_valid());
        // …but prose merely containing the word is fine.
        assert!(v
            .validate(&json!({ "origin": "Its origin is unknown to the coastal clans." }))
            .is_valid());
    }

    #[test]
    fn domain_predicates_participate_in_the_same_pass() {
        let archetypes = ["the chosen one", "dark lord"];
        let v = validator(
            ValidationRules::new().predicate(Arc::new(move |path, text| {
                let lowered = text.to_lowercase();
                archetypes
                    .iter()
                    .find(|a| lowered.contains(*a))
                    .map(|a| format!("'{}' matches generic archetype '{a}'", path))
            })),
        );
        let report = v.validate(&json!({
            "hero": "Aldric, the Chosen One",
            "villain": "A grain merchant with debts",
        }));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].field.as_str(), "hero");
    }

    #[test]
    fn numbers_booleans_and_nulls_are_ignored() {
        let report = default_validator().validate(&json!({
            "population": 48210,
            "coastal": true,
            "ruler": null,
        }));
        assert!(report.is_valid());
    }
}
