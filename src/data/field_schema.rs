use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::{FieldPath, ValidationOutcome, ValidationResult};
use crate::Result;

/// The check performed by a [`ValidationRule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleKind {
    Required,
    MinLength { min: usize },
    MaxLength { max: usize },
    Range { min: Option<f64>, max: Option<f64> },
    OneOf { values: Vec<Value> },
    Email,
    /// Always passes; contributes an advisory message only
    Guide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    pub kind: RuleKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide: Option<String>,
}

impl ValidationRule {
    pub fn new(kind: RuleKind, message: impl Into<String>) -> Self {
        ValidationRule {
            kind,
            message: message.into(),
            guide: None,
        }
    }

    pub fn required(message: impl Into<String>) -> Self {
        Self::new(RuleKind::Required, message)
    }

    pub fn min_length(min: usize, message: impl Into<String>) -> Self {
        Self::new(RuleKind::MinLength { min }, message)
    }

    pub fn max_length(max: usize, message: impl Into<String>) -> Self {
        Self::new(RuleKind::MaxLength { max }, message)
    }

    pub fn range(min: Option<f64>, max: Option<f64>, message: impl Into<String>) -> Self {
        Self::new(RuleKind::Range { min, max }, message)
    }

    pub fn one_of(values: Vec<Value>, message: impl Into<String>) -> Self {
        Self::new(RuleKind::OneOf { values }, message)
    }

    pub fn email(message: impl Into<String>) -> Self {
        Self::new(RuleKind::Email, message)
    }

    pub fn guide(message: impl Into<String>) -> Self {
        Self::new(RuleKind::Guide, message)
    }

    /// Attach a guide message shown while the field is focused
    pub fn with_guide(mut self, guide: impl Into<String>) -> Self {
        self.guide = Some(guide.into());
        self
    }

    pub fn check(&self, value: &Value) -> ValidationResult {
        if self.kind == RuleKind::Guide {
            return ValidationResult {
                passed: true,
                error_message: None,
                guide_message: Some(self.message.clone()),
            };
        }

        let passed = crate::data::validation::passes(&self.kind, value);
        ValidationResult {
            passed,
            error_message: (!passed).then(|| self.message.clone()),
            guide_message: self.guide.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: FieldPath,
    #[serde(default)]
    pub default_value: Value,
    #[serde(default)]
    pub rank: i64,
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,
}

impl FieldSchema {
    pub fn new(name: &str) -> Result<Self> {
        Ok(FieldSchema {
            name: FieldPath::parse(name)?,
            default_value: Value::Null,
            rank: 0,
            rules: Vec::new(),
            choices: None,
        })
    }

    pub fn with_default(mut self, default_value: Value) -> Self {
        self.default_value = default_value;
        self
    }

    pub fn with_rank(mut self, rank: i64) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn required(self, message: impl Into<String>) -> Self {
        self.with_rule(ValidationRule::required(message))
    }

    pub fn with_choices(mut self, choices: Vec<Value>) -> Self {
        self.choices = Some(choices);
        self
    }

    /// Run every rule against `value`, in declaration order. A value outside
    /// the declared choices fails with a trailing choice result.
    pub fn validate(&self, value: &Value) -> ValidationOutcome {
        let mut results = self
            .rules
            .iter()
            .map(|rule| rule.check(value))
            .collect::<Vec<ValidationResult>>();

        if let Some(choices) = &self.choices {
            let rule = ValidationRule::one_of(
                choices.clone(),
                format!("{} must be one of the available choices", self.name),
            );
            results.push(rule.check(value));
        }

        ValidationOutcome::from_results(results)
    }
}
