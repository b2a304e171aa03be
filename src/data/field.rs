use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a single validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide_message: Option<String>,
}

/// Result of validating one value against all rules of a field.
/// Failures are data here, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub results: Vec<ValidationResult>,
}

impl ValidationOutcome {
    pub fn from_results(results: Vec<ValidationResult>) -> Self {
        ValidationOutcome {
            is_valid: results.iter().all(|r| r.passed),
            results,
        }
    }

    pub fn errors(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .filter_map(|r| r.error_message.as_deref())
            .collect()
    }

    pub fn guides(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter_map(|r| r.guide_message.as_deref())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldBehavior {
    pub is_focus: bool,
    pub has_been_touched: bool,
}

/// Partial update for [`FieldBehavior`]; `None` leaves a flag unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorPatch {
    pub is_focus: Option<bool>,
    pub has_been_touched: Option<bool>,
}

impl BehaviorPatch {
    pub fn focus() -> Self {
        BehaviorPatch {
            is_focus: Some(true),
            has_been_touched: None,
        }
    }

    /// Losing focus also marks the field as touched
    pub fn blur() -> Self {
        BehaviorPatch {
            is_focus: Some(false),
            has_been_touched: Some(true),
        }
    }
}

impl FieldBehavior {
    pub fn merge(&mut self, patch: BehaviorPatch) {
        if let Some(is_focus) = patch.is_focus {
            self.is_focus = is_focus;
        }
        if let Some(has_been_touched) = patch.has_been_touched {
            self.has_been_touched = has_been_touched;
        }
    }
}

/// Live state of one form field.
///
/// `validation_results` describes the last value that was validated, which
/// may lag behind `value` while the user is still typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    pub value: Value,
    pub validation_results: Vec<ValidationResult>,
    pub behavior: FieldBehavior,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        FieldDescriptor {
            name: name.into(),
            value,
            validation_results: Vec::new(),
            behavior: FieldBehavior::default(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validation_results.iter().all(|r| r.passed)
    }

    /// Error messages to display: only once the field has been touched and
    /// is no longer focused.
    pub fn visible_errors(&self) -> Vec<&str> {
        if !self.behavior.has_been_touched || self.behavior.is_focus {
            return Vec::new();
        }
        self.validation_results
            .iter()
            .filter(|r| !r.passed)
            .filter_map(|r| r.error_message.as_deref())
            .collect()
    }

    /// Guide messages to display: only while the field is focused.
    pub fn visible_guides(&self) -> Vec<&str> {
        if !self.behavior.is_focus {
            return Vec::new();
        }
        self.validation_results
            .iter()
            .filter_map(|r| r.guide_message.as_deref())
            .collect()
    }
}
