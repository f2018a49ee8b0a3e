use crate::download::{DownloadSpec, Identity};
use crate::errors::{AutomationError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// One automation job: where to go, what to do there, and how to retry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    pub name: String,
    pub url: String,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_from: Option<Identity>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default)]
    pub failure_wait_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_headless() -> bool {
    true
}

fn default_max_retries() -> u32 {
    1
}

impl AutomationConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            actions,
            viewport: Viewport::default(),
            start_from: None,
            headless: default_headless(),
            failure_wait_seconds: 0,
            max_retries: default_max_retries(),
        }
    }

    pub fn with_start_from(mut self, identity: Identity) -> Self {
        self.start_from = Some(identity);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, failure_wait_seconds: u64) -> Self {
        self.max_retries = max_retries;
        self.failure_wait_seconds = failure_wait_seconds;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&contents)
    }

    /// Checks everything that must hold before the first attempt is made.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.url).map_err(|e| {
            AutomationError::ConfigurationError(format!("invalid url '{}': {}", self.url, e))
        })?;

        if self.max_retries == 0 {
            return Err(AutomationError::ConfigurationError(
                "maxRetries must be at least 1".to_string(),
            ));
        }

        crate::sequence::validate(&self.actions)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    Click,
    InputText,
    Wait,
    CheckElement,
    WhileBegin,
    WhileEnd,
    Break,
    Log,
    Navigate,
    DownloadGenerations,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Click => "click",
            ActionType::InputText => "inputText",
            ActionType::Wait => "wait",
            ActionType::CheckElement => "checkElement",
            ActionType::WhileBegin => "whileBegin",
            ActionType::WhileEnd => "whileEnd",
            ActionType::Break => "break",
            ActionType::Log => "log",
            ActionType::Navigate => "navigate",
            ActionType::DownloadGenerations => "downloadGenerations",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Less,
    Greater,
    Equals,
    Contains,
}

/// Which reading of the target element a condition compares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadAttribute {
    #[default]
    Text,
    Value,
    Count,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Number(f64),
    Text(String),
}

impl Threshold {
    /// Numeric view of the threshold; numeric strings count as numbers.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Threshold::Number(n) => Some(*n),
            Threshold::Text(t) => t.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Threshold::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            Threshold::Number(n) => n.to_string(),
            Threshold::Text(t) => t.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub selector: String,
    pub attribute: ReadAttribute,
    pub operator: Operator,
    pub threshold: Threshold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
    pub condition: Condition,
    pub max_iterations: Option<u32>,
}

/// Typed payload of an action, decided once when the configuration is loaded.
#[derive(Debug, Clone)]
pub enum Step {
    Click,
    InputText { text: String },
    Wait { ms: u64 },
    CheckElement(Condition),
    WhileBegin(LoopSpec),
    WhileEnd,
    Break { condition: Option<Condition> },
    Log { message: String },
    Navigate { url: String },
    DownloadGenerations(DownloadSpec),
}

impl Step {
    pub fn action_type(&self) -> ActionType {
        match self {
            Step::Click => ActionType::Click,
            Step::InputText { .. } => ActionType::InputText,
            Step::Wait { .. } => ActionType::Wait,
            Step::CheckElement(_) => ActionType::CheckElement,
            Step::WhileBegin(_) => ActionType::WhileBegin,
            Step::WhileEnd => ActionType::WhileEnd,
            Step::Break { .. } => ActionType::Break,
            Step::Log { .. } => ActionType::Log,
            Step::Navigate { .. } => ActionType::Navigate,
            Step::DownloadGenerations(_) => ActionType::DownloadGenerations,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawAction", into = "RawAction")]
pub struct Action {
    pub step: Step,
    pub selector: Option<String>,
    pub timeout_ms: Option<u64>,
    pub description: Option<String>,
}

impl Action {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            selector: None,
            timeout_ms: None,
            description: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn action_type(&self) -> ActionType {
        self.step.action_type()
    }

    /// Human readable name used in logs and failures.
    /// The selector this action works on: its own, or else the one carried
    /// by its condition payload.
    pub fn target_selector(&self) -> Option<&str> {
        if let Some(selector) = self.selector.as_deref() {
            return Some(selector);
        }
        match &self.step {
            Step::CheckElement(condition) => Some(&condition.selector),
            Step::WhileBegin(spec) => Some(&spec.condition.selector),
            Step::Break {
                condition: Some(condition),
            } => Some(&condition.selector),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| self.action_type().as_str().to_string())
    }
}

/// Wire form of an action as authored in configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConditionWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selector: Option<String>,
    #[serde(default)]
    attribute: ReadAttribute,
    operator: Operator,
    threshold: Threshold,
}

impl ConditionWire {
    fn resolve(self, fallback: Option<&String>) -> std::result::Result<Condition, String> {
        let selector = self
            .selector
            .or_else(|| fallback.cloned())
            .ok_or_else(|| "condition requires a selector".to_string())?;
        Ok(Condition {
            selector,
            attribute: self.attribute,
            operator: self.operator,
            threshold: self.threshold,
        })
    }
}

impl From<Condition> for ConditionWire {
    fn from(c: Condition) -> Self {
        Self {
            selector: Some(c.selector),
            attribute: c.attribute,
            operator: c.operator,
            threshold: c.threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoopWire {
    condition: ConditionWire,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_iterations: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BreakWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<ConditionWire>,
}

fn payload<T: serde::de::DeserializeOwned>(
    kind: ActionType,
    value: Option<Value>,
) -> std::result::Result<T, String> {
    let value = value.ok_or_else(|| format!("{} requires a value", kind.as_str()))?;
    serde_json::from_value(value).map_err(|e| format!("invalid {} value: {}", kind.as_str(), e))
}

fn text_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl TryFrom<RawAction> for Action {
    type Error = String;

    fn try_from(raw: RawAction) -> std::result::Result<Self, Self::Error> {
        let kind = raw.action_type;
        let require_selector = || {
            raw.selector
                .as_ref()
                .filter(|s| !s.trim().is_empty())
                .map(|_| ())
                .ok_or_else(|| format!("{} requires a selector", kind.as_str()))
        };

        let step = match kind {
            ActionType::Click => {
                require_selector()?;
                Step::Click
            }
            ActionType::InputText => {
                require_selector()?;
                let text = text_value(raw.value.as_ref())
                    .ok_or_else(|| "inputText requires a text value".to_string())?;
                Step::InputText { text }
            }
            ActionType::Wait => {
                let ms = raw
                    .value
                    .as_ref()
                    .and_then(|v| v.as_u64().or_else(|| v.as_str()?.trim().parse().ok()))
                    .or(raw.timeout_ms)
                    .ok_or_else(|| "wait requires a duration in milliseconds".to_string())?;
                Step::Wait { ms }
            }
            ActionType::CheckElement => {
                let wire: ConditionWire = payload(kind, raw.value.clone())?;
                Step::CheckElement(wire.resolve(raw.selector.as_ref())?)
            }
            ActionType::WhileBegin => {
                let wire: LoopWire = payload(kind, raw.value.clone())?;
                Step::WhileBegin(LoopSpec {
                    condition: wire.condition.resolve(raw.selector.as_ref())?,
                    max_iterations: wire.max_iterations,
                })
            }
            ActionType::WhileEnd => Step::WhileEnd,
            ActionType::Break => {
                let wire: BreakWire = match raw.value.clone() {
                    None | Some(Value::Null) => BreakWire::default(),
                    value => payload(kind, value)?,
                };
                let condition = wire
                    .condition
                    .map(|c| c.resolve(raw.selector.as_ref()))
                    .transpose()?;
                Step::Break { condition }
            }
            ActionType::Log => {
                let message = text_value(raw.value.as_ref())
                    .or_else(|| raw.description.clone())
                    .unwrap_or_default();
                Step::Log { message }
            }
            ActionType::Navigate => {
                let url = text_value(raw.value.as_ref())
                    .ok_or_else(|| "navigate requires a url value".to_string())?;
                url::Url::parse(&url).map_err(|e| format!("invalid url '{}': {}", url, e))?;
                Step::Navigate { url }
            }
            ActionType::DownloadGenerations => {
                Step::DownloadGenerations(payload(kind, raw.value.clone())?)
            }
        };

        Ok(Action {
            step,
            selector: raw.selector,
            timeout_ms: raw.timeout_ms,
            description: raw.description,
        })
    }
}

impl From<Action> for RawAction {
    fn from(action: Action) -> Self {
        let action_type = action.action_type();
        let value = match action.step {
            Step::Click | Step::WhileEnd => None,
            Step::InputText { text } => Some(Value::String(text)),
            Step::Wait { ms } => Some(Value::from(ms)),
            Step::CheckElement(c) => serde_json::to_value(ConditionWire::from(c)).ok(),
            Step::WhileBegin(spec) => serde_json::to_value(LoopWire {
                condition: spec.condition.into(),
                max_iterations: spec.max_iterations,
            })
            .ok(),
            Step::Break { condition: None } => None,
            Step::Break { condition } => serde_json::to_value(BreakWire {
                condition: condition.map(Into::into),
            })
            .ok(),
            Step::Log { message } => Some(Value::String(message)),
            Step::Navigate { url } => Some(Value::String(url)),
            Step::DownloadGenerations(spec) => serde_json::to_value(spec).ok(),
        };

        RawAction {
            action_type,
            selector: action.selector,
            value,
            timeout_ms: action.timeout_ms,
            description: action.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_parses_camel_case_schema() {
        let config: AutomationConfig = serde_json::from_value(json!({
            "name": "gallery",
            "url": "https://example.com/gallery",
            "actions": [
                {"type": "click", "selector": "#start", "description": "open"},
                {"type": "wait", "value": 500},
                {"type": "whileBegin", "selector": ".item",
                 "value": {"condition": {"operator": "less", "threshold": 8, "attribute": "count"}}},
                {"type": "break"},
                {"type": "whileEnd"}
            ],
            "viewport": {"width": 800, "height": 600},
            "startFrom": "2024-01-01 10:00#cat",
            "headless": false,
            "failureWaitSeconds": 60,
            "maxRetries": 3
        }))
        .unwrap();

        assert_eq!(config.actions.len(), 5);
        assert_eq!(config.viewport.width, 800);
        assert_eq!(config.failure_wait_seconds, 60);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.start_from.as_ref().map(|i| i.as_str()), Some("2024-01-01 10:00#cat"));
        assert!(matches!(config.actions[1].step, Step::Wait { ms: 500 }));

        match &config.actions[2].step {
            Step::WhileBegin(spec) => {
                assert_eq!(spec.condition.selector, ".item");
                assert_eq!(spec.condition.attribute, ReadAttribute::Count);
                assert_eq!(spec.condition.operator, Operator::Less);
                assert_eq!(spec.condition.threshold.as_number(), Some(8.0));
                assert_eq!(spec.max_iterations, None);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_payload_errors_are_reported_at_load() {
        let missing_selector = serde_json::from_value::<Action>(json!({"type": "click"}));
        assert!(missing_selector.is_err());

        let bad_operator = serde_json::from_value::<Action>(json!({
            "type": "checkElement",
            "selector": "#x",
            "value": {"operator": "between", "threshold": 1}
        }));
        assert!(bad_operator.is_err());

        let unknown_type = serde_json::from_value::<Action>(json!({"type": "teleport"}));
        assert!(unknown_type.is_err());
    }

    #[test]
    fn test_conditional_break_and_wait_fallback() {
        let action: Action = serde_json::from_value(json!({
            "type": "break",
            "selector": "#done",
            "value": {"condition": {"operator": "contains", "threshold": "finished"}}
        }))
        .unwrap();
        match action.step {
            Step::Break {
                condition: Some(condition),
            } => {
                assert_eq!(condition.selector, "#done");
                assert_eq!(condition.attribute, ReadAttribute::Text);
            }
            other => panic!("unexpected step {:?}", other),
        }

        let wait: Action =
            serde_json::from_value(json!({"type": "wait", "timeoutMs": 250})).unwrap();
        assert!(matches!(wait.step, Step::Wait { ms: 250 }));
    }

    #[test]
    fn test_validate_rejects_bad_url_and_zero_retries() {
        let config = AutomationConfig::new("x", "not a url", vec![]);
        assert!(config.validate().is_err());

        let config = AutomationConfig::new("x", "https://example.com", vec![]).with_retries(0, 5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_action_serializes_back_to_wire_form() {
        let action = Action::new(Step::InputText {
            text: "hello".to_string(),
        })
        .with_selector("#q");
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "inputText");
        assert_eq!(value["value"], "hello");
        assert_eq!(value["selector"], "#q");
    }
}
