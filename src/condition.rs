use crate::core::{BrowserDriver, DriverResult};
use crate::types::{Condition, Operator, ReadAttribute, Threshold};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// What was read from the page for a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// No element resolved by any probe
    Missing,
    Count(usize),
    Text(String),
}

/// Evaluates loop and check conditions against the live page.
pub struct ConditionEvaluator<'a, D: BrowserDriver> {
    driver: &'a D,
}

impl<'a, D: BrowserDriver> ConditionEvaluator<'a, D> {
    pub fn new(driver: &'a D) -> Self {
        Self { driver }
    }

    pub async fn evaluate(&self, condition: &Condition) -> DriverResult<bool> {
        let reading = self.read(condition).await?;
        let result = compare(condition.operator, &condition.threshold, &reading);
        debug!(
            selector = %condition.selector,
            operator = ?condition.operator,
            reading = ?reading,
            result,
            "condition evaluated"
        );
        Ok(result)
    }

    pub async fn read(&self, condition: &Condition) -> DriverResult<Reading> {
        let elements = self.locate(&condition.selector).await?;

        match condition.attribute {
            ReadAttribute::Count => Ok(Reading::Count(elements.len())),
            ReadAttribute::Text => match elements.first() {
                Some(element) => Ok(Reading::Text(self.driver.get_text(element).await?)),
                None => Ok(Reading::Missing),
            },
            ReadAttribute::Value => match elements.first() {
                Some(element) => Ok(self
                    .driver
                    .get_value(element)
                    .await?
                    .map_or(Reading::Missing, Reading::Text)),
                None => Ok(Reading::Missing),
            },
        }
    }

    /// Provided selector first, then the driver's enhanced probe.
    async fn locate(&self, selector: &str) -> DriverResult<Vec<D::Element>> {
        let found = self.driver.find_elements(selector).await?;
        if !found.is_empty() {
            return Ok(found);
        }

        let deep = self.driver.find_elements_deep(selector).await?;
        if !deep.is_empty() {
            debug!(selector, matches = deep.len(), "resolved by enhanced probe");
        }
        Ok(deep)
    }
}

/// Applies `operator` to a reading.
///
/// A missing element reads as `0` under numeric comparisons, so an empty
/// collection and a zero count behave the same. `contains` on a missing
/// element is `false`.
pub fn compare(operator: Operator, threshold: &Threshold, reading: &Reading) -> bool {
    if operator == Operator::Contains {
        let needle = threshold.as_text();
        return match reading {
            Reading::Missing => false,
            Reading::Count(n) => n.to_string().contains(&needle),
            Reading::Text(text) => text.contains(&needle),
        };
    }

    let Some(limit) = threshold.as_number() else {
        return match (operator, reading) {
            (Operator::Equals, Reading::Text(text)) => text.trim() == threshold.as_text().trim(),
            (Operator::Equals, Reading::Count(n)) => n.to_string() == threshold.as_text().trim(),
            (Operator::Equals, Reading::Missing) => false,
            _ => {
                warn!(?operator, ?threshold, "numeric operator with a non-numeric threshold");
                false
            }
        };
    };

    let observed = match reading {
        Reading::Missing => 0.0,
        Reading::Count(n) => *n as f64,
        Reading::Text(text) => match first_number(text) {
            Some(value) => value,
            None => {
                warn!(text = %text, ?operator, "no number in element text");
                return false;
            }
        },
    };

    match operator {
        Operator::Less => observed < limit,
        Operator::Greater => observed > limit,
        _ => (observed - limit).abs() < f64::EPSILON,
    }
}

fn first_number(text: &str) -> Option<f64> {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let re = NUMBER.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid number pattern"));
    let cleaned = text.replace(',', "");
    re.find(&cleaned)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDriver, MockNode};

    fn condition(selector: &str, attribute: ReadAttribute, operator: Operator, threshold: Threshold) -> Condition {
        Condition {
            selector: selector.to_string(),
            attribute,
            operator,
            threshold,
        }
    }

    #[tokio::test]
    async fn test_missing_element_less_than_eight_is_true() {
        let driver = MockDriver::new();
        let evaluator = ConditionEvaluator::new(&driver);

        let check = condition("#queue", ReadAttribute::Text, Operator::Less, Threshold::Number(8.0));
        assert!(evaluator.evaluate(&check).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_element_contains_is_false() {
        let driver = MockDriver::new();
        let evaluator = ConditionEvaluator::new(&driver);

        let check = condition(
            "#status",
            ReadAttribute::Text,
            Operator::Contains,
            Threshold::Text("".to_string()),
        );
        assert!(!evaluator.evaluate(&check).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_value_is_treated_as_zero() {
        let driver = MockDriver::new();
        let evaluator = ConditionEvaluator::new(&driver);

        let greater = condition("#n", ReadAttribute::Value, Operator::Greater, Threshold::Number(0.0));
        assert!(!evaluator.evaluate(&greater).await.unwrap());

        let equals = condition("#n", ReadAttribute::Value, Operator::Equals, Threshold::Text("0".into()));
        assert!(evaluator.evaluate(&equals).await.unwrap());
    }

    #[tokio::test]
    async fn test_count_of_empty_collection_matches_zero() {
        let driver = MockDriver::new().with_nodes(".row", vec![]);
        let evaluator = ConditionEvaluator::new(&driver);

        let check = condition(".row", ReadAttribute::Count, Operator::Equals, Threshold::Number(0.0));
        assert!(evaluator.evaluate(&check).await.unwrap());
    }

    #[tokio::test]
    async fn test_enhanced_probe_runs_only_after_provided_selector_misses() {
        let driver = MockDriver::new()
            .with_nodes(".light", vec![MockNode::with_text("3 queued")])
            .with_deep_nodes(".shadow", vec![MockNode::with_text("12 queued")]);
        let evaluator = ConditionEvaluator::new(&driver);

        let light = condition(".light", ReadAttribute::Text, Operator::Less, Threshold::Number(8.0));
        assert!(evaluator.evaluate(&light).await.unwrap());
        assert_eq!(driver.count_calls("deep:"), 0);

        let shadow = condition(".shadow", ReadAttribute::Text, Operator::Less, Threshold::Number(8.0));
        assert!(!evaluator.evaluate(&shadow).await.unwrap());
        assert_eq!(driver.count_calls("deep:.shadow"), 1);

        let shadow_contains = condition(
            ".shadow",
            ReadAttribute::Text,
            Operator::Contains,
            Threshold::Text("queued".into()),
        );
        assert!(evaluator.evaluate(&shadow_contains).await.unwrap());
    }

    #[tokio::test]
    async fn test_value_attribute_reads_input_value() {
        let driver = MockDriver::new().with_nodes("#qty", vec![MockNode::default().with_value("1,250")]);
        let evaluator = ConditionEvaluator::new(&driver);

        let check = condition("#qty", ReadAttribute::Value, Operator::Greater, Threshold::Number(1000.0));
        assert!(evaluator.evaluate(&check).await.unwrap());
    }

    #[test]
    fn test_compare_table() {
        let eight = Threshold::Number(8.0);
        assert!(compare(Operator::Less, &eight, &Reading::Missing));
        assert!(!compare(Operator::Greater, &eight, &Reading::Missing));
        assert!(!compare(Operator::Equals, &eight, &Reading::Missing));
        assert!(compare(Operator::Greater, &eight, &Reading::Count(9)));
        assert!(compare(Operator::Equals, &eight, &Reading::Text("Total: 8".into())));
        assert!(!compare(Operator::Less, &eight, &Reading::Text("none".into())));

        let word = Threshold::Text("done".into());
        assert!(compare(Operator::Contains, &word, &Reading::Text("all done".into())));
        assert!(!compare(Operator::Contains, &word, &Reading::Missing));
        assert!(compare(Operator::Equals, &word, &Reading::Text(" done ".into())));
        assert!(!compare(Operator::Equals, &word, &Reading::Missing));
        assert!(!compare(Operator::Less, &word, &Reading::Text("1".into())));
    }
}
