/// Flow-control modules: condition blocks, repeat markers and delays
///
/// These handlers only record state; the run controller reads the branch tag
/// and repeat intent off the output and decides what executes next.

use super::{option_key, ModuleContext, ModuleHandler, ModuleOutput, RepeatIntent};
use crate::error::ModuleError;
use crate::runtime::variables::keys;
use async_trait::async_trait;
use serde_json::{json, Value};

pub const DEFAULT_TRUE_BRANCH: &str = "if_true";
pub const DEFAULT_FALSE_BRANCH: &str = "if_false";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Contains,
    Equals,
    Greater,
    Less,
    NotContains,
    Empty,
}

impl Comparison {
    /// Canonical tags, display labels and a few operator spellings
    pub fn parse(value: &str) -> Option<Self> {
        match option_key(value).as_str() {
            "" | "equals" | "equal" | "eq" | "==" | "=" | "等于" => Some(Comparison::Equals),
            "contains" | "包含" => Some(Comparison::Contains),
            "greater" | "greater_than" | "gt" | ">" | "大于" => Some(Comparison::Greater),
            "less" | "less_than" | "lt" | "<" | "小于" => Some(Comparison::Less),
            "not_contains" | "does_not_contain" | "不包含" => Some(Comparison::NotContains),
            "empty" | "is_empty" | "为空" => Some(Comparison::Empty),
            _ => None,
        }
    }

    pub fn evaluate(self, input: &str, compare: &str) -> bool {
        match self {
            Comparison::Contains => input.contains(compare),
            Comparison::NotContains => !input.contains(compare),
            Comparison::Equals => input == compare,
            Comparison::Greater => numeric(input, compare).is_some_and(|(a, b)| a > b),
            Comparison::Less => numeric(input, compare).is_some_and(|(a, b)| a < b),
            Comparison::Empty => {
                input.is_empty() || matches!(input.to_lowercase().as_str(), "null" | "none")
            }
        }
    }
}

fn numeric(a: &str, b: &str) -> Option<(f64, f64)> {
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

pub struct Condition;

#[async_trait]
impl ModuleHandler for Condition {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let input = ctx.resolve("input");
        let compare = ctx.resolve("compare_value");
        let operator = ctx.raw_text("condition");
        let true_branch = ctx.resolve_or("true_branch", DEFAULT_TRUE_BRANCH);
        let false_branch = ctx.resolve_or("false_branch", DEFAULT_FALSE_BRANCH);

        let outcome = match Comparison::parse(&operator) {
            Some(comparison) => comparison.evaluate(&input, &compare),
            None => {
                ctx.log
                    .warning(
                        format!("Unknown condition '{operator}' in '{}', treated as false", ctx.module.display_name()),
                        None,
                    )
                    .await;
                false
            }
        };
        let branch = if outcome { true_branch } else { false_branch };

        ctx.log
            .debug(
                format!("Condition '{}' -> {outcome}, branch {branch}", ctx.module.display_name()),
                Some(json!({ "input": input, "condition": operator, "compare_value": compare })),
            )
            .await;

        ctx.variables.set(keys::CONDITION_RESULT, outcome);
        ctx.variables.set(keys::CURRENT_BRANCH, branch.as_str());
        Ok(ModuleOutput::new(outcome).with_branch(branch))
    }
}

pub struct ConditionEnd;

#[async_trait]
impl ModuleHandler for ConditionEnd {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        ctx.variables.remove(keys::CONDITION_RESULT);
        ctx.variables.remove(keys::CURRENT_BRANCH);
        Ok(ModuleOutput::new("condition block closed"))
    }
}

pub struct Repeat;

#[async_trait]
impl ModuleHandler for Repeat {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let target = ctx.resolve("target_module").trim().to_string();
        let times = ctx.integer("times", 1)?.clamp(0, u32::MAX as i64) as u32;
        let interval = ctx.seconds("interval", 0.0)?;

        ctx.variables.set(keys::REPEAT_MODULE, target.as_str());
        ctx.variables.set(keys::REPEAT_TIMES, times);
        ctx.variables.set(keys::REPEAT_CURRENT, 0);

        Ok(
            ModuleOutput::new(Value::String(format!("repeat module {target} {times} times"))).with_repeat(
                RepeatIntent {
                    target,
                    times,
                    interval,
                },
            ),
        )
    }
}

pub struct Delay;

#[async_trait]
impl ModuleHandler for Delay {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let duration = ctx.seconds("seconds", 5.0)?;
        ctx.log
            .debug(
                format!("⏳ '{}' sleeping {:.3}s", ctx.module.display_name(), duration.as_secs_f64()),
                None,
            )
            .await;
        tokio::time::sleep(duration).await;
        Ok(ModuleOutput::new(duration.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::runtime::variables::Variables;
    use crate::workflow::types::ModuleType;
    use std::time::Duration;

    fn condition(input: &str, operator: &str, compare: &str) -> crate::workflow::types::Module {
        testing::module(ModuleType::Condition)
            .with("input", input)
            .with("condition", operator)
            .with("compare_value", compare)
    }

    #[tokio::test]
    async fn equals_selects_the_matching_branch() {
        let mut vars = Variables::new();
        let output = testing::run(&Condition, &condition("5", "equals", "5"), &mut vars)
            .await
            .unwrap();
        assert_eq!(output.value, json!(true));
        assert_eq!(output.branch.as_deref(), Some("if_true"));
        assert_eq!(vars.current_branch(), Some("if_true"));
        assert_eq!(vars.get(keys::CONDITION_RESULT), Some(&json!(true)));

        let output = testing::run(&Condition, &condition("5", "Equals", "6"), &mut vars)
            .await
            .unwrap();
        assert_eq!(output.value, json!(false));
        assert_eq!(output.branch.as_deref(), Some("if_false"));
    }

    #[test]
    fn comparisons() {
        assert!(Comparison::parse("Not Contains").unwrap().evaluate("abc", "x"));
        assert!(Comparison::Contains.evaluate("abc", "b"));
        assert!(Comparison::Greater.evaluate("10", "9.5"));
        assert!(!Comparison::Greater.evaluate("ten", "9"));
        assert!(!Comparison::Less.evaluate("1", ""));
        assert!(Comparison::Empty.evaluate("", "ignored"));
        assert!(Comparison::Empty.evaluate("NULL", ""));
        assert!(Comparison::Empty.evaluate("None", ""));
        assert!(!Comparison::Empty.evaluate("0", ""));
        assert_eq!(Comparison::parse("bogus"), None);
    }

    #[test]
    fn chinese_labels_select_the_same_comparison() {
        assert_eq!(Comparison::parse("等于"), Some(Comparison::Equals));
        assert_eq!(Comparison::parse("包含"), Some(Comparison::Contains));
        assert_eq!(Comparison::parse("大于"), Some(Comparison::Greater));
        assert_eq!(Comparison::parse("小于"), Some(Comparison::Less));
        assert_eq!(Comparison::parse("不包含"), Some(Comparison::NotContains));
        assert_eq!(Comparison::parse("为空"), Some(Comparison::Empty));
    }

    #[tokio::test]
    async fn custom_branch_tags_and_unknown_operator() {
        let module = condition("x", "bogus", "x")
            .with("true_branch", "yes")
            .with("false_branch", "no");
        let output = testing::run(&Condition, &module, &mut Variables::new())
            .await
            .unwrap();
        assert_eq!(output.branch.as_deref(), Some("no"));
    }

    #[tokio::test]
    async fn condition_end_clears_block_state() {
        let mut vars = Variables::new();
        testing::run(&Condition, &condition("a", "equals", "a"), &mut vars)
            .await
            .unwrap();
        testing::run(&ConditionEnd, &testing::module(ModuleType::ConditionEnd), &mut vars)
            .await
            .unwrap();
        assert!(!vars.contains(keys::CURRENT_BRANCH));
        assert!(!vars.contains(keys::CONDITION_RESULT));
    }

    #[tokio::test]
    async fn repeat_records_its_intent() {
        let module = testing::module(ModuleType::Repeat)
            .with("target_module", " 2 ")
            .with("times", "3")
            .with("interval", 0.5);
        let mut vars = Variables::new();
        let output = testing::run(&Repeat, &module, &mut vars).await.unwrap();
        assert_eq!(
            output.repeat,
            Some(RepeatIntent {
                target: "2".into(),
                times: 3,
                interval: Duration::from_millis(500),
            })
        );
        assert_eq!(vars.text(keys::REPEAT_MODULE).as_deref(), Some("2"));
        assert_eq!(vars.get(keys::REPEAT_TIMES), Some(&json!(3)));
        assert_eq!(vars.get(keys::REPEAT_CURRENT), Some(&json!(0)));
    }

    #[tokio::test]
    async fn negative_repeat_count_is_zero() {
        let module = testing::module(ModuleType::Repeat)
            .with("target_module", "1")
            .with("times", -4);
        let output = testing::run(&Repeat, &module, &mut Variables::new()).await.unwrap();
        assert_eq!(output.repeat.map(|r| r.times), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_sleeps_for_the_configured_time() {
        let module = testing::module(ModuleType::Delay).with("seconds", 2);
        let started = tokio::time::Instant::now();
        testing::run(&Delay, &module, &mut Variables::new()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
