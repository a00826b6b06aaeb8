//! Schema-checked parsing of planning and reflection replies.

use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use jsonschema::{Draft, Validator};
use serde::Deserialize;
use serde_json::Value;

use crate::core::response::parse_json_object;
use crate::core::transitions::ReflectionVerdict;
use crate::core::types::Action;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
const REFLECTION_SCHEMA: &str = include_str!("../../schemas/reflection.schema.json");

static PLAN_VALIDATOR: LazyLock<Validator> =
    LazyLock::new(|| compile(PLAN_SCHEMA, "plan schema should be valid"));
static REFLECTION_VALIDATOR: LazyLock<Validator> =
    LazyLock::new(|| compile(REFLECTION_SCHEMA, "reflection schema should be valid"));

fn compile(raw: &str, message: &str) -> Validator {
    let schema: Value = serde_json::from_str(raw).expect(message);
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect(message)
}

/// Output of the planning step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Plan {
    pub plan: String,
    pub actions: Vec<Action>,
}

/// Output of the reflection step.
#[derive(Debug, Clone, PartialEq)]
pub struct Reflection {
    pub verdict: ReflectionVerdict,
    /// The model's claim that the task is done; the workflow still decides.
    pub complete: bool,
    pub summary: String,
    pub next_action: Option<Action>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawVerdict {
    Continue,
    Stop,
}

#[derive(Debug, Deserialize)]
struct RawReflection {
    decision: RawVerdict,
    complete: bool,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    next_action: Option<Action>,
}

/// Parse a planning reply into a [`Plan`].
pub fn parse_plan(raw: &str) -> Result<Plan> {
    let value = parse_json_object(raw)?;
    validate(&PLAN_VALIDATOR, &value, "plan")?;
    serde_json::from_value(value).context("deserialize plan")
}

/// Parse a reflection reply into a [`Reflection`].
pub fn parse_reflection(raw: &str) -> Result<Reflection> {
    let value = parse_json_object(raw)?;
    validate(&REFLECTION_VALIDATOR, &value, "reflection")?;
    let raw: RawReflection = serde_json::from_value(value).context("deserialize reflection")?;
    Ok(Reflection {
        verdict: match raw.decision {
            RawVerdict::Continue => ReflectionVerdict::Continue,
            RawVerdict::Stop => ReflectionVerdict::Stop,
        },
        complete: raw.complete,
        summary: raw.summary,
        next_action: raw.next_action,
    })
}

fn validate(validator: &Validator, instance: &Value, what: &str) -> Result<()> {
    let messages: Vec<String> = validator
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("{what} failed schema validation:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
