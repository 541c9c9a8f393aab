//! Compile-time registered tools.
//!
//! These are the runtime-coupled tools that cannot live in a script skill:
//! the confirmation prompt (wired to the gate) and experience accretion
//! (wired to the registry). Each describes itself with the same ParamSpec
//! vocabulary script tools are introspected into.

use crate::events::AgentEvent;
use crate::gate::Decision;
use crate::skills::registry::{SkillRegistry, ToolContext};
use crate::skills::schema::ParamSpec;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

pub type ToolHandler = Box<
    dyn for<'a> Fn(
            &'a Value,
            &'a ToolContext<'a>,
            &'a SkillRegistry,
        ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>
        + Send
        + Sync,
>;

pub struct BuiltinTool {
    pub skill: &'static str,
    pub name: &'static str,
    pub doc: &'static str,
    pub params: Vec<ParamSpec>,
    pub handler: ToolHandler,
}

pub fn builtin_tools() -> Vec<BuiltinTool> {
    vec![
        BuiltinTool {
            skill: "interaction",
            name: "ask_user_confirmation",
            doc: "Ask the user a question or get confirmation (e.g. before deleting files). \
                  Returns the user's decision or reply.",
            params: vec![
                ParamSpec::required("message").describe("The question shown to the user")
            ],
            handler: Box::new(|args, ctx, _registry| {
                Box::pin(handle_ask_user_confirmation(args, ctx))
            }),
        },
        BuiltinTool {
            skill: "meta-tools",
            name: "update_experience",
            doc: "Record a lesson learned for a skill so future runs benefit from it.",
            params: vec![
                ParamSpec::required("skill_name").describe("Name of the skill to update"),
                ParamSpec::required("experience").describe("The lesson learned"),
            ],
            handler: Box::new(|args, _ctx, registry| {
                Box::pin(handle_update_experience(args, registry))
            }),
        },
    ]
}

async fn handle_ask_user_confirmation(
    args: &Value,
    ctx: &ToolContext<'_>,
) -> Result<String, String> {
    let message = args
        .get("message")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "Missing required argument: message".to_string())?;

    let gate = ctx
        .gate
        .ok_or_else(|| "No confirmation gate available".to_string())?;
    let rx = gate.request().map_err(|e| e.to_string())?;
    if let Some(events) = ctx.events {
        let _ = events.send(AgentEvent::ConfirmationRequested(message.to_string()));
    }

    // Blocks until the presentation layer answers; a dropped responder
    // counts as denial.
    let decision = rx.await.unwrap_or(Decision::Denied);
    Ok(match decision {
        Decision::Approved => "User confirmed: yes".to_string(),
        Decision::Denied => "User denied the request.".to_string(),
        Decision::Reply(text) => format!("User replied: {}", text),
    })
}

async fn handle_update_experience(
    args: &Value,
    registry: &SkillRegistry,
) -> Result<String, String> {
    let skill_name = args
        .get("skill_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "Missing required argument: skill_name".to_string())?;
    let experience = args
        .get("experience")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "Missing required argument: experience".to_string())?;

    registry.append_experience(skill_name, experience)?;
    Ok(format!("Recorded lesson for skill '{}'.", skill_name))
}

/// Run a handler future, converting panics into plain errors so a broken
/// tool can never take down the turn loop.
pub async fn run_guarded<'a>(
    fut: Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>,
) -> Result<String, String> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err("tool panicked".to_string()),
    }
}
