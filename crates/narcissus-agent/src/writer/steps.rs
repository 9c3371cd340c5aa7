use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, info};

use narcissus_core::error::{NarcissusError, Result};
use narcissus_core::prompts::render;
use narcissus_core::traits::{predict, LlmClient};

use super::drafts::{DraftProgress, DraftTransition};
use super::events::{EssayEvent, EssayEventKind};
use super::keys;
use super::prompts::{
    DRAFT_MATERIAL, PLAN_PROMPT, REFLECTION_PROMPT, RESEARCH_CRITIQUE_PROMPT,
    RESEARCH_PLAN_PROMPT, WRITER_PROMPT,
};
use super::research::{format_research, ResearchPlan};
use crate::graph::{Context, Event, Step, StepOutput};

/// Error for an event the router should never have handed to `step`.
pub(crate) fn unexpected(step: &str, event: &EssayEvent) -> NarcissusError {
    NarcissusError::Unrouted(format!("{} (not handled by step '{}')", event.kind(), step))
}

/// Seeds the run state from the start event.
pub struct StartStep;

impl Step<EssayEvent> for StartStep {
    fn name(&self) -> &str {
        "start"
    }

    fn accepts(&self) -> &[EssayEventKind] {
        &[EssayEventKind::Start]
    }

    fn emits(&self) -> &[EssayEventKind] {
        &[EssayEventKind::Init]
    }

    fn handle(&self, ctx: Context, event: EssayEvent) -> BoxFuture<'_, Result<StepOutput<EssayEvent>>> {
        Box::pin(async move {
            let (query, num_drafts) = match event {
                EssayEvent::Start { query, num_drafts } => (query, num_drafts),
                other => return Err(unexpected(self.name(), &other)),
            };

            let progress = DraftProgress::new(num_drafts);
            ctx.update(|data| {
                data.insert(keys::QUERY.into(), Value::String(query));
                data.insert(keys::PLAN.into(), Value::String(String::new()));
                data.insert(keys::RESEARCH.into(), json!({}));
                data.insert(keys::TEXT.into(), Value::String(String::new()));
                data.insert(keys::REFLECTION.into(), Value::String(String::new()));
                data.insert(keys::NUM_DRAFTS_REQUIRED.into(), json!(progress.required));
                data.insert(keys::NUM_DRAFTS_COMPLETED.into(), json!(progress.completed));
            })
            .await;

            Ok(StepOutput::one(EssayEvent::Init))
        })
    }
}

/// Writes the essay outline.
pub struct PlanStep {
    llm: Arc<dyn LlmClient>,
}

impl PlanStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

impl Step<EssayEvent> for PlanStep {
    fn name(&self) -> &str {
        "plan"
    }

    fn accepts(&self) -> &[EssayEventKind] {
        &[EssayEventKind::Init]
    }

    fn emits(&self) -> &[EssayEventKind] {
        &[EssayEventKind::Plan]
    }

    fn handle(&self, ctx: Context, _event: EssayEvent) -> BoxFuture<'_, Result<StepOutput<EssayEvent>>> {
        Box::pin(async move {
            let topic = ctx.get_str(keys::QUERY).await?;
            let prompt = render(PLAN_PROMPT, &[("topic", topic.as_str())])?;
            let plan = self.llm.complete(prompt).await?;
            ctx.set(keys::PLAN, &plan).await?;
            Ok(StepOutput::one(EssayEvent::Plan { plan }))
        })
    }
}

/// Turns the outline into search queries.
pub struct ResearchPlanStep {
    llm: Arc<dyn LlmClient>,
}

impl ResearchPlanStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

impl Step<EssayEvent> for ResearchPlanStep {
    fn name(&self) -> &str {
        "research_plan"
    }

    fn accepts(&self) -> &[EssayEventKind] {
        &[EssayEventKind::Plan]
    }

    fn emits(&self) -> &[EssayEventKind] {
        &[EssayEventKind::ResearchPlan]
    }

    fn handle(&self, _ctx: Context, event: EssayEvent) -> BoxFuture<'_, Result<StepOutput<EssayEvent>>> {
        Box::pin(async move {
            let outline = match event {
                EssayEvent::Plan { plan } => plan,
                other => return Err(unexpected(self.name(), &other)),
            };
            let plan: ResearchPlan =
                predict(self.llm.as_ref(), RESEARCH_PLAN_PROMPT, &[("outline", outline.as_str())]).await?;
            debug!(queries = plan.queries.len(), "Research plan ready");
            Ok(StepOutput::one(EssayEvent::ResearchPlan { plan }))
        })
    }
}

/// Writes the next draft, or stops once enough drafts exist.
pub struct WriteStep {
    llm: Arc<dyn LlmClient>,
}

impl WriteStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

fn read_count(data: &HashMap<String, Value>, key: &str) -> Result<u32> {
    let value = data
        .get(key)
        .ok_or_else(|| NarcissusError::MissingKey(key.to_string()))?;
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| NarcissusError::TypeMismatch {
            key: key.to_string(),
            expected: "a draft count",
        })
}

impl Step<EssayEvent> for WriteStep {
    fn name(&self) -> &str {
        "write"
    }

    fn accepts(&self) -> &[EssayEventKind] {
        &[EssayEventKind::Research]
    }

    fn emits(&self) -> &[EssayEventKind] {
        &[EssayEventKind::Write, EssayEventKind::Stop]
    }

    fn handle(&self, ctx: Context, event: EssayEvent) -> BoxFuture<'_, Result<StepOutput<EssayEvent>>> {
        Box::pin(async move {
            let research = match event {
                EssayEvent::Research { research } => research,
                other => return Err(unexpected(self.name(), &other)),
            };

            let (transition, progress) = ctx
                .update(|data| -> Result<_> {
                    let mut progress = DraftProgress {
                        completed: read_count(data, keys::NUM_DRAFTS_COMPLETED)?,
                        required: read_count(data, keys::NUM_DRAFTS_REQUIRED)?,
                    };
                    let transition = progress.advance();
                    data.insert(keys::NUM_DRAFTS_COMPLETED.into(), json!(progress.completed));
                    Ok((transition, progress))
                })
                .await?;

            let (draft, last) = match transition {
                DraftTransition::Finish => {
                    info!(drafts = progress.completed, "Essay complete");
                    let result = ctx.get_str(keys::TEXT).await?;
                    return Ok(StepOutput::one(EssayEvent::Stop { result }));
                }
                DraftTransition::Write { draft, last } => (draft, last),
            };

            info!(draft, required = progress.required, "Writing draft");
            let outline = ctx.get_str(keys::PLAN).await?;
            let previous = ctx.get_str(keys::TEXT).await?;
            let critique = ctx.get_str(keys::REFLECTION).await?;
            let research_text = format_research(&research);
            let material = render(
                DRAFT_MATERIAL,
                &[
                    ("outline", outline.as_str()),
                    ("research", research_text.as_str()),
                    ("draft", previous.as_str()),
                    ("critique", critique.as_str()),
                ],
            )?;
            let prompt = render(WRITER_PROMPT, &[("content", material.as_str())])?;

            let text = self.llm.complete(prompt).await?;
            ctx.set(keys::TEXT, &text).await?;

            if last {
                info!(drafts = draft, "Essay complete");
                Ok(StepOutput::one(EssayEvent::Stop { result: text }))
            } else {
                Ok(StepOutput::one(EssayEvent::Write { text }))
            }
        })
    }
}

/// Critiques the latest draft.
pub struct ReflectStep {
    llm: Arc<dyn LlmClient>,
}

impl ReflectStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

impl Step<EssayEvent> for ReflectStep {
    fn name(&self) -> &str {
        "reflect"
    }

    fn accepts(&self) -> &[EssayEventKind] {
        &[EssayEventKind::Write]
    }

    fn emits(&self) -> &[EssayEventKind] {
        &[EssayEventKind::Reflect]
    }

    fn handle(&self, ctx: Context, _event: EssayEvent) -> BoxFuture<'_, Result<StepOutput<EssayEvent>>> {
        Box::pin(async move {
            let essay = ctx.get_str(keys::TEXT).await?;
            let prompt = render(REFLECTION_PROMPT, &[("essay", essay.as_str())])?;
            let reflection = self.llm.complete(prompt).await?;
            ctx.set(keys::REFLECTION, &reflection).await?;
            Ok(StepOutput::one(EssayEvent::Reflect { reflection }))
        })
    }
}

/// Turns the critique into search queries.
pub struct ReflectionResearchStep {
    llm: Arc<dyn LlmClient>,
}

impl ReflectionResearchStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

impl Step<EssayEvent> for ReflectionResearchStep {
    fn name(&self) -> &str {
        "reflection_research"
    }

    fn accepts(&self) -> &[EssayEventKind] {
        &[EssayEventKind::Reflect]
    }

    fn emits(&self) -> &[EssayEventKind] {
        &[EssayEventKind::ReflectionResearch]
    }

    fn handle(&self, _ctx: Context, event: EssayEvent) -> BoxFuture<'_, Result<StepOutput<EssayEvent>>> {
        Box::pin(async move {
            let critique = match event {
                EssayEvent::Reflect { reflection } => reflection,
                other => return Err(unexpected(self.name(), &other)),
            };
            let plan: ResearchPlan =
                predict(self.llm.as_ref(), RESEARCH_CRITIQUE_PROMPT, &[("critique", critique.as_str())])
                    .await?;
            Ok(StepOutput::one(EssayEvent::ReflectionResearch { plan }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narcissus_test_utils::ScriptedLlm;

    async fn started(num_drafts: u32) -> Context {
        let ctx = Context::new();
        StartStep
            .handle(
                ctx.clone(),
                EssayEvent::Start {
                    query: "tides".into(),
                    num_drafts,
                },
            )
            .await
            .unwrap();
        ctx
    }

    fn research() -> EssayEvent {
        EssayEvent::Research {
            research: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_start_initialises_state() {
        let ctx = started(2).await;
        assert_eq!(ctx.get_str(keys::QUERY).await.unwrap(), "tides");
        assert_eq!(ctx.get(keys::RESEARCH).await.unwrap(), json!({}));
        assert_eq!(ctx.get_as::<u32>(keys::NUM_DRAFTS_REQUIRED).await.unwrap(), 2);
        assert_eq!(ctx.get_as::<u32>(keys::NUM_DRAFTS_COMPLETED).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_with_zero_drafts_stops_empty() {
        let llm = Arc::new(ScriptedLlm::new());
        let step = WriteStep::new(llm.clone());
        let ctx = started(0).await;

        match step.handle(ctx, research()).await.unwrap() {
            StepOutput::Emit(events) => assert_eq!(
                events,
                vec![EssayEvent::Stop {
                    result: String::new()
                }]
            ),
            StepOutput::Pending => panic!("write never waits"),
        }
        assert!(llm.completions().is_empty());
    }

    #[tokio::test]
    async fn test_write_loops_until_required() {
        let llm = Arc::new(ScriptedLlm::new().on_complete("essay assistant", "Draft"));
        let step = WriteStep::new(llm.clone());
        let ctx = started(2).await;

        let first = step.handle(ctx.clone(), research()).await.unwrap();
        assert!(matches!(
            first,
            StepOutput::Emit(ref events) if events == &vec![EssayEvent::Write { text: "Draft".into() }]
        ));

        let second = step.handle(ctx.clone(), research()).await.unwrap();
        assert!(matches!(
            second,
            StepOutput::Emit(ref events) if events == &vec![EssayEvent::Stop { result: "Draft".into() }]
        ));
        assert_eq!(ctx.get_as::<u32>(keys::NUM_DRAFTS_COMPLETED).await.unwrap(), 2);
        assert_eq!(llm.completions_matching("essay assistant"), 2);
    }

    #[tokio::test]
    async fn test_write_prompt_carries_context() {
        let llm = Arc::new(ScriptedLlm::new());
        let step = WriteStep::new(llm.clone());
        let ctx = started(1).await;
        ctx.set(keys::PLAN, "Intro, body, end").await.unwrap();
        ctx.set(keys::REFLECTION, "More sources").await.unwrap();

        step.handle(ctx, research()).await.unwrap();
        let prompt = &llm.completions()[0];
        assert!(prompt.contains("Intro, body, end"));
        assert!(prompt.contains("More sources"));
    }

    #[tokio::test]
    async fn test_write_without_counters_is_missing_key() {
        let step = WriteStep::new(Arc::new(ScriptedLlm::new()));
        let err = step.handle(Context::new(), research()).await.unwrap_err();
        assert!(matches!(err, NarcissusError::MissingKey(_)));
    }

    #[tokio::test]
    async fn test_reflection_research_predicts_plan() {
        let llm = Arc::new(ScriptedLlm::new().on_plan("Cite more", &["tidal energy"]));
        let step = ReflectionResearchStep::new(llm);
        let out = step
            .handle(
                Context::new(),
                EssayEvent::Reflect {
                    reflection: "Cite more".into(),
                },
            )
            .await
            .unwrap();
        match out {
            StepOutput::Emit(events) => assert_eq!(
                events,
                vec![EssayEvent::ReflectionResearch {
                    plan: ResearchPlan::from_queries(["tidal energy"])
                }]
            ),
            StepOutput::Pending => panic!("unexpected pending"),
        }
    }

    #[tokio::test]
    async fn test_unexpected_event_is_unrouted() {
        let llm = Arc::new(ScriptedLlm::new());
        let step = ResearchPlanStep::new(llm.clone());
        let err = step.handle(Context::new(), EssayEvent::Init).await.unwrap_err();
        match err {
            NarcissusError::Unrouted(msg) => {
                assert!(msg.starts_with("init"));
                assert!(msg.contains("research_plan"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(llm.predictions().is_empty());
    }
}
