//! Self-reflective essay writer.
//!
//! `start → plan → research_plan → research ⇄ search(×N) → write`, then
//! `write → reflect → reflection_research → research ⇄ search → write` until
//! the requested number of drafts exists.

pub mod drafts;
pub mod events;
pub mod prompts;
pub mod research;
pub mod steps;

use std::sync::Arc;

use narcissus_core::config::WorkflowConfig;
use narcissus_core::error::Result;
use narcissus_core::event::EventBus;
use narcissus_core::traits::{LlmClient, SearchClient};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::graph::{RunReport, RunSettings, Supervisor, Workflow};

pub use drafts::{DraftProgress, DraftTransition};
pub use events::{EssayEvent, EssayEventKind, Research};
pub use research::{Query, ResearchPlan, ResearchStep, SearchStep};
pub use steps::{PlanStep, ReflectStep, ReflectionResearchStep, ResearchPlanStep, StartStep, WriteStep};

/// Context keys used by the writer's steps.
pub mod keys {
    pub const QUERY: &str = "query";
    pub const PLAN: &str = "plan";
    pub const RESEARCH: &str = "research";
    pub const TEXT: &str = "text";
    pub const REFLECTION: &str = "reflection";
    pub const NUM_DRAFTS_REQUIRED: &str = "num_drafts_required";
    pub const NUM_DRAFTS_COMPLETED: &str = "num_drafts_completed";
}

/// Build the writer's step graph.
pub fn build_graph(
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
    config: &WorkflowConfig,
) -> Result<Workflow<EssayEvent>> {
    Workflow::builder()
        .step(StartStep)
        .step(PlanStep::new(llm.clone()))
        .step(ResearchPlanStep::new(llm.clone()))
        .step(ResearchStep::new(config.research_policy))
        .step(SearchStep::new(search, config.search_workers))
        .step(WriteStep::new(llm.clone()))
        .step(ReflectStep::new(llm.clone()))
        .step(ReflectionResearchStep::new(llm))
        .build()
}

/// The essay writer: its step graph plus the supervisor that runs it.
pub struct WriterWorkflow {
    workflow: Workflow<EssayEvent>,
    supervisor: Supervisor,
}

impl WriterWorkflow {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchClient>,
        config: &WorkflowConfig,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        Ok(Self {
            workflow: build_graph(llm, search, config)?,
            supervisor: Supervisor::new(RunSettings::from(config), bus),
        })
    }

    pub fn workflow(&self) -> &Workflow<EssayEvent> {
        &self.workflow
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.supervisor.cancel_token()
    }

    /// Write an essay on `topic`, revising it until `num_drafts` drafts exist.
    pub async fn run(&self, topic: &str, num_drafts: u32) -> Result<RunReport<String>> {
        self.run_with_cancel(topic, num_drafts, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), also stopping when `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        topic: &str,
        num_drafts: u32,
        cancel: CancellationToken,
    ) -> Result<RunReport<String>> {
        info!(topic = %topic, num_drafts, "Starting essay");
        self.supervisor
            .run_with_cancel(
                &self.workflow,
                EssayEvent::Start {
                    query: topic.to_string(),
                    num_drafts,
                },
                cancel,
            )
            .await
    }

    /// Like [`run`](Self::run), returning only the essay.
    pub async fn start(&self, topic: &str, num_drafts: u32) -> Result<String> {
        Ok(self.run(topic, num_drafts).await?.output)
    }
}
