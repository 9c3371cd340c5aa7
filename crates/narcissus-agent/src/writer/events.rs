use std::collections::BTreeMap;
use std::fmt;

use narcissus_core::types::SearchHit;

use super::research::ResearchPlan;
use crate::graph::Event;

/// Accumulated search results, keyed by query text.
pub type Research = BTreeMap<String, Vec<SearchHit>>;

/// Events exchanged by the essay writer's steps.
#[derive(Debug, Clone, PartialEq)]
pub enum EssayEvent {
    /// Seed event: topic and number of drafts to write.
    Start { query: String, num_drafts: u32 },
    /// Run state has been initialised.
    Init,
    /// Essay outline.
    Plan { plan: String },
    /// Queries for the outline.
    ResearchPlan { plan: ResearchPlan },
    /// Queries for the latest critique.
    ReflectionResearch { plan: ResearchPlan },
    /// One query to fan out.
    Search { query: String },
    /// Results for `query` are in the context.
    SearchComplete { query: String },
    /// Every search of the batch has finished.
    Research { research: Research },
    /// A draft that still needs review.
    Write { text: String },
    /// Critique of the latest draft.
    Reflect { reflection: String },
    /// Final essay.
    Stop { result: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EssayEventKind {
    Start,
    Init,
    Plan,
    ResearchPlan,
    ReflectionResearch,
    Search,
    SearchComplete,
    Research,
    Write,
    Reflect,
    Stop,
}

impl EssayEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Init => "init",
            Self::Plan => "plan",
            Self::ResearchPlan => "research_plan",
            Self::ReflectionResearch => "reflection_research",
            Self::Search => "search",
            Self::SearchComplete => "search_complete",
            Self::Research => "research",
            Self::Write => "write",
            Self::Reflect => "reflect",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for EssayEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event for EssayEvent {
    type Kind = EssayEventKind;
    type Output = String;

    const STOP: EssayEventKind = EssayEventKind::Stop;

    fn kind(&self) -> EssayEventKind {
        match self {
            Self::Start { .. } => EssayEventKind::Start,
            Self::Init => EssayEventKind::Init,
            Self::Plan { .. } => EssayEventKind::Plan,
            Self::ResearchPlan { .. } => EssayEventKind::ResearchPlan,
            Self::ReflectionResearch { .. } => EssayEventKind::ReflectionResearch,
            Self::Search { .. } => EssayEventKind::Search,
            Self::SearchComplete { .. } => EssayEventKind::SearchComplete,
            Self::Research { .. } => EssayEventKind::Research,
            Self::Write { .. } => EssayEventKind::Write,
            Self::Reflect { .. } => EssayEventKind::Reflect,
            Self::Stop { .. } => EssayEventKind::Stop,
        }
    }

    fn into_output(self) -> Result<String, Self> {
        match self {
            Self::Stop { result } => Ok(result),
            other => Err(other),
        }
    }
}
