use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{debug, info};

use narcissus_core::config::ResearchPolicy;
use narcissus_core::error::Result;
use narcissus_core::traits::{SearchClient, StructuredOutput};

use super::events::{EssayEvent, EssayEventKind, Research};
use super::keys;
use super::steps::unexpected;
use crate::graph::{Barrier, Collector, Context, Step, StepOutput};

/// One web search query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub query: String,
}

/// Queries the LLM proposes for an outline or a critique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub queries: Vec<Query>,
}

impl ResearchPlan {
    pub fn from_queries<I, S>(queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queries: queries
                .into_iter()
                .map(|q| Query { query: q.into() })
                .collect(),
        }
    }
}

impl StructuredOutput for ResearchPlan {
    fn name() -> &'static str {
        "ResearchPlan"
    }

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "description": "All of the queries to search for",
                    "items": {
                        "type": "object",
                        "properties": {
                            "query": {
                                "type": "string",
                                "description": "The query to search for"
                            }
                        },
                        "required": ["query"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["queries"],
            "additionalProperties": false
        })
    }
}

/// Distinct queries of `plan` that a batch should search, in plan order.
pub fn queries_to_search(
    plan: &ResearchPlan,
    existing: &Research,
    policy: ResearchPolicy,
) -> Vec<String> {
    let mut seen = HashSet::new();
    plan.queries
        .iter()
        .map(|q| q.query.as_str())
        .filter(|q| seen.insert(*q))
        .filter(|q| policy == ResearchPolicy::Always || !existing.contains_key(*q))
        .map(str::to_string)
        .collect()
}

/// Render accumulated research as prompt material.
pub fn format_research(research: &Research) -> String {
    let mut out = String::new();
    for (query, hits) in research {
        let _ = writeln!(out, "## {}", query);
        for hit in hits {
            match &hit.title {
                Some(title) => {
                    let _ = writeln!(out, "- {} ({}): {}", title, hit.source, hit.content);
                }
                None => {
                    let _ = writeln!(out, "- {}: {}", hit.source, hit.content);
                }
            }
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Fan-out worker: runs one query and merges its results into the research map.
pub struct SearchStep {
    search: Arc<dyn SearchClient>,
    workers: usize,
}

impl SearchStep {
    pub fn new(search: Arc<dyn SearchClient>, workers: usize) -> Self {
        Self { search, workers }
    }
}

impl Step<EssayEvent> for SearchStep {
    fn name(&self) -> &str {
        "search"
    }

    fn accepts(&self) -> &[EssayEventKind] {
        &[EssayEventKind::Search]
    }

    fn emits(&self) -> &[EssayEventKind] {
        &[EssayEventKind::SearchComplete]
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn handle(&self, ctx: Context, event: EssayEvent) -> BoxFuture<'_, Result<StepOutput<EssayEvent>>> {
        Box::pin(async move {
            let query = match event {
                EssayEvent::Search { query } => query,
                other => return Err(unexpected(self.name(), &other)),
            };

            let hits = self.search.search(query.clone()).await?;
            debug!(query = %query, hits = hits.len(), "Search returned");

            let mut partial = Map::new();
            partial.insert(query.clone(), serde_json::to_value(hits)?);
            ctx.merge_into(keys::RESEARCH, partial).await?;

            Ok(StepOutput::one(EssayEvent::SearchComplete { query }))
        })
    }
}

/// Opens a search batch per research plan and joins its completions.
pub struct ResearchStep {
    collector: Collector,
    policy: ResearchPolicy,
}

impl ResearchStep {
    pub fn new(policy: ResearchPolicy) -> Self {
        Self {
            collector: Collector::new("research"),
            policy,
        }
    }

    async fn open_batch(&self, ctx: &Context, plan: &ResearchPlan) -> Result<StepOutput<EssayEvent>> {
        let research: Research = ctx.get_as(keys::RESEARCH).await?;
        let queries = queries_to_search(plan, &research, self.policy);
        info!(
            planned = plan.queries.len(),
            searching = queries.len(),
            "Research batch opened"
        );

        match self.collector.open(ctx, queries.len()).await? {
            Barrier::Released => Ok(StepOutput::one(EssayEvent::Research { research })),
            Barrier::Waiting { .. } => Ok(StepOutput::many(
                queries
                    .into_iter()
                    .map(|query| EssayEvent::Search { query })
                    .collect(),
            )),
        }
    }
}

impl Step<EssayEvent> for ResearchStep {
    fn name(&self) -> &str {
        "research"
    }

    fn accepts(&self) -> &[EssayEventKind] {
        &[
            EssayEventKind::ResearchPlan,
            EssayEventKind::ReflectionResearch,
            EssayEventKind::SearchComplete,
        ]
    }

    fn emits(&self) -> &[EssayEventKind] {
        &[EssayEventKind::Search, EssayEventKind::Research]
    }

    fn handle(&self, ctx: Context, event: EssayEvent) -> BoxFuture<'_, Result<StepOutput<EssayEvent>>> {
        Box::pin(async move {
            match event {
                EssayEvent::ResearchPlan { plan } | EssayEvent::ReflectionResearch { plan } => {
                    self.open_batch(&ctx, &plan).await
                }
                EssayEvent::SearchComplete { query } => match self.collector.arrive(&ctx).await? {
                    Barrier::Released => {
                        debug!(query = %query, "Research batch complete");
                        let research = ctx.get_as(keys::RESEARCH).await?;
                        Ok(StepOutput::one(EssayEvent::Research { research }))
                    }
                    Barrier::Waiting { received, expected } => {
                        debug!(query = %query, received, expected, "Waiting for searches");
                        Ok(StepOutput::Pending)
                    }
                },
                other => Err(unexpected(self.name(), &other)),
            }
        })
    }
}
