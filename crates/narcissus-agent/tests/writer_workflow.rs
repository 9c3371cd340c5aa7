use std::sync::Arc;
use std::time::Duration;

use narcissus_agent::graph::{RunSettings, Supervisor};
use narcissus_agent::writer::{build_graph, keys, EssayEvent, WriterWorkflow};
use narcissus_core::config::{ResearchPolicy, WorkflowConfig};
use narcissus_core::error::NarcissusError;
use narcissus_core::event::EventBus;
use narcissus_core::types::{RunEvent, SearchHit};
use narcissus_test_utils::{FailingLlm, FailingSearch, MockSearch, ScriptedLlm, StallingLlm};

const WRITER: &str = "essay assistant";
const REFLECTION: &str = "teacher grading";
const OUTLINE_QUERIES: &str = "essay outlined below";
const CRITIQUE_QUERIES: &str = "revisions requested";

fn llm(outline_queries: &[&str], critique_queries: &[&str]) -> Arc<ScriptedLlm> {
    Arc::new(
        ScriptedLlm::new()
            .on_complete("high-level outline", "1. Intro\n2. Body\n3. Conclusion")
            .on_complete(WRITER, "# An essay\n\nBody text.")
            .on_complete(REFLECTION, "Cite more primary sources.")
            .on_plan(OUTLINE_QUERIES, outline_queries)
            .on_plan(CRITIQUE_QUERIES, critique_queries),
    )
}

fn writer(llm: Arc<ScriptedLlm>, search: Arc<MockSearch>, config: &WorkflowConfig) -> WriterWorkflow {
    WriterWorkflow::new(llm, search, config, Arc::new(EventBus::default())).unwrap()
}

fn sorted(mut calls: Vec<String>) -> Vec<String> {
    calls.sort();
    calls
}

#[tokio::test]
async fn test_single_draft_with_two_queries() {
    let llm = llm(&["tidal physics", "moon orbit"], &[]);
    let search = Arc::new(
        MockSearch::new().with_results("moon orbit", vec![SearchHit::new("27 days", "https://nasa.gov")]),
    );
    let writer = writer(llm.clone(), search.clone(), &WorkflowConfig::default());

    let report = writer.run("Why do tides happen?", 1).await.unwrap();

    assert!(!report.output.is_empty());
    let research = report.context[keys::RESEARCH].as_object().unwrap();
    assert_eq!(research.len(), 2);
    assert!(research.contains_key("tidal physics"));
    assert_eq!(research["moon orbit"][0]["source"], "https://nasa.gov");

    assert_eq!(llm.completions_matching(WRITER), 1);
    assert_eq!(llm.completions_matching(REFLECTION), 0);
    assert_eq!(sorted(search.calls()), vec!["moon orbit", "tidal physics"]);
}

#[tokio::test]
async fn test_n_drafts_take_n_writes() {
    let llm = llm(&["a"], &["b"]);
    let search = Arc::new(MockSearch::new());
    let writer = writer(llm.clone(), search, &WorkflowConfig::default());

    let report = writer.run("topic", 3).await.unwrap();

    assert_eq!(report.output, "# An essay\n\nBody text.");
    assert_eq!(llm.completions_matching(WRITER), 3);
    assert_eq!(llm.completions_matching(REFLECTION), 2);
    assert_eq!(report.context[keys::NUM_DRAFTS_COMPLETED], 3);
    assert_eq!(report.context[keys::REFLECTION], "Cite more primary sources.");
}

#[tokio::test]
async fn test_zero_drafts_returns_empty_essay() {
    let llm = llm(&["a", "b"], &["c"]);
    let search = Arc::new(MockSearch::new());
    let writer = writer(llm.clone(), search.clone(), &WorkflowConfig::default());

    let essay = writer.start("topic", 0).await.unwrap();

    assert_eq!(essay, "");
    assert_eq!(llm.completions_matching(WRITER), 0);
    assert_eq!(llm.completions_matching(REFLECTION), 0);
    assert_eq!(llm.predictions().len(), 1);
    assert_eq!(search.calls().len(), 2);
}

#[tokio::test]
async fn test_known_queries_are_not_searched_again() {
    let llm = llm(&["a", "b", "a"], &["b", "c"]);
    let search = Arc::new(MockSearch::new());
    let writer = writer(llm.clone(), search.clone(), &WorkflowConfig::default());

    let report = writer.run("topic", 2).await.unwrap();

    assert_eq!(sorted(search.calls()), vec!["a", "b", "c"]);
    assert_eq!(report.context[keys::RESEARCH].as_object().unwrap().len(), 3);
}

#[tokio::test]
async fn test_fully_known_critique_skips_to_write() {
    let llm = llm(&["a", "b"], &["a"]);
    let search = Arc::new(MockSearch::new());
    let writer = writer(llm.clone(), search.clone(), &WorkflowConfig::default());

    writer.run("topic", 2).await.unwrap();

    assert_eq!(search.calls().len(), 2);
    assert_eq!(llm.completions_matching(WRITER), 2);
}

#[tokio::test]
async fn test_always_policy_searches_again() {
    let llm = llm(&["a", "b"], &["b", "c"]);
    let search = Arc::new(MockSearch::new());
    let config = WorkflowConfig {
        research_policy: ResearchPolicy::Always,
        ..Default::default()
    };
    let writer = writer(llm, search.clone(), &config);

    writer.run("topic", 2).await.unwrap();

    assert_eq!(sorted(search.calls()), vec!["a", "b", "b", "c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_searches_run_concurrently_within_worker_limit() {
    let queries = ["q1", "q2", "q3", "q4", "q5", "q6", "q7", "q8"];
    let llm = llm(&queries, &[]);
    let search = Arc::new(MockSearch::new().with_latency(Duration::from_millis(40)));
    let writer = writer(llm, search.clone(), &WorkflowConfig::default());

    let report = writer.run("topic", 1).await.unwrap();

    assert_eq!(report.context[keys::RESEARCH].as_object().unwrap().len(), 8);
    assert!(search.peak_concurrency() <= 4);
    assert!(search.peak_concurrency() > 1);
}

#[tokio::test]
async fn test_single_worker_serialises_searches() {
    let llm = llm(&["a", "b", "c"], &[]);
    let search = Arc::new(MockSearch::new().with_latency(Duration::from_millis(10)));
    let config = WorkflowConfig {
        search_workers: 1,
        ..Default::default()
    };
    let writer = writer(llm, search.clone(), &config);

    writer.run("topic", 1).await.unwrap();

    assert_eq!(search.peak_concurrency(), 1);
}

#[tokio::test]
async fn test_stalled_llm_times_out() {
    let workflow = build_graph(
        Arc::new(StallingLlm),
        Arc::new(MockSearch::new()),
        &WorkflowConfig::default(),
    )
    .unwrap();
    let supervisor = Supervisor::new(
        RunSettings {
            timeout: Duration::from_millis(50),
            verbose: false,
        },
        Arc::new(EventBus::default()),
    );

    let err = supervisor
        .run(
            &workflow,
            EssayEvent::Start {
                query: "X".into(),
                num_drafts: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, NarcissusError::Timeout(_)));
}

#[tokio::test]
async fn test_search_failure_aborts_run() {
    let workflow = build_graph(
        llm(&["a", "b"], &[]),
        Arc::new(FailingSearch),
        &WorkflowConfig::default(),
    )
    .unwrap();
    let supervisor = Supervisor::new(RunSettings::default(), Arc::new(EventBus::default()));

    let err = supervisor
        .run(
            &workflow,
            EssayEvent::Start {
                query: "X".into(),
                num_drafts: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, NarcissusError::Search { .. }));
}

#[tokio::test]
async fn test_llm_failure_aborts_run() {
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let writer = WriterWorkflow::new(
        Arc::new(FailingLlm::new("503 Service Unavailable")),
        Arc::new(MockSearch::new()),
        &WorkflowConfig::default(),
        bus,
    )
    .unwrap();

    let err = writer.start("topic", 1).await.unwrap_err();
    assert!(matches!(err, NarcissusError::LlmRequest(_)));

    let mut failed = None;
    while let Ok(event) = rx.try_recv() {
        if let RunEvent::RunFailed { error, .. } = event {
            failed = Some(error);
        }
    }
    assert!(failed.unwrap().contains("503"));
}

#[tokio::test]
async fn test_run_events_trace_the_graph() {
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let writer = WriterWorkflow::new(
        llm(&["a", "b"], &[]),
        Arc::new(MockSearch::new()),
        &WorkflowConfig::default(),
        bus,
    )
    .unwrap();

    let report = writer.run("topic", 1).await.unwrap();

    let mut started = Vec::new();
    let mut waits = 0;
    let mut complete = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            RunEvent::StepStarted { step, .. } => started.push(step),
            RunEvent::BarrierWaiting { .. } => waits += 1,
            RunEvent::RunComplete { dispatched, .. } => {
                assert_eq!(dispatched, report.dispatched);
                complete = true;
            }
            _ => {}
        }
    }

    assert!(complete);
    // Two searches: the first completion waits, the second releases.
    assert_eq!(waits, 1);
    assert_eq!(started.iter().filter(|s| *s == "search").count(), 2);
    assert_eq!(started.first().map(String::as_str), Some("start"));
    assert_eq!(started.last().map(String::as_str), Some("write"));
}
