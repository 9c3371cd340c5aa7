mod doctor;

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use narcissus_core::config::{AppConfig, ModelConfig, SearchConfig, WorkflowConfig};
use narcissus_core::event::EventBus;
use narcissus_core::traits::{LlmClient, SearchClient};
use narcissus_core::types::RunEvent;

use narcissus_agent::{render_mermaid, WriterWorkflow};

#[derive(Parser)]
#[command(
    name = "narcissus",
    version,
    about = "Self-reflective essay writer built on an event-driven step engine"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "narcissus.toml", env = "NARCISSUS_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an essay on a topic
    Run {
        /// The essay topic (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        topic: Vec<String>,
        /// Number of drafts to write
        #[arg(short, long, default_value_t = 2)]
        drafts: u32,
        /// Wall-clock budget for the run, in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Print every step as it runs
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print the step graph as a Mermaid diagram
    Graph,
    /// Show current configuration
    Config,
    /// Check configuration and credentials
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("narcissus=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "narcissus", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        Commands::Doctor => {
            println!("Narcissus Doctor");
            println!("================");
            doctor::run_doctor(&config);
        }
        Commands::Graph => {
            let writer = build_writer(&config, Arc::new(EventBus::default()))?;
            println!("{}", render_mermaid(writer.workflow()));
        }
        Commands::Run {
            topic,
            drafts,
            timeout,
            verbose,
        } => {
            if let Some(secs) = timeout {
                config.workflow.timeout_secs = secs.max(1);
            }
            config.workflow.verbose |= verbose;
            let topic = read_topic(topic)?;
            run_essay(&config, &topic, drafts).await?;
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        info!(path = %path.display(), "Loading config");
        return Ok(AppConfig::load(path)?);
    }
    eprintln!(
        "Warning: No config file found at {}. Using OPENAI_API_KEY and TAVILY_API_KEY from the environment.",
        path.display()
    );
    Ok(create_env_config())
}

fn create_env_config() -> AppConfig {
    AppConfig {
        model: ModelConfig {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            ..Default::default()
        },
        search: SearchConfig {
            api_key: std::env::var("TAVILY_API_KEY").ok(),
            ..Default::default()
        },
        workflow: WorkflowConfig::default(),
    }
}

fn read_topic(words: Vec<String>) -> anyhow::Result<String> {
    let topic = words.join(" ");
    if !topic.trim().is_empty() {
        return Ok(topic);
    }
    let stdin = io::stdin();
    let input: String = stdin
        .lock()
        .lines()
        .map_while(|l| l.ok())
        .collect::<Vec<_>>()
        .join("\n");
    if input.trim().is_empty() {
        anyhow::bail!("No topic given. Pass it as arguments or on stdin.");
    }
    Ok(input.trim().to_string())
}

fn build_writer(config: &AppConfig, bus: Arc<EventBus>) -> anyhow::Result<WriterWorkflow> {
    let llm: Arc<dyn LlmClient> = Arc::from(narcissus_llm::create_client(&config.model));
    let search: Arc<dyn SearchClient> = Arc::from(narcissus_search::create_client(&config.search)?);
    Ok(WriterWorkflow::new(llm, search, &config.workflow, bus)?)
}

/// One-line rendering of a run event for the verbose trace.
fn describe_event(event: &RunEvent) -> String {
    match event {
        RunEvent::RunStarted { run_id } => format!("[run {}]", run_id),
        RunEvent::StepStarted { step, kind, .. } => format!("[{} <- {}]", step, kind),
        RunEvent::StepFinished {
            step,
            emitted,
            elapsed_ms,
            ..
        } => format!("[{} -> {}] {}ms", step, emitted.join(", "), elapsed_ms),
        RunEvent::BarrierWaiting { step, .. } => format!("[{}: waiting]", step),
        RunEvent::RunComplete {
            dispatched,
            elapsed_ms,
            ..
        } => format!("[done: {} dispatches, {}ms]", dispatched, elapsed_ms),
        RunEvent::RunFailed { error, .. } => format!("[error: {}]", error),
    }
}

/// Feed run events to `out` until the run ends or the bus closes.
async fn follow_events(mut rx: broadcast::Receiver<RunEvent>, mut out: impl FnMut(String)) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                out(describe_event(&event));
                if matches!(event, RunEvent::RunComplete { .. } | RunEvent::RunFailed { .. }) {
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => {
                debug!(skipped = n, "Event printer lagged, skipped events");
                out(format!("[... {} events skipped]", n));
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn run_essay(config: &AppConfig, topic: &str, drafts: u32) -> anyhow::Result<()> {
    let event_bus = Arc::new(EventBus::default());
    let writer = build_writer(config, event_bus.clone())?;

    // Spawn event printer
    let print_handle = config
        .workflow
        .verbose
        .then(|| tokio::spawn(follow_events(event_bus.subscribe(), |line| eprintln!("{}", line))));

    // Ctrl-C cancels the run
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let result = writer.run_with_cancel(topic, drafts, cancel).await;
    if let Some(handle) = print_handle {
        handle.await.ok();
    }

    match result {
        Ok(report) => {
            info!(
                run_id = %report.run_id,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Essay written"
            );
            println!("{}", report.output);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Essay run failed");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narcissus_core::types::RunId;

    #[tokio::test]
    async fn test_follow_events_survives_lag() {
        let bus = EventBus::new(2);
        let rx = bus.subscribe();
        let run_id = RunId::new();
        for step in ["start", "plan", "research_plan", "search"] {
            bus.publish(RunEvent::BarrierWaiting {
                run_id: run_id.clone(),
                step: step.to_string(),
            });
        }
        bus.publish(RunEvent::RunComplete {
            run_id,
            dispatched: 9,
            elapsed_ms: 12,
        });

        let mut lines = Vec::new();
        follow_events(rx, |line| lines.push(line)).await;

        assert!(lines[0].contains("skipped"));
        assert_eq!(lines.last().map(String::as_str), Some("[done: 9 dispatches, 12ms]"));
    }

    #[test]
    fn test_describe_step_finished() {
        let line = describe_event(&RunEvent::StepFinished {
            run_id: RunId::new(),
            step: "search".into(),
            emitted: vec!["search_complete".into()],
            elapsed_ms: 40,
        });
        assert_eq!(line, "[search -> search_complete] 40ms");
    }
}
