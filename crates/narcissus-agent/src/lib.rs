pub mod graph;
pub mod writer;

pub use graph::{
    render_mermaid, Context, Event, RunReport, RunSettings, Step, StepOutput, Supervisor, Workflow,
};
pub use writer::{build_graph, EssayEvent, EssayEventKind, WriterWorkflow};
