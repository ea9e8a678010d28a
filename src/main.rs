use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use conductor_core::config::AppConfig;
use conductor_core::error::ConductorError;
use conductor_core::event::EventBus;
use conductor_core::traits::ToolExecutor;
use conductor_core::types::{AgentEvent, HeapStep};

use conductor_agent::graph::execution_order;
use conductor_agent::heap::{build_heap_dag, infer_priority_order};
use conductor_agent::tool_call::extract_tool_calls;
use conductor_agent::turn::Plan;
use conductor_agent::{
    strip_structural_tags, NodeAgent, SpecialistRegistry, TurnOrchestrator, TurnRequest,
};
use conductor_llm::{GatedClient, RateGate, ScriptedClient};

#[derive(Parser)]
#[command(name = "conductor", version, about = "LLM agent execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the execution order of a node-agent graph
    Order {
        /// Node agent JSON file
        graph: PathBuf,
    },
    /// Print the levels a priority order runs in
    HeapPlan {
        /// JSON array of specialist ids and `{"parallel": [...]}` groups
        steps: Option<PathBuf>,
        /// Infer the order from a task instead, using the registry's keywords
        #[arg(long, requires = "registry")]
        task: Option<String>,
        /// Specialist registry JSON file
        #[arg(long)]
        registry: Option<PathBuf>,
    },
    /// Extract tool calls and plan blocks from model output
    Parse {
        /// File to read, or `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },
    /// Replay a scripted model transcript through one turn
    Replay {
        /// JSON array of responses (plain strings or full response objects)
        #[arg(long)]
        script: PathBuf,
        /// Tool names offered to the model
        #[arg(long, value_delimiter = ',')]
        tools: Vec<String>,
        /// System prompt for the turn
        #[arg(long)]
        system: Option<String>,
        /// The user message
        #[arg(trailing_var_arg = true, required = true)]
        message: Vec<String>,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("conductor=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;
    debug!(path = %cli.config.display(), exists = cli.config.exists(), "Config resolved");

    match cli.command {
        Some(Commands::Order { graph }) => {
            let agent: NodeAgent = serde_json::from_str(&read_input(&graph)?)?;
            for (i, id) in execution_order(&agent.graph).iter().enumerate() {
                let kind = agent
                    .graph
                    .node(id)
                    .map(|n| n.type_name())
                    .unwrap_or("?");
                println!("{:>3}. {} ({})", i + 1, id, kind);
            }
        }
        Some(Commands::HeapPlan {
            steps,
            task,
            registry,
        }) => {
            let order: Vec<HeapStep> = match (steps, task, registry) {
                (_, Some(task), Some(registry)) => {
                    let registry = SpecialistRegistry::load(&registry)?;
                    infer_priority_order(&task, &registry)
                }
                (Some(path), _, _) => serde_json::from_str(&read_input(&path)?)?,
                _ => anyhow::bail!("Provide a steps file or --task with --registry"),
            };
            let dag = build_heap_dag(&order);
            if dag.is_empty() {
                println!("(no levels)");
            }
            for (i, level) in dag.levels.iter().enumerate() {
                println!("level {}: {}", i, level.join(", "));
            }
        }
        Some(Commands::Parse { input }) => {
            let text = if input == "-" {
                let mut buf = String::new();
                io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                read_input(Path::new(&input))?
            };
            print_parse(&text)?;
        }
        Some(Commands::Replay {
            script,
            tools,
            system,
            message,
        }) => {
            replay(&config, &script, tools, system, message.join(" ")).await?;
        }
        Some(Commands::Config) | None => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))
}

fn print_parse(text: &str) -> anyhow::Result<()> {
    let extraction = extract_tool_calls(text);
    let calls: Vec<Value> = extraction
        .calls
        .iter()
        .map(|c| json!({"name": c.name, "arguments": c.args}))
        .collect();
    let plan = Plan::parse(text);
    let report = json!({
        "toolCalls": calls,
        "malformed": extraction.malformed,
        "reasoning": plan.as_ref().and_then(|p| p.reasoning.clone()),
        "todos": plan.map(|p| p.todos).unwrap_or_default(),
        "content": strip_structural_tags(text),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Acknowledges tool calls by echoing their arguments.
///
/// With a non-empty `offered` list, calls to any other tool fail.
struct EchoTools {
    offered: Vec<String>,
}

impl ToolExecutor for EchoTools {
    fn execute<'a>(
        &'a self,
        name: &'a str,
        args: Value,
    ) -> BoxFuture<'a, conductor_core::Result<Value>> {
        Box::pin(async move {
            if !self.offered.is_empty() && !self.offered.iter().any(|t| t == name) {
                return Err(ConductorError::ToolNotFound(name.to_string()));
            }
            Ok(json!({"status": "ok", "tool": name, "arguments": args}))
        })
    }
}

async fn replay(
    config: &AppConfig,
    script: &Path,
    tools: Vec<String>,
    system: Option<String>,
    message: String,
) -> anyhow::Result<()> {
    let scripted = ScriptedClient::from_file(script)?;
    info!(responses = scripted.remaining(), "Loaded script");

    let event_bus = Arc::new(EventBus::default());
    let gate = Arc::new(RateGate::new(config.rate_gate.clone()));
    let llm = Arc::new(
        GatedClient::new(Box::new(scripted), gate).with_event_bus(event_bus.clone()),
    );
    let executor = Arc::new(EchoTools {
        offered: tools.clone(),
    });
    let orchestrator = TurnOrchestrator::new(config, llm, executor, event_bus.clone())?;

    let mut rx = event_bus.subscribe();
    let print_handle = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                AgentEvent::PlanParsed { todos, .. } => {
                    for (i, todo) in todos.iter().enumerate() {
                        eprintln!("[plan] {}. {}", i, todo);
                    }
                }
                AgentEvent::ToolStart { name, args } => {
                    eprintln!("[tool: {}] {}", name, args);
                }
                AgentEvent::TodoCompleted { index } => {
                    eprintln!("[done: step {}]", index);
                }
                AgentEvent::NudgeIssued { kind } => {
                    eprintln!("[nudge: {:?}]", kind);
                }
                AgentEvent::FollowUpRound { round } => {
                    eprintln!("[follow-up {}]", round);
                }
                AgentEvent::RateLimited { key, wait_ms } => {
                    eprintln!("[rate limited: {} waited {}ms]", key, wait_ms);
                }
                AgentEvent::TurnComplete { .. } => break,
                _ => {}
            }
        }
    });

    let mut request = TurnRequest::new(message).with_tools(tools);
    if let Some(system) = system {
        request = request.with_system_prompt(system);
    }
    let outcome = orchestrator.run_turn(request).await?;
    print_handle.await.ok();

    println!("{}", outcome.content);
    eprintln!(
        "\n[{} llm calls, {} tool calls{}]",
        outcome.llm_calls,
        outcome.tool_results.len(),
        if outcome.waiting_for_user {
            ", waiting for user"
        } else {
            ""
        }
    );
    if let Some(done) = outcome.completed_step_indices {
        eprintln!("[completed steps: {:?}]", done);
    }
    Ok(())
}
