mod config;
mod constants;
mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use node_engine::{validate_workflow, NodeRegistry, NullEventSink, WorkflowEngine, WorkflowGraph};
use workflow_nodes::{builtin_registry, conditioning_pipeline, GenerationClient, HttpGenerationClient};

use config::AppConfig;
use constants::{env, paths};
use report::{LogEventSink, LogObserver};

/// Run canvas workflows from the command line
#[derive(Parser)]
#[command(name = "canvas-runner")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = paths::CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow's structure
    Validate {
        /// Path to the workflow file (JSON)
        workflow_file: PathBuf,
    },

    /// Show what a run would execute, without executing it
    Plan {
        workflow_file: PathBuf,

        /// Node to produce
        #[arg(long)]
        target: String,
    },

    /// Execute a workflow up to a target node
    Run {
        workflow_file: PathBuf,

        /// Node to produce
        #[arg(long)]
        target: String,

        /// Seed a node with an existing artifact (`node=url`, repeatable)
        #[arg(long = "prime", value_parser = parse_prime)]
        primed: Vec<(String, String)>,

        /// Generation service base URL
        #[arg(long, env = env::SERVICE_URL)]
        service_url: Option<String>,

        /// Generation service API key
        #[arg(long, env = env::API_KEY, hide_env_values = true)]
        api_key: Option<String>,
    },
}

fn parse_prime(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((node, artifact)) if !node.is_empty() && !artifact.is_empty() => {
            Ok((node.to_string(), artifact.to_string()))
        }
        _ => Err(format!("expected node=artifact, got '{}'", value)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { workflow_file } => validate(&workflow_file).await,
        Commands::Plan {
            workflow_file,
            target,
        } => plan(&workflow_file, &target).await,
        Commands::Run {
            workflow_file,
            target,
            primed,
            service_url,
            api_key,
        } => {
            let config = AppConfig::load(&cli.config)
                .await
                .with_context(|| format!("failed to load config {}", cli.config.display()))?
                .with_overrides(service_url, api_key);
            run(&workflow_file, &target, primed, config).await
        }
    }
}

async fn load_graph(path: &Path) -> Result<WorkflowGraph> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read workflow file: {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse workflow file: {}", path.display()))
}

async fn validate(path: &Path) -> Result<()> {
    let graph = load_graph(path).await?;
    let errors = validate_workflow(&graph);
    if errors.is_empty() {
        println!(
            "{}: {} nodes, {} edges, valid",
            graph.id,
            graph.nodes.len(),
            graph.edges.len()
        );
        return Ok(());
    }

    for error in &errors {
        eprintln!("  - {}", error);
    }
    bail!("workflow '{}' has {} validation error(s)", graph.id, errors.len())
}

async fn plan(path: &Path, target: &str) -> Result<()> {
    let graph = load_graph(path).await?;
    let engine = WorkflowEngine::new(Arc::new(NodeRegistry::new()), Arc::new(NullEventSink));
    let plan = engine
        .plan(&graph, target)
        .await
        .with_context(|| format!("cannot plan a run to '{}'", target))?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn run(
    path: &Path,
    target: &str,
    primed: Vec<(String, String)>,
    config: AppConfig,
) -> Result<()> {
    let graph = load_graph(path).await?;

    let client: Arc<dyn GenerationClient> = Arc::new(
        HttpGenerationClient::new(&config.service).context("failed to create service client")?,
    );
    log::info!("Using generation service at {}", config.service.base_url);

    let pipeline = conditioning_pipeline(config.preprocessing.clone(), client.clone(), Arc::new(LogObserver));
    let maintenance = pipeline.start_maintenance();
    let registry = builtin_registry(client, pipeline.clone());
    let engine = WorkflowEngine::new(Arc::new(registry), Arc::new(LogEventSink));

    {
        let mut context = engine.context().write().await;
        for (node_id, artifact) in primed {
            context.prime(node_id, artifact);
        }
    }

    let outcome = engine.run(&graph, target).await;
    maintenance.stop();
    engine.context().write().await.shutdown();

    let report = outcome.with_context(|| format!("run to '{}' failed", target))?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let stats = pipeline.cache().stats();
    log::info!(
        "Preprocessing cache: {} hit(s), {} miss(es)",
        stats.hits,
        stats.misses
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prime() {
        assert_eq!(
            parse_prime("preview=https://img/p.png"),
            Ok(("preview".to_string(), "https://img/p.png".to_string()))
        );
        assert!(parse_prime("preview").is_err());
        assert!(parse_prime("=https://img/p.png").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "canvas-runner",
            "run",
            "wf.json",
            "--target",
            "out",
            "--prime",
            "preview=https://img/p.png",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { target, primed, .. } => {
                assert_eq!(target, "out");
                assert_eq!(primed.len(), 1);
            }
            _ => panic!("Expected run command"),
        }
        assert_eq!(cli.config, PathBuf::from(paths::CONFIG_FILE));
    }

    #[tokio::test]
    async fn test_load_graph_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.json");
        std::fs::write(&path, "[]").unwrap();

        let err = load_graph(&path).await.unwrap_err();
        assert!(err.to_string().contains("failed to parse workflow file"));
    }
}
