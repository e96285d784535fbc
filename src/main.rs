use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod analysis;
mod charts;
mod config;
mod error;
mod extract;
mod llm;
mod loader;
mod models;
mod prompts;
mod report;
mod session;
mod stats;

use analysis::AnalysisResult;
use config::ServiceConfig;
use llm::{AzureChatService, TextGenerationService};
use session::Session;

#[derive(Parser)]
#[command(name = "wound-insights")]
#[command(about = "Wound care sales analytics with model-generated hypotheses", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Copy)]
struct ModelArgs {
    /// Seconds to wait for each model call
    #[arg(long, default_value_t = config::DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
    #[arg(long, default_value_t = config::DEFAULT_TEMPERATURE)]
    temperature: f32,
    /// Number of hypotheses to request and keep
    #[arg(long, default_value_t = 2)]
    hypotheses: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a CSV and print its summary
    Check {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Compute statistics without calling the model
    Analyze {
        #[arg(long)]
        csv: PathBuf,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
        /// Directory for the two chart payloads
        #[arg(long)]
        charts: Option<PathBuf>,
    },
    /// Run upload, analysis, narration, hypotheses and validation in one go
    Run {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Interactive session driven by typed commands
    Shell {
        #[command(flatten)]
        model: ModelArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Check { csv } => {
            let table = loader::load_table(&csv)?;
            print!("{}", report::summarize_data(&table));
        }
        Commands::Analyze { csv, json, charts } => {
            let table = loader::load_table(&csv)?;
            let result = analysis::analyze(&table);
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", report::summarize_analysis(&result));
            }
            if let Some(dir) = charts {
                write_charts(&dir, &result)?;
            }
        }
        Commands::Run { csv, out, model } => {
            let service = connect(model)?;
            let mut session = new_session(model);

            let summary = session.upload(&csv)?;
            println!("Data loaded successfully.\n{summary}");

            let result = session.analyze()?;
            println!("{}", report::summarize_analysis(result));
            if let Some(error) = result.error() {
                anyhow::bail!("analysis failed: {error}");
            }

            session.narrate(&service).await?;
            for hypothesis in session.hypothesize(&service).await? {
                println!("{}. {}", hypothesis.index, hypothesis.statement);
            }
            for pair in session.validate(&service).await? {
                println!(
                    "{}. [{}] {}",
                    pair.hypothesis.index, pair.validation.status, pair.validation.evidence
                );
            }

            std::fs::write(&out, report::build_report(&session))
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Shell { model } => {
            let service = connect(model)?;
            run_shell(new_session(model), &service).await?;
        }
    }

    Ok(())
}

fn connect(model: ModelArgs) -> anyhow::Result<AzureChatService> {
    let config = ServiceConfig::from_env(model.timeout_secs, model.temperature)?;
    Ok(AzureChatService::new(config)?)
}

fn new_session(model: ModelArgs) -> Session {
    Session::new()
        .with_hypothesis_count(model.hypotheses)
        .with_call_timeout(Duration::from_secs(model.timeout_secs.max(1)))
}

fn write_charts(dir: &Path, result: &AnalysisResult) -> anyhow::Result<()> {
    let Some(bundle) = result.bundle() else {
        anyhow::bail!("no charts for a failed analysis");
    };
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let (weekly, products) = charts::build_charts(bundle);
    for (name, chart) in [("weekly_trend.json", weekly), ("top_products.json", products)] {
        let Some(chart) = chart else {
            tracing::warn!(chart = name, "chart skipped, facet unavailable");
            continue;
        };
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(&chart)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Chart written to {}.", path.display());
    }
    Ok(())
}

const SHELL_HELP: &str = "commands: upload <csv>, analyze, narrate, hypothesize, validate, show, report <path>, help, quit";

async fn run_shell(mut session: Session, service: &dyn TextGenerationService) -> anyhow::Result<()> {
    println!("Session {} ready. {SHELL_HELP}", session.id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, argument) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(c, a)| (c, a.trim()));

        let outcome: Result<(), error::PipelineError> = match command {
            "" => continue,
            "quit" | "exit" => break,
            "help" => {
                println!("{SHELL_HELP}");
                Ok(())
            }
            "upload" if argument.is_empty() => {
                println!("usage: upload <csv>");
                Ok(())
            }
            "upload" => session.upload(Path::new(argument)).map(|summary| {
                println!("Data loaded successfully.\n{summary}");
            }),
            "analyze" => session.analyze().map(|result| {
                println!("{}", report::summarize_analysis(result));
            }),
            "narrate" => session.narrate(service).await.map(|text| println!("{text}")),
            "hypothesize" => session.hypothesize(service).await.map(|hypotheses| {
                for h in hypotheses {
                    println!("{}. {}", h.index, h.statement);
                }
            }),
            "validate" => session.validate(service).await.map(|pairs| {
                for p in pairs {
                    println!(
                        "{}. {} -> [{}] {}",
                        p.hypothesis.index,
                        p.hypothesis.statement,
                        p.validation.status,
                        p.validation.evidence
                    );
                }
            }),
            "show" => {
                print!("{}", report::build_report(&session));
                Ok(())
            }
            "report" if argument.is_empty() => {
                println!("usage: report <path>");
                Ok(())
            }
            "report" => {
                match std::fs::write(argument, report::build_report(&session)) {
                    Ok(()) => println!("Report written to {argument}."),
                    Err(err) => println!("Error: failed to write {argument}: {err}"),
                }
                Ok(())
            }
            other => {
                println!("unknown command '{other}'. {SHELL_HELP}");
                Ok(())
            }
        };

        if let Err(err) = outcome {
            println!("Error: {err}");
        }
    }

    Ok(())
}
