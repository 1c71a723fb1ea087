mod agents;
mod llm_client;
mod orchestrator;

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Map as JsonMap, Value};
use tokio::sync::mpsc;
use tracing::info;

use agents::Role;
use llm_client::{build_llm_client_from_env, SharedLlmClient};
use orchestrator::{AnalysisOutcome, Orchestrator, Progress};

#[derive(Parser, Debug)]
#[command(
    name = "medquorum",
    about = "Multi-agent triage of free-text medical reports: three specialist consults in parallel, one multidisciplinary diagnosis"
)]
struct Cli {
    /// Medical report text; if omitted, --report-file or interactive paste is used.
    #[arg(short, long, conflicts_with = "report_file")]
    report: Option<String>,

    /// Read the medical report from a file.
    #[arg(long)]
    report_file: Option<PathBuf>,

    /// Emit the analysis as JSON instead of text panels.
    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one trivial completion to verify credentials and connectivity.
    LlmSmoke,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let llm_client =
        build_llm_client_from_env(false).context("LLM client initialization failed")?;

    if let Some(Commands::LlmSmoke) = cli.command {
        return run_llm_smoke(llm_client).await;
    }

    let report = match load_report(cli.report, cli.report_file)? {
        Some(report) => report,
        None => read_report_interactively()?,
    };
    if report.trim().is_empty() {
        bail!("Please enter a medical report to analyze.");
    }

    run_analysis(llm_client, &report, cli.json).await
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

fn load_report(
    report: Option<String>,
    report_file: Option<PathBuf>,
) -> anyhow::Result<Option<String>> {
    if let Some(text) = report {
        return Ok(Some(text));
    }

    if let Some(path) = report_file {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read report file {}", path.display()))?;
        return Ok(Some(text));
    }

    Ok(None)
}

fn read_report_interactively() -> anyhow::Result<String> {
    println!("Paste the medical report below; finish with an empty line.\n");
    let stdin = io::stdin();
    let mut lines: Vec<String> = Vec::new();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut buffer = String::new();
        let bytes_read = stdin.read_line(&mut buffer)?;
        let trimmed = buffer.trim_end();

        if bytes_read == 0 || trimmed.is_empty() {
            break;
        }

        lines.push(trimmed.to_string());
    }

    Ok(lines.join("\n"))
}

async fn run_analysis(
    llm_client: SharedLlmClient,
    report: &str,
    as_json: bool,
) -> anyhow::Result<()> {
    info!(report_len = report.len(), "Starting analysis run");

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(update) = progress_rx.recv().await {
            match update {
                Progress::SpecialistsDispatched => {
                    eprintln!("[  0%] Consulting specialists...");
                }
                Progress::ConsultRecorded {
                    role,
                    completed,
                    total,
                } => {
                    let percent = completed * 100 / (total + 1);
                    eprintln!("[{percent:>3}%] {role} consult recorded");
                }
                Progress::AggregatorDispatched => {
                    eprintln!("[ 75%] Convening multidisciplinary team...");
                }
                Progress::Complete => {
                    eprintln!("[100%] Analysis complete");
                    break;
                }
            }
        }
    });

    let orchestrator = Orchestrator::new(llm_client).with_progress(progress_tx);
    let outcome = orchestrator.analyze(report).await;
    printer.await.ok();

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome_to_json(report, &outcome))?
        );
    } else {
        render_panels(&outcome);
    }

    match outcome.final_diagnosis {
        Ok(_) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn render_panels(outcome: &AnalysisOutcome) {
    println!("\nSpecialist consultations");
    println!("========================");
    for role in Role::SPECIALISTS {
        println!("\n--- {role} ---");
        match outcome.consults.outcome(role) {
            Some(Ok(text)) => println!("{text}"),
            Some(Err(err)) => println!("⚠️  unavailable: {err}"),
            None => println!("⚠️  unavailable: consult never reported"),
        }
    }

    println!("\nFinal multidisciplinary diagnosis");
    println!("=================================");
    match &outcome.final_diagnosis {
        Ok(text) => println!("{text}"),
        Err(err) => println!("⚠️  {err}"),
    }
}

fn outcome_to_json(report: &str, outcome: &AnalysisOutcome) -> Value {
    let mut consults = JsonMap::new();
    for role in Role::SPECIALISTS {
        let entry = match outcome.consults.outcome(role) {
            Some(Ok(text)) => json!({ "status": "ok", "text": text }),
            Some(Err(err)) => json!({ "status": "error", "message": err.to_string() }),
            None => json!({ "status": "error", "message": "consult never reported" }),
        };
        consults.insert(role.to_string(), entry);
    }

    let final_diagnosis = match &outcome.final_diagnosis {
        Ok(text) => json!({ "status": "ok", "text": text }),
        Err(err) => json!({ "status": "error", "message": err.to_string() }),
    };

    json!({
        "generated_at": Utc::now().to_rfc3339(),
        "report": report,
        "consults": Value::Object(consults),
        "final_diagnosis": final_diagnosis,
    })
}

async fn run_llm_smoke(llm_client: SharedLlmClient) -> anyhow::Result<()> {
    println!("Sending a one-line prompt to the completion backend...");
    let reply = llm_client
        .complete("Reply with the single word READY.")
        .await
        .context("LLM smoke call failed")?;
    println!("✔ Backend responded: {}", reply.trim());
    Ok(())
}
