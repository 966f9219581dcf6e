use clap::{Parser, Subcommand};
use relaybot_core::{ProjectStatus, RunExit, RunSnapshot, StartOutcome, StopOutcome};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::process;

#[derive(Parser)]
#[command(name = "relayctl")]
#[command(about = "Relay bot command line client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server URL
    #[arg(long, default_value = "http://localhost:5000")]
    server: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health
    Health,

    /// Show which projects are running
    Status,

    /// List tracked runs with their pids and commands
    Runs,

    /// Show the current run and last exit of a project
    Show {
        /// Project name
        project: String,
    },

    /// Start a project (restarting it if already running)
    Start {
        /// Project name
        project: String,
    },

    /// Stop a running project
    Stop {
        /// Project name
        project: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new();
    let server = cli.server.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let url = format!("{}/health", server);
            let response = client.get(&url).send().await?;
            if response.status().is_success() {
                println!("Server is healthy");
            } else {
                eprintln!("Server is unhealthy");
                process::exit(1);
            }
        }
        Commands::Status => {
            let url = format!("{}/bot-slack/status", server);
            let body: serde_json::Value = expect_json(client.get(&url).send().await?, "status").await?;
            println!("{}", body["message"].as_str().unwrap_or("No status message"));
        }
        Commands::Runs => {
            let url = format!("{}/api/v1/runs", server);
            let runs: Vec<RunSnapshot> = expect_json(client.get(&url).send().await?, "runs").await?;
            if runs.is_empty() {
                println!("No project is running.");
            }
            for run in runs {
                print_run(&run);
            }
        }
        Commands::Show { project } => {
            let url = format!("{}/api/v1/runs/{}", server, project);
            let status: ProjectStatus = expect_json(client.get(&url).send().await?, &project).await?;
            print_status(&status);
        }
        Commands::Start { project } => {
            let url = format!("{}/api/v1/runs/{}/start", server, project);
            let outcome: StartOutcome = expect_json(client.post(&url).send().await?, &project).await?;
            report(outcome.started, &outcome.message);
        }
        Commands::Stop { project } => {
            let url = format!("{}/api/v1/runs/{}/stop", server, project);
            let outcome: StopOutcome = expect_json(client.post(&url).send().await?, &project).await?;
            report(outcome.stopped, &outcome.message);
        }
    }

    Ok(())
}

async fn expect_json<T: DeserializeOwned>(response: Response, what: &str) -> anyhow::Result<T> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        eprintln!("Not found: {}", what);
        process::exit(1);
    }
    // Start requests without a configured command still carry an outcome.
    if status.is_success() || status == StatusCode::UNPROCESSABLE_ENTITY {
        return Ok(response.json().await?);
    }

    let error_text = response.text().await.unwrap_or_default();
    eprintln!("Request failed ({}): {}", status, error_text);
    process::exit(1);
}

fn report(success: bool, message: &str) {
    if success {
        println!("✓ {}", message);
    } else {
        eprintln!("✗ {}", message);
        process::exit(1);
    }
}

fn print_run(run: &RunSnapshot) {
    let pid = run
        .pid
        .map(|p| p.to_string())
        .unwrap_or_else(|| "?".to_string());
    println!(
        "  {} [pid {}] since {} - {}",
        run.project,
        pid,
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        run.command
    );
}

fn print_status(status: &ProjectStatus) {
    println!("Project: {}", status.project);
    match &status.running {
        Some(run) => {
            println!("Running:");
            print_run(run);
        }
        None => println!("Running: no"),
    }
    if let Some(exit) = &status.last_exit {
        print_exit(exit);
    }
}

fn print_exit(exit: &RunExit) {
    println!("Last exit: {:?} at {}", exit.reason, exit.finished_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(code) = exit.exit_code {
        println!("  Exit code: {}", code);
    }
    if !exit.output_tail.is_empty() {
        println!("  Output:");
        for line in &exit.output_tail {
            println!("    {}", line);
        }
    }
}
