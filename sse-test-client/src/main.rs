use anyhow::Result;
use clap::Parser;
use colored::*;

mod output;
mod scenarios;
mod sse_client;

use output::print_test_summary;

#[derive(Parser)]
#[command(name = "sse-test-client")]
#[command(about = "SSE Broker Integration Testing Tool")]
struct Cli {
    /// Base URL of the broker (e.g., http://localhost:4000)
    #[arg(long)]
    base_url: String,

    /// Channel the test subscriptions join
    #[arg(long, default_value = "integration-test")]
    channel: String,

    /// Test scenario to run
    #[arg(long, value_enum)]
    scenario: ScenarioChoice,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone)]
enum ScenarioChoice {
    /// Test the onConnect/onJoin handshake of a fresh subscription
    ConnectionTest,
    /// Test join and leave broadcasts around a dropped subscriber
    JoinLeave,
    /// Test that heartbeat pings are accepted and keep a subscription live
    Heartbeat,
    /// Run all scenarios
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }

    println!("{}", "=== SETUP PHASE ===".bright_white().bold());
    println!("{} Target broker: {}", "→".blue(), cli.base_url);
    println!("{} Test channel:  {}", "→".blue(), cli.channel);

    let http = reqwest::Client::new();

    println!("\n{}", "=== TEST PHASE ===".bright_white().bold());

    let mut results = Vec::new();

    match cli.scenario {
        ScenarioChoice::ConnectionTest => {
            results.push(scenarios::test_connection(&cli.base_url, &cli.channel).await?);
        }
        ScenarioChoice::JoinLeave => {
            results.push(scenarios::test_join_leave(&cli.base_url, &cli.channel).await?);
        }
        ScenarioChoice::Heartbeat => {
            results.push(scenarios::test_heartbeat(&cli.base_url, &cli.channel, &http).await?);
        }
        ScenarioChoice::All => {
            results.push(scenarios::test_connection(&cli.base_url, &cli.channel).await?);
            results.push(scenarios::test_join_leave(&cli.base_url, &cli.channel).await?);
            results.push(scenarios::test_heartbeat(&cli.base_url, &cli.channel, &http).await?);
        }
    }

    println!("\n{}", "=== RESULTS ===".bright_white().bold());
    print_test_summary(&results);

    let all_passed = results.iter().all(|r| r.passed);

    if all_passed {
        println!("\n{}", "All tests passed! ✓".bright_green().bold());
    } else {
        println!("\n{}", "Some tests failed! ✗".bright_red().bold());
    }

    std::process::exit(if all_passed { 0 } else { 1 });
}
