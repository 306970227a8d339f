use std::sync::Arc;

use fleet_pilot::account::AccountRecord;
use fleet_pilot::client::HttpClient;
use fleet_pilot::config::{Platform, RunConfig};
use fleet_pilot::orchestrator::Orchestrator;
use fleet_pilot::strategy::WorkflowKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let api_url = std::env::var("FLEET_PILOT_API_URL").unwrap_or_else(|_| {
        eprintln!("Error: FLEET_PILOT_API_URL not set");
        eprintln!("  export FLEET_PILOT_API_URL=https://rpa.example.com/api/v1");
        std::process::exit(1);
    });
    let api_key = std::env::var("FLEET_PILOT_API_KEY").unwrap_or_else(|_| {
        eprintln!("Error: FLEET_PILOT_API_KEY not set");
        eprintln!("  export FLEET_PILOT_API_KEY=fp-...");
        std::process::exit(1);
    });
    let accounts_path = std::env::var("FLEET_PILOT_ACCOUNTS").unwrap_or_else(|_| {
        eprintln!("Error: FLEET_PILOT_ACCOUNTS not set");
        eprintln!("  export FLEET_PILOT_ACCOUNTS=./accounts.json");
        std::process::exit(1);
    });

    let group = std::env::var("FLEET_PILOT_GROUP").unwrap_or_else(|_| "default".to_string());
    let platform: Platform = std::env::var("FLEET_PILOT_PLATFORM")
        .unwrap_or_else(|_| "instagram".to_string())
        .parse()
        .unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            std::process::exit(1);
        });
    let workflow: WorkflowKind = std::env::var("FLEET_PILOT_WORKFLOW")
        .unwrap_or_else(|_| "profile_setup".to_string())
        .parse()
        .unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            std::process::exit(1);
        });
    let concurrency: usize = std::env::var("FLEET_PILOT_CONCURRENCY")
        .unwrap_or_else(|_| "5".to_string())
        .parse()
        .unwrap_or(5);

    let accounts: Vec<AccountRecord> = {
        let raw = std::fs::read_to_string(&accounts_path).unwrap_or_else(|e| {
            eprintln!("Error: Failed to read accounts file {accounts_path}: {e}");
            std::process::exit(1);
        });
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            eprintln!("Error: Failed to parse accounts file {accounts_path}: {e}");
            std::process::exit(1);
        })
    };

    eprintln!("🛩  Fleet Pilot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Group: {group}");
    eprintln!("   Platform: {platform}");
    eprintln!("   Workflow: {workflow:?}");
    eprintln!("   Accounts: {}", accounts.len());
    eprintln!("   Concurrency: {concurrency}\n");

    let config = RunConfig {
        group,
        platform,
        workflow,
        concurrency,
        ..RunConfig::default()
    };

    let client = Arc::new(HttpClient::new(api_url, api_key));
    let orchestrator = Arc::new(Orchestrator::new(client, config));

    // Ctrl-C cancels the run; the orchestrator unwinds and cleans up.
    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nStopping run...");
                orchestrator.stop().await;
            }
        });
    }

    let summary = orchestrator.run(accounts).await?;

    eprintln!("\nRun {:?}", summary.outcome);
    eprintln!("   Done: {}", summary.done);
    eprintln!("   Failed: {}", summary.failed);
    eprintln!("   Pending accounts: {}", summary.pending_accounts);
    for failure in &summary.failures {
        eprintln!(
            "   ✗ {} ({}): {}",
            failure.device_name,
            failure.username.as_deref().unwrap_or("-"),
            failure.error
        );
    }

    Ok(())
}
