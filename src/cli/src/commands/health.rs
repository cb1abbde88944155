//! Health check command.
//!
//! Queries `/health` and shows store reachability and breaker states.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Include per-breaker counters
    #[arg(short, long)]
    detailed: bool,
}

fn component(health: &serde_json::Value, name: &str) -> String {
    let part = &health[name];
    match part["healthy"].as_bool() {
        Some(true) => output::status_colored("healthy"),
        Some(false) => format!(
            "{} ({})",
            output::status_colored("unhealthy"),
            part["error"].as_str().unwrap_or("unreachable")
        ),
        None => "unknown".to_string(),
    }
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (http_status, health) = client.get_raw("/health").await?;

    match format {
        OutputFormat::Table => {
            let status = health["status"].as_str().unwrap_or("unknown");

            output::print_header("System Health");
            output::print_detail("Status", &output::status_colored(status));
            output::print_detail("API URL", client.base_url());
            if let Some(version) = health["version"].as_str() {
                output::print_detail("Version", version);
            }
            if let Some(ts) = health["timestamp"].as_str() {
                output::print_detail("Timestamp", ts);
            }
            output::print_detail("Post store", &component(&health, "store"));
            output::print_detail("Job queue", &component(&health, "queue"));

            if let Some(breakers) = health["breakers"].as_array() {
                output::print_header("Circuit breakers");
                for breaker in breakers {
                    let name = breaker["name"].as_str().unwrap_or("?");
                    let state = breaker["state"].as_str().unwrap_or("?");
                    if args.detailed {
                        output::print_detail(
                            name,
                            &format!(
                                "{} (consecutive failures {}, rejected {})",
                                output::status_colored(state),
                                breaker["consecutive_failures"],
                                breaker["total_rejections"]
                            ),
                        );
                    } else {
                        output::print_detail(name, &output::status_colored(state));
                    }
                }
            }

            println!();
            match status {
                "healthy" => output::print_success("All systems operational"),
                "degraded" => output::print_warning("A downstream dependency is unavailable"),
                other => output::print_error(&format!(
                    "System status: {} (HTTP {})",
                    other,
                    http_status.as_u16()
                )),
            }
        }
        _ => output::print_item(&health, format)?,
    }

    Ok(())
}
