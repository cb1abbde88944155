//! Job queue administration: counts, dead letters, replay and discard.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tabled::Tabled;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Job counts by status
    Stats,

    /// List dead-lettered jobs, newest first
    Dead {
        /// Maximum number of jobs (1-500)
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Requeue a dead job with a fresh retry budget
    Retry {
        /// Job ID
        job_id: Uuid,
    },

    /// Permanently delete a job
    Discard {
        /// Job ID
        job_id: Uuid,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
struct JobStats {
    counts: BTreeMap<String, u64>,
    total: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct JobInfo {
    id: Uuid,
    job_type: String,
    status: String,
    attempts: u32,
    max_retries: u32,
    #[serde(default)]
    last_error: Option<String>,
    next_run_at: String,
    updated_at: String,
}

#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    job_type: String,
    #[tabled(rename = "Attempts")]
    attempts: String,
    #[tabled(rename = "Last error")]
    last_error: String,
    #[tabled(rename = "Updated")]
    updated_at: String,
}

impl From<&JobInfo> for JobRow {
    fn from(job: &JobInfo) -> Self {
        Self {
            id: job.id.to_string(),
            job_type: job.job_type.clone(),
            attempts: format!("{}/{}", job.attempts, job.max_retries),
            last_error: output::truncate(job.last_error.as_deref().unwrap_or("-"), 48),
            updated_at: job.updated_at.clone(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct CountRow {
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Jobs")]
    count: u64,
}

pub async fn execute(cmd: JobCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        JobCommands::Stats => {
            let stats: JobStats = client.get("/api/v1/admin/jobs/stats").await?;
            match format {
                OutputFormat::Table => {
                    let rows: Vec<CountRow> = stats
                        .counts
                        .iter()
                        .map(|(status, count)| CountRow {
                            status: output::status_colored(status),
                            count: *count,
                        })
                        .collect();
                    output::print_list(&rows, format)?;
                    output::print_detail("Total", &stats.total.to_string());
                }
                _ => output::print_item(&stats, format)?,
            }
        }

        JobCommands::Dead { limit } => {
            let jobs: Vec<JobInfo> = client
                .get(&format!("/api/v1/admin/jobs/dead?limit={}", limit))
                .await?;
            match format {
                OutputFormat::Table => {
                    let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
                    output::print_list(&rows, format)?;
                }
                _ => output::print_item(&jobs, format)?,
            }
        }

        JobCommands::Retry { job_id } => {
            let job: JobInfo = client
                .post_empty(&format!("/api/v1/admin/jobs/{}/retry", job_id))
                .await?;
            match format {
                OutputFormat::Table => output::print_success(&format!(
                    "Job {} requeued ({}), next run at {}",
                    job.id, job.job_type, job.next_run_at
                )),
                _ => output::print_item(&job, format)?,
            }
        }

        JobCommands::Discard { job_id } => {
            let result: serde_json::Value = client
                .delete(&format!("/api/v1/admin/jobs/{}", job_id))
                .await?;
            match format {
                OutputFormat::Table => output::print_success(&format!("Job {} discarded", job_id)),
                _ => output::print_item(&result, format)?,
            }
        }
    }

    Ok(())
}
