//! Post commands: generate, inspect and decide.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config;
use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum PostCommands {
    /// Generate a post and send it for approval
    Generate {
        /// Prompt for the content generator
        #[arg(short, long)]
        prompt: String,

        /// Target platform (server default when omitted)
        #[arg(long)]
        platform: Option<String>,
    },

    /// Show a post
    Show {
        /// Post ID
        post_id: Uuid,
    },

    /// Approve a pending post and queue it for publishing
    Approve {
        /// Post ID
        post_id: Uuid,

        /// Who is approving (defaults to the configured actor)
        #[arg(short, long, env = "HERALD_ACTOR")]
        actor: Option<String>,
    },

    /// Reject a pending post
    Reject {
        /// Post ID
        post_id: Uuid,

        /// Who is rejecting (defaults to the configured actor)
        #[arg(short, long, env = "HERALD_ACTOR")]
        actor: Option<String>,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateRequest {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<String>,
}

#[derive(Serialize)]
struct DecisionRequest {
    actor: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct Provenance {
    provider: String,
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct PostInfo {
    id: Uuid,
    message: String,
    platform: String,
    status: String,
    #[serde(default)]
    external_ref: Option<String>,
    #[serde(default)]
    approved_by: Option<String>,
    #[serde(default)]
    rejected_by: Option<String>,
    provenance: Provenance,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct DecisionInfo {
    outcome: String,
    status: Option<String>,
    message: String,
    #[serde(default)]
    publish_job_id: Option<Uuid>,
}

fn resolve_actor(actor: Option<String>) -> Result<String> {
    actor
        .or_else(|| config::load_value(config::ACTOR_KEY))
        .context("No actor given: pass --actor or run `herald config set actor <name>`")
}

fn print_post(post: &PostInfo) {
    output::print_header(&format!("Post {}", post.id));
    output::print_detail("Status", &output::status_colored(&post.status));
    output::print_detail("Platform", &post.platform);
    output::print_detail("Model", &format!("{}/{}", post.provenance.provider, post.provenance.model));
    output::print_detail("Prompt", &post.provenance.prompt);
    if let Some(actor) = &post.approved_by {
        output::print_detail("Approved by", actor);
    }
    if let Some(actor) = &post.rejected_by {
        output::print_detail("Rejected by", actor);
    }
    if let Some(external_ref) = &post.external_ref {
        output::print_detail("Published as", external_ref);
    }
    output::print_detail("Created", &post.created_at);
    output::print_detail("Updated", &post.updated_at);
    println!();
    println!("{}", post.message);
}

pub async fn execute(cmd: PostCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        PostCommands::Generate { prompt, platform } => {
            let post: PostInfo = client
                .post("/api/v1/posts", &GenerateRequest { prompt, platform })
                .await?;
            match format {
                OutputFormat::Table => {
                    print_post(&post);
                    println!();
                    output::print_success("Approval request queued");
                }
                _ => output::print_item(&post, format)?,
            }
        }

        PostCommands::Show { post_id } => {
            let post: PostInfo = client.get(&format!("/api/v1/posts/{}", post_id)).await?;
            match format {
                OutputFormat::Table => print_post(&post),
                _ => output::print_item(&post, format)?,
            }
        }

        PostCommands::Approve { post_id, actor } => {
            let decision: DecisionInfo = client
                .post(
                    &format!("/api/v1/posts/{}/approve", post_id),
                    &DecisionRequest {
                        actor: resolve_actor(actor)?,
                    },
                )
                .await?;
            match format {
                OutputFormat::Table => {
                    output::print_success(&decision.message);
                    if let Some(job_id) = decision.publish_job_id {
                        output::print_detail("Publish job", &job_id.to_string());
                    }
                }
                _ => output::print_item(&decision, format)?,
            }
        }

        PostCommands::Reject { post_id, actor } => {
            let decision: DecisionInfo = client
                .post(
                    &format!("/api/v1/posts/{}/reject", post_id),
                    &DecisionRequest {
                        actor: resolve_actor(actor)?,
                    },
                )
                .await?;
            match format {
                OutputFormat::Table => output::print_success(&decision.message),
                _ => output::print_item(&decision, format)?,
            }
        }
    }

    Ok(())
}
