use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use provisioner::admin::{self, ProjectRegistration};
use provisioner::config::PreviewConfig;
use provisioner::db::{DbClient, ProjectUpsert};
use provisioner::provisioning::client::ForgeClientFactory;
use provisioner::webhook::{self, WebhookState};
use provisioner::worker::Worker;

#[derive(Debug, Parser)]
#[command(name = "provisioner")]
#[command(about = "Pull request preview environment provisioner")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the webhook endpoint and/or the job workers.
    Serve {
        #[arg(long, value_enum)]
        role: Option<Role>,
    },
    #[command(subcommand)]
    User(UserCommand),
    #[command(subcommand)]
    Project(ProjectCommand),
    #[command(subcommand)]
    Jobs(JobsCommand),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Role {
    Webhook,
    Worker,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    /// Register an account and its provisioning API token.
    Add {
        username: String,
        #[arg(long, env = "PREVIEW_API_TOKEN")]
        api_token: String,
    },
}

#[derive(Debug, Subcommand)]
enum ProjectCommand {
    /// Track a repository, or restore a removed one.
    Add(ProjectAddArgs),
    /// Stop tracking a repository. Existing branches are kept.
    Remove { repository: String },
    List,
}

#[derive(Debug, Args)]
struct ProjectAddArgs {
    repository: String,
    #[arg(long)]
    user: String,
    #[arg(long)]
    server_id: i64,
    /// Site domain pattern; `*` becomes `pr-<number>`.
    #[arg(long)]
    site_url_pattern: String,
    #[arg(long)]
    webhook_secret: Option<String>,
    #[arg(long)]
    deployment_script: Option<PathBuf>,
    #[arg(long)]
    initial_deployment_script: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum JobsCommand {
    /// List dead-lettered jobs.
    Failed,
    /// Requeue a dead-lettered job and the rest of its chain.
    Retry { job_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PreviewConfig::load()?;
    let database_path = config.database_path();
    let db = DbClient::initialize(&database_path).await?;

    match cli.command.unwrap_or(Command::Serve { role: None }) {
        Command::Serve { role } => serve(&config, db, role).await,
        Command::User(UserCommand::Add {
            username,
            api_token,
        }) => {
            let user_id = admin::add_user(&db, &username, &api_token).await?;
            println!("{user_id}");
            Ok(())
        }
        Command::Project(command) => run_project_command(&db, command).await,
        Command::Jobs(JobsCommand::Failed) => {
            for job in admin::failed_jobs(&db).await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    job.id,
                    job.branch_id,
                    job.kind,
                    job.attempts,
                    job.last_error.unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Jobs(JobsCommand::Retry { job_id }) => admin::retry_job(&db, job_id).await,
    }
}

async fn run_project_command(db: &DbClient, command: ProjectCommand) -> Result<()> {
    match command {
        ProjectCommand::Add(args) => {
            let registration = ProjectRegistration {
                username: args.user,
                repository: args.repository,
                webhook_secret: args.webhook_secret,
                server_id: args.server_id,
                site_url_pattern: args.site_url_pattern,
                deployment_script: read_script(args.deployment_script.as_deref())?,
                initial_deployment_script: read_script(args.initial_deployment_script.as_deref())?,
            };
            let registered = admin::add_project(db, registration).await?;
            let verb = match registered.outcome {
                ProjectUpsert::Created => "created",
                ProjectUpsert::Restored => "restored",
            };
            println!("{verb} {}", registered.project_id);
            println!("webhook secret: {}", registered.webhook_secret);
        }
        ProjectCommand::Remove { repository } => admin::remove_project(db, &repository).await?,
        ProjectCommand::List => {
            for project in admin::list_projects(db).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    project.id, project.repository, project.server_id, project.site_url_pattern
                );
            }
        }
    }

    Ok(())
}

fn read_script(path: Option<&Path>) -> Result<String> {
    path.map_or_else(
        || Ok(String::new()),
        |path| {
            fs::read_to_string(path)
                .with_context(|| format!("failed to read script {}", path.display()))
        },
    )
}

async fn serve(config: &PreviewConfig, db: DbClient, role: Option<Role>) -> Result<()> {
    let run_webhook = role != Some(Role::Worker);
    let run_workers = role != Some(Role::Webhook);
    let (shutdown_sender, shutdown) = watch::channel(false);

    let mut workers = Vec::new();
    if run_workers {
        let queue_settings = config.queue_settings();
        let apis = Arc::new(ForgeClientFactory::new(
            &config.api_base_url(),
            config.request_timeout(),
        )?);
        let worker = Worker::new(db.clone(), apis, config.site_settings(), &queue_settings);
        workers = worker.spawn(&queue_settings, &shutdown);
        info!(count = workers.len(), "job workers running");
    }

    if run_webhook {
        let bind_address = config.bind_address();
        webhook::serve(WebhookState { db }, &bind_address, wait_for_ctrl_c()).await?;
    } else {
        wait_for_ctrl_c().await;
    }
    let _ = shutdown_sender.send(true);

    for worker in workers {
        worker.await?;
    }

    info!("shut down");
    Ok(())
}

async fn wait_for_ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");
}
