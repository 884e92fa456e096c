use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use docs_deploy::error::{DeployError, Result};
use docs_deploy::event::{RunContext, TriggerEvent};
use docs_deploy::logging::{FileLogger, setup_logging};
use docs_deploy::pipeline::{Pipeline, RunOptions};
use docs_deploy::resolve::DeploymentPlan;
use docs_deploy::secrets::encrypt_file;
use docs_deploy::tags::compute_latest_tag;
use docs_deploy::{AppState, DEFAULT_CONFIG_PATH, DeployConfig, api, load_config};

/// Build documentation once and publish it to the object store and the
/// translation repository.
#[derive(Parser)]
#[clap(name = "docs_deploy", version)]
struct Cli {
    /// Path to the TOML config file
    #[clap(long, global = true, env = "DOCS_DEPLOY_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Also write logs to a daily rolling file in this directory
    #[clap(long, global = true, env = "DOCS_DEPLOY_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the deployment prefixes and gating decisions as JSON
    Resolve {
        #[clap(flatten)]
        event: EventArgs,

        /// Use this latest tag instead of reading the tag history
        #[clap(long)]
        latest_tag: Option<String>,
    },
    /// Print the latest release tag of a repository
    LatestTag {
        /// Repository to inspect (defaults to the configured source checkout)
        #[clap(long)]
        repo: Option<PathBuf>,
    },
    /// Build and publish
    Run {
        #[clap(flatten)]
        event: EventArgs,

        /// Reuse existing build output
        #[clap(long)]
        skip_build: bool,

        /// Log what would be published without contacting any remote
        #[clap(long)]
        dry_run: bool,
    },
    /// Listen for GitHub webhooks and deploy on push / workflow_dispatch
    Serve {
        /// Overrides [server] bind_address
        #[clap(long, env = "BIND_ADDRESS")]
        bind: Option<String>,

        #[clap(long)]
        dry_run: bool,
    },
    /// Encrypt a credential file with a hex key and IV taken from the environment
    EncryptSecret {
        #[clap(long)]
        input: PathBuf,
        #[clap(long)]
        output: PathBuf,
        /// Name of the variable holding the hex key
        #[clap(long)]
        key_env: String,
        /// Name of the variable holding the hex IV
        #[clap(long)]
        iv_env: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EventSource {
    /// Read the GitHub Actions environment
    Github,
    Push,
    Manual,
}

#[derive(Clone, Copy, ValueEnum)]
enum RefTypeArg {
    Branch,
    Tag,
}

#[derive(Args)]
struct EventArgs {
    #[clap(long, value_enum, default_value = "github")]
    event: EventSource,

    #[clap(long, value_enum)]
    ref_type: Option<RefTypeArg>,

    #[clap(long)]
    ref_name: Option<String>,

    /// Deployment prefix for a manual run
    #[clap(long)]
    prefix: Option<String>,

    /// Manual run: actually publish the site
    #[clap(long)]
    deploy: bool,

    /// Manual run: publish translatable strings
    #[clap(long)]
    translatables: bool,

    #[clap(long)]
    repository: Option<String>,

    #[clap(long)]
    commit_sha: Option<String>,

    #[clap(long)]
    run_url: Option<String>,
}

impl EventArgs {
    fn trigger(&self) -> Result<TriggerEvent> {
        match self.event {
            EventSource::Github => TriggerEvent::from_github_env(|k| std::env::var(k).ok()),
            EventSource::Push => {
                let name = self.ref_name.clone().ok_or_else(|| {
                    DeployError::EventError("--ref-name is required for push events".into())
                })?;
                match self.ref_type {
                    Some(RefTypeArg::Tag) => Ok(TriggerEvent::tag_push(name)),
                    Some(RefTypeArg::Branch) | None => Ok(TriggerEvent::branch_push(name)),
                }
            }
            EventSource::Manual => Ok(TriggerEvent::ManualDispatch {
                prefix: self.prefix.clone(),
                deploy_enabled: self.deploy,
                translatables_enabled: self.translatables,
            }),
        }
    }

    /// Explicit flags win over the GitHub environment.
    fn context(&self, config: &DeployConfig) -> RunContext {
        let mut ctx = RunContext::from_github_env(|k| std::env::var(k).ok());
        if ctx.repository.is_empty() {
            ctx.repository = config.source.repository.clone();
        }
        if let Some(repository) = &self.repository {
            ctx.repository = repository.clone();
        }
        if let Some(sha) = &self.commit_sha {
            ctx.commit_sha = sha.clone();
        }
        if let Some(url) = &self.run_url {
            ctx.run_url = Some(url.clone());
        }
        ctx
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| DeployError::EventError(format!("Failed to serialize output: {e}")))?;
    println!("{json}");
    Ok(())
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| DeployError::ConfigError(format!("{name} is not set")))
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Resolve { event, latest_tag } => {
            let config = load_config(&cli.config)?;
            let trigger = event.trigger()?;
            let latest_tag = match latest_tag {
                Some(tag) => Some(tag),
                None => compute_latest_tag(&config.source.repo_path).await?,
            };
            let plan = DeploymentPlan::new(trigger, latest_tag, &config.source.mainline_branch)?;
            print_json(&plan)
        }
        Commands::LatestTag { repo } => {
            let repo = match repo {
                Some(repo) => repo,
                None => load_config(&cli.config)?.source.repo_path,
            };
            match compute_latest_tag(&repo).await? {
                Some(tag) => println!("{tag}"),
                None => info!("No release tags in {}", repo.display()),
            }
            Ok(())
        }
        Commands::Run {
            event,
            skip_build,
            dry_run,
        } => {
            let config = load_config(&cli.config)?;
            let trigger = event.trigger()?;
            let ctx = event.context(&config);
            info!("Using config at {}", cli.config.display());
            let pipeline = Pipeline::new(config, RunOptions { skip_build, dry_run });
            let report = pipeline.run(trigger, &ctx).await?;
            print_json(&report)?;
            if report.is_success() {
                Ok(())
            } else {
                Err(DeployError::DeploymentFailed(report.failures().join("; ")))
            }
        }
        Commands::Serve { bind, dry_run } => {
            let mut config = load_config(&cli.config)?;
            if let Some(bind) = bind {
                config.server.get_or_insert_with(Default::default).bind_address = bind;
            }
            info!("Using config at {}", cli.config.display());
            api::serve(Arc::new(AppState::new(config, dry_run))).await
        }
        Commands::EncryptSecret {
            input,
            output,
            key_env,
            iv_env,
        } => {
            let key = env_var(&key_env)?;
            let iv = env_var(&iv_env)?;
            encrypt_file(&input, &output, &key, &iv)?;
            info!("Wrote {}", output.display());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let file_logger = cli.log_dir.clone().map(FileLogger::new);
    let _guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
