//! CLI argument parsing.
//!
//! Argument types stay free of behaviour; `main.rs` routes each command to
//! the library.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "concordat",
    version,
    about = "Run OpenTofu against estate repositories with self-healing apply",
    after_help = "Examples:\n  concordat estate register core git@github.com:acme/estate.git\n  concordat plan\n  concordat apply --yes\n  concordat persist --bucket estate-state --region fr-par --endpoint https://s3.fr-par.scw.cloud",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Estate registry file (default: $XDG_CONFIG_HOME/concordat/config.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding estate mirrors (default: $XDG_CACHE_HOME/concordat/estates)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Log at debug level unless CONCORDAT_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage registered estates
    #[command(subcommand)]
    Estate(EstateCommand),
    /// Run tofu plan in a fresh estate workspace
    Plan(PlanArgs),
    /// Run tofu apply, recovering from known failures
    Apply(ApplyArgs),
    /// Run tofu validate without the remote backend
    Validate(ValidateArgs),
    /// Configure remote state and push it on a new branch
    Persist(PersistArgs),
}

#[derive(Subcommand, Debug)]
pub enum EstateCommand {
    /// Register an estate repository
    Register(RegisterArgs),
    /// Make an estate the active one
    Use(UseArgs),
    /// List registered estates
    Ls,
    /// Clone or refresh the cached mirror of an estate
    Sync(SyncArgs),
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    pub alias: String,

    pub repo_url: String,

    /// Branch holding the estate configuration
    #[arg(long, default_value = concordat::estate::DEFAULT_BRANCH)]
    pub branch: String,

    /// Inventory file relative to the repository root
    #[arg(long, value_name = "PATH", default_value = concordat::estate::DEFAULT_INVENTORY_PATH)]
    pub inventory: String,

    /// GitHub owner; otherwise taken from the repository URL
    #[arg(long, value_name = "OWNER")]
    pub github_owner: Option<String>,
}

#[derive(Args, Debug)]
pub struct UseArgs {
    pub alias: String,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Estate to sync (default: the active estate)
    pub alias: Option<String>,
}

/// Inputs shared by the commands that run the tool.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Estate alias (default: the active estate)
    #[arg(long, value_name = "ALIAS")]
    pub estate: Option<String>,

    /// GitHub owner passed to the configuration as `github_owner`
    #[arg(long, value_name = "OWNER")]
    pub github_owner: Option<String>,

    /// Token exported to the tool as GITHUB_TOKEN
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Leave the execution workspace on disk
    #[arg(long)]
    pub keep_workdir: bool,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Extra arguments passed to tofu plan
    #[arg(last = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Approve the apply (runs tofu apply -auto-approve)
    #[arg(long)]
    pub yes: bool,

    /// Extra arguments passed to tofu apply
    #[arg(last = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct PersistArgs {
    /// Estate alias (default: the active estate)
    #[arg(long, value_name = "ALIAS")]
    pub estate: Option<String>,

    #[arg(long, env = "CONCORDAT_BUCKET")]
    pub bucket: Option<String>,

    #[arg(long, env = "CONCORDAT_REGION")]
    pub region: Option<String>,

    /// Object store endpoint; https:// is added when no scheme is given
    #[arg(long, env = "CONCORDAT_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, env = "CONCORDAT_KEY_PREFIX")]
    pub key_prefix: Option<String>,

    #[arg(long, env = "CONCORDAT_KEY_SUFFIX")]
    pub key_suffix: Option<String>,

    /// Replace backend files whose content differs
    #[arg(long)]
    pub force: bool,

    /// Accept an http:// endpoint
    #[arg(long)]
    pub allow_insecure_endpoint: bool,

    /// Run tofu fmt -recursive before committing
    #[arg(long)]
    pub fmt: bool,

    /// Never prompt; missing values without defaults are errors
    #[arg(long)]
    pub no_input: bool,
}
