mod cli;

use anyhow::{anyhow, Result};
use clap::Parser;
use cli::{Command, EstateCommand, PersistArgs, RootArgs, RunArgs};
use concordat::cache::EstateCache;
use concordat::config::{EnvSnapshot, Settings, LOG_FILTER_VAR};
use concordat::estate::{resolve_github_owner, EstateRecord, EstateRegistry};
use concordat::execution::{apply_arguments, EstateRunner, ExecutionOptions, ExecutionReport};
use concordat::persistence::{PersistOptions, PersistenceInputs, Persister};
use concordat::prompt::{NonInteractive, Prompter, TerminalPrompter};
use concordat::tofu::{ExecutionIo, ProcessLauncher};
use std::io;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = RootArgs::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("concordat: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_VAR).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn exit_code(code: i32) -> ExitCode {
    if code == 0 {
        return ExitCode::SUCCESS;
    }
    ExitCode::from(code.clamp(1, 255) as u8)
}

/// Shared state for one invocation.
struct Context {
    env: EnvSnapshot,
    settings: Settings,
}

impl Context {
    fn registry(&self) -> EstateRegistry {
        EstateRegistry::new(self.settings.config_path.clone())
    }

    fn cache(&self) -> EstateCache {
        EstateCache::new(self.settings.cache_root.clone())
    }

    fn launcher(&self) -> ProcessLauncher {
        ProcessLauncher::new(self.settings.tofu_command.clone())
    }
}

fn run(cli: RootArgs) -> Result<i32> {
    let env = EnvSnapshot::capture();
    let settings = Settings::from_env(&env)?
        .with_config_path(cli.config)
        .with_cache_root(cli.cache_dir);
    let ctx = Context { env, settings };

    match cli.command {
        Command::Estate(command) => cmd_estate(&ctx, command).map(|()| 0),
        Command::Plan(args) => {
            let (record, options) = execution_inputs(&ctx, &args.run, args.args)?;
            let mut stdout = io::stdout();
            let mut stderr = io::stderr();
            let mut io = ExecutionIo::new(&mut stdout, &mut stderr);
            let report = runner(&ctx, |runner| runner.plan(&record, &options, &mut io))?;
            finish(&report, &options)
        }
        Command::Apply(args) => {
            let extra_args = apply_arguments(&args.args, args.yes)?;
            let (record, options) = execution_inputs(&ctx, &args.run, extra_args)?;
            let mut prompter = TerminalPrompter;
            let mut stdout = io::stdout();
            let mut stderr = io::stderr();
            let mut io = ExecutionIo::new(&mut stdout, &mut stderr);
            let report = runner(&ctx, |runner| {
                runner.apply(&record, &options, &mut prompter, &mut io)
            })?;
            finish(&report, &options)
        }
        Command::Validate(args) => {
            let (record, options) = execution_inputs(&ctx, &args.run, Vec::new())?;
            let mut stdout = io::stdout();
            let mut stderr = io::stderr();
            let mut io = ExecutionIo::new(&mut stdout, &mut stderr);
            let report = runner(&ctx, |runner| runner.validate(&record, &options, &mut io))?;
            finish(&report, &options)
        }
        Command::Persist(args) => cmd_persist(&ctx, args).map(|()| 0),
    }
}

fn cmd_estate(ctx: &Context, command: EstateCommand) -> Result<()> {
    let registry = ctx.registry();
    match command {
        EstateCommand::Register(args) => {
            let record = EstateRecord::new(args.alias, args.repo_url)
                .with_branch(args.branch)
                .with_inventory_path(args.inventory)
                .with_github_owner(args.github_owner);
            registry.register(&record, true)?;
            println!("registered estate {} ({})", record.alias, record.repo_url);
        }
        EstateCommand::Use(args) => {
            let record = registry.set_active(&args.alias)?;
            println!("active estate: {}", record.alias);
        }
        EstateCommand::Ls => {
            let active = registry.active()?.map(|record| record.alias);
            for record in registry.list()? {
                let marker = if active.as_deref() == Some(record.alias.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {}\t{}\t{}",
                    record.alias, record.repo_url, record.branch
                );
            }
        }
        EstateCommand::Sync(args) => {
            let record = registry.resolve(args.alias.as_deref())?;
            let mirror = ctx.cache().sync(&record)?;
            println!("{}", mirror.display());
        }
    }
    Ok(())
}

fn execution_inputs(
    ctx: &Context,
    args: &RunArgs,
    extra_args: Vec<String>,
) -> Result<(EstateRecord, ExecutionOptions)> {
    let record = ctx.registry().resolve(args.estate.as_deref())?;
    let github_owner = resolve_github_owner(&record, args.github_owner.as_deref())?;
    let github_token = args
        .github_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            anyhow!("GitHub token is required; pass --github-token or set GITHUB_TOKEN.")
        })?
        .to_string();
    let options = ExecutionOptions {
        github_owner,
        github_token,
        extra_args,
        keep_workdir: args.keep_workdir,
        environment: None,
    };
    Ok((record, options))
}

fn runner<T>(ctx: &Context, body: impl FnOnce(&EstateRunner<'_>) -> Result<T>) -> Result<T> {
    let cache = ctx.cache();
    let launcher = ctx.launcher();
    body(&EstateRunner::new(&cache, &launcher, &ctx.env))
}

fn finish(report: &ExecutionReport, options: &ExecutionOptions) -> Result<i32> {
    if options.keep_workdir {
        eprintln!("kept workspace: {}", report.workdir.display());
    }
    Ok(report.exit_code)
}

fn cmd_persist(ctx: &Context, args: PersistArgs) -> Result<()> {
    let record = ctx.registry().resolve(args.estate.as_deref())?;
    let options = PersistOptions {
        inputs: PersistenceInputs {
            bucket: args.bucket,
            region: args.region,
            endpoint: args.endpoint,
            key_prefix: args.key_prefix,
            key_suffix: args.key_suffix,
        },
        force: args.force,
        allow_insecure_endpoint: args.allow_insecure_endpoint,
        fmt: args.fmt,
        timestamp: None,
    };
    let mut prompter: Box<dyn Prompter> = if args.no_input {
        Box::new(NonInteractive)
    } else {
        Box::new(TerminalPrompter)
    };
    let cache = ctx.cache();
    let launcher = ctx.launcher();
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let mut io = ExecutionIo::new(&mut stdout, &mut stderr);
    let result = Persister::new(&cache, &launcher, &ctx.env).persist(
        &record,
        &options,
        prompter.as_mut(),
        &mut io,
    )?;
    println!("{}", result.render());
    Ok(())
}
