//! fldist - deploy modules, services and scripts onto network peers
//!
//! Usage:
//!   fldist upload -p module.wasm -n name     # Upload one module
//!   fldist deploy_app -i app.json -o out.json
//!   fldist distribute -c catalog.toml        # Place catalog blueprints on env nodes
//!   fldist env                               # Show nodes of the environment

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fldist_core::app::{AppDeployer, AppReport, Loader, Source};
use fldist_core::config::{ConfigStore, FldistConfig, select_relay};
use fldist_core::deploy::{Catalog, DistributionOrchestrator, DistributionReport};
use fldist_core::distributor::{Distributor, NodeApi};
use fldist_core::request::Completion;
use fldist_core::session::{Identity, Session};
use fldist_core::transport::BridgeTransport;
use fldist_core::types::{Blueprint, Module, ModuleConfig, Node, Variables};

const DEFAULT_LOG_FILTER: &str = "fldist=info,warn";

#[derive(Parser)]
#[command(name = "fldist")]
#[command(about = "Deploy modules, services and scripts onto network peers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct GlobalArgs {
    /// Client seed (base64)
    #[arg(short, long, global = true)]
    seed: Option<String>,

    /// Environment to use
    #[arg(long, global = true)]
    env: Option<String>,

    /// Peer id of the node to use
    #[arg(long = "node-id", visible_alias = "node", global = true)]
    node_id: Option<String>,

    /// Multiaddr of the node to use (requires --node-id)
    #[arg(long = "node-addr", global = true)]
    node_addr: Option<String>,

    /// Log level
    #[arg(long, global = true)]
    log: Option<LogLevel>,

    /// Request time to live, in milliseconds
    #[arg(long, global = true)]
    ttl: Option<u64>,

    /// Path to fldist.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
#[command(rename_all = "snake_case")]
enum Commands {
    /// Upload a wasm module
    #[command(group(ArgGroup::new("module_name").required(true).args(["module_config", "name"])))]
    Upload {
        /// Path to wasm file
        #[arg(short, long)]
        path: PathBuf,

        /// Path to a JSON module config: {"name": ..., "mountedBinaries": ..., "preopenedFiles": ..., "mappedDirs": ...}
        #[arg(short = 'c', long = "module-config")]
        module_config: Option<PathBuf>,

        /// Name of the module
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Print all modules on a node
    GetModules {
        /// Pretty-print JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Print all services on a node
    GetInterfaces {
        /// Expand interfaces, default is minified
        #[arg(long)]
        expand: bool,
    },

    /// Print a service interface
    GetInterface {
        /// Service id
        #[arg(short, long)]
        id: String,

        /// Expand interface, default is minified
        #[arg(long)]
        expand: bool,
    },

    /// Add a blueprint
    AddBlueprint {
        /// Name of the blueprint
        #[arg(short, long)]
        name: String,

        /// Module names or hash:<hex> references
        #[arg(short, long, num_args = 1.., required = true)]
        deps: Vec<String>,
    },

    /// Create a service from an existing blueprint
    CreateService {
        /// Blueprint id
        #[arg(short, long)]
        id: String,
    },

    /// Create a service from a list of modules
    NewService {
        /// <path to wasm module>:<path to config> pairs
        #[arg(long, visible_alias = "ms", num_args = 1.., required = true)]
        modules: Vec<String>,

        /// Name of the service; set in the blueprint
        #[arg(short, long)]
        name: String,
    },

    /// Deploy an application described by a JSON document
    DeployApp {
        /// Path to the deployment document
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the document with assigned ids
        #[arg(short, long)]
        output: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Send a script and print every result it returns until the TTL expires
    RunAir {
        /// Path to the script
        #[arg(short, long)]
        path: PathBuf,

        /// Script variables as a JSON object
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// Store a script on the node for periodic execution
    AddScript {
        /// Path to the script
        #[arg(short, long)]
        path: PathBuf,

        /// Seconds between runs (at least 3)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Remove a stored script
    RemoveScript {
        /// Script id
        #[arg(short, long)]
        id: String,
    },

    /// Place catalog blueprints onto the nodes of the environment
    Distribute {
        /// Path to the catalog TOML
        #[arg(short, long)]
        catalog: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show nodes in the selected environment
    Env {
        /// Output environment as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate a random client seed
    #[command(visible_alias = "create_keypair")]
    CreateSeed {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,

        /// Store the seed in fldist.toml
        #[arg(long)]
        save: bool,
    },
}

#[derive(Clone, Copy, ValueEnum, Default, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Filter directive: `--log` wins over `RUST_LOG`, which wins over the default.
fn log_filter(level: Option<LogLevel>) -> tracing_subscriber::EnvFilter {
    match level {
        Some(level) => tracing_subscriber::EnvFilter::new(format!("fldist={},warn", level.as_str())),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable.
    tracing_subscriber::registry()
        .with(log_filter(cli.global.log))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    run_cli(cli).await
}

/// Resolved configuration for one invocation.
struct Context {
    config: FldistConfig,
    env_name: String,
    nodes: Vec<Node>,
    relay: Node,
    ttl: Duration,
    seed: Option<String>,
}

impl Context {
    fn load(global: &GlobalArgs) -> Result<Self> {
        let store = ConfigStore::resolve(global.config.as_deref())?;
        let config = store.load()?;
        let env_name = global
            .env
            .clone()
            .unwrap_or_else(|| config.default_env.clone());
        let nodes = config.environment(&env_name)?.nodes;
        let relay = select_relay(
            &env_name,
            &nodes,
            global.node_id.as_deref(),
            global.node_addr.as_deref(),
        )?;
        let ttl = Duration::from_millis(global.ttl.unwrap_or(config.ttl_ms));
        let seed = global.seed.clone().or_else(|| config.seed.clone());
        Ok(Self {
            config,
            env_name,
            nodes,
            relay,
            ttl,
            seed,
        })
    }

    fn distributor(&self) -> Result<Distributor> {
        let bridge = self.config.transport.clone().with_context(|| {
            "No transport configured; set [transport] command in fldist.toml".to_string()
        })?;
        let transport = BridgeTransport::new(bridge)?;
        let identity = Identity::from_seed_or_generate(self.seed.as_deref())?;
        let session = Session::new(Arc::new(transport), identity, self.ttl);
        Ok(Distributor::new(Arc::new(session), self.relay.clone()))
    }
}

async fn run_cli(cli: Cli) -> Result<()> {
    if let Commands::CreateSeed { format, save } = cli.command {
        return run_create_seed(&cli.global, format, save);
    }
    let ctx = Context::load(&cli.global)?;

    match cli.command {
        Commands::Env { json } => run_env(&ctx, json),
        command => {
            let distributor = ctx.distributor()?;
            let session = Arc::clone(distributor.session());
            let result = run_remote(&ctx, distributor, command).await;
            if let Err(e) = session.close().await {
                warn!(error = %e, "failed to close session");
            }
            result
        }
    }
}

async fn run_remote(ctx: &Context, distributor: Distributor, command: Commands) -> Result<()> {
    let relay = ctx.relay.clone();
    let loader = Loader::new(".");

    match command {
        Commands::Upload {
            path,
            module_config,
            name,
        } => {
            let config = match (module_config, name) {
                (Some(config), _) => loader.module_config(&Source::File(config)).await?,
                (None, Some(name)) => ModuleConfig::new(name),
                (None, None) => anyhow::bail!("Either --name or --module-config is required"),
            };
            let module = load_module(&loader, &path, config).await?;
            let hash = distributor.upload_module(&relay, &module).await?;
            println!("module uploaded successfully, hash: {hash}");
        }
        Commands::GetModules { pretty } => {
            let modules = distributor.get_modules(&relay).await?;
            print_value(&modules, pretty)?;
        }
        Commands::GetInterfaces { expand } => {
            let interfaces = distributor.get_interfaces(&relay).await?;
            print_value(&interfaces, expand)?;
        }
        Commands::GetInterface { id, expand } => {
            let interface = distributor.get_interface(&relay, &id).await?;
            print_value(&interface, expand)?;
        }
        Commands::AddBlueprint { name, deps } => {
            let id = distributor
                .add_blueprint(&relay, &Blueprint::new(name, deps))
                .await?;
            println!("blueprint '{id}' added successfully");
        }
        Commands::CreateService { id } => {
            let service_id = distributor.create_service(&relay, &id).await?;
            println!("service id: {service_id}");
        }
        Commands::NewService { modules, name } => {
            let mut deps = Vec::with_capacity(modules.len());
            for pair in &modules {
                let (wasm, config) = split_module_pair(pair)?;
                let config = loader.module_config(&Source::File(config.into())).await?;
                let module = load_module(&loader, Path::new(wasm), config).await?;
                let hash = distributor.upload_module(&relay, &module).await?;
                println!("module '{}' uploaded, hash: {hash}", module.name());
                deps.push(module.name().to_string());
            }
            let blueprint_id = distributor
                .add_blueprint(&relay, &Blueprint::new(name, deps))
                .await?;
            println!("blueprint '{blueprint_id}' added successfully");
            let service_id = distributor.create_service(&relay, &blueprint_id).await?;
            println!("service id: {service_id}");
            println!("service created successfully");
        }
        Commands::DeployApp {
            input,
            output,
            format,
        } => {
            let root = input.parent().unwrap_or_else(|| Path::new("."));
            let deployer = AppDeployer::new(distributor, Loader::new(root), relay)
                .with_nodes(ctx.nodes.clone())
                .with_retry(ctx.config.retry_policy());
            let (_, report) = deployer
                .deploy_file(&input, &output)
                .await
                .with_context(|| format!("Failed to deploy {}", input.display()))?;
            print_app_report(&report, &output, format)?;
        }
        Commands::RunAir { path, data } => {
            let script = loader.text(&Source::File(path)).await?;
            let variables: Variables =
                serde_json::from_str(&data).context("--data must be a JSON object")?;
            let handle = distributor
                .run_air(&relay, &script, variables, |event| {
                    let args = serde_json::Value::Array(event.args.clone());
                    println!("{args}");
                })
                .await?;
            let particle_id = handle.particle_id().to_string();
            println!("particle id: {particle_id}. Waiting for results... Press Ctrl+C to stop the script.");
            tokio::select! {
                completion = handle.wait() => {
                    if let Completion::Result(args) = completion? {
                        println!("{}", serde_json::Value::Array(args));
                    }
                }
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Commands::AddScript { path, interval } => {
            let script = loader.text(&Source::File(path)).await?;
            let id = distributor.add_script(&relay, &script, interval).await?;
            println!("script id: {id}");
        }
        Commands::RemoveScript { id } => {
            distributor.remove_script(&relay, &id).await?;
            println!("script '{id}' removed");
        }
        Commands::Distribute { catalog, format } => {
            let (catalog_data, distribution) = Catalog::load(&catalog)
                .await
                .with_context(|| format!("Failed to load catalog {}", catalog.display()))?;
            let mut orchestrator = DistributionOrchestrator::new(distributor, ctx.nodes.clone())
                .with_retry(ctx.config.retry_policy());
            let report = orchestrator.distribute(&catalog_data, &distribution).await?;
            print_distribution_report(&report, format)?;
        }
        Commands::Env { .. } | Commands::CreateSeed { .. } => {}
    }
    Ok(())
}

async fn load_module(loader: &Loader, path: &Path, config: ModuleConfig) -> Result<Module> {
    let bytes = loader
        .bytes(&Source::File(path.to_path_buf()))
        .await
        .with_context(|| format!("Failed to read module {}", path.display()))?;
    Ok(Module::new(bytes, config))
}

/// Split `<wasm>:<config>`.
fn split_module_pair(pair: &str) -> Result<(&str, &str)> {
    match pair.rsplit_once(':') {
        Some((wasm, config)) if !wasm.is_empty() && !config.is_empty() => Ok((wasm, config)),
        _ => anyhow::bail!("Invalid module '{pair}', expected <path to wasm>:<path to config>"),
    }
}

fn print_value(value: &serde_json::Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

fn run_env(ctx: &Context, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&ctx.nodes)?);
    } else {
        for node in &ctx.nodes {
            println!("{}", node.address);
        }
    }
    tracing::debug!(env = %ctx.env_name, nodes = ctx.nodes.len(), "environment listed");
    Ok(())
}

fn run_create_seed(global: &GlobalArgs, format: OutputFormat, save: bool) -> Result<()> {
    let identity = Identity::generate();
    if save {
        let store = ConfigStore::resolve(global.config.as_deref())?;
        save_seed(&store, &identity)?;
    }
    match format {
        OutputFormat::Table => {
            println!("seed:    {}", identity.seed());
            println!("peer id: {}", identity.peer_id());
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "seed": identity.seed(),
                "peer_id": identity.peer_id(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Write the identity's seed into the config, keeping every other setting.
fn save_seed(store: &ConfigStore, identity: &Identity) -> Result<()> {
    let mut config = store.load()?;
    config.seed = Some(identity.seed().to_string());
    store.save(&config)?;
    info!(path = %store.config_path().display(), "seed saved");
    Ok(())
}

fn print_app_report(report: &AppReport, output: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{:<20} {}", "Modules uploaded", report.modules_uploaded);
            println!("{:<20} {}", "Services created", report.services_created);
            println!("{:<20} {}", "Scripts run", report.scripts_run);
            println!("{:<20} {}", "Scripts stored", report.stored_scripts.len());
            for script in &report.stored_scripts {
                println!(
                    "  {:<18} {} (every {}s)",
                    script.name,
                    script.id.as_deref().unwrap_or("-"),
                    script.interval_secs.unwrap_or_default()
                );
            }
            println!("Application deployed successfully, written to {}", output.display());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

fn print_distribution_report(report: &DistributionReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if report.services.is_empty() {
                println!("Nothing to distribute.");
                return Ok(());
            }
            println!("{:<40} {:<40} Node", "Service", "Blueprint");
            println!("{}", "-".repeat(100));
            for service in &report.services {
                println!(
                    "{:<40} {:<40} {}",
                    service.id, service.blueprint_id, service.node.peer_id
                );
            }
            println!();
            println!(
                "{} module upload(s), {} blueprint upload(s)",
                report.modules_uploaded, report.blueprints_uploaded
            );
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}
