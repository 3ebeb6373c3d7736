//! ---
//! rfr_section: "06-cli"
//! rfr_subsection: "binary"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Control CLI for managing route filter rules."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rfr_arm::ArmClient;
use rfr_common::config::AppConfig;
use rfr_common::logging::{bootstrap_subscriber, init_tracing};
use rfr_core::schema::{self, AttributeMap};
use rfr_core::{
    ControllerSettings, LockRegistry, RemoteClient, RouteFilterDataSource, RuleController,
    RuleId, RuleResource,
};
use rfr_metrics::{encode_text, new_registry, LifecycleMetrics};
use rfr_testharness::InMemoryControlPlane;
use serde_json::json;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "configs/example.toml";

#[derive(Debug, Parser)]
#[command(author, version, about = "Route filter rule control utility", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        help = "Run against an in-process control plane instead of Azure Resource Manager"
    )]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create or update a rule from a TOML attribute file")]
    Apply {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long, help = "Treat the rule as new; refuses to adopt an existing rule")]
        new: bool,
    },
    #[command(about = "Read a rule by identifier")]
    Show { id: String },
    #[command(about = "Adopt an existing rule by identifier")]
    Import { id: String },
    #[command(about = "Delete a rule by identifier")]
    Delete { id: String },
    #[command(about = "Show a route filter and its rules")]
    Filter {
        #[arg(long)]
        resource_group: String,
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = tracing::subscriber::with_default(bootstrap_subscriber(), || load_config(&cli))?;
    let _tracing = init_tracing("rfrctl", &config.logging)?;

    let registry = new_registry();
    let client = build_client(&cli, &config)?;
    let mut controller = RuleController::new(
        client.clone(),
        Arc::new(LockRegistry::new()),
        ControllerSettings::from_config(&config),
    );
    if config.metrics.enabled {
        controller = controller.with_metrics(LifecycleMetrics::new(registry.clone())?);
    }
    let resource = RuleResource::new(Arc::new(controller));

    let output = match cli.command {
        Commands::Apply { file, new } => {
            let attributes = load_attributes(&file)?;
            let desired = schema::expand_rule(&attributes)?;
            let state = resource
                .controller()
                .create_or_update(&desired, new)
                .await?;
            let attributes = match &state.rule {
                Some(rule) => schema::flatten_rule(&state.key, rule),
                None => AttributeMap::new(),
            };
            json!({ "id": state.id, "attributes": attributes })
        }
        Commands::Show { id } => match resource.read(&id).await? {
            Some(state) => serde_json::to_value(state)?,
            None => {
                warn!(%id, "rule no longer exists");
                json!({ "id": id, "vanished": true })
            }
        },
        Commands::Import { id } => serde_json::to_value(resource.import(&id).await?)?,
        Commands::Delete { id } => {
            resource.delete(&id).await?;
            json!({ "id": id, "deleted": true })
        }
        Commands::Filter {
            resource_group,
            name,
        } => {
            let source = RouteFilterDataSource::new(client.clone(), config.timeouts.read);
            serde_json::to_value(source.read(&resource_group, &name).await?)?
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if config.metrics.enabled {
        eprintln!("{}", encode_text(&registry)?);
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG));
    match AppConfig::load(&candidates) {
        Ok(config) => Ok(config),
        Err(err) if cli.simulate && cli.config.is_none() => {
            warn!(error = %format!("{err:#}"), "using built-in defaults for simulation");
            let mut config = AppConfig::default();
            config.provider.subscription_id = rfr_testharness::DEFAULT_SUBSCRIPTION.to_owned();
            Ok(config)
        }
        Err(err) => Err(err),
    }
}

fn build_client(cli: &Cli, config: &AppConfig) -> Result<Arc<dyn RemoteClient>> {
    if !cli.simulate {
        info!(endpoint = %config.provider.endpoint, "using Azure Resource Manager");
        return Ok(Arc::new(ArmClient::from_config(&config.provider)?));
    }
    let plane = InMemoryControlPlane::new(config.provider.subscription_id.clone());
    // The simulated control plane starts empty; make the targeted filter exist.
    let filter = match &cli.command {
        Commands::Apply { file, .. } => {
            let desired = schema::expand_rule(&load_attributes(file)?)?;
            Some(desired.key.filter_key())
        }
        Commands::Show { id } | Commands::Import { id } | Commands::Delete { id } => {
            RuleId::decode(id).ok().map(|id| id.filter_key())
        }
        Commands::Filter {
            resource_group,
            name,
        } => rfr_core::FilterKey::new(resource_group.as_str(), name.as_str()).ok(),
    };
    if let Some(filter) = filter {
        plane.register_filter(&filter);
    }
    info!("using simulated control plane");
    Ok(Arc::new(plane))
}

fn load_attributes(path: &Path) -> Result<AttributeMap> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read rule file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("failed to parse rule file {}", path.display()))
}
