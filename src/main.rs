// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `relay` command-line entry point.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::Value;

use relay::config::{self, CliOptions, RelaySettings};
use relay::telemetry::{init_telemetry, TelemetryConfig, GLOBAL_METRICS};
use relay::types::{ConfigMap, ExecutionOptions, ProviderMetadata};
use relay::ProviderRegistry;

/// Drive AI coding agents through one provider interface.
#[derive(Parser)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Default provider type for `run`
    #[arg(short, long, global = true, env = "RELAY_PROVIDER")]
    provider: Option<String>,

    /// Skip provider discovery
    #[arg(long, global = true)]
    no_discover: bool,

    /// Show debug logs
    #[arg(long, global = true)]
    debug: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RELAY_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered providers
    List {
        /// Only providers supporting this feature
        #[arg(long)]
        feature: Option<String>,
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show registry statistics
    Stats {
        /// Include execution metrics for this process
        #[arg(long)]
        metrics: bool,
    },

    /// Print a provider's configuration schema
    Schema {
        /// Provider type
        provider_type: String,
    },

    /// Check that a provider can reach its backend
    Test {
        provider_type: String,
        /// Provider config entry, `key=value` (value parsed as JSON when possible)
        #[arg(short, long = "config", value_name = "KEY=VALUE")]
        config: Vec<String>,
    },

    /// Execute a task
    Run {
        /// Provider type (defaults to `--provider` or settings)
        provider_type: Option<String>,

        /// Task text
        #[arg(short, long)]
        task: String,

        #[arg(long)]
        temperature: Option<f64>,

        #[arg(long)]
        max_tokens: Option<u64>,

        #[arg(long)]
        stream: bool,

        #[arg(short, long)]
        verbose: bool,

        /// Provider-scoped override, `type.key=value`
        #[arg(long = "set", value_name = "TYPE.KEY=VALUE")]
        overrides: Vec<String>,

        /// Provider config entry, `key=value`
        #[arg(short, long = "config", value_name = "KEY=VALUE")]
        config: Vec<String>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let workspace_root = std::env::current_dir()?;
    let workspace_root = config::find_workspace_root(&workspace_root).unwrap_or(workspace_root);
    let cli_options = CliOptions {
        default_provider: cli.provider.clone(),
        log_level: cli.log_level.clone(),
        discover: cli.no_discover.then_some(false),
        ..Default::default()
    };
    let settings = config::load_settings(&workspace_root, cli_options)?;

    let telemetry = if cli.debug {
        TelemetryConfig::development()
    } else {
        TelemetryConfig::default().with_level_name(&settings.log_level)
    };
    let _guard = init_telemetry(&telemetry)?;

    let registry = config::registry_from_settings(&settings);

    match cli.command {
        Commands::List { feature, format } => list(&registry, feature.as_deref(), format)?,
        Commands::Stats { metrics } => stats(&registry, metrics)?,
        Commands::Schema { provider_type } => schema(&registry, &provider_type)?,
        Commands::Test {
            provider_type,
            config,
        } => {
            let config = provider_config(&settings, &provider_type, &config)?;
            test(&registry, &provider_type, config).await?
        }
        Commands::Run {
            provider_type,
            task,
            temperature,
            max_tokens,
            stream,
            verbose,
            overrides,
            config,
            format,
        } => {
            let provider_type = provider_type
                .or_else(|| settings.default_provider.clone())
                .ok_or_else(|| anyhow!("No provider given and no defaultProvider configured"))?;
            let config = provider_config(&settings, &provider_type, &config)?;

            let mut options = ExecutionOptions::new(task).with_stream(stream);
            options.verbose = verbose;
            if let Some(t) = temperature {
                options = options.with_temperature(t);
            }
            if let Some(n) = max_tokens {
                options = options.with_max_tokens(n);
            }
            for entry in &overrides {
                let (key, value) = parse_pair(entry)?;
                let (scope, option) = key
                    .split_once('.')
                    .ok_or_else(|| anyhow!("--set expects TYPE.KEY=VALUE, got '{entry}'"))?;
                options = options.with_override(scope, option, value);
            }

            let ok = run(&registry, &provider_type, config, options, format).await?;
            if !ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Split `key=value`; the value is JSON when it parses, else a string.
fn parse_pair(entry: &str) -> anyhow::Result<(String, Value)> {
    let (key, raw) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{entry}'"))?;
    if key.is_empty() {
        bail!("Empty key in '{entry}'");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Settings config for the type with `--config` entries on top.
fn provider_config(
    settings: &RelaySettings,
    provider_type: &str,
    entries: &[String],
) -> anyhow::Result<Option<ConfigMap>> {
    let mut config = settings.provider_config(provider_type).cloned();
    for entry in entries {
        let (key, value) = parse_pair(entry)?;
        config.get_or_insert_with(ConfigMap::new).insert(key, value);
    }
    Ok(config)
}

fn list(
    registry: &ProviderRegistry,
    feature: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let providers = match feature {
        Some(feature) => registry.providers_by_feature(feature),
        None => registry.available_providers(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&providers)?),
        OutputFormat::Text => {
            if providers.is_empty() {
                println!("{}", "No providers registered".yellow());
                return Ok(());
            }
            for metadata in &providers {
                print_provider(registry, metadata);
            }
        }
    }
    Ok(())
}

fn print_provider(registry: &ProviderRegistry, metadata: &ProviderMetadata) {
    let origin = match &metadata.package_name {
        Some(package) => format!("external: {package}").dimmed(),
        None => "built-in".dimmed(),
    };
    let state = if registry.is_lazy(&metadata.provider_type) {
        "lazy".yellow()
    } else {
        "loaded".green()
    };
    println!(
        "{} {} v{} [{}] ({})",
        metadata.provider_type.bright_white().bold(),
        metadata.name,
        metadata.version,
        state,
        origin
    );
    if !metadata.description.is_empty() {
        println!("    {}", metadata.description);
    }
    if !metadata.supported_features.is_empty() {
        let features: Vec<&str> = metadata
            .supported_features
            .iter()
            .map(String::as_str)
            .collect();
        println!("    features: {}", features.join(", ").cyan());
    }
}

fn stats(registry: &ProviderRegistry, metrics: bool) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&registry.stats())?);
    if metrics {
        println!("\n{}", GLOBAL_METRICS.snapshot().format_report());
    }
    Ok(())
}

fn schema(registry: &ProviderRegistry, provider_type: &str) -> anyhow::Result<()> {
    let metadata = registry
        .provider_metadata(provider_type)
        .ok_or_else(|| anyhow!("Unknown provider type '{provider_type}'"))?;
    let schema = metadata.config_schema.unwrap_or(Value::Null);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

async fn test(
    registry: &ProviderRegistry,
    provider_type: &str,
    config: Option<ConfigMap>,
) -> anyhow::Result<()> {
    let provider = registry
        .create_provider_async(provider_type, config.as_ref())
        .await
        .with_context(|| format!("Could not create provider '{provider_type}'"))?;

    if provider.test_connection().await {
        println!("{} {} is reachable", "✓".green(), provider.name());
        Ok(())
    } else {
        bail!("{} is not reachable", provider.name())
    }
}

async fn run(
    registry: &ProviderRegistry,
    provider_type: &str,
    config: Option<ConfigMap>,
    options: ExecutionOptions,
    format: OutputFormat,
) -> anyhow::Result<bool> {
    let provider = registry
        .create_provider_async(provider_type, config.as_ref())
        .await
        .with_context(|| format!("Could not create provider '{provider_type}'"))?;

    let result = provider.execute(options).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            if result.success {
                print!("{}", result.output);
                if !result.output.ends_with('\n') {
                    println!();
                }
            } else {
                eprintln!(
                    "{} {}",
                    "error:".red().bold(),
                    result.error.as_deref().unwrap_or("execution failed")
                );
            }
            eprintln!("{}", format!("({} ms)", result.duration_ms).dimmed());
        }
    }
    Ok(result.success)
}
