//! Command line access to a template store
//!
//! # Usage
//!
//! ```bash
//! # List templates of a category
//! template-rs --data-dir ./templates_data list --category promo
//!
//! # Search
//! template-rs search "spring sale" --tag seasonal --channel email
//!
//! # Roll back to an earlier version
//! template-rs rollback welcome v2-1717171717000
//!
//! # Export everything with history, then import elsewhere
//! template-rs export all.json --versions
//! template-rs --data-dir ./other import all.json --mode lenient
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use template_rs::import_export::{ExportOptions, ImportMode};
use template_rs::search::SearchFilters;
use template_rs::templates::Channel;
use template_rs::{Config, TemplateManager};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "template-rs")]
#[command(about = "Manage versioned message templates", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `storage.data_dir`
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List templates
    List {
        /// Only this category and its subcategories
        #[arg(long)]
        category: Option<String>,
    },
    /// Show one template with its metadata
    Show { id: String },
    /// Full-text search
    Search {
        query: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long = "channel")]
        channels: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Version history, newest first
    History { id: String },
    /// Restore an earlier version as the new active one
    Rollback {
        id: String,
        version: String,
        #[arg(long)]
        author: Option<String>,
    },
    /// Prune old versions and histories of deleted templates
    Cleanup {
        /// Versions to keep per template besides the active one
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Export templates to a JSON file
    Export {
        output: PathBuf,
        /// Only these templates
        #[arg(long = "id")]
        ids: Vec<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        versions: bool,
        #[arg(long)]
        analytics: bool,
    },
    /// Import templates from JSON files
    Import {
        files: Vec<PathBuf>,
        /// strict, lenient or skip
        #[arg(long, default_value = "strict")]
        mode: String,
    },
    /// Usage statistics of a template
    Stats { id: String },
    /// Suggested templates
    Recommend {
        /// Reference template
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        let relocated = Config::with_data_dir(data_dir).storage;
        // An explicitly configured analytics database stays where it is
        let default_url = Config::default().storage.analytics_database_url;
        if config.storage.analytics_database_url == default_url {
            config.storage.analytics_database_url = relocated.analytics_database_url;
        }
        config.storage.data_dir = relocated.data_dir;
    }

    init_tracing(&config);
    info!("Using template store at {:?}", config.storage.data_dir);

    let mut manager = TemplateManager::open(config)
        .await
        .context("Failed to open template store")?;

    match cli.command {
        Commands::List { category } => {
            let templates = match category {
                Some(category) => manager.get_templates(&category).await?,
                None => manager.list_templates().await?,
            };
            for template in templates {
                let channels: Vec<&str> = template.channels.iter().map(|c| c.as_str()).collect();
                println!("{:<32} {:<40} [{}]", template.id, template.name, channels.join(", "));
            }
        }
        Commands::Show { id } => {
            let Some(template) = manager.get_template(&id).await? else {
                bail!("Template {} not found", id);
            };
            print_json(&serde_json::json!({
                "template": template,
                "metadata": manager.get_template_metadata(&id),
            }))?;
        }
        Commands::Search {
            query,
            category,
            tags,
            channels,
            limit,
        } => {
            let channels = channels
                .iter()
                .map(|c| Channel::parse(c).with_context(|| format!("Unknown channel: {}", c)))
                .collect::<Result<Vec<_>>>()?;
            let filters = SearchFilters {
                category_id: category,
                tags,
                channels,
                limit,
                ..Default::default()
            };
            for result in manager.search_templates(&query, filters).await? {
                println!(
                    "{:>6.2}  {:<32} {}",
                    result.score, result.template.id, result.template.name
                );
            }
        }
        Commands::History { id } => {
            for version in manager.get_version_history(&id).await? {
                println!(
                    "{} {:<24} {:<12} {} {}",
                    if version.is_active { "*" } else { " " },
                    version.version_id,
                    version.author,
                    version.created_at.format("%Y-%m-%d %H:%M:%S"),
                    version.message
                );
            }
        }
        Commands::Rollback { id, version, author } => {
            let created = manager
                .rollback_template(&id, &version, author.as_deref())
                .await?;
            println!("Rolled back {} to {} as {}", id, version, created.version_id);
        }
        Commands::Cleanup { keep } => {
            let mut removed = 0;
            for template in manager.list_templates().await? {
                removed += manager.cleanup_old_versions(&template.id, keep).await?;
            }
            let orphaned = manager.cleanup_orphaned_versions().await?;
            println!("Removed {} old versions and {} orphaned histories", removed, orphaned);
        }
        Commands::Export {
            output,
            ids,
            category,
            versions,
            analytics,
        } => {
            let options = ExportOptions {
                template_ids: (!ids.is_empty()).then_some(ids),
                category_id: category,
                include_versions: versions,
                include_analytics: analytics,
            };
            let count = manager.export_templates(&output, &options).await?;
            println!("Exported {} templates to {}", count, output.display());
        }
        Commands::Import { files, mode } => {
            let mode: ImportMode = mode.parse()?;
            let report = manager.bulk_import_templates(&files, mode).await?;
            for message in &report.messages {
                println!("{}", message);
            }
            println!("{} imported, {} failed", report.successful, report.failed);
            if report.failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Stats { id } => {
            if manager.get_template(&id).await?.is_none() {
                bail!("Template {} not found", id);
            }
            print_json(&serde_json::json!({
                "usage": manager.template_stats(&id).await?,
                "versions": manager.version_stats(&id).await?,
            }))?;
        }
        Commands::Recommend { id, category, limit } => {
            for rec in manager.get_recommendations(id.as_deref(), category.as_deref(), limit) {
                println!("{:>5.2}  {:<32} {:?}", rec.score, rec.template_id, rec.reason);
            }
        }
    }

    Ok(())
}
