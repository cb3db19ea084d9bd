use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tributo_core::collection::{IndexDescriptor, IndexKind, IndexOptions, Predicate};
use tributo_core::config::StorageMode;
use tributo_core::provider::OllamaProvider;
use tributo_core::rag::{open_collection, source_label, Embedder, Ingestor, Retriever};
use tributo_core::{Answer, Assistant, Collection, Config, Database, LlmBackend, SearchResult};

#[derive(Parser)]
#[command(name = "tributo")]
#[command(about = "Answer questions about municipal tax law from an indexed statute collection", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Answer a question from the statute collection")]
    Ask {
        question: String,
    },

    #[command(about = "Show the excerpts retrieved for a question")]
    Search {
        question: String,

        #[arg(short = 'k', long, help = "Number of excerpts (defaults to retrieval.top_k)")]
        top_k: Option<usize>,

        #[arg(short, long, help = "Filter expression, e.g. \"vigente = true AND ano >= 2010\"")]
        filter: Option<String>,
    },

    #[command(about = "Load a JSON corpus into the collection")]
    Ingest {
        path: PathBuf,
    },

    #[command(about = "Build (or rebuild) the collection index")]
    Index {
        #[arg(long, help = "Build an exact index instead of IVF-flat")]
        exact: bool,

        #[arg(short, long, help = "Number of IVF partitions (defaults to sqrt(rows))")]
        partitions: Option<usize>,
    },

    #[command(about = "Show collection statistics")]
    Stats,

    #[command(about = "Configuration commands")]
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Set the answering model")]
    SetModel {
        #[arg(help = "Model name (e.g., 'llama-3.3-70b-versatile' or 'llama3.2:latest')")]
        model: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Show => show_config(&load_config(&cli.config)?),
            ConfigCommands::SetModel { model } => set_model(&cli.config, &model),
        },
        command => {
            let config = load_config(&cli.config)?;
            match command {
                Commands::Ask { question } => ask(&config, &question).await,
                Commands::Search {
                    question,
                    top_k,
                    filter,
                } => search(&config, &question, top_k, filter.as_deref()).await,
                Commands::Ingest { path } => ingest(&config, &path).await,
                Commands::Index { exact, partitions } => build_index(&config, exact, partitions).await,
                Commands::Stats => stats(&config).await,
                Commands::Config { .. } => Ok(()),
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!("{} not found, using default configuration", path.display());
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))
}

fn embedder(config: &Config) -> Embedder {
    let provider = OllamaProvider::new(&config.embedding.base_url);
    Embedder::new(Arc::new(provider), config.embedding.model.clone())
}

async fn open_laws(config: &Config) -> Result<Arc<Collection>> {
    let db = Database::connect(&config.storage.storage_mode)
        .await
        .context("Failed to open storage")?;
    open_collection(&db, config)
        .await
        .context("Failed to open collection")
}

async fn retriever(config: &Config) -> Result<Retriever> {
    let collection = open_laws(config).await?;
    Ok(Retriever::new(collection, embedder(config), config.retrieval.clone()))
}

async fn ask(config: &Config, question: &str) -> Result<()> {
    let assistant = Assistant::new(retriever(config).await?, LlmBackend::from_config(&config.llm), config);

    match assistant.answer(question).await.context("Failed to answer question")? {
        Answer::NoContext => {
            println!("{}", "Não encontrei trechos relevantes na base.".yellow());
        }
        Answer::Generated { text, sources } => {
            println!("{}", text);
            println!();
            println!("{}", "Fontes:".bold());
            for (i, hit) in sources.iter().enumerate() {
                println!("  {} {}", format!("[{}]", i + 1).cyan(), source_label(&hit.document));
            }
        }
        Answer::Excerpts { text, reason } => {
            println!("{} {}", "!".yellow().bold(), format!("Resposta gerada indisponível: {}", reason).yellow());
            println!();
            println!("{}", text);
        }
    }
    Ok(())
}

async fn search(config: &Config, question: &str, top_k: Option<usize>, filter: Option<&str>) -> Result<()> {
    let filter = filter
        .map(Predicate::parse)
        .transpose()
        .context("Invalid filter expression")?;
    let retriever = retriever(config).await?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let hits = retriever
        .retrieve_filtered(question, top_k, filter)
        .await
        .context("Search failed")?;

    if hits.is_empty() {
        println!("{}", "No matching excerpts.".yellow());
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit, config.retrieval.snippet_chars);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &SearchResult, snippet_chars: usize) {
    println!(
        "{} {} {}",
        format!("[{}]", rank).cyan().bold(),
        format!("{:.4}", hit.score).green(),
        source_label(&hit.document).bold()
    );
    println!("    {}", hit.document.id.dimmed());
    let text: String = hit.document.text.chars().take(snippet_chars).collect();
    println!("    {}", text.replace('\n', "\n    "));
    println!();
}

async fn ingest(config: &Config, path: &Path) -> Result<()> {
    let collection = open_laws(config).await?;
    let ingestor = Ingestor::new(collection, embedder(config), config.ingest.clone(), config.index.clone());

    println!("{} Loading {}...", "→".blue(), path.display());
    let report = ingestor
        .ingest_file(path)
        .await
        .with_context(|| format!("Failed to ingest {}", path.display()))?;

    println!(
        "{} Inserted {} chunks from {} entries",
        "✓".green().bold(),
        report.inserted.to_string().cyan(),
        report.entries
    );
    if report.skipped_entries > 0 {
        println!("  {} entries skipped (no text)", report.skipped_entries.to_string().yellow());
    }
    if report.rejected > 0 {
        println!("  {} chunks rejected", report.rejected.to_string().yellow());
    }
    if let Some(index) = report.index {
        println!("  Index built: {}", describe_index(&index));
    }
    Ok(())
}

async fn build_index(config: &Config, exact: bool, partitions: Option<usize>) -> Result<()> {
    let collection = open_laws(config).await?;

    let options = if exact {
        IndexOptions::exact()
    } else {
        IndexOptions {
            kind: IndexKind::IvfFlat {
                num_partitions: partitions.or(config.index.num_partitions),
            },
            max_iterations: config.index.max_iterations,
        }
    };

    println!("{} Building index on '{}'...", "→".blue(), collection.name());
    let descriptor = collection
        .build_index(collection.schema().metric, options)
        .await
        .context("Failed to build index")?;
    println!("{} Index built: {}", "✓".green().bold(), describe_index(&descriptor));
    Ok(())
}

async fn stats(config: &Config) -> Result<()> {
    let collection = open_laws(config).await?;
    let stats = collection.stats().await;

    println!("{}", format!("Collection '{}':", stats.name).bold().green());
    println!("  State:        {}", stats.state.to_string().cyan());
    println!("  Rows:         {}", stats.rows);
    println!("  Dimension:    {}", stats.dimension);
    println!("  Metric:       {}", stats.metric);
    match stats.index {
        Some(index) => {
            println!("  Index:        {}", describe_index(&index));
            println!("  Partitions:   {}", stats.partitions);
            println!("  Indexed rows: {}", stats.indexed_rows);
        }
        None => println!("  Index:        {}", "none".dimmed()),
    }
    Ok(())
}

fn describe_index(descriptor: &IndexDescriptor) -> String {
    let kind = match descriptor.options.kind {
        IndexKind::Exact => "exact".to_string(),
        IndexKind::IvfFlat {
            num_partitions: Some(n),
        } => format!("ivf_flat ({} partitions)", n),
        IndexKind::IvfFlat { num_partitions: None } => "ivf_flat (auto partitions)".to_string(),
    };
    format!("{}, {}, {} rows", kind, descriptor.metric, descriptor.indexed_rows)
}

fn show_config(config: &Config) -> Result<()> {
    println!("{}", "Current Configuration:".bold().green());
    println!();
    println!("{}", "LLM:".bold());
    println!("  Provider:       {:?}", config.llm.provider);
    println!("  Model:          {}", config.llm.model.cyan());
    println!("  Base URL:       {}", config.llm.base_url);
    println!("  Temperature:    {}", config.llm.temperature);
    println!("  API key env:    {}", config.llm.api_key_env);
    println!();
    println!("{}", "Embedding:".bold());
    println!("  Model:          {}", config.embedding.model.cyan());
    println!("  Base URL:       {}", config.embedding.base_url);
    println!("  Dimension:      {}", config.embedding.dimension);
    println!();
    println!("{}", "Storage:".bold());
    match &config.storage.storage_mode {
        StorageMode::Embedded { path } => println!("  Mode:           embedded ({})", path.display()),
        StorageMode::Memory => println!("  Mode:           memory"),
        StorageMode::LanceDb { path } => println!("  Mode:           lancedb ({})", path.display()),
    }
    println!("  Collection:     {}", config.storage.collection_name);
    println!();
    println!("{}", "Retrieval:".bold());
    println!("  Top K:          {}", config.retrieval.top_k);
    println!("  Overfetch:      {}", config.retrieval.overfetch);
    println!("  Probes:         {}", config.retrieval.nprobes);
    println!("  Only in force:  {}", config.retrieval.only_in_force);
    println!("  Keywords:       {}", config.retrieval.boost_keywords.join(", "));
    println!();
    println!("{}", "Index:".bold());
    println!("  Auto build:     {}", config.index.auto_build);
    println!("  Kind:           {:?}", config.index.kind);

    Ok(())
}

fn set_model(config_path: &Path, model: &str) -> Result<()> {
    let content = if config_path.exists() {
        std::fs::read_to_string(config_path).context("Failed to read config file")?
    } else {
        String::new()
    };

    let mut config: serde_yaml::Value = if content.trim().is_empty() {
        serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
    } else {
        serde_yaml::from_str(&content).context("Failed to parse config")?
    };

    let root = config
        .as_mapping_mut()
        .context("Config file is not a YAML mapping")?;
    let llm = root
        .entry(serde_yaml::Value::String("llm".to_string()))
        .or_insert_with(|| serde_yaml::to_value(Config::default().llm).unwrap_or(serde_yaml::Value::Null));
    let llm_map = llm
        .as_mapping_mut()
        .context("'llm' section is not a YAML mapping")?;
    llm_map.insert(
        serde_yaml::Value::String("model".to_string()),
        serde_yaml::Value::String(model.to_string()),
    );

    let updated_content = serde_yaml::to_string(&config).context("Failed to serialize config")?;

    std::fs::write(config_path, updated_content).context("Failed to write config file")?;

    println!("{} Model updated to: {}", "✓".green().bold(), model.cyan());

    Ok(())
}
