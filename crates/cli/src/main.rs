use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use context_engine::{
    CompressionStrategy, ContextOrdering, EngineConfig, ExpansionStrategy, RetrievalEngine,
    RetrieveOptions, SourceToggles,
};
use context_protocol::AssembledContext;
use fixture::Fixture;
use std::path::PathBuf;
use std::time::Duration;

mod fixture;

#[derive(Parser)]
#[command(name = "context-fusion")]
#[command(about = "Fuse multi-source retrieval results into a cited, token-budgeted context", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for output)
    #[arg(long, global = true)]
    quiet: bool,

    /// Engine config file, JSON or TOML (overrides CONTEXT_FUSION_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over a fixture of per-source results
    Retrieve(RetrieveArgs),

    /// Print the query profile: type, intent, complexity, keywords, expansion
    Analyze(AnalyzeArgs),

    /// Print the JSON schema of the assembled context
    Schema,
}

#[derive(Args)]
struct RetrieveArgs {
    /// User query
    query: String,

    /// JSON fixture with `semantic`, `keyword` and `web` result lists
    #[arg(long)]
    fixture: PathBuf,

    /// Token budget for the assembled context
    #[arg(long, default_value_t = 8_000)]
    budget: usize,

    /// Tokens reserved for conversation history
    #[arg(long, default_value_t = 0)]
    reserve_history: usize,

    /// Tokens reserved for the system prompt
    #[arg(long, default_value_t = 0)]
    reserve_system: usize,

    /// Compression strategy (default: truncation without a generation fixture)
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Query expansion strategy
    #[arg(long, value_enum)]
    expansion: Option<ExpansionArg>,

    /// Diversity trade-off in [0, 1]; 1 ranks by relevance only
    #[arg(long)]
    lambda: Option<f32>,

    /// Topic used to scope the query
    #[arg(long)]
    topic: Option<String>,

    /// Ordering of the assembled items
    #[arg(long, value_enum)]
    ordering: Option<OrderingArg>,

    /// Pin the relevance threshold
    #[arg(long)]
    threshold: Option<f32>,

    #[arg(long)]
    min_results: Option<usize>,

    #[arg(long)]
    max_results: Option<usize>,

    /// Whole-request deadline in milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    #[arg(long)]
    no_semantic: bool,

    #[arg(long)]
    no_keyword: bool,

    #[arg(long)]
    no_web: bool,

    /// Print the assembled context as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// User query
    query: String,

    /// Topic used to scope the query
    #[arg(long)]
    topic: Option<String>,

    /// Query expansion strategy
    #[arg(long, value_enum, default_value = "synonym-table")]
    expansion: ExpansionArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Truncation,
    Extraction,
    Summarization,
    Hybrid,
}

impl From<StrategyArg> for CompressionStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Truncation => Self::Truncation,
            StrategyArg::Extraction => Self::Extraction,
            StrategyArg::Summarization => Self::Summarization,
            StrategyArg::Hybrid => Self::Hybrid,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ExpansionArg {
    Llm,
    SynonymTable,
    Hybrid,
    None,
}

impl From<ExpansionArg> for ExpansionStrategy {
    fn from(value: ExpansionArg) -> Self {
        match value {
            ExpansionArg::Llm => Self::Llm,
            ExpansionArg::SynonymTable => Self::SynonymTable,
            ExpansionArg::Hybrid => Self::Hybrid,
            ExpansionArg::None => Self::None,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderingArg {
    Relevance,
    Chronological,
    Hybrid,
}

impl From<OrderingArg> for ContextOrdering {
    fn from(value: OrderingArg) -> Self {
        match value {
            OrderingArg::Relevance => Self::Relevance,
            OrderingArg::Chronological => Self::Chronological,
            OrderingArg::Hybrid => Self::Hybrid,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Retrieve(args) => run_retrieve(args, config).await?,
        Commands::Analyze(args) => run_analyze(args, config).await?,
        Commands::Schema => run_schema()?,
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => EngineConfig::from_env().context("Failed to load config from CONTEXT_FUSION_CONFIG"),
    }
}

async fn run_retrieve(args: RetrieveArgs, config: EngineConfig) -> Result<()> {
    let fixture = Fixture::load(&args.fixture)?;
    let engine = fixture
        .install(RetrievalEngine::builder(config))
        .build()
        .context("Failed to build engine")?;

    let strategy = match args.strategy {
        Some(strategy) => strategy.into(),
        None if fixture.has_generation() => engine.config().compression.strategy,
        None => CompressionStrategy::Truncation,
    };
    let mut options = RetrieveOptions::default()
        .with_budget(args.budget)
        .with_compression(strategy)
        .with_sources(SourceToggles {
            semantic: !args.no_semantic,
            keyword: !args.no_keyword,
            web: !args.no_web,
        });
    options.budget.reserved_for_history = args.reserve_history;
    options.budget.reserved_for_system_prompt = args.reserve_system;
    options.topic = args.topic;
    options.lambda = args.lambda;
    options.expansion = args.expansion.map(Into::into);
    options.ordering = args.ordering.map(Into::into);
    options.threshold = args.threshold;
    options.min_results = args.min_results;
    options.max_results = args.max_results;
    if let Some(ms) = args.deadline_ms {
        options = options.with_deadline(Duration::from_millis(ms));
    }

    let context = engine
        .retrieve_context(&args.query, &options)
        .await
        .context("Retrieval failed")?;
    log::debug!("Expansion cache: {:?}", engine.expansion_cache().stats());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&context)?);
    } else {
        print!("{}", render_text(&context, options.budget.available()));
    }
    Ok(())
}

async fn run_analyze(args: AnalyzeArgs, config: EngineConfig) -> Result<()> {
    let engine = RetrievalEngine::builder(config)
        .build()
        .context("Failed to build engine")?;
    let mut options = RetrieveOptions::default().with_expansion(args.expansion.into());
    options.topic = args.topic;
    let profile = engine.profile(&args.query, &options).await?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

fn run_schema() -> Result<()> {
    let schema = schemars::schema_for!(AssembledContext);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn render_text(context: &AssembledContext, budget: usize) -> String {
    let mut out = String::new();
    if !context.text.is_empty() {
        out.push_str(&context.text);
        out.push_str("\n\n");
    }
    out.push_str("---\n");
    out.push_str(&format!(
        "items: {}  tokens: {}/{}  compressed: {}\n",
        context.items.len(),
        context.items_tokens(),
        budget,
        context.report.compressed
    ));
    if let Some(decision) = &context.report.threshold {
        out.push_str(&format!(
            "threshold: {:.3} ({:?})\n",
            decision.threshold, decision.strategy
        ));
    }
    if !context.citations.is_empty() {
        out.push_str("citations:\n");
        for citation in context.citations.values() {
            out.push_str(&format!("  {} {}", citation.marker, citation.source_id));
            if let Some(url) = &citation.url {
                out.push_str(&format!(" <{url}>"));
            }
            out.push('\n');
        }
    }
    if !context.dangling_citations.is_empty() {
        out.push_str(&format!(
            "dangling: {}\n",
            context.dangling_citations.join(", ")
        ));
    }
    if context.degraded {
        out.push_str("degraded:\n");
        for degradation in &context.degradations {
            out.push_str(&format!("  - {degradation}\n"));
        }
    }
    out
}
