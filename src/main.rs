use clap::Parser;
use khoj::config::{EmbeddingBackend, SearchConfig};
use khoj::report::format_report;
use tracing::info;

/// Search the web in English or Nepali and summarize the most relevant pages.
#[derive(Debug, Parser)]
#[command(name = "khoj", version)]
struct Cli {
    /// Query text, in English or Nepali.
    #[arg(required = true)]
    query: Vec<String>,

    /// Print the result as JSON instead of a Markdown report.
    #[arg(long)]
    json: bool,

    /// Candidates requested from the search provider (at most 10).
    #[arg(long)]
    max_results: Option<usize>,

    /// Minimum score for the high-relevance tier.
    #[arg(long)]
    high_threshold: Option<f32>,

    /// Minimum score for the related tier.
    #[arg(long)]
    floor: Option<f32>,

    /// Overall request deadline in milliseconds.
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Embedding backend used for relevance scoring.
    #[arg(long, value_enum)]
    embedding: Option<EmbeddingBackend>,

    /// Translate the summary back into the query's language.
    #[arg(long)]
    localize: bool,
}

impl Cli {
    fn apply(&self, config: &mut SearchConfig) {
        if let Some(n) = self.max_results {
            config.max_results = n;
        }
        if let Some(t) = self.high_threshold {
            config.relevance_high_threshold = t;
        }
        if let Some(f) = self.floor {
            config.relevance_floor = f;
        }
        if let Some(ms) = self.deadline_ms {
            config.request_deadline_ms = ms;
        }
        if let Some(backend) = self.embedding {
            config.embedding_backend = backend;
        }
        config.localize_summary |= self.localize;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("khoj=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = SearchConfig::from_env();
    cli.apply(&mut config);

    let query = cli.query.join(" ");
    info!(query = %query, "starting search");
    let result = khoj::run_search(&query, &config).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", format_report(&result));
    }
    Ok(())
}
