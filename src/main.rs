use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ragbench::cli;

#[derive(Parser)]
#[command(name = "ragbench")]
#[command(about = "Benchmark dense, sparse, and hybrid retrieval strategies over a vector store", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one benchmark cycle: index a corpus, search every query, score
    /// the rankings against the relevance judgments
    Run {
        /// Dataset directory (corpus.jsonl, queries.jsonl, qrels.tsv)
        #[arg(short, long)]
        data: String,

        /// Documents to load before pruning
        #[arg(long, default_value = "1000")]
        corpus_size: usize,

        /// Queries to load before pruning
        #[arg(long, default_value = "100")]
        query_size: usize,

        /// Retrieval strategy: dense, sparse, hybrid-fusion, or hybrid-rerank
        #[arg(short, long, default_value = "dense")]
        strategy: String,

        /// Results per query
        #[arg(long, default_value = "10")]
        top_k: usize,

        /// Prefetch width multiplier (required by hybrid strategies)
        #[arg(long)]
        scale_factor: Option<usize>,

        /// Fusion algorithm: rrf or dbsf (required by hybrid-fusion)
        #[arg(long)]
        fusion: Option<String>,

        /// Comma-separated metric list
        #[arg(short, long, default_value = "ndcg@10,mrr,recall@10")]
        metrics: String,

        /// Dense embedding dimension for the hashing encoders
        #[arg(long, default_value = "256")]
        dimension: usize,

        /// Collection name
        #[arg(short, long, default_value = "ragbench")]
        collection: String,

        /// Write the benchmark report as JSON to this file
        #[arg(short, long)]
        output: Option<String>,

        /// Skip teardown and keep the collection after the run
        #[arg(long)]
        keep: bool,
    },

    /// Load a dataset slice and report its shape after pruning
    Inspect {
        /// Dataset directory (corpus.jsonl, queries.jsonl, qrels.tsv)
        #[arg(short, long)]
        data: String,

        /// Documents to load before pruning
        #[arg(long, default_value = "1000")]
        corpus_size: usize,

        /// Queries to load before pruning
        #[arg(long, default_value = "100")]
        query_size: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragbench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            data,
            corpus_size,
            query_size,
            strategy,
            top_k,
            scale_factor,
            fusion,
            metrics,
            dimension,
            collection,
            output,
            keep,
        } => {
            cli::run(
                data,
                corpus_size,
                query_size,
                strategy,
                top_k,
                scale_factor,
                fusion,
                metrics,
                dimension,
                collection,
                output,
                keep,
            )
            .await?;
        }

        Commands::Inspect {
            data,
            corpus_size,
            query_size,
        } => {
            cli::inspect(data, corpus_size, query_size).await?;
        }
    }

    Ok(())
}
