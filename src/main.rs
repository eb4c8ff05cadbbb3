//! `dpr`: the pipeline driver binary.
//!
//! Each stage of the recommendation pipeline is also a standalone subcommand
//! so it can be re-run in isolation against an existing archive; `dpr run`
//! drives all of them in order as subprocesses of itself, mirroring the
//! source project's one-stage-per-process orchestration. A stage failure
//! stops the run and leaves every prior stage's archive output intact.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{error, info, warn};

use daily_paper_reader::archive::{self, ArchiveLayout};
use daily_paper_reader::config::{Config, LlmEnv};
use daily_paper_reader::error::{DprError, Result};
use daily_paper_reader::fetch;
use daily_paper_reader::llm::provider::{self, ChatProvider};
use daily_paper_reader::llm::refiner::{self, LlmScore};
use daily_paper_reader::paper::{Paper, RankedList};
use daily_paper_reader::rate_limit::TokenBucket;
use daily_paper_reader::rerank::{self, ReRankedList, RemoteRerankBackend, RerankBackend, StarStrategy};
use daily_paper_reader::retrieval::bm25::{self, Bm25Index};
use daily_paper_reader::retrieval::fusion;
use daily_paper_reader::retrieval::fusion::FusedList;
use daily_paper_reader::seen_set::SeenSet;
use daily_paper_reader::selector::{self, SelectionMode};
use daily_paper_reader::subscription::{self, QueryPlan};
use daily_paper_reader::usage::UsageAccumulator;

#[derive(Parser)]
#[command(name = "dpr", version, about = "Daily academic-paper recommendation pipeline driver")]
struct Cli {
    /// Path to the subscriptions/retrieval/selector YAML config.
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Root directory under which per-run archives are written.
    #[arg(long, global = true, default_value = "archive")]
    archive_root: PathBuf,

    /// Overrides the run-date token this invocation resolves to. Falls back
    /// to `DPR_RUN_DATE` in the environment, then to the usual computation.
    #[arg(long, global = true)]
    run_date: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalizes `config.yaml`'s intent profiles into the query plan.
    Plan,
    /// Acquires new papers for the active window and updates the seen set.
    Fetch {
        #[arg(long)]
        days: Option<i64>,
        /// Bypass the seen-set filter for this fetch (the set is still updated).
        #[arg(long)]
        ignore_seen: bool,
    },
    /// BM25 retrieval for every planned query.
    RetrieveBm25,
    /// Embedding retrieval for every planned query.
    RetrieveEmbedding {
        #[arg(long, default_value = "cpu")]
        device: String,
        #[arg(long, default_value_t = 8)]
        batch_size: usize,
    },
    /// Reciprocal rank fusion over each query's BM25 and embedding results.
    Fuse,
    /// Cross-encoder reranking and star-rating assignment.
    Rerank,
    /// Batched bilingual LLM relevance scoring.
    Refine,
    /// Per-tag-capped daily selection.
    Select,
    /// Runs every stage in order, each as a subprocess of this binary.
    Run {
        /// Attempt an external `dpr-enrich` step before fetching; logged and
        /// skipped if the program cannot be found.
        #[arg(long)]
        run_enrich: bool,
        #[arg(long)]
        fetch_days: Option<i64>,
        #[arg(long)]
        fetch_ignore_seen: bool,
        #[arg(long, default_value = "cpu")]
        embedding_device: String,
        #[arg(long, default_value_t = 8)]
        embedding_batch_size: usize,
    },
}

fn resolve_token(cli_run_date: &Option<String>, fetch_days: Option<i64>, config_days_window: i64) -> String {
    if let Some(t) = cli_run_date {
        if !t.is_empty() {
            return t.clone();
        }
    }
    if let Ok(t) = std::env::var("DPR_RUN_DATE") {
        if !t.is_empty() {
            return t;
        }
    }
    archive::resolve_run_date_token(fetch_days, config_days_window)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| DprError::Fatal(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&content).map_err(DprError::from)
}

/// Sanitizes a `paper_tag` for use inside a filename: arbitrary tag text may
/// contain `:` and other characters that don't belong in a path component.
fn sanitize_tag(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn query_key(idx: usize, paper_tag: &str) -> String {
    format!("{idx:04}_{}", sanitize_tag(paper_tag))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueryRankedFile {
    paper_tag: String,
    query_text: String,
    query_type: String,
    list: RankedList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueryFusedFile {
    paper_tag: String,
    query_text: String,
    query_type: String,
    list: FusedList,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RunMeta {
    fetch_days: Option<i64>,
}

fn papers_by_id(papers: Vec<Paper>) -> HashMap<String, Paper> {
    papers.into_iter().map(|p| (p.id.clone(), p)).collect()
}

// ---------------------------------------------------------------------
// Stage: plan
// ---------------------------------------------------------------------

fn cmd_plan(config: &Config, archive: &ArchiveLayout) -> Result<()> {
    let plan = subscription::build_pipeline_inputs(&config.subscriptions);
    info!(
        tags = plan.tags.len(),
        bm25_queries = plan.bm25_queries.len(),
        embedding_queries = plan.embedding_queries.len(),
        source = %plan.source,
        "built query plan"
    );
    write_json(&archive.plan_json(), &plan)
}

// ---------------------------------------------------------------------
// Stage: fetch
// ---------------------------------------------------------------------

async fn cmd_fetch(config: &Config, archive: &ArchiveLayout, archive_root: &Path, days: Option<i64>, ignore_seen: bool) -> Result<()> {
    let plan: QueryPlan = read_json(&archive.plan_json())?;
    let resolved_days = days.unwrap_or(config.arxiv_paper_setting.days_window);
    let seen_path = archive_root.join("seen.json");
    let bucket = TokenBucket::new(1, Duration::from_secs(3));

    // `ignore_seen` bypasses the filter itself, not the persisted set: the
    // filtering pass starts from an empty set so nothing gets skipped, but
    // the real set is still merged into and saved below.
    let mut filter_seen = if ignore_seen {
        SeenSet::load(seen_path.with_file_name("seen.json.unfiltered"))
    } else {
        SeenSet::load(&seen_path)
    };

    let papers = fetch::fetch_papers(config, &plan, resolved_days, &mut filter_seen, &bucket).await?;
    info!(count = papers.len(), days = resolved_days, ignore_seen, "fetched papers");

    if ignore_seen {
        let mut persisted = SeenSet::load(&seen_path);
        for p in &papers {
            persisted.insert(p.seen_key());
        }
        persisted.save()?;
    } else {
        filter_seen.save()?;
    }

    write_json(&archive.papers_json(), &papers)?;
    write_json(&archive.run_meta_json(), &RunMeta { fetch_days: days })?;
    Ok(())
}

// ---------------------------------------------------------------------
// Stage: retrieve-bm25
// ---------------------------------------------------------------------

fn cmd_retrieve_bm25(config: &Config, archive: &ArchiveLayout) -> Result<()> {
    let plan: QueryPlan = read_json(&archive.plan_json())?;
    let papers: Vec<Paper> = read_json(&archive.papers_json())?;
    let index = Bm25Index::build(&papers);
    let keyword_recall_mode = subscription::get_keyword_recall_mode(&config.subscriptions);

    for (idx, query) in plan.bm25_queries.iter().enumerate() {
        let list = bm25::retrieve(&index, query, &keyword_recall_mode, config.retrieval.bm25_top_k);
        let file = QueryRankedFile {
            paper_tag: query.paper_tag.clone(),
            query_text: query.query_text.clone(),
            query_type: query.query_type.clone(),
            list,
        };
        let key = query_key(idx, &query.paper_tag);
        write_json(&archive.retrieval_bm25(&key), &file)?;
    }
    info!(queries = plan.bm25_queries.len(), "bm25 retrieval complete");
    Ok(())
}

// ---------------------------------------------------------------------
// Stage: retrieve-embedding
// ---------------------------------------------------------------------

#[cfg(feature = "local-embeddings")]
fn parse_embedding_device(name: &str) -> Result<candle_core::Device> {
    use candle_core::Device;
    match name.to_lowercase().as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => Device::new_cuda(0).map_err(|e| DprError::Config(format!("cuda device unavailable: {e}"))),
        other => Err(DprError::Config(format!("unknown embedding device {other:?}, expected cpu or cuda"))),
    }
}

#[cfg(feature = "local-embeddings")]
async fn build_embedding_backend(device: &str) -> Result<daily_paper_reader::retrieval::embedding::local::CandleEmbeddingBackend> {
    use daily_paper_reader::retrieval::embedding::local::{CandleEmbeddingBackend, LocalEmbeddingConfig};
    let device = parse_embedding_device(device)?;
    CandleEmbeddingBackend::load(LocalEmbeddingConfig {
        device,
        ..LocalEmbeddingConfig::default()
    })
    .await
}

#[cfg(feature = "local-embeddings")]
async fn cmd_retrieve_embedding(config: &Config, archive: &ArchiveLayout, device: &str, batch_size: usize) -> Result<()> {
    use daily_paper_reader::fetch::supabase::SupabaseClient;
    use daily_paper_reader::retrieval::embedding::{encode_corpus, retrieve, supabase_backend, EmbeddingBackend};

    let plan: QueryPlan = read_json(&archive.plan_json())?;
    let papers: Vec<Paper> = read_json(&archive.papers_json())?;

    let backend = build_embedding_backend(device).await?;
    let corpus = encode_corpus(&backend, &papers, batch_size.max(1)).await?;

    let use_remote = config.supabase.enabled && config.supabase.use_vector_rpc;
    let supabase_client = if use_remote { Some(SupabaseClient::from_config(&config.supabase)?) } else { None };

    for (idx, query) in plan.embedding_queries.iter().enumerate() {
        let list = if let Some(client) = &supabase_client {
            let query_vec = backend
                .encode_batch(std::slice::from_ref(&query.query_text))
                .await?
                .into_iter()
                .next()
                .unwrap_or_default();
            let scored = supabase_backend::match_by_embedding(client, &query_vec, config.retrieval.embedding_top_k as u32).await?;
            RankedList::from_scores(scored).truncate(config.retrieval.embedding_top_k)
        } else {
            retrieve(&backend, &corpus, query, config.retrieval.embedding_top_k).await?
        };

        let file = QueryRankedFile {
            paper_tag: query.paper_tag.clone(),
            query_text: query.query_text.clone(),
            query_type: query.query_type.clone(),
            list,
        };
        let key = query_key(idx, &query.paper_tag);
        write_json(&archive.retrieval_embedding(&key), &file)?;
    }
    info!(queries = plan.embedding_queries.len(), "embedding retrieval complete");
    Ok(())
}

#[cfg(not(feature = "local-embeddings"))]
async fn cmd_retrieve_embedding(_config: &Config, _archive: &ArchiveLayout, _device: &str, _batch_size: usize) -> Result<()> {
    Err(DprError::Config(
        "embedding retrieval requires building with --features local-embeddings".to_string(),
    ))
}

// ---------------------------------------------------------------------
// Stage: fuse
// ---------------------------------------------------------------------

fn cmd_fuse(config: &Config, archive: &ArchiveLayout) -> Result<()> {
    let plan: QueryPlan = read_json(&archive.plan_json())?;

    let pairs = plan.bm25_queries.len().min(plan.embedding_queries.len());
    if plan.bm25_queries.len() != plan.embedding_queries.len() {
        warn!(
            bm25 = plan.bm25_queries.len(),
            embedding = plan.embedding_queries.len(),
            "bm25 and embedding query counts differ; fusing only the overlapping prefix"
        );
    }

    for idx in 0..pairs {
        let bm25_query = &plan.bm25_queries[idx];
        let embedding_query = &plan.embedding_queries[idx];
        let key = query_key(idx, &bm25_query.paper_tag);

        let bm25_file: QueryRankedFile = read_json(&archive.retrieval_bm25(&key))?;
        let embedding_file: QueryRankedFile = read_json(&archive.retrieval_embedding(&key))?;

        let fused = fusion::rrf_fuse(&[&bm25_file.list, &embedding_file.list], config.retrieval.rrf_k, config.retrieval.rrf_top_m);

        let file = QueryFusedFile {
            paper_tag: bm25_query.paper_tag.clone(),
            query_text: embedding_query.query_text.clone(),
            query_type: bm25_query.query_type.clone(),
            list: fused,
        };
        write_json(&archive.retrieval_fused(&key), &file)?;
    }
    info!(queries = pairs, "rrf fusion complete");
    Ok(())
}

// ---------------------------------------------------------------------
// Stage: rerank
// ---------------------------------------------------------------------

/// Wraps a dispatched `ChatProvider` as a `RerankBackend`, restoring input
/// order from the provider's `(index, score)` response.
struct ChatProviderRerankBackend<'a> {
    provider: &'a dyn ChatProvider,
}

#[async_trait::async_trait]
impl<'a> RerankBackend for ChatProviderRerankBackend<'a> {
    async fn score_batch(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let pairs = self.provider.rerank(query, documents, Some(documents.len())).await?;
        let mut scores = vec![0.0f32; documents.len()];
        for (index, score) in pairs {
            if let Some(slot) = scores.get_mut(index) {
                *slot = score;
            }
        }
        Ok(scores)
    }
}

fn build_rerank_backend<'a>(config: &Config, env: &LlmEnv, chat_provider: &'a dyn ChatProvider) -> Result<Box<dyn RerankBackend + 'a>> {
    if let Some(base_url) = &config.rerank.base_url {
        let api_key = env.rerank_api_key.clone().unwrap_or_else(|| env.api_key.clone());
        let model = config.rerank.model.clone().unwrap_or_else(|| env.model.clone());
        let client = reqwest::Client::builder().timeout(Duration::from_secs(60)).build()?;
        return Ok(Box::new(RemoteRerankBackend::new(client, base_url.clone(), api_key, model)));
    }
    Ok(Box::new(ChatProviderRerankBackend { provider: chat_provider }))
}

fn star_strategy(config: &Config) -> StarStrategy {
    match config.rerank.quantile_strategy.as_str() {
        "fixed_thresholds" => match config.rerank.fixed_thresholds {
            Some(t) => StarStrategy::FixedThresholds(t),
            None => {
                warn!("quantile_strategy = fixed_thresholds but no fixed_thresholds configured, falling back to quantiles");
                StarStrategy::Quantiles
            }
        },
        _ => StarStrategy::Quantiles,
    }
}

fn run_meta_token(archive: &ArchiveLayout, config: &Config) -> Result<(RunMeta, String)> {
    let run_meta: RunMeta = read_json(&archive.run_meta_json()).unwrap_or_default();
    let days = run_meta.fetch_days;
    let token = archive::resolve_run_date_token(days, config.arxiv_paper_setting.days_window);
    Ok((run_meta, token))
}

async fn cmd_rerank(config: &Config, archive: &ArchiveLayout) -> Result<()> {
    let plan: QueryPlan = read_json(&archive.plan_json())?;
    let papers: Vec<Paper> = read_json(&archive.papers_json())?;
    let by_id = papers_by_id(papers);

    let env = LlmEnv::from_env()?;
    let (provider_name, model) = env.provider_model()?;
    let chat_provider = provider::dispatch(&provider_name, &model, &env)?;
    let backend = build_rerank_backend(config, &env, chat_provider.as_ref())?;
    let strategy = star_strategy(config);

    let pairs = plan.bm25_queries.len().min(plan.embedding_queries.len());
    let mut merged: HashMap<String, Vec<rerank::ReRankedEntry>> = HashMap::new();

    for idx in 0..pairs {
        let bm25_query = &plan.bm25_queries[idx];
        let key = query_key(idx, &bm25_query.paper_tag);
        let fused_file: QueryFusedFile = read_json(&archive.retrieval_fused(&key))?;

        let reranked = rerank::rerank_query(
            backend.as_ref(),
            &fused_file.query_text,
            &fused_file.list,
            |id| by_id.get(id).map(|p| format!("Title: {}\nAbstract: {}", p.title, p.abstract_text)),
            &strategy,
        )
        .await?;

        let bucket = merged.entry(fused_file.paper_tag.clone()).or_default();
        for entry in reranked.entries {
            match bucket.iter_mut().find(|e| e.paper_id == entry.paper_id) {
                Some(existing) if entry.cross_score > existing.cross_score => *existing = entry,
                Some(_) => {}
                None => bucket.push(entry),
            }
        }
    }

    let mut reranked_by_tag: BTreeMap<String, ReRankedList> = BTreeMap::new();
    for (tag, mut entries) in merged {
        entries.sort_by(|a, b| {
            b.cross_score
                .partial_cmp(&a.cross_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.paper_id.cmp(&b.paper_id))
        });
        for (idx, entry) in entries.iter_mut().enumerate() {
            entry.rank = idx + 1;
        }
        reranked_by_tag.insert(tag, ReRankedList { entries });
    }

    let (_, token) = run_meta_token(archive, config)?;
    write_json(&archive.rank_output(&token), &reranked_by_tag)?;
    info!(tags = reranked_by_tag.len(), "reranking complete");
    Ok(())
}

// ---------------------------------------------------------------------
// Stage: refine
// ---------------------------------------------------------------------

async fn cmd_refine(config: &Config, archive: &ArchiveLayout) -> Result<()> {
    let plan: QueryPlan = read_json(&archive.plan_json())?;
    let papers: Vec<Paper> = read_json(&archive.papers_json())?;
    let by_id = papers_by_id(papers);

    let (_, token) = run_meta_token(archive, config)?;
    let reranked_by_tag: BTreeMap<String, ReRankedList> = read_json(&archive.rank_output(&token))?;
    let reranked_by_tag: HashMap<String, ReRankedList> = reranked_by_tag.into_iter().collect();

    let candidates: Vec<Paper> = refiner::candidate_union(&by_id, &reranked_by_tag, config.rerank.star_threshold)
        .into_iter()
        .cloned()
        .collect();
    info!(candidates = candidates.len(), "candidate union built for refinement");

    let env = LlmEnv::from_env()?;
    let (provider_name, model) = env.provider_model()?;
    let chat_provider = provider::dispatch(&provider_name, &model, &env)?;
    let usage = UsageAccumulator::new();

    let scores = refiner::refine(chat_provider.as_ref(), candidates, &plan.user_requirements, &config.llm, &usage, archive).await?;

    let snapshot = usage.snapshot();
    info!(
        calls = snapshot.calls,
        prompt_tokens = snapshot.prompt_tokens,
        completion_tokens = snapshot.completion_tokens,
        reasoning_tokens = snapshot.reasoning_tokens,
        total_tokens = snapshot.total_tokens,
        elapsed_ms = snapshot.total_time.as_millis() as u64,
        "refiner usage for this run"
    );

    write_json(&archive.llm_output(&token), &scores)?;
    info!(scored = scores.len(), "refinement complete");
    Ok(())
}

// ---------------------------------------------------------------------
// Stage: select
// ---------------------------------------------------------------------

fn cmd_select(config: &Config, archive: &ArchiveLayout) -> Result<()> {
    let (run_meta, token) = run_meta_token(archive, config)?;

    let reranked_by_tag: BTreeMap<String, ReRankedList> = read_json(&archive.rank_output(&token))?;
    let reranked_by_tag: HashMap<String, ReRankedList> = reranked_by_tag.into_iter().collect();
    let scores: Vec<LlmScore> = read_json(&archive.llm_output(&token))?;

    let mode = SelectionMode::from_skims_flag(archive::use_skims_mode(run_meta.fetch_days, config.arxiv_paper_setting.days_window));
    let selected = selector::select(&scores, &reranked_by_tag, config.rerank.star_threshold, mode, &config.selector);

    write_json(&archive.selected(&token), &selected)?;
    info!(selected = selected.papers.len(), mode = ?selected.mode, "selection complete");
    Ok(())
}

// ---------------------------------------------------------------------
// Stage: run (drives the others as subprocesses)
// ---------------------------------------------------------------------

fn run_enrich_step() {
    match Command::new("dpr-enrich").status() {
        Ok(status) if status.success() => info!("enrich step completed"),
        Ok(status) => warn!(code = ?status.code(), "enrich step exited non-zero, continuing"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("dpr-enrich not found on PATH, skipping optional enrich step");
        }
        Err(e) => warn!(error = %e, "failed to launch enrich step, continuing"),
    }
}

fn run_stage(exe: &Path, args: &[&str], config_path: &Path, archive_root: &Path, token: &str) -> Result<()> {
    let mut cmd = Command::new(exe);
    cmd.arg("--config")
        .arg(config_path)
        .arg("--archive-root")
        .arg(archive_root)
        .arg("--run-date")
        .arg(token)
        .args(args)
        .env("DPR_RUN_DATE", token);

    info!(stage = ?args, "starting stage");
    let status = cmd.status().map_err(|e| DprError::Fatal(format!("failed to launch stage {args:?}: {e}")))?;
    if !status.success() {
        return Err(DprError::Fatal(format!("stage {args:?} exited with {status}")));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    config: &Config,
    config_path: &Path,
    archive_root: &Path,
    run_enrich: bool,
    fetch_days: Option<i64>,
    fetch_ignore_seen: bool,
    embedding_device: &str,
    embedding_batch_size: usize,
) -> Result<()> {
    let token = archive::resolve_run_date_token(fetch_days, config.arxiv_paper_setting.days_window);
    info!(token, "starting full pipeline run");

    if run_enrich {
        run_enrich_step();
    }

    let exe = std::env::current_exe().map_err(|e| DprError::Fatal(format!("could not resolve current executable: {e}")))?;

    run_stage(&exe, &["plan"], config_path, archive_root, &token)?;

    let days_arg = fetch_days.map(|d| d.to_string());
    let mut fetch_args: Vec<&str> = vec!["fetch"];
    if let Some(d) = &days_arg {
        fetch_args.push("--days");
        fetch_args.push(d);
    }
    if fetch_ignore_seen {
        fetch_args.push("--ignore-seen");
    }
    run_stage(&exe, &fetch_args, config_path, archive_root, &token)?;

    run_stage(&exe, &["retrieve-bm25"], config_path, archive_root, &token)?;

    let batch_size_arg = embedding_batch_size.to_string();
    run_stage(
        &exe,
        &["retrieve-embedding", "--device", embedding_device, "--batch-size", &batch_size_arg],
        config_path,
        archive_root,
        &token,
    )?;

    run_stage(&exe, &["fuse"], config_path, archive_root, &token)?;
    run_stage(&exe, &["rerank"], config_path, archive_root, &token)?;
    run_stage(&exe, &["refine"], config_path, archive_root, &token)?;
    run_stage(&exe, &["select"], config_path, archive_root, &token)?;

    info!(token, "full pipeline run complete");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let result = match &cli.command {
        Commands::Plan => {
            let token = resolve_token(&cli.run_date, None, config.arxiv_paper_setting.days_window);
            let archive = ArchiveLayout::new(&cli.archive_root, &token);
            cmd_plan(&config, &archive)
        }
        Commands::Fetch { days, ignore_seen } => {
            let token = resolve_token(&cli.run_date, *days, config.arxiv_paper_setting.days_window);
            let archive = ArchiveLayout::new(&cli.archive_root, &token);
            cmd_fetch(&config, &archive, &cli.archive_root, *days, *ignore_seen).await
        }
        Commands::RetrieveBm25 => {
            let token = resolve_token(&cli.run_date, None, config.arxiv_paper_setting.days_window);
            let archive = ArchiveLayout::new(&cli.archive_root, &token);
            cmd_retrieve_bm25(&config, &archive)
        }
        Commands::RetrieveEmbedding { device, batch_size } => {
            let token = resolve_token(&cli.run_date, None, config.arxiv_paper_setting.days_window);
            let archive = ArchiveLayout::new(&cli.archive_root, &token);
            cmd_retrieve_embedding(&config, &archive, device, *batch_size).await
        }
        Commands::Fuse => {
            let token = resolve_token(&cli.run_date, None, config.arxiv_paper_setting.days_window);
            let archive = ArchiveLayout::new(&cli.archive_root, &token);
            cmd_fuse(&config, &archive)
        }
        Commands::Rerank => {
            let token = resolve_token(&cli.run_date, None, config.arxiv_paper_setting.days_window);
            let archive = ArchiveLayout::new(&cli.archive_root, &token);
            cmd_rerank(&config, &archive).await
        }
        Commands::Refine => {
            let token = resolve_token(&cli.run_date, None, config.arxiv_paper_setting.days_window);
            let archive = ArchiveLayout::new(&cli.archive_root, &token);
            cmd_refine(&config, &archive).await
        }
        Commands::Select => {
            let token = resolve_token(&cli.run_date, None, config.arxiv_paper_setting.days_window);
            let archive = ArchiveLayout::new(&cli.archive_root, &token);
            cmd_select(&config, &archive)
        }
        Commands::Run {
            run_enrich,
            fetch_days,
            fetch_ignore_seen,
            embedding_device,
            embedding_batch_size,
        } => cmd_run(
            &config,
            &cli.config,
            &cli.archive_root,
            *run_enrich,
            *fetch_days,
            *fetch_ignore_seen,
            embedding_device,
            *embedding_batch_size,
        ),
    };

    if let Err(e) = &result {
        error!(error = %e, "stage failed");
    }
    result.map_err(anyhow::Error::from)
}
