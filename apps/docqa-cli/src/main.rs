use std::env;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use docqa_core::{Chunk, Config, CrossEncoder, DocType, Embedder, ScopeSelection, Settings};
use docqa_embed::{default_cross_encoder, default_embedder, LexicalCrossEncoder};
use docqa_hybrid::KnowledgeBase;

const EMBED_BATCH: usize = 32;
const USAGE: &str = "Usage: docqa <command> [args...]

  ingest <chunks.jsonl|dir>
  query \"<text>\" --project P [--project P2] [--doc-type T]... [--file F]... [--top-k N]
  remove-file <project> <file>
  remove-project <project>
  stats";

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = Config::load()?.settings()?;
    if settings.storage.data_dir.is_none() {
        settings.storage.data_dir = Some("../dev_data/docqa".to_string());
    }
    Ok(settings)
}

fn open_kb(settings: &Settings, encoder: Arc<dyn CrossEncoder>) -> anyhow::Result<KnowledgeBase> {
    Ok(KnowledgeBase::open(settings.clone(), encoder)?)
}

/// Maintenance commands never rerank, so they skip loading the reranker model.
fn open_kb_for_writes(settings: &Settings) -> anyhow::Result<KnowledgeBase> {
    open_kb(settings, Arc::new(LexicalCrossEncoder))
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let settings = load_settings().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let (cmd, args) = parse_args();
    match cmd.as_str() {
        "ingest" => {
            let path = args.first().map(PathBuf::from).ok_or_else(|| anyhow!("ingest needs a .jsonl file or directory"))?;
            ingest(&settings, &path)
        }
        "query" => query(&settings, &args),
        "remove-file" => {
            let (Some(project), Some(file)) = (args.first(), args.get(1)) else {
                bail!("remove-file needs <project> <file>");
            };
            let removed = open_kb_for_writes(&settings)?.remove_file(project, file)?;
            println!("Removed {removed} chunks of {project}/{file}");
            Ok(())
        }
        "remove-project" => {
            let project = args.first().ok_or_else(|| anyhow!("remove-project needs <project>"))?;
            let removed = open_kb_for_writes(&settings)?.remove_project(project)?;
            println!("Removed {removed} chunks of project {project}");
            Ok(())
        }
        "stats" => {
            let stats = open_kb_for_writes(&settings)?.stats();
            println!(
                "chunks: {}\nprojects: {}\nfiles: {}\ngeneration: {}",
                stats.chunks, stats.projects, stats.files, stats.generation
            );
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {cmd}\n\n{USAGE}");
            std::process::exit(1);
        }
    }
}

fn chunk_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "jsonl"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn read_chunks(file: &Path) -> anyhow::Result<Vec<Chunk>> {
    let reader = BufReader::new(fs::File::open(file).with_context(|| format!("open {}", file.display()))?);
    let mut chunks = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(&line).with_context(|| format!("{}:{}", file.display(), lineno + 1))?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Fill in embeddings the parser did not supply.
fn embed_missing(embedder: &dyn Embedder, chunks: &mut [Chunk]) -> anyhow::Result<usize> {
    let missing: Vec<usize> = (0..chunks.len()).filter(|i| chunks[*i].embedding.is_empty()).collect();
    if missing.is_empty() {
        return Ok(0);
    }
    let pb = ProgressBar::new(missing.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")?
            .progress_chars("#>-"),
    );
    for batch in missing.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(|i| chunks[*i].text.clone()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        for (i, v) in batch.iter().zip(vectors) {
            chunks[*i].embedding = v;
        }
        pb.inc(batch.len() as u64);
    }
    pb.finish_with_message("embedded");
    Ok(missing.len())
}

fn ingest(settings: &Settings, path: &Path) -> anyhow::Result<()> {
    let files = chunk_files(path);
    if files.is_empty() {
        bail!("no .jsonl chunk files under {}", path.display());
    }
    let mut chunks = Vec::new();
    for f in &files {
        chunks.extend(read_chunks(f)?);
    }
    println!("Read {} chunks from {} file(s)", chunks.len(), files.len());

    if chunks.iter().any(|c| c.embedding.is_empty()) {
        let embedder = default_embedder(settings)?;
        let n = embed_missing(embedder.as_ref(), &mut chunks)?;
        println!("Embedded {n} chunks");
    }

    let kb = open_kb_for_writes(settings)?;
    let report = kb.ingest(chunks)?;
    for (id, err) in &report.rejected {
        eprintln!("  rejected {id}: {err}");
    }
    println!("Ingest complete: {} accepted, {} rejected", report.accepted.len(), report.rejected.len());
    Ok(())
}

struct QueryArgs {
    text: String,
    selection: ScopeSelection,
    top_k: Option<usize>,
}

fn parse_query_args(args: &[String]) -> anyhow::Result<QueryArgs> {
    let mut text = None;
    let mut selection = ScopeSelection::default();
    let mut top_k = None;
    let mut i = 0;
    while i < args.len() {
        let value = |i: usize| args.get(i + 1).ok_or_else(|| anyhow!("{} requires a value", args[i]));
        match args[i].as_str() {
            "--project" | "-p" => {
                selection.project_ids.insert(value(i)?.clone());
                i += 1;
            }
            "--doc-type" | "-t" => {
                selection.doc_types.insert(value(i)?.parse::<DocType>()?);
                i += 1;
            }
            "--file" | "-f" => {
                selection.file_ids.insert(value(i)?.clone());
                i += 1;
            }
            "--top-k" | "-k" => {
                let n = value(i)?;
                top_k = Some(n.parse::<usize>().map_err(|_| anyhow!("--top-k requires a number, got '{n}'"))?);
                i += 1;
            }
            flag if flag.starts_with('-') => bail!("unknown flag {flag}"),
            positional => text = Some(positional.to_string()),
        }
        i += 1;
    }
    let text = text.ok_or_else(|| anyhow!("Usage: docqa query \"<text>\" --project P"))?;
    Ok(QueryArgs { text, selection, top_k })
}

fn query(settings: &Settings, args: &[String]) -> anyhow::Result<()> {
    let q = parse_query_args(args)?;
    let top_k = q.top_k.unwrap_or(settings.retrieval.top_k);
    let embedder = default_embedder(settings)?;
    let embedding = embedder.embed(&q.text)?;
    let kb = open_kb(settings, default_cross_encoder(settings)?)?;

    let result = tokio::runtime::Runtime::new()?.block_on(kb.retrieve(&q.text, &embedding, &q.selection, top_k))?;
    if result.is_degraded() {
        println!("(degraded: {:?})", result.degraded);
    }
    if result.is_empty() {
        println!("No passages found.");
        return Ok(());
    }
    for (rank, p) in result.passages.iter().enumerate() {
        let c = &p.chunk;
        let page = c.page.map(|n| format!(" p.{n}")).unwrap_or_default();
        let snippet: String = p.context().chars().take(160).collect();
        println!(
            "{:>2}. [{:.3}] {} ({}/{}/{}{}) via {:?}\n    {}",
            rank + 1,
            p.score,
            c.id,
            c.project_id,
            c.doc_type,
            c.file_id,
            page,
            p.candidate.source,
            snippet.replace('\n', " ")
        );
    }
    Ok(())
}
