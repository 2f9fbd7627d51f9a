//! CLI command runners.
//!
//! Each `run_*` function opens the engine from the loaded config, performs
//! one operation, and prints a human-readable summary (or JSON with
//! `--json`) to stdout. Logs go to stderr.

use std::path::PathBuf;

use anyhow::Result;

use research_core::models::{EvaluationRecord, Language};

use crate::config::Config;
use crate::engine::{EvaluateRequest, QueryRequest, ResearchEngine};
use crate::ingest::{default_include_globs, load_documents};

pub async fn run_ingest(config: &Config, paths: &[PathBuf], include: Vec<String>) -> Result<()> {
    let globs = if include.is_empty() {
        default_include_globs()
    } else {
        include
    };
    let (documents, load_errors) = load_documents(paths, &globs)?;
    let engine = ResearchEngine::open(config.clone()).await?;
    let mut report = engine.ingest(&documents).await;
    report.errors.extend(load_errors);

    println!("ingest");
    println!("  documents loaded: {}", report.documents_loaded);
    println!("  chunks created:   {}", report.chunks_created);
    println!("  chunks ingested:  {}", report.chunks_ingested);
    println!("  chunks skipped:   {}", report.chunks_skipped);
    println!("  errors:           {}", report.errors.len());
    for e in &report.errors {
        println!("    {}: {}", e.source, e.error);
    }
    Ok(())
}

pub async fn run_query(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    language: Language,
    json: bool,
) -> Result<()> {
    let engine = ResearchEngine::open(config.clone()).await?;
    let response = engine
        .query(&QueryRequest {
            query: query.to_string(),
            top_k,
            language,
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.answer);
    if !response.sources.is_empty() {
        println!();
        println!("Sources:");
        for s in &response.sources {
            let mut line = format!("  [{}] {}", s.index, s.source);
            if let Some(authors) = &s.authors {
                line.push_str(&format!(" ({})", authors.join(", ")));
            }
            if let Some(date) = &s.date {
                line.push_str(&format!(", {}", date));
            }
            println!("{}", line);
        }
    }
    for w in &response.warnings {
        println!("warning: {}", w);
    }
    println!();
    println!(
        "mode: {:?}, retrieval: {:.3}s, total: {:.3}s",
        response.mode, response.metrics.retrieval_time, response.metrics.total_time
    );
    print_record(&response.evaluation);
    Ok(())
}

pub async fn run_evaluate(
    config: &Config,
    query: String,
    answer: String,
    context: Vec<String>,
) -> Result<()> {
    let engine = ResearchEngine::open(config.clone()).await?;
    let record = engine
        .evaluate(&EvaluateRequest {
            query,
            answer,
            context,
        })
        .await?;
    print_record(&record);
    Ok(())
}

pub async fn run_show_evaluation(config: &Config, record_id: &str) -> Result<()> {
    let engine = ResearchEngine::open(config.clone()).await?;
    let record = engine.get_evaluation(record_id).await?;
    print_record(&record);
    Ok(())
}

fn print_record(record: &EvaluationRecord) {
    println!("evaluation {}", record.record_id);
    println!("  citation_coverage: {:.2}", record.scores.citation_coverage);
    println!("  groundedness:      {:.2}", record.scores.groundedness);
    println!("  answer_relevance:  {:.2}", record.scores.answer_relevance);
    println!("  context_relevance: {:.2}", record.scores.context_relevance);
    println!("  created_at:        {}", record.created_at.to_rfc3339());
}
