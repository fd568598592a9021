use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use snomed_retriever::config::Config;
use snomed_retriever::matcher::PhraseIndex;
use snomed_retriever::ontology::{Cui, OntologyLookup, ReleaseFiles};
use snomed_retriever::retriever::{
    ConceptRetriever, Note, Retrieval, deduplicate_note_lines, render_extracts,
    sort_chronologically,
};

/// SNOMED CT phrase matching and context retrieval over clinical notes
#[derive(Parser, Debug)]
#[command(name = "snomed-retriever")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a raw RF2 release and persist the lookup as JSON
    BuildOntology {
        /// Release directory containing the sct2_* snapshot tables
        #[arg(short, long)]
        release_dir: PathBuf,

        /// Output directory for the lookup files
        #[arg(short, long, default_value = "./snomed_lookup")]
        out: PathBuf,
    },
    /// Retrieve context windows for search terms from notes
    Extract {
        /// Config file (defaults to config.json)
        #[arg(short, long, default_value = "")]
        config: String,

        /// Note files: a JSON array of notes, or plain text (one note per file)
        #[arg(short, long, required = true, num_args = 1..)]
        notes: Vec<PathBuf>,

        /// Search terms
        #[arg(short, long = "term", required = true, num_args = 1..)]
        terms: Vec<String>,

        /// Root concept ids, overriding the config
        #[arg(long = "root-cui", num_args = 1..)]
        root_cuis: Vec<Cui>,

        /// Drop note lines repeated from earlier notes before matching
        #[arg(long)]
        dedupe_lines: bool,

        /// Print provenance-labelled text instead of JSON
        #[arg(long)]
        render: bool,
    },
    /// Print the JSON schema of the extract output
    Schema,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::BuildOntology { release_dir, out } => build_ontology(&release_dir, &out),
        Command::Extract {
            config,
            notes,
            terms,
            root_cuis,
            dedupe_lines,
            render,
        } => extract(&config, &notes, &terms, root_cuis, dedupe_lines, render),
        Command::Schema => {
            let schema = schemars::schema_for!(Retrieval);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

fn build_ontology(release_dir: &Path, out: &Path) -> Result<()> {
    let files = ReleaseFiles::discover(release_dir)
        .with_context(|| format!("failed to scan release: {}", release_dir.display()))?;
    if !files.is_complete() {
        bail!(
            "incomplete release under {}: {} concept, {} description, {} relationship tables",
            release_dir.display(),
            files.concepts.len(),
            files.descriptions.len(),
            files.relationships.len()
        );
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {elapsed} {msg}")
            .expect("valid template"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(format!("parsing release {}", release_dir.display()));

    let lookup = OntologyLookup::load_from_raw_files(&files).context("failed to parse release")?;

    pb.set_message(format!("writing {}", out.display()));
    lookup.save(out).context("failed to save lookup")?;
    pb.finish_with_message(format!("{} concepts", lookup.concept_count()));

    info!("Ontology lookup written to {}", out.display());
    Ok(())
}

fn extract(
    config_path: &str,
    note_paths: &[PathBuf],
    terms: &[String],
    root_cuis: Vec<Cui>,
    dedupe_lines: bool,
    render: bool,
) -> Result<()> {
    let mut config = Config::load(config_path)?;
    if !root_cuis.is_empty() {
        config.root_cuis = root_cuis;
    }
    config.validate()?;

    let lookup = OntologyLookup::load(&config.lookup_path())
        .with_context(|| format!("failed to load lookup from {}", config.lookup_dir))?;
    let lookup = Arc::new(lookup);
    let index = PhraseIndex::build(
        config.root_cuis.iter().copied(),
        &lookup,
        config.normalizer(),
        config.keep_child_cuis,
    )?;
    let retriever = ConceptRetriever::from_config(Arc::new(index), lookup, &config);

    let mut notes = read_notes(note_paths)?;
    sort_chronologically(&mut notes);
    if dedupe_lines {
        notes = deduplicate_note_lines(&notes);
    }
    info!("Matching {} notes against {} terms", notes.len(), terms.len());

    let texts: Vec<&str> = notes.iter().map(|n| n.text.as_str()).collect();
    let retrieval = retriever.retrieve(&texts, terms)?;

    if render {
        for (term, extracts) in retrieval.iter() {
            println!("## {term}\n");
            println!("{}\n", render_extracts(extracts, &notes));
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&retrieval)?);
    }
    Ok(())
}

fn read_notes(paths: &[PathBuf]) -> Result<Vec<Note>> {
    let mut notes = Vec::new();
    for path in paths {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read notes: {}", path.display()))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            let batch: Vec<Note> = serde_json::from_str(&data)
                .with_context(|| format!("invalid note JSON: {}", path.display()))?;
            notes.extend(batch);
        } else {
            notes.push(Note::new(data));
        }
    }
    Ok(notes)
}
