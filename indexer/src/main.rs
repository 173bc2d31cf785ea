use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use starfind_core::identity::{assign_ids, unclaim, RenameMode};
use starfind_core::pipeline::document_key;
use starfind_core::index::{tags, tags_value, TAGS};
use starfind_core::refresh::run_refresh;
use starfind_core::{
    DataPaths, ExtractorRegistry, IndexStore, Indexer, Metadata, RefreshOptions, SearchEngine, SearchError, Settings,
    SpellChecker,
};
use tracing_subscriber::{fmt, EnvFilter};

use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Index local documents and run boolean searches over them", long_about = None)]
struct Cli {
    /// Directory holding the index, settings and watchdog worklist
    #[arg(long, global = true, env = "STARFIND_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim and index every unindexed file under a folder
    Index {
        #[arg(long)]
        path: PathBuf,
        /// Descend into sub-folders
        #[arg(long, overrides_with = "no_recursive")]
        recursive: bool,
        /// Only index the top level of the folder
        #[arg(long, overrides_with = "recursive")]
        no_recursive: bool,
        /// Replace the file name with the ID instead of appending it
        #[arg(long, overrides_with = "keep_filename")]
        replace_filename: bool,
        /// Keep the file name and append the ID to it
        #[arg(long, overrides_with = "replace_filename")]
        keep_filename: bool,
    },
    /// Run a boolean query (AND, OR, NOT, parentheses)
    Search {
        query: String,
        /// Require every word to match
        #[arg(long, default_value_t = false)]
        full_text: bool,
        /// Print the response as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Extra `term count` spelling dictionary
        #[arg(long)]
        dictionary: Option<PathBuf>,
    },
    /// Reindex stale documents and drain the watchdog worklist
    Refresh {
        /// Documents per run (defaults to the saved setting)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Drop a document and its postings from the index
    Remove {
        #[arg(long)]
        path: String,
    },
    /// Add tags to an indexed document, or list them when none are given
    Tag {
        #[arg(long)]
        path: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Rename every file in a folder to carry an ID without indexing it
    AssignIds {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        replace_filename: bool,
    },
    /// Restore the original names of claimed files below a folder and drop
    /// them from the index
    Unclaim {
        #[arg(long)]
        path: PathBuf,
    },
    /// Delete every document from the index
    Reset,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let paths = DataPaths::new(&cli.data_dir);

    match cli.command {
        Commands::Index { path, recursive, no_recursive, replace_filename, keep_filename } => index(
            &paths,
            &path,
            switch(recursive, no_recursive),
            switch(replace_filename, keep_filename),
        ),
        Commands::Search { query, full_text, json, dictionary } => {
            search(&paths, &query, full_text, json, dictionary.as_deref())
        }
        Commands::Refresh { batch_size } => refresh(&paths, batch_size),
        Commands::Remove { path } => {
            let store = open_store(&paths)?;
            if store.remove_document(&path)? {
                println!("removed {path}");
            } else {
                println!("{path} is not indexed");
            }
            Ok(())
        }
        Commands::Tag { path, tags } => tag(&paths, &path, tags),
        Commands::AssignIds { path, replace_filename } => {
            let renamed = assign_ids(&path, RenameMode::from_replace_flag(replace_filename))
                .with_context(|| format!("assigning ids in {}", path.display()))?;
            for file in &renamed {
                println!("{}", file.display());
            }
            println!("{} files renamed", renamed.len());
            Ok(())
        }
        Commands::Unclaim { path } => release(&paths, &path),
        Commands::Reset => {
            let store = open_store(&paths)?;
            let documents = store.document_count();
            store.clear()?;
            println!("removed {documents} documents");
            Ok(())
        }
    }
}

/// Resolve an `--x` / `--no-x` pair; `None` keeps the saved setting.
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn open_store(paths: &DataPaths) -> Result<IndexStore> {
    let index = paths.index();
    tracing::debug!(index = %index.display(), "opening index");
    IndexStore::open(&index).with_context(|| format!("opening index at {}", index.display()))
}

fn index(paths: &DataPaths, root: &Path, recursive: Option<bool>, replace_filename: Option<bool>) -> Result<()> {
    let settings = Settings::update(&paths.settings(), |s| {
        if let Some(recursive) = recursive {
            s.recursive = recursive;
        }
        if let Some(replace) = replace_filename {
            s.replace_filename = replace;
        }
    })?;
    let store = open_store(paths)?;
    let extractors = ExtractorRegistry::default();
    let report = Indexer::new(&store, &extractors).index_path(
        root,
        settings.recursive,
        RenameMode::from_replace_flag(settings.replace_filename),
    )?;
    println!(
        "discovered {}, indexed {}, unsupported {}, failed {}",
        report.discovered, report.indexed, report.unsupported, report.failed
    );
    Ok(())
}

fn search(paths: &DataPaths, query: &str, full_text: bool, json: bool, dictionary: Option<&Path>) -> Result<()> {
    let settings = Settings::load(&paths.settings())?;
    let store = open_store(paths)?;
    let extractors = ExtractorRegistry::default();
    let mut speller = SpellChecker::new().protect_operators(settings.protect_operators);
    if let Some(dictionary) = dictionary {
        speller.load_dictionary(dictionary)?;
    }
    speller.extend(store.term_frequencies()?);
    tracing::debug!(words = speller.word_count(), "spelling dictionary ready");

    let response = match SearchEngine::new(&store, &extractors, &speller).search(query, full_text) {
        Ok(response) => response,
        Err(SearchError::InvalidQuery) => bail!("invalid query format: {query}"),
        Err(SearchError::Store(err)) => return Err(err.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    if response.suggestion != query.to_lowercase() {
        println!("did you mean: {}", response.suggestion);
    }
    println!("{} results", response.results.len());
    for (rank, hit) in response.results.iter().enumerate() {
        let pages: Vec<String> = hit.pages.iter().map(u32::to_string).collect();
        println!(
            "{:>3}. {} (pages {}; {} matches, tf {})",
            rank + 1,
            hit.path,
            pages.join(", "),
            hit.match_count,
            hit.total_tf
        );
        for snippet in &hit.snippets {
            println!("       … {snippet}");
        }
    }
    Ok(())
}

fn refresh(paths: &DataPaths, batch_size: Option<usize>) -> Result<()> {
    let settings = Settings::load(&paths.settings())?;
    let store = open_store(paths)?;
    let options = RefreshOptions {
        batch_size: batch_size.unwrap_or(settings.watchdog_number),
        recursive: settings.recursive,
        worklist: paths.worklist(),
    };
    let report = run_refresh(&store, &ExtractorRegistry::default(), &options)?;
    println!(
        "reindexed {}, deleted {}, newly indexed {}",
        report.reindexed, report.deleted, report.newly_indexed
    );
    Ok(())
}

fn release(paths: &DataPaths, root: &Path) -> Result<()> {
    let root = root.canonicalize().with_context(|| format!("resolving {}", root.display()))?;
    let outcome = unclaim(&root).with_context(|| format!("unclaiming files in {}", root.display()))?;
    let store = open_store(paths)?;
    let mut dropped = 0;
    for (claimed, original) in &outcome.restored {
        if store.remove_document(&document_key(claimed))? {
            dropped += 1;
        }
        println!("{} -> {}", claimed.display(), original.display());
    }
    for skipped in &outcome.skipped {
        println!("skipped {}", skipped.display());
    }
    println!(
        "{} files restored, {} skipped, {dropped} documents dropped from the index",
        outcome.restored.len(),
        outcome.skipped.len()
    );
    Ok(())
}

fn tag(paths: &DataPaths, path: &str, new_tags: Vec<String>) -> Result<()> {
    let store = open_store(paths)?;
    let Some(meta) = store.get_metadata(path)? else {
        bail!("{path} is not indexed");
    };
    let mut current = tags(&meta);
    if !new_tags.is_empty() {
        current.extend(new_tags.into_iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()));
        let mut update = Metadata::new();
        update.insert(TAGS.into(), tags_value(current.iter().cloned()));
        store.update_metadata(path, &update)?;
    }
    let listed: Vec<&str> = current.iter().map(String::as_str).collect();
    println!("{}", listed.join(", "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_flags(args: &[&str]) -> (Option<bool>, Option<bool>) {
        let mut argv = vec!["indexer", "index", "--path", "docs"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Index { recursive, no_recursive, replace_filename, keep_filename, .. } => {
                (switch(recursive, no_recursive), switch(replace_filename, keep_filename))
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn index_options_are_plain_switches() {
        assert_eq!(index_flags(&[]), (None, None));
        assert_eq!(index_flags(&["--recursive", "--replace-filename"]), (Some(true), Some(true)));
        assert_eq!(index_flags(&["--no-recursive", "--keep-filename"]), (Some(false), Some(false)));
        // the last switch of a pair wins
        assert_eq!(index_flags(&["--recursive", "--no-recursive"]).0, Some(false));
        assert_eq!(index_flags(&["--no-recursive", "--recursive"]).0, Some(true));
    }

    #[test]
    fn unclaim_and_reset_parse() {
        assert!(matches!(
            Cli::try_parse_from(["indexer", "unclaim", "--path", "docs"]).unwrap().command,
            Commands::Unclaim { .. }
        ));
        assert!(matches!(Cli::try_parse_from(["indexer", "reset"]).unwrap().command, Commands::Reset));
    }
}
