//! Filesystem corpus source.
//!
//! Walks `corpus.root`, keeps files matching `include_globs` and not
//! matching `exclude_globs`, and reads each as UTF-8 text. Documents are
//! named by their root-relative path and returned sorted, so every
//! ingestion run sees the corpus in the same order.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use support_rag_core::models::SourceDocument;

use crate::config::CorpusConfig;

pub fn load_corpus(config: &CorpusConfig) -> Result<Vec<SourceDocument>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let name = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&name) || !include_set.is_match(&name) {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(document = %name, error = %e, "skipping unreadable document");
                continue;
            }
        };
        debug!(document = %name, chars = text.chars().count(), "loaded document");
        documents.push(SourceDocument::new(name, text));
    }

    documents.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(documents)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
