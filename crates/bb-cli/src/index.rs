use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bb_compiler::{build_static_ruleset, BuildStats};
use bb_core::{StaticRuleIndex, SubscriptionId};

/// `<subscription url>=<path>` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFile {
    pub url: String,
    pub path: PathBuf,
}

pub fn parse_url_file(arg: &str) -> Result<UrlFile, String> {
    let (url, path) = arg
        .rsplit_once('=')
        .ok_or_else(|| format!("Expected <url>=<path>, got '{}'", arg))?;
    if url.is_empty() || path.is_empty() {
        return Err(format!("Expected <url>=<path>, got '{}'", arg));
    }
    Ok(UrlFile {
        url: url.to_string(),
        path: PathBuf::from(path),
    })
}

#[derive(Debug, Clone)]
pub struct CompileStats {
    pub lists: usize,
    pub totals: BuildStats,
    pub total_ms: f64,
}

pub fn compile_static_index(inputs: &[UrlFile], verbose: bool) -> Result<(StaticRuleIndex, CompileStats), String> {
    if inputs.is_empty() {
        return Err("No input lists specified".to_string());
    }

    let start = Instant::now();
    let mut index = StaticRuleIndex::new();
    let mut stats = CompileStats {
        lists: inputs.len(),
        totals: BuildStats::default(),
        total_ms: 0.0,
    };

    for input in inputs {
        let content = fs::read_to_string(&input.path)
            .map_err(|e| format!("Failed to read '{}': {}", input.path.display(), e))?;

        let (ruleset, list_stats) = build_static_ruleset(&content);

        if verbose {
            println!(
                "  {} - {} lines, {} filters, {} rules",
                input.url, list_stats.lines, list_stats.filters, list_stats.rules
            );
        }

        stats.totals.merge(&list_stats);
        index.insert(SubscriptionId::new(input.url.as_str()), ruleset);
    }

    stats.total_ms = start.elapsed().as_secs_f64() * 1000.0;
    Ok((index, stats))
}

pub fn write_index(path: &Path, index: &StaticRuleIndex) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }
    let json = serde_json::to_string_pretty(index)
        .map_err(|e| format!("Failed to encode static rule index: {}", e))?;
    fs::write(path, json)
        .map_err(|e| format!("Failed to write '{}': {}", path.display(), e))?;
    Ok(())
}

pub fn read_index(path: &Path) -> Result<StaticRuleIndex, String> {
    let json = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    serde_json::from_str(&json)
        .map_err(|e| format!("Invalid static rule index '{}': {}", path.display(), e))
}
