//! Cache command - inspect and clean the local cache

use crate::cache::gc::{self, inspect, SweepDecision};
use crate::cache::key::{cache_key, is_cache_key};
use crate::cache::{list_entries, remove_entry, sweep, EntryInfo, EntryState, EntryStore};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::{DlxError, DlxResult};
use crate::install::UpdateChecker;
use crate::ui::{self, UiContext};
use console::style;
use std::time::Duration;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> DlxResult<()> {
    let store = EntryStore::new(ConfigManager::cache_root(config));

    match args.action {
        CacheAction::Path => {
            println!("{}", store.root().display());
            Ok(())
        }
        CacheAction::Key { spec } => {
            println!("{}", cache_key(&spec));
            Ok(())
        }
        CacheAction::List { format } => list(&store, config, format).await,
        CacheAction::Gc { days, dry_run } => gc_entries(&store, config, days, dry_run).await,
        CacheAction::Rm { key } => remove(&store, config, &key).await,
        CacheAction::Clear { yes } => clear_all(&store, config, yes).await,
    }
}

async fn list(store: &EntryStore, config: &Config, format: OutputFormat) -> DlxResult<()> {
    let stale = ConfigManager::install_lock_options(config).stale_timeout;
    let entries = list_entries(store, stale).await?;

    match format {
        OutputFormat::Table => print_table(&entries),
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.key);
            }
        }
    }

    Ok(())
}

fn print_table(entries: &[EntryInfo]) {
    if entries.is_empty() {
        println!("No cache entries found.");
        return;
    }

    println!(
        "{:<18} {:<10} {:<9} {:>10} {:<10} SOURCE",
        "KEY", "STATE", "KIND", "SIZE", "AGE"
    );
    println!("{}", "-".repeat(90));

    for entry in entries {
        let state = match entry.state {
            EntryState::Published => style("published").green().to_string(),
            EntryState::Writing => style("writing").yellow().to_string(),
            EntryState::Absent => style("absent").dim().to_string(),
        };
        let meta = entry.metadata.as_ref();
        let source = meta.and_then(|m| m.source.as_ref());
        let kind = source.map_or("-".to_string(), |s| s.kind.to_string());
        let origin = source.map_or("-", |s| s.origin());
        let size = meta.map_or("-".to_string(), |m| format_size(m.size));
        let age = entry.age.map_or("-".to_string(), format_age);

        // Escape codes count toward format width; pad by visible length
        println!(
            "{:<18} {:<10} {:<9} {:>10} {:<10} {}",
            entry.key,
            pad_styled(&state, entry.state.to_string().len(), 10),
            kind,
            size,
            age,
            origin
        );
    }

    println!();
    println!("Total: {} entr(ies)", entries.len());
}

fn pad_styled(styled: &str, visible: usize, width: usize) -> String {
    format!("{}{}", styled, " ".repeat(width.saturating_sub(visible)))
}

fn print_json(entries: &[EntryInfo]) -> DlxResult<()> {
    #[derive(serde::Serialize)]
    struct EntryJson<'a> {
        key: &'a str,
        state: String,
        age_ms: Option<u64>,
        size: Option<u64>,
        integrity: Option<&'a str>,
        source: Option<&'a crate::cache::Source>,
    }

    let json: Vec<EntryJson<'_>> = entries
        .iter()
        .map(|e| EntryJson {
            key: &e.key,
            state: e.state.to_string(),
            age_ms: e.age.map(|a| a.as_millis() as u64),
            size: e.metadata.as_ref().map(|m| m.size),
            integrity: e.metadata.as_ref().map(|m| m.integrity.as_str()),
            source: e.metadata.as_ref().and_then(|m| m.source.as_ref()),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Garbage collect expired and abandoned entries
async fn gc_entries(
    store: &EntryStore,
    config: &Config,
    days_override: Option<u32>,
    dry_run: bool,
) -> DlxResult<()> {
    let ctx = UiContext::detect();
    let gc_days = days_override.unwrap_or(config.cache.gc_days);

    if gc_days == 0 {
        println!("Cache GC is disabled (gc_days = 0)");
        return Ok(());
    }
    let max_age = Duration::from_secs(u64::from(gc_days) * 86_400);
    let stale = ConfigManager::install_lock_options(config).stale_timeout;

    if dry_run {
        let mut doomed = vec![];
        for key in gc::entry_keys(store).await? {
            let decision = inspect(&store.entry(&key), max_age, stale).await;
            if decision != SweepDecision::Keep {
                doomed.push((key, decision));
            }
        }

        if doomed.is_empty() {
            println!("No entries older than {} days.", gc_days);
            return Ok(());
        }
        println!("Would remove {} entr(ies):", doomed.len());
        for (key, decision) in &doomed {
            let reason = match decision {
                SweepDecision::Debris => "empty",
                _ => "expired",
            };
            println!("  {} {} ({})", style("•").red(), key, reason);
        }
        println!();
        println!("Dry run - no entries removed.");
        return Ok(());
    }

    let removed = sweep(store, max_age, stale).await;
    if removed == 0 {
        println!("No entries older than {} days.", gc_days);
    } else {
        ui::step_ok(&ctx, &format!("Removed {} entr(ies)", removed));
    }
    Ok(())
}

async fn remove(store: &EntryStore, config: &Config, key: &str) -> DlxResult<()> {
    let ctx = UiContext::detect();

    if !is_cache_key(key) {
        return Err(DlxError::User(format!(
            "'{}' is not a cache key (expected 16 hex characters, see `dlx cache list`)",
            key
        )));
    }

    let options = ConfigManager::install_lock_options(config);
    if remove_entry(store, key, &options).await? {
        ui::step_ok(&ctx, &format!("Removed {}", key));
    } else {
        ui::step_info(&ctx, &format!("No entry {}", key));
    }
    Ok(())
}

/// Remove every entry and the memoized lookups
async fn clear_all(store: &EntryStore, config: &Config, yes: bool) -> DlxResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let keys = gc::entry_keys(store).await?;

    if keys.is_empty() {
        println!("No cache entries to clear.");
        return Ok(());
    }

    let prompt = format!("Remove {} entr(ies) from {}?", keys.len(), store.root().display());
    if !ui::confirm(&ctx, &prompt, false).await? {
        ui::remark(&ctx, "Aborted. Pass --yes to clear without a prompt");
        return Ok(());
    }

    let stale = ConfigManager::install_lock_options(config).stale_timeout;
    let removed = gc::clear(store, stale).await?;
    if let Err(e) = UpdateChecker::from_config(config).forget().await {
        debug!("Failed to clear memoized lookups: {}", e);
    }

    ui::step_ok(&ctx, &format!("Cleared {} entr(ies)", removed));
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}
