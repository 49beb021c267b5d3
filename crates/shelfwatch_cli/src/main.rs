//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `shelfwatch_core` linkage and the cache schema.
//! - Print a deterministic summary of a cache file, or of a fresh
//!   in-memory cache when no path is given.
//!
//! Usage: `shelfwatch_cli [CACHE_PATH] [LOG_DIR]`. The optional
//! `SHELFWATCH_CONFIG` variable holds a JSON configuration document; its
//! `log_level` applies when `LOG_DIR` is given.

use shelfwatch_core::storage::{list_key, load_or_default, migrations, TRACKING_PREFIX};
use shelfwatch_core::{
    init_logging, BookItem, CoreConfig, ListType, Notification, SqliteStorage, Storage,
};
use std::process::ExitCode;

const CONFIG_ENV: &str = "SHELFWATCH_CONFIG";

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let cache_path = args.next();
    let log_dir = args.next();

    let config = match load_config(std::env::var(CONFIG_ENV).ok().as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration rejected: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(log_dir) = log_dir {
        if let Err(err) = init_logging(&config.log_level, &log_dir) {
            eprintln!("logging init failed: {err}");
            return ExitCode::FAILURE;
        }
        println!("logging level={} dir={}", config.log_level, log_dir);
    }

    println!("shelfwatch_core version={}", shelfwatch_core::core_version());
    println!("cache schema_version={}", migrations::latest_version());

    let opened = match cache_path {
        Some(path) => SqliteStorage::open(path),
        None => SqliteStorage::open_in_memory(),
    };
    let storage = match opened {
        Ok(storage) => storage,
        Err(err) => {
            eprintln!("cache open failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    for line in summarize(&storage) {
        println!("{line}");
    }
    ExitCode::SUCCESS
}

fn load_config(document: Option<&str>) -> Result<CoreConfig, String> {
    match document {
        Some(document) => CoreConfig::from_json_str(document).map_err(|err| err.to_string()),
        None => Ok(CoreConfig::default()),
    }
}

fn summarize(storage: &dyn Storage) -> Vec<String> {
    let mut lines = Vec::new();
    for list in ListType::ALL {
        let items: Vec<BookItem> = load_or_default(storage, &list_key(list));
        let pending = items.iter().filter(|item| !item.is_synced()).count();
        lines.push(format!("list={} items={} pending={}", list, items.len(), pending));
    }
    let tracked = storage
        .keys_with_prefix(TRACKING_PREFIX)
        .map(|keys| keys.len())
        .unwrap_or(0);
    lines.push(format!("tracking snapshots={tracked}"));
    let notifications: Vec<Notification> =
        load_or_default(storage, shelfwatch_core::storage::NOTIFICATIONS_KEY);
    let unread = notifications.iter().filter(|n| !n.is_read).count();
    lines.push(format!(
        "notifications total={} unread={}",
        notifications.len(),
        unread
    ));
    lines
}
