//! Sift - Search a mailbox by sender from a local metadata cache
//!
//! Usage: `sift <sender-pattern> [days]`

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{error, info, warn};
use mail_cache::{
    ConnectionPool, EmailRecord, ImapSessionFactory, SearchError, SearchService, Settings,
    SqliteMailCache, lookback_days,
};

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(pattern) = args.next() else {
        bail!("usage: sift <sender-pattern> [days]");
    };
    let days = match args.next() {
        Some(days) => Some(
            days.parse::<u32>()
                .with_context(|| format!("invalid day count: {}", days))?,
        ),
        None => None,
    };

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            if let Some(path) = Settings::default_settings_path() {
                warn!(
                    "To configure mailbox access, either:\n\
                     1. Write your server settings to: {}\n\
                     2. Or set environment variables: GMAIL_ADDRESS and GMAIL_APP_PASSWORD",
                    path.display()
                );
            }
            return Err(e.context("Mailbox settings not found"));
        }
    };

    let db_path = settings.database_path()?;
    info!("Using cache at {}", db_path.display());
    let store = Arc::new(SqliteMailCache::open(&db_path)?);

    let factory = ImapSessionFactory::new(settings.imap.clone())?;
    let pool = ConnectionPool::new(factory, settings.pool_settings());
    let service = SearchService::new(store, pool, settings.search_options());

    if let Some(retention) = settings.retention()
        && let Err(e) = service.enforce_retention(retention)
    {
        warn!("Retention cleanup failed: {:#}", e);
    }

    let outcome = service.search(&pattern, lookback_days(days));
    service.shutdown();

    match outcome {
        Ok(report) => {
            print_rows(&report.results);
            info!(
                "{} results, {} new records from {} gaps in {}ms",
                report.results.len(),
                report.stats.records_fetched,
                report.stats.gaps,
                report.stats.duration_ms
            );
            Ok(())
        }
        Err(SearchError::Offline { cached, reason }) => {
            warn!("Server unreachable ({}), showing cached results only", reason);
            print_rows(&cached);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_rows(records: &[EmailRecord]) {
    for record in records {
        println!(
            "{}  {:<40}  {}",
            record.date.format("%Y-%m-%d %H:%M"),
            record.from_address,
            record.subject
        );
        if let Some(link) = &record.deep_link {
            println!("    {}", link);
        }
    }
}
