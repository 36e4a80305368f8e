use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;

use rss_aggregator::config::Config;
use rss_aggregator::db::Repository;
use rss_aggregator::models::ItemFilter;
use rss_aggregator::refresh::{RefreshScheduler, Refresher};

const USAGE: &str = "\
Usage: rss-aggregator [COMMAND]

With no command, refreshes due feeds in the background until Ctrl-C.

Commands:
  --add <url> [title]     Subscribe to a feed
  --refresh [feed_id]     Refresh one feed, or one batch of due feeds
  --list                  List subscribed feeds
  --delete <feed_id>      Unsubscribe and drop its items
  --sweep <feed_id>       Delete the read items of a feed
  --cleanup               Run one housekeeping pass
  --help                  Show this message";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Info by default; RUST_LOG overrides
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("--help" | "-h")) {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load().context("failed to load configuration")?;
    let repository = Arc::new(
        Repository::new(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path))?,
    );
    let refresher = Arc::new(
        Refresher::from_config(Arc::clone(&repository), &config.refresh)
            .context("failed to set up feed fetcher")?,
    );
    let scheduler = RefreshScheduler::new(Arc::clone(&refresher), &config.refresh, config.cleanup.clone());

    match args.first().map(String::as_str) {
        None => {
            let handle = scheduler.spawn();
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down");
            handle.shutdown().await;
        }
        Some("--add") => {
            let url = args.get(1).context("--add needs a feed URL")?;
            let title = args.get(2).cloned();
            let report = refresher.subscribe(url, title).await?;
            println!(
                "Subscribed as feed {} ({} item(s))",
                report.feed_id, report.inserted
            );
        }
        Some("--refresh") => match args.get(1) {
            Some(id) => {
                let report = refresher.refresh(parse_feed_id(id)?).await?;
                if report.not_modified {
                    println!("Feed {} not modified", report.feed_id);
                } else {
                    println!("Feed {}: {} new item(s)", report.feed_id, report.inserted);
                }
                println!("Next refresh at {}", report.next_refresh_at);
            }
            None => {
                let refreshed = scheduler.tick_once(Utc::now()).await;
                println!("Refreshed {} feed(s)", refreshed);
            }
        },
        Some("--list") => {
            for feed in repository.get_all_feeds().await? {
                let unread = repository
                    .get_items(Some(feed.id), ItemFilter::Unread)
                    .await?
                    .len();
                println!("{:>4}  {} ({} unread)", feed.id, feed.display_title(), unread);
                println!("      {}", feed.url);
                if let Some(error) = &feed.last_error {
                    println!("      error: {}", error);
                }
            }
        }
        Some("--delete") => {
            let id = parse_feed_id(args.get(1).context("--delete needs a feed id")?)?;
            if !repository.delete_feed(id).await? {
                bail!("feed {} not found", id);
            }
            println!("Deleted feed {}", id);
        }
        Some("--sweep") => {
            let id = parse_feed_id(args.get(1).context("--sweep needs a feed id")?)?;
            let removed = repository.sweep_read(id).await?;
            println!("Removed {} read item(s)", removed);
        }
        Some("--cleanup") => {
            let report = scheduler.housekeeping(Utc::now()).await?;
            println!(
                "Removed {} read item(s) and {} tombstone(s)",
                report.read_removed, report.tombstones_pruned
            );
        }
        Some(other) => bail!("unknown command {}\n\n{}", other, USAGE),
    }

    Ok(())
}

fn parse_feed_id(raw: &str) -> anyhow::Result<i64> {
    raw.parse()
        .with_context(|| format!("invalid feed id: {}", raw))
}
