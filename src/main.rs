use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::time::Duration;

use reelpool::cli::Args;
use reelpool::config::FeedConfig;
use reelpool::core::{EventBus, FeedController, FeedEvent, ReelFeed, ScrollDelta};
use reelpool::entities::{FeedItem, TraceEvent};
use reelpool::sim::{SimPlayerFactory, TimedLoader};

fn init_logging(args: &Args) -> Result<()> {
    let default_level = match args.verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    builder.format_timestamp_millis();
    if let Some(path) = &args.log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create log file: {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

/// Synthetic backend page: alternating HLS and progressive sources.
fn fetch_page(start: usize, count: usize, total: usize) -> Vec<FeedItem> {
    (start..(start + count).min(total))
        .map(|i| {
            let video_url = if i % 2 == 0 {
                format!("https://cdn.example/reels/{:04}/master.m3u8", i)
            } else {
                format!("https://cdn.example/reels/{:04}.mp4", i)
            };
            FeedItem::new(
                format!("reel-{:04}", i),
                i,
                video_url,
                format!("https://cdn.example/thumbs/{:04}.jpg", i),
            )
        })
        .collect()
}

fn print_trace(event: &TraceEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event).context("Failed to encode trace event")?);
    } else {
        println!(
            "{:<24} {:<10} {:?} {:>5} ms  {} ({})",
            event.metric_name(),
            event.video_id,
            event.outcome,
            event.duration_ms,
            event.attribute_id,
            event.format
        );
    }
    Ok(())
}

/// Empty the bus's deferred queue; pool activity only goes to the log.
fn drain_events(bus: &EventBus) {
    for event in bus.poll() {
        match event {
            FeedEvent::Evicted { video_id, slot } => debug!("Evicted {} from {}", video_id, slot),
            FeedEvent::PrefetchSkipped { video_id, reason } => debug!("Prefetch skipped {} ({:?})", video_id, reason),
            FeedEvent::StaleCallback { video_id, slot } => debug!("Stale callback for {} in {}", video_id, slot),
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;
    debug!("Command-line args: {:?}", args);

    let mut config = FeedConfig::from_env_and_cli(args.config.clone()).context("Failed to load feed config")?;
    if let Some(n) = args.pool_capacity {
        config.pool_capacity = n;
        config.validate().context("Invalid --pool override")?;
    }
    info!("Feed config: {:?}", config);

    let bus = EventBus::with_queue_limit(config.event_queue_limit);
    let edges = bus.edge_events();
    let traces = bus.trace_events();

    let loader = TimedLoader::new(
        args.loader_threads,
        Duration::from_millis(args.latency_ms),
        args.fail_every,
    )
    .context("Failed to start loader workers")?;
    let feed = ReelFeed::new(config, Box::new(SimPlayerFactory::new()), Box::new(loader), &bus)
        .context("Failed to build feed")?;
    let mut controller = FeedController::spawn(feed).context("Failed to start control sequence")?;
    let handle = controller.handle();

    let mut items = fetch_page(0, args.page_size, args.items);
    let mut position = 0;
    handle.position_changed(position, items.clone())?;

    for _ in 0..args.swipes {
        std::thread::sleep(Duration::from_millis(args.dwell_ms));
        for event in traces.try_iter() {
            print_trace(&event, args.json)?;
        }
        drain_events(&bus);

        // One swipe: drag, fling, settle on the next page if there is one
        handle.scroll(ScrollDelta::vertical(-24.0))?;
        handle.fling(ScrollDelta::vertical(-1800.0))?;
        handle.stats()?;

        for edge in edges.try_iter() {
            if edge.at_start || items.len() >= args.items {
                continue;
            }
            let page = fetch_page(items.len(), args.page_size, args.items);
            info!("Edge at page {}: fetched {} more items", edge.page, page.len());
            items.extend(page);
        }

        if position + 1 < items.len() {
            position += 1;
            handle.position_changed(position, items.clone())?;
        } else {
            info!("End of feed at position {}", position);
        }
    }

    std::thread::sleep(Duration::from_millis(args.latency_ms));
    let stats = handle.stats()?;
    for event in traces.try_iter() {
        print_trace(&event, args.json)?;
    }
    drain_events(&bus);

    if args.json {
        println!("{}", serde_json::to_string(&stats).context("Failed to encode stats")?);
    } else {
        println!();
        println!("position      {} / {}", position, items.len());
        println!("pool          {:?}", stats.pool);
        println!("traces        {:?}", stats.traces);
        println!("assigned      {}", stats.assigned);
        println!("inflight      {}", stats.prefetch_inflight);
    }

    controller.shutdown();
    Ok(())
}
