//! StudyFindr engine (sfr-engine) - command-line entry point
//!
//! Drives the location-interaction engine against the StudyFindr API (or the
//! in-memory backend with `--offline`) and prints the results.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sfr_common::config::EngineConfig;
use sfr_common::model::{Ratings, ReviewRecord, ReviewSubmission, SortDirection, SortKey};
use sfr_common::LocationId;
use sfr_engine::backend::{HttpBackend, MemoryBackend, StudyBackend};
use sfr_engine::categories::Category;
use sfr_engine::feed::FeedState;
use sfr_engine::selection::SelectionState;
use sfr_engine::StudyEngine;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for sfr-engine
#[derive(Parser, Debug)]
#[command(name = "sfr-engine")]
#[command(about = "StudyFindr location-interaction engine")]
#[command(version)]
struct Args {
    /// Config file (overrides SFR_CONFIG and the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API base URL (overrides the config file)
    #[arg(long)]
    api_url: Option<String>,

    /// Signed-in user email
    #[arg(short, long, env = "SFR_USER")]
    user: Option<String>,

    /// Use the in-memory backend instead of the API
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List locations, optionally by category
    Locations {
        /// All, Libraries, Cafes, Favorites, Popular Study, Quiet Study, Convenience Study
        #[arg(long, default_value = "All")]
        category: String,
    },
    /// Select a location and show its ratings and recent comments
    Select { id: String },
    /// Page through a location's reviews
    Reviews {
        id: String,
        /// created_at or likes
        #[arg(long, default_value = "created_at")]
        sort: String,
        /// Oldest/least liked first
        #[arg(long)]
        ascending: bool,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Toggle the bookmark of a location
    Bookmark { id: String },
    /// List bookmarks
    Bookmarks,
    /// Create or update your review of a location
    Review {
        id: String,
        #[arg(long)]
        quietness: u8,
        #[arg(long)]
        seating: u8,
        #[arg(long)]
        vibes: u8,
        #[arg(long)]
        crowdedness: u8,
        #[arg(long)]
        internet: u8,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Show (or change) your profile
    Profile {
        /// New display name
        #[arg(long)]
        username: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = &args.api_url {
        config.api_base_url = url.clone();
    }

    // Initialize tracing
    let default_filter = format!(
        "sfr_engine={level},sfr_common={level}",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let backend: Arc<dyn StudyBackend> = if args.offline {
        info!("Using in-memory backend");
        Arc::new(MemoryBackend::new())
    } else {
        info!("Using API at {}", config.api_base_url);
        Arc::new(
            HttpBackend::new(&config.api_base_url, config.request_timeout())
                .context("Failed to create HTTP backend")?,
        )
    };

    let engine = StudyEngine::new(config, backend);
    if let Err(e) = engine.load_locations().await {
        eprintln!("warning: remote locations unavailable ({}), showing built-in set", e);
    }
    if let Some(user) = &args.user {
        engine.sign_in(user).await.context("Sign-in failed")?;
    }

    run(&engine, args.command).await
}

async fn run(engine: &StudyEngine, command: Command) -> Result<()> {
    match command {
        Command::Locations { category } => {
            let category: Category = category.parse()?;
            let entries = engine.set_category(category).await;
            println!("{} ({} locations)", category, entries.len());
            for entry in entries {
                let kind = entry.kind.map_or("bookmark", |k| k.as_str());
                match entry.score {
                    Some(score) => println!("  {:<12} {:<10} {:.2}  {}", entry.location_id, kind, score, entry.name),
                    None => println!("  {:<12} {:<10} {}", entry.location_id, kind, entry.name),
                }
            }
        }
        Command::Select { id } => {
            let id = parse_id(&id)?;
            engine.select(&id).await?;
            let location = engine.location(&id).await?;
            println!("{} [{}]", location.name, location.kind);
            if let Some(address) = &location.address {
                println!("  {}", address);
            }
            if engine.is_bookmarked(&id).await {
                println!("  bookmarked");
            }
            match engine.selection().await {
                SelectionState::Ready(data) if data.fetch_failed => {
                    println!("  reviews unavailable right now");
                }
                SelectionState::Ready(data) => {
                    match &data.aggregate {
                        Some(a) => {
                            println!(
                                "  overall {:.1} from {} review(s): quiet {:.1}, seating {:.1}, vibes {:.1}, crowded {:.1}, internet {:.1}",
                                a.overall, a.review_count, a.quietness, a.seating, a.vibes, a.crowdedness, a.internet
                            );
                        }
                        None => println!("  no reviews yet"),
                    }
                    for review in &data.preview {
                        print_review(review);
                    }
                    if let Some(own) = &data.own_review {
                        println!("  your review:");
                        print_review(own);
                    }
                }
                other => println!("  {:?}", other),
            }
        }
        Command::Reviews {
            id,
            sort,
            ascending,
            pages,
        } => {
            let id = parse_id(&id)?;
            engine.location(&id).await?;
            let sort_key: SortKey = sort.parse()?;
            let direction = if ascending {
                SortDirection::Ascending
            } else {
                SortDirection::Descending
            };
            let feed = engine.feed();
            feed.open(&id, sort_key, direction).await;
            for _ in 0..pages.max(1) {
                feed.load_next_page().await?;
                if feed.state().await == FeedState::Exhausted {
                    break;
                }
            }
            let entries = feed.entries().await;
            if entries.is_empty() {
                println!("No reviews yet");
            }
            for review in &entries {
                print_review(review);
            }
            if feed.state().await == FeedState::Loaded {
                println!("  (more available)");
            }
        }
        Command::Bookmark { id } => {
            let id = parse_id(&id)?;
            let bookmarked = engine.toggle_bookmark(&id).await?;
            println!("{} {}", id, if bookmarked { "bookmarked" } else { "removed" });
        }
        Command::Bookmarks => {
            engine.refresh_bookmarks().await?;
            let bookmarks = engine.bookmarks().await;
            if bookmarks.is_empty() {
                println!("No bookmarks");
            }
            for bookmark in bookmarks {
                println!("  {:<12} {}", bookmark.location_id, bookmark.name);
            }
        }
        Command::Review {
            id,
            quietness,
            seating,
            vibes,
            crowdedness,
            internet,
            comment,
        } => {
            let id = parse_id(&id)?;
            engine.location(&id).await?;
            let review = engine
                .submit_review(
                    &id,
                    ReviewSubmission {
                        ratings: Ratings::new(quietness, seating, vibes, crowdedness, internet),
                        comment,
                    },
                )
                .await?;
            println!("Saved review {}", review.id);
            if let Some(aggregate) = engine.cache().fetch(&id).await? {
                println!(
                    "  overall now {:.1} from {} review(s)",
                    aggregate.overall, aggregate.review_count
                );
            }
        }
        Command::Profile { username } => {
            let profile = match username {
                Some(name) => engine.update_username(&name).await?,
                None => engine.profile().await?,
            };
            println!("username: {}", profile.username);
            if let Some(picture) = profile.profile_picture {
                println!("picture:  {}", picture);
            }
        }
    }
    Ok(())
}

fn parse_id(raw: &str) -> Result<LocationId> {
    match LocationId::parse(raw) {
        Some(id) => Ok(id),
        None => bail!("invalid location id: {:?}", raw),
    }
}

fn print_review(review: &ReviewRecord) {
    let r = &review.ratings;
    println!(
        "  - {} ({}) q{} s{} v{} c{} i{}  +{} -{}",
        review.author_name.as_deref().unwrap_or(&review.author),
        review
            .created_at
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "undated".to_string()),
        r.quietness,
        r.seating,
        r.vibes,
        r.crowdedness,
        r.internet,
        review.likes_count,
        review.dislikes_count,
    );
    if let Some(comment) = &review.comment {
        println!("      {}", comment);
    }
}
