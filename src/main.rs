use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info, warn};

use do_i_need_that::alternatives::MarketplaceLinks;
use do_i_need_that::models::{AlternativesChoice, PageEvent, UserChoice};
use do_i_need_that::presenter::{ScriptedPresenter, TerminalPresenter};
use do_i_need_that::sites::SiteRegistry;
use do_i_need_that::traits::{GateStore, Presenter, StatisticsStore};
use do_i_need_that::{Database, Interceptor, MemoryStore, Settings, SnapshotPage};

/// Load a product page, watch its purchase buttons and ask before buying.
///
/// Loading a cart or checkout URL clears every stored decision.
#[derive(Debug, Parser)]
#[command(name = "do-i-need-that", version)]
struct Args {
    /// Product page URL; fetched unless --file is given
    url: String,

    /// Read the page from this saved HTML file instead of fetching it
    #[arg(long)]
    file: Option<PathBuf>,

    /// Click the n-th detected purchase control (1-based)
    #[arg(long)]
    click: Option<usize>,

    /// Answer the prompts without asking
    #[arg(long, value_enum)]
    answer: Option<Answer>,

    #[arg(long, env = "DINEED_DATABASE_URL", default_value = "sqlite:database/dineed.db")]
    database_url: String,

    /// Keep decisions for this run only
    #[arg(long, env = "DINEED_IN_MEMORY")]
    in_memory: bool,

    /// JSON file overriding the detection patterns
    #[arg(long, env = "DINEED_SETTINGS")]
    settings: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Answer {
    Proceed,
    Decline,
    AlternativesThenProceed,
    AlternativesThenDecline,
}

impl Answer {
    fn choices(self) -> (UserChoice, AlternativesChoice) {
        match self {
            Self::Proceed => (UserChoice::Proceed, AlternativesChoice::Proceed),
            Self::Decline => (UserChoice::Decline, AlternativesChoice::Decline),
            Self::AlternativesThenProceed => {
                (UserChoice::ViewAlternatives, AlternativesChoice::Proceed)
            }
            Self::AlternativesThenDecline => {
                (UserChoice::ViewAlternatives, AlternativesChoice::Decline)
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    info!("Starting Do I Need That? purchase interceptor");

    let settings = Settings::load(args.settings.as_deref()).await?;
    let (store, stats) = open_stores(&args).await;

    let (tx, mut events) = mpsc::unbounded_channel();
    let page = match &args.file {
        Some(path) => SnapshotPage::from_file(path, &args.url).await?,
        None => SnapshotPage::fetch(&args.url).await?,
    };
    let page = Arc::new(page.with_events(tx.clone()));

    let presenter: Arc<dyn Presenter> = match args.answer {
        Some(answer) => {
            let (choice, after_alternatives) = answer.choices();
            Arc::new(ScriptedPresenter::new(choice, after_alternatives))
        }
        None => Arc::new(TerminalPresenter::new(MarketplaceLinks::new())),
    };

    let interceptor = Interceptor::new(
        page.clone(),
        settings,
        SiteRegistry::new(),
        store,
        stats.clone(),
        presenter,
    );

    tx.send(PageEvent::Loaded)?;
    tx.send(PageEvent::DomReady)?;
    drain(&interceptor, &mut events).await;

    let (key, product) = interceptor.current_product();
    info!("Product {}: {}", key, serde_json::to_string(&product)?);

    let controls = interceptor.watched_controls().await;
    if controls.is_empty() {
        info!("No purchase controls found on {}", args.url);
    }
    for (index, control) in controls.iter().enumerate() {
        info!("[{}] <{}> {}", index + 1, control.tag, control.selector);
    }

    if let Some(n) = args.click {
        let control = n
            .checked_sub(1)
            .and_then(|index| controls.get(index))
            .with_context(|| format!("No purchase control #{} on this page", n))?;

        tx.send(PageEvent::Click(page.user_click(&control.control_id)))?;
        drain(&interceptor, &mut events).await;
    }

    match stats.summary().await {
        Ok(summary) => info!(
            "Purchases reconsidered: {}, money saved: ${:.2}, CO2 saved: {:.1} kg",
            summary.reconsidered_count, summary.money_saved, summary.co2_saved_kg
        ),
        Err(e) => warn!("Could not read statistics: {}", e),
    }

    Ok(())
}

async fn open_stores(args: &Args) -> (Arc<dyn GateStore>, Arc<dyn StatisticsStore>) {
    if !args.in_memory {
        match Database::new(&args.database_url).await {
            Ok(db) => {
                let db = Arc::new(db);
                return (db.clone(), db);
            }
            Err(e) => error!(
                "Database {} unavailable, decisions last for this run only: {}",
                args.database_url, e
            ),
        }
    }

    let memory = Arc::new(MemoryStore::new());
    (memory.clone(), memory)
}

/// Handle queued page events, prompting inline whenever a purchase is paused
async fn drain(interceptor: &Interceptor, events: &mut UnboundedReceiver<PageEvent>) {
    while let Ok(event) = events.try_recv() {
        let Some(key) = interceptor.handle_event(event).await else {
            continue;
        };

        match interceptor.reflect(&key).await {
            Ok(resolution) => info!("Reflection on {} ended: {:?}", key, resolution),
            Err(e) => warn!("Reflection prompt for {} abandoned: {}", key, e),
        }
    }
}
