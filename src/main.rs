use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

use dexmatch::audit::AnalysisEvent;
use dexmatch::catalog::{load_seed, Entity};
use dexmatch::config::Config;
use dexmatch::repository::HybridRepository;
use dexmatch::semantic::{derive, EmbeddingSynthesizer, SYNTH_MODEL_VERSION};
use dexmatch::store::{EntityStore, SqliteStore};

mod cli;

fn init_logging() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("info")
    };

    // stdout carries the JSON output
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_repository(config: &Config) -> anyhow::Result<HybridRepository> {
    let store: Option<Arc<dyn EntityStore>> = match config.database_path() {
        Some(path) => {
            let store = SqliteStore::open(&path)
                .with_context(|| format!("failed to open database {}", path.display()))?;
            log::info!("using sqlite store at {}", path.display());
            Some(Arc::new(store))
        }
        None => {
            log::info!("no database configured, running cache-only");
            None
        }
    };

    Ok(HybridRepository::new(config.repository_config(), store))
}

fn without_embedding(entity: &Entity) -> Entity {
    let mut entity = entity.clone();
    entity.embedding = None;
    entity
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = cli::Args::parse();

    let config = Config::load()?;
    let repository = open_repository(&config)?;

    let span = tracing::info_span!("dexmatch", command = args.command.name());
    run(args.command, repository).instrument(span).await
}

async fn run(command: cli::Command, repository: HybridRepository) -> anyhow::Result<()> {
    match command {
        cli::Command::List {
            count,
            with_embeddings,
        } => {
            let entities = repository.get_all().await?;

            if count {
                println!("{} entities", entities.len());
                return Ok(());
            }

            let entities: Vec<Entity> = entities
                .iter()
                .map(|entity| {
                    if with_embeddings {
                        Entity::clone(entity)
                    } else {
                        without_embedding(entity)
                    }
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }

        cli::Command::Get { id } => {
            let Some(entity) = repository.get_by_id(id).await? else {
                bail!("no entity with id {id}");
            };
            println!("{}", serde_json::to_string_pretty(&without_embedding(&entity))?);
        }

        cli::Command::Match { seed_text, top } => {
            let started = Instant::now();
            let query = derive(&seed_text);
            let matches = repository.find_similar(&query, top).await?;
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let audit = AnalysisEvent::from_matches(
                None,
                Some(format!("dexmatch/{}", env!("CARGO_PKG_VERSION"))),
                latency_ms,
                &matches,
            )
            .map(|event| repository.record_event(event));

            let output: Vec<_> = matches
                .iter()
                .map(|m| {
                    serde_json::json!({
                        "rank": m.rank,
                        "similarity": m.similarity,
                        "id": m.entity.id,
                        "name": m.entity.name,
                        "types": m.entity.types,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);

            if let Some(handle) = audit {
                // let the audit write land before the runtime shuts down
                let _ = handle.await;
            }
        }

        cli::Command::Ingest { file } => {
            let Some(entities) = load_seed(&file, &EmbeddingSynthesizer::new())? else {
                bail!("{} does not exist", file.display());
            };
            let written = repository.bulk_upsert(entities).await?;
            println!("{written} entities ingested");
        }

        cli::Command::Embed { limit } => {
            let missing: Vec<_> = repository
                .get_all()
                .await?
                .into_iter()
                .filter(|entity| !entity.has_embedding())
                .take(limit.unwrap_or(usize::MAX))
                .collect();

            let mut updated = 0;
            for entity in &missing {
                if repository
                    .save_embedding(entity.id, derive(&entity.name), SYNTH_MODEL_VERSION)
                    .await?
                {
                    updated += 1;
                }
            }
            println!("{updated} embeddings saved");
        }
    }

    Ok(())
}
