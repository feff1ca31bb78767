use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audit::AnalysisEvent;
use crate::catalog::Entity;
use crate::repository::{HybridRepository, HydrationState, RepositoryError};
use crate::semantic::{derive, MatchResult, MissingEmbeddingPolicy};
use crate::store::EntityStore;

use super::support::*;

fn ranking(results: &[MatchResult]) -> Vec<(usize, u64)> {
    results.iter().map(|r| (r.rank, r.entity.id)).collect()
}

fn event(top_match_id: u64) -> AnalysisEvent {
    AnalysisEvent {
        client_address: Some("203.0.113.7".into()),
        user_agent: Some("pokedex-app/2.1".into()),
        latency_ms: 18,
        top_match_id,
        top_match_score: 0.97,
    }
}

// --- store failures ---

// Scenario B
#[tokio::test]
async fn failing_store_matches_store_answer() {
    let store = sqlite_with(&starters()).await;
    let (primary, _dir_a) = seeded_repository(Some(store));
    let failing = Arc::new(FailingStore::default());
    let (fallback, _dir_b) = seeded_repository(Some(failing.clone()));

    for seed_text in ["Ivysaur", "Charmeleon", "a blue turtle"] {
        let query = derive(seed_text);
        let expected = primary.find_similar(&query, 4).await.unwrap();
        let actual = fallback.find_similar(&query, 4).await.unwrap();

        assert_eq!(ranking(&actual), ranking(&expected), "query {seed_text}");
        for (a, e) in actual.iter().zip(&expected) {
            assert!((a.similarity - e.similarity).abs() < 1e-5);
        }
    }

    assert_eq!(primary.hydration_state(), HydrationState::Uninitialized);
    assert_eq!(fallback.hydration_state(), HydrationState::Hydrated);
    assert!(failing.calls.load(Ordering::SeqCst) >= 4);
}

#[tokio::test]
async fn empty_store_falls_back_to_seed() {
    let store = sqlite_with(&[]).await;
    let (repo, _dir) = seeded_repository(Some(store));

    let results = repo.find_similar(&derive("Venusaur"), 1).await.unwrap();
    assert_eq!(ranking(&results), vec![(1, 3)]);
    assert_eq!(repo.get_all().await.unwrap().len(), STARTERS.len());
}

#[tokio::test]
async fn slow_store_times_out_and_falls_back() {
    let store = Arc::new(SlowStore {
        delay: Duration::from_secs(5),
    });
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(write_seed(dir.path(), &starters_seed_json()));
    config.store_timeout = Duration::from_millis(50);
    let repo = HybridRepository::new(config, Some(store));

    let started = Instant::now();
    let results = repo.find_similar(&derive("Bulbasaur"), 2).await.unwrap();

    assert_eq!(results[0].entity.id, 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn slow_store_upsert_reports_timeout() {
    let store = Arc::new(SlowStore {
        delay: Duration::from_secs(5),
    });
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path().join("absent.json"));
    config.store_timeout = Duration::from_millis(50);
    let repo = HybridRepository::new(config, Some(store));

    let err = repo.upsert(pokemon(151, "Mew", "psychic")).await.unwrap_err();
    assert!(matches!(err, RepositoryError::StoreTimeout(limit) if limit == Duration::from_millis(50)));
}

#[tokio::test]
async fn store_path_skips_entities_without_embedding() {
    let store = sqlite_with(&[
        pokemon(1, "Bulbasaur", "grass"),
        Entity::new(132, "Ditto", vec!["normal".into()]),
    ])
    .await;
    let (repo, _dir) = seeded_repository(Some(store));

    let results = repo.find_similar(&derive("Ditto"), 10).await.unwrap();
    assert_eq!(ranking(&results), vec![(1, 1)]);
}

#[tokio::test]
async fn store_path_clamps_opposite_embedding_to_zero() {
    let opposite: Vec<f32> = derive("Bulbasaur").iter().map(|x| -x).collect();
    let mewtwo = Entity::new(150, "Mewtwo", vec!["psychic".into()]).with_embedding(opposite, "test-model");
    let store = sqlite_with(&[mewtwo]).await;
    let (repo, _dir) = seeded_repository(Some(store));

    let results = repo.find_similar(&derive("Bulbasaur"), 1).await.unwrap();
    assert_eq!(ranking(&results), vec![(1, 150)]);
    assert_eq!(results[0].similarity, 0.0);
    assert_eq!(repo.hydration_state(), HydrationState::Uninitialized);
}

// --- missing embedding policy ---

async fn repository_with_ditto(policy: MissingEmbeddingPolicy) -> (HybridRepository, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path().join("absent.json"));
    config.missing_embedding_policy = policy;
    let repo = HybridRepository::new(config, None);

    repo.upsert(pokemon(1, "Bulbasaur", "grass")).await.unwrap();
    repo.upsert(pokemon(4, "Charmander", "fire")).await.unwrap();
    repo.upsert(Entity::new(132, "Ditto", vec!["normal".into()])).await.unwrap();
    (repo, dir)
}

#[tokio::test]
async fn exclude_policy_drops_unembedded() {
    let (repo, _dir) = repository_with_ditto(MissingEmbeddingPolicy::Exclude).await;
    let results = repo.find_similar(&derive("Charmander"), 5).await.unwrap();
    assert_eq!(ranking(&results), vec![(1, 4), (2, 1)]);
}

#[tokio::test]
async fn zero_score_policy_ranks_unembedded_last() {
    let (repo, _dir) = repository_with_ditto(MissingEmbeddingPolicy::ZeroScore).await;
    let results = repo.find_similar(&derive("Charmander"), 5).await.unwrap();

    assert_eq!(ranking(&results), vec![(1, 4), (2, 1), (3, 132)]);
    assert_eq!(results[2].similarity, 0.0);
}

#[tokio::test]
async fn self_match_policy_scores_unembedded_perfectly() {
    let (repo, _dir) = repository_with_ditto(MissingEmbeddingPolicy::SelfMatch).await;
    let results = repo.find_similar(&derive("Bulbasaur"), 5).await.unwrap();

    // Bulbasaur and Ditto tie at 1.0, catalog order breaks the tie
    assert_eq!(ranking(&results), vec![(1, 1), (2, 132), (3, 4)]);
}

// --- audit ---

#[tokio::test]
async fn audit_failure_is_swallowed() {
    let failing = Arc::new(FailingStore::default());
    let (repo, _dir) = seeded_repository(Some(failing.clone()));

    let results = repo.find_similar(&derive("Squirtle"), 3).await.unwrap();
    let handle = repo.record_event(event(results[0].entity.id));

    assert!(handle.await.is_ok());
    assert_eq!(results[0].entity.id, 7);
}

#[tokio::test]
async fn record_event_appends_audit_row() {
    let store = sqlite_with(&starters()).await;
    let (repo, _dir) = seeded_repository(Some(store.clone()));

    let results = repo.find_similar(&derive("Charmander"), 1).await.unwrap();
    let event = AnalysisEvent::from_matches(Some("203.0.113.7".into()), None, 5, &results).unwrap();
    repo.record_event(event).await.unwrap();

    let records = store.audit_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].top_match_id, 4);
    assert_eq!(records[0].client_address.as_deref(), Some("203.0.113.7"));
    assert!(records[0].user_agent.is_none());
    assert_eq!(store.load_all().await.unwrap().len(), STARTERS.len());
}

#[tokio::test]
async fn record_event_without_store_is_noop() {
    let (repo, _dir) = seeded_repository(None);
    repo.record_event(event(1)).await.unwrap();
    assert_eq!(repo.hydration_state(), HydrationState::Uninitialized);
}
