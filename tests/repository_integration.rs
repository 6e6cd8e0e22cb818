//! Integration tests for repository layer
//!
//! Plan-state repositories are exercised through the `StateRepository`
//! trait. The PostgreSQL cases run only when DATABASE_URL is set and
//! return early otherwise.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;
use tripmesh_api::domain::plan::{FieldPath, PlanKey, PlanState};
use tripmesh_api::domain::repositories::{SessionRepository, StateError, StateRepository};
use tripmesh_api::domain::session::{SessionEvent, SessionKey, SessionValue};
use tripmesh_api::infrastructure::repositories::{
    MemoryStateRepository, PostgresStateRepository, StoreSessionRepository,
};
use tripmesh_api::infrastructure::store::MemoryStore;
use uuid::Uuid;

/// Set up test database connection pool, if one is configured
async fn setup_test_db() -> Option<PgPool> {
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to test database");
    Some(pool)
}

async fn postgres_repo() -> Option<PostgresStateRepository> {
    let pool = setup_test_db().await?;
    let repo = PostgresStateRepository::new(pool);
    repo.ensure_schema().await.expect("create plan_states table");
    Some(repo)
}

/// Unique key so concurrent runs do not collide
fn unique_key() -> PlanKey {
    PlanKey::new(format!("user-{}", Uuid::new_v4()), "plan-1").unwrap()
}

async fn check_merge_update(repo: &dyn StateRepository) {
    let key = unique_key();
    let mut plan = PlanState::default();
    plan.budget.total_budget = Some(500.0);
    repo.set(&key, &plan).await.unwrap();

    repo.update_field(&key, &"budget".parse().unwrap(), json!({"currency": "USD"}))
        .await
        .unwrap();

    let stored = repo.get(&key).await.unwrap().unwrap();
    assert_eq!(stored.budget.currency, "USD");
    assert_eq!(stored.budget.total_budget, Some(500.0));

    assert!(repo.delete(&key).await.unwrap());
}

async fn check_rejected_update(repo: &dyn StateRepository) {
    let key = unique_key();
    repo.set(&key, &PlanState::default()).await.unwrap();

    let result = repo
        .update_field(&key, &"preferences.colour".parse().unwrap(), json!("blue"))
        .await;
    assert!(matches!(result, Err(StateError::Plan(_))));
    assert_eq!(repo.get(&key).await.unwrap(), Some(PlanState::default()));

    repo.delete(&key).await.unwrap();
}

async fn check_specialist_results(repo: &dyn StateRepository) {
    let key = unique_key();
    assert!(!repo.exists(&key).await.unwrap());

    let path = FieldPath::field("specialist_results", "weather_agent").unwrap();
    repo.update_field(&key, &path, json!({"response": "Sunny"}))
        .await
        .unwrap();

    assert!(repo.exists(&key).await.unwrap());
    let stored = repo.get(&key).await.unwrap().unwrap();
    assert_eq!(stored.specialist_results["weather_agent"], json!({"response": "Sunny"}));

    repo.delete(&key).await.unwrap();
    assert!(!repo.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_memory_repository_merge_update() {
    check_merge_update(&MemoryStateRepository::new()).await;
}

#[tokio::test]
async fn test_memory_repository_rejected_update() {
    check_rejected_update(&MemoryStateRepository::new()).await;
}

#[tokio::test]
async fn test_memory_repository_specialist_results() {
    check_specialist_results(&MemoryStateRepository::new()).await;
}

#[tokio::test]
async fn test_postgres_repository_merge_update() {
    let Some(repo) = postgres_repo().await else {
        return;
    };
    check_merge_update(&repo).await;
}

#[tokio::test]
async fn test_postgres_repository_rejected_update() {
    let Some(repo) = postgres_repo().await else {
        return;
    };
    check_rejected_update(&repo).await;
}

#[tokio::test]
async fn test_postgres_repository_specialist_results() {
    let Some(repo) = postgres_repo().await else {
        return;
    };
    check_specialist_results(&repo).await;
}

async fn check_concurrent_field_updates(repo: Arc<dyn StateRepository>, seed_row: bool) {
    let key = unique_key();
    if seed_row {
        repo.set(&key, &PlanState::default()).await.unwrap();
    }

    let mut handles = Vec::new();
    for source in ["flight_agent", "hotel_agent", "weather_agent", "food_agent"] {
        let repo = repo.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            let path = FieldPath::field("specialist_results", source).unwrap();
            repo.update_field(&key, &path, json!(source)).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Updates are serialized per document; none is lost, even on a new plan
    let stored = repo.get(&key).await.unwrap().unwrap();
    assert_eq!(stored.specialist_results.len(), 4);

    repo.delete(&key).await.unwrap();
}

async fn check_rejected_edit_creates_nothing(repo: &dyn StateRepository) {
    let key = unique_key();

    let result = repo
        .update_field(&key, &"budget.total_budget".parse().unwrap(), json!("lots"))
        .await;

    assert!(matches!(result, Err(StateError::Plan(_))));
    assert!(!repo.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_memory_repository_concurrent_field_updates() {
    let repo: Arc<dyn StateRepository> = Arc::new(MemoryStateRepository::new());
    check_concurrent_field_updates(repo.clone(), true).await;
    check_concurrent_field_updates(repo.clone(), false).await;
    check_rejected_edit_creates_nothing(repo.as_ref()).await;
}

#[tokio::test]
async fn test_postgres_repository_concurrent_field_updates() {
    let Some(repo) = postgres_repo().await else {
        return;
    };
    check_concurrent_field_updates(Arc::new(repo), true).await;
}

#[tokio::test]
async fn test_postgres_repository_concurrent_updates_on_new_plan() {
    let Some(repo) = postgres_repo().await else {
        return;
    };
    let repo: Arc<dyn StateRepository> = Arc::new(repo);
    check_concurrent_field_updates(repo.clone(), false).await;
    check_rejected_edit_creates_nothing(repo.as_ref()).await;
}

#[tokio::test]
async fn test_session_round_trip_preserves_bytes() {
    let repo = StoreSessionRepository::new(Arc::new(MemoryStore::new()));
    let key = SessionKey::new("flight_agent_app", "user-1", "corr-1").unwrap();
    let artifact: Vec<u8> = (0..=255).rev().collect();

    let mut state = BTreeMap::new();
    state.insert("boarding_pass".to_string(), SessionValue::Bytes(artifact.clone()));
    let mut session = repo.create(key.clone(), state).await.unwrap();
    repo.append_event(&mut session, SessionEvent::new("user", artifact.clone()))
        .await
        .unwrap();

    let loaded = repo.get(&key).await.unwrap().unwrap();
    assert_eq!(loaded.state["boarding_pass"].as_bytes(), Some(&artifact[..]));
    assert_eq!(loaded.events[0].content.as_bytes(), Some(&artifact[..]));
}
