//! End-to-end dispatch tests
//!
//! Workers and coordinators run as separate tokio tasks sharing one
//! in-memory store, the way separate agent processes share one Redis.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Map};
use tokio::sync::watch;
use tripmesh_api::agents::messages::{CorrelationId, Message, TaskPayload};
use tripmesh_api::agents::{Capability, CapabilityError, Coordinator, TaskState, WorkerAgent};
use tripmesh_api::domain::plan::PlanKey;
use tripmesh_api::domain::repositories::StateRepository;
use tripmesh_api::infrastructure::broker::MessageBroker;
use tripmesh_api::infrastructure::repositories::MemoryStateRepository;
use tripmesh_api::infrastructure::store::MemoryStore;

/// Answers with a fixed line per agent
struct Canned(&'static str);

#[async_trait]
impl Capability for Canned {
    async fn invoke(&self, _request: &str) -> Result<String, CapabilityError> {
        Ok(self.0.to_string())
    }
}

struct Down;

#[async_trait]
impl Capability for Down {
    async fn invoke(&self, _request: &str) -> Result<String, CapabilityError> {
        Err(CapabilityError::Unavailable("model endpoint down".to_string()))
    }
}

fn plan() -> PlanKey {
    PlanKey::new("user-1", "plan-1").unwrap()
}

fn sources(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn spawn_worker(
    name: &str,
    broker: &MessageBroker,
    capability: Arc<dyn Capability>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let worker = WorkerAgent::new(name, broker.clone(), capability)
        .with_claim_timeout(Duration::from_millis(50));
    tokio::spawn(async move { worker.run(shutdown).await })
}

#[tokio::test]
async fn test_fan_out_fan_in_round_trip() {
    let broker = MessageBroker::new(Arc::new(MemoryStore::new()));
    let state = Arc::new(MemoryStateRepository::new());
    let (stop, shutdown) = watch::channel(false);

    let flight = spawn_worker("flight_agent", &broker, Arc::new(Canned("6E 237, 07:10")), shutdown.clone());
    let hotel = spawn_worker(
        "hotel_agent",
        &broker,
        Arc::new(Canned("```json\n{\"hotel\": \"Taj Fort Aguada\"}\n```")),
        shutdown.clone(),
    );

    let coordinator = Coordinator::new(broker.clone(), "main_agent", state.clone(), plan())
        .with_poll_interval(Duration::from_millis(100));
    let correlation_id = CorrelationId::generate();
    for (target, task) in [("flight_agent", "find_flights"), ("hotel_agent", "find_hotels")] {
        coordinator
            .delegate(target, task, Map::new(), Some(correlation_id.clone()))
            .await
            .unwrap();
    }

    let report = coordinator
        .collect(&correlation_id, &sources(&["flight_agent", "hotel_agent"]), Duration::from_secs(5))
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.results["flight_agent"]["response"], json!("6E 237, 07:10"));
    assert_eq!(report.results["hotel_agent"]["response"], json!({"hotel": "Taj Fort Aguada"}));
    assert_eq!(report.results["hotel_agent"]["plan_id"], json!("plan-1"));

    // Each answer was persisted as it arrived
    let stored = state.get(&plan()).await.unwrap().unwrap();
    assert_eq!(stored.specialist_results.len(), 2);

    stop.send(true).unwrap();
    flight.await.unwrap();
    hotel.await.unwrap();
    assert_eq!(broker.depth("processing:flight_agent").await.unwrap(), 0);
    assert_eq!(broker.depth("processing:hotel_agent").await.unwrap(), 0);
}

#[tokio::test]
async fn test_silent_source_is_reported_missing_within_deadline() {
    let broker = MessageBroker::new(Arc::new(MemoryStore::new()));
    let state = Arc::new(MemoryStateRepository::new());
    let (stop, shutdown) = watch::channel(false);
    let weather = spawn_worker("weather_agent", &broker, Arc::new(Canned("Sunny")), shutdown);

    let poll = Duration::from_millis(100);
    let timeout = Duration::from_millis(600);
    let coordinator = Coordinator::new(broker.clone(), "main_agent", state, plan()).with_poll_interval(poll);
    let correlation_id = CorrelationId::generate();
    coordinator
        .delegate("weather_agent", "forecast", Map::new(), Some(correlation_id.clone()))
        .await
        .unwrap();
    // nobody serves cab_agent
    coordinator
        .delegate("cab_agent", "book_cab", Map::new(), Some(correlation_id.clone()))
        .await
        .unwrap();

    let started = Instant::now();
    let report = coordinator
        .collect(&correlation_id, &sources(&["weather_agent", "cab_agent"]), timeout)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(report.results.contains_key("weather_agent"));
    assert_eq!(report.missing, sources(&["cab_agent"]));
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + poll + Duration::from_millis(250));

    stop.send(true).unwrap();
    weather.await.unwrap();
}

#[tokio::test]
async fn test_concurrent_fan_outs_do_not_cross_talk() {
    let broker = MessageBroker::new(Arc::new(MemoryStore::new()));
    let (stop, shutdown) = watch::channel(false);
    let flight = spawn_worker("flight_agent", &broker, Arc::new(Canned("ok")), shutdown);

    let first = Coordinator::new(
        broker.clone(),
        "main_agent",
        Arc::new(MemoryStateRepository::new()),
        PlanKey::new("user-1", "plan-1").unwrap(),
    )
    .with_poll_interval(Duration::from_millis(100));
    let second = Coordinator::new(
        broker.clone(),
        "main_agent",
        Arc::new(MemoryStateRepository::new()),
        PlanKey::new("user-2", "plan-2").unwrap(),
    )
    .with_poll_interval(Duration::from_millis(100));

    let a = first.delegate("flight_agent", "find_flights", Map::new(), None).await.unwrap();
    let b = second.delegate("flight_agent", "find_flights", Map::new(), None).await.unwrap();

    let expected = sources(&["flight_agent"]);
    let first_collect = first.spawn_collect(a.correlation_id.clone(), expected.clone(), Duration::from_secs(5));
    let second_collect = second.spawn_collect(b.correlation_id.clone(), expected, Duration::from_secs(5));

    let first_report = first_collect.await.unwrap().unwrap();
    let second_report = second_collect.await.unwrap().unwrap();

    assert_eq!(first_report.results["flight_agent"]["user_id"], json!("user-1"));
    assert_eq!(second_report.results["flight_agent"]["user_id"], json!("user-2"));

    stop.send(true).unwrap();
    flight.await.unwrap();
}

#[tokio::test]
async fn test_failing_task_ends_in_dead_letter_queue() {
    let broker = MessageBroker::new(Arc::new(MemoryStore::new()));
    let worker = WorkerAgent::new("budget_agent", broker.clone(), Arc::new(Down))
        .with_claim_timeout(Duration::from_millis(50));
    let coordinator = Coordinator::new(
        broker.clone(),
        "main_agent",
        Arc::new(MemoryStateRepository::new()),
        plan(),
    )
    .with_poll_interval(Duration::from_millis(50));
    let receipt = coordinator
        .delegate("budget_agent", "estimate", Map::new(), None)
        .await
        .unwrap();

    let mut outcomes = Vec::new();
    while let Some(state) = worker.process_next().await.unwrap() {
        outcomes.push(state);
        // retried tasks reappear on the main queue until the budget runs out
        if state == TaskState::Retrying {
            assert_eq!(broker.depth("tasks:budget_agent").await.unwrap(), 1);
        }
    }

    assert_eq!(outcomes, vec![TaskState::Retrying, TaskState::Retrying, TaskState::Dead]);
    assert_eq!(broker.depth("tasks:budget_agent").await.unwrap(), 0);
    assert_eq!(broker.depth("dlq:budget_agent").await.unwrap(), 1);

    // The coordinator still hears back, with a failure it can act on
    let report = coordinator
        .collect(&receipt.correlation_id, &sources(&["budget_agent"]), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(report.results["budget_agent"]["status"], json!("FAILURE"));
}

#[tokio::test]
async fn test_competing_workers_claim_each_task_once() {
    let broker = MessageBroker::new(Arc::new(MemoryStore::new()));
    let mut ids = HashSet::new();
    for n in 0..40 {
        let task = Message::task(
            CorrelationId::generate(),
            "main_agent",
            "food_agent",
            TaskPayload::new(format!("task-{n}"), Map::new()),
        );
        ids.insert(task.header.message_id);
        broker.enqueue("tasks:food_agent", &task).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let broker = broker.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(task) = broker
                .claim("tasks:food_agent", "processing:food_agent", Duration::from_millis(50))
                .await
                .unwrap()
            {
                claimed.push(task.message_id());
                broker.ack("processing:food_agent", &task).await.unwrap();
            }
            claimed
        }));
    }

    let mut seen = Vec::new();
    for handle in handles {
        seen.extend(handle.await.unwrap());
    }

    assert_eq!(seen.len(), 40);
    assert_eq!(seen.iter().copied().collect::<HashSet<_>>(), ids);
    assert_eq!(broker.depth("processing:food_agent").await.unwrap(), 0);
}
