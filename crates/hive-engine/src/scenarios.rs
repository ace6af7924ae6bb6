//! End-to-end scenarios over the full wire stack: protocol client and
//! server on localhost TCP, real handlers, real registry.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};

use hive_agents::{CommandQueue, Registry};
use hive_balance::{Balancer, BalancerConfig, ShardConfig};
use hive_net::{
    ClientConfig, ProtocolClient, ProtocolServer, ServerConfig, Status, WireMessage,
};
use hive_types::{AgentId, EngineEvent, LifecycleState};

use crate::bridge;
use crate::handlers::{self, EngineContext};

/// A running engine stack for one test.
struct Stack {
    server: Arc<ProtocolServer>,
    client: ProtocolClient,
    registry: Arc<Registry>,
    bridge_shutdown: watch::Sender<bool>,
}

impl Stack {
    /// Bring up a single-shard engine on an ephemeral port.
    async fn start(shards: Vec<ShardConfig>) -> Self {
        let balancer = Arc::new(Balancer::new(&BalancerConfig {
            shards,
            ..BalancerConfig::default()
        }));
        let registry = Arc::new(Registry::new(balancer, 10_000));
        let queue = Arc::new(CommandQueue::default());
        let (events, _) = broadcast::channel::<EngineEvent>(1024);

        let context = Arc::new(EngineContext {
            registry: Arc::clone(&registry),
            queue,
            events: events.clone(),
            dispatcher: None,
        });

        let server = Arc::new(ProtocolServer::new(ServerConfig {
            listen_port: 0,
            ..ServerConfig::default()
        }));
        handlers::register_all(&server, &context);
        let addr = server.start().await.expect("bind");

        let (bridge_shutdown, bridge_rx) = watch::channel(false);
        tokio::spawn(bridge::run(
            Arc::clone(&server),
            events.subscribe(),
            bridge_rx,
        ));

        let client = ProtocolClient::new(ClientConfig {
            reconnect_interval_ms: 100,
            scan_interval_ms: 100,
            ..ClientConfig::new(&addr.to_string())
        });
        client.connect();

        Self {
            server,
            client,
            registry,
            bridge_shutdown,
        }
    }

    /// Send a request and wait for its response.
    async fn call(&self, cmd: &str, data: Value) -> WireMessage {
        let receiver = self.client.send_request(cmd, Some(data)).expect("send");
        tokio::time::timeout(Duration::from_secs(5), receiver)
            .await
            .expect("response in time")
            .expect("responder kept")
    }

    async fn stop(self) {
        let _ = self.bridge_shutdown.send(true);
        self.client.disconnect().await;
        self.server.stop(Duration::from_secs(2)).await;
    }
}

fn one_shard() -> Vec<ShardConfig> {
    vec![ShardConfig {
        id: 1,
        capacity: 100,
        weight: 1,
        enabled: true,
    }]
}

/// S1 -- spawn and list.
#[tokio::test]
async fn spawn_and_list() {
    let stack = Stack::start(one_shard()).await;

    let response = stack
        .call(
            "spawn_ai",
            json!({ "academy": 1, "department": 1, "count": 3, "team_id": 0 }),
        )
        .await;
    assert_eq!(response.status, Some(Status::Ok));
    let data = response.data.expect("data");
    assert_eq!(data["count"], json!(3));

    let ai_list = data["ai_list"].as_array().expect("ai_list");
    assert_eq!(ai_list.len(), 3);
    for entry in ai_list {
        assert_eq!(entry["shard_id"], json!(1));
        assert_eq!(entry["academy"], json!(1));
        assert_eq!(entry["department"], json!(1));
        assert!(entry.get("id").is_some());
        let name = entry["name"].as_str().expect("name");
        assert!(name.chars().count() <= 6);
    }

    let status = stack.call("get_status", json!({})).await;
    let entries = status.data.expect("data")["ai_status"]
        .as_array()
        .expect("ai_status")
        .len();
    assert_eq!(entries, 3);

    stack.stop().await;
}

/// S2 -- attack flow with a broadcast battle event.
#[tokio::test]
async fn attack_flow() {
    let stack = Stack::start(one_shard()).await;
    let mut notifications = stack.client.notifications();

    let spawn = stack
        .call(
            "spawn_ai",
            json!({ "academy": 1, "department": 1, "count": 2, "team_id": 0 }),
        )
        .await;
    let data = spawn.data.expect("data");
    let ids: Vec<AgentId> = data["ai_list"]
        .as_array()
        .expect("list")
        .iter()
        .map(|entry| AgentId::parse(entry["id"].as_str().expect("id")).expect("uuid"))
        .collect();
    let (a, b) = (ids[0], ids[1]);

    // Both combatants at exactly 100 hp, different academies is not
    // required: attacks are explicit commands.
    for id in [a, b] {
        stack
            .registry
            .update(id, |agent| agent.vitals.hp = 100)
            .expect("set hp");
    }

    let response = stack
        .call(
            "ai_command",
            json!({ "ai_id": a, "action": "attack", "params": { "target_id": b } }),
        )
        .await;
    assert_eq!(response.status, Some(Status::Ok));
    assert_eq!(response.data.expect("data")["success"], json!(true));

    // Expect the battle_event broadcast with 50 <= d <= 150.
    let battle = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let message = notifications.recv().await.expect("notification");
            if message.cmd.as_deref() == Some("battle_event") {
                break message;
            }
        }
    })
    .await
    .expect("battle event in time");

    let data = battle.data.expect("data");
    assert_eq!(data["ai_id"], json!(a));
    assert_eq!(data["event_type"], json!("attack"));
    let damage = data["data"]["damage"].as_u64().expect("damage");
    assert!((50..=150).contains(&damage), "damage {damage} out of range");
    let target_hp = data["data"]["target_hp"].as_u64().expect("target_hp");
    assert_eq!(target_hp, 100_u64.saturating_sub(damage));
    assert_eq!(data["data"]["target"], json!(b));

    // Registry agrees with the broadcast.
    let victim = stack.registry.get(b).expect("victim");
    assert_eq!(u64::from(victim.hp), target_hp);
    if victim.hp == 0 {
        assert_eq!(victim.state, LifecycleState::Dead);
    }

    stack.stop().await;
}

/// S3 -- skill casts are mana-gated.
#[tokio::test]
async fn skill_mana_gating() {
    let stack = Stack::start(one_shard()).await;

    let spawn = stack
        .call(
            "spawn_ai",
            json!({ "academy": 2, "department": 3, "count": 1, "team_id": 0 }),
        )
        .await;
    let id = AgentId::parse(
        spawn.data.expect("data")["ai_list"][0]["id"]
            .as_str()
            .expect("id"),
    )
    .expect("uuid");

    stack
        .registry
        .update(id, |agent| agent.vitals.mp = 30)
        .expect("set mp");

    let response = stack
        .call(
            "ai_command",
            json!({ "ai_id": id, "action": "use_skill", "params": { "skill_id": "x" } }),
        )
        .await;
    assert_eq!(response.status, Some(Status::Error));
    assert_eq!(response.error.as_deref(), Some("invariant_violation"));
    assert_eq!(response.data.expect("data")["success"], json!(false));

    // Mana unchanged.
    assert_eq!(stack.registry.get(id).expect("agent").mp, 30);

    stack.stop().await;
}

/// Team assignment and team deletion round trip.
#[tokio::test]
async fn team_lifecycle() {
    let stack = Stack::start(one_shard()).await;

    let spawn = stack
        .call(
            "spawn_ai",
            json!({ "academy": 3, "department": 4, "count": 2, "team_id": 0 }),
        )
        .await;
    let ids: Vec<String> = spawn.data.expect("data")["ai_list"]
        .as_array()
        .expect("list")
        .iter()
        .map(|entry| entry["id"].as_str().expect("id").to_owned())
        .collect();

    let assigned = stack
        .call("assign_team", json!({ "ai_ids": ids, "team_id": 9 }))
        .await;
    assert_eq!(assigned.status, Some(Status::Ok));
    assert_eq!(assigned.data.expect("data")["team_id"], json!(9));

    let deleted = stack.call("delete_ai", json!({ "team_id": 9 })).await;
    assert_eq!(deleted.status, Some(Status::Ok));
    assert_eq!(deleted.data.expect("data")["deleted"], json!(2));
    assert!(stack.registry.is_empty());

    stack.stop().await;
}

/// Batch operations run in order and report per-entry results.
#[tokio::test]
async fn batch_operation_mixed_results() {
    let stack = Stack::start(one_shard()).await;

    let response = stack
        .call(
            "batch_operation",
            json!({
                "operations": [
                    { "cmd": "spawn_ai", "data": { "academy": 1, "department": 2, "count": 1 } },
                    { "cmd": "no_such", "data": {} },
                    { "cmd": "get_status", "data": {} },
                ]
            }),
        )
        .await;
    assert_eq!(response.status, Some(Status::Ok));
    let results = response.data.expect("data")["results"]
        .as_array()
        .expect("results")
        .clone();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["status"], json!("ok"));
    assert_eq!(results[1]["status"], json!("error"));
    assert_eq!(results[1]["error"], json!("unknown_command"));
    assert_eq!(results[2]["status"], json!("ok"));

    stack.stop().await;
}

/// Unknown agents are reported as not_found.
#[tokio::test]
async fn unknown_agent_is_not_found() {
    let stack = Stack::start(one_shard()).await;

    let ghost = AgentId::new();
    let response = stack
        .call(
            "ai_command",
            json!({ "ai_id": ghost, "action": "attack", "params": { "target_id": ghost } }),
        )
        .await;
    assert_eq!(response.status, Some(Status::Error));
    assert_eq!(response.error.as_deref(), Some("not_found"));

    stack.stop().await;
}

/// Spawning past shard capacity reports capacity_exceeded and rolls
/// back the partial batch.
#[tokio::test]
async fn spawn_past_capacity_rolls_back() {
    let stack = Stack::start(vec![ShardConfig {
        id: 1,
        capacity: 2,
        weight: 1,
        enabled: true,
    }])
    .await;

    let response = stack
        .call(
            "spawn_ai",
            json!({ "academy": 1, "department": 1, "count": 5, "team_id": 0 }),
        )
        .await;
    assert_eq!(response.status, Some(Status::Error));
    assert_eq!(response.error.as_deref(), Some("capacity_exceeded"));
    assert!(stack.registry.is_empty());
    assert_eq!(stack.registry.balancer().total_count(), 0);

    stack.stop().await;
}

/// Dead agents only come back through the respawn command.
#[tokio::test]
async fn death_and_respawn() {
    let stack = Stack::start(one_shard()).await;
    let mut notifications = stack.client.notifications();

    let spawn = stack
        .call(
            "spawn_ai",
            json!({ "academy": 1, "department": 1, "count": 2, "team_id": 0 }),
        )
        .await;
    let data = spawn.data.expect("data");
    let ids: Vec<AgentId> = data["ai_list"]
        .as_array()
        .expect("list")
        .iter()
        .map(|entry| AgentId::parse(entry["id"].as_str().expect("id")).expect("uuid"))
        .collect();
    let (killer, victim) = (ids[0], ids[1]);

    // One hit from anything kills at 1 hp... but hp 0 requires Dead, so
    // drop the victim to the minimum the invariants allow.
    stack
        .registry
        .update(victim, |agent| agent.vitals.hp = 1)
        .expect("set hp");

    let response = stack
        .call(
            "ai_command",
            json!({ "ai_id": killer, "action": "attack", "params": { "target_id": victim } }),
        )
        .await;
    assert_eq!(response.status, Some(Status::Ok));
    assert_eq!(
        stack.registry.get(victim).expect("victim").state,
        LifecycleState::Dead
    );

    // An ai_death system event goes out.
    let death = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let message = notifications.recv().await.expect("notification");
            if message.cmd.as_deref() == Some("system_event")
                && message
                    .data
                    .as_ref()
                    .is_some_and(|data| data["event_type"] == json!("ai_death"))
            {
                break message;
            }
        }
    })
    .await;
    assert!(death.is_ok(), "no ai_death event");

    // Attacking a corpse is an invariant violation.
    let again = stack
        .call(
            "ai_command",
            json!({ "ai_id": killer, "action": "attack", "params": { "target_id": victim } }),
        )
        .await;
    assert_eq!(again.error.as_deref(), Some("invariant_violation"));

    // Respawn restores the victim.
    let respawn = stack
        .call(
            "ai_command",
            json!({ "ai_id": victim, "action": "respawn" }),
        )
        .await;
    assert_eq!(respawn.status, Some(Status::Ok));
    let restored = stack.registry.get(victim).expect("victim");
    assert_eq!(restored.state, LifecycleState::Returning);
    assert_eq!(restored.hp, restored.max_hp);

    stack.stop().await;
}
