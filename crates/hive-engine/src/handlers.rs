//! Management command handlers: the game semantics behind each wire
//! command.
//!
//! Every handler takes the request's `data` object and returns either a
//! response `data` object or an [`ErrorReply`] whose kind lands in the
//! response's `error` field. Combat resolution (damage rolls, xp and
//! level-ups, deaths) lives here; the scheduler only ever sees the
//! resulting registry state and the event stream.

use std::sync::Arc;

use rand::Rng;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use hive_agents::{CommandQueue, Registry, RegistryError, SpawnProfile, skills};
use hive_llm::{LlmDispatcher, LlmEvent, LlmRequest};
use hive_net::{ErrorKind, ErrorReply, ProtocolServer, handler};
use hive_types::{
    Academy, AgentId, AgentSnapshot, Command, CommandKind, CommandPriority, Department,
    EngineEvent, LifecycleState, Position, StrategyKind,
};

/// Maximum agents per spawn request.
const MAX_SPAWN_COUNT: u64 = 200;

/// Damage roll bounds for a basic attack.
const ATTACK_DAMAGE_MIN: u32 = 50;
const ATTACK_DAMAGE_MAX: u32 = 150;

/// Experience granted per victim level on a kill.
const KILL_XP_PER_LEVEL: u64 = 100;

/// Experience needed per level.
const XP_PER_LEVEL: u64 = 1_000;

/// Everything the handlers need.
pub struct EngineContext {
    /// The agent registry.
    pub registry: Arc<Registry>,
    /// The management command queue.
    pub queue: Arc<CommandQueue>,
    /// The engine event stream, shared with the scheduler.
    pub events: broadcast::Sender<EngineEvent>,
    /// The LLM dispatcher, when configured.
    pub dispatcher: Option<Arc<LlmDispatcher>>,
}

/// Register every recognized command on the protocol server.
pub fn register_all(server: &ProtocolServer, context: &Arc<EngineContext>) {
    for cmd in [
        "spawn_ai",
        "ai_command",
        "assign_team",
        "get_status",
        "delete_ai",
        "batch_operation",
        "system_control",
    ] {
        let context = Arc::clone(context);
        let name = cmd.to_owned();
        server.register(
            cmd,
            handler(move |data| {
                let context = Arc::clone(&context);
                let name = name.clone();
                async move { dispatch_cmd(&context, &name, data) }
            }),
        );
    }
}

/// Route one command by name.
pub fn dispatch_cmd(
    context: &Arc<EngineContext>,
    cmd: &str,
    data: Value,
) -> Result<Value, ErrorReply> {
    match cmd {
        "batch_operation" => handle_batch_operation(context, &data),
        _ => dispatch_simple(context, cmd, &data),
    }
}

/// Route every command except `batch_operation`, which wraps this.
fn dispatch_simple(
    context: &Arc<EngineContext>,
    cmd: &str,
    data: &Value,
) -> Result<Value, ErrorReply> {
    match cmd {
        "spawn_ai" => handle_spawn_ai(context, data),
        "ai_command" => handle_ai_command(context, data),
        "assign_team" => handle_assign_team(context, data),
        "get_status" => handle_get_status(context, data),
        "delete_ai" => handle_delete_ai(context, data),
        "system_control" => handle_system_control(context, data),
        _ => Err(ErrorReply::new(ErrorKind::UnknownCommand)),
    }
}

/// `spawn_ai {academy, department, count, team_id}`.
fn handle_spawn_ai(context: &Arc<EngineContext>, data: &Value) -> Result<Value, ErrorReply> {
    let academy = parse_academy(data)?;
    let department = parse_department(data)?;
    let count = data
        .get("count")
        .and_then(Value::as_u64)
        .filter(|count| (1..=MAX_SPAWN_COUNT).contains(count))
        .ok_or_else(|| ErrorReply::new(ErrorKind::MalformedPayload))?;
    let team_id = data
        .get("team_id")
        .and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or(0);
    let level = data
        .get("level")
        .and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or(1);

    let profile = SpawnProfile {
        academy,
        department,
        team_id,
        level,
        strategy: StrategyKind::default(),
    };

    let mut spawned: Vec<Value> = Vec::new();
    for _ in 0..count {
        match context.registry.create(&profile, None) {
            Ok(snapshot) => spawned.push(snapshot_value(&snapshot)),
            Err(RegistryError::CapacityExceeded) => {
                // Partial spawns are rolled back so the caller never
                // gets fewer agents than requested without an error.
                for value in &spawned {
                    if let Some(id) = value.get("id").and_then(Value::as_str).and_then(AgentId::parse)
                    {
                        let _ = context.registry.delete(id);
                    }
                }
                return Err(ErrorReply::new(ErrorKind::CapacityExceeded));
            }
            Err(error) => {
                warn!(%error, "Spawn failed");
                return Err(ErrorReply::new(ErrorKind::InvariantViolation));
            }
        }
    }

    info!(count = spawned.len(), academy = ?academy, department = ?department, "Agents spawned");
    Ok(json!({ "ai_list": spawned, "count": spawned.len() }))
}

/// `ai_command {ai_id, action, params}`.
fn handle_ai_command(context: &Arc<EngineContext>, data: &Value) -> Result<Value, ErrorReply> {
    let ai_id = parse_agent_id(data, "ai_id")?;
    let action = data
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| ErrorReply::new(ErrorKind::MalformedPayload))?;
    let params = data.get("params").cloned().unwrap_or(Value::Null);

    let agent = context
        .registry
        .get(ai_id)
        .map_err(|_| ErrorReply::new(ErrorKind::NotFound))?;

    let success_response = |action: &str| json!({ "ai_id": ai_id, "action": action, "success": true });
    let failure = |kind: ErrorKind, action: &str| {
        ErrorReply::with_data(
            kind,
            json!({ "ai_id": ai_id, "action": action, "success": false }),
        )
    };

    match action {
        "attack" => {
            let target = parse_agent_id(&params, "target_id")
                .map_err(|_| failure(ErrorKind::MalformedPayload, action))?;
            resolve_attack(context, &agent, target, action)?;
            Ok(success_response(action))
        }
        "use_skill" => {
            let skill_id = params
                .get("skill_id")
                .and_then(Value::as_str)
                .unwrap_or("auto");
            resolve_skill(context, &agent, skill_id, &params, action)?;
            Ok(success_response(action))
        }
        "move" => {
            let target = parse_position(&params)
                .ok_or_else(|| failure(ErrorKind::MalformedPayload, action))?;
            apply_state(context, ai_id, LifecycleState::Moving, Some(target), action)?;
            Ok(success_response(action))
        }
        "chat" => {
            let text = params
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            apply_state(context, ai_id, LifecycleState::Chatting, None, action)?;
            if text.is_empty() {
                delegate_chat_line(context, &agent);
            } else {
                let _ = context.events.send(EngineEvent::System {
                    event_type: String::from("ai_chat"),
                    data: json!({ "ai_id": ai_id, "text": text }),
                });
            }
            Ok(success_response(action))
        }
        "patrol" | "follow" => {
            apply_state(context, ai_id, LifecycleState::Moving, None, action)?;
            Ok(success_response(action))
        }
        "guard" => {
            apply_state(context, ai_id, LifecycleState::Idle, None, action)?;
            Ok(success_response(action))
        }
        "return_base" => {
            apply_state(context, ai_id, LifecycleState::Returning, None, action)?;
            Ok(success_response(action))
        }
        "respawn" => {
            context
                .registry
                .respawn(ai_id)
                .map_err(|_| failure(ErrorKind::InvariantViolation, action))?;
            emit_state_change(context, ai_id);
            Ok(success_response(action))
        }
        _ => Err(failure(ErrorKind::MalformedPayload, action)),
    }
}

/// Resolve a basic attack: roll damage, apply it, award xp, notify.
fn resolve_attack(
    context: &Arc<EngineContext>,
    attacker: &AgentSnapshot,
    target: AgentId,
    action: &str,
) -> Result<(), ErrorReply> {
    let damage = rand::rng().random_range(ATTACK_DAMAGE_MIN..=ATTACK_DAMAGE_MAX);
    apply_damage(context, attacker, target, damage, action, None)
}

/// Resolve a skill cast: mana gate first, then damage like an attack.
fn resolve_skill(
    context: &Arc<EngineContext>,
    caster: &AgentSnapshot,
    skill_id: &str,
    params: &Value,
    action: &str,
) -> Result<(), ErrorReply> {
    let resolved = if skill_id == "auto" {
        skills::cheapest(caster.department)
    } else {
        skills::lookup(caster.department, skill_id)
    };
    let (cost, power, skill_name) = resolved.map_or_else(
        || (skills::DEFAULT_SKILL_MP_COST, 100, skill_id.to_owned()),
        |skill| (skill.mp_cost, skill.power, skill.id.to_owned()),
    );

    // Mana gating: an underfunded cast is an invariant violation and
    // must leave the caster untouched.
    if caster.mp < cost {
        return Err(ErrorReply::with_data(
            ErrorKind::InvariantViolation,
            json!({ "ai_id": caster.id, "action": action, "success": false }),
        ));
    }

    context
        .registry
        .update(caster.id, |agent| {
            agent.vitals.mp = agent.vitals.mp.saturating_sub(cost);
            agent.state = LifecycleState::UsingSkill;
        })
        .map_err(|_| ErrorReply::new(ErrorKind::NotFound))?;
    emit_state_change(context, caster.id);

    if let Ok(target) = parse_agent_id(params, "target_id") {
        apply_damage(context, caster, target, power, action, Some(skill_name))?;
    } else {
        let _ = context.events.send(EngineEvent::Battle {
            agent_id: caster.id,
            event_type: String::from(action),
            data: json!({ "skill": skill_name, "mp_cost": cost }),
        });
    }
    Ok(())
}

/// Apply damage to a target, handle death and xp, emit the battle event.
fn apply_damage(
    context: &Arc<EngineContext>,
    attacker: &AgentSnapshot,
    target: AgentId,
    damage: u32,
    event_type: &str,
    skill: Option<String>,
) -> Result<(), ErrorReply> {
    let victim = context
        .registry
        .get(target)
        .map_err(|_| ErrorReply::new(ErrorKind::NotFound))?;
    if victim.state == LifecycleState::Dead {
        return Err(ErrorReply::with_data(
            ErrorKind::InvariantViolation,
            json!({ "ai_id": attacker.id, "action": event_type, "success": false }),
        ));
    }

    let (target_hp, died) = context
        .registry
        .update(target, |agent| {
            agent.vitals.hp = agent.vitals.hp.saturating_sub(damage);
            let died = agent.vitals.hp == 0;
            if died {
                agent.state = LifecycleState::Dead;
            }
            (agent.vitals.hp, died)
        })
        .map_err(|_| ErrorReply::new(ErrorKind::NotFound))?;

    let _ = context.registry.update(attacker.id, |agent| {
        agent.state = LifecycleState::Fighting;
    });

    let mut payload = json!({
        "target": target,
        "damage": damage,
        "target_hp": target_hp,
    });
    if let (Some(skill), Some(object)) = (skill, payload.as_object_mut()) {
        object.insert(String::from("skill"), json!(skill));
    }
    let _ = context.events.send(EngineEvent::Battle {
        agent_id: attacker.id,
        event_type: String::from(event_type),
        data: payload,
    });
    emit_state_change(context, attacker.id);
    emit_state_change(context, target);

    if died {
        let _ = context.events.send(EngineEvent::System {
            event_type: String::from("ai_death"),
            data: json!({ "ai_id": target, "killer": attacker.id }),
        });
        award_kill_xp(context, attacker.id, victim.level);
    }
    debug!(attacker = %attacker.id, %target, damage, died, "Damage resolved");
    Ok(())
}

/// Grant kill experience and handle level-ups.
fn award_kill_xp(context: &Arc<EngineContext>, attacker: AgentId, victim_level: u32) {
    let gained = KILL_XP_PER_LEVEL.saturating_mul(u64::from(victim_level));
    let leveled = context.registry.update(attacker, |agent| {
        agent.vitals.xp = agent.vitals.xp.saturating_add(gained);
        let threshold = XP_PER_LEVEL.saturating_mul(u64::from(agent.vitals.level));
        if agent.vitals.xp >= threshold {
            agent.vitals.xp = agent.vitals.xp.saturating_sub(threshold);
            agent.vitals.level = agent.vitals.level.saturating_add(1);
            Some(agent.vitals.level)
        } else {
            None
        }
    });
    if let Ok(Some(level)) = leveled {
        info!(agent = %attacker, level, "Agent leveled up");
        let _ = context.events.send(EngineEvent::System {
            event_type: String::from("ai_level_up"),
            data: json!({ "ai_id": attacker, "level": level }),
        });
    }
}

/// Common "set state (and maybe position)" path.
fn apply_state(
    context: &Arc<EngineContext>,
    ai_id: AgentId,
    state: LifecycleState,
    position: Option<Position>,
    action: &str,
) -> Result<(), ErrorReply> {
    context
        .registry
        .update(ai_id, |agent| {
            agent.state = state;
            if let Some(position) = position {
                agent.pose.position = position;
            }
        })
        .map_err(|error| match error {
            RegistryError::NotFound(_) => ErrorReply::new(ErrorKind::NotFound),
            _ => ErrorReply::with_data(
                ErrorKind::InvariantViolation,
                json!({ "ai_id": ai_id, "action": action, "success": false }),
            ),
        })?;
    emit_state_change(context, ai_id);
    Ok(())
}

/// Ask the LLM dispatcher for an in-character chat line; the result is
/// broadcast as a system event when it arrives.
fn delegate_chat_line(context: &Arc<EngineContext>, agent: &AgentSnapshot) {
    let Some(dispatcher) = context.dispatcher.clone() else {
        return;
    };
    let prompt = format!(
        "你是{}學院的{}弟子「{}」。用繁體中文說一句不超過20字的戰鬥喊話。",
        agent.academy.display_name(),
        agent.department.display_name(),
        agent.name,
    );
    let mut request = LlmRequest::new(&prompt);
    request.academy = Some(agent.academy);
    let ai_id = agent.id;
    let events = context.events.clone();

    match dispatcher.submit(request) {
        Ok((_, mut receiver)) => {
            tokio::spawn(async move {
                while let Some(event) = receiver.recv().await {
                    match event {
                        LlmEvent::Completed { text, .. } => {
                            let _ = events.send(EngineEvent::System {
                                event_type: String::from("ai_chat"),
                                data: json!({ "ai_id": ai_id, "text": text.trim() }),
                            });
                            break;
                        }
                        LlmEvent::Failed { error, .. } => {
                            debug!(agent = %ai_id, %error, "LLM chat line failed");
                            break;
                        }
                        LlmEvent::Chunk { .. } => {}
                    }
                }
            });
        }
        Err(error) => debug!(agent = %ai_id, %error, "LLM chat line not submitted"),
    }
}

/// `assign_team {ai_ids, team_id}`.
fn handle_assign_team(context: &Arc<EngineContext>, data: &Value) -> Result<Value, ErrorReply> {
    let team_id = data
        .get("team_id")
        .and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| ErrorReply::new(ErrorKind::MalformedPayload))?;
    let ids = parse_agent_ids(data, "ai_ids")?;

    context
        .registry
        .assign_team(&ids, team_id)
        .map_err(|error| match error {
            RegistryError::NotFound(_) => ErrorReply::new(ErrorKind::NotFound),
            _ => ErrorReply::new(ErrorKind::InvariantViolation),
        })?;

    Ok(json!({ "team_id": team_id, "ai_ids": ids, "success": true }))
}

/// `get_status {ai_ids?}`.
fn handle_get_status(context: &Arc<EngineContext>, data: &Value) -> Result<Value, ErrorReply> {
    let snapshots = if data.get("ai_ids").is_some() {
        let ids = parse_agent_ids(data, "ai_ids")?;
        context.registry.get_many(&ids)
    } else {
        context.registry.list(None)
    };
    let status: Vec<Value> = snapshots.iter().map(snapshot_value).collect();
    Ok(json!({ "ai_status": status }))
}

/// `delete_ai {ai_id? , team_id?}`.
fn handle_delete_ai(context: &Arc<EngineContext>, data: &Value) -> Result<Value, ErrorReply> {
    if let Ok(ai_id) = parse_agent_id(data, "ai_id") {
        context
            .registry
            .delete(ai_id)
            .map_err(|_| ErrorReply::new(ErrorKind::NotFound))?;
        return Ok(json!({ "ai_id": ai_id, "team_id": Value::Null, "success": true }));
    }
    if let Some(team_id) = data.get("team_id").and_then(Value::as_u64) {
        let team_id = u32::try_from(team_id)
            .map_err(|_| ErrorReply::new(ErrorKind::MalformedPayload))?;
        let removed = context.registry.delete_team(team_id);
        return Ok(json!({
            "ai_id": Value::Null,
            "team_id": team_id,
            "deleted": removed.len(),
            "success": true,
        }));
    }
    Err(ErrorReply::new(ErrorKind::MalformedPayload))
}

/// `batch_operation {operations}`: each entry is `{cmd, data}`.
///
/// Nested batches are rejected rather than recursed into.
fn handle_batch_operation(
    context: &Arc<EngineContext>,
    data: &Value,
) -> Result<Value, ErrorReply> {
    let operations = data
        .get("operations")
        .and_then(Value::as_array)
        .ok_or_else(|| ErrorReply::new(ErrorKind::MalformedPayload))?;

    let mut results = Vec::with_capacity(operations.len());
    for operation in operations {
        let cmd = operation
            .get("cmd")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let op_data = operation.get("data").cloned().unwrap_or(Value::Null);

        let result = if cmd == "batch_operation" {
            Err(ErrorReply::new(ErrorKind::MalformedPayload))
        } else {
            dispatch_simple(context, &cmd, &op_data)
        };

        results.push(match result {
            Ok(value) => json!({ "cmd": cmd, "status": "ok", "data": value }),
            Err(reply) => json!({
                "cmd": cmd,
                "status": "error",
                "error": reply.kind.as_str(),
            }),
        });
    }
    Ok(json!({ "results": results }))
}

/// `system_control {action}`: routed through the command queue so
/// control operations share the drain path with everything else.
fn handle_system_control(context: &Arc<EngineContext>, data: &Value) -> Result<Value, ErrorReply> {
    let action = data
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| ErrorReply::new(ErrorKind::MalformedPayload))?;
    if !matches!(action, "pause_all" | "resume_all" | "reset_all") {
        return Err(ErrorReply::new(ErrorKind::MalformedPayload));
    }

    context
        .queue
        .enqueue(Command::new(
            CommandKind::SystemControl,
            None,
            json!({ "action": action }),
            CommandPriority::Critical,
        ))
        .map_err(|_| ErrorReply::new(ErrorKind::QueueFull))?;

    Ok(json!({ "action": action, "success": true }))
}

/// Serialize a snapshot for the wire.
fn snapshot_value(snapshot: &AgentSnapshot) -> Value {
    serde_json::to_value(snapshot).unwrap_or(Value::Null)
}

/// Emit a state-change event for one agent's current state.
fn emit_state_change(context: &Arc<EngineContext>, agent_id: AgentId) {
    if let Ok(snapshot) = context.registry.get(agent_id) {
        let _ = context.events.send(EngineEvent::StateChange {
            agent_id,
            state: snapshot.state,
            position: snapshot.position,
        });
    }
}

/// Parse an academy code out of a payload.
fn parse_academy(data: &Value) -> Result<Academy, ErrorReply> {
    data.get("academy")
        .and_then(Value::as_u64)
        .and_then(|value| u8::try_from(value).ok())
        .and_then(|code| Academy::try_from(code).ok())
        .ok_or_else(|| ErrorReply::new(ErrorKind::MalformedPayload))
}

/// Parse a department code out of a payload.
fn parse_department(data: &Value) -> Result<Department, ErrorReply> {
    data.get("department")
        .and_then(Value::as_u64)
        .and_then(|value| u8::try_from(value).ok())
        .and_then(|code| Department::try_from(code).ok())
        .ok_or_else(|| ErrorReply::new(ErrorKind::MalformedPayload))
}

/// Parse one agent id field.
fn parse_agent_id(data: &Value, field: &str) -> Result<AgentId, ErrorReply> {
    data.get(field)
        .and_then(Value::as_str)
        .and_then(AgentId::parse)
        .ok_or_else(|| ErrorReply::new(ErrorKind::MalformedPayload))
}

/// Parse an array of agent ids.
fn parse_agent_ids(data: &Value, field: &str) -> Result<Vec<AgentId>, ErrorReply> {
    let array = data
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| ErrorReply::new(ErrorKind::MalformedPayload))?;
    array
        .iter()
        .map(|value| {
            value
                .as_str()
                .and_then(AgentId::parse)
                .ok_or_else(|| ErrorReply::new(ErrorKind::MalformedPayload))
        })
        .collect()
}

/// Parse a position from `{x, y, z}` or `{position: {x, y, z}}`.
#[allow(clippy::cast_possible_truncation)]
fn parse_position(params: &Value) -> Option<Position> {
    let source = params.get("position").unwrap_or(params);
    let x = source.get("x")?.as_f64()?;
    let y = source.get("y")?.as_f64()?;
    let z = source.get("z").and_then(Value::as_f64).unwrap_or(0.0);
    Some(Position::new(x as f32, y as f32, z as f32))
}
