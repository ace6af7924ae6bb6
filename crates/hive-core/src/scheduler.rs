//! The AI scheduler: command drain, tick sweep over a worker pool, and
//! the periodic balance pass.
//!
//! Three periodic tasks drive the population:
//!
//! 1. **Command drain** pulls batches off the priority queue and routes
//!    them: create/update/delete to the registry, broadcast actions to
//!    per-agent mailboxes, system control to the pause/reset switches.
//! 2. **Tick sweep** snapshots the population and feeds one job per
//!    active agent to the worker pool; each worker builds a perception,
//!    runs the agent's strategy (a mailbox action preempts it), applies
//!    the result through the registry, feeds the reward back, and emits
//!    a state-change event.
//! 3. **Balance pass** checks shard health and applies the balancer's
//!    migration plan through the registry.
//!
//! Failure containment: a strategy that errors or overruns its tick
//! budget is counted per agent; three consecutive strikes demote the
//! agent to the utility strategy. Tick failures never abort the
//! scheduler.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use hive_agents::{CommandQueue, Registry, SpawnProfile, skills};
use hive_brain::StrategyFactory;
use hive_types::{
    Academy, Action, ActionParameters, AgentId, AgentSnapshot, CommandKind, Department,
    EngineEvent, LifecycleState, Perception, StrategyKind,
};

use crate::perception::build_perception;

/// Consecutive failures or budget overruns before demotion.
const DEMOTION_STRIKES: u32 = 3;

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchedulerConfig {
    /// Milliseconds between tick sweeps.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Milliseconds between command drains.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    /// Maximum commands per drain.
    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,
    /// Seconds between balance passes.
    #[serde(default = "default_balance_interval_secs")]
    pub balance_interval_secs: u64,
    /// Worker task count; 0 means `max(4, 2 × cores)`.
    #[serde(default)]
    pub workers: usize,
    /// Registry capacity; creation beyond this fails.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    /// Soft per-agent tick budget in microseconds.
    #[serde(default = "default_budget_us")]
    pub tick_budget_us: u64,
    /// When true, the balance pass records a heartbeat for every
    /// enabled shard. Used when no external game-server link feeds
    /// heartbeats into the balancer.
    #[serde(default = "default_true")]
    pub self_heartbeat_shards: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            drain_interval_ms: default_drain_interval_ms(),
            drain_batch: default_drain_batch(),
            balance_interval_secs: default_balance_interval_secs(),
            workers: 0,
            max_agents: default_max_agents(),
            tick_budget_us: default_budget_us(),
            self_heartbeat_shards: default_true(),
        }
    }
}

impl SchedulerConfig {
    /// Resolve the worker count: `max(4, 2 × cores)` when unset.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            num_cpus::get().saturating_mul(2).max(4)
        }
    }
}

/// Aggregate scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    /// Completed tick sweeps.
    pub sweeps: u64,
    /// Individual agent ticks processed.
    pub agent_ticks: u64,
    /// Strategy failures contained.
    pub failures: u64,
    /// Strategies demoted to utility.
    pub demotions: u64,
    /// Commands drained from the queue.
    pub commands: u64,
}

/// Per-agent strike counters.
#[derive(Debug, Default, Clone, Copy)]
struct Strikes {
    failures: u32,
    overruns: u32,
}

/// One unit of worker-pool work.
struct TickJob {
    agent_id: AgentId,
    population: Arc<Vec<AgentSnapshot>>,
}

/// Shared scheduler state.
struct SchedulerShared {
    registry: Arc<Registry>,
    queue: Arc<CommandQueue>,
    factory: std::sync::RwLock<StrategyFactory>,
    config: SchedulerConfig,
    events_tx: broadcast::Sender<EngineEvent>,
    mailboxes: std::sync::Mutex<BTreeMap<AgentId, VecDeque<Action>>>,
    strikes: std::sync::Mutex<BTreeMap<AgentId, Strikes>>,
    paused: AtomicBool,
    sweeps: AtomicU64,
    agent_ticks: AtomicU64,
    failures: AtomicU64,
    demotions: AtomicU64,
    commands: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

/// The AI scheduler.
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    /// Build an unstarted scheduler over the registry and queue.
    pub fn new(
        registry: Arc<Registry>,
        queue: Arc<CommandQueue>,
        factory: StrategyFactory,
        config: SchedulerConfig,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(SchedulerShared {
                registry,
                queue,
                factory: std::sync::RwLock::new(factory),
                config,
                events_tx,
                mailboxes: std::sync::Mutex::new(BTreeMap::new()),
                strikes: std::sync::Mutex::new(BTreeMap::new()),
                paused: AtomicBool::new(false),
                sweeps: AtomicU64::new(0),
                agent_ticks: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                demotions: AtomicU64::new(0),
                commands: AtomicU64::new(0),
                shutdown_tx,
            }),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to engine events (state changes, battle, system).
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events_tx.subscribe()
    }

    /// A sender for components that emit events alongside the
    /// scheduler (command handlers, combat resolution).
    pub fn events_sender(&self) -> broadcast::Sender<EngineEvent> {
        self.shared.events_tx.clone()
    }

    /// Swap in a freshly parsed strategy configuration.
    pub fn reload_brain(&self, factory: StrategyFactory) {
        let mut guard = self
            .shared
            .factory
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = factory;
        info!("Strategy configuration reloaded");
    }

    /// Pause or resume the tick sweep.
    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Relaxed);
        info!(paused, "Scheduler pause state changed");
    }

    /// Whether the tick sweep is paused.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    /// Aggregate counters.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            sweeps: self.shared.sweeps.load(Ordering::Relaxed),
            agent_ticks: self.shared.agent_ticks.load(Ordering::Relaxed),
            failures: self.shared.failures.load(Ordering::Relaxed),
            demotions: self.shared.demotions.load(Ordering::Relaxed),
            commands: self.shared.commands.load(Ordering::Relaxed),
        }
    }

    /// Start the worker pool and the three periodic tasks.
    pub fn start(&self) {
        let workers = self.shared.config.worker_count();
        let (job_tx, job_rx) = mpsc::channel::<TickJob>(workers.saturating_mul(4).max(16));
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        let mut tasks = self.lock_tasks();
        for worker_id in 0..workers {
            tasks.push(tokio::spawn(worker_loop(
                Arc::clone(&self.shared),
                Arc::clone(&job_rx),
                worker_id,
            )));
        }
        tasks.push(tokio::spawn(tick_loop(Arc::clone(&self.shared), job_tx)));
        tasks.push(tokio::spawn(drain_loop(Arc::clone(&self.shared))));
        tasks.push(tokio::spawn(balance_loop(Arc::clone(&self.shared))));
        info!(workers, "Scheduler started");
    }

    /// Stop cooperatively: signal every task and wait up to `grace`.
    pub async fn stop(&self, grace: Duration) {
        let _ = self.shared.shutdown_tx.send(true);
        let tasks: Vec<_> = self.lock_tasks().drain(..).collect();
        let drain = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Scheduler tasks did not drain within the shutdown budget");
        }
        info!("Scheduler stopped");
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<tokio::task::JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// The tick sweep: enumerate active agents and feed the worker pool.
async fn tick_loop(shared: Arc<SchedulerShared>, job_tx: mpsc::Sender<TickJob>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let period = Duration::from_millis(shared.config.tick_interval_ms.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if shared.paused.load(Ordering::Relaxed) {
                    continue;
                }
                let population = Arc::new(shared.registry.list(None));
                let now = Utc::now();
                let interval = chrono::Duration::milliseconds(
                    i64::try_from(shared.config.tick_interval_ms).unwrap_or(100),
                );

                for snapshot in population.iter() {
                    if matches!(
                        snapshot.state,
                        LifecycleState::Offline | LifecycleState::Dead
                    ) {
                        continue;
                    }
                    // Skip agents ticked within one interval already.
                    if now.signed_duration_since(snapshot.last_update) < interval
                        && snapshot.last_update != snapshot.created_at
                    {
                        continue;
                    }
                    let job = TickJob {
                        agent_id: snapshot.id,
                        population: Arc::clone(&population),
                    };
                    if job_tx.send(job).await.is_err() {
                        return;
                    }
                }
                shared.sweeps.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!("Tick loop exited");
}

/// One worker: advance agents handed to it by the tick loop.
async fn worker_loop(
    shared: Arc<SchedulerShared>,
    job_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<TickJob>>>,
    worker_id: usize,
) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    loop {
        let job = {
            let mut receiver = job_rx.lock().await;
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                maybe = receiver.recv() => maybe,
            }
        };
        let Some(job) = job else { break };
        tick_agent(&shared, &job);
    }
    debug!(worker_id, "Worker exited");
}

/// Advance one agent by one tick.
fn tick_agent(shared: &Arc<SchedulerShared>, job: &TickJob) {
    let started = Instant::now();
    let Some(snapshot) = job
        .population
        .iter()
        .find(|candidate| candidate.id == job.agent_id)
    else {
        return;
    };

    let perception = build_perception(snapshot, &job.population);
    let mailbox_action = take_mailbox_action(shared, job.agent_id);
    let strategy = {
        let factory = shared
            .factory
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        factory.build(snapshot.strategy)
    };

    let department = snapshot.department;
    let result = shared.registry.update(job.agent_id, |agent| {
        let mut rng = rand::rng();
        let action = mailbox_action.unwrap_or_else(|| {
            strategy.decide(&perception, &agent.traits, &mut agent.learning, &mut rng)
        });

        let action = if action.is_well_formed() {
            action
        } else {
            Action::idle_fallback()
        };

        let before_state = agent.state;
        let applied = apply_action(agent, &action, department);

        // Feed the outcome back into the learning state.
        let mut after = perception.clone();
        after.vitals = agent.vitals;
        let reward = compute_reward(&perception, &after, &action);
        strategy.learn(&after, &action, reward, &mut agent.learning);

        agent.last_tick_at = Some(Utc::now());
        (action, before_state, applied)
    });

    shared.agent_ticks.fetch_add(1, Ordering::Relaxed);

    match result {
        Ok((action, before_state, applied)) => {
            if !applied {
                record_failure(shared, job.agent_id, "action rejected");
            } else {
                clear_failures(shared, job.agent_id);
            }
            if let Ok(now) = shared.registry.get(job.agent_id)
                && now.state != before_state
            {
                let _ = shared.events_tx.send(EngineEvent::StateChange {
                    agent_id: job.agent_id,
                    state: now.state,
                    position: now.position,
                });
            }
            debug!(agent = %job.agent_id, action = %action.action_type, "Agent ticked");
        }
        Err(error) => {
            record_failure(shared, job.agent_id, &error.to_string());
        }
    }

    // Soft budget accounting.
    let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
    if elapsed_us > shared.config.tick_budget_us.max(1) {
        record_overrun(shared, job.agent_id, elapsed_us);
    } else {
        clear_overruns(shared, job.agent_id);
    }
}

/// Apply a decided action to the agent record. Returns false when the
/// action could not be applied (for example mana gating).
fn apply_action(agent: &mut hive_types::Agent, action: &Action, department: Department) -> bool {
    match &action.parameters {
        ActionParameters::Move { target } => {
            agent.pose.position.x += target.x;
            agent.pose.position.y += target.y;
            agent.pose.position.z += target.z;
            agent.pose.facing = target.y.atan2(target.x).to_degrees();
            agent.state = LifecycleState::Moving;
            true
        }
        ActionParameters::Attack { .. } => {
            agent.state = LifecycleState::Fighting;
            true
        }
        ActionParameters::UseSkill { skill_id, .. } => {
            let cost = if skill_id == hive_brain::candidates::AUTO_SKILL {
                skills::cheapest(department).map_or(skills::DEFAULT_SKILL_MP_COST, |s| s.mp_cost)
            } else {
                skills::mp_cost(department, skill_id)
            };
            if agent.vitals.mp < cost {
                agent.state = LifecycleState::Idle;
                return false;
            }
            agent.vitals.mp = agent.vitals.mp.saturating_sub(cost);
            agent.state = LifecycleState::UsingSkill;
            true
        }
        ActionParameters::UseItem { .. } => {
            // Consumables restore a flat amount, capped at max.
            agent.vitals.hp = agent.vitals.hp.saturating_add(100).min(agent.vitals.max_hp);
            true
        }
        ActionParameters::Interact { .. } | ActionParameters::Chat { .. } => {
            agent.state = LifecycleState::Chatting;
            true
        }
        ActionParameters::Flee => {
            agent.state = LifecycleState::Returning;
            true
        }
        ActionParameters::Idle => {
            agent.state = LifecycleState::Idle;
            true
        }
    }
}

/// Reward shaping for the learning strategies: staying healthy is good,
/// acting is mildly better than idling.
fn compute_reward(before: &Perception, after: &Perception, action: &Action) -> f64 {
    let hp_delta = after.vitals.hp_ratio() - before.vitals.hp_ratio();
    let activity_bonus = if action.action_type == hive_types::ActionType::Idle {
        0.0
    } else {
        0.05
    };
    hp_delta.mul_add(2.0, activity_bonus)
}

/// Pop the oldest mailbox action for an agent, if any.
fn take_mailbox_action(shared: &Arc<SchedulerShared>, agent_id: AgentId) -> Option<Action> {
    let mut mailboxes = shared
        .mailboxes
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let action = mailboxes.get_mut(&agent_id).and_then(VecDeque::pop_front);
    if let Some(queue) = mailboxes.get(&agent_id)
        && queue.is_empty()
    {
        mailboxes.remove(&agent_id);
    }
    action
}

/// Record a contained strategy failure; demote after three strikes.
fn record_failure(shared: &Arc<SchedulerShared>, agent_id: AgentId, reason: &str) {
    shared.failures.fetch_add(1, Ordering::Relaxed);
    let strikes = {
        let mut map = shared
            .strikes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = map.entry(agent_id).or_default();
        entry.failures = entry.failures.saturating_add(1);
        entry.failures
    };
    warn!(agent = %agent_id, strikes, reason, "Tick failure contained");
    if strikes >= DEMOTION_STRIKES {
        demote(shared, agent_id, "repeated failures");
    }
}

/// Reset the failure strike counter.
fn clear_failures(shared: &Arc<SchedulerShared>, agent_id: AgentId) {
    let mut map = shared
        .strikes
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(entry) = map.get_mut(&agent_id) {
        entry.failures = 0;
    }
}

/// Record a budget overrun; demote after three in a row.
fn record_overrun(shared: &Arc<SchedulerShared>, agent_id: AgentId, elapsed_us: u64) {
    let strikes = {
        let mut map = shared
            .strikes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = map.entry(agent_id).or_default();
        entry.overruns = entry.overruns.saturating_add(1);
        entry.overruns
    };
    debug!(agent = %agent_id, elapsed_us, strikes, "Tick budget exceeded");
    if strikes >= DEMOTION_STRIKES {
        demote(shared, agent_id, "tick budget overruns");
    }
}

/// Reset the overrun strike counter.
fn clear_overruns(shared: &Arc<SchedulerShared>, agent_id: AgentId) {
    let mut map = shared
        .strikes
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(entry) = map.get_mut(&agent_id) {
        entry.overruns = 0;
    }
}

/// Demote an agent to the utility strategy and reset its strikes.
fn demote(shared: &Arc<SchedulerShared>, agent_id: AgentId, reason: &str) {
    {
        let mut map = shared
            .strikes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.remove(&agent_id);
    }
    let already_utility = shared
        .registry
        .get(agent_id)
        .is_ok_and(|snapshot| snapshot.strategy == StrategyKind::Utility);
    if already_utility {
        return;
    }
    let result = shared.registry.update(agent_id, |agent| {
        agent.strategy = StrategyKind::Utility;
    });
    if result.is_ok() {
        shared.demotions.fetch_add(1, Ordering::Relaxed);
        warn!(agent = %agent_id, reason, "Strategy demoted to utility");
    }
}

/// The command drain task.
async fn drain_loop(shared: Arc<SchedulerShared>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let period = Duration::from_millis(shared.config.drain_interval_ms.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let batch = shared.queue.dequeue_batch(shared.config.drain_batch);
                for command in batch {
                    shared.commands.fetch_add(1, Ordering::Relaxed);
                    route_command(&shared, &command);
                }
            }
        }
    }
    debug!("Drain loop exited");
}

/// Route one drained command.
fn route_command(shared: &Arc<SchedulerShared>, command: &hive_types::Command) {
    match command.kind {
        CommandKind::Create => {
            if let Some(profile) = parse_spawn_payload(&command.payload) {
                match shared.registry.create(&profile, None) {
                    Ok(snapshot) => debug!(agent = %snapshot.id, "Agent created via command"),
                    Err(error) => warn!(%error, "Create command failed"),
                }
            } else {
                warn!("Create command with unparseable payload");
            }
        }
        CommandKind::Update => {
            let Some(target) = command.target else {
                warn!("Update command without target");
                return;
            };
            let payload = command.payload.clone();
            let result = shared.registry.update(target, move |agent| {
                apply_update_payload(agent, &payload);
            });
            if let Err(error) = result {
                warn!(agent = %target, %error, "Update command rejected");
            }
        }
        CommandKind::Delete => {
            let Some(target) = command.target else {
                warn!("Delete command without target");
                return;
            };
            match shared.registry.delete(target) {
                Ok(_) => debug!(agent = %target, "Agent deleted via command"),
                Err(error) => warn!(agent = %target, %error, "Delete command failed"),
            }
        }
        CommandKind::BroadcastAction => {
            let Some(target) = command.target else {
                warn!("Broadcast action without target");
                return;
            };
            match serde_json::from_value::<Action>(command.payload.clone()) {
                Ok(action) => {
                    let mut mailboxes = shared
                        .mailboxes
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    mailboxes.entry(target).or_default().push_back(action);
                }
                Err(error) => warn!(agent = %target, %error, "Undecodable broadcast action"),
            }
        }
        CommandKind::SystemControl => {
            let action = command
                .payload
                .get("action")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            match action {
                "pause_all" => shared.paused.store(true, Ordering::Relaxed),
                "resume_all" => shared.paused.store(false, Ordering::Relaxed),
                "reset_all" => reset_all(shared),
                other => warn!(action = other, "Unknown system control action"),
            }
            let _ = shared.events_tx.send(EngineEvent::System {
                event_type: action.to_owned(),
                data: serde_json::Value::Null,
            });
        }
    }
}

/// Restore every agent to full vitals and the idle state.
fn reset_all(shared: &Arc<SchedulerShared>) {
    let population = shared.registry.list(None);
    for snapshot in population {
        if snapshot.state == LifecycleState::Dead {
            let _ = shared.registry.respawn(snapshot.id);
        }
        let _ = shared.registry.update(snapshot.id, |agent| {
            agent.vitals.hp = agent.vitals.max_hp;
            agent.vitals.mp = agent.vitals.max_mp;
            agent.state = LifecycleState::Idle;
        });
    }
    info!("All agents reset");
}

/// Decode a create-command payload into a spawn profile.
fn parse_spawn_payload(payload: &serde_json::Value) -> Option<SpawnProfile> {
    let academy = u8::try_from(payload.get("academy")?.as_u64()?).ok()?;
    let department = u8::try_from(payload.get("department")?.as_u64()?).ok()?;
    let team_id = payload
        .get("team_id")
        .and_then(serde_json::Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or(0);
    let level = payload
        .get("level")
        .and_then(serde_json::Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or(1);
    Some(SpawnProfile {
        academy: Academy::try_from(academy).ok()?,
        department: Department::try_from(department).ok()?,
        team_id,
        level,
        strategy: StrategyKind::default(),
    })
}

/// Apply the recognized fields of an update-command payload.
fn apply_update_payload(agent: &mut hive_types::Agent, payload: &serde_json::Value) {
    if let Some(hp) = payload.get("hp").and_then(serde_json::Value::as_u64) {
        agent.vitals.hp = u32::try_from(hp).unwrap_or(agent.vitals.max_hp);
    }
    if let Some(mp) = payload.get("mp").and_then(serde_json::Value::as_u64) {
        agent.vitals.mp = u32::try_from(mp).unwrap_or(agent.vitals.max_mp);
    }
    if let Some(state) = payload.get("state").and_then(serde_json::Value::as_str)
        && let Ok(parsed) = serde_json::from_value::<LifecycleState>(serde_json::json!(state))
    {
        agent.state = parsed;
    }
    if let Some(strategy) = payload.get("strategy").and_then(serde_json::Value::as_str)
        && let Ok(parsed) = serde_json::from_value::<StrategyKind>(serde_json::json!(strategy))
    {
        agent.strategy = parsed;
    }
}

/// The balance pass: shard health, then the migration plan.
async fn balance_loop(shared: Arc<SchedulerShared>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let period = Duration::from_secs(shared.config.balance_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let balancer = shared.registry.balancer();
                if shared.config.self_heartbeat_shards {
                    for shard in balancer.shards() {
                        if shard.enabled {
                            let _ = balancer.heartbeat(shard.id);
                        }
                    }
                }
                balancer.check_health(Utc::now());

                let population = shared.registry.population_by_shard();
                let migrations = balancer.rebalance(&population);
                if migrations.is_empty() {
                    continue;
                }
                let planned = migrations.len();
                let mut applied = 0_usize;
                for migration in migrations {
                    match shared.registry.migrate(migration.agent_id, migration.to) {
                        Ok(()) => applied = applied.saturating_add(1),
                        Err(error) => {
                            warn!(agent = %migration.agent_id, %error, "Migration failed");
                        }
                    }
                }
                info!(planned, applied, "Rebalance applied");
                let _ = shared.events_tx.send(EngineEvent::System {
                    event_type: String::from("rebalance"),
                    data: serde_json::json!({ "planned": planned, "applied": applied }),
                });
            }
        }
    }
    debug!("Balance loop exited");
}

const fn default_tick_interval_ms() -> u64 {
    100
}

const fn default_drain_interval_ms() -> u64 {
    100
}

const fn default_drain_batch() -> usize {
    100
}

const fn default_balance_interval_secs() -> u64 {
    5
}

const fn default_budget_us() -> u64 {
    1_000
}

const fn default_max_agents() -> usize {
    1_000
}

const fn default_true() -> bool {
    true
}
