//! The agent registry: exclusive owner of all agent records.
//!
//! Every mutation funnels through [`Registry::update`], which applies
//! the caller's mutator to a scratch copy, validates the §3 data-model
//! invariants, and only then commits -- a rejected mutation leaves the
//! record untouched. Shard counters are maintained by calling the
//! balancer while the registry's own lock is held, so the per-shard
//! counts and the agent table can never drift apart.
//!
//! Reads hand out flat [`AgentSnapshot`] copies; no caller ever holds a
//! reference into the table.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use hive_balance::Balancer;
use hive_types::{Agent, AgentId, AgentSnapshot, LifecycleState, ShardId};

use crate::error::RegistryError;
use crate::spawn::{self, SpawnProfile};

/// A dirty agent snapshot paired with the record version it was taken
/// at, so a sync can be confirmed without clobbering newer changes.
#[derive(Debug, Clone)]
pub struct DirtySnapshot {
    /// The agent state to persist.
    pub snapshot: AgentSnapshot,
    /// Version counter at snapshot time.
    pub version: u64,
}

/// One table entry: the record plus its mutation counter.
#[derive(Debug)]
struct Entry {
    agent: Agent,
    version: u64,
}

/// Registry state behind the lock.
#[derive(Debug, Default)]
struct RegistryInner {
    agents: BTreeMap<AgentId, Entry>,
    teams: BTreeMap<u32, BTreeSet<AgentId>>,
}

/// The agent registry.
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
    balancer: Arc<Balancer>,
    max_agents: usize,
}

impl Registry {
    /// Build a registry that consults `balancer` for shard placement
    /// and refuses to grow beyond `max_agents`.
    pub fn new(balancer: Arc<Balancer>, max_agents: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            balancer,
            max_agents: max_agents.max(1),
        }
    }

    /// The balancer this registry shares with the scheduler.
    pub fn balancer(&self) -> &Arc<Balancer> {
        &self.balancer
    }

    /// Create one agent from a spawn profile.
    ///
    /// The balancer picks the shard (honoring `shard_hint` while that
    /// shard has room); the generated record is validated and inserted
    /// dirty so the next persistence sweep picks it up.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityExceeded`] when the registry is
    /// at `max_agents` or no shard can accept the agent.
    pub fn create(
        &self,
        profile: &SpawnProfile,
        shard_hint: Option<ShardId>,
    ) -> Result<AgentSnapshot, RegistryError> {
        let mut inner = self.write();
        if inner.agents.len() >= self.max_agents {
            return Err(RegistryError::CapacityExceeded);
        }

        let shard_id = self.balancer.assign(shard_hint)?;
        let mut rng = rand::rng();
        let agent = spawn::generate_agent(profile, shard_id, &mut rng);

        if let Err(message) = validate(&agent) {
            // Generated agents are always valid; this guards refactors.
            let _ = self.balancer.release(shard_id);
            return Err(RegistryError::InvariantViolation(message));
        }

        let id = agent.id;
        if agent.team_id > 0 {
            inner.teams.entry(agent.team_id).or_default().insert(id);
        }
        let snapshot = agent.snapshot();
        inner.agents.insert(id, Entry { agent, version: 1 });

        debug!(agent_id = %id, shard = %shard_id, "Agent created");
        Ok(snapshot)
    }

    /// Fetch an immutable copy of one agent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids.
    pub fn get(&self, id: AgentId) -> Result<AgentSnapshot, RegistryError> {
        self.read()
            .agents
            .get(&id)
            .map(|entry| entry.agent.snapshot())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Snapshots for the given ids; unknown ids are skipped.
    pub fn get_many(&self, ids: &[AgentId]) -> Vec<AgentSnapshot> {
        let inner = self.read();
        ids.iter()
            .filter_map(|id| inner.agents.get(id).map(|entry| entry.agent.snapshot()))
            .collect()
    }

    /// Snapshots of every agent, optionally restricted to one shard.
    pub fn list(&self, shard: Option<ShardId>) -> Vec<AgentSnapshot> {
        self.read()
            .agents
            .values()
            .filter(|entry| shard.is_none_or(|s| entry.agent.shard_id == s))
            .map(|entry| entry.agent.snapshot())
            .collect()
    }

    /// Apply a mutation to one agent under the registry lock.
    ///
    /// The mutator runs against a scratch copy; if the result violates
    /// any invariant the original record is kept and
    /// [`RegistryError::InvariantViolation`] is returned. On success the
    /// record is committed with its dirty flag set and its version
    /// bumped, and team rosters are kept consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids and
    /// [`RegistryError::InvariantViolation`] for rejected mutations.
    pub fn update<R>(
        &self,
        id: AgentId,
        mutator: impl FnOnce(&mut Agent) -> R,
    ) -> Result<R, RegistryError> {
        let mut inner = self.write();
        let entry = inner.agents.get(&id).ok_or(RegistryError::NotFound(id))?;

        let mut scratch = entry.agent.clone();
        let result = mutator(&mut scratch);

        validate_transition(&entry.agent, &scratch)
            .map_err(RegistryError::InvariantViolation)?;

        let old_team = entry.agent.team_id;
        let new_team = scratch.team_id;
        scratch.dirty = true;

        if let Some(entry) = inner.agents.get_mut(&id) {
            entry.agent = scratch;
            entry.version = entry.version.saturating_add(1);
        }
        if old_team != new_team {
            move_roster(&mut inner, id, old_team, new_team);
        }

        Ok(result)
    }

    /// Bring a dead agent back: full vitals, `Returning` state.
    ///
    /// This is the only path out of the `Dead` state.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids and
    /// [`RegistryError::InvariantViolation`] if the agent is not dead.
    pub fn respawn(&self, id: AgentId) -> Result<AgentSnapshot, RegistryError> {
        let mut inner = self.write();
        let entry = inner
            .agents
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        if entry.agent.state != LifecycleState::Dead {
            return Err(RegistryError::InvariantViolation(format!(
                "respawn on living agent {id}"
            )));
        }
        entry.agent.vitals.hp = entry.agent.vitals.max_hp;
        entry.agent.vitals.mp = entry.agent.vitals.max_mp;
        entry.agent.state = LifecycleState::Returning;
        entry.agent.dirty = true;
        entry.version = entry.version.saturating_add(1);
        info!(agent_id = %id, "Agent respawned");
        Ok(entry.agent.snapshot())
    }

    /// Remove an agent, releasing its shard slot and roster entry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids.
    pub fn delete(&self, id: AgentId) -> Result<AgentSnapshot, RegistryError> {
        let mut inner = self.write();
        let entry = inner.agents.remove(&id).ok_or(RegistryError::NotFound(id))?;
        let team = entry.agent.team_id;
        if team > 0 {
            move_roster(&mut inner, id, team, 0);
        }
        if let Err(error) = self.balancer.release(entry.agent.shard_id) {
            warn!(agent_id = %id, %error, "Shard release failed during delete");
        }
        debug!(agent_id = %id, "Agent deleted");
        Ok(entry.agent.snapshot())
    }

    /// Remove every member of a team; returns the removed snapshots.
    pub fn delete_team(&self, team_id: u32) -> Vec<AgentSnapshot> {
        let members: Vec<AgentId> = {
            let inner = self.read();
            inner
                .teams
                .get(&team_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        };
        members
            .into_iter()
            .filter_map(|id| self.delete(id).ok())
            .collect()
    }

    /// Move a set of agents onto one team roster.
    ///
    /// Fails atomically: if any id is unknown, nothing changes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] naming the first unknown id.
    pub fn assign_team(&self, ids: &[AgentId], team_id: u32) -> Result<(), RegistryError> {
        let mut inner = self.write();
        for id in ids {
            if !inner.agents.contains_key(id) {
                return Err(RegistryError::NotFound(*id));
            }
        }
        for id in ids {
            let old_team = inner.agents.get(id).map_or(0, |entry| entry.agent.team_id);
            if let Some(entry) = inner.agents.get_mut(id) {
                entry.agent.team_id = team_id;
                entry.agent.dirty = true;
                entry.version = entry.version.saturating_add(1);
            }
            if old_team != team_id {
                move_roster(&mut inner, *id, old_team, team_id);
            }
        }
        Ok(())
    }

    /// The members of a team.
    pub fn team_members(&self, team_id: u32) -> Vec<AgentId> {
        self.read()
            .teams
            .get(&team_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Agent ids grouped by shard, for the balance task.
    pub fn population_by_shard(&self) -> BTreeMap<ShardId, Vec<AgentId>> {
        let inner = self.read();
        let mut population: BTreeMap<ShardId, Vec<AgentId>> = BTreeMap::new();
        for (id, entry) in &inner.agents {
            population.entry(entry.agent.shard_id).or_default().push(*id);
        }
        population
    }

    /// Move one agent to another shard, updating both the record and
    /// the balancer counters under the registry lock.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown agents and
    /// [`RegistryError::InvariantViolation`] for unknown shards.
    pub fn migrate(&self, id: AgentId, to: ShardId) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let entry = inner
            .agents
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        let from = entry.agent.shard_id;
        if from == to {
            return Ok(());
        }
        self.balancer.record_migration(from, to)?;
        entry.agent.shard_id = to;
        entry.agent.dirty = true;
        entry.version = entry.version.saturating_add(1);
        debug!(agent_id = %id, %from, %to, "Agent migrated");
        Ok(())
    }

    /// Collect up to `max` dirty agents for persistence, oldest ids
    /// first. Dirty flags are *not* cleared here; call
    /// [`Registry::mark_synced`] after the batch commits.
    pub fn collect_dirty(&self, max: usize) -> Vec<DirtySnapshot> {
        self.read()
            .agents
            .values()
            .filter(|entry| entry.agent.dirty)
            .take(max)
            .map(|entry| DirtySnapshot {
                snapshot: entry.agent.snapshot(),
                version: entry.version,
            })
            .collect()
    }

    /// Confirm a committed batch: clears the dirty flag of every agent
    /// whose version still matches the snapshot. Agents mutated again
    /// during the batch keep their dirty flag and are re-included in
    /// the next sweep.
    pub fn mark_synced(&self, confirmed: &[(AgentId, u64)], at: DateTime<Utc>) {
        let mut inner = self.write();
        for (id, version) in confirmed {
            if let Some(entry) = inner.agents.get_mut(id)
                && entry.version == *version
            {
                entry.agent.dirty = false;
                entry.agent.last_db_sync_at = Some(at);
            }
        }
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.read().agents.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.read().agents.is_empty()
    }

    /// Take the read lock, recovering from poisoning.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Take the write lock, recovering from poisoning.
    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Move an agent between team rosters; team 0 means "no roster".
fn move_roster(inner: &mut RegistryInner, id: AgentId, from: u32, to: u32) {
    if from > 0
        && let Some(roster) = inner.teams.get_mut(&from)
    {
        roster.remove(&id);
        if roster.is_empty() {
            inner.teams.remove(&from);
        }
    }
    if to > 0 {
        inner.teams.entry(to).or_default().insert(id);
    }
}

/// Validate a standalone record against the data-model invariants.
fn validate(agent: &Agent) -> Result<(), String> {
    if agent.vitals.hp > agent.vitals.max_hp {
        return Err(format!(
            "hp {} exceeds max_hp {}",
            agent.vitals.hp, agent.vitals.max_hp
        ));
    }
    if agent.vitals.mp > agent.vitals.max_mp {
        return Err(format!(
            "mp {} exceeds max_mp {}",
            agent.vitals.mp, agent.vitals.max_mp
        ));
    }
    let dead = agent.state == LifecycleState::Dead;
    if dead != (agent.vitals.hp == 0) {
        return Err(format!(
            "state {} inconsistent with hp {}",
            agent.state, agent.vitals.hp
        ));
    }
    if agent.name.is_empty() || agent.name.chars().count() > 6 {
        return Err(format!("display name out of bounds: {:?}", agent.name));
    }
    if !agent.traits.in_bounds() {
        return Err(String::from("trait vector out of [0, 1]"));
    }
    Ok(())
}

/// Validate a mutation from `old` to `new`.
fn validate_transition(old: &Agent, new: &Agent) -> Result<(), String> {
    validate(new)?;
    if new.id != old.id {
        return Err(String::from("agent id is immutable"));
    }
    if new.shard_id != old.shard_id {
        return Err(String::from("shard changes must go through migrate"));
    }
    if old.state == LifecycleState::Dead && new.state != LifecycleState::Dead {
        return Err(String::from("leaving the dead state requires a respawn"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hive_balance::{Balancer, BalancerConfig};
    use hive_types::{Academy, Department, StrategyKind};

    use super::*;

    fn registry() -> Registry {
        registry_with_max(1000)
    }

    fn registry_with_max(max_agents: usize) -> Registry {
        let balancer = Arc::new(Balancer::new(&BalancerConfig::default()));
        Registry::new(balancer, max_agents)
    }

    fn profile() -> SpawnProfile {
        SpawnProfile {
            academy: Academy::Seongmun,
            department: Department::Sword,
            team_id: 0,
            level: 1,
            strategy: StrategyKind::Utility,
        }
    }

    #[test]
    fn create_get_delete_roundtrip() {
        let registry = registry();
        let snapshot = registry.create(&profile(), None).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.balancer().total_count(), 1);

        let fetched = registry.get(snapshot.id).unwrap();
        assert_eq!(fetched.id, snapshot.id);

        registry.delete(snapshot.id).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.balancer().total_count(), 0);
        assert_eq!(
            registry.get(snapshot.id),
            Err(RegistryError::NotFound(snapshot.id))
        );
    }

    #[test]
    fn registry_capacity_is_enforced() {
        let registry = registry_with_max(2);
        registry.create(&profile(), None).unwrap();
        registry.create(&profile(), None).unwrap();
        assert_eq!(
            registry.create(&profile(), None),
            Err(RegistryError::CapacityExceeded)
        );
        // The failed create must not leak a shard slot.
        assert_eq!(registry.balancer().total_count(), 2);
    }

    #[test]
    fn update_commits_valid_mutations() {
        let registry = registry();
        let id = registry.create(&profile(), None).unwrap().id;

        registry
            .update(id, |agent| {
                agent.vitals.hp = 500;
                agent.state = LifecycleState::Fighting;
            })
            .unwrap();

        let snapshot = registry.get(id).unwrap();
        assert_eq!(snapshot.hp, 500);
        assert_eq!(snapshot.state, LifecycleState::Fighting);
    }

    #[test]
    fn update_rolls_back_invariant_violations() {
        let registry = registry();
        let id = registry.create(&profile(), None).unwrap().id;
        let before = registry.get(id).unwrap();

        let result = registry.update(id, |agent| {
            agent.vitals.hp = agent.vitals.max_hp.saturating_mul(2);
        });
        assert!(matches!(result, Err(RegistryError::InvariantViolation(_))));
        assert_eq!(registry.get(id).unwrap().hp, before.hp);
    }

    #[test]
    fn dead_state_requires_zero_hp_and_respawn() {
        let registry = registry();
        let id = registry.create(&profile(), None).unwrap().id;

        // hp 0 with a living state is rejected.
        let result = registry.update(id, |agent| agent.vitals.hp = 0);
        assert!(matches!(result, Err(RegistryError::InvariantViolation(_))));

        // Proper death: hp 0 and state together.
        registry
            .update(id, |agent| {
                agent.vitals.hp = 0;
                agent.state = LifecycleState::Dead;
            })
            .unwrap();

        // No sneaking back to life through update.
        let result = registry.update(id, |agent| {
            agent.vitals.hp = 10;
            agent.state = LifecycleState::Idle;
        });
        assert!(matches!(result, Err(RegistryError::InvariantViolation(_))));

        // Respawn is the sanctioned path.
        let snapshot = registry.respawn(id).unwrap();
        assert_eq!(snapshot.state, LifecycleState::Returning);
        assert_eq!(snapshot.hp, snapshot.max_hp);
    }

    #[test]
    fn shard_changes_require_migrate() {
        let registry = registry();
        let id = registry.create(&profile(), None).unwrap().id;
        let from = registry.get(id).unwrap().shard_id;

        let result = registry.update(id, |agent| agent.shard_id = ShardId(99));
        assert!(matches!(result, Err(RegistryError::InvariantViolation(_))));

        let to = ShardId(if from.0 == 1 { 2 } else { 1 });
        registry.migrate(id, to).unwrap();
        assert_eq!(registry.get(id).unwrap().shard_id, to);

        // Counters follow the move.
        let counts = registry.balancer().counts();
        assert_eq!(counts.get(&to).copied(), Some(1));
        assert_eq!(counts.get(&from).copied(), Some(0));
    }

    #[test]
    fn team_rosters_stay_consistent() {
        let registry = registry();
        let a = registry.create(&profile(), None).unwrap().id;
        let b = registry.create(&profile(), None).unwrap().id;

        registry.assign_team(&[a, b], 7).unwrap();
        let mut members = registry.team_members(7);
        members.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(members, expected);

        // Moving one agent out of the team updates the roster.
        registry.update(a, |agent| agent.team_id = 0).unwrap();
        assert_eq!(registry.team_members(7), vec![b]);

        // Deleting the team removes everyone on it.
        let removed = registry.delete_team(7);
        assert_eq!(removed.len(), 1);
        assert!(registry.team_members(7).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn assign_team_is_atomic() {
        let registry = registry();
        let a = registry.create(&profile(), None).unwrap().id;
        let ghost = AgentId::new();

        assert_eq!(
            registry.assign_team(&[a, ghost], 3),
            Err(RegistryError::NotFound(ghost))
        );
        assert!(registry.team_members(3).is_empty());
        assert_eq!(registry.get(a).unwrap().team_id, 0);
    }

    #[test]
    fn dirty_tracking_survives_concurrent_mutation() {
        let registry = registry();
        let id = registry.create(&profile(), None).unwrap().id;

        let batch = registry.collect_dirty(10);
        assert_eq!(batch.len(), 1);
        let version = batch.first().unwrap().version;

        // The agent is mutated again while the "batch" is in flight.
        registry
            .update(id, |agent| agent.vitals.mp = agent.vitals.mp.saturating_sub(1))
            .unwrap();

        registry.mark_synced(&[(id, version)], Utc::now());

        // Still dirty: the sync confirmed a stale version.
        let next = registry.collect_dirty(10);
        assert_eq!(next.len(), 1);

        let current = next.first().unwrap().version;
        registry.mark_synced(&[(id, current)], Utc::now());
        assert!(registry.collect_dirty(10).is_empty());
    }

    #[test]
    fn balancer_accounting_matches_registry() {
        let registry = registry();
        let mut ids = Vec::new();
        for _ in 0..50 {
            ids.push(registry.create(&profile(), None).unwrap().id);
        }
        for id in ids.iter().take(20) {
            registry.delete(*id).unwrap();
        }
        assert_eq!(
            registry.balancer().total_count(),
            u64::try_from(registry.len()).unwrap_or(u64::MAX)
        );
    }

    #[test]
    fn list_filters_by_shard() {
        let registry = registry();
        for _ in 0..12 {
            registry.create(&profile(), None).unwrap();
        }
        let all = registry.list(None);
        assert_eq!(all.len(), 12);

        let by_shard = registry.population_by_shard();
        let summed: usize = by_shard.values().map(Vec::len).sum();
        assert_eq!(summed, 12);

        for (shard, members) in by_shard {
            assert_eq!(registry.list(Some(shard)).len(), members.len());
        }
    }
}
