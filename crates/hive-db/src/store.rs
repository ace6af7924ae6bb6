//! Agent, event, and shard-status stores over the shared pool.
//!
//! All queries are runtime-constructed and parameterized. Upserts are
//! MERGE-equivalent `INSERT ... ON CONFLICT (id) DO UPDATE`; batched
//! upserts run inside one transaction and roll back as a unit.

use chrono::{DateTime, Utc};
use sqlx::Row;

use hive_types::{
    Academy, AgentId, AgentSnapshot, Department, LifecycleState, Position, ShardId, ShardRecord,
    StrategyKind,
};

use crate::error::DbError;
use crate::postgres::PostgresPool;

/// Upsert statement for one agent row.
const UPSERT_AGENT: &str = "
INSERT INTO agents (
    id, name, academy, department, team_id, shard_id, level,
    hp, max_hp, mp, max_mp, xp, pos_x, pos_y, pos_z, state,
    aggression, intelligence, sociability, created_at, last_update
) VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
    $14, $15, $16, $17, $18, $19, $20, $21
)
ON CONFLICT (id) DO UPDATE SET
    name = EXCLUDED.name,
    academy = EXCLUDED.academy,
    department = EXCLUDED.department,
    team_id = EXCLUDED.team_id,
    shard_id = EXCLUDED.shard_id,
    level = EXCLUDED.level,
    hp = EXCLUDED.hp,
    max_hp = EXCLUDED.max_hp,
    mp = EXCLUDED.mp,
    max_mp = EXCLUDED.max_mp,
    xp = EXCLUDED.xp,
    pos_x = EXCLUDED.pos_x,
    pos_y = EXCLUDED.pos_y,
    pos_z = EXCLUDED.pos_z,
    state = EXCLUDED.state,
    aggression = EXCLUDED.aggression,
    intelligence = EXCLUDED.intelligence,
    sociability = EXCLUDED.sociability,
    last_update = EXCLUDED.last_update
";

/// The agent store.
#[derive(Clone)]
pub struct AgentStore {
    pool: PostgresPool,
}

impl AgentStore {
    /// Build a store over the shared pool.
    pub const fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    /// The underlying pool handle.
    pub const fn pool(&self) -> &PostgresPool {
        &self.pool
    }

    /// Upsert one agent snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] on query failure.
    pub async fn upsert_agent(&self, snapshot: &AgentSnapshot) -> Result<(), DbError> {
        bind_agent(sqlx::query(UPSERT_AGENT), snapshot)?
            .execute(self.pool.pool())
            .await?;
        Ok(())
    }

    /// Upsert a batch of snapshots inside a single transaction.
    ///
    /// A failure on any row rolls the whole batch back.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::BatchFailed`] naming the failing row.
    pub async fn upsert_agents(&self, batch: &[AgentSnapshot]) -> Result<(), DbError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut transaction = self.pool.pool().begin().await?;
        for snapshot in batch {
            let query = bind_agent(sqlx::query(UPSERT_AGENT), snapshot)?;
            if let Err(error) = query.execute(&mut *transaction).await {
                transaction.rollback().await?;
                return Err(DbError::BatchFailed(format!(
                    "agent {}: {error}",
                    snapshot.id
                )));
            }
        }
        transaction.commit().await?;
        tracing::debug!(rows = batch.len(), "Agent batch committed");
        Ok(())
    }

    /// Load agents, optionally restricted to one shard.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] on query failure or
    /// [`DbError::Conversion`] for unreadable rows.
    pub async fn load_agents(&self, shard: Option<ShardId>) -> Result<Vec<AgentSnapshot>, DbError> {
        let rows = match shard {
            Some(shard) => {
                sqlx::query("SELECT * FROM agents WHERE shard_id = $1")
                    .bind(i32::from(shard.0))
                    .fetch_all(self.pool.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM agents")
                    .fetch_all(self.pool.pool())
                    .await?
            }
        };
        rows.iter().map(row_to_snapshot).collect()
    }

    /// Append one event to the log.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] on query failure.
    pub async fn log_event(
        &self,
        agent_id: AgentId,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DbError> {
        sqlx::query("INSERT INTO agent_events (agent_id, kind, payload, at) VALUES ($1, $2, $3, $4)")
            .bind(agent_id.into_inner())
            .bind(kind)
            .bind(payload)
            .bind(Utc::now())
            .execute(self.pool.pool())
            .await?;
        Ok(())
    }

    /// Delete offline agents whose last update predates `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] on query failure.
    pub async fn delete_stale_agents(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM agents WHERE state = $1 AND last_update < $2")
            .bind(i32::from(LifecycleState::Offline.code()))
            .bind(cutoff)
            .execute(self.pool.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete event-log rows older than `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] on query failure.
    pub async fn delete_old_events(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM agent_events WHERE at < $1")
            .bind(cutoff)
            .execute(self.pool.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Upsert the per-shard occupancy snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] on query failure.
    pub async fn upsert_server_status(&self, shards: &[ShardRecord]) -> Result<(), DbError> {
        for shard in shards {
            sqlx::query(
                "INSERT INTO server_status (shard_id, name, current_count, capacity, last_update)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (shard_id) DO UPDATE SET
                     current_count = EXCLUDED.current_count,
                     capacity = EXCLUDED.capacity,
                     last_update = EXCLUDED.last_update",
            )
            .bind(i32::from(shard.id.0))
            .bind(format!("shard-{}", shard.id))
            .bind(to_i32(shard.current)?)
            .bind(to_i32(shard.capacity)?)
            .bind(Utc::now())
            .execute(self.pool.pool())
            .await?;
        }
        Ok(())
    }
}

/// Bind one snapshot's columns onto the upsert query.
fn bind_agent<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    snapshot: &'q AgentSnapshot,
) -> Result<sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>, DbError> {
    Ok(query
        .bind(snapshot.id.into_inner())
        .bind(&snapshot.name)
        .bind(i32::from(snapshot.academy.code()))
        .bind(i32::from(snapshot.department.code()))
        .bind(to_i32(snapshot.team_id)?)
        .bind(i32::from(snapshot.shard_id.0))
        .bind(to_i32(snapshot.level)?)
        .bind(to_i32(snapshot.hp)?)
        .bind(to_i32(snapshot.max_hp)?)
        .bind(to_i32(snapshot.mp)?)
        .bind(to_i32(snapshot.max_mp)?)
        .bind(to_i64(snapshot.xp)?)
        .bind(snapshot.position.x)
        .bind(snapshot.position.y)
        .bind(snapshot.position.z)
        .bind(i32::from(snapshot.state.code()))
        .bind(snapshot.aggression)
        .bind(snapshot.intelligence)
        .bind(snapshot.sociability)
        .bind(snapshot.created_at)
        .bind(snapshot.last_update))
}

/// Decode one `agents` row into a snapshot.
///
/// Columns the in-memory record tracks but the table does not (facing,
/// map id, strategy) come back as defaults.
fn row_to_snapshot(row: &sqlx::postgres::PgRow) -> Result<AgentSnapshot, DbError> {
    let academy_code: i32 = row.try_get("academy")?;
    let department_code: i32 = row.try_get("department")?;
    let state_code: i32 = row.try_get("state")?;

    let academy = u8::try_from(academy_code)
        .ok()
        .and_then(|code| Academy::try_from(code).ok())
        .ok_or_else(|| DbError::Conversion(format!("bad academy code {academy_code}")))?;
    let department = u8::try_from(department_code)
        .ok()
        .and_then(|code| Department::try_from(code).ok())
        .ok_or_else(|| DbError::Conversion(format!("bad department code {department_code}")))?;
    let state = i16::try_from(state_code)
        .ok()
        .and_then(LifecycleState::from_code)
        .ok_or_else(|| DbError::Conversion(format!("bad state code {state_code}")))?;

    let id: uuid::Uuid = row.try_get("id")?;

    Ok(AgentSnapshot {
        id: AgentId::from(id),
        name: row.try_get("name")?,
        academy,
        department,
        team_id: from_i32(row.try_get("team_id")?)?,
        shard_id: ShardId(
            u16::try_from(row.try_get::<i32, _>("shard_id")?)
                .map_err(|_| DbError::Conversion(String::from("bad shard id")))?,
        ),
        level: from_i32(row.try_get("level")?)?,
        hp: from_i32(row.try_get("hp")?)?,
        max_hp: from_i32(row.try_get("max_hp")?)?,
        mp: from_i32(row.try_get("mp")?)?,
        max_mp: from_i32(row.try_get("max_mp")?)?,
        xp: u64::try_from(row.try_get::<i64, _>("xp")?).unwrap_or(0),
        position: Position::new(
            row.try_get("pos_x")?,
            row.try_get("pos_y")?,
            row.try_get("pos_z")?,
        ),
        facing: 0.0,
        map_id: 1,
        aggression: row.try_get("aggression")?,
        intelligence: row.try_get("intelligence")?,
        sociability: row.try_get("sociability")?,
        state,
        strategy: StrategyKind::default(),
        created_at: row.try_get("created_at")?,
        last_update: row.try_get("last_update")?,
    })
}

/// Checked `u32 -> i32` conversion.
fn to_i32(value: u32) -> Result<i32, DbError> {
    i32::try_from(value).map_err(|_| DbError::Conversion(format!("{value} overflows INT")))
}

/// Checked `u64 -> i64` conversion.
fn to_i64(value: u64) -> Result<i64, DbError> {
    i64::try_from(value).map_err(|_| DbError::Conversion(format!("{value} overflows BIGINT")))
}

/// Checked `i32 -> u32` conversion.
fn from_i32(value: i32) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_| DbError::Conversion(format!("{value} is negative")))
}
