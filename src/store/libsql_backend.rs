//! libSQL backend — durable `TaskStore` implementation.
//!
//! Supports local file and in-memory databases. Each multi-step operation runs
//! inside one transaction. A single connection is shared, so operations are
//! serialized by an async mutex to keep transactions from interleaving.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::registry::AgentRuntimeRegistration;
use crate::store::migrations;
use crate::store::traits::{QueueList, TaskStore, record_expires_at};
use crate::task::{Task, TaskLease, TaskStats, TaskStatus};

/// libSQL task store.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    op_lock: Mutex<()>,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db)?;
        store.init_schema().await?;
        info!(path = %path.display(), "Task store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Unavailable(format!("Failed to create in-memory database: {e}"))
            })?;

        let store = Self::from_database(db)?;
        store.init_schema().await?;
        Ok(store)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Unavailable(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            op_lock: Mutex::new(()),
        })
    }

    async fn begin(&self) -> Result<Transaction, StoreError> {
        self.conn
            .transaction()
            .await
            .map_err(|e| StoreError::Query(format!("begin transaction: {e}")))
    }
}

/// Commit on success, roll back on failure.
async fn finish_tx<T>(tx: Transaction, result: Result<T, StoreError>) -> Result<T, StoreError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| StoreError::Query(format!("commit: {e}")))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width UTC timestamp so text comparison orders correctly.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn query_err(op: &'static str) -> impl Fn(libsql::Error) -> StoreError {
    move |e| StoreError::Query(format!("{op}: {e}"))
}

fn row_to_task(row: &libsql::Row) -> Result<Task, StoreError> {
    let record: String = row.get(0).map_err(query_err("task row"))?;
    Ok(serde_json::from_str(&record)?)
}

async fn collect_tasks(mut rows: libsql::Rows) -> Result<Vec<Task>, StoreError> {
    let mut tasks = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err("task rows"))? {
        tasks.push(row_to_task(&row)?);
    }
    Ok(tasks)
}

async fn push_entry(conn: &Connection, list: QueueList, id: Uuid) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO queue_entries (list, task_id) VALUES (?1, ?2)",
        params![list.as_str(), id.to_string()],
    )
    .await
    .map_err(query_err("push_entry"))?;
    Ok(())
}

/// Delete the oldest occurrence of `id` in `list`.
async fn remove_one(conn: &Connection, list: QueueList, id: Uuid) -> Result<bool, StoreError> {
    let removed = conn
        .execute(
            "DELETE FROM queue_entries WHERE seq = (
                SELECT seq FROM queue_entries WHERE list = ?1 AND task_id = ?2
                ORDER BY seq LIMIT 1
            )",
            params![list.as_str(), id.to_string()],
        )
        .await
        .map_err(query_err("remove_one"))?;
    Ok(removed > 0)
}

async fn bump(conn: &Connection, counter: &str, delta: i64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE counters SET value = MAX(value + ?1, 0) WHERE name = ?2",
        params![delta, counter],
    )
    .await
    .map_err(query_err("bump counter"))?;
    Ok(())
}

async fn upsert_task(conn: &Connection, task: &Task) -> Result<(), StoreError> {
    let record = serde_json::to_string(task)?;
    conn.execute(
        "INSERT INTO tasks (id, agent_id, status, record, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET status = excluded.status, record = excluded.record",
        params![
            task.id.to_string(),
            task.agent_id.as_str(),
            task.status.as_str(),
            record,
            fmt_ts(task.timestamps.created_at),
            fmt_ts(record_expires_at(task)),
        ],
    )
    .await
    .map_err(query_err("upsert_task"))?;
    Ok(())
}

async fn claim_in(
    conn: &Connection,
    agent_id: &str,
    lease: TaskLease,
) -> Result<Option<Task>, StoreError> {
    let candidate = {
        let mut rows = conn
            .query(
                "SELECT t.record, q.seq FROM queue_entries q
                 JOIN tasks t ON t.id = q.task_id
                 WHERE q.list = 'pending' AND t.agent_id = ?1
                 ORDER BY q.seq LIMIT 1",
                params![agent_id],
            )
            .await
            .map_err(query_err("claim_pending"))?;
        match rows.next().await.map_err(query_err("claim_pending row"))? {
            Some(row) => {
                let seq: i64 = row.get(1).map_err(query_err("claim_pending seq"))?;
                Some((row_to_task(&row)?, seq))
            }
            None => None,
        }
    };
    let Some((mut task, seq)) = candidate else {
        return Ok(None);
    };

    conn.execute("DELETE FROM queue_entries WHERE seq = ?1", params![seq])
        .await
        .map_err(query_err("claim_pending delete"))?;
    push_entry(conn, QueueList::Processing, task.id).await?;

    task.timestamps.updated_at = lease.claimed_at;
    task.lease = Some(lease);
    upsert_task(conn, &task).await?;
    bump(conn, "pending", -1).await?;
    bump(conn, "processing", 1).await?;
    Ok(Some(task))
}

async fn finish_in(conn: &Connection, task: &Task) -> Result<bool, StoreError> {
    if !remove_one(conn, QueueList::Processing, task.id).await? {
        return Ok(false);
    }
    upsert_task(conn, task).await?;
    bump(conn, "processing", -1).await?;
    if task.status == TaskStatus::Completed {
        bump(conn, "completed", 1).await?;
    } else {
        push_entry(conn, QueueList::Failed, task.id).await?;
        bump(conn, "failed", 1).await?;
    }
    Ok(true)
}

async fn release_in(conn: &Connection, task: &Task) -> Result<bool, StoreError> {
    if !remove_one(conn, QueueList::Processing, task.id).await? {
        return Ok(false);
    }
    let mut released = task.clone();
    released.lease = None;
    upsert_task(conn, &released).await?;
    push_entry(conn, QueueList::Pending, task.id).await?;
    bump(conn, "processing", -1).await?;
    bump(conn, "pending", 1).await?;
    Ok(true)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl TaskStore for LibSqlStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        let _guard = self.op_lock.lock().await;
        migrations::run_migrations(&self.conn).await
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let _guard = self.op_lock.lock().await;
        let tx = self.begin().await?;
        let result = async {
            for task in tasks {
                upsert_task(&tx, task).await?;
                push_entry(&tx, QueueList::Pending, task.id).await?;
            }
            let n = tasks.len() as i64;
            bump(&tx, "pending", n).await?;
            bump(&tx, "total", n).await?;
            Ok::<(), StoreError>(())
        }
        .await;
        finish_tx(tx, result).await?;
        debug!(count = tasks.len(), "Tasks inserted");
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn
            .query("SELECT record FROM tasks WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(query_err("get_task"))?;
        match rows.next().await.map_err(query_err("get_task row"))? {
            Some(row) => Ok(Some(row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_task(&self, task: &Task) -> Result<bool, StoreError> {
        let _guard = self.op_lock.lock().await;
        let record = serde_json::to_string(task)?;
        let updated = self
            .conn
            .execute(
                "UPDATE tasks SET status = ?1, record = ?2
                 WHERE id = ?3 AND status NOT IN ('completed', 'failed', 'timeout')",
                params![task.status.as_str(), record, task.id.to_string()],
            )
            .await
            .map_err(query_err("update_task"))?;
        Ok(updated > 0)
    }

    async fn claim_pending(
        &self,
        agent_id: &str,
        lease: TaskLease,
    ) -> Result<Option<Task>, StoreError> {
        let _guard = self.op_lock.lock().await;
        let tx = self.begin().await?;
        let result = claim_in(&tx, agent_id, lease).await;
        finish_tx(tx, result).await
    }

    async fn finish_task(&self, task: &Task) -> Result<bool, StoreError> {
        if !task.status.is_terminal() {
            return Err(StoreError::Query(format!(
                "finish_task: task {} is not terminal ({})",
                task.id, task.status
            )));
        }
        let _guard = self.op_lock.lock().await;
        let tx = self.begin().await?;
        let result = finish_in(&tx, task).await;
        finish_tx(tx, result).await
    }

    async fn release_task(&self, task: &Task) -> Result<bool, StoreError> {
        let _guard = self.op_lock.lock().await;
        let tx = self.begin().await?;
        let result = release_in(&tx, task).await;
        finish_tx(tx, result).await
    }

    async fn processing_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let _guard = self.op_lock.lock().await;
        let rows = self
            .conn
            .query(
                "SELECT t.record FROM queue_entries q
                 JOIN tasks t ON t.id = q.task_id
                 WHERE q.list = 'processing' ORDER BY q.seq",
                (),
            )
            .await
            .map_err(query_err("processing_tasks"))?;
        collect_tasks(rows).await
    }

    async fn list_members(&self, list: QueueList) -> Result<Vec<Uuid>, StoreError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT task_id FROM queue_entries WHERE list = ?1 ORDER BY seq",
                params![list.as_str()],
            )
            .await
            .map_err(query_err("list_members"))?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_members row"))? {
            let id: String = row.get(0).map_err(query_err("list_members id"))?;
            let id = Uuid::parse_str(&id)
                .map_err(|e| StoreError::Serialization(format!("bad task id {id}: {e}")))?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn list_len(&self, list: QueueList) -> Result<usize, StoreError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM queue_entries WHERE list = ?1",
                params![list.as_str()],
            )
            .await
            .map_err(query_err("list_len"))?;
        match rows.next().await.map_err(query_err("list_len row"))? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(query_err("list_len count"))?;
                Ok(count.max(0) as usize)
            }
            None => Ok(0),
        }
    }

    async fn stats(&self) -> Result<TaskStats, StoreError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn
            .query("SELECT name, value FROM counters", ())
            .await
            .map_err(query_err("stats"))?;
        let mut stats = TaskStats::default();
        while let Some(row) = rows.next().await.map_err(query_err("stats row"))? {
            let name: String = row.get(0).map_err(query_err("stats name"))?;
            let value: i64 = row.get(1).map_err(query_err("stats value"))?;
            let value = value.max(0) as u64;
            match name.as_str() {
                "total" => stats.total = value,
                "pending" => stats.pending = value,
                "processing" => stats.processing = value,
                "completed" => stats.completed = value,
                "failed" => stats.failed = value,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let _guard = self.op_lock.lock().await;
        let purged = self
            .conn
            .execute(
                "DELETE FROM tasks WHERE expires_at <= ?1",
                params![fmt_ts(now)],
            )
            .await
            .map_err(query_err("purge_expired"))?;
        Ok(purged as usize)
    }

    async fn upsert_registration(
        &self,
        registration: &AgentRuntimeRegistration,
    ) -> Result<(), StoreError> {
        let _guard = self.op_lock.lock().await;
        let record = serde_json::to_string(registration)?;
        self.conn
            .execute(
                "INSERT INTO agent_registrations (agent_id, runtime_id, record, last_heartbeat_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(agent_id) DO UPDATE SET
                    runtime_id = excluded.runtime_id,
                    record = excluded.record,
                    last_heartbeat_at = excluded.last_heartbeat_at",
                params![
                    registration.agent_id.as_str(),
                    registration.runtime_id.as_str(),
                    record,
                    fmt_ts(registration.heartbeat.last_heartbeat_at),
                ],
            )
            .await
            .map_err(query_err("upsert_registration"))?;
        Ok(())
    }

    async fn get_registration(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentRuntimeRegistration>, StoreError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT record FROM agent_registrations WHERE agent_id = ?1",
                params![agent_id],
            )
            .await
            .map_err(query_err("get_registration"))?;
        match rows.next().await.map_err(query_err("get_registration row"))? {
            Some(row) => {
                let record: String = row.get(0).map_err(query_err("registration record"))?;
                Ok(Some(serde_json::from_str(&record)?))
            }
            None => Ok(None),
        }
    }

    async fn list_registrations(&self) -> Result<Vec<AgentRuntimeRegistration>, StoreError> {
        let _guard = self.op_lock.lock().await;
        let mut rows = self
            .conn
            .query("SELECT record FROM agent_registrations ORDER BY agent_id", ())
            .await
            .map_err(query_err("list_registrations"))?;
        let mut registrations = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_registrations row"))? {
            let record: String = row.get(0).map_err(query_err("registration record"))?;
            registrations.push(serde_json::from_str(&record)?);
        }
        Ok(registrations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::model::fixtures::registration;
    use crate::task::model::fixtures;

    fn lease(now: DateTime<Utc>) -> TaskLease {
        TaskLease {
            runtime_id: "rt-1".to_string(),
            claimed_at: now,
        }
    }

    #[tokio::test]
    async fn insert_updates_records_list_and_counters() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let now = Utc::now();
        let tasks = vec![fixtures::task("agent-a", now), fixtures::task("agent-a", now)];
        store.insert_tasks(&tasks).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!((stats.total, stats.pending), (2, 2));
        assert_eq!(
            store.list_members(QueueList::Pending).await.unwrap(),
            vec![tasks[0].id, tasks[1].id]
        );
        let stored = store.get_task(tasks[1].id).await.unwrap().unwrap();
        assert_eq!(stored, tasks[1]);
    }

    #[tokio::test]
    async fn failed_batch_insert_rolls_back_every_row() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let now = Utc::now();
        let first = fixtures::task("agent-a", now);
        store.insert_tasks(&[first.clone()]).await.unwrap();

        // The counter update runs after every row is written, so it fails last.
        store.conn.execute("DROP TABLE counters", ()).await.unwrap();
        let batch = vec![
            fixtures::task("agent-a", now),
            fixtures::task("agent-a", now),
            fixtures::task("agent-a", now),
        ];
        let err = store.insert_tasks(&batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));

        assert_eq!(
            store.list_members(QueueList::Pending).await.unwrap(),
            vec![first.id]
        );
        for task in &batch {
            assert!(store.get_task(task.id).await.unwrap().is_none());
        }
        let mut rows = store.conn.query("SELECT COUNT(*) FROM tasks", ()).await.unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn claim_then_finish_moves_membership_once() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let now = Utc::now();
        let other = fixtures::task("agent-b", now);
        let task = fixtures::task("agent-a", now);
        store.insert_tasks(&[other.clone(), task.clone()]).await.unwrap();

        let mut claimed = store.claim_pending("agent-a", lease(now)).await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
        assert_eq!(store.list_len(QueueList::Processing).await.unwrap(), 1);
        assert_eq!(store.list_members(QueueList::Pending).await.unwrap(), vec![other.id]);

        claimed.transition_to(TaskStatus::Running, now).unwrap();
        assert!(store.update_task(&claimed).await.unwrap());
        claimed.transition_to(TaskStatus::Failed, now).unwrap();
        assert!(store.finish_task(&claimed).await.unwrap());
        assert!(!store.finish_task(&claimed).await.unwrap());

        let stats = store.stats().await.unwrap();
        assert_eq!(
            (stats.total, stats.pending, stats.processing, stats.failed),
            (2, 1, 0, 1)
        );
        assert_eq!(store.list_members(QueueList::Failed).await.unwrap(), vec![task.id]);
        assert!(!store.update_task(&claimed).await.unwrap());
    }

    #[tokio::test]
    async fn release_and_processing_listing() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let now = Utc::now();
        let task = fixtures::task("agent-a", now);
        store.insert_tasks(std::slice::from_ref(&task)).await.unwrap();
        let claimed = store.claim_pending("agent-a", lease(now)).await.unwrap().unwrap();

        let processing = store.processing_tasks().await.unwrap();
        assert_eq!(processing.len(), 1);
        assert!(processing[0].lease.is_some());

        assert!(store.release_task(&claimed).await.unwrap());
        assert!(store.processing_tasks().await.unwrap().is_empty());
        let stats = store.stats().await.unwrap();
        assert_eq!((stats.pending, stats.processing), (1, 0));
    }

    #[tokio::test]
    async fn purge_and_registry_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("dispatch.db");
        let store = LibSqlStore::new_local(&path).await.unwrap();
        assert!(path.exists());

        let now = Utc::now();
        let old = fixtures::task("agent-a", now - chrono::Duration::days(31));
        store.insert_tasks(std::slice::from_ref(&old)).await.unwrap();
        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(store.get_task(old.id).await.unwrap().is_none());

        let mut reg = registration("agent-a", now);
        store.upsert_registration(&reg).await.unwrap();
        reg.performance.completed_tasks = 7;
        store.upsert_registration(&reg).await.unwrap();

        let all = store.list_registrations().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(
            store
                .get_registration("agent-a")
                .await
                .unwrap()
                .unwrap()
                .performance
                .completed_tasks,
            7
        );
    }
}
