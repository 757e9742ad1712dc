//! Checkpoint mirror and deferred-note queue.
//!
//! SQLite fallback for the git-note checkpoint layer. Git notes are the
//! preferred read path; rows here answer reads when git is unavailable and
//! get repaired when the two disagree.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::database::Database;
use super::now_rfc3339;
use crate::cascade::Phase;
use crate::types::{Result, ResultExt, SessionId, log_filter_error};

/// One mirrored checkpoint row; immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    pub id: i64,
    pub commit_hash: String,
    pub session_id: SessionId,
    pub phase: Phase,
    pub round: u32,
    /// Canonical JSON payload (uncompressed)
    pub payload: String,
    /// SHA-256 of the canonical payload
    pub content_hash: String,
    /// Chains to the prior checkpoint of the session
    pub parent_hash: Option<String>,
    pub created_at: String,
}

impl StoredCheckpoint {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let phase_str: String = row.get(3)?;
        let phase = Phase::try_parse(&phase_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown phase '{}'", phase_str).into(),
            )
        })?;
        Ok(StoredCheckpoint {
            id: row.get(0)?,
            commit_hash: row.get(1)?,
            session_id: SessionId::new(row.get::<_, String>(2)?),
            phase,
            round: row.get::<_, i64>(4)? as u32,
            payload: row.get(5)?,
            content_hash: row.get(6)?,
            parent_hash: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

/// A git-note write waiting for retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredNote {
    pub id: i64,
    pub reflex_id: i64,
    pub commit_hash: Option<String>,
    /// Compressed, base64 note body ready to attach
    pub payload: String,
    pub reason: Option<String>,
    pub retry_count: i64,
}

const CHECKPOINT_COLUMNS: &str = "id, commit_hash, session_id, phase, round, payload, \
                                  content_hash, parent_hash, created_at";

impl Database {
    /// Mirror a checkpoint. The (commit, session, phase, round) uniqueness
    /// constraint makes re-mirroring idempotent: an existing row is
    /// overwritten only when its content hash differs (git wins).
    pub fn upsert_checkpoint(
        &self,
        commit_hash: &str,
        session_id: &SessionId,
        phase: Phase,
        round: u32,
        payload: &str,
        content_hash: &str,
        parent_hash: Option<&str>,
    ) -> Result<StoredCheckpoint> {
        self.conn()?
            .execute(
                "INSERT INTO checkpoints (commit_hash, session_id, phase, round, payload, \
                 content_hash, parent_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(commit_hash, session_id, phase, round) DO UPDATE SET
                     payload = excluded.payload,
                     content_hash = excluded.content_hash,
                     parent_hash = excluded.parent_hash
                 WHERE checkpoints.content_hash != excluded.content_hash",
                params![
                    commit_hash,
                    session_id.as_str(),
                    phase.as_str(),
                    round as i64,
                    payload,
                    content_hash,
                    parent_hash,
                    now_rfc3339(),
                ],
            )
            .with_context("Failed to mirror checkpoint")?;

        self.find_checkpoint(commit_hash, session_id, phase, round)?
            .ok_or_else(|| {
                crate::types::EmpiricaError::Storage("Checkpoint vanished after upsert".to_string())
            })
    }

    pub fn find_checkpoint(
        &self,
        commit_hash: &str,
        session_id: &SessionId,
        phase: Phase,
        round: u32,
    ) -> Result<Option<StoredCheckpoint>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints
                 WHERE commit_hash = ?1 AND session_id = ?2 AND phase = ?3 AND round = ?4"
            ),
            params![commit_hash, session_id.as_str(), phase.as_str(), round as i64],
            StoredCheckpoint::from_row,
        )
        .optional()
        .with_context("Failed to query checkpoint")
    }

    /// Latest mirrored checkpoint of a session regardless of commit.
    pub fn latest_checkpoint(&self, session_id: &SessionId) -> Result<Option<StoredCheckpoint>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints
                 WHERE session_id = ?1 ORDER BY id DESC LIMIT 1"
            ),
            params![session_id.as_str()],
            StoredCheckpoint::from_row,
        )
        .optional()
        .with_context("Failed to query latest checkpoint")
    }

    /// All mirrored checkpoints of a session in write order.
    pub fn list_checkpoints(&self, session_id: &SessionId) -> Result<Vec<StoredCheckpoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE session_id = ?1 ORDER BY id"
        ))?;
        let checkpoints = stmt
            .query_map(params![session_id.as_str()], StoredCheckpoint::from_row)?
            .filter_map(|r| log_filter_error(r, "listing checkpoints"))
            .collect();
        Ok(checkpoints)
    }

    // =========================================================================
    // Deferred note queue
    // =========================================================================

    /// Queue a failed git-note write for the reconciler.
    pub fn defer_note(
        &self,
        reflex_id: i64,
        commit_hash: Option<&str>,
        payload: &str,
        reason: &str,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO deferred_notes (reflex_id, commit_hash, payload, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![reflex_id, commit_hash, payload, reason, now_rfc3339()],
            )
            .with_context("Failed to queue deferred note")?;
        Ok(())
    }

    /// Pending deferred notes, oldest first.
    pub fn pending_deferred_notes(&self, limit: usize) -> Result<Vec<DeferredNote>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, reflex_id, commit_hash, payload, reason, retry_count
             FROM deferred_notes ORDER BY id LIMIT ?1",
        )?;
        let notes = stmt
            .query_map(params![limit as i64], |row| {
                Ok(DeferredNote {
                    id: row.get(0)?,
                    reflex_id: row.get(1)?,
                    commit_hash: row.get(2)?,
                    payload: row.get(3)?,
                    reason: row.get(4)?,
                    retry_count: row.get(5)?,
                })
            })?
            .filter_map(|r| log_filter_error(r, "loading deferred notes"))
            .collect();
        Ok(notes)
    }

    /// Drop a deferred note after a successful retry.
    pub fn clear_deferred_note(&self, id: i64) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM deferred_notes WHERE id = ?1", params![id])
            .with_context("Failed to clear deferred note")?;
        Ok(())
    }

    /// Bump the retry counter after a failed retry.
    pub fn bump_deferred_note_retry(&self, id: i64) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE deferred_notes SET retry_count = retry_count + 1 WHERE id = ?1",
                params![id],
            )
            .with_context("Failed to bump deferred note retry count")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AiId;

    fn session(db: &Database) -> SessionId {
        db.create_session(&AiId::new("agent-A"), 0, None, None, None)
            .expect("session")
            .session_id
    }

    #[test]
    fn test_upsert_idempotent_same_content() {
        let db = Database::open_in_memory().expect("open");
        let sid = session(&db);

        let first = db
            .upsert_checkpoint("abc123", &sid, Phase::Preflight, 1, "{}", "hash-1", None)
            .expect("first");
        let second = db
            .upsert_checkpoint("abc123", &sid, Phase::Preflight, 1, "{}", "hash-1", None)
            .expect("second");
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn test_git_wins_on_disagreement() {
        let db = Database::open_in_memory().expect("open");
        let sid = session(&db);

        db.upsert_checkpoint("abc123", &sid, Phase::Preflight, 1, "{\"v\":1}", "hash-1", None)
            .expect("seed");
        let repaired = db
            .upsert_checkpoint(
                "abc123",
                &sid,
                Phase::Preflight,
                1,
                "{\"v\":2}",
                "hash-2",
                Some("hash-1"),
            )
            .expect("repair");
        assert_eq!(repaired.content_hash, "hash-2");
        assert_eq!(repaired.parent_hash.as_deref(), Some("hash-1"));
    }

    #[test]
    fn test_list_and_latest() {
        let db = Database::open_in_memory().expect("open");
        let sid = session(&db);

        db.upsert_checkpoint("c1", &sid, Phase::Preflight, 1, "{}", "h1", None)
            .expect("one");
        db.upsert_checkpoint("c1", &sid, Phase::Check, 1, "{}", "h2", Some("h1"))
            .expect("two");

        let all = db.list_checkpoints(&sid).expect("list");
        assert_eq!(all.len(), 2);

        let latest = db.latest_checkpoint(&sid).expect("latest").expect("some");
        assert_eq!(latest.phase, Phase::Check);
    }

    #[test]
    fn test_deferred_note_queue() {
        let db = Database::open_in_memory().expect("open");
        let sid = session(&db);
        let reflex = db
            .insert_reflex(crate::store::reflexes::NewReflex {
                session_id: sid.clone(),
                cascade_id: None,
                phase: Phase::Preflight,
                round: 1,
                vectors: crate::vectors::VectorMap {
                    know: 0.5,
                    r#do: 0.5,
                    context: 0.5,
                    clarity: 0.5,
                    coherence: 0.5,
                    signal: 0.5,
                    density: 0.5,
                    state: 0.5,
                    change: 0.5,
                    completion: 0.5,
                    impact: 0.5,
                    engagement: 0.7,
                    uncertainty: 0.3,
                },
                reasoning: "r".to_string(),
                evidence: None,
                decision: None,
                transaction_id: crate::types::TransactionId::generate(),
                project_id: None,
                signature: None,
            })
            .expect("reflex");

        db.defer_note(reflex.id, Some("c1"), "payload-b64", "timeout")
            .expect("defer");

        let pending = db.pending_deferred_notes(10).expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reflex_id, reflex.id);

        db.bump_deferred_note_retry(pending[0].id).expect("bump");
        let bumped = db.pending_deferred_notes(10).expect("pending");
        assert_eq!(bumped[0].retry_count, 1);

        db.clear_deferred_note(pending[0].id).expect("clear");
        assert!(db.pending_deferred_notes(10).expect("pending").is_empty());
    }
}
