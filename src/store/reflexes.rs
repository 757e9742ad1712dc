//! Reflex repository.
//!
//! Reflexes are append-only: one row per (transaction, phase, round),
//! immutable after insert. Timestamps within a cascade are monotone.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::database::Database;
use super::now_rfc3339;
use crate::cascade::{CheckDecision, Phase, TransactionProgress};
use crate::types::{
    CascadeId, EmpiricaError, Result, ResultExt, SessionId, TransactionId, log_filter_error,
};
use crate::vectors::VectorMap;

/// The atomic record of one self-assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflex {
    pub id: i64,
    pub session_id: SessionId,
    pub cascade_id: Option<CascadeId>,
    pub phase: Phase,
    pub round: u32,
    pub timestamp: String,
    pub vectors: VectorMap,
    pub reasoning: String,
    pub evidence: Option<serde_json::Value>,
    pub decision: Option<CheckDecision>,
    pub transaction_id: TransactionId,
    pub project_id: Option<String>,
    /// Signature block JSON when the reflex was signed
    pub signature: Option<serde_json::Value>,
}

/// Insert request; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewReflex {
    pub session_id: SessionId,
    pub cascade_id: Option<CascadeId>,
    pub phase: Phase,
    pub round: u32,
    pub vectors: VectorMap,
    pub reasoning: String,
    pub evidence: Option<serde_json::Value>,
    pub decision: Option<CheckDecision>,
    pub transaction_id: TransactionId,
    pub project_id: Option<String>,
    pub signature: Option<serde_json::Value>,
}

const REFLEX_COLUMNS: &str = "id, session_id, cascade_id, phase, round, timestamp, \
                              know, do_score, context, clarity, coherence, signal, density, \
                              state, change, completion, impact, engagement, uncertainty, \
                              reasoning, evidence, decision, transaction_id, project_id, signature";

impl Reflex {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let phase_str: String = row.get(3)?;
        let phase = Phase::try_parse(&phase_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown phase '{}'", phase_str).into(),
            )
        })?;

        let evidence: Option<String> = row.get(20)?;
        let decision: Option<String> = row.get(21)?;
        let signature: Option<String> = row.get(24)?;

        Ok(Reflex {
            id: row.get(0)?,
            session_id: SessionId::new(row.get::<_, String>(1)?),
            cascade_id: row.get::<_, Option<String>>(2)?.map(CascadeId::new),
            phase,
            round: row.get::<_, i64>(4)? as u32,
            timestamp: row.get(5)?,
            vectors: VectorMap {
                know: row.get(6)?,
                r#do: row.get(7)?,
                context: row.get(8)?,
                clarity: row.get(9)?,
                coherence: row.get(10)?,
                signal: row.get(11)?,
                density: row.get(12)?,
                state: row.get(13)?,
                change: row.get(14)?,
                completion: row.get(15)?,
                impact: row.get(16)?,
                engagement: row.get(17)?,
                uncertainty: row.get(18)?,
            },
            reasoning: row.get(19)?,
            evidence: evidence.and_then(|s| serde_json::from_str(&s).ok()),
            decision: decision.as_deref().and_then(CheckDecision::try_parse),
            transaction_id: TransactionId::new(row.get::<_, String>(22)?),
            project_id: row.get(23)?,
            signature: signature.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }
}

/// Callback producing a signature block once the reflex timestamp is fixed.
///
/// Signing needs the exact timestamp that lands in the row; the store owns
/// timestamp assignment, so the signer runs inside the insert transaction.
pub type ReflexSignerFn<'s> = &'s (dyn Fn(&str) -> Result<serde_json::Value> + Sync);

impl Database {
    /// Append a reflex row atomically and return the stored record.
    ///
    /// The uniqueness constraint on (session, transaction, phase, round) is
    /// the last line of defence; the cascade engine rejects duplicates
    /// before they get here.
    pub fn insert_reflex(&self, new: NewReflex) -> Result<Reflex> {
        self.insert_reflex_signed(new, None)
    }

    /// Append a reflex, invoking `signer` with the assigned timestamp to
    /// produce the stored signature block.
    pub fn insert_reflex_signed(
        &self,
        new: NewReflex,
        signer: Option<ReflexSignerFn<'_>>,
    ) -> Result<Reflex> {
        new.vectors.validate()?;

        let signer = std::panic::AssertUnwindSafe(signer);
        let reflex = self.transaction(move |conn| {
            let signer = &signer;
            // Monotone timestamps within the transaction even if the wall
            // clock steps backwards between submissions.
            let last_ts: Option<String> = conn
                .query_row(
                    "SELECT MAX(timestamp) FROM reflexes WHERE transaction_id = ?1",
                    params![new.transaction_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .with_context("Failed to read last reflex timestamp")?
                .flatten();
            let timestamp = match last_ts {
                Some(last) => now_rfc3339().max(last),
                None => now_rfc3339(),
            };

            let signature_value = match signer.0 {
                Some(sign) => Some(sign(&timestamp)?),
                None => new.signature.clone(),
            };

            let evidence = new
                .evidence
                .as_ref()
                .map(|v| serde_json::to_string(v))
                .transpose()?;
            let signature = signature_value
                .as_ref()
                .map(|v| serde_json::to_string(v))
                .transpose()?;

            conn.execute(
                "INSERT INTO reflexes (session_id, cascade_id, phase, round, timestamp, \
                 know, do_score, context, clarity, coherence, signal, density, \
                 state, change, completion, impact, engagement, uncertainty, \
                 reasoning, evidence, decision, transaction_id, project_id, signature)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                         ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
                params![
                    new.session_id.as_str(),
                    new.cascade_id.as_ref().map(|c| c.as_str()),
                    new.phase.as_str(),
                    new.round as i64,
                    timestamp,
                    new.vectors.know,
                    new.vectors.r#do,
                    new.vectors.context,
                    new.vectors.clarity,
                    new.vectors.coherence,
                    new.vectors.signal,
                    new.vectors.density,
                    new.vectors.state,
                    new.vectors.change,
                    new.vectors.completion,
                    new.vectors.impact,
                    new.vectors.engagement,
                    new.vectors.uncertainty,
                    new.reasoning,
                    evidence,
                    new.decision.map(|d| d.as_str()),
                    new.transaction_id.as_str(),
                    new.project_id,
                    signature,
                ],
            )
            .with_context("Failed to insert reflex")?;

            let id = conn.last_insert_rowid();
            Ok(Reflex {
                id,
                session_id: new.session_id.clone(),
                cascade_id: new.cascade_id.clone(),
                phase: new.phase,
                round: new.round,
                timestamp,
                vectors: new.vectors,
                reasoning: new.reasoning.clone(),
                evidence: new.evidence.clone(),
                decision: new.decision,
                transaction_id: new.transaction_id.clone(),
                project_id: new.project_id.clone(),
                signature: signature_value,
            })
        })?;

        tracing::debug!(
            reflex_id = reflex.id,
            phase = %reflex.phase,
            round = reflex.round,
            "Reflex recorded"
        );
        Ok(reflex)
    }

    /// Fetch one reflex by store id.
    pub fn get_reflex(&self, id: i64) -> Result<Reflex> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {REFLEX_COLUMNS} FROM reflexes WHERE id = ?1"),
            params![id],
            Reflex::from_row,
        )
        .optional()
        .with_context("Failed to query reflex")?
        .ok_or_else(|| EmpiricaError::Validation(format!("Reflex not found: {}", id)))
    }

    /// Fetch one reflex by its (session, transaction, phase, round) identity.
    pub fn find_reflex(
        &self,
        session_id: &SessionId,
        transaction_id: &TransactionId,
        phase: Phase,
        round: u32,
    ) -> Result<Option<Reflex>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {REFLEX_COLUMNS} FROM reflexes
                 WHERE session_id = ?1 AND transaction_id = ?2 AND phase = ?3 AND round = ?4"
            ),
            params![
                session_id.as_str(),
                transaction_id.as_str(),
                phase.as_str(),
                round as i64
            ],
            Reflex::from_row,
        )
        .optional()
        .with_context("Failed to query reflex")
    }

    /// All reflexes of a session in monotone id order.
    pub fn list_reflexes(&self, session_id: &SessionId) -> Result<Vec<Reflex>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REFLEX_COLUMNS} FROM reflexes WHERE session_id = ?1 ORDER BY id"
        ))?;
        let reflexes = stmt
            .query_map(params![session_id.as_str()], Reflex::from_row)?
            .filter_map(|r| log_filter_error(r, "listing reflexes"))
            .collect();
        Ok(reflexes)
    }

    /// The trailing `n` reflexes of a session, oldest-first.
    pub fn latest_reflexes(&self, session_id: &SessionId, n: usize) -> Result<Vec<Reflex>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM (SELECT {REFLEX_COLUMNS} FROM reflexes
             WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2) ORDER BY id"
        ))?;
        let reflexes = stmt
            .query_map(params![session_id.as_str(), n as i64], Reflex::from_row)?
            .filter_map(|r| log_filter_error(r, "loading trailing reflexes"))
            .collect();
        Ok(reflexes)
    }

    /// All reflexes of one transaction in submission order.
    pub fn transaction_reflexes(&self, transaction_id: &TransactionId) -> Result<Vec<Reflex>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REFLEX_COLUMNS} FROM reflexes WHERE transaction_id = ?1 ORDER BY id"
        ))?;
        let reflexes = stmt
            .query_map(params![transaction_id.as_str()], Reflex::from_row)?
            .filter_map(|r| log_filter_error(r, "loading transaction reflexes"))
            .collect();
        Ok(reflexes)
    }

    /// Reconstruct the transition-relevant progress of a transaction.
    pub fn transaction_progress(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<TransactionProgress> {
        let conn = self.conn()?;
        Self::transaction_progress_conn(&conn, transaction_id)
    }

    pub(crate) fn transaction_progress_conn(
        conn: &Connection,
        transaction_id: &TransactionId,
    ) -> Result<TransactionProgress> {
        let mut stmt = conn
            .prepare(
                "SELECT phase, round, decision FROM reflexes
                 WHERE transaction_id = ?1 ORDER BY id",
            )
            .with_context("Failed to prepare progress query")?;

        let rows: Vec<(String, i64, Option<String>)> = stmt
            .query_map(params![transaction_id.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to read transaction progress")?;

        let mut progress = TransactionProgress::default();
        for (phase_str, round, decision) in rows {
            match Phase::try_parse(&phase_str) {
                Some(Phase::Preflight) => progress.preflight = true,
                Some(Phase::Check) => {
                    progress.check_rounds = progress.check_rounds.max(round as u32);
                    progress.last_decision =
                        decision.as_deref().and_then(CheckDecision::try_parse);
                }
                Some(Phase::Act) => progress.act = true,
                Some(Phase::Postflight) => progress.postflight = true,
                None => {
                    return Err(EmpiricaError::Storage(format!(
                        "Corrupt phase '{}' in transaction {}",
                        phase_str, transaction_id
                    )));
                }
            }
        }
        Ok(progress)
    }

    /// Transactions still open (no POSTFLIGHT) whose first reflex is older
    /// than the cutoff. Used by the force-close sweep.
    pub fn stale_open_transactions(
        &self,
        cutoff_rfc3339: &str,
    ) -> Result<Vec<(SessionId, TransactionId)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, transaction_id, MIN(timestamp) AS opened
             FROM reflexes
             GROUP BY session_id, transaction_id
             HAVING SUM(CASE WHEN phase = 'POSTFLIGHT' THEN 1 ELSE 0 END) = 0
                AND opened < ?1",
        )?;
        let pairs = stmt
            .query_map(params![cutoff_rfc3339], |row| {
                Ok((
                    SessionId::new(row.get::<_, String>(0)?),
                    TransactionId::new(row.get::<_, String>(1)?),
                ))
            })?
            .filter_map(|r| log_filter_error(r, "scanning open transactions"))
            .collect();
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AiId;

    fn fixture(db: &Database) -> (SessionId, TransactionId) {
        let session = db
            .create_session(&AiId::new("agent-A"), 0, None, None, None)
            .expect("session");
        (session.session_id, TransactionId::generate())
    }

    fn sample_vectors() -> VectorMap {
        VectorMap {
            know: 0.6,
            r#do: 0.7,
            context: 0.75,
            clarity: 0.7,
            coherence: 0.8,
            signal: 0.7,
            density: 0.4,
            state: 0.6,
            change: 0.2,
            completion: 0.0,
            impact: 0.5,
            engagement: 0.8,
            uncertainty: 0.4,
        }
    }

    fn preflight(session: &SessionId, txn: &TransactionId) -> NewReflex {
        NewReflex {
            session_id: session.clone(),
            cascade_id: None,
            phase: Phase::Preflight,
            round: 1,
            vectors: sample_vectors(),
            reasoning: "initial".to_string(),
            evidence: None,
            decision: None,
            transaction_id: txn.clone(),
            project_id: None,
            signature: None,
        }
    }

    #[test]
    fn test_insert_and_roundtrip_bit_exact() {
        let db = Database::open_in_memory().expect("open");
        let (session, txn) = fixture(&db);

        let mut new = preflight(&session, &txn);
        // A value with no short decimal representation must survive exactly.
        new.vectors.know = 0.1 + 0.2;
        let inserted = db.insert_reflex(new).expect("insert");

        let loaded = db.get_reflex(inserted.id).expect("get");
        assert_eq!(loaded.vectors.know.to_bits(), (0.1_f64 + 0.2).to_bits());
        assert_eq!(loaded.phase, Phase::Preflight);
        assert_eq!(loaded.transaction_id, txn);
    }

    #[test]
    fn test_duplicate_phase_round_rejected_by_store() {
        let db = Database::open_in_memory().expect("open");
        let (session, txn) = fixture(&db);

        db.insert_reflex(preflight(&session, &txn)).expect("first");
        let err = db.insert_reflex(preflight(&session, &txn)).unwrap_err();
        assert!(err.to_string().to_lowercase().contains("unique"));
    }

    #[test]
    fn test_out_of_range_vector_rejected() {
        let db = Database::open_in_memory().expect("open");
        let (session, txn) = fixture(&db);

        let mut new = preflight(&session, &txn);
        new.vectors.know = 1.2;
        assert!(db.insert_reflex(new).is_err());
    }

    #[test]
    fn test_progress_reconstruction() {
        let db = Database::open_in_memory().expect("open");
        let (session, txn) = fixture(&db);

        db.insert_reflex(preflight(&session, &txn)).expect("pre");

        let mut check = preflight(&session, &txn);
        check.phase = Phase::Check;
        check.round = 1;
        check.decision = Some(CheckDecision::Proceed);
        db.insert_reflex(check).expect("check");

        let progress = db.transaction_progress(&txn).expect("progress");
        assert!(progress.preflight);
        assert_eq!(progress.check_rounds, 1);
        assert_eq!(progress.last_decision, Some(CheckDecision::Proceed));
        assert!(!progress.postflight);
    }

    #[test]
    fn test_latest_reflexes_ordering() {
        let db = Database::open_in_memory().expect("open");
        let (session, txn) = fixture(&db);

        db.insert_reflex(preflight(&session, &txn)).expect("pre");
        for round in 1..=3 {
            let mut check = preflight(&session, &txn);
            check.phase = Phase::Check;
            check.round = round;
            check.decision = Some(CheckDecision::Investigate);
            db.insert_reflex(check).expect("check");
        }

        let trailing = db.latest_reflexes(&session, 2).expect("latest");
        assert_eq!(trailing.len(), 2);
        assert!(trailing[0].id < trailing[1].id);
        assert_eq!(trailing[1].round, 3);

        // Timestamps are monotone in id order
        let all = db.list_reflexes(&session).expect("list");
        for pair in all.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_stale_open_transactions() {
        let db = Database::open_in_memory().expect("open");
        let (session, txn) = fixture(&db);
        db.insert_reflex(preflight(&session, &txn)).expect("pre");

        let future_cutoff = "2999-01-01T00:00:00+00:00";
        let stale = db.stale_open_transactions(future_cutoff).expect("scan");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].1, txn);

        let past_cutoff = "2000-01-01T00:00:00+00:00";
        assert!(db.stale_open_transactions(past_cutoff).expect("scan").is_empty());
    }
}
