//! Checkpoint layer.
//!
//! Mirrors every reflex into a git note on the current HEAD. SQLite is
//! written first and remains the source of truth for queries; the git note
//! is best-effort and durable across clones. Reads prefer git; on
//! disagreement git wins and the SQLite mirror is repaired.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};

use super::git_notes::GitNotes;
use crate::cascade::Phase;
use crate::constants::git::CANON_VERSION;
use crate::signing::{SignatureBlock, canonicalize, content_hash};
use crate::store::{Database, Reflex, StoredCheckpoint};
use crate::types::{EmpiricaError, Result, SessionId};
use crate::vectors::{VectorDelta, VectorMap};

/// Commit marker used for mirror rows written while git was unavailable.
const NO_COMMIT: &str = "untracked";

/// Decoded checkpoint note payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub canon: String,
    pub session_id: String,
    pub phase: Phase,
    pub round: u32,
    pub timestamp: String,
    pub vectors: VectorMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
    /// Content hash of the prior checkpoint of this session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl CheckpointPayload {
    pub fn from_reflex(reflex: &Reflex, parent: Option<String>) -> Result<Self> {
        let signature = reflex
            .signature
            .clone()
            .map(serde_json::from_value)
            .transpose()?;
        Ok(Self {
            canon: CANON_VERSION.to_string(),
            session_id: reflex.session_id.as_str().to_string(),
            phase: reflex.phase,
            round: reflex.round,
            timestamp: reflex.timestamp.clone(),
            vectors: reflex.vectors,
            signature,
            parent,
        })
    }

    /// Canonical JSON plus its content hash.
    pub fn canonical(&self) -> Result<(String, String)> {
        let value: Value = serde_json::to_value(self)?;
        let canonical = canonicalize(&value);
        let hash = content_hash(&canonical);
        Ok((canonical, hash))
    }
}

/// Zlib + base64 encode a canonical payload into one note line.
pub fn encode_note_line(canonical: &str) -> Result<String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(canonical.as_bytes())
        .map_err(|e| EmpiricaError::Storage(format!("compress failed: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| EmpiricaError::Storage(format!("compress failed: {}", e)))?;
    Ok(BASE64.encode(compressed))
}

/// Decode one note line back to canonical JSON.
pub fn decode_note_line(line: &str) -> Result<String> {
    let compressed = BASE64
        .decode(line.trim())
        .map_err(|e| EmpiricaError::Storage(format!("malformed note line: {}", e)))?;
    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    let mut canonical = String::new();
    decoder
        .read_to_string(&mut canonical)
        .map_err(|e| EmpiricaError::Storage(format!("decompress failed: {}", e)))?;
    Ok(canonical)
}

/// Outcome of mirroring one reflex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorOutcome {
    pub commit: Option<String>,
    pub content_hash: String,
    /// True when the git write failed or timed out and was queued for retry
    pub git_deferred: bool,
}

/// The checkpoint layer: SQLite mirror + best-effort git notes.
pub struct CheckpointLayer<'a> {
    db: &'a Database,
    git: Option<GitNotes>,
}

impl<'a> CheckpointLayer<'a> {
    pub fn new(db: &'a Database, git: Option<GitNotes>) -> Self {
        Self { db, git }
    }

    pub fn has_git(&self) -> bool {
        self.git.is_some()
    }

    /// Mirror a reflex: SQLite row first, then git note. A git failure
    /// never fails the mirror; it queues the note for the reconciler and
    /// reports `git_deferred = true`.
    pub fn mirror_reflex(&self, reflex: &Reflex) -> Result<MirrorOutcome> {
        let parent = self
            .db
            .latest_checkpoint(&reflex.session_id)?
            .map(|prior| prior.content_hash);
        let payload = CheckpointPayload::from_reflex(reflex, parent.clone())?;
        let (canonical, hash) = payload.canonical()?;

        let commit = match &self.git {
            Some(git) => match git.head_commit() {
                Ok(commit) => Some(commit),
                Err(e) => {
                    tracing::warn!("Cannot resolve HEAD for checkpoint mirror: {}", e);
                    None
                }
            },
            None => None,
        };
        let commit_key = commit.as_deref().unwrap_or(NO_COMMIT);

        // SQLite first: queries never depend on git availability.
        self.db.upsert_checkpoint(
            commit_key,
            &reflex.session_id,
            reflex.phase,
            reflex.round,
            &canonical,
            &hash,
            parent.as_deref(),
        )?;

        let line = encode_note_line(&canonical)?;
        let git_deferred = match (&self.git, &commit) {
            (Some(git), Some(commit)) => match git.append_note(commit, &line) {
                Ok(()) => false,
                Err(e) => {
                    tracing::warn!("Git note write deferred: {}", e);
                    self.db
                        .defer_note(reflex.id, Some(commit), &line, &e.to_string())?;
                    true
                }
            },
            _ => {
                self.db
                    .defer_note(reflex.id, None, &line, "git unavailable")?;
                true
            }
        };

        Ok(MirrorOutcome {
            commit,
            content_hash: hash,
            git_deferred,
        })
    }

    /// Load a checkpoint by (session, phase, round).
    ///
    /// Git notes are the preferred source; the SQLite mirror answers when
    /// notes are missing or git is unavailable. When both exist and
    /// disagree, git wins and the mirror row is repaired.
    pub fn load(
        &self,
        session_id: &SessionId,
        phase: Phase,
        round: u32,
    ) -> Result<CheckpointPayload> {
        let mirror = self.db.list_checkpoints(session_id)?;
        let mirror_row = mirror
            .iter()
            .find(|c| c.phase == phase && c.round == round);

        if let Some(git) = &self.git {
            let commits: Vec<String> = match mirror_row {
                Some(row) if row.commit_hash != NO_COMMIT => vec![row.commit_hash.clone()],
                _ => git.annotated_commits()?,
            };

            for commit in commits {
                if let Some(found) = self.find_in_note(git, &commit, session_id, phase, round)? {
                    let (canonical, hash) = found.canonical()?;
                    let stale = mirror_row.is_none_or(|row| row.content_hash != hash);
                    if stale {
                        self.db.upsert_checkpoint(
                            &commit,
                            session_id,
                            phase,
                            round,
                            &canonical,
                            &hash,
                            found.parent.as_deref(),
                        )?;
                    }
                    return Ok(found);
                }
            }
        }

        match mirror_row {
            Some(row) => parse_payload(&row.payload),
            None => Err(EmpiricaError::InsufficientData {
                what: format!("checkpoint {}/{}/{}", session_id, phase, round),
                have: 0,
                needed: 1,
            }),
        }
    }

    /// All mirrored checkpoints of a session, write order.
    pub fn list(&self, session_id: &SessionId) -> Result<Vec<StoredCheckpoint>> {
        self.db.list_checkpoints(session_id)
    }

    /// Per-vector delta between two checkpoints of one session.
    pub fn diff(
        &self,
        session_id: &SessionId,
        from: (Phase, u32),
        to: (Phase, u32),
    ) -> Result<VectorDelta> {
        let a = self.load(session_id, from.0, from.1)?;
        let b = self.load(session_id, to.0, to.1)?;
        Ok(a.vectors.delta(&b.vectors))
    }

    /// Retry deferred git-note writes. Returns how many cleared.
    pub fn reconcile(&self, batch: usize) -> Result<usize> {
        let Some(git) = &self.git else {
            return Ok(0);
        };

        let mut cleared = 0;
        for note in self.db.pending_deferred_notes(batch)? {
            let commit = match &note.commit_hash {
                Some(commit) => commit.clone(),
                None => match git.head_commit() {
                    Ok(commit) => commit,
                    Err(_) => continue,
                },
            };
            match git.append_note(&commit, &note.payload) {
                Ok(()) => {
                    self.db.clear_deferred_note(note.id)?;
                    cleared += 1;
                }
                Err(e) => {
                    tracing::debug!("Deferred note {} still failing: {}", note.id, e);
                    self.db.bump_deferred_note_retry(note.id)?;
                }
            }
        }
        if cleared > 0 {
            tracing::info!("Reconciled {} deferred git note(s)", cleared);
        }
        Ok(cleared)
    }

    fn find_in_note(
        &self,
        git: &GitNotes,
        commit: &str,
        session_id: &SessionId,
        phase: Phase,
        round: u32,
    ) -> Result<Option<CheckpointPayload>> {
        let Some(lines) = git.read_note(commit)? else {
            return Ok(None);
        };
        for line in lines {
            let canonical = match decode_note_line(&line) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Skipping undecodable note line on {}: {}", commit, e);
                    continue;
                }
            };
            match parse_payload(&canonical) {
                Ok(payload)
                    if payload.session_id == session_id.as_str()
                        && payload.phase == phase
                        && payload.round == round =>
                {
                    return Ok(Some(payload));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping malformed note payload on {}: {}", commit, e),
            }
        }
        Ok(None)
    }
}

fn parse_payload(canonical: &str) -> Result<CheckpointPayload> {
    serde_json::from_str(canonical)
        .map_err(|e| EmpiricaError::Storage(format!("corrupt checkpoint payload: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::Phase;
    use crate::store::NewReflex;
    use crate::types::{AiId, TransactionId};

    fn vectors() -> VectorMap {
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

    fn reflex(db: &Database, phase: Phase, round: u32) -> Reflex {
        let session = db
            .create_session(&AiId::new("agent-A"), 0, None, None, None)
            .expect("session");
        db.insert_reflex(NewReflex {
            session_id: session.session_id,
            cascade_id: None,
            phase,
            round,
            vectors: vectors(),
            reasoning: "r".to_string(),
            evidence: None,
            decision: None,
            transaction_id: TransactionId::generate(),
            project_id: None,
            signature: None,
        })
        .expect("reflex")
    }

    #[test]
    fn test_note_line_roundtrip_byte_identical() {
        let payload = CheckpointPayload {
            canon: "v1".to_string(),
            session_id: "s1".to_string(),
            phase: Phase::Preflight,
            round: 1,
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            vectors: vectors(),
            signature: None,
            parent: None,
        };
        let (canonical, hash) = payload.canonical().expect("canonical");

        let line = encode_note_line(&canonical).expect("encode");
        let decoded = decode_note_line(&line).expect("decode");
        assert_eq!(decoded, canonical);
        assert_eq!(content_hash(&decoded), hash);

        let reparsed = parse_payload(&decoded).expect("parse");
        let (again, hash_again) = reparsed.canonical().expect("canonical");
        assert_eq!(again, canonical);
        assert_eq!(hash_again, hash);
    }

    #[test]
    fn test_mirror_without_git_defers() {
        let db = Database::open_in_memory().expect("open");
        let layer = CheckpointLayer::new(&db, None);
        let reflex = reflex(&db, Phase::Preflight, 1);

        let outcome = layer.mirror_reflex(&reflex).expect("mirror");
        assert!(outcome.git_deferred);
        assert!(outcome.commit.is_none());

        // SQLite row exists; load falls back to it
        let loaded = layer
            .load(&reflex.session_id, Phase::Preflight, 1)
            .expect("load");
        assert_eq!(loaded.vectors, reflex.vectors);

        // And the note is queued for the reconciler
        assert_eq!(db.pending_deferred_notes(10).expect("queue").len(), 1);
    }

    #[test]
    fn test_mirror_chains_parent_hashes() {
        let db = Database::open_in_memory().expect("open");
        let layer = CheckpointLayer::new(&db, None);

        let session = db
            .create_session(&AiId::new("agent-A"), 0, None, None, None)
            .expect("session");
        let txn = TransactionId::generate();
        let first = db
            .insert_reflex(NewReflex {
                session_id: session.session_id.clone(),
                cascade_id: None,
                phase: Phase::Preflight,
                round: 1,
                vectors: vectors(),
                reasoning: "r".to_string(),
                evidence: None,
                decision: None,
                transaction_id: txn.clone(),
                project_id: None,
                signature: None,
            })
            .expect("first");
        let second = db
            .insert_reflex(NewReflex {
                session_id: session.session_id.clone(),
                cascade_id: None,
                phase: Phase::Check,
                round: 1,
                vectors: vectors(),
                reasoning: "r".to_string(),
                evidence: None,
                decision: Some(crate::cascade::CheckDecision::Proceed),
                transaction_id: txn,
                project_id: None,
                signature: None,
            })
            .expect("second");

        let out1 = layer.mirror_reflex(&first).expect("mirror 1");
        let out2 = layer.mirror_reflex(&second).expect("mirror 2");
        assert_ne!(out1.content_hash, out2.content_hash);

        let chained = layer
            .load(&session.session_id, Phase::Check, 1)
            .expect("load");
        assert_eq!(chained.parent.as_deref(), Some(out1.content_hash.as_str()));
    }

    #[test]
    fn test_mirror_and_load_through_git() {
        let Some((dir, git)) = crate::checkpoint::git_notes::tests::scratch_repo() else {
            return;
        };
        let db = Database::open_in_memory().expect("open");
        let layer = CheckpointLayer::new(&db, Some(git));
        let reflex = reflex(&db, Phase::Preflight, 1);

        let outcome = layer.mirror_reflex(&reflex).expect("mirror");
        assert!(!outcome.git_deferred);
        let commit = outcome.commit.expect("commit");

        // Corrupt the SQLite mirror; the git read path must repair it.
        db.conn()
            .unwrap()
            .execute(
                "UPDATE checkpoints SET payload = '{}', content_hash = 'bogus'",
                [],
            )
            .expect("corrupt");

        let loaded = layer
            .load(&reflex.session_id, Phase::Preflight, 1)
            .expect("load");
        assert_eq!(loaded.vectors, reflex.vectors);

        let repaired = db
            .find_checkpoint(&commit, &reflex.session_id, Phase::Preflight, 1)
            .expect("query")
            .expect("row");
        assert_eq!(repaired.content_hash, outcome.content_hash);
        drop(dir);
    }

    #[test]
    fn test_reconcile_clears_queue() {
        let Some((dir, git)) = crate::checkpoint::git_notes::tests::scratch_repo() else {
            return;
        };
        let db = Database::open_in_memory().expect("open");

        // Written while git was "down"
        let reflex = reflex(&db, Phase::Preflight, 1);
        CheckpointLayer::new(&db, None)
            .mirror_reflex(&reflex)
            .expect("mirror");
        assert_eq!(db.pending_deferred_notes(10).expect("queue").len(), 1);

        let layer = CheckpointLayer::new(&db, Some(git));
        let cleared = layer.reconcile(10).expect("reconcile");
        assert_eq!(cleared, 1);
        assert!(db.pending_deferred_notes(10).expect("queue").is_empty());
        drop(dir);
    }

    #[test]
    fn test_diff_requires_both_checkpoints() {
        let db = Database::open_in_memory().expect("open");
        let layer = CheckpointLayer::new(&db, None);
        let reflex = reflex(&db, Phase::Preflight, 1);
        layer.mirror_reflex(&reflex).expect("mirror");

        let err = layer
            .diff(
                &reflex.session_id,
                (Phase::Preflight, 1),
                (Phase::Postflight, 1),
            )
            .unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::InsufficientData);
    }
}
