//! Session alias resolution.
//!
//! Accepts a full UUID, an unambiguous UUID prefix, or the aliases
//! `latest` / `last` / `auto`, `latest:active`, `latest:<ai_id>`,
//! `latest:active:<ai_id>`. Each resolution is one SQL query; failures
//! carry near-match suggestions.

use rusqlite::{OptionalExtension, params};

use crate::store::Database;
use crate::types::{AiId, EmpiricaError, Result, SessionId};

/// Resolve a session identifier or alias to a concrete session id.
pub fn resolve(db: &Database, input: &str) -> Result<SessionId> {
    let input = input.trim();
    if input.is_empty() {
        return Err(EmpiricaError::InvalidAlias {
            alias: input.to_string(),
            reason: "empty identifier".to_string(),
            suggestions: vec!["latest".to_string(), "latest:active".to_string()],
        });
    }

    if let Some((active_only, ai_id)) = parse_alias(input)? {
        return latest_session(db, active_only, ai_id.as_ref(), input);
    }

    // Full UUID: exact lookup
    if uuid::Uuid::parse_str(input).is_ok() {
        let session_id = SessionId::new(input);
        db.get_session(&session_id).map_err(|_| not_found(db, input))?;
        return Ok(session_id);
    }

    // Unambiguous UUID prefix
    if input.len() >= 4 && input.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        return resolve_prefix(db, input);
    }

    Err(EmpiricaError::InvalidAlias {
        alias: input.to_string(),
        reason: "not a UUID, UUID prefix, or known alias".to_string(),
        suggestions: vec![
            "latest".to_string(),
            "latest:active".to_string(),
            "latest:active:<ai_id>".to_string(),
        ],
    })
}

/// Parse the alias grammar. `Ok(None)` means the input is not an alias.
fn parse_alias(input: &str) -> Result<Option<(bool, Option<AiId>)>> {
    let mut parts = input.split(':');
    let head = parts.next().unwrap_or_default();
    if !matches!(head, "latest" | "last" | "auto") {
        return Ok(None);
    }

    match (parts.next(), parts.next(), parts.next()) {
        (None, _, _) => Ok(Some((false, None))),
        (Some("active"), None, _) => Ok(Some((true, None))),
        (Some("active"), Some(ai), None) if !ai.is_empty() => {
            Ok(Some((true, Some(AiId::new(ai)))))
        }
        (Some(ai), None, _) if !ai.is_empty() => Ok(Some((false, Some(AiId::new(ai))))),
        _ => Err(EmpiricaError::InvalidAlias {
            alias: input.to_string(),
            reason: "malformed alias".to_string(),
            suggestions: vec![
                "latest".to_string(),
                "latest:active".to_string(),
                "latest:<ai_id>".to_string(),
                "latest:active:<ai_id>".to_string(),
            ],
        }),
    }
}

fn latest_session(
    db: &Database,
    active_only: bool,
    ai_id: Option<&AiId>,
    input: &str,
) -> Result<SessionId> {
    let mut sql = "SELECT session_id FROM sessions WHERE 1=1".to_string();
    let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if active_only {
        sql.push_str(" AND end_time IS NULL");
    }
    if let Some(ai) = ai_id {
        bound.push(Box::new(ai.as_str().to_string()));
        sql.push_str(&format!(" AND ai_id = ?{}", bound.len()));
    }
    sql.push_str(" ORDER BY start_time DESC, session_id LIMIT 1");

    // Release the connection before building not-found suggestions
    let found: Option<String> = {
        let conn = db.conn()?;
        let refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|p| p.as_ref()).collect();
        conn.query_row(&sql, refs.as_slice(), |row| row.get(0))
            .optional()
            .map_err(EmpiricaError::Database)?
    };

    found
        .map(SessionId::new)
        .ok_or_else(|| not_found(db, input))
}

fn resolve_prefix(db: &Database, prefix: &str) -> Result<SessionId> {
    // Scoped so the connection is back in the pool before any fallback query
    let matches: Vec<String> = {
        let conn = db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id FROM sessions WHERE session_id LIKE ?1 || '%'
             ORDER BY session_id LIMIT 3",
        )?;
        let rows = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    match matches.len() {
        0 => Err(not_found(db, prefix)),
        1 => Ok(SessionId::new(matches.into_iter().next().unwrap_or_default())),
        _ => Err(EmpiricaError::InvalidAlias {
            alias: prefix.to_string(),
            reason: "prefix matches more than one session".to_string(),
            suggestions: matches,
        }),
    }
}

/// `session_not_found` with the most recent session ids as suggestions.
fn not_found(db: &Database, query: &str) -> EmpiricaError {
    let suggestions = db
        .list_sessions(None, false, 3)
        .map(|sessions| {
            sessions
                .into_iter()
                .map(|s| s.session_id.into_inner())
                .collect()
        })
        .unwrap_or_default();
    EmpiricaError::SessionNotFound {
        query: query.to_string(),
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    #[test]
    fn test_full_uuid_and_prefix() {
        let db = Database::open_in_memory().expect("open");
        let session = db
            .create_session(&AiId::new("worker"), 0, None, None, None)
            .expect("session");

        let by_uuid = resolve(&db, session.session_id.as_str()).expect("uuid");
        assert_eq!(by_uuid, session.session_id);

        let prefix = &session.session_id.as_str()[..8];
        let by_prefix = resolve(&db, prefix).expect("prefix");
        assert_eq!(by_prefix, session.session_id);
    }

    #[test]
    fn test_latest_active_lifecycle() {
        let db = Database::open_in_memory().expect("open");
        let first = db
            .create_session(&AiId::new("worker"), 0, None, None, None)
            .expect("first");
        db.end_session(&first.session_id).expect("end first");
        let second = db
            .create_session(&AiId::new("worker"), 0, None, None, None)
            .expect("second");

        assert_eq!(
            resolve(&db, "latest:active:worker").expect("resolve"),
            second.session_id
        );
        assert_eq!(
            resolve(&db, "latest:worker").expect("resolve"),
            second.session_id
        );

        db.end_session(&second.session_id).expect("end second");
        let err = resolve(&db, "latest:active:worker").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);

        // latest still finds the ended session
        assert!(resolve(&db, "latest:worker").is_ok());
    }

    #[test]
    fn test_alias_synonyms_are_stable() {
        let db = Database::open_in_memory().expect("open");
        let session = db
            .create_session(&AiId::new("worker"), 0, None, None, None)
            .expect("session");

        for alias in ["latest", "last", "auto"] {
            assert_eq!(resolve(&db, alias).expect(alias), session.session_id);
        }
        // Stable across equal-input calls with no intervening change
        assert_eq!(
            resolve(&db, "latest:active").expect("a"),
            resolve(&db, "latest:active").expect("b")
        );
    }

    #[test]
    fn test_ambiguous_prefix_lists_candidates() {
        let db = Database::open_in_memory().expect("open");
        // Force two sessions sharing a prefix by inserting directly
        for id in ["aaaa1111-0000-0000-0000-000000000001",
                   "aaaa1111-0000-0000-0000-000000000002"] {
            db.conn()
                .unwrap()
                .execute(
                    "INSERT INTO sessions (session_id, ai_id, start_time)
                     VALUES (?1, 'worker', '2026-01-01T00:00:00+00:00')",
                    params![id],
                )
                .expect("insert");
        }

        let err = resolve(&db, "aaaa1111").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAlias);
        match err {
            EmpiricaError::InvalidAlias { suggestions, .. } => {
                assert_eq!(suggestions.len(), 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unknown_inputs() {
        let db = Database::open_in_memory().expect("open");
        db.create_session(&AiId::new("worker"), 0, None, None, None)
            .expect("session");

        let err = resolve(&db, "latest:active:ghost").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
        match err {
            EmpiricaError::SessionNotFound { suggestions, .. } => {
                assert!(!suggestions.is_empty());
            }
            other => panic!("unexpected error {:?}", other),
        }

        let err = resolve(&db, "not an id").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAlias);
    }
}
