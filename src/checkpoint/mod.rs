//! Checkpoint layer: reflex mirrors in git notes with a SQLite fallback.

pub mod git_notes;
pub mod layer;

pub use git_notes::GitNotes;
pub use layer::{CheckpointLayer, CheckpointPayload, MirrorOutcome};
