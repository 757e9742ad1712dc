//! Calibration trajectory repository.
//!
//! Per (agent, vector, track) running statistics of the gap between a
//! self-assessed value and an externally grounded value. The trajectory
//! table is append-only history; `calibration_state` holds the
//! quality-weighted Welford accumulator the gate offsets derive from.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::database::Database;
use super::now_rfc3339;
use crate::constants::calibration::{MAX_GATE_OFFSET, PRIOR_STRENGTH};
use crate::types::{AiId, Result, ResultExt, SessionId, log_filter_error};

/// Which half of the cascade the evidence grounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationTrack {
    /// CHECK-phase assessments: investigation quality
    Noetic,
    /// POSTFLIGHT assessments: action quality
    Praxic,
}

impl CalibrationTrack {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Noetic => "noetic",
            Self::Praxic => "praxic",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "noetic" => Some(Self::Noetic),
            "praxic" => Some(Self::Praxic),
            _ => None,
        }
    }
}

/// One appended trajectory observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub ai_id: AiId,
    pub session_id: SessionId,
    pub vector: String,
    pub track: CalibrationTrack,
    pub self_value: f64,
    pub grounded_value: f64,
    /// `self_value - grounded_value`; positive means overestimation
    pub gap: f64,
    pub quality: f64,
}

/// Quality-weighted Welford accumulator for one (agent, vector, track).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationState {
    pub ai_id: AiId,
    pub vector: String,
    pub track: CalibrationTrack,
    pub mean_gap: f64,
    /// Weighted sum of squared deviations
    pub m2: f64,
    /// Quality-weighted observation count
    pub observations: f64,
}

impl CalibrationState {
    fn fresh(ai_id: &AiId, vector: &str, track: CalibrationTrack) -> Self {
        Self {
            ai_id: ai_id.clone(),
            vector: vector.to_string(),
            track,
            mean_gap: 0.0,
            m2: 0.0,
            observations: 0.0,
        }
    }

    /// Weighted Welford update with `quality` as the observation weight.
    pub fn update(&mut self, gap: f64, quality: f64) {
        let weight = quality.max(f64::MIN_POSITIVE);
        self.observations += weight;
        let delta = gap - self.mean_gap;
        self.mean_gap += (weight / self.observations) * delta;
        self.m2 += weight * delta * (gap - self.mean_gap);
    }

    /// Posterior mean gap under a Normal prior centred on zero with
    /// pseudo-count `PRIOR_STRENGTH`: early sessions barely move the gates.
    pub fn posterior_mean(&self) -> f64 {
        (self.observations * self.mean_gap) / (PRIOR_STRENGTH + self.observations)
    }

    /// Weighted sample variance of the gap.
    pub fn variance(&self) -> f64 {
        if self.observations > 1.0 {
            self.m2 / self.observations
        } else {
            0.0
        }
    }

    /// Additive correction applied to the self-assessed value before gate
    /// comparison: an agent that habitually overestimates gets a negative
    /// offset. Clamped so one bad run cannot swing a gate.
    pub fn gate_offset(&self) -> f64 {
        (-self.posterior_mean()).clamp(-MAX_GATE_OFFSET, MAX_GATE_OFFSET)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let track_str: String = row.get(2)?;
        Ok(CalibrationState {
            ai_id: AiId::new(row.get::<_, String>(0)?),
            vector: row.get(1)?,
            track: CalibrationTrack::try_parse(&track_str).unwrap_or(CalibrationTrack::Praxic),
            mean_gap: row.get(3)?,
            m2: row.get(4)?,
            observations: row.get(5)?,
        })
    }
}

impl Database {
    /// Append a trajectory point and fold it into the running state, in one
    /// transaction.
    pub fn record_calibration(&self, point: &CalibrationPoint) -> Result<CalibrationState> {
        let now = now_rfc3339();

        let mut state = self
            .get_calibration_state(&point.ai_id, &point.vector, point.track)?
            .unwrap_or_else(|| CalibrationState::fresh(&point.ai_id, &point.vector, point.track));
        state.update(point.gap, point.quality);

        self.transaction(|conn| {
            conn.execute(
                "INSERT INTO calibration_trajectory (ai_id, session_id, vector, track, \
                 self_value, grounded_value, gap, quality, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    point.ai_id.as_str(),
                    point.session_id.as_str(),
                    point.vector,
                    point.track.as_str(),
                    point.self_value,
                    point.grounded_value,
                    point.gap,
                    point.quality,
                    now,
                ],
            )
            .with_context("Failed to append calibration trajectory")?;

            conn.execute(
                "INSERT INTO calibration_state (ai_id, vector, track, mean_gap, m2, \
                 observations, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(ai_id, vector, track) DO UPDATE SET
                     mean_gap = excluded.mean_gap,
                     m2 = excluded.m2,
                     observations = excluded.observations,
                     updated_at = excluded.updated_at",
                params![
                    state.ai_id.as_str(),
                    state.vector,
                    state.track.as_str(),
                    state.mean_gap,
                    state.m2,
                    state.observations,
                    now,
                ],
            )
            .with_context("Failed to upsert calibration state")?;
            Ok(())
        })?;

        Ok(state)
    }

    pub fn get_calibration_state(
        &self,
        ai_id: &AiId,
        vector: &str,
        track: CalibrationTrack,
    ) -> Result<Option<CalibrationState>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT ai_id, vector, track, mean_gap, m2, observations
             FROM calibration_state WHERE ai_id = ?1 AND vector = ?2 AND track = ?3",
            params![ai_id.as_str(), vector, track.as_str()],
            CalibrationState::from_row,
        )
        .optional()
        .with_context("Failed to query calibration state")
    }

    /// All accumulated state for one agent, both tracks.
    pub fn list_calibration_states(&self, ai_id: &AiId) -> Result<Vec<CalibrationState>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ai_id, vector, track, mean_gap, m2, observations
             FROM calibration_state WHERE ai_id = ?1 ORDER BY track, vector",
        )?;
        let states = stmt
            .query_map(params![ai_id.as_str()], CalibrationState::from_row)?
            .filter_map(|r| log_filter_error(r, "listing calibration state"))
            .collect();
        Ok(states)
    }

    /// Trajectory history for one agent and vector, oldest first.
    pub fn calibration_trajectory(
        &self,
        ai_id: &AiId,
        vector: &str,
    ) -> Result<Vec<CalibrationPoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ai_id, session_id, vector, track, self_value, grounded_value, gap, quality
             FROM calibration_trajectory WHERE ai_id = ?1 AND vector = ?2 ORDER BY id",
        )?;
        let points = stmt
            .query_map(params![ai_id.as_str(), vector], |row| {
                let track_str: String = row.get(3)?;
                Ok(CalibrationPoint {
                    ai_id: AiId::new(row.get::<_, String>(0)?),
                    session_id: SessionId::new(row.get::<_, String>(1)?),
                    vector: row.get(2)?,
                    track: CalibrationTrack::try_parse(&track_str)
                        .unwrap_or(CalibrationTrack::Praxic),
                    self_value: row.get(4)?,
                    grounded_value: row.get(5)?,
                    gap: row.get(6)?,
                    quality: row.get(7)?,
                })
            })?
            .filter_map(|r| log_filter_error(r, "reading calibration trajectory"))
            .collect();
        Ok(points)
    }
}
