//! Trip compliance classification
//!
//! A fixed, ordered chain of rules. The first rule that fires decides the
//! trip status and later rules are never consulted, so the order in
//! [`Rule::ORDER`] is observable behavior.
//!
//! Classification is pure: every input is resolved by the caller and passed
//! in through [`TripSignals`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ComplianceThresholds, EngineConfig};
use crate::model::{TicketAssignment, TripStatus, VehiclePosition};
use crate::plate;

/// Everything the rule chain looks at, pre-resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripSignals {
    /// Status supplied by the reporter; anything but OK wins outright
    #[serde(default)]
    pub base_status: TripStatus,
    #[serde(default)]
    pub assignment: Option<TicketAssignment>,
    /// Vehicle id the reporter put on the trip
    #[serde(default)]
    pub provided_vehicle_id: Option<Uuid>,
    /// Vehicle id resolved from the detected plate
    #[serde(default)]
    pub resolved_vehicle_id: Option<Uuid>,
    #[serde(default)]
    pub expected_plate: String,
    #[serde(default)]
    pub detected_plate: String,
    #[serde(default)]
    pub entry_volume: Option<f64>,
    #[serde(default)]
    pub exit_volume: Option<f64>,
    #[serde(default)]
    pub body_volume: Option<f64>,
    #[serde(default)]
    pub exit_plate_event: bool,
    #[serde(default)]
    pub exit_volume_event: bool,
    pub entry_at: DateTime<Utc>,
    /// When the later of the two exit events was registered
    #[serde(default)]
    pub exit_registered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_position: Option<VehiclePosition>,
}

impl TripSignals {
    /// Signals with nothing resolved yet.
    pub fn new(entry_at: DateTime<Utc>) -> Self {
        Self {
            base_status: TripStatus::Ok,
            assignment: None,
            provided_vehicle_id: None,
            resolved_vehicle_id: None,
            expected_plate: String::new(),
            detected_plate: String::new(),
            entry_volume: None,
            exit_volume: None,
            body_volume: None,
            exit_plate_event: false,
            exit_volume_event: false,
            entry_at,
            exit_registered_at: None,
            last_position: None,
        }
    }
}

/// One link in the rule chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    ReportedViolation,
    NoAssignment,
    VehicleMismatch,
    PlateMismatch,
    LowEntryVolume,
    LoadedOnExit,
    MissingExitEvent,
    OutsideCleaningArea,
    LeftPolygonEarly,
}

impl Rule {
    /// Evaluation order, highest priority first.
    pub const ORDER: [Rule; 9] = [
        Rule::ReportedViolation,
        Rule::NoAssignment,
        Rule::VehicleMismatch,
        Rule::PlateMismatch,
        Rule::LowEntryVolume,
        Rule::LoadedOnExit,
        Rule::MissingExitEvent,
        Rule::OutsideCleaningArea,
        Rule::LeftPolygonEarly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReportedViolation => "reported_violation",
            Self::NoAssignment => "no_assignment",
            Self::VehicleMismatch => "vehicle_mismatch",
            Self::PlateMismatch => "plate_mismatch",
            Self::LowEntryVolume => "low_entry_volume",
            Self::LoadedOnExit => "loaded_on_exit",
            Self::MissingExitEvent => "missing_exit_event",
            Self::OutsideCleaningArea => "outside_cleaning_area",
            Self::LeftPolygonEarly => "left_polygon_early",
        }
    }

    /// Status produced when this rule fires.
    fn status(self, signals: &TripSignals) -> TripStatus {
        match self {
            Self::ReportedViolation => signals.base_status,
            Self::NoAssignment => TripStatus::NoAssignment,
            Self::VehicleMismatch | Self::PlateMismatch => TripStatus::MismatchPlate,
            Self::LowEntryVolume | Self::LoadedOnExit => TripStatus::SuspiciousVolume,
            Self::MissingExitEvent => TripStatus::NoExitCamera,
            Self::OutsideCleaningArea => TripStatus::NoAreaWork,
            Self::LeftPolygonEarly => TripStatus::RouteViolation,
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification result: the status and the rule that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: TripStatus,
    /// `None` when no rule fired
    pub rule: Option<Rule>,
}

impl Verdict {
    fn ok() -> Self {
        Self {
            status: TripStatus::Ok,
            rule: None,
        }
    }

    /// Human-readable reason, stored on the trip.
    pub fn reason(&self) -> Option<String> {
        self.rule.map(|r| r.as_str().to_string())
    }
}

/// Rule chain with its injected thresholds
#[derive(Debug, Clone, Copy)]
pub struct TripClassifier {
    thresholds: ComplianceThresholds,
    area_window: Duration,
}

impl TripClassifier {
    pub fn new(thresholds: ComplianceThresholds, area_window: Duration) -> Self {
        Self {
            thresholds,
            area_window,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.thresholds, config.area_window())
    }

    /// Evaluate the chain; first match wins.
    pub fn classify(&self, signals: &TripSignals) -> Verdict {
        Rule::ORDER
            .iter()
            .copied()
            .find(|rule| self.fires(*rule, signals))
            .map(|rule| Verdict {
                status: rule.status(signals),
                rule: Some(rule),
            })
            .unwrap_or_else(Verdict::ok)
    }

    fn fires(&self, rule: Rule, s: &TripSignals) -> bool {
        match rule {
            Rule::ReportedViolation => s.base_status != TripStatus::Ok,
            Rule::NoAssignment => s.assignment.is_none(),
            Rule::VehicleMismatch => match &s.assignment {
                Some(assignment) => [s.provided_vehicle_id, s.resolved_vehicle_id]
                    .iter()
                    .flatten()
                    .any(|id| *id != assignment.vehicle_id),
                None => false,
            },
            Rule::PlateMismatch => {
                !s.expected_plate.trim().is_empty()
                    && !s.detected_plate.trim().is_empty()
                    && !plate::same_plate(&s.expected_plate, &s.detected_plate)
            }
            Rule::LowEntryVolume => match (s.body_volume, s.entry_volume) {
                (Some(body), Some(entry)) if body > 0.0 => {
                    entry < self.thresholds.min_entry_volume_ratio * body
                }
                _ => false,
            },
            Rule::LoadedOnExit => s
                .exit_volume
                .map(|v| v.abs() > self.thresholds.exit_volume_tolerance)
                .unwrap_or(false),
            Rule::MissingExitEvent => !s.exit_plate_event || !s.exit_volume_event,
            Rule::OutsideCleaningArea => match &s.last_position {
                Some(pos) => {
                    !pos.inside_cleaning_area
                        && (pos.recorded_at - s.entry_at).abs() <= self.area_window
                }
                None => false,
            },
            Rule::LeftPolygonEarly => match &s.last_position {
                Some(pos) => {
                    !pos.inside_polygon
                        && pos.recorded_at >= s.entry_at
                        && s.exit_registered_at
                            .map(|exit| pos.recorded_at < exit)
                            .unwrap_or(true)
                }
                None => false,
            },
        }
    }
}
