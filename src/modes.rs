use std::fmt;

use crate::telemetry::Snapshot;

/// Logical HVAC modes exposed to hosts. Device programs map into this
/// closed set through [`PROGRAM_MODES`]; identifiers outside the table
/// surface as [`Unknown`](HvacMode::Unknown) rather than being coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    Unknown,
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HvacMode::Off => "off",
            HvacMode::Heat => "heat",
            HvacMode::Cool => "cool",
            HvacMode::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// What the pump is doing right now, as opposed to what it is set to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacAction {
    Off,
    Heating,
    Cooling,
    Idle,
}

/// Program identifiers the MaR firmware reports, paired with the mode
/// each one realizes.
pub const PROGRAM_MODES: [(&str, HvacMode); 3] = [
    ("Off", HvacMode::Off),
    ("Manual_comfort", HvacMode::Heat),
    ("Cooling_comfort", HvacMode::Cool),
];

pub fn mode_for_program(program: &str) -> Option<HvacMode> {
    PROGRAM_MODES
        .iter()
        .find(|(name, _)| *name == program)
        .map(|(_, mode)| *mode)
}

/// First reported program realizing the given mode. Inverts a mode
/// change into the single program write that carries it out.
pub fn program_for_mode(snapshot: &Snapshot, mode: HvacMode) -> Option<&str> {
    snapshot
        .available_programs()
        .iter()
        .find(|program| mode_for_program(program) == Some(mode))
        .map(|program| program.as_str())
}

/// Mode the device is currently set to.
///
/// An explicit `hp_enabled == false` wins over the program. An absent
/// flag does not force Off; the program alone decides then.
pub fn current_mode(snapshot: &Snapshot) -> HvacMode {
    if snapshot.flag("hp_enabled") == Some(false) {
        return HvacMode::Off;
    }
    match snapshot.program() {
        Some(program) => mode_for_program(program).unwrap_or(HvacMode::Unknown),
        None => HvacMode::Unknown,
    }
}

/// Modes the device can be switched to right now: the image of
/// `available_programs` under the program table, order preserved,
/// duplicates collapsed onto their first occurrence.
pub fn selectable_modes(snapshot: &Snapshot) -> Vec<HvacMode> {
    let mut modes = Vec::new();
    for program in snapshot.available_programs() {
        if let Some(mode) = mode_for_program(program)
            && !modes.contains(&mode)
        {
            modes.push(mode);
        }
    }
    modes
}

/// Current activity derived from the run flags. The compressor flag
/// gates actual heating/cooling; a demand without it reads as idle.
pub fn current_action(snapshot: &Snapshot) -> HvacAction {
    if current_mode(snapshot) == HvacMode::Off {
        return HvacAction::Off;
    }
    if snapshot.cooling_active() == Some(true) {
        if snapshot.compressor_running() == Some(true) {
            return HvacAction::Cooling;
        }
        return HvacAction::Idle;
    }
    if snapshot.heating_active() == Some(true) || snapshot.heat_demand() == Some(true) {
        if snapshot.compressor_running() == Some(true) {
            return HvacAction::Heating;
        }
        return HvacAction::Idle;
    }
    HvacAction::Idle
}

/// Program identifiers in the snapshot that the table does not cover:
/// the running program plus anything in the capability list.
pub fn unmapped_programs(snapshot: &Snapshot) -> Vec<&str> {
    let mut unknown: Vec<&str> = Vec::new();
    if let Some(program) = snapshot.program()
        && mode_for_program(program).is_none()
    {
        unknown.push(program);
    }
    for program in snapshot.available_programs() {
        if mode_for_program(program).is_none() && !unknown.contains(&program.as_str()) {
            unknown.push(program.as_str());
        }
    }
    unknown
}
