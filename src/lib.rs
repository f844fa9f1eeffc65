mod client;
mod coordinator;
mod error;
mod modes;
mod overlay;
mod protocol;
mod telemetry;

pub use client::{MygrenClient, MygrenClientBuilder};
pub use coordinator::{Coordinator, CoordinatorBuilder, PumpState, DEFAULT_POLL_INTERVAL};
pub use error::{Error, Result};
pub use modes::{
    current_action, current_mode, HvacAction, HvacMode, mode_for_program, program_for_mode,
    PROGRAM_MODES, selectable_modes, unmapped_programs,
};
pub use overlay::{WriteOverlay, CONFIRM_CYCLES};
pub use protocol::ControlKey;
pub use telemetry::Snapshot;
