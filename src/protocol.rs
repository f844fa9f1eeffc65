use serde_json::{json, Value};

pub const LOGIN_PATH: &str = "/api/login";
pub const TELEMETRY_PATH: &str = "/api/telemetry";

/// Controllable leaves of the MaR REST surface. Each one is a PUT
/// endpoint plus the telemetry variable the device echoes the accepted
/// value back under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKey {
    HotWaterTarget,
    HotWaterEnabled,
    HotWaterSchedulerEnabled,
    Program,
    HeatingCurve,
    CurveShift,
    ManualTemperature,
    ComfortTemperature,
    ProgramSchedulerEnabled,
    HeatPumpEnabled,
    TariffWatch,
}

impl ControlKey {
    pub fn endpoint(&self) -> &'static str {
        match self {
            ControlKey::HotWaterTarget => "/api/tuv/set",
            ControlKey::HotWaterEnabled => "/api/tuv/enabled",
            ControlKey::HotWaterSchedulerEnabled => "/api/tuv/scheduler/enabled",
            ControlKey::Program => "/api/program/program",
            ControlKey::HeatingCurve => "/api/program/curve",
            ControlKey::CurveShift => "/api/program/shift",
            ControlKey::ManualTemperature => "/api/program/manual",
            ControlKey::ComfortTemperature => "/api/program/comfort",
            ControlKey::ProgramSchedulerEnabled => "/api/program/scheduler/enabled",
            ControlKey::HeatPumpEnabled => "/api/heatpump/enabled",
            ControlKey::TariffWatch => "/api/heatpump/tariff/watch",
        }
    }

    /// Telemetry variable this control reads back through.
    pub fn telemetry_key(&self) -> &'static str {
        match self {
            ControlKey::HotWaterTarget => "tuv_set",
            ControlKey::HotWaterEnabled => "tuv_enabled",
            ControlKey::HotWaterSchedulerEnabled => "tuv_sched_enabled",
            ControlKey::Program => "program",
            ControlKey::HeatingCurve => "curve",
            ControlKey::CurveShift => "shift",
            ControlKey::ManualTemperature => "manual",
            ControlKey::ComfortTemperature => "comfort",
            ControlKey::ProgramSchedulerEnabled => "program_sched_enabled",
            ControlKey::HeatPumpEnabled => "hp_enabled",
            ControlKey::TariffWatch => "tariff_watch",
        }
    }
}

pub fn login_payload(username: &str, password: &str) -> Value {
    json!({
        "username": username,
        "password": password,
    })
}

/// PUT bodies wrap the value under the endpoint's final path segment,
/// e.g. `/api/tuv/set` takes `{"set": 45}`.
pub fn leaf_payload(path: &str, value: Value) -> Value {
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or(path);
    json!({ segment: value })
}

/// Booleans ride the wire as 1/0.
pub fn wire_bool(on: bool) -> Value {
    Value::from(if on { 1 } else { 0 })
}
