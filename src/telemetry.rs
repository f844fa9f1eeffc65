use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// One complete telemetry readout from `/api/telemetry`.
///
/// The payload is a flat map of variable names to values. A snapshot is
/// immutable once parsed; the coordinator swaps whole snapshots rather
/// than patching one in place. A reported `0` is a real reading, not an
/// absence marker, so the accessors never suppress it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    values: Map<String, Value>,
    available_programs: Vec<String>,
    captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Validate and wrap a raw telemetry payload.
    ///
    /// The root must be a JSON object and `available_programs`, when
    /// present and non-null, an array of strings. An absent or null list
    /// means the device offers no program switching this cycle.
    pub fn parse(raw: Value) -> Result<Self> {
        let values = match raw {
            Value::Object(map) => map,
            _ => {
                return Err(Error::TypeMismatch {
                    field: "telemetry root".to_string(),
                    expected: "object",
                });
            }
        };

        let available_programs = match values.get("available_programs") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let mut programs = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_str() {
                        Some(name) => programs.push(name.to_string()),
                        None => {
                            return Err(Error::TypeMismatch {
                                field: "available_programs".to_string(),
                                expected: "array of strings",
                            });
                        }
                    }
                }
                programs
            }
            Some(_) => {
                return Err(Error::TypeMismatch {
                    field: "available_programs".to_string(),
                    expected: "array of strings",
                });
            }
        };

        Ok(Self {
            values,
            available_programs,
            captured_at: Utc::now(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(|v| v.as_f64())
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(|v| v.as_i64())
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    /// Boolean read that also accepts the 0/1 numerics the firmware
    /// reports for most flags.
    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|v| v != 0.0),
            _ => None,
        }
    }

    /// Programs the device currently offers, in reported order.
    pub fn available_programs(&self) -> &[String] {
        &self.available_programs
    }

    /// Identifier of the running program.
    pub fn program(&self) -> Option<&str> {
        self.text("program")
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn values_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.values
    }

    // -- Derived accessors --

    pub fn interior_temperature(&self) -> Option<f64> {
        self.number("Tint")
    }

    pub fn exterior_temperature(&self) -> Option<f64> {
        self.number("Text")
    }

    pub fn buffer_temperature(&self) -> Option<f64> {
        self.number("Tbuf")
    }

    pub fn hot_water_temperature(&self) -> Option<f64> {
        self.number("Ttuv")
    }

    pub fn hot_water_target(&self) -> Option<f64> {
        self.number("tuv_set")
    }

    pub fn comfort_temperature(&self) -> Option<f64> {
        self.number("comfort")
    }

    pub fn manual_temperature(&self) -> Option<f64> {
        self.number("manual")
    }

    pub fn heating_curve(&self) -> Option<i64> {
        self.integer("curve")
    }

    pub fn curve_shift(&self) -> Option<i64> {
        self.integer("shift")
    }

    pub fn heat_pump_enabled(&self) -> Option<bool> {
        self.flag("hp_enabled")
    }

    pub fn hot_water_enabled(&self) -> Option<bool> {
        self.flag("tuv_enabled")
    }

    /// Older MaR builds report this under `watchhdo`.
    pub fn tariff_watch(&self) -> Option<bool> {
        self.flag("tariff_watch").or_else(|| self.flag("watchhdo"))
    }

    pub fn compressor_running(&self) -> Option<bool> {
        self.flag("compressor")
    }

    pub fn heating_active(&self) -> Option<bool> {
        self.flag("heating")
    }

    pub fn cooling_active(&self) -> Option<bool> {
        self.flag("cooling")
    }

    pub fn heat_demand(&self) -> Option<bool> {
        self.flag("heatneed")
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.text("mar_version")
    }

    pub fn hostname(&self) -> Option<&str> {
        self.text("hostname")
    }
}
