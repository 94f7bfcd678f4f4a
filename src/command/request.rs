use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use super::executor::CommandExecutor;
use crate::error::CommandError;
use crate::vehicle::mode;

/// A command as produced by the intent layer: `{"type": "...", "params": {...}}`.
///
/// Omitted parameters are filled in at dispatch time: takeoff altitude from config (also
/// used for an altitude of 0), fly-to coordinates from the current state, mode from GUIDED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCommand", into = "RawCommand")]
pub enum CommandRequest {
    Arm,
    Disarm,
    Takeoff {
        altitude: Option<f64>,
    },
    ReturnToLaunch,
    SetMode {
        mode: Option<String>,
    },
    FlyTo {
        lat: Option<f64>,
        lon: Option<f64>,
        alt: Option<f64>,
    },
    Land,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawCommand {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    params: Map<String, Value>,
}

impl CommandRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Arm => "arm",
            Self::Disarm => "disarm",
            Self::Takeoff { .. } => "takeoff",
            Self::ReturnToLaunch => "rtl",
            Self::SetMode { .. } => "setMode",
            Self::FlyTo { .. } => "flyTo",
            Self::Land => "land",
        }
    }

    pub fn from_json(value: Value) -> Result<Self, CommandError> {
        let raw: RawCommand = serde_json::from_value(value)
            .map_err(|e| CommandError::invalid("request", e.to_string()))?;
        Self::try_from(raw)
    }
}

impl TryFrom<RawCommand> for CommandRequest {
    type Error = CommandError;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        let params = &raw.params;
        let request = match raw.kind.as_str() {
            "arm" => Self::Arm,
            "disarm" => Self::Disarm,
            "takeoff" => Self::Takeoff {
                altitude: number(params, "takeoff", "altitude")?,
            },
            "rtl" => Self::ReturnToLaunch,
            "setMode" => Self::SetMode {
                mode: text(params, "setMode", "mode")?,
            },
            "flyTo" => Self::FlyTo {
                lat: number(params, "flyTo", "lat")?,
                lon: number(params, "flyTo", "lon")?,
                alt: number(params, "flyTo", "alt")?,
            },
            "land" => Self::Land,
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };
        Ok(request)
    }
}

impl From<CommandRequest> for RawCommand {
    fn from(request: CommandRequest) -> Self {
        let kind = request.kind().to_string();
        let mut params = Map::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                params.insert(key.to_string(), value);
            }
        };
        match request {
            CommandRequest::Takeoff { altitude } => put("altitude", altitude.map(Value::from)),
            CommandRequest::SetMode { mode: label } => put("mode", label.map(Value::from)),
            CommandRequest::FlyTo { lat, lon, alt } => {
                put("lat", lat.map(Value::from));
                put("lon", lon.map(Value::from));
                put("alt", alt.map(Value::from));
            }
            _ => {}
        }
        Self { kind, params }
    }
}

fn number(
    params: &Map<String, Value>,
    command: &'static str,
    key: &str,
) -> Result<Option<f64>, CommandError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(CommandError::invalid(
            command,
            format!("{} must be a number, got {}", key, other),
        )),
    }
}

fn text(
    params: &Map<String, Value>,
    command: &'static str,
    key: &str,
) -> Result<Option<String>, CommandError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(CommandError::invalid(
            command,
            format!("{} must be a string, got {}", key, other),
        )),
    }
}

impl CommandExecutor {
    /// Runs one request, filling omitted parameters.
    pub async fn execute(&self, request: &CommandRequest) -> Result<bool, CommandError> {
        info!("Executing {}", request.kind());
        let result = match request {
            CommandRequest::Arm => self.arm().await,
            CommandRequest::Disarm => self.disarm().await,
            CommandRequest::Takeoff { altitude } => {
                let altitude = altitude
                    .filter(|altitude| *altitude != 0.0)
                    .unwrap_or(self.config().default_takeoff_altitude);
                self.takeoff(altitude).await
            }
            CommandRequest::ReturnToLaunch => self.return_to_launch().await,
            CommandRequest::SetMode { mode: label } => {
                self.set_mode(label.as_deref().unwrap_or(mode::GUIDED)).await
            }
            CommandRequest::FlyTo { lat, lon, alt } => {
                let current = self.store().get_state();
                self.fly_to(
                    lat.unwrap_or(current.latitude),
                    lon.unwrap_or(current.longitude),
                    // altitude noise can leave an armed vehicle at 0 m just below home
                    alt.unwrap_or(current.altitude.max(0.0)),
                )
                .await
            }
            CommandRequest::Land => self.set_mode(mode::LAND).await,
        };
        if let Err(e) = &result {
            warn!("Rejected {}: {}", request.kind(), e);
        }
        result
    }

    /// Runs requests one after another, stopping at the first error.
    pub async fn execute_all(&self, requests: &[CommandRequest]) -> bool {
        for request in requests {
            if let Err(e) = self.execute(request).await {
                error!("Failed to execute action {}: {}", request.kind(), e);
                return false;
            }
        }
        true
    }
}
