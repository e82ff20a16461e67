use crate::error::{Result, YeelightError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Terminator appended to every frame on the wire
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Method name of unsolicited property pushes
pub const PROPS_METHOD: &str = "props";

/// Outbound command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: u32,
    pub method: String,
    pub params: Vec<Value>,
}

/// Reply to a previously sent command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Error body carried by a failed result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

/// Unsolicited property push from a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    pub params: Map<String, Value>,
}

/// Any message that can appear on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Command(Command),
    Result(CommandResult),
    Notification(Notification),
}

impl Command {
    /// Create a new command
    pub fn new(id: u32, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize into a terminated frame ready to be written
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self)?;
        frame.extend_from_slice(LINE_TERMINATOR);
        Ok(frame)
    }
}

impl CommandResult {
    /// Check whether the device reported an error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Check for the plain `["ok"]` acknowledgement
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
            && self
                .result
                .as_ref()
                .and_then(|r| r.first())
                .and_then(Value::as_str)
                == Some("ok")
    }

    /// Convert an error body into a [`YeelightError::Device`]
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(ErrorBody { code, message }) => Err(YeelightError::Device { code, message }),
            None => Ok(self),
        }
    }
}

impl WireMessage {
    /// Parse one line from the wire.
    ///
    /// The variant is chosen from the fields present on the object, never by
    /// trying each shape in turn.
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line.trim_end())?;
        let obj = value
            .as_object()
            .ok_or_else(|| YeelightError::InvalidResponse(format!("not a JSON object: {}", line.trim_end())))?;

        let has = |key: &str| obj.contains_key(key);

        if has("id") && (has("result") || has("error")) {
            Ok(WireMessage::Result(serde_json::from_value(value)?))
        } else if has("id") && has("method") && has("params") {
            Ok(WireMessage::Command(serde_json::from_value(value)?))
        } else if has("method") && has("params") {
            Ok(WireMessage::Notification(serde_json::from_value(value)?))
        } else {
            Err(YeelightError::InvalidResponse(format!(
                "unrecognised message: {}",
                line.trim_end()
            )))
        }
    }
}
