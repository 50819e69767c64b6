use serde::{ Serialize, Deserialize };

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
    },
    #[serde(rename = "switch_model")] SwitchModel {
        model: String,
    },
    #[serde(rename = "confirm")]
    Confirm,
    #[serde(rename = "cancel")]
    Cancel,
    #[serde(rename = "set_temperature")] SetTemperature {
        value: f64,
    },
    #[serde(rename = "set_context_length")] SetContextLength {
        value: i64,
    },
    #[serde(rename = "clear_history")]
    ClearHistory,
    #[serde(rename = "list_models")]
    ListModels,
    #[serde(rename = "sync")]
    Sync,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub model: String,
    pub temperature: f64,
    pub context_length: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub message_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "chunk")] Chunk {
        content: String,
        html: String,
    },
    #[serde(rename = "response")] Response {
        content: String,
        model: String,
        timestamp: i64,
    },
    #[serde(rename = "transcript")] Transcript {
        html: String,
        turns: usize,
    },
    #[serde(rename = "state")] State(SessionSnapshot),
    #[serde(rename = "confirm_required")] ConfirmRequired {
        action: String,
        message: String,
    },
    #[serde(rename = "models")] Models {
        models: Vec<String>,
    },
    #[serde(rename = "error")] Error {
        kind: String,
        message: String,
    },
}
