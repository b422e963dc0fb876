use serde::{ Serialize, Deserialize };

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
    },
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "greeting")] Greeting {
        content: String,
        session_id: String,
    },
    /// An empty assistant message has been opened; partials follow.
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "partial")] Partial {
        content: String,
    },
    #[serde(rename = "done")] Done {
        content: String,
        timestamp: i64,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        // Every variant is plain strings and integers.
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"type":"error","message":"serialization failed"}"#))
    }
}
