/*!
 * The unit of queued work for a device worker.
 *
 * Commands are produced by action compilation, by response effects that
 * chain follow-up work, or by the worker itself (control commands). A
 * command is immutable once queued; ownership transfers to the worker when
 * it is dequeued.
 */
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Control command: spin up the worker and arm the first status poll
pub const CMD_INITIALIZE_CONNECTION: &str = "INITIALIZE_CONNECTION";
/// Control command: drain-and-stop the worker loop
pub const CMD_TERMINATE_PROCESSING: &str = "TERMINATE_PROCESSING";
/// Control command: sleep the worker for the payload's number of seconds
pub const CMD_PAUSE_PROCESSING: &str = "PAUSE_PROCESSING";
/// Control command: run the configured full-status-poll action
pub const CMD_UPDATE_STATUS_FULL: &str = "UPDATE_STATUS_FULL";
/// Control command: send a Wake-on-LAN packet to the payload's MAC address
pub const CMD_SEND_WOL_REQUEST: &str = "SEND_WOL_REQUEST";

/// Transport command: GET the payload's path from the device
pub const CMD_HTTP_GET: &str = "HTTP_GET";
/// Transport command: PUT the payload's path on the device
pub const CMD_HTTP_PUT: &str = "HTTP_PUT";
/// Transport command: post a SOAP envelope (path, action, body payload)
pub const CMD_SOAP_REQUEST: &str = "SOAP_REQUEST";
/// Transport command: post a JSON body to the device
pub const CMD_JSON_REQUEST: &str = "JSON_REQUEST";
/// Transport command: download a resource to a local file
pub const CMD_DOWNLOAD_FILE: &str = "DOWNLOAD_FILE";

/// Delimiter used when a text payload encodes a list
pub const PAYLOAD_LIST_DELIMITER: &str = "|*|";

/// The payload carried by a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandPayload {
    /// No payload
    Empty,
    /// A single text payload
    Text(String),
    /// An ordered list payload
    List(Vec<String>),
}

impl CommandPayload {
    /// Get the payload as text; lists are rendered with the list delimiter
    /// and an empty payload renders as an empty string
    pub fn as_text(&self) -> String {
        match self {
            CommandPayload::Empty => String::new(),
            CommandPayload::Text(s) => s.clone(),
            CommandPayload::List(items) => items.join(PAYLOAD_LIST_DELIMITER),
        }
    }

    /// Get the payload as a list, splitting text payloads on the list
    /// delimiter when necessary
    pub fn to_list(&self) -> Vec<String> {
        match self {
            CommandPayload::Empty => Vec::new(),
            CommandPayload::Text(s) => s
                .split(PAYLOAD_LIST_DELIMITER)
                .map(str::to_string)
                .collect(),
            CommandPayload::List(items) => items.clone(),
        }
    }

    /// Check whether the payload is empty
    pub fn is_empty(&self) -> bool {
        match self {
            CommandPayload::Empty => true,
            CommandPayload::Text(s) => s.is_empty(),
            CommandPayload::List(items) => items.is_empty(),
        }
    }
}

impl From<&str> for CommandPayload {
    fn from(s: &str) -> Self {
        CommandPayload::Text(s.to_string())
    }
}

impl From<String> for CommandPayload {
    fn from(s: String) -> Self {
        CommandPayload::Text(s)
    }
}

impl From<Vec<String>> for CommandPayload {
    fn from(items: Vec<String>) -> Self {
        CommandPayload::List(items)
    }
}

/// One unit of queued work for a device's command worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// The command name; dispatch in the worker loop keys off this
    pub name: String,
    /// The command payload
    pub payload: CommandPayload,
    /// Pause applied after this command completes, before the next dequeue
    pub post_pause: Duration,
    /// The id of the action this command was compiled from, if any
    pub parent_action: Option<String>,
}

impl Command {
    /// Create a new command with no payload, no pause, and no parent action
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            payload: CommandPayload::Empty,
            post_pause: Duration::ZERO,
            parent_action: None,
        }
    }

    /// Set the payload
    pub fn with_payload<P: Into<CommandPayload>>(mut self, payload: P) -> Self {
        self.payload = payload.into();
        self
    }

    /// Set the post-command pause
    pub fn with_post_pause(mut self, pause: Duration) -> Self {
        self.post_pause = pause;
        self
    }

    /// Set the originating action id
    pub fn with_parent_action<S: Into<String>>(mut self, action_id: S) -> Self {
        self.parent_action = Some(action_id.into());
        self
    }
}
