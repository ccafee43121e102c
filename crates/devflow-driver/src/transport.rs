/*!
 * Transport abstraction for device communication.
 *
 * Workers never talk to the network directly; every wire-bound command is
 * handed to the device's [`Transport`] as a [`RequestKind`] plus the raw
 * command payload. Payload parsing for the structured request kinds lives
 * here as well, so transports receive well-formed envelopes.
 */
use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::command::{CommandPayload, CMD_DOWNLOAD_FILE, CMD_HTTP_GET, CMD_HTTP_PUT, CMD_JSON_REQUEST, CMD_SOAP_REQUEST};

/// Error type for transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to reach the device at all
    #[error("Connect error: {0}")]
    Connect(String),

    /// The device was reached but the request failed
    #[error("Request error: {0}")]
    Request(String),

    /// The command payload does not fit the request kind
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The wire-level request classes a transport must support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Plain GET of a path or resource
    Get,
    /// PUT of a path or resource
    Put,
    /// SOAP envelope POST
    Soap,
    /// JSON body POST
    Json,
    /// File download to local disk
    Download,
}

impl RequestKind {
    /// Map a queued command name to its request kind, if it is a
    /// transport-bound command at all
    pub fn from_command_name(name: &str) -> Option<Self> {
        match name {
            CMD_HTTP_GET => Some(Self::Get),
            CMD_HTTP_PUT => Some(Self::Put),
            CMD_SOAP_REQUEST => Some(Self::Soap),
            CMD_JSON_REQUEST => Some(Self::Json),
            CMD_DOWNLOAD_FILE => Some(Self::Download),
            _ => None,
        }
    }

    /// Stable name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Soap => "soap",
            Self::Json => "json",
            Self::Download => "download",
        }
    }
}

/// What came back from the device for one request
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    /// Protocol status code, when the transport has one
    pub status: Option<u16>,
    /// Raw response body as text
    pub text: String,
}

impl TransportResponse {
    /// Create a response with a status code and body
    pub fn new<S: Into<String>>(status: u16, text: S) -> Self {
        Self {
            status: Some(status),
            text: text.into(),
        }
    }

    /// Whether the status, if present, indicates success
    pub fn is_success(&self) -> bool {
        match self.status {
            Some(code) => (200..300).contains(&code),
            None => true,
        }
    }
}

/// A parsed SOAP request payload: path, SOAP action, and envelope body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapEnvelope {
    /// Request path on the device
    pub path: String,
    /// Value for the SOAPAction header
    pub action: String,
    /// Envelope body to post
    pub body: String,
}

impl SoapEnvelope {
    /// Parse a SOAP payload from its three-part list form
    pub fn parse(payload: &CommandPayload) -> Result<Self, TransportError> {
        let parts = payload.to_list();
        if parts.len() != 3 {
            return Err(TransportError::InvalidPayload(format!(
                "SOAP request needs path, action and body, got {} part(s)",
                parts.len()
            )));
        }
        let mut parts = parts.into_iter();
        Ok(Self {
            path: parts.next().unwrap_or_default(),
            action: parts.next().unwrap_or_default(),
            body: parts.next().unwrap_or_default(),
        })
    }
}

/// A parsed file-download payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSpec {
    /// Source path or URL on the device
    pub source: String,
    /// Local destination path
    pub destination: String,
    /// Credentials, when the source requires authentication
    pub credentials: Option<(String, String)>,
}

impl DownloadSpec {
    /// Parse a download payload. The short form is source and destination;
    /// the long form appends an authentication scheme, username and
    /// password, where scheme `none` or empty means unauthenticated.
    pub fn parse(payload: &CommandPayload) -> Result<Self, TransportError> {
        let parts = payload.to_list();
        match parts.len() {
            2 => Ok(Self {
                source: parts[0].clone(),
                destination: parts[1].clone(),
                credentials: None,
            }),
            5 => {
                let scheme = parts[2].trim().to_ascii_lowercase();
                let credentials = if scheme.is_empty() || scheme == "none" {
                    None
                } else {
                    Some((parts[3].clone(), parts[4].clone()))
                };
                Ok(Self {
                    source: parts[0].clone(),
                    destination: parts[1].clone(),
                    credentials,
                })
            }
            n => Err(TransportError::InvalidPayload(format!(
                "download needs source and destination (plus optional auth), got {} part(s)",
                n
            ))),
        }
    }
}

/// Device communication channel.
///
/// Implementations hold whatever client or socket state they need; the
/// worker supplies the resolved device address and per-device headers on
/// every call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one request against the device
    async fn execute(
        &self,
        kind: RequestKind,
        address: &str,
        headers: &HashMap<String, String>,
        payload: &CommandPayload,
    ) -> Result<TransportResponse, TransportError>;
}

/// Transport for devices that do not communicate on their own, such as
/// child endpoints whose parent owns the connection. Requests are logged
/// and dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl NullTransport {
    /// Create a null transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for NullTransport {
    async fn execute(
        &self,
        kind: RequestKind,
        address: &str,
        _headers: &HashMap<String, String>,
        _payload: &CommandPayload,
    ) -> Result<TransportResponse, TransportError> {
        debug!(
            kind = kind.as_str(),
            address = address,
            "null transport dropping request"
        );
        Ok(TransportResponse::default())
    }
}
