//! Registry service protocol
//!
//! A resident process owns the [`FleetRegistry`] (and with it the waiting
//! list) and serves it on a Unix socket. Each request is one JSON object
//! on its own line, answered by one JSON line:
//!
//! ```text
//! {"execute":"add_client","arguments":{"name":"edge1"}}
//! {"return":{"name":"edge1","address":"172.21.0.2","netmask":"255.255.0.0"}}
//! ```
//!
//! Failures come back as `{"error":{"kind":...,"message":...}}`.

use crate::error::{ErrorKind, ErrorReport};
use crate::registry::FleetRegistry;
use crate::types::*;
use crate::{Error, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, trace, warn};

/// One registry operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "execute", content = "arguments", rename_all = "snake_case")]
pub enum Request {
    ListFleet,
    AddClient { name: String },
    RemoveClient { name: String },
    SelfRegister {
        name: String,
        username: String,
        password: String,
    },
    ConnectionBundle { name: String },
    GetCredential { name: String },
    RemoveCredential { name: String },
    RegistrationState { name: String },
}

impl Request {
    /// Operation name, safe to log
    pub fn operation(&self) -> &'static str {
        match self {
            Request::ListFleet => "list_fleet",
            Request::AddClient { .. } => "add_client",
            Request::RemoveClient { .. } => "remove_client",
            Request::SelfRegister { .. } => "self_register",
            Request::ConnectionBundle { .. } => "connection_bundle",
            Request::GetCredential { .. } => "get_credential",
            Request::RemoveCredential { .. } => "remove_credential",
            Request::RegistrationState { .. } => "registration_state",
        }
    }
}

/// Reply to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Return(serde_json::Value),
    Error(ErrorReport),
}

/// Run one request against the registry
pub async fn dispatch(registry: &FleetRegistry, request: Request) -> Response {
    let result = match request {
        Request::ListFleet => to_value(registry.list_fleet().await),
        Request::AddClient { name } => to_value(registry.add_client(&name).await),
        Request::RemoveClient { name } => to_value(registry.remove_client(&name).await),
        Request::SelfRegister {
            name,
            username,
            password,
        } => to_value(registry.self_register(&name, &username, &password).await),
        Request::ConnectionBundle { name } => {
            to_value(registry.get_connection_bundle(&name).await)
        }
        Request::GetCredential { name } => to_value(registry.get_credential(&name).await),
        Request::RemoveCredential { name } => {
            to_value(registry.remove_credential(&name).await)
        }
        Request::RegistrationState { name } => {
            to_value(Ok(registry.registration_state(&name).await))
        }
    };

    match result {
        Ok(value) => Response::Return(value),
        Err(e) => Response::Error(ErrorReport::from(&e)),
    }
}

fn to_value<T: Serialize>(result: Result<T>) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(result?)?)
}

/// Accept connections until the listener fails; each connection gets a task
pub async fn serve(listener: UnixListener, registry: Arc<FleetRegistry>) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let registry = registry.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &registry).await {
                warn!("Registry connection failed: {}", e);
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, registry: &FleetRegistry) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let response = match serde_json::from_slice::<Request>(&line) {
            Ok(request) => {
                debug!("Registry request: {}", request.operation());
                dispatch(registry, request).await
            }
            Err(e) => Response::Error(ErrorReport {
                kind: ErrorKind::InvalidRequest,
                message: Error::InvalidRequest(e.to_string()).to_string(),
            }),
        };

        let mut reply = serde_json::to_vec(&response)?;
        reply.push(b'\n');
        write.write_all(&reply).await?;
        write.flush().await?;
    }
}

/// Client side of the registry service
#[derive(Debug, Clone)]
pub struct RegistryClient {
    socket: PathBuf,
}

impl RegistryClient {
    pub fn new(socket: impl AsRef<Path>) -> Self {
        Self {
            socket: socket.as_ref().to_path_buf(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Send one request on a fresh connection and decode the reply
    async fn call<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            Error::ServiceUnavailable(format!("{}: {}", self.socket.display(), e))
        })?;
        let (read, mut write) = stream.into_split();

        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        trace!("Registry call: {}", request.operation());
        write.write_all(&line).await?;
        write.flush().await?;

        let mut reader = BufReader::new(read);
        let mut reply = Vec::new();
        if reader.read_until(b'\n', &mut reply).await? == 0 {
            return Err(Error::ServiceUnavailable(format!(
                "{}: connection closed before reply",
                self.socket.display()
            )));
        }

        match serde_json::from_slice(&reply)? {
            Response::Return(value) => Ok(serde_json::from_value(value)?),
            Response::Error(report) => Err(Error::Remote(report)),
        }
    }

    pub async fn list_fleet(&self) -> Result<FleetView> {
        self.call(Request::ListFleet).await
    }

    pub async fn add_client(&self, name: &str) -> Result<ProvisioningRecord> {
        self.call(Request::AddClient {
            name: name.to_string(),
        })
        .await
    }

    pub async fn remove_client(&self, name: &str) -> Result<RemovalReport> {
        self.call(Request::RemoveClient {
            name: name.to_string(),
        })
        .await
    }

    pub async fn self_register(
        &self,
        name: &str,
        username: &str,
        password: &str,
    ) -> Result<Registration> {
        self.call(Request::SelfRegister {
            name: name.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
        .await
    }

    pub async fn get_connection_bundle(&self, name: &str) -> Result<ConnectionBundle> {
        self.call(Request::ConnectionBundle {
            name: name.to_string(),
        })
        .await
    }

    pub async fn get_credential(&self, name: &str) -> Result<Option<Credential>> {
        self.call(Request::GetCredential {
            name: name.to_string(),
        })
        .await
    }

    pub async fn remove_credential(&self, name: &str) -> Result<bool> {
        self.call(Request::RemoveCredential {
            name: name.to_string(),
        })
        .await
    }

    pub async fn registration_state(&self, name: &str) -> Result<RegistrationState> {
        self.call(Request::RegistrationState {
            name: name.to_string(),
        })
        .await
    }
}
