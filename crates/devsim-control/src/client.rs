//! Async control client

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use devsim_core::Value;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::error::ClientError;
use crate::object::{API_SUFFIX, GET_OBJECTS};
use crate::wire::{ApiListing, Request, Response, MAX_LINE_LEN};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

struct Connection {
    lines: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn exchange(&mut self, line: &[u8], id: u64) -> Result<Response, ClientError> {
        self.writer.write_all(line).await?;
        loop {
            let line = match self.lines.next().await {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    return Err(ClientError::Protocol(format!(
                        "response exceeds {} bytes",
                        MAX_LINE_LEN
                    )))
                }
                Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
                None => return Err(ClientError::Protocol("connection closed by server".into())),
            };
            let response: Response = serde_json::from_str(&line)?;
            match response.id.as_u64() {
                Some(received) if received == id => return Ok(response),
                // Late answer to a request that already timed out
                Some(received) if received < id => {
                    debug!("Skipping stale response {} while waiting for {}", received, id);
                }
                _ => {
                    return Err(ClientError::Protocol(format!(
                        "response id {} does not match request id {}",
                        response.id, id
                    )))
                }
            }
        }
    }
}

/// Client for a control server
///
/// Requests on one client are sent one at a time; each waits at most the
/// configured timeout for its response.
pub struct ControlClient {
    connection: Mutex<Connection>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ControlClient {
    /// Connect with the default timeout
    pub async fn connect(address: impl ToSocketAddrs) -> Result<Self, ClientError> {
        Self::connect_with_timeout(address, DEFAULT_TIMEOUT).await
    }

    /// Connect with a custom per-request timeout
    pub async fn connect_with_timeout(
        address: impl ToSocketAddrs,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            connection: Mutex::new(Connection {
                lines: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LEN)),
                writer,
            }),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// Per-request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one request and wait for its result
    pub async fn json_rpc(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        let result = self.request(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn request(&self, method: &str, params: Vec<Value>) -> Result<serde_json::Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_vec(&Request::new(id, method, params))?;
        line.push(b'\n');

        let mut connection = self.connection.lock().await;
        let response = tokio::time::timeout(self.timeout, connection.exchange(&line, id))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))??;

        match (response.result, response.error) {
            (_, Some(error)) => {
                let (kind, message) = match error.data {
                    Some(data) => (data.kind, data.message),
                    None => (String::new(), error.message),
                };
                Err(ClientError::Remote {
                    code: error.code,
                    kind,
                    message,
                })
            }
            (Some(result), None) => Ok(result),
            (None, None) => Ok(serde_json::Value::Null),
        }
    }

    /// Read a property
    pub async fn get(&self, object: &str, property: &str) -> Result<Value, ClientError> {
        self.json_rpc(&format!("{}.{}:get", object, property), Vec::new())
            .await
    }

    /// Write a property
    pub async fn set(&self, object: &str, property: &str, value: impl Into<Value>) -> Result<(), ClientError> {
        self.json_rpc(&format!("{}.{}:set", object, property), vec![value.into()])
            .await
            .map(|_| ())
    }

    /// Call a method
    pub async fn call(&self, object: &str, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.json_rpc(&format!("{}.{}", object, method), args).await
    }

    /// Listing of an object; an empty name lists the whole collection
    pub async fn api(&self, object: &str) -> Result<ApiListing, ClientError> {
        let result = self
            .request(&format!("{}{}", object, API_SUFFIX), Vec::new())
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Names of the exposed objects
    pub async fn objects(&self) -> Result<Vec<String>, ClientError> {
        let result = self.request(GET_OBJECTS, Vec::new()).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Proxy for one object
    pub async fn get_object(&self, name: &str) -> Result<ObjectProxy<'_>, ClientError> {
        let listing = self.api(name).await?;
        Ok(ObjectProxy {
            client: self,
            api: ObjectApi::new(name, listing),
        })
    }

    /// Proxies for every exposed object
    pub async fn get_object_collection(&self) -> Result<BTreeMap<String, ObjectProxy<'_>>, ClientError> {
        let mut objects = BTreeMap::new();
        for name in self.objects().await? {
            let proxy = self.get_object(&name).await?;
            objects.insert(name, proxy);
        }
        Ok(objects)
    }
}

/// Members of a remote object, split into properties and methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectApi {
    name: String,
    class: String,
    methods: BTreeSet<String>,
    properties: BTreeSet<String>,
    writable: BTreeSet<String>,
}

impl ObjectApi {
    /// Sort a listing into properties and methods
    pub fn new(name: &str, listing: ApiListing) -> Self {
        let mut api = Self {
            name: name.to_string(),
            class: listing.class,
            methods: BTreeSet::new(),
            properties: BTreeSet::new(),
            writable: BTreeSet::new(),
        };
        for entry in listing.methods {
            if let Some(property) = entry.strip_suffix(":get") {
                api.properties.insert(property.to_string());
            } else if let Some(property) = entry.strip_suffix(":set") {
                api.writable.insert(property.to_string());
            } else {
                api.methods.insert(entry);
            }
        }
        api
    }

    /// Object name on the server
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server side type name
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Method names
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(String::as_str)
    }

    /// Property names
    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(String::as_str)
    }

    /// Whether `property` has a setter
    pub fn is_writable(&self, property: &str) -> bool {
        self.writable.contains(property)
    }

    pub(crate) fn check_property(&self, property: &str) -> Result<(), ClientError> {
        if self.properties.contains(property) {
            Ok(())
        } else {
            Err(self.missing(property))
        }
    }

    pub(crate) fn check_method(&self, method: &str) -> Result<(), ClientError> {
        if self.methods.contains(method) {
            Ok(())
        } else {
            Err(self.missing(method))
        }
    }

    fn missing(&self, member: &str) -> ClientError {
        ClientError::NoSuchMember {
            object: self.name.clone(),
            member: member.to_string(),
        }
    }
}

/// Typed access to one remote object
#[derive(Debug)]
pub struct ObjectProxy<'a> {
    client: &'a ControlClient,
    api: ObjectApi,
}

impl ObjectProxy<'_> {
    /// Members of the object
    pub fn api(&self) -> &ObjectApi {
        &self.api
    }

    /// Read a property
    pub async fn get(&self, property: &str) -> Result<Value, ClientError> {
        self.api.check_property(property)?;
        self.client.get(self.api.name(), property).await
    }

    /// Write a property
    pub async fn set(&self, property: &str, value: impl Into<Value>) -> Result<(), ClientError> {
        self.api.check_property(property)?;
        self.client.set(self.api.name(), property, value).await
    }

    /// Call a method
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.api.check_method(method)?;
        self.client.call(self.api.name(), method, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_api_splits_members() {
        let api = ObjectApi::new(
            "device",
            ApiListing {
                class: "Motor".into(),
                methods: vec![
                    "position:get".into(),
                    "target:get".into(),
                    "target:set".into(),
                    "stop".into(),
                ],
            },
        );
        assert_eq!(api.class(), "Motor");
        assert_eq!(api.properties().collect::<Vec<_>>(), vec!["position", "target"]);
        assert_eq!(api.methods().collect::<Vec<_>>(), vec!["stop"]);
        assert!(api.is_writable("target"));
        assert!(!api.is_writable("position"));
        assert!(matches!(
            api.check_method("position"),
            Err(ClientError::NoSuchMember { .. })
        ));
    }
}
