//! Blocking wrapper around [`crate::ControlClient`] for callers without a runtime

use std::collections::BTreeMap;
use std::net::ToSocketAddrs;
use std::time::Duration;

use devsim_core::Value;
use tokio::runtime::{Builder, Runtime};

use crate::client::{ControlClient as AsyncClient, ObjectApi, DEFAULT_TIMEOUT};
use crate::error::ClientError;
use crate::wire::ApiListing;

/// Control client driving its own single-threaded runtime
///
/// Must not be used from within an async context.
#[derive(Debug)]
pub struct ControlClient {
    runtime: Runtime,
    client: AsyncClient,
}

impl ControlClient {
    /// Connect with the default timeout
    pub fn connect(address: impl ToSocketAddrs) -> Result<Self, ClientError> {
        Self::connect_with_timeout(address, DEFAULT_TIMEOUT)
    }

    /// Connect with a custom per-request timeout
    pub fn connect_with_timeout(address: impl ToSocketAddrs, timeout: Duration) -> Result<Self, ClientError> {
        let addresses: Vec<_> = address.to_socket_addrs()?.collect();
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let client = runtime.block_on(AsyncClient::connect_with_timeout(&addresses[..], timeout))?;
        Ok(Self { runtime, client })
    }

    /// Send one request and wait for its result
    pub fn json_rpc(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        self.runtime.block_on(self.client.json_rpc(method, params))
    }

    /// Read a property
    pub fn get(&self, object: &str, property: &str) -> Result<Value, ClientError> {
        self.runtime.block_on(self.client.get(object, property))
    }

    /// Write a property
    pub fn set(&self, object: &str, property: &str, value: impl Into<Value>) -> Result<(), ClientError> {
        self.runtime.block_on(self.client.set(object, property, value))
    }

    /// Call a method
    pub fn call(&self, object: &str, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.runtime.block_on(self.client.call(object, method, args))
    }

    /// Listing of an object
    pub fn api(&self, object: &str) -> Result<ApiListing, ClientError> {
        self.runtime.block_on(self.client.api(object))
    }

    /// Names of the exposed objects
    pub fn objects(&self) -> Result<Vec<String>, ClientError> {
        self.runtime.block_on(self.client.objects())
    }

    /// Proxy for one object
    pub fn get_object(&self, name: &str) -> Result<ObjectProxy<'_>, ClientError> {
        let listing = self.api(name)?;
        Ok(ObjectProxy {
            client: self,
            api: ObjectApi::new(name, listing),
        })
    }

    /// Proxies for every exposed object
    pub fn get_object_collection(&self) -> Result<BTreeMap<String, ObjectProxy<'_>>, ClientError> {
        self.objects()?
            .into_iter()
            .map(|name| self.get_object(&name).map(|proxy| (name, proxy)))
            .collect()
    }
}

/// Blocking counterpart of [`crate::ObjectProxy`]
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
    pub fn get(&self, property: &str) -> Result<Value, ClientError> {
        self.api.check_property(property)?;
        self.client.get(self.api.name(), property)
    }

    /// Write a property
    pub fn set(&self, property: &str, value: impl Into<Value>) -> Result<(), ClientError> {
        self.api.check_property(property)?;
        self.client.set(self.api.name(), property, value)
    }

    /// Call a method
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.api.check_method(method)?;
        self.client.call(self.api.name(), method, args)
    }
}
