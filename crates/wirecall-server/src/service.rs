//! Service catalog.
//!
//! A [`Service`] is a named set of invocable methods bound to one receiver
//! instance. Methods are registered explicitly through [`ServiceBuilder`] as
//! a capability table (name to typed invoke closure), so method shape
//! (argument decodable, reply encodable and default-constructible, one
//! error-signaling return) is checked by the compiler at registration.
//!
//! The catalog is immutable after `build()` except for the per-method call
//! counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use wirecall_common::codec::BodyCodec;

/// Error reported by a method body, carried back to the remote caller in the
/// response header.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MethodError(pub String);

impl From<String> for MethodError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for MethodError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

pub type MethodResult = std::result::Result<(), MethodError>;

type ErasedInvoke =
    Box<dyn Fn(&BodyCodec, &[u8]) -> std::result::Result<Vec<u8>, MethodError> + Send + Sync>;

/// One catalog entry: the type-erased invoke path plus its call counter.
pub struct MethodEntry {
    invoke: ErasedInvoke,
    num_calls: Arc<AtomicU64>,
}

impl MethodEntry {
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }
}

/// A named catalog of invocable methods bound to one receiver.
pub struct Service {
    name: String,
    methods: HashMap<String, MethodEntry>,
}

impl Service {
    /// Starts building a service. Panics if `name` is not an exported-style
    /// name (leading uppercase letter); that is a configuration fault, not a
    /// runtime condition.
    pub fn builder<Recv>(name: impl Into<String>, receiver: Recv) -> ServiceBuilder<Recv>
    where
        Recv: Send + Sync + 'static,
    {
        ServiceBuilder::new(name, receiver)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Registered method names, sorted for stable introspection output.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// Times `method` has been invoked, or `None` for an unknown method.
    pub fn call_count(&self, method: &str) -> Option<u64> {
        self.methods.get(method).map(MethodEntry::num_calls)
    }

    /// Decodes the argument with `codec`, runs the method, and returns the
    /// encoded reply. A failure (undecodable argument, or an error from the
    /// method body) comes back as a [`MethodError`] for the response
    /// header. The call counter only advances when the method body actually
    /// runs.
    pub fn invoke(
        &self,
        method: &str,
        codec: &BodyCodec,
        arg: &[u8],
    ) -> std::result::Result<Vec<u8>, MethodError> {
        let entry = self
            .methods
            .get(method)
            .ok_or_else(|| MethodError(format!("can't find method {}", method)))?;
        (entry.invoke)(codec, arg)
    }
}

/// Builder assembling a [`Service`] from typed method registrations.
pub struct ServiceBuilder<Recv> {
    name: String,
    receiver: Arc<Recv>,
    methods: HashMap<String, MethodEntry>,
}

impl<Recv> ServiceBuilder<Recv>
where
    Recv: Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, receiver: Recv) -> Self {
        let name = name.into();
        assert!(
            is_exported_name(&name),
            "rpc server: {} is not a valid service name",
            name
        );
        Self {
            name,
            receiver: Arc::new(receiver),
            methods: HashMap::new(),
        }
    }

    /// Registers one method. The handler takes the receiver, a decoded
    /// argument and a mutable reply slot (pre-initialized via `Default`, so
    /// map- and list-shaped replies start empty rather than absent), and
    /// signals failure through its single [`MethodResult`] return.
    pub fn method<Args, Reply, F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        Args: DeserializeOwned + Send + 'static,
        Reply: Serialize + Default + Send + 'static,
        F: Fn(&Recv, Args, &mut Reply) -> MethodResult + Send + Sync + 'static,
    {
        let name = name.into();
        let receiver = Arc::clone(&self.receiver);
        let num_calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&num_calls);

        let invoke: ErasedInvoke = Box::new(move |codec, arg_bytes| {
            let args: Args = codec
                .decode(arg_bytes)
                .map_err(|e| MethodError(format!("read body error: {}", e)))?;
            counter.fetch_add(1, Ordering::Relaxed);
            let mut reply = Reply::default();
            handler(&receiver, args, &mut reply)?;
            codec
                .encode(&reply)
                .map_err(|e| MethodError(format!("write reply error: {}", e)))
        });

        self.methods.insert(name, MethodEntry { invoke, num_calls });
        self
    }

    pub fn build(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}

fn is_exported_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}
