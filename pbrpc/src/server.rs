use std::collections::hash_map::{Entry, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture};

use crate::error::{Error, Result};

// Distinguishes a restarted server from the instance it replaced.
static NEXT_SERVER_ID: AtomicUsize = AtomicUsize::new(0);

pub type RpcFuture<T> = BoxFuture<'static, T>;

/// Handles one encoded request for a single method.
pub type Handler = dyn FnOnce(&[u8]) -> RpcFuture<Result<Vec<u8>>>;

/// Produces handlers for the methods of one service. Generated by `service!`.
pub trait HandlerFactory: Sync + Send + 'static {
    fn handler(&self, method: &'static str) -> Box<Handler>;
}

pub struct ServerBuilder {
    name: String,
    pub(crate) services: HashMap<&'static str, Box<dyn HandlerFactory>>,
}

impl ServerBuilder {
    pub fn new(name: String) -> ServerBuilder {
        ServerBuilder {
            name,
            services: HashMap::new(),
        }
    }

    /// Registers a service under `service_name`. Each name may be taken once.
    pub fn add_service(
        &mut self,
        service_name: &'static str,
        factory: Box<dyn HandlerFactory>,
    ) -> Result<()> {
        match self.services.entry(service_name) {
            Entry::Occupied(_) => Err(Error::Other(format!(
                "service {} is already registered on {}",
                service_name, self.name
            ))),
            Entry::Vacant(slot) => {
                slot.insert(factory);
                Ok(())
            }
        }
    }

    pub fn build(self) -> Server {
        Server {
            core: Arc::new(ServerCore {
                name: self.name,
                id: NEXT_SERVER_ID.fetch_add(1, Ordering::Relaxed),
                services: self.services,
                count: AtomicUsize::new(0),
            }),
        }
    }
}

pub(crate) struct ServerCore {
    pub(crate) name: String,
    pub(crate) id: usize,
    services: HashMap<&'static str, Box<dyn HandlerFactory>>,
    count: AtomicUsize,
}

/// A named collection of services reachable through a `Network`.
#[derive(Clone)]
pub struct Server {
    pub(crate) core: Arc<ServerCore>,
}

impl Server {
    /// Number of requests dispatched to this server so far.
    pub fn count(&self) -> usize {
        self.core.count.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Routes `fq_name` ("service.method") to its handler.
    pub(crate) fn dispatch(&self, fq_name: &'static str, req: &[u8]) -> RpcFuture<Result<Vec<u8>>> {
        self.core.count.fetch_add(1, Ordering::Relaxed);
        let factory = fq_name
            .split_once('.')
            .and_then(|(service, method)| Some((self.core.services.get(service)?, method)));
        match factory {
            Some((factory, method)) => factory.handler(method)(req),
            None => Box::pin(future::err(Error::Unimplemented(format!(
                "{} has no {}",
                self.core.name, fq_name
            )))),
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.core.name)
            .field("id", &self.core.id)
            .finish()
    }
}
