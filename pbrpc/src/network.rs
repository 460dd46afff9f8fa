use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::executor::ThreadPool;
use futures::future::FutureExt;
use futures::select;
use futures::stream::StreamExt;
use futures_timer::Delay;
use log::{debug, error};
use rand::{thread_rng, Rng};

use crate::client::{Client, Rpc};
use crate::error::{Error, Result};
use crate::server::Server;

// How often an in-flight call checks whether its server went away.
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct Endpoint {
    enabled: bool,
    server_name: Option<String>,
}

#[derive(Default)]
struct Routing {
    endpoints: HashMap<String, Endpoint>,
    // A deleted server keeps its slot so counts can still be reported.
    servers: HashMap<String, Option<Server>>,
}

impl Routing {
    fn target(&self, client_name: &str) -> Option<Server> {
        let endpoint = self.endpoints.get(client_name)?;
        if !endpoint.enabled {
            return None;
        }
        let server_name = endpoint.server_name.as_ref()?;
        self.servers.get(server_name)?.clone()
    }
}

struct NetworkCore {
    reliable: AtomicBool,
    // Calls on disabled endpoints take up to 7s to fail instead of 100ms.
    long_delays: AtomicBool,
    routing: Mutex<Routing>,
    count: AtomicUsize,
    sender: UnboundedSender<Rpc>,
    poller: ThreadPool,
    worker: ThreadPool,
}

/// An in-process network of named client endpoints and named servers.
///
/// Every call is delivered asynchronously. An endpoint that is disabled, not
/// connected, or connected to a deleted server behaves like a partitioned
/// host: the call times out after a short random delay. An unreliable
/// network additionally delays, loses requests, and loses replies.
#[derive(Clone)]
pub struct Network {
    core: Arc<NetworkCore>,
}

impl Network {
    pub fn new() -> Network {
        let (net, incoming) = Network::create();
        net.start(incoming);
        net
    }

    /// Builds a network without starting delivery, handing back the queue of
    /// outgoing requests.
    pub fn create() -> (Network, UnboundedReceiver<Rpc>) {
        let (sender, incoming) = unbounded();
        let net = Network {
            core: Arc::new(NetworkCore {
                reliable: AtomicBool::new(true),
                long_delays: AtomicBool::new(false),
                routing: Mutex::new(Routing::default()),
                count: AtomicUsize::new(0),
                sender,
                poller: ThreadPool::builder()
                    .pool_size(2)
                    .name_prefix("pbrpc-poller-")
                    .create()
                    .expect("failed to start network poller"),
                worker: ThreadPool::builder()
                    .name_prefix("pbrpc-worker-")
                    .create()
                    .expect("failed to start network worker"),
            }),
        };
        (net, incoming)
    }

    fn start(&self, mut incoming: UnboundedReceiver<Rpc>) {
        let net = self.clone();
        self.core.poller.spawn_ok(async move {
            while let Some(mut rpc) = incoming.next().await {
                let resp = match rpc.take_resp_sender() {
                    Some(resp) => resp,
                    None => continue,
                };
                let net1 = net.clone();
                net.core.poller.spawn_ok(async move {
                    let res = net1.deliver(rpc).await;
                    if resp.send(res).is_err() {
                        error!("caller went away before its reply was ready");
                    }
                });
            }
        });
    }

    pub fn add_server(&self, server: Server) {
        let mut routing = self.core.routing.lock().unwrap();
        routing
            .servers
            .insert(server.core.name.clone(), Some(server));
    }

    /// Kills a server: in-flight and future calls to it fail.
    pub fn delete_server(&self, name: &str) {
        let mut routing = self.core.routing.lock().unwrap();
        if let Some(slot) = routing.servers.get_mut(name) {
            *slot = None;
        }
    }

    /// Creates a disabled, unconnected endpoint.
    pub fn create_client(&self, name: String) -> Client {
        let mut routing = self.core.routing.lock().unwrap();
        routing.endpoints.insert(name.clone(), Endpoint::default());
        Client {
            name,
            sender: self.core.sender.clone(),
            hooks: Arc::new(Mutex::new(None)),
            worker: self.core.worker.clone(),
        }
    }

    /// Points an endpoint at a server.
    pub fn connect(&self, client_name: &str, server_name: &str) {
        let mut routing = self.core.routing.lock().unwrap();
        routing
            .endpoints
            .entry(client_name.to_owned())
            .or_default()
            .server_name = Some(server_name.to_owned());
    }

    pub fn enable(&self, client_name: &str, enabled: bool) {
        debug!(
            "endpoint {} {}",
            client_name,
            if enabled { "enabled" } else { "disabled" }
        );
        let mut routing = self.core.routing.lock().unwrap();
        routing
            .endpoints
            .entry(client_name.to_owned())
            .or_default()
            .enabled = enabled;
    }

    pub fn set_reliable(&self, yes: bool) {
        self.core.reliable.store(yes, Ordering::Release);
    }

    pub fn set_long_delays(&self, yes: bool) {
        self.core.long_delays.store(yes, Ordering::Release);
    }

    /// Requests dispatched to `server_name`, or 0 for an unknown server.
    pub fn count(&self, server_name: &str) -> usize {
        let routing = self.core.routing.lock().unwrap();
        routing
            .servers
            .get(server_name)
            .and_then(Option::as_ref)
            .map_or(0, Server::count)
    }

    /// Requests sent on the whole network, delivered or not.
    pub fn total_count(&self) -> usize {
        self.core.count.load(Ordering::Relaxed)
    }

    fn target(&self, client_name: &str) -> Option<Server> {
        self.core.routing.lock().unwrap().target(client_name)
    }

    // True once the endpoint no longer reaches this exact server instance.
    fn is_unreachable(&self, client_name: &str, server: &Server) -> bool {
        self.target(client_name)
            .map_or(true, |s| s.core.id != server.core.id)
    }

    async fn deliver(&self, mut rpc: Rpc) -> Result<Vec<u8>> {
        self.core.count.fetch_add(1, Ordering::Relaxed);
        let reliable = self.core.reliable.load(Ordering::Acquire);

        let server = match self.target(&rpc.client_name) {
            Some(server) => server,
            None => {
                let ms = if self.core.long_delays.load(Ordering::Acquire) {
                    thread_rng().gen_range(0, 7000)
                } else {
                    thread_rng().gen_range(0, 100)
                };
                debug!("{:?} unreachable, timing out in {}ms", rpc, ms);
                Delay::new(Duration::from_millis(ms)).await;
                return Err(Error::Timeout);
            }
        };

        if !reliable {
            let ms = thread_rng().gen_range(0, 27);
            Delay::new(Duration::from_millis(ms)).await;
            if thread_rng().gen_range(0, 1000) < 100 {
                debug!("{:?} request lost", rpc);
                return Err(Error::Timeout);
            }
        }
        let drop_reply = !reliable && thread_rng().gen_range(0, 1000) < 100;

        let fq_name = rpc.fq_name;
        let req = rpc.req.take().unwrap_or_default();
        let hooks = rpc.hooks.lock().unwrap().clone();
        if let Some(hooks) = &hooks {
            hooks.before_dispatch(fq_name, &req)?;
        }

        // Race the handler against the server being killed, so a call into a
        // dead server fails instead of hanging.
        let resp = select! {
            res = server.dispatch(fq_name, &req).fuse() => res,
            _ = self.wait_unreachable(&rpc.client_name, &server).fuse() => Err(Error::Stopped),
        };
        let resp = match &hooks {
            Some(hooks) => hooks.after_dispatch(fq_name, resp)?,
            None => resp?,
        };

        // A reply from a server that was killed meanwhile must not be seen.
        if self.is_unreachable(&rpc.client_name, &server) {
            return Err(Error::Stopped);
        }
        if drop_reply {
            debug!("{:?} reply lost", rpc);
            return Err(Error::Timeout);
        }
        Ok(resp)
    }

    async fn wait_unreachable(&self, client_name: &str, server: &Server) {
        loop {
            Delay::new(LIVENESS_CHECK_INTERVAL).await;
            if self.is_unreachable(client_name, server) {
                debug!("{} can no longer reach {}", client_name, server.name());
                return;
            }
        }
    }
}
