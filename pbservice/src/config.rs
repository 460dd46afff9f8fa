use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::client::Clerk;
use crate::proto::pbpb::*;
use crate::proto::viewpb::{self, *};
use crate::server::{Node, PbServer, ServerConfig};
use crate::view::{Role, View, ViewCache};

static ID: AtomicUsize = AtomicUsize::new(300_000);

fn uniqstring() -> String {
    format!("{}", ID.fetch_add(1, Ordering::Relaxed))
}

pub const VIEW_SERVICE: &str = "viewservice";

pub fn server_name(i: usize) -> String {
    format!("server-{}", i)
}

fn init_logger() {
    use std::sync::Once;
    static LOGGER_INIT: Once = Once::new();
    LOGGER_INIT.call_once(env_logger::init);
}

#[derive(Default)]
struct Script {
    current: View,
    // a server listed here keeps hearing this view from ping
    pinned: HashMap<String, View>,
    // last viewnum each server acknowledged
    acked: HashMap<String, u64>,
}

/// A view service whose views are set by the test instead of decided from
/// liveness.
#[derive(Clone, Default)]
pub struct ScriptedViews {
    script: Arc<Mutex<Script>>,
}

impl ScriptedViews {
    fn current(&self) -> View {
        self.script.lock().unwrap().current.clone()
    }
}

#[async_trait::async_trait]
impl ViewService for ScriptedViews {
    async fn ping(&self, args: PingArgs) -> pbrpc::Result<PingReply> {
        let mut script = self.script.lock().unwrap();
        script.acked.insert(args.me.clone(), args.viewnum);
        let view = script
            .pinned
            .get(&args.me)
            .unwrap_or(&script.current)
            .clone();
        Ok(PingReply {
            view: Some(viewpb::View::from(view)),
        })
    }

    async fn get(&self, _: GetViewArgs) -> pbrpc::Result<GetViewReply> {
        Ok(GetViewReply {
            view: Some(viewpb::View::from(self.current())),
        })
    }
}

struct Servers {
    nodes: Vec<Option<Node>>,
    // endnames[i][j]: server i's endpoint to server j
    endnames: Vec<Vec<String>>,
    // server i's endpoint to the view service
    view_ends: Vec<String>,
}

pub struct Config {
    pub net: pbrpc::Network,
    pub n: usize,
    views: ScriptedViews,
    servers: Mutex<Servers>,
    clerks: Mutex<HashMap<String, Vec<String>>>,

    // time at which the Config was created.
    start: Instant,

    // begin()/end() statistics
    t0: Mutex<Instant>,
    rpcs0: AtomicUsize,
    ops: AtomicUsize,
}

impl Config {
    pub fn new(n: usize, unreliable: bool) -> Config {
        init_logger();

        let servers = Servers {
            nodes: vec![None; n],
            endnames: vec![vec![String::new(); n]; n],
            view_ends: vec![String::new(); n],
        };
        let cfg = Config {
            n,
            net: pbrpc::Network::new(),
            views: ScriptedViews::default(),
            servers: Mutex::new(servers),
            clerks: Mutex::new(HashMap::new()),
            start: Instant::now(),
            t0: Mutex::new(Instant::now()),
            rpcs0: AtomicUsize::new(0),
            ops: AtomicUsize::new(0),
        };

        let mut builder = pbrpc::ServerBuilder::new(VIEW_SERVICE.to_owned());
        add_view_service(cfg.views.clone(), &mut builder).unwrap();
        cfg.net.add_server(builder.build());

        for i in 0..cfg.n {
            cfg.start_server(i);
        }
        cfg.connect_all();

        cfg.net.set_reliable(!unreliable);

        cfg
    }

    pub fn op(&self) {
        self.ops.fetch_add(1, Ordering::Relaxed);
    }

    fn rpc_total(&self) -> usize {
        self.net.total_count()
    }

    pub fn check_timeout(&self) {
        // enforce a two minute real-time limit on each test
        if self.start.elapsed() > Duration::from_secs(120) {
            panic!("test took longer than 120 seconds");
        }
    }

    /// Installs the next view and returns its number.
    pub fn set_view(&self, primary: Option<usize>, backup: Option<usize>) -> u64 {
        let mut script = self.views.script.lock().unwrap();
        let viewnum = script.current.viewnum + 1;
        script.current = View {
            viewnum,
            primary: primary.map(server_name),
            backup: backup.map(server_name),
        };
        info!("view service moves to {}", script.current);
        viewnum
    }

    pub fn current_view(&self) -> View {
        self.views.current()
    }

    /// Server i keeps hearing the view it would get right now, whatever
    /// happens later.
    pub fn pin_view(&self, i: usize) {
        let mut script = self.views.script.lock().unwrap();
        let view = script.current.clone();
        debug!("pin {} to {}", server_name(i), view);
        script.pinned.insert(server_name(i), view);
    }

    pub fn unpin_view(&self, i: usize) {
        let mut script = self.views.script.lock().unwrap();
        script.pinned.remove(&server_name(i));
    }

    /// The view number server i last reported seeing, if it pinged at all.
    pub fn acked_viewnum(&self, i: usize) -> Option<u64> {
        let script = self.views.script.lock().unwrap();
        script.acked.get(&server_name(i)).cloned()
    }

    /// Cuts server i off from the view service, or reconnects it.
    pub fn set_view_reachable(&self, i: usize, reachable: bool) {
        debug!("view service reachable from {}: {}", i, reachable);
        let servers = self.servers.lock().unwrap();
        self.net.enable(&servers.view_ends[i], reachable);
    }

    /// Attach server i to servers listed in to
    fn connect(&self, i: usize, to: &[usize], servers: &Servers) {
        debug!("connect peer {} to {:?}", i, to);
        // endpoints i uses to call them
        for j in to {
            let endname = &servers.endnames[i][*j];
            self.net.enable(endname, true);
        }

        // endpoints they use to call i
        for j in to {
            let endname = &servers.endnames[*j][i];
            self.net.enable(endname, true);
        }
    }

    /// Detach server i from the servers listed in from
    fn disconnect(&self, i: usize, from: &[usize], servers: &Servers) {
        debug!("disconnect peer {} from {:?}", i, from);
        for j in from {
            if !servers.endnames[i].is_empty() {
                let endname = &servers.endnames[i][*j];
                self.net.enable(endname, false);
            }
        }

        for j in from {
            if !servers.endnames[*j].is_empty() {
                let endname = &servers.endnames[*j][i];
                self.net.enable(endname, false);
            }
        }
    }

    pub fn all(&self) -> Vec<usize> {
        (0..self.n).collect()
    }

    pub fn connect_all(&self) {
        let servers = self.servers.lock().unwrap();
        for i in 0..self.n {
            self.connect(i, &self.all(), &*servers);
            self.net.enable(&servers.view_ends[i], true);
        }
    }

    /// Sets up 2 partitions with connectivity between servers in each partition.
    /// Every server still reaches the view service.
    pub fn partition(&self, p1: &[usize], p2: &[usize]) {
        debug!("partition servers into: {:?} {:?}", p1, p2);
        let servers = self.servers.lock().unwrap();
        for i in p1 {
            self.disconnect(*i, p2, &*servers);
            self.connect(*i, p1, &*servers);
        }
        for i in p2 {
            self.disconnect(*i, p1, &*servers);
            self.connect(*i, p2, &*servers);
        }
    }

    /// A clerk reaching the view service and every server.
    pub fn make_client(&self) -> Clerk {
        let mut servers = HashMap::new();
        let mut endnames = Vec::with_capacity(self.n + 1);
        for j in 0..self.n {
            let name = uniqstring();
            let cli = self.net.create_client(name.clone());
            self.net.connect(&name, &server_name(j));
            self.net.enable(&name, true);
            servers.insert(server_name(j), PbClient::new(cli));
            endnames.push(name);
        }
        let name = uniqstring();
        let cli = self.net.create_client(name.clone());
        self.net.connect(&name, VIEW_SERVICE);
        self.net.enable(&name, true);
        endnames.push(name);

        let ck_name = uniqstring();
        let ck = Clerk::new(ck_name.clone(), ViewClient::new(cli), servers)
            .with_timeout(Duration::from_secs(10));
        self.clerks.lock().unwrap().insert(ck_name, endnames);
        ck
    }

    pub fn delete_client(&self, ck: &Clerk) {
        self.clerks.lock().unwrap().remove(&ck.name);
    }

    /// A bare endpoint to server i, for calls no clerk would make.
    pub fn raw_client(&self, i: usize) -> PbClient {
        let name = uniqstring();
        let cli = self.net.create_client(name.clone());
        self.net.connect(&name, &server_name(i));
        self.net.enable(&name, true);
        PbClient::new(cli)
    }

    pub fn node(&self, i: usize) -> Node {
        let servers = self.servers.lock().unwrap();
        servers.nodes[i]
            .clone()
            .unwrap_or_else(|| panic!("{} is down", server_name(i)))
    }

    /// Shutdown a server by isolating it
    pub fn shutdown_server(&self, i: usize) {
        let mut servers = self.servers.lock().unwrap();
        self.disconnect(i, &self.all(), &*servers);
        self.net.enable(&servers.view_ends[i], false);
        self.net.delete_server(&server_name(i));

        if let Some(node) = servers.nodes[i].take() {
            node.kill();
        }
    }

    /// Start a server i with an empty store.
    pub fn start_server(&self, i: usize) {
        let mut servers = self.servers.lock().unwrap();
        servers.endnames[i] = (0..self.n).map(|_| uniqstring()).collect();

        let mut peers = HashMap::new();
        for (j, name) in servers.endnames[i].iter().enumerate() {
            let cli = self.net.create_client(name.clone());
            self.net.connect(name, &server_name(j));
            peers.insert(server_name(j), PbClient::new(cli));
        }

        let view_end = uniqstring();
        let cli = self.net.create_client(view_end.clone());
        self.net.connect(&view_end, VIEW_SERVICE);
        servers.view_ends[i] = view_end;

        let me = server_name(i);
        let views = ViewCache::new(me.clone(), ViewClient::new(cli));
        let node = Node::new(PbServer::new(me.clone()), views, peers, ServerConfig::default());
        servers.nodes[i] = Some(node.clone());

        let mut builder = pbrpc::ServerBuilder::new(me);
        add_pb_service(node, &mut builder).unwrap();
        self.net.add_server(builder.build());
    }

    /// Polls `cond` until it holds, panicking after `timeout`.
    pub fn wait_until(&self, what: &str, timeout: Duration, cond: impl Fn() -> bool) {
        let t0 = Instant::now();
        while !cond() {
            if t0.elapsed() > timeout {
                panic!("timed out after {:?} waiting for {}", timeout, what);
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    /// Waits until every server in `ids` has adopted view `viewnum`.
    pub fn wait_view(&self, ids: &[usize], viewnum: u64) {
        self.wait_until(
            &format!("{:?} to adopt view {}", ids, viewnum),
            Duration::from_secs(5),
            || ids.iter().all(|i| self.node(*i).view().viewnum == viewnum),
        );
    }

    /// Waits until server i plays `role`.
    pub fn wait_role(&self, i: usize, role: Role) {
        self.wait_until(
            &format!("{} to become {:?}", server_name(i), role),
            Duration::from_secs(5),
            || self.node(i).role() == role,
        );
    }

    /// Start a Test.
    /// print the Test message.
    pub fn begin(&self, description: &str) {
        println!(); // Force the log starts at a new line.
        info!("{} ...", description);
        *self.t0.lock().unwrap() = Instant::now();
        self.rpcs0.store(self.rpc_total(), Ordering::Relaxed);
        self.ops.store(0, Ordering::Relaxed);
    }

    /// End a Test -- the fact that we got here means there
    /// was no failure.
    /// print the Passed message,
    /// and some performance numbers.
    pub fn end(&self) {
        self.check_timeout();

        // real time
        let t = self.t0.lock().unwrap().elapsed();
        let nservers = self.n;
        // number of RPC sends
        let nrpc = self.rpc_total() - self.rpcs0.load(Ordering::Relaxed);
        // number of clerk get/put calls
        let nops = self.ops.load(Ordering::Relaxed);

        info!("  ... Passed --");
        info!("  {:?}  {} {} {}", t, nservers, nrpc, nops);
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        let servers = self.servers.lock().unwrap();
        for s in servers.nodes.iter().flatten() {
            s.kill();
        }
    }
}
