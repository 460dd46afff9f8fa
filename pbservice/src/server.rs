use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use futures::executor::block_on;

use crate::errors::{Error, Result};
use crate::proto::pbpb::*;
use crate::retry::RetryPolicy;
use crate::store::{Applied, KvState};
use crate::view::{Role, View, ViewCache};

/// Tunables of a server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// How often the view service is pinged.
    pub ping_interval: Duration,
    /// Applied to backup forwarding and to full-state syncs.
    pub retry: RetryPolicy,
}

pub const PING_INTERVAL: Duration = Duration::from_millis(100);

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            ping_interval: PING_INTERVAL,
            retry: RetryPolicy::new(3, PING_INTERVAL),
        }
    }
}

/// Everything a server knows, guarded as a whole by `Node`'s lock.
pub struct PbServer {
    me: String,
    view: View,
    role: Role,
    state: KvState,
    // backup while primary, primary while backup
    peer: Option<String>,
    // highest stamp forwarded by the current primary; older syncs are refused
    forwarded: u64,
}

impl PbServer {
    pub fn new(me: String) -> PbServer {
        PbServer {
            me,
            view: View::default(),
            role: Role::Idle,
            state: KvState::default(),
            peer: None,
            forwarded: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    /// Adopts a view learned from the view service. Returns the backup that
    /// needs a full-state sync: one is due when this server is primary with a
    /// backup and either just became primary or the view moved on.
    pub fn adopt(&mut self, view: View) -> Option<String> {
        let was_primary = self.role == Role::Primary;
        let viewnum_changed = view.viewnum != self.view.viewnum;
        let role = Role::of(&view, &self.me);
        if role != self.role || viewnum_changed {
            info!("{} adopts {} as {:?}", self.me, view, role);
        }
        let same_primary = view.primary == self.view.primary;
        if role != Role::Backup || self.role != Role::Backup || !same_primary {
            self.forwarded = 0;
        }
        self.role = role;
        self.peer = match role {
            Role::Primary => view.backup.clone(),
            Role::Backup => view.primary.clone(),
            Role::Idle => None,
        };
        self.view = view;

        if role == Role::Primary && (!was_primary || viewnum_changed) {
            self.view.backup.clone()
        } else {
            None
        }
    }

    /// Stops acting as primary after losing touch with the view service.
    pub fn demote(&mut self) {
        if self.role == Role::Primary {
            warn!("{} lost the view service, stepping down", self.me);
            self.role = Role::Idle;
        }
    }

    /// Backup-side half of the get check: a backup answers from its store.
    pub fn backup_get(&self, args: &GetArgs) -> GetReply {
        if self.role != Role::Backup {
            return GetReply::wrong_server();
        }
        GetReply::ok(self.state.get(&args.key))
    }

    pub fn backup_put(&mut self, args: &PutArgs) -> PutReply {
        if self.role != Role::Backup {
            return PutReply::wrong_server();
        }
        if let Some(previous) = self.state.duplicates().lookup(&args.client_id, args.seq) {
            debug!(
                "{} skips forwarded duplicate {}#{}",
                self.me, args.client_id, args.seq
            );
            return PutReply::ok(previous.to_owned());
        }
        self.state.apply_forwarded(args);
        self.forwarded = self.forwarded.max(args.stamp);
        PutReply::ok(String::new())
    }

    pub fn backup_sync(&mut self, args: SyncArgs) -> SyncReply {
        if self.role != Role::Backup {
            return SyncReply::with(Status::ErrWrongServer);
        }
        if args.stamp < self.forwarded {
            warn!(
                "{} refuses a snapshot at {} after applying write {}",
                self.me, args.stamp, self.forwarded
            );
            return SyncReply::with(Status::ErrStaleSync);
        }
        self.state.install(args);
        info!(
            "{} installed a snapshot of {} keys in {}",
            self.me,
            self.state.len(),
            self.view
        );
        SyncReply::with(Status::Ok)
    }
}

/// A running server: the shared `PbServer` plus its connections.
#[derive(Clone)]
pub struct Node {
    server: Arc<Mutex<PbServer>>,
    me: String,
    views: ViewCache,
    // by server id
    peers: Arc<HashMap<String, PbClient>>,
    config: ServerConfig,
    dead: Arc<AtomicBool>,
}

impl Node {
    /// Starts serving and pinging the view service every `ping_interval`.
    pub fn new(
        server: PbServer,
        views: ViewCache,
        peers: HashMap<String, PbClient>,
        config: ServerConfig,
    ) -> Node {
        let node = Node {
            me: server.me.clone(),
            server: Arc::new(Mutex::new(server)),
            views,
            peers: Arc::new(peers),
            config,
            dead: Arc::new(AtomicBool::new(false)),
        };
        node.run_tick();
        node
    }

    fn run_tick(&self) {
        let node = self.clone();
        thread::spawn(move || {
            while !node.dead.load(Ordering::Acquire) {
                block_on(node.tick());
                thread::sleep(node.config.ping_interval);
            }
            debug!("{} tick loop exits", node.me);
        });
    }

    /// One round of the role controller.
    pub async fn tick(&self) {
        let viewnum = self.server.lock().unwrap().view.viewnum;
        match self.views.ping(viewnum).await {
            Ok(view) => {
                let resync = self.server.lock().unwrap().adopt(view);
                if let Some(backup) = resync {
                    self.resync(backup);
                }
            }
            Err(e) => {
                debug!("{} ping failed: {}", self.me, e);
                self.server.lock().unwrap().demote();
            }
        }
    }

    fn peer(&self, id: &str) -> Result<&PbClient> {
        self.peers
            .get(id)
            .ok_or_else(|| Error::UnknownPeer(id.to_owned()))
    }

    /// Pushes the whole state to `backup` in the background. Each attempt
    /// sends a fresh snapshot.
    fn resync(&self, backup: String) {
        let peer = match self.peer(&backup) {
            Ok(peer) => peer.clone(),
            Err(e) => {
                warn!("{} cannot sync: {}", self.me, e);
                return;
            }
        };
        let node = self.clone();
        peer.clone().spawn(async move {
            let res = node
                .config
                .retry
                .run(|attempt| {
                    let args = node.server.lock().unwrap().state.snapshot();
                    let peer = peer.clone();
                    let me = node.me.clone();
                    let backup = backup.clone();
                    async move {
                        debug!("{} syncs {} (attempt {})", me, backup, attempt + 1);
                        match peer.backup_sync(&args).await {
                            Ok(reply) if reply.is_ok() => Ok(()),
                            Ok(reply) => Err(Error::Rpc(pbrpc::Error::Other(format!(
                                "sync refused with {:?}",
                                reply.status()
                            )))),
                            Err(e) => Err(Error::Rpc(e)),
                        }
                    }
                })
                .await;
            match res {
                Ok(()) => {
                    info!("{} synced its state to {}", node.me, backup);
                    node.server.lock().unwrap().peer = Some(backup);
                }
                Err(e) => warn!("{} gave up syncing {}: {}", node.me, backup, e),
            }
        });
    }

    /// Hands a resolved write to `backup` in the background.
    fn forward(&self, backup: String, args: PutArgs) {
        let peer = match self.peer(&backup) {
            Ok(peer) => peer.clone(),
            Err(e) => {
                warn!("{} cannot forward: {}", self.me, e);
                return;
            }
        };
        let retry = self.config.retry;
        let me = self.me.clone();
        peer.clone().spawn(async move {
            let res = retry
                .run(|_| {
                    let peer = peer.clone();
                    let args = args.clone();
                    async move {
                        match peer.primary_to_backup_put(&args).await {
                            Ok(reply) if reply.is_ok() => Ok(()),
                            Ok(reply) => Err(Error::Rpc(pbrpc::Error::Other(format!(
                                "forward refused with {:?}",
                                reply.status()
                            )))),
                            Err(e) => Err(Error::Rpc(e)),
                        }
                    }
                })
                .await;
            if let Err(e) = res {
                warn!(
                    "{} dropped write {}#{} for {}: {}",
                    me, args.client_id, args.seq, backup, e
                );
            }
        });
    }

    /// Whether `backup` still acts as our backup. Undeliverable calls count
    /// as agreement; only an explicit refusal says no.
    async fn backup_agrees(&self, backup: &str, args: &GetArgs) -> bool {
        let peer = match self.peer(backup) {
            Ok(peer) => peer.clone(),
            Err(e) => {
                warn!("{} cannot check backup: {}", self.me, e);
                return true;
            }
        };
        match peer.primary_to_backup_get(args).await {
            Ok(reply) => reply.status() != Status::ErrWrongServer,
            Err(e) => {
                debug!("{} could not reach backup {}: {}", self.me, backup, e);
                true
            }
        }
    }

    async fn do_get(&self, args: GetArgs) -> GetReply {
        let backup = {
            let server = self.server.lock().unwrap();
            if server.role != Role::Primary {
                return GetReply::wrong_server();
            }
            server.view.backup.clone()
        };

        if let Some(backup) = backup {
            if !self.backup_agrees(&backup, &args).await {
                warn!("{} refused by backup {}, rechecking view", self.me, backup);
                match self.views.refresh().await {
                    Ok(view) if view.is_primary(&self.me) => {}
                    Ok(view) => {
                        info!("{} superseded in {}", self.me, view);
                        return GetReply::wrong_server();
                    }
                    Err(e) => {
                        warn!("{} cannot confirm primacy: {}", self.me, e);
                        return GetReply::wrong_server();
                    }
                }
            }
        }

        let server = self.server.lock().unwrap();
        if server.role != Role::Primary {
            return GetReply::wrong_server();
        }
        GetReply::ok(server.state.get(&args.key))
    }

    fn do_put(&self, args: PutArgs) -> PutReply {
        let (previous, forward) = {
            let mut server = self.server.lock().unwrap();
            if server.role != Role::Primary {
                return PutReply::wrong_server();
            }
            match server.state.apply_put(&args) {
                Applied::Duplicate(previous) => {
                    debug!(
                        "{} replays {}#{}",
                        self.me, args.client_id, args.seq
                    );
                    return PutReply::ok(previous);
                }
                Applied::Fresh { previous, value } => {
                    let stamp = server.state.stamp();
                    let forward = server.view.backup.clone().map(|backup| {
                        let args = PutArgs {
                            value,
                            do_hash: false,
                            previous_value: previous.clone(),
                            stamp,
                            ..args
                        };
                        (backup, args)
                    });
                    (previous, forward)
                }
            }
        };
        if let Some((backup, args)) = forward {
            self.forward(backup, args);
        }
        PutReply::ok(previous)
    }

    pub fn id(&self) -> &str {
        &self.me
    }

    pub fn role(&self) -> Role {
        self.server.lock().unwrap().role
    }

    pub fn view(&self) -> View {
        self.server.lock().unwrap().view.clone()
    }

    pub fn replication_peer(&self) -> Option<String> {
        self.server.lock().unwrap().peer.clone()
    }

    /// Reads the local store directly, whatever the role.
    pub fn local_value(&self, key: &str) -> String {
        self.server.lock().unwrap().state.get(key)
    }

    pub fn state_snapshot(&self) -> KvState {
        self.server.lock().unwrap().state.clone()
    }

    /// Stops the tick loop. The server keeps answering until it is removed
    /// from the network.
    pub fn kill(&self) {
        self.dead.store(true, Ordering::Release);
        info!("{} killed", self.me);
    }
}

#[async_trait::async_trait]
impl PbService for Node {
    async fn get(&self, args: GetArgs) -> pbrpc::Result<GetReply> {
        Ok(self.do_get(args).await)
    }

    async fn put(&self, args: PutArgs) -> pbrpc::Result<PutReply> {
        Ok(self.do_put(args))
    }

    async fn primary_to_backup_get(&self, args: GetArgs) -> pbrpc::Result<GetReply> {
        Ok(self.server.lock().unwrap().backup_get(&args))
    }

    async fn primary_to_backup_put(&self, args: PutArgs) -> pbrpc::Result<PutReply> {
        Ok(self.server.lock().unwrap().backup_put(&args))
    }

    async fn backup_sync(&self, args: SyncArgs) -> pbrpc::Result<SyncReply> {
        Ok(self.server.lock().unwrap().backup_sync(args))
    }
}
