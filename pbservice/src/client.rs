use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use futures::executor::block_on;
use rand::Rng;

use crate::errors::{Error, Result};
use crate::proto::pbpb::*;
use crate::proto::viewpb::{GetViewArgs, ViewClient};
use crate::server::PING_INTERVAL;
use crate::view::View;

const CLERK_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Clerk {
    pub name: String,
    id: String,
    seq: AtomicI64,
    views: ViewClient,
    // by server id
    servers: HashMap<String, PbClient>,
    retry_interval: Duration,
    timeout: Duration,
}

impl fmt::Debug for Clerk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clerk")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

impl Clerk {
    pub fn new(name: String, views: ViewClient, servers: HashMap<String, PbClient>) -> Clerk {
        let id = format!("{:016x}", rand::thread_rng().gen::<u64>());
        Clerk {
            name,
            id,
            seq: AtomicI64::new(0),
            views,
            servers,
            retry_interval: PING_INTERVAL,
            timeout: CLERK_TIMEOUT,
        }
    }

    /// Gives up on a request after `timeout` instead of the default 30s.
    pub fn with_timeout(mut self, timeout: Duration) -> Clerk {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn primary(&self) -> Result<&PbClient> {
        let reply = block_on(self.views.get(&GetViewArgs {}))?;
        let view = reply.view.map(View::from).unwrap_or_default();
        let primary = view.primary.ok_or(Error::NoPrimary)?;
        self.servers
            .get(&primary)
            .ok_or(Error::UnknownPeer(primary))
    }

    /// Sends to whoever the view service names as primary until one answers
    /// without a refusal. Every retry carries the same arguments.
    fn request<R>(
        &self,
        what: &str,
        send: impl Fn(&PbClient) -> pbrpc::RpcFuture<pbrpc::Result<R>>,
        is_ok: impl Fn(&R) -> bool,
    ) -> Result<R> {
        let start = Instant::now();
        loop {
            match self.primary() {
                Ok(primary) => match block_on(send(primary)) {
                    Ok(reply) if is_ok(&reply) => {
                        debug!("{}: {} done in {:?}", self.name, what, start.elapsed());
                        return Ok(reply);
                    }
                    Ok(_) => debug!("{}: {} refused by {}", self.name, what, primary.name()),
                    Err(e) => debug!("{}: {} failed: {}", self.name, what, e),
                },
                Err(e) => debug!("{}: no primary for {}: {}", self.name, what, e),
            }
            if start.elapsed() >= self.timeout {
                warn!("{}: {} timed out after {:?}", self.name, what, self.timeout);
                return Err(Error::Timeout);
            }
            thread::sleep(self.retry_interval);
        }
    }

    /// Fetches the current value for a key; a missing key reads as "".
    pub fn get(&self, key: String) -> Result<String> {
        let args = GetArgs {
            key,
            client_id: self.id.clone(),
            seq: self.next_seq(),
        };
        let what = format!("get({:?})", args.key);
        let reply = self.request(&what, |s| s.get(&args), GetReply::is_ok)?;
        Ok(reply.value)
    }

    fn put_ext(&self, key: String, value: String, do_hash: bool) -> Result<String> {
        let args = PutArgs {
            key,
            value,
            do_hash,
            client_id: self.id.clone(),
            seq: self.next_seq(),
            ..PutArgs::default()
        };
        let what = format!("put({:?}, hash={})", args.key, do_hash);
        let reply = self.request(&what, |s| s.put(&args), PutReply::is_ok)?;
        Ok(reply.previous_value)
    }

    pub fn put(&self, key: String, value: String) -> Result<()> {
        self.put_ext(key, value, false).map(|_| ())
    }

    /// Stores `hash(old ++ value)` and returns `old`.
    pub fn put_hash(&self, key: String, value: String) -> Result<String> {
        self.put_ext(key, value, true)
    }
}
