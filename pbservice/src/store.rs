use std::collections::HashMap;

use crate::proto::pbpb::{ClientHistory, PutArgs, SyncArgs};

/// 32-bit FNV-1a.
pub fn hash(s: &str) -> u32 {
    s.bytes().fold(0x811c_9dc5, |h: u32, b| {
        (h ^ u32::from(b)).wrapping_mul(0x0100_0193)
    })
}

/// The value a hash-put stores when the key currently holds `old`.
pub fn hash_put_value(old: &str, value: &str) -> String {
    hash(&format!("{}{}", old, value)).to_string()
}

/// Replies already given, per client and sequence number. Entries are never
/// dropped, so a retry arriving at any later time is still recognised.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DuplicateTable {
    clients: HashMap<String, HashMap<i64, String>>,
}

impl DuplicateTable {
    pub fn lookup(&self, client_id: &str, seq: i64) -> Option<&str> {
        self.clients
            .get(client_id)
            .and_then(|seen| seen.get(&seq))
            .map(String::as_str)
    }

    pub fn record(&mut self, client_id: &str, seq: i64, previous: String) {
        self.clients
            .entry(client_id.to_owned())
            .or_default()
            .insert(seq, previous);
    }

    pub fn len(&self) -> usize {
        self.clients.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of applying a client put.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    /// Seen before; nothing changed. Carries the recorded previous value.
    Duplicate(String),
    /// Applied now. `value` is what the key holds afterwards.
    Fresh { previous: String, value: String },
}

/// The replicated key/value data together with its duplicate table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KvState {
    data: HashMap<String, String>,
    duplicates: DuplicateTable,
    // count of writes this state reflects, in the primary's numbering
    stamp: u64,
}

impl KvState {
    /// A missing key reads as the empty string.
    pub fn get(&self, key: &str) -> String {
        self.data.get(key).cloned().unwrap_or_default()
    }

    pub fn duplicates(&self) -> &DuplicateTable {
        &self.duplicates
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Applies a client put at the primary, resolving hash-puts.
    pub fn apply_put(&mut self, args: &PutArgs) -> Applied {
        if let Some(previous) = self.duplicates.lookup(&args.client_id, args.seq) {
            return Applied::Duplicate(previous.to_owned());
        }
        let (previous, value) = if args.do_hash {
            let old = self.get(&args.key);
            let value = hash_put_value(&old, &args.value);
            (old, value)
        } else {
            (String::new(), args.value.clone())
        };
        self.duplicates
            .record(&args.client_id, args.seq, previous.clone());
        self.data.insert(args.key.clone(), value.clone());
        self.stamp += 1;
        Applied::Fresh { previous, value }
    }

    /// Applies a put forwarded by the primary. The value is already resolved
    /// and `previous_value` is what the primary recorded for it. Returns false
    /// when the write was seen before and skipped.
    pub fn apply_forwarded(&mut self, args: &PutArgs) -> bool {
        if self.duplicates.lookup(&args.client_id, args.seq).is_some() {
            return false;
        }
        self.duplicates
            .record(&args.client_id, args.seq, args.previous_value.clone());
        self.data.insert(args.key.clone(), args.value.clone());
        self.stamp = self.stamp.max(args.stamp);
        true
    }

    /// A deep copy in wire form.
    pub fn snapshot(&self) -> SyncArgs {
        SyncArgs {
            data: self.data.clone(),
            duplicates: self
                .duplicates
                .clients
                .iter()
                .map(|(client, replies)| {
                    let history = ClientHistory {
                        replies: replies.clone(),
                    };
                    (client.clone(), history)
                })
                .collect(),
            stamp: self.stamp,
        }
    }

    /// Replaces everything with `snapshot`.
    pub fn install(&mut self, snapshot: SyncArgs) {
        self.data = snapshot.data;
        self.duplicates = DuplicateTable {
            clients: snapshot
                .duplicates
                .into_iter()
                .map(|(client, history)| (client, history.replies))
                .collect(),
        };
        self.stamp = snapshot.stamp;
    }
}
