//! Messages and services on the wire.

pub mod viewpb {
    use prost_derive::Message;

    /// A membership assignment. An empty `primary` or `backup` means none.
    #[derive(Clone, PartialEq, Message)]
    pub struct View {
        #[prost(uint64, tag = "1")]
        pub viewnum: u64,
        #[prost(string, tag = "2")]
        pub primary: String,
        #[prost(string, tag = "3")]
        pub backup: String,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct PingArgs {
        #[prost(string, tag = "1")]
        pub me: String,
        /// The last view number this server has seen.
        #[prost(uint64, tag = "2")]
        pub viewnum: u64,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct PingReply {
        #[prost(message, optional, tag = "1")]
        pub view: Option<View>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct GetViewArgs {}

    #[derive(Clone, PartialEq, Message)]
    pub struct GetViewReply {
        #[prost(message, optional, tag = "1")]
        pub view: Option<View>,
    }

    pbrpc::service! {
        service viewservice {
            rpc ping(PingArgs) returns (PingReply);
            rpc get(GetViewArgs) returns (GetViewReply);
        }
    }
    pub use self::viewservice::{
        add_service as add_view_service, Client as ViewClient, Service as ViewService,
    };
}

pub mod pbpb {
    use std::collections::HashMap;

    use prost_derive::{Enumeration, Message};

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
    pub enum Status {
        Ok = 0,
        ErrNoKey = 1,
        ErrWrongServer = 2,
        /// A full-state sync older than a write the backup already holds.
        ErrStaleSync = 3,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct GetArgs {
        #[prost(string, tag = "1")]
        pub key: String,
        #[prost(string, tag = "2")]
        pub client_id: String,
        #[prost(int64, tag = "3")]
        pub seq: i64,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct GetReply {
        #[prost(enumeration = "Status", tag = "1")]
        pub err: i32,
        #[prost(string, tag = "2")]
        pub value: String,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct PutArgs {
        #[prost(string, tag = "1")]
        pub key: String,
        #[prost(string, tag = "2")]
        pub value: String,
        /// Store `hash(old ++ value)` instead of `value`.
        #[prost(bool, tag = "3")]
        pub do_hash: bool,
        #[prost(string, tag = "4")]
        pub client_id: String,
        #[prost(int64, tag = "5")]
        pub seq: i64,
        /// Set on forwarded writes only: what the primary recorded as the
        /// reply for this request.
        #[prost(string, tag = "6")]
        pub previous_value: String,
        /// Set on forwarded writes only: the primary's write count after
        /// applying this one.
        #[prost(uint64, tag = "7")]
        pub stamp: u64,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct PutReply {
        #[prost(enumeration = "Status", tag = "1")]
        pub err: i32,
        #[prost(string, tag = "2")]
        pub previous_value: String,
    }

    /// What one client's requests left behind: seq -> recorded previous value.
    #[derive(Clone, PartialEq, Message)]
    pub struct ClientHistory {
        #[prost(map = "int64, string", tag = "1")]
        pub replies: HashMap<i64, String>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct SyncArgs {
        #[prost(map = "string, string", tag = "1")]
        pub data: HashMap<String, String>,
        #[prost(map = "string, message", tag = "2")]
        pub duplicates: HashMap<String, ClientHistory>,
        /// The primary's write count when the snapshot was taken.
        #[prost(uint64, tag = "3")]
        pub stamp: u64,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct SyncReply {
        #[prost(enumeration = "Status", tag = "1")]
        pub err: i32,
    }

    pbrpc::service! {
        service pbservice {
            /// Client read, answered only by the primary.
            rpc get(GetArgs) returns (GetReply);
            /// Client write, answered only by the primary.
            rpc put(PutArgs) returns (PutReply);
            /// Primary asks its backup whether it still agrees on the view.
            rpc primary_to_backup_get(GetArgs) returns (GetReply);
            /// Primary hands an already-resolved write to its backup.
            rpc primary_to_backup_put(PutArgs) returns (PutReply);
            /// Primary replaces its backup's whole state.
            rpc backup_sync(SyncArgs) returns (SyncReply);
        }
    }
    pub use self::pbservice::{add_service as add_pb_service, Client as PbClient, Service as PbService};

    macro_rules! status_accessors {
        ($($reply:ident),*) => {
            $(
                impl $reply {
                    /// The reply status; an unknown code reads as `ErrWrongServer`.
                    pub fn status(&self) -> Status {
                        Status::from_i32(self.err).unwrap_or(Status::ErrWrongServer)
                    }

                    pub fn is_ok(&self) -> bool {
                        self.status() == Status::Ok
                    }
                }
            )*
        };
    }
    status_accessors!(GetReply, PutReply, SyncReply);

    impl GetReply {
        pub fn ok(value: String) -> GetReply {
            GetReply {
                err: Status::Ok as i32,
                value,
            }
        }

        pub fn wrong_server() -> GetReply {
            GetReply {
                err: Status::ErrWrongServer as i32,
                value: String::new(),
            }
        }
    }

    impl PutReply {
        pub fn ok(previous_value: String) -> PutReply {
            PutReply {
                err: Status::Ok as i32,
                previous_value,
            }
        }

        pub fn wrong_server() -> PutReply {
            PutReply {
                err: Status::ErrWrongServer as i32,
                previous_value: String::new(),
            }
        }
    }

    impl SyncReply {
        pub fn with(status: Status) -> SyncReply {
            SyncReply {
                err: status as i32,
            }
        }
    }
}
