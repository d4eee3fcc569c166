//! Federation of DataShare nodes.
//!
//! A node answers queries over stores that live on other nodes by sending `select` requests over
//! a [Messaging] substrate ([RemoteStore]), and answers the requests of other nodes against its
//! own stores ([ResponderFeed]). The [MetaStore] maps every URI of the DataShare namespaces to the
//! store that serves it.

pub mod error;
pub mod memory;
mod messaging;
mod metastore;
pub mod protocol;
mod remote;
mod responder;

pub use messaging::{Channel, ChannelRef, ListenerId, Messaging, MessagingListener, PeerAddress};
pub use metastore::MetaStore;
pub use protocol::{Operation, Protocol, ProtocolMessage};
pub use remote::{RemotePeer, RemoteStore};
pub use responder::{ResponderFeed, DEFAULT_REPLY_BATCH_SIZE};
