use crate::error::MessagingError;
use crate::protocol::ProtocolMessage;
use async_trait::async_trait;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// The peer a channel is opened to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PeerAddress {
    /// A private channel to another account.
    Account(String),
    /// The channel of a group feed.
    Feed(String),
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerAddress::Account(account) => write!(f, "account {account}"),
            PeerAddress::Feed(feed) => write!(f, "feed {feed}"),
        }
    }
}

/// A shared reference to a [Channel].
pub type ChannelRef = Arc<dyn Channel>;

/// A conversation between accounts on which structured items can be sent.
#[async_trait]
pub trait Channel: Debug + Send + Sync {
    /// The identifier of the channel. A feed channel is identified by the feed id.
    fn id(&self) -> &str;

    /// Sends `item` to every other member of the channel.
    async fn send_item(&self, item: serde_json::Value) -> Result<(), MessagingError>;
}

/// Observes the channels of a [Messaging] endpoint.
pub trait MessagingListener: Send + Sync {
    /// Called for every item another member sends on `channel`. `sender` is the account of the
    /// sending member as reported by the transport.
    fn on_incoming(&self, channel: &ChannelRef, sender: &str, item: &serde_json::Value);

    fn on_channel_added(&self, _channel: &ChannelRef) {}

    fn on_channel_removed(&self, _channel_id: &str) {}
}

/// Identifies a registered [MessagingListener].
pub type ListenerId = u64;

/// The messaging substrate of one account.
#[async_trait]
pub trait Messaging: Debug + Send + Sync {
    /// The account this endpoint acts as.
    fn identity(&self) -> &str;

    /// Returns the channel to `peer`, opening it if necessary.
    async fn open_channel(&self, peer: &PeerAddress) -> Result<ChannelRef, MessagingError>;

    /// Looks up an open channel by its id.
    fn channel(&self, id: &str) -> Option<ChannelRef>;

    fn add_listener(&self, listener: Arc<dyn MessagingListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

pub(crate) async fn send_message(
    channel: &ChannelRef,
    message: &ProtocolMessage,
) -> Result<(), MessagingError> {
    channel.send_item(message.encode()?).await
}
