//! An in-process messaging network.
//!
//! Every account gets a [MemoryMessaging] endpoint from a shared [MemoryNetwork]. Items are
//! delivered synchronously to the listeners of every other member of a channel, which makes the
//! network suitable for tests and for embedding several nodes into one process.

use crate::error::MessagingError;
use crate::messaging::{
    Channel, ChannelRef, ListenerId, Messaging, MessagingListener, PeerAddress,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Listeners = Vec<(ListenerId, Arc<dyn MessagingListener>)>;

#[derive(Default)]
struct NetworkState {
    /// Registered listeners per account. Every account with an endpoint has an entry.
    listeners: RwLock<FxHashMap<String, Listeners>>,
    /// Members per channel id.
    channels: RwLock<FxHashMap<String, Vec<String>>>,
    next_listener: AtomicU64,
}

impl NetworkState {
    fn listeners_of(&self, account: &str) -> Listeners {
        self.listeners
            .read()
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    fn members_of(&self, channel_id: &str) -> Option<Vec<String>> {
        self.channels.read().get(channel_id).cloned()
    }

    fn view(self: &Arc<Self>, channel_id: &str, member: &str) -> ChannelRef {
        Arc::new(MemoryChannel {
            id: channel_id.to_owned(),
            member: member.to_owned(),
            network: Arc::downgrade(self),
        })
    }

    fn notify_added(self: &Arc<Self>, channel_id: &str, members: &[String]) {
        for member in members {
            let channel = self.view(channel_id, member);
            for (_, listener) in self.listeners_of(member) {
                listener.on_channel_added(&channel);
            }
        }
    }

    fn deliver(
        self: &Arc<Self>,
        channel_id: &str,
        sender: &str,
        item: &serde_json::Value,
    ) -> Result<(), MessagingError> {
        let members = self
            .members_of(channel_id)
            .filter(|members| members.iter().any(|member| member == sender))
            .ok_or_else(|| MessagingError::ChannelClosed(channel_id.to_owned()))?;

        for member in members.iter().filter(|member| *member != sender) {
            let channel = self.view(channel_id, member);
            for (_, listener) in self.listeners_of(member) {
                listener.on_incoming(&channel, sender, item);
            }
        }
        Ok(())
    }
}

/// A network of in-process [MemoryMessaging] endpoints.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<NetworkState>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the endpoint of `account`, registering the account on first use.
    pub fn endpoint(&self, account: impl Into<String>) -> Arc<MemoryMessaging> {
        let account = account.into();
        self.state
            .listeners
            .write()
            .entry(account.clone())
            .or_default();
        Arc::new(MemoryMessaging {
            account,
            state: Arc::clone(&self.state),
        })
    }

    /// Creates the feed `id` with the given members and notifies them.
    pub fn create_feed(&self, id: impl Into<String>, members: impl IntoIterator<Item = String>) {
        let id = id.into();
        let members = members.into_iter().collect::<Vec<_>>();
        self.state
            .channels
            .write()
            .insert(id.clone(), members.clone());
        self.state.notify_added(&id, &members);
    }

    /// Removes the feed `id` and notifies its members.
    pub fn remove_feed(&self, id: &str) {
        let Some(members) = self.state.channels.write().remove(id) else {
            return;
        };
        for member in &members {
            for (_, listener) in self.state.listeners_of(member) {
                listener.on_channel_removed(id);
            }
        }
    }
}

impl Debug for MemoryNetwork {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("accounts", &self.state.listeners.read().len())
            .field("channels", &self.state.channels.read().len())
            .finish()
    }
}

/// The endpoint of one account in a [MemoryNetwork].
pub struct MemoryMessaging {
    account: String,
    state: Arc<NetworkState>,
}

/// The id of the private channel between two accounts.
fn private_channel_id(lhs: &str, rhs: &str) -> String {
    if lhs <= rhs {
        format!("{lhs}:{rhs}")
    } else {
        format!("{rhs}:{lhs}")
    }
}

#[async_trait]
impl Messaging for MemoryMessaging {
    fn identity(&self) -> &str {
        &self.account
    }

    async fn open_channel(&self, peer: &PeerAddress) -> Result<ChannelRef, MessagingError> {
        match peer {
            PeerAddress::Account(account) => {
                if !self.state.listeners.read().contains_key(account) {
                    return Err(MessagingError::UnknownPeer(peer.to_string()));
                }
                let id = private_channel_id(&self.account, account);
                let members = vec![self.account.clone(), account.clone()];
                let created = {
                    let mut channels = self.state.channels.write();
                    if channels.contains_key(&id) {
                        false
                    } else {
                        channels.insert(id.clone(), members.clone());
                        true
                    }
                };
                if created {
                    tracing::debug!(channel = %id, "Opened private channel");
                    self.state.notify_added(&id, &members);
                }
                Ok(self.state.view(&id, &self.account))
            }
            PeerAddress::Feed(feed) => self
                .channel(feed)
                .ok_or_else(|| MessagingError::UnknownPeer(peer.to_string())),
        }
    }

    fn channel(&self, id: &str) -> Option<ChannelRef> {
        let members = self.state.members_of(id)?;
        members
            .contains(&self.account)
            .then(|| self.state.view(id, &self.account))
    }

    fn add_listener(&self, listener: Arc<dyn MessagingListener>) -> ListenerId {
        let id = self.state.next_listener.fetch_add(1, Ordering::Relaxed);
        self.state
            .listeners
            .write()
            .entry(self.account.clone())
            .or_default()
            .push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        if let Some(listeners) = self.state.listeners.write().get_mut(&self.account) {
            listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }
}

impl Debug for MemoryMessaging {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMessaging")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

/// The view of one member on a channel of a [MemoryNetwork].
struct MemoryChannel {
    id: String,
    member: String,
    network: Weak<NetworkState>,
}

#[async_trait]
impl Channel for MemoryChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_item(&self, item: serde_json::Value) -> Result<(), MessagingError> {
        let network = self
            .network
            .upgrade()
            .ok_or_else(|| MessagingError::ChannelClosed(self.id.clone()))?;
        network.deliver(&self.id, &self.member, &item)
    }
}

impl Debug for MemoryChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .field("member", &self.member)
            .finish_non_exhaustive()
    }
}
