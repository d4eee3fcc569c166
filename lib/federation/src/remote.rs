use crate::messaging::{send_message, ChannelRef, ListenerId, Messaging, MessagingListener};
use crate::protocol::{Operation, Protocol};
use crate::PeerAddress;
use datashare_common::error::StorageError;
use datashare_common::{BindingStream, RefCounter, Store};
use datashare_model::{Binding, TriplePattern};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHasher;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::hash::BuildHasherDefault;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// A reply to an in-flight request.
#[derive(Debug)]
enum Reply {
    Data(Vec<Binding>),
    End(Option<String>),
}

type RequestTable = DashMap<u64, UnboundedSender<Reply>, BuildHasherDefault<FxHasher>>;

/// The requester side of the remote select protocol for one peer (an account or a feed).
///
/// While referenced, the peer listens on the messaging endpoint for replies and routes them to
/// the in-flight request they answer. Requests of concurrent queries share the peer and are told
/// apart by their request id.
pub struct RemotePeer {
    address: PeerAddress,
    messaging: Arc<dyn Messaging>,
    protocol: Protocol,
    /// The URI requests are sent from.
    own_uri: String,
    /// The namespace of the peer. Only replies for targets below it are accepted.
    owned_prefix: String,
    requests: RequestTable,
    next_request: AtomicU64,
    channel: Mutex<Option<ChannelRef>>,
    listener: Mutex<Option<ListenerId>>,
    refs: RefCounter,
    this: Weak<Self>,
}

impl RemotePeer {
    pub fn new(
        address: PeerAddress,
        messaging: Arc<dyn Messaging>,
        protocol: Protocol,
        own_uri: impl Into<String>,
        owned_prefix: impl Into<String>,
    ) -> Arc<Self> {
        let own_uri = own_uri.into();
        let owned_prefix = owned_prefix.into();
        Arc::new_cyclic(|this| Self {
            address,
            messaging,
            protocol,
            own_uri,
            owned_prefix,
            requests: RequestTable::default(),
            next_request: AtomicU64::new(0),
            channel: Mutex::new(None),
            listener: Mutex::new(None),
            refs: RefCounter::new(),
            this: Weak::clone(this),
        })
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// The number of requests that wait for replies.
    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    fn owns(&self, target: &str) -> bool {
        target
            .strip_prefix(self.owned_prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Replies must arrive on the channel the requests were sent on. A private channel only
    /// carries replies from the account it was opened to.
    fn accepts_from(&self, channel: &ChannelRef, sender: &str) -> bool {
        let on_own_channel = self
            .channel
            .lock()
            .as_ref()
            .is_some_and(|own| own.id() == channel.id());
        let from_peer = match &self.address {
            PeerAddress::Account(account) => account == sender,
            PeerAddress::Feed(_) => true,
        };
        if on_own_channel && !from_peer {
            tracing::debug!(peer = %self.address, sender, "Dropping reply with a forged sender");
        }
        on_own_channel && from_peer
    }

    fn add_ref(&self, uri: &str) -> Result<(), StorageError> {
        self.refs.acquire(|| {
            let this = self
                .this
                .upgrade()
                .ok_or_else(|| StorageError::NotOpen(uri.to_owned()))?;
            let id = self.messaging.add_listener(this);
            *self.listener.lock() = Some(id);
            tracing::debug!(peer = %self.address, "Listening for replies");
            Ok(())
        })
    }

    fn unref(&self) {
        self.refs.release(|| {
            if let Some(id) = self.listener.lock().take() {
                self.messaging.remove_listener(id);
            }
            self.requests.clear();
            *self.channel.lock() = None;
            tracing::debug!(peer = %self.address, "Stopped listening for replies");
        });
    }

    async fn channel(&self) -> Result<ChannelRef, StorageError> {
        let cached = self.channel.lock().clone();
        if let Some(channel) = cached {
            return Ok(channel);
        }
        let channel = self.messaging.open_channel(&self.address).await?;
        *self.channel.lock() = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// Sends a `select` for `patterns` to `target` and returns the stream of its replies.
    fn request(self: &Arc<Self>, target: &str, patterns: Vec<TriplePattern>) -> BindingStream {
        if self.refs.count() == 0 {
            let error = StorageError::NotOpen(target.to_owned());
            return futures::stream::once(async move { Err(error) }).boxed();
        }

        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (sender, replies) = unbounded_channel();
        self.requests.insert(request_id, sender);

        let message = self
            .protocol
            .select(self.own_uri.as_str(), target, request_id, patterns);
        let peer = Arc::clone(self);
        let send = async move {
            let channel = peer.channel().await?;
            send_message(&channel, &message).await?;
            Ok::<_, StorageError>(())
        }
        .boxed();

        RemoteBindingStream {
            peer: Arc::clone(self),
            target: target.to_owned(),
            request_id,
            send: Some(send),
            replies,
            buffered: VecDeque::new(),
            done: false,
        }
        .boxed()
    }
}

impl MessagingListener for RemotePeer {
    fn on_incoming(&self, channel: &ChannelRef, sender: &str, item: &serde_json::Value) {
        if !self.accepts_from(channel, sender) {
            return;
        }
        let message = match self.protocol.decode(item) {
            Ok(message) => message,
            Err(error) => {
                tracing::trace!(%error, "Dropping item");
                return;
            }
        };
        if message.op == Operation::Select
            || message.from != self.own_uri
            || !self.owns(&message.target)
        {
            return;
        }

        let request_id = message.request_id;
        let delivered = match message.op {
            Operation::SolutionData => self
                .requests
                .get(&request_id)
                .map(|sender| sender.send(Reply::Data(message.data.unwrap_or_default()))),
            Operation::SolutionEnd => self
                .requests
                .remove(&request_id)
                .map(|(_, sender)| sender.send(Reply::End(message.error))),
            Operation::Select => None,
        };
        if !matches!(delivered, Some(Ok(()))) {
            tracing::trace!(request_id, "Dropping reply to an unknown request");
        }
    }

    fn on_channel_removed(&self, channel_id: &str) {
        let mut channel = self.channel.lock();
        if channel.as_ref().is_some_and(|channel| channel.id() == channel_id) {
            *channel = None;
            // Replies to in-flight requests can no longer arrive.
            self.requests.clear();
        }
    }
}

impl Debug for RemotePeer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePeer")
            .field("address", &self.address)
            .field("own_uri", &self.own_uri)
            .field("in_flight", &self.requests.len())
            .finish_non_exhaustive()
    }
}

/// The replies to one `select` request.
struct RemoteBindingStream {
    peer: Arc<RemotePeer>,
    target: String,
    request_id: u64,
    /// Opens the channel and sends the request. [None] once sent.
    send: Option<BoxFuture<'static, Result<(), StorageError>>>,
    replies: UnboundedReceiver<Reply>,
    buffered: VecDeque<Binding>,
    done: bool,
}

impl RemoteBindingStream {
    fn finish(&mut self) {
        self.done = true;
        self.send = None;
        self.buffered.clear();
        self.peer.requests.remove(&self.request_id);
    }
}

impl Stream for RemoteBindingStream {
    type Item = Result<Binding, StorageError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        if let Some(send) = this.send.as_mut() {
            match send.poll_unpin(cx) {
                Poll::Ready(Ok(())) => this.send = None,
                Poll::Ready(Err(error)) => {
                    this.finish();
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        loop {
            if let Some(binding) = this.buffered.pop_front() {
                return Poll::Ready(Some(Ok(binding)));
            }
            match this.replies.poll_recv(cx) {
                Poll::Ready(Some(Reply::Data(bindings))) => this.buffered.extend(bindings),
                Poll::Ready(Some(Reply::End(None))) => {
                    this.finish();
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Reply::End(Some(error)))) => {
                    this.finish();
                    return Poll::Ready(Some(Err(StorageError::Remote(error))));
                }
                Poll::Ready(None) => {
                    let error = StorageError::NotOpen(this.target.clone());
                    this.finish();
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for RemoteBindingStream {
    fn drop(&mut self) {
        self.peer.requests.remove(&self.request_id);
    }
}

/// A store that forwards queries to a [RemotePeer].
///
/// The store is read-only; writing into it fails with [StorageError::NotPermitted].
#[derive(Debug)]
pub struct RemoteStore {
    uri: String,
    peer: Arc<RemotePeer>,
}

impl RemoteStore {
    pub fn new(uri: impl Into<String>, peer: Arc<RemotePeer>) -> Self {
        Self {
            uri: uri.into(),
            peer,
        }
    }

    pub fn peer(&self) -> &Arc<RemotePeer> {
        &self.peer
    }
}

impl Store for RemoteStore {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn add_ref(&self) -> Result<(), StorageError> {
        self.peer.add_ref(&self.uri)
    }

    fn unref(&self) {
        self.peer.unref();
    }

    fn get(&self, patterns: &[TriplePattern]) -> BindingStream {
        self.peer.request(&self.uri, patterns.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNetwork;
    use crate::protocol::PROTOCOL_VERSION;
    use datashare_model::vocab::Namespaces;
    use datashare_model::{Constant, Variable};
    use futures::TryStreamExt;
    use serde_json::json;

    /// Answers every `select` it receives with the given replies.
    struct ScriptedResponder {
        protocol: Protocol,
        data: Vec<Vec<Binding>>,
        error: Option<String>,
    }

    impl MessagingListener for ScriptedResponder {
        fn on_incoming(&self, channel: &ChannelRef, _sender: &str, item: &serde_json::Value) {
            let Ok(request) = self.protocol.decode(item) else {
                return;
            };
            let mut replies = self
                .data
                .iter()
                .map(|batch| request.reply_data(batch.clone()))
                .collect::<Vec<_>>();
            replies.push(request.reply_end(self.error.clone()));

            let channel = Arc::clone(channel);
            tokio::spawn(async move {
                for reply in replies {
                    send_message(&channel, &reply).await.unwrap();
                }
            });
        }
    }

    fn binding(x: &str) -> Binding {
        [(Variable::new_unchecked("x"), Constant::new(x))]
            .into_iter()
            .collect()
    }

    fn setup(data: Vec<Vec<Binding>>, error: Option<String>) -> (RemoteStore, Arc<RemotePeer>) {
        let ns = Namespaces::default();
        let protocol = Protocol::new(ns.base(), PROTOCOL_VERSION);
        let network = MemoryNetwork::new();
        let alice = network.endpoint("alice");
        let bob = network.endpoint("bob");
        bob.add_listener(Arc::new(ScriptedResponder {
            protocol: protocol.clone(),
            data,
            error,
        }));

        let peer = RemotePeer::new(
            PeerAddress::Account("bob".to_owned()),
            alice,
            protocol,
            ns.user("alice"),
            ns.user("bob"),
        );
        (RemoteStore::new(ns.user("bob"), Arc::clone(&peer)), peer)
    }

    fn patterns() -> Vec<TriplePattern> {
        vec![TriplePattern::parse("?x", "ex:p", "ex:o").unwrap()]
    }

    #[tokio::test]
    async fn replies_are_assembled_in_order() {
        let (store, peer) = setup(
            vec![
                vec![binding("ex:a"), binding("ex:b")],
                vec![binding("ex:a")],
            ],
            None,
        );
        store.add_ref().unwrap();

        let result = store
            .get(&patterns())
            .try_collect::<Vec<_>>()
            .await
            .unwrap();

        assert_eq!(
            result,
            vec![binding("ex:a"), binding("ex:b"), binding("ex:a")]
        );
        assert_eq!(peer.in_flight(), 0);
        store.unref();
    }

    #[tokio::test]
    async fn remote_errors_fail_the_stream() {
        let (store, _) = setup(vec![vec![binding("ex:a")]], Some("no such table".to_owned()));
        store.add_ref().unwrap();

        let mut stream = store.get(&patterns());
        assert_eq!(stream.next().await.unwrap().unwrap(), binding("ex:a"));
        assert!(matches!(
            stream.next().await,
            Some(Err(StorageError::Remote(message))) if message == "no such table"
        ));
        assert!(stream.next().await.is_none());
        store.unref();
    }

    #[tokio::test]
    async fn unreferenced_store_is_not_open() {
        let (store, peer) = setup(Vec::new(), None);
        let result = store.get(&patterns()).try_collect::<Vec<_>>().await;
        assert!(matches!(result, Err(StorageError::NotOpen(_))));
        assert_eq!(peer.in_flight(), 0);
    }

    #[tokio::test]
    async fn dropping_the_stream_forgets_the_request() {
        let (store, peer) = setup(Vec::new(), None);
        store.add_ref().unwrap();

        let stream = store.get(&patterns());
        assert_eq!(peer.in_flight(), 1);
        drop(stream);
        assert_eq!(peer.in_flight(), 0);
        store.unref();
    }

    #[tokio::test]
    async fn foreign_replies_are_dropped() {
        let (store, peer) = setup(Vec::new(), None);
        store.add_ref().unwrap();
        let _stream = store.get(&patterns());
        let ns = Namespaces::default();
        let channel = peer.channel().await.unwrap();

        let request = Protocol::new(ns.base(), PROTOCOL_VERSION).select(
            ns.user("alice"),
            ns.user("bob"),
            0,
            Vec::new(),
        );
        let mut other_version = request.reply_end(None).encode().unwrap();
        other_version["version"] = json!(2);
        let mut other_target = request.reply_end(None);
        other_target.target = ns.user("carol");
        let mut other_requester = request.reply_end(None);
        other_requester.from = ns.user("mallory");

        for item in [
            other_version,
            json!({ "unrelated": true }),
            other_target.encode().unwrap(),
            other_requester.encode().unwrap(),
        ] {
            peer.on_incoming(&channel, "bob", &item);
        }
        assert_eq!(peer.in_flight(), 1);

        peer.on_incoming(&channel, "bob", &request.reply_end(None).encode().unwrap());
        assert_eq!(peer.in_flight(), 0);
        store.unref();
    }

    #[tokio::test]
    async fn replies_from_other_accounts_are_dropped() {
        let ns = Namespaces::default();
        let protocol = Protocol::new(ns.base(), PROTOCOL_VERSION);
        let network = MemoryNetwork::new();
        let alice = network.endpoint("alice");
        network.endpoint("bob");
        network.endpoint("carol");
        let peer = RemotePeer::new(
            PeerAddress::Account("bob".to_owned()),
            Arc::clone(&alice) as Arc<dyn Messaging>,
            protocol.clone(),
            ns.user("alice"),
            ns.user("bob"),
        );
        let store = RemoteStore::new(ns.user("bob"), Arc::clone(&peer));
        store.add_ref().unwrap();
        let mut stream = store.get(&patterns());
        assert!(stream.next().now_or_never().is_none());
        assert_eq!(peer.in_flight(), 1);

        let own = peer.channel().await.unwrap();
        let other = alice
            .open_channel(&PeerAddress::Account("carol".to_owned()))
            .await
            .unwrap();
        let end = protocol
            .select(ns.user("alice"), ns.user("bob"), 0, Vec::new())
            .reply_end(Some("injected".to_owned()))
            .encode()
            .unwrap();

        peer.on_incoming(&own, "carol", &end);
        peer.on_incoming(&other, "bob", &end);
        peer.on_incoming(&other, "carol", &end);
        assert_eq!(peer.in_flight(), 1);

        peer.on_incoming(&own, "bob", &end);
        assert_eq!(peer.in_flight(), 0);
        drop(stream);
        store.unref();
    }

    #[test]
    fn owned_targets() {
        let ns = Namespaces::default();
        let network = MemoryNetwork::new();
        let peer = RemotePeer::new(
            PeerAddress::Account("bob".to_owned()),
            network.endpoint("alice"),
            Protocol::new(ns.base(), PROTOCOL_VERSION),
            ns.user("alice"),
            ns.user("bob"),
        );
        assert!(peer.owns(&ns.user("bob")));
        assert!(peer.owns(&format!("{}/phone", ns.user("bob"))));
        assert!(!peer.owns(&ns.user("bobby")));
        assert!(!peer.owns(&ns.feed("bob")));
    }
}
