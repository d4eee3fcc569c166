use crate::messaging::{send_message, ChannelRef, ListenerId, Messaging, MessagingListener};
use crate::protocol::{Operation, Protocol, ProtocolMessage};
use datashare_engine::{Dataset, GraphPattern, SelectQuery, SelectRunner};
use datashare_model::vocab::{NamespaceRef, Namespaces};
use datashare_model::{Binding, Constant, Term, TriplePattern};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// The default number of bindings per `solution-data` message.
pub const DEFAULT_REPLY_BATCH_SIZE: usize = 20;

/// The responder side of the remote select protocol.
///
/// Once started, the responder answers `select` requests that other accounts send to the own
/// account (`user/<me>[/<device>]`) or to a feed the request arrives on (`feed/<id>`). Every
/// request is evaluated in its own task against the local stores, restricted to subjects the
/// requester holds a `has-permission` grant for.
pub struct ResponderFeed {
    messaging: Arc<dyn Messaging>,
    runner: SelectRunner,
    protocol: Protocol,
    namespaces: Namespaces,
    batch_size: usize,
    listener: Mutex<Option<ListenerId>>,
    /// In-flight request handlers per channel id.
    tasks: Mutex<FxHashMap<String, Vec<JoinHandle<()>>>>,
}

impl ResponderFeed {
    pub fn new(
        messaging: Arc<dyn Messaging>,
        runner: SelectRunner,
        protocol: Protocol,
        namespaces: Namespaces,
    ) -> Self {
        Self {
            messaging,
            runner,
            protocol,
            namespaces,
            batch_size: DEFAULT_REPLY_BATCH_SIZE,
            listener: Mutex::new(None),
            tasks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Sets the number of bindings per `solution-data` message.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Starts listening for requests. Starting a started responder has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut listener = self.listener.lock();
        if listener.is_none() {
            let this = Arc::clone(self) as Arc<dyn MessagingListener>;
            *listener = Some(self.messaging.add_listener(this));
            tracing::debug!(account = self.messaging.identity(), "Responder started");
        }
    }

    /// Stops listening and aborts every in-flight request handler.
    pub fn stop(&self) {
        if let Some(id) = self.listener.lock().take() {
            self.messaging.remove_listener(id);
            tracing::debug!(account = self.messaging.identity(), "Responder stopped");
        }
        for (_, tasks) in self.tasks.lock().drain() {
            tasks.iter().for_each(JoinHandle::abort);
        }
    }

    pub fn is_started(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// The number of request handlers that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tasks
            .lock()
            .values()
            .flatten()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Returns the local URI that serves `target` if this responder answers requests for it on
    /// `channel`.
    fn served_uri(&self, channel: &ChannelRef, target: &str) -> Option<String> {
        let path = match self.namespaces.classify(target) {
            NamespaceRef::User { account, path } if account == self.messaging.identity() => path,
            NamespaceRef::Feed { feed, path } if feed == channel.id() => path,
            _ => return None,
        };
        Some(match path {
            Some(device) => self.namespaces.device(device),
            None => self.namespaces.me(),
        })
    }

    /// Builds the query for `patterns`, requiring a grant for `grantee` on every subject.
    fn restricted_query(
        &self,
        patterns: Vec<TriplePattern>,
        grantee: &str,
        uri: String,
    ) -> SelectQuery {
        let subjects = patterns
            .iter()
            .map(|pattern| pattern.subject.clone())
            .collect::<FxHashSet<_>>();
        let mut grants = subjects
            .into_iter()
            .map(|subject| {
                TriplePattern::new(
                    subject,
                    Term::constant(self.namespaces.has_permission()),
                    Constant::new(grantee),
                )
            })
            .collect::<Vec<_>>();
        grants.sort();

        let pattern = GraphPattern::bgp(patterns.into_iter().chain(grants));
        SelectQuery::new(pattern, Dataset::new(uri))
    }

    fn spawn(&self, channel: &ChannelRef, request: ProtocolMessage, query: SelectQuery) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            let reply = request.reply_end(Some("The responder is not running".to_owned()));
            match send_message(channel, &reply).now_or_never() {
                Some(Ok(())) => tracing::warn!("Rejected request received outside of a runtime"),
                Some(Err(error)) => tracing::warn!(
                    %error,
                    "Dropping request received outside of a runtime, the requester gets no reply"
                ),
                None => tracing::warn!(
                    "Dropping request received outside of a runtime, the requester gets no reply"
                ),
            }
            return;
        };
        let replier = Replier {
            channel: Arc::clone(channel),
            request,
            batch: Vec::with_capacity(self.batch_size),
            batch_size: self.batch_size,
            ended: false,
        };
        let task = runtime.spawn(respond(self.runner.clone(), query, replier));

        let mut tasks = self.tasks.lock();
        let tasks = tasks.entry(channel.id().to_owned()).or_default();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }
}

impl MessagingListener for ResponderFeed {
    fn on_incoming(&self, channel: &ChannelRef, sender: &str, item: &serde_json::Value) {
        let request = match self.protocol.decode(item) {
            Ok(request) if request.op == Operation::Select => request,
            Ok(_) => return,
            Err(error) => {
                tracing::trace!(%error, "Dropping item");
                return;
            }
        };
        let Some(uri) = self.served_uri(channel, &request.target) else {
            return;
        };
        if request.from != self.namespaces.user(sender) {
            tracing::debug!(from = %request.from, sender, "Dropping request with a forged sender");
            return;
        }

        tracing::debug!(
            from = %request.from,
            target = %request.target,
            request_id = request.request_id,
            "Answering select request"
        );
        let patterns = request.patterns.clone().unwrap_or_default();
        let query = self.restricted_query(patterns, &request.from, uri);
        self.spawn(channel, request, query);
    }

    fn on_channel_removed(&self, channel_id: &str) {
        if let Some(tasks) = self.tasks.lock().remove(channel_id) {
            tasks.iter().for_each(JoinHandle::abort);
        }
    }
}

impl Debug for ResponderFeed {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderFeed")
            .field("account", &self.messaging.identity())
            .field("batch_size", &self.batch_size)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

/// Sends the replies to one request.
struct Replier {
    channel: ChannelRef,
    request: ProtocolMessage,
    batch: Vec<Binding>,
    batch_size: usize,
    ended: bool,
}

impl Replier {
    async fn push(&mut self, binding: Binding) {
        if self.ended {
            return;
        }
        self.batch.push(binding);
        if self.batch.len() >= self.batch_size {
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        self.send(self.request.reply_data(batch)).await;
    }

    async fn end(&mut self, error: Option<String>) {
        if self.ended {
            return;
        }
        if !self.batch.is_empty() {
            self.flush().await;
        }
        self.ended = true;
        self.send(self.request.reply_end(error)).await;
    }

    async fn send(&self, reply: ProtocolMessage) {
        if let Err(error) = send_message(&self.channel, &reply).await {
            tracing::warn!(%error, channel = self.channel.id(), "Failed to send reply");
        }
    }
}

async fn respond(runner: SelectRunner, query: SelectQuery, mut replier: Replier) {
    let mut solutions = match runner.execute(&query) {
        Ok(solutions) => solutions,
        Err(error) => {
            replier.end(Some(error.to_string())).await;
            return;
        }
    };
    while let Some(solution) = solutions.next().await {
        match solution {
            Ok(binding) => replier.push(binding).await,
            Err(error) => {
                replier.end(Some(error.to_string())).await;
                return;
            }
        }
    }
    replier.end(None).await;
}
