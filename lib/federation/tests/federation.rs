use datashare_common::error::StorageError;
use datashare_common::BindingStream;
use datashare_engine::error::QueryEvaluationError;
use datashare_engine::{Dataset, EvaluationConfig, GraphPattern, SelectQuery, SelectRunner};
use datashare_federation::memory::{MemoryMessaging, MemoryNetwork};
use datashare_federation::protocol::PROTOCOL_VERSION;
use datashare_federation::{
    Channel, ChannelRef, MetaStore, Messaging, MessagingListener, Operation, PeerAddress, Protocol,
    ResponderFeed,
};
use datashare_model::vocab::Namespaces;
use datashare_model::{Binding, Fact, TriplePattern};
use datashare_storage::{GraphDatabase, LocalStore, MemoryGraphDatabase};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;

struct Node {
    messaging: Arc<MemoryMessaging>,
    metastore: Arc<MetaStore>,
    runner: SelectRunner,
    responder: Arc<ResponderFeed>,
}

/// A database whose reads fail.
#[derive(Debug)]
struct FailingDatabase;

#[async_trait::async_trait]
impl GraphDatabase for FailingDatabase {
    fn open(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn close(&self) {}

    fn query(&self, _patterns: Vec<TriplePattern>) -> BindingStream {
        futures::stream::once(async {
            Err(StorageError::Io(std::io::Error::other("disk failure")))
        })
        .boxed()
    }

    async fn insert(&self, _facts: Vec<Fact>) -> Result<usize, StorageError> {
        Err(StorageError::not_permitted("insert", "ex:failing"))
    }
}

fn protocol() -> Protocol {
    Protocol::new(Namespaces::default().base(), PROTOCOL_VERSION)
}

fn node(network: &MemoryNetwork, account: &str, facts: Vec<Fact>, batch_size: usize) -> Node {
    let database = Arc::new(MemoryGraphDatabase::with_facts(account, facts));
    node_with_database(network, account, database, batch_size)
}

fn node_with_database(
    network: &MemoryNetwork,
    account: &str,
    database: Arc<dyn GraphDatabase>,
    batch_size: usize,
) -> Node {
    let ns = Namespaces::default();
    let messaging = network.endpoint(account);
    let local = Arc::new(LocalStore::new(ns.me(), database));
    let metastore = Arc::new(MetaStore::new(
        ns.clone(),
        protocol(),
        Arc::clone(&messaging) as Arc<dyn Messaging>,
        local,
    ));
    let runner = SelectRunner::new(
        Arc::clone(&metastore) as Arc<dyn datashare_engine::StoreResolver>,
        EvaluationConfig::default(),
    );
    let responder = Arc::new(
        ResponderFeed::new(
            Arc::clone(&messaging) as Arc<dyn Messaging>,
            runner.clone(),
            protocol(),
            ns,
        )
        .with_batch_size(batch_size),
    );
    responder.start();
    Node {
        messaging,
        metastore,
        runner,
        responder,
    }
}

/// Records the replies that arrive at an account.
#[derive(Default)]
struct ReplySpy {
    data: Mutex<Vec<usize>>,
    ends: Mutex<usize>,
}

impl MessagingListener for ReplySpy {
    fn on_incoming(&self, _channel: &ChannelRef, _sender: &str, item: &serde_json::Value) {
        let Ok(message) = protocol().decode(item) else {
            return;
        };
        match message.op {
            Operation::SolutionData => self
                .data
                .lock()
                .push(message.data.map_or(0, |data| data.len())),
            Operation::SolutionEnd => *self.ends.lock() += 1,
            Operation::Select => {}
        }
    }
}

fn grant(subject: &str, account: &str) -> Fact {
    let ns = Namespaces::default();
    Fact::new(subject, ns.has_permission(), ns.user(account))
}

fn tp(s: &str, p: &str, o: &str) -> TriplePattern {
    TriplePattern::parse(s, p, o).unwrap()
}

async fn query(node: &Node, patterns: Vec<TriplePattern>, target: &str) -> Vec<Binding> {
    node.runner
        .execute(&SelectQuery::new(
            GraphPattern::bgp(patterns),
            Dataset::new(target),
        ))
        .unwrap()
        .try_collect_to_vec()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_batched_federation() {
    let network = MemoryNetwork::new();
    let facts = (0..45)
        .flat_map(|i| {
            let item = format!("ex:item{i}");
            [
                Fact::new(item.as_str(), "ex:value", format!("\"{i}\"")),
                grant(&item, "alice"),
            ]
        })
        .collect();
    let _bob = node(&network, "bob", facts, 20);
    let alice = node(&network, "alice", Vec::new(), 20);
    let spy = Arc::new(ReplySpy::default());
    alice.messaging.add_listener(Arc::clone(&spy) as Arc<dyn MessagingListener>);

    let result = query(
        &alice,
        vec![tp("?x", "ex:value", "?v")],
        &Namespaces::default().user("bob"),
    )
    .await;

    assert_eq!(result.len(), 45);
    assert_eq!(*spy.data.lock(), vec![20, 20, 5]);
    assert_eq!(*spy.ends.lock(), 1);
}

#[tokio::test]
async fn test_remote_evaluation_failure_fails_the_query() {
    let network = MemoryNetwork::new();
    let _bob = node_with_database(&network, "bob", Arc::new(FailingDatabase), 20);
    let alice = node(&network, "alice", Vec::new(), 20);
    let spy = Arc::new(ReplySpy::default());
    alice.messaging.add_listener(Arc::clone(&spy) as Arc<dyn MessagingListener>);

    let result = alice
        .runner
        .execute(&SelectQuery::new(
            GraphPattern::bgp([tp("?x", "ex:value", "?v")]),
            Dataset::new(Namespaces::default().user("bob")),
        ))
        .unwrap()
        .try_collect_to_vec()
        .await;

    assert!(matches!(
        result,
        Err(QueryEvaluationError::Storage(StorageError::Remote(message))) if message == "disk failure"
    ));
    assert!(spy.data.lock().is_empty());
    assert_eq!(*spy.ends.lock(), 1);
    let peer = alice
        .metastore
        .peer(&PeerAddress::Account("bob".to_owned()))
        .unwrap();
    assert_eq!(peer.in_flight(), 0);
}

#[tokio::test]
async fn test_permission_filtered_federation() {
    let network = MemoryNetwork::new();
    let _bob = node(
        &network,
        "bob",
        vec![
            Fact::new("ex:secret", "ex:value", "\"hidden\""),
            Fact::new("ex:public", "ex:value", "\"shown\""),
            grant("ex:public", "alice"),
            grant("ex:secret", "carol"),
        ],
        20,
    );
    let alice = node(&network, "alice", Vec::new(), 20);
    let bob = Namespaces::default().user("bob");

    let result = query(&alice, vec![tp("ex:secret", "ex:value", "?v")], &bob).await;
    assert!(result.is_empty());

    let result = query(&alice, vec![tp("?x", "ex:value", "?v")], &bob).await;
    assert_eq!(result.len(), 1);
    assert_eq!(
        result[0].get(&datashare_model::Variable::new_unchecked("x")),
        Some(&datashare_model::Constant::new("ex:public"))
    );
}

#[tokio::test]
async fn test_remote_join_with_local_facts() {
    let network = MemoryNetwork::new();
    let ns = Namespaces::default();
    let _bob = node(
        &network,
        "bob",
        vec![
            Fact::new("ex:bob", "foaf:name", "\"Bob\""),
            grant("ex:bob", "alice"),
        ],
        20,
    );
    let alice = node(
        &network,
        "alice",
        vec![Fact::new("ex:alice", "foaf:knows", "ex:bob")],
        20,
    );

    let pattern = GraphPattern::bgp([tp("?x", "foaf:knows", "?y")]).join(
        GraphPattern::bgp([tp("?y", "foaf:name", "\"Bob\"")]).graph(
            datashare_engine::algebra::GraphNamePattern::Uri(ns.user("bob")),
        ),
    );
    let result = alice
        .runner
        .execute(&SelectQuery::new(pattern, Dataset::new(ns.me())))
        .unwrap()
        .try_collect_to_vec()
        .await
        .unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result[0].len(), 2);
}

#[tokio::test]
async fn test_feed_requests_are_answered_by_members() {
    let network = MemoryNetwork::new();
    let _bob = node(
        &network,
        "bob",
        vec![
            Fact::new("ex:photo", "ex:title", "\"Beach\""),
            grant("ex:photo", "alice"),
        ],
        20,
    );
    let alice = node(&network, "alice", Vec::new(), 20);
    network.create_feed("family", ["alice".to_owned(), "bob".to_owned()]);

    let result = query(
        &alice,
        vec![tp("?x", "ex:title", "?t")],
        &Namespaces::default().feed("family"),
    )
    .await;

    assert_eq!(result.len(), 1);
}

#[tokio::test]
async fn test_forged_and_stopped_requests_are_ignored() {
    let network = MemoryNetwork::new();
    let ns = Namespaces::default();
    let bob = node(&network, "bob", vec![grant("ex:a", "mallory")], 20);
    let alice = node(&network, "alice", Vec::new(), 20);
    let spy = Arc::new(ReplySpy::default());
    alice.messaging.add_listener(Arc::clone(&spy) as Arc<dyn MessagingListener>);
    let channel = alice
        .messaging
        .open_channel(&PeerAddress::Account("bob".to_owned()))
        .await
        .unwrap();

    let forged = protocol().select(ns.user("mallory"), ns.user("bob"), 0, Vec::new());
    channel.send_item(forged.encode().unwrap()).await.unwrap();
    assert_eq!(bob.responder.in_flight(), 0);

    bob.responder.stop();
    assert!(!bob.responder.is_started());
    let request = protocol().select(ns.user("alice"), ns.user("bob"), 1, Vec::new());
    channel.send_item(request.encode().unwrap()).await.unwrap();
    tokio::task::yield_now().await;

    assert_eq!(bob.responder.in_flight(), 0);
    assert!(spy.data.lock().is_empty());
    assert_eq!(*spy.ends.lock(), 0);
}

#[tokio::test]
async fn test_unknown_namespace_is_empty() {
    let network = MemoryNetwork::new();
    let alice = node(&network, "alice", vec![Fact::new("ex:a", "ex:b", "ex:c")], 20);

    for target in [
        "http://example.com/graph".to_owned(),
        format!("{}other/thing", Namespaces::default().base()),
    ] {
        let result = query(&alice, vec![tp("?s", "?p", "?o")], &target).await;
        assert!(result.is_empty());
    }
}
