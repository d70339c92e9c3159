//! The `Broker` handle: a named, possibly-not-yet-connected broker in a
//! cluster, plus the retry/skip policy that decides what to do when a
//! request against it fails.
//!
//! Grounded in the teacher's `client::client::Inner::least_loaded_broker`
//! (for how a caller picks among several broker handles) and its
//! `InFlightMiddleware` (in-flight accounting, generalized here to live on
//! `Connection` itself via `Connection::in_flight_requests` rather than a
//! wrapping middleware, since this crate has only one `Service`-shaped
//! collaborator per connection instead of a layered `tokio_service` stack).
//! The actual retry/skip decision is `classify`'s job; `Broker` just calls
//! it and loops.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use futures::Future;
use tokio_core::reactor::Handle;

use classify;
use codec::Codec;
use connection::{Connection, ConnectionConfig};
use errors::{Error, ErrorKind, Result};
use ids::BrokerId;

/// A broker identity plus a lazily-established `Connection` to it.
///
/// `Clone` is cheap (an `Rc` bump); every clone shares the same underlying
/// connection, idle timer and dead flag once one has been opened/set.
#[derive(Clone)]
pub struct Broker {
    id: BrokerId,
    handle: Handle,
    client_id: Option<String>,
    config: ConnectionConfig,
    connection: Rc<RefCell<Option<Connection>>>,
    last_used: Rc<RefCell<Instant>>,
    /// The cluster metadata generation this handle was created under. Kept
    /// so a caller refreshing metadata can tell whether a `Broker` it's
    /// holding predates the refresh.
    generation: u64,
    /// Set once `mark_dead` observes this broker id has fallen out of the
    /// latest cluster metadata. Checked by `connect`/`request` so a handle
    /// already marked dead never silently reopens a connection.
    dead: Rc<RefCell<bool>>,
}

impl Broker {
    pub fn new(id: BrokerId, handle: Handle, client_id: Option<String>, config: ConnectionConfig, generation: u64) -> Broker {
        Broker {
            id: id,
            handle: handle,
            client_id: client_id,
            config: config,
            connection: Rc::new(RefCell::new(None)),
            last_used: Rc::new(RefCell::new(Instant::now())),
            generation: generation,
            dead: Rc::new(RefCell::new(false)),
        }
    }

    /// The cluster metadata generation under which this handle was
    /// created.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `true` once `mark_dead` has been called on this broker (or any
    /// clone sharing its state).
    pub fn is_dead(&self) -> bool {
        *self.dead.borrow()
    }

    /// Mark this broker dead because its id no longer appears in the
    /// latest cluster metadata. Idempotent.
    ///
    /// Completes every request currently in flight on this broker's
    /// connection with `ErrorKind::ChosenBrokerDead` (retriable — the
    /// caller is expected to refresh metadata and re-select a broker) and
    /// drops the connection, so a `request()` call racing with this one
    /// either lands on the live connection just before it's failed (and
    /// gets `ChosenBrokerDead` like everything else in flight) or sees
    /// `dead` already set and fails the same way without ever touching the
    /// network.
    pub fn mark_dead(&self) {
        if *self.dead.borrow() {
            return;
        }

        *self.dead.borrow_mut() = true;

        if let Some(conn) = self.connection.borrow_mut().take() {
            conn.fail(ErrorKind::ChosenBrokerDead(self.id.clone()).into());
        }
    }

    /// Close and drop the current connection if it has sat idle (no
    /// request sent through it) for longer than
    /// `ConnectionConfig::max_connection_idle`. Returns `true` if a
    /// connection was closed.
    ///
    /// Grounded in the teacher's `ClientConfig::max_connection_idle()`,
    /// threaded into its connection service (`client/client.rs`) to reap
    /// sockets a caller hasn't used in a while; this crate has no
    /// background reaper of its own; a cluster-level driver is expected to
    /// poll this periodically.
    pub fn close_if_idle(&self) -> bool {
        let idle_for = self.last_used.borrow().elapsed();

        if idle_for < self.config.max_connection_idle {
            return false;
        }

        let mut slot = self.connection.borrow_mut();

        if let Some(conn) = slot.take() {
            conn.close();
            true
        } else {
            false
        }
    }

    pub fn id(&self) -> &BrokerId {
        &self.id
    }

    pub fn in_flight_requests(&self) -> usize {
        self.connection
            .borrow()
            .as_ref()
            .map(Connection::in_flight_requests)
            .unwrap_or(0)
    }

    /// The existing connection, if one is open and not closed.
    fn live_connection(&self) -> Option<Connection> {
        let mut slot = self.connection.borrow_mut();

        if let Some(conn) = slot.clone() {
            if conn.is_closed() {
                *slot = None;
            }
        }

        slot.clone()
    }

    /// Get (opening if necessary) a `Connection` to this broker.
    fn connect(&self) -> Box<Future<Item = Connection, Error = Error>> {
        if *self.dead.borrow() {
            return Box::new(::futures::future::err(ErrorKind::ChosenBrokerDead(self.id.clone()).into()));
        }

        if let Some(conn) = self.live_connection() {
            return Box::new(::futures::future::ok(conn));
        }

        let addr = match format!("{}:{}", self.id.host, self.id.port).parse() {
            Ok(addr) => addr,
            Err(_) => {
                return Box::new(::futures::future::err(ErrorKind::Dial(::std::io::Error::new(::std::io::ErrorKind::InvalidInput, "unresolvable broker address")).into()));
            }
        };

        let slot = self.connection.clone();

        Box::new(Connection::open(addr, self.handle.clone(), self.client_id.clone(), self.config.clone()).map(move |conn| {
            *slot.borrow_mut() = Some(conn.clone());
            conn
        }))
    }

    /// Send one request through this broker's connection, without any
    /// retry: exactly one attempt, surfaced as-is. Used by `BrokerSelector`
    /// to implement the retry/skip loop across possibly many brokers.
    pub fn request<C>(&self, codec: C, request: C::Request, deadline: Option<Duration>) -> Box<Future<Item = C::Response, Error = Error>>
        where C: Codec + 'static,
              C::Response: 'static
    {
        *self.last_used.borrow_mut() = Instant::now();

        let connect = self.connect();
        let broker_label = self.id.to_string();

        Box::new(connect.and_then(move |conn| {
            let sent = conn.request(codec, request, deadline);
            ::metrics::record_in_flight(&broker_label, conn.in_flight_requests());

            sent.then(move |result| {
                ::metrics::record_in_flight(&broker_label, conn.in_flight_requests());
                result
            })
        }))
    }
}

/// Drives the retry-same-broker / skip-to-next-broker policy across a set
/// of candidate brokers for one logical request.
///
/// This is deliberately not a `Future` itself (unlike the teacher's
/// `LoadMetadata`, which models its whole multi-step load as one `Future`
/// state machine) because the number of attempts here isn't bounded by a
/// fixed number of enum states — it's bounded by `max_attempts`, a runtime
/// value. A small owned retry loop driven by repeated `and_then` chains
/// would either need recursion (risking deep future chains) or an explicit
/// loop; `BrokerSelector::send` takes the explicit-loop shape, grounded in
/// `tokio_retry`'s `Retry` combinator, which the teacher depends on for
/// exactly this kind of "try, classify, maybe try again" policy.
pub struct BrokerSelector {
    brokers: Vec<Broker>,
    max_attempts: usize,
}

impl BrokerSelector {
    pub fn new(brokers: Vec<Broker>, max_attempts: usize) -> BrokerSelector {
        BrokerSelector {
            brokers: brokers,
            max_attempts: max_attempts,
        }
    }

    /// The broker with the fewest in-flight requests, breaking ties by
    /// position. Mirrors the teacher's `least_loaded_broker`, minus its
    /// socket-resolution step (a `Broker` here already names a single
    /// host/port, not a DNS name that can expand to several).
    fn least_loaded(&self) -> Option<&Broker> {
        self.brokers.iter().min_by_key(Broker::in_flight_requests)
    }

    fn excluding<'a>(&'a self, dead: &BrokerId) -> Vec<&'a Broker> {
        brokers_excluding(&self.brokers, dead)
    }

    /// Reap every broker's connection that's been idle past
    /// `ConnectionConfig::max_connection_idle`. Meant to be driven by a
    /// periodic timer owned by whatever assembles a `BrokerSelector`; this
    /// crate has no background task of its own to call it.
    pub fn close_idle_connections(&self) -> usize {
        self.brokers.iter().filter(|b| b.close_if_idle()).count()
    }

    /// Send `request` via `codec`, retrying on the same broker or skipping
    /// to another per `classify`'s rules, up to `max_attempts` total tries.
    pub fn send<C>(&self, codec: C, request: C::Request, deadline: Option<Duration>) -> Box<Future<Item = C::Response, Error = Error>>
        where C: Codec + Clone + 'static,
              C::Request: Clone + 'static,
              C::Response: 'static
    {
        let broker = match self.least_loaded() {
            Some(b) => b.clone(),
            None => return Box::new(::futures::future::err(ErrorKind::KafkaError(::errors::KafkaCode::BrokerNotAvailable).into())),
        };

        Box::new(attempt(broker, self.brokers.clone(), codec, request, deadline, 1, self.max_attempts))
    }
}

fn attempt<C>(broker: Broker, all_brokers: Vec<Broker>, codec: C, request: C::Request, deadline: Option<Duration>, tried: usize, max_attempts: usize) -> Box<Future<Item = C::Response, Error = Error>>
    where C: Codec + Clone + 'static,
          C::Request: Clone + 'static,
          C::Response: 'static
{
    let broker_id = broker.id().clone();
    let codec_for_retry = codec.clone();
    let request_for_retry = request.clone();

    Box::new(broker.request(codec, request, deadline).or_else(move |err| {
        if tried >= max_attempts {
            return Box::new(::futures::future::err(err)) as Box<Future<Item = C::Response, Error = Error>>;
        }

        if classify::retriable_on_same_broker(Some(&err)) {
            return attempt(broker_clone_by_id(&all_brokers, &broker_id).unwrap_or(broker),
                           all_brokers,
                           codec_for_retry,
                           request_for_retry,
                           deadline,
                           tried + 1,
                           max_attempts);
        }

        if classify::skippable_to_next_broker(Some(&err)) {
            if let Some(next) = brokers_excluding(&all_brokers, &broker_id).into_iter().min_by_key(|b| b.in_flight_requests()).cloned() {
                return attempt(next, all_brokers, codec_for_retry, request_for_retry, deadline, tried + 1, max_attempts);
            }

            return Box::new(::futures::future::err(ErrorKind::UnknownBroker(broker_id).into()));
        }

        Box::new(::futures::future::err(err))
    }))
}

fn broker_clone_by_id(brokers: &[Broker], id: &BrokerId) -> Option<Broker> {
    brokers.iter().find(|b| b.id() == id).cloned()
}

/// Every broker in `brokers` other than `dead`, in original order. Shared
/// by `BrokerSelector::excluding` (used by tests and callers picking a
/// starting broker) and `attempt`'s skip-to-next-broker path.
fn brokers_excluding<'a>(brokers: &'a [Broker], dead: &BrokerId) -> Vec<&'a Broker> {
    brokers.iter().filter(|b| b.id() != dead).collect()
}

#[cfg(test)]
mod tests {
    use tokio_core::reactor::Core;

    use connection::ConnectionConfig;
    use ids::BrokerId;

    use super::*;

    fn broker(handle: &Handle, node_id: i32) -> Broker {
        Broker::new(BrokerId::new(node_id, "broker", 9092 + node_id as u16),
                    handle.clone(),
                    None,
                    ConnectionConfig::default(),
                    0)
    }

    #[test]
    fn fresh_broker_has_no_in_flight_requests() {
        let core = Core::new().unwrap();

        assert_eq!(broker(&core.handle(), 1).in_flight_requests(), 0);
    }

    #[test]
    fn excluding_drops_the_named_broker() {
        let core = Core::new().unwrap();
        let handle = core.handle();

        let selector = BrokerSelector::new(vec![broker(&handle, 1), broker(&handle, 2), broker(&handle, 3)], 3);

        let remaining = selector.excluding(&BrokerId::new(2, "broker", 9094));

        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|b| b.id().node_id != 2));
    }

    #[test]
    fn least_loaded_picks_among_equally_idle_brokers() {
        let core = Core::new().unwrap();
        let handle = core.handle();

        let selector = BrokerSelector::new(vec![broker(&handle, 1), broker(&handle, 2)], 3);

        // neither has an open connection yet, so both report 0 in-flight;
        // `min_by_key` picks the first in that case.
        assert_eq!(selector.least_loaded().unwrap().id().node_id, 1);
    }

    #[test]
    fn close_if_idle_is_a_no_op_without_a_connection() {
        let core = Core::new().unwrap();

        // no connection has ever been opened, so there's nothing to reap
        assert!(!broker(&core.handle(), 1).close_if_idle());
    }

    #[test]
    fn close_idle_connections_counts_only_brokers_with_a_connection() {
        let core = Core::new().unwrap();
        let handle = core.handle();

        let selector = BrokerSelector::new(vec![broker(&handle, 1), broker(&handle, 2)], 3);

        assert_eq!(selector.close_idle_connections(), 0);
    }

    #[test]
    fn fresh_broker_carries_its_generation_and_is_not_dead() {
        let core = Core::new().unwrap();

        let b = Broker::new(BrokerId::new(1, "broker", 9093),
                             core.handle(),
                             None,
                             ConnectionConfig::default(),
                             7);

        assert_eq!(b.generation(), 7);
        assert!(!b.is_dead());
    }

    #[test]
    fn mark_dead_is_idempotent_and_sticky() {
        let core = Core::new().unwrap();
        let b = broker(&core.handle(), 1);

        assert!(!b.is_dead());

        b.mark_dead();
        assert!(b.is_dead());

        // a second call is a no-op, not a panic or a double-fail
        b.mark_dead();
        assert!(b.is_dead());
    }

    #[test]
    fn mark_dead_is_visible_through_clones() {
        let core = Core::new().unwrap();
        let b = broker(&core.handle(), 1);
        let clone = b.clone();

        clone.mark_dead();

        assert!(b.is_dead());
    }

    #[test]
    fn connect_on_a_dead_broker_fails_with_chosen_broker_dead_without_dialling() {
        let mut core = Core::new().unwrap();
        let b = broker(&core.handle(), 1);

        b.mark_dead();

        let err = core.run(b.connect()).unwrap_err();

        match *err.kind() {
            ErrorKind::ChosenBrokerDead(ref id) => assert_eq!(id.node_id, 1),
            ref other => panic!("unexpected error kind: {:?}", other),
        }
    }
}
