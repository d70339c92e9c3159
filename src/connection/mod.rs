//! A single multiplexed TCP connection to one broker.
//!
//! `Connection` owns one `TcpStream`, split into a write half fed by an
//! unbounded queue of already-encoded frames and a read half driving a
//! spawned loop that demultiplexes replies by correlation id into the
//! `slot::SlotTable`. Everything mutable lives behind one `Rc<RefCell<_>>`,
//! the same single-threaded-reactor shape as the teacher's
//! `client::client::{KafkaClient, Inner, State}` — no `Arc`/`Mutex`
//! anywhere, since a `Connection` never crosses a thread boundary.
//!
//! The Api-Versions handshake (and, if configured, a SASL exchange
//! immediately after it) runs once in `Connection::open` before the
//! connection is handed back to its caller; `request` assumes both are
//! already settled.

mod config;
mod slot;

pub use self::config::ConnectionConfig;
pub use self::slot::RawReply;

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{ATOMIC_USIZE_INIT, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::{BigEndian, BufMut, ByteOrder, BytesMut};
use nom::be_i16;

use futures::{Async, Future, Poll, Stream};
use futures::unsync::{mpsc, oneshot};
use tokio_core::net::TcpStream;
use tokio_core::reactor::Handle;
use tokio_io::AsyncRead;
use tokio_io::io::{self, ReadHalf, WriteHalf};
use tokio_timer::Timer;

use classify;
use codec::Codec;
use errors::{Error, ErrorKind, KafkaCode, Result};
use ids::{ApiKey, ApiVersion, CorrelationId};
use metrics::{self, Outcome};
use protocol::{self, ApiKeys, RequestHeader, SIZE_PREFIX_LEN};
use sasl::{Sasl, SaslStep};
use self::slot::SlotTable;
use version::VersionTable;

/// Connections currently open across the process, sampled into
/// `metrics::CONNECTIONS_OPEN` on every open/close so the gauge reflects
/// reality without each `Connection` needing a back-reference to a shared
/// registry.
static ACTIVE_CONNECTIONS: AtomicUsize = ATOMIC_USIZE_INIT;

const API_VERSIONS_KEY: ApiKey = ApiKeys::ApiVersions as ApiKey;
const SASL_HANDSHAKE_KEY: ApiKey = ApiKeys::SaslHandshake as ApiKey;

/// Width of the `CorrelationId` field at the front of every response
/// header. Distinct from `SIZE_PREFIX_LEN` (the frame's own length prefix)
/// even though both happen to be 4 bytes, since they mean different
/// things.
const CORRELATION_ID_LEN: usize = 4;

struct Inner {
    addr: SocketAddr,
    client_id: Option<String>,
    config: ConnectionConfig,
    timer: Rc<Timer>,
    versions: VersionTable,
    slots: SlotTable,
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    closed: Option<Error>,
    short_reauth_streak: u32,
}

/// How many consecutive reauths granting a session lifetime below
/// `ConnectionConfig::reauth_min_lifetime` trip `ErrorKind::SaslReauthLoop`.
/// A single short grant could just be the broker's policy; a run of them
/// means the broker and this client will never make forward progress.
const SASL_REAUTH_LOOP_THRESHOLD: u32 = 3;

/// A handle to one open broker connection. Cheap to `Clone`: every clone
/// shares the same underlying socket, slot table and write queue.
#[derive(Clone)]
pub struct Connection {
    inner: Rc<RefCell<Inner>>,
}

impl Connection {
    /// Dial `addr`, run the Api-Versions handshake, optionally run a SASL
    /// exchange, and spawn the read loop. The returned future resolves once
    /// all of that has completed and the connection is ready for
    /// `request`.
    pub fn open(addr: SocketAddr, handle: Handle, client_id: Option<String>, config: ConnectionConfig) -> Box<Future<Item = Connection, Error = Error>> {
        let handle2 = handle.clone();

        let connect = TcpStream::connect(&addr, &handle).map_err(|err| ErrorKind::Dial(err).into());

        let opened = connect.and_then(move |stream| {
            let (read_half, write_half) = stream.split();
            let (tx, rx) = mpsc::unbounded();
            let max_in_flight = config.max_in_flight_requests;

            let inner = Rc::new(RefCell::new(Inner {
                addr: addr,
                client_id: client_id,
                config: config,
                timer: Rc::new(Timer::default()),
                versions: VersionTable::empty(),
                slots: SlotTable::new(max_in_flight),
                outgoing: Some(tx),
                closed: None,
                short_reauth_streak: 0,
            }));

            let connection = Connection { inner: inner };

            let open_now = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
            metrics::record_connections_open(open_now);

            spawn_write_loop(&handle2, write_half, rx, connection.clone());
            spawn_read_loop(&handle2, read_half, connection.clone());

            connection.handshake()
        });

        Box::new(opened)
    }

    /// Run (or re-run, e.g. after a version bump) the Api-Versions
    /// handshake against this connection, populating its `VersionTable`.
    fn handshake(self) -> Box<Future<Item = Connection, Error = Error>> {
        let connection = self.clone();

        let request = self.send_raw(API_VERSIONS_KEY, 0, false, BytesMut::new());

        Box::new(request.and_then(move |reply| {
            let table = parse_api_versions(&reply.body)?;

            connection.inner.borrow_mut().versions = table;

            Ok(connection)
        }))
    }

    /// Run a SASL exchange over this already-open, already-versioned
    /// connection. Not called automatically by `open`, since not every
    /// deployment authenticates; callers that need SASL call this
    /// explicitly right after `open` resolves.
    pub fn authenticate<M: Sasl>(&self, mut mechanism: M) -> Box<Future<Item = (), Error = Error>> {
        let mechanism_name = mechanism.mechanism().to_owned();
        let connection = self.clone();

        let handshake_body = {
            let mut buf = BytesMut::with_capacity(mechanism_name.len() + 2);
            buf.put_i16::<BigEndian>(mechanism_name.len() as i16);
            buf.put_slice(mechanism_name.as_bytes());
            buf
        };

        let handshake = self.send_raw(SASL_HANDSHAKE_KEY, 0, false, handshake_body).and_then(move |reply| {
            let error_code = parse_error_code(&reply.body)?;

            if error_code != 0 {
                bail!(ErrorKind::SaslHandshakeFailed(format!("broker rejected mechanism (code {})", error_code)));
            }

            let step = mechanism.initial().chain_err(|| "SASL mechanism failed to produce initial message")?;

            Ok((mechanism, step))
        });

        Box::new(handshake.and_then(move |(mechanism, step)| connection.sasl_loop(mechanism, step)))
    }

    fn sasl_loop<M: Sasl>(&self, mut mechanism: M, step: SaslStep) -> Box<Future<Item = (), Error = Error>> {
        let connection = self.clone();

        match step {
            SaslStep::Done(bytes) => {
                if let Err(err) = self.record_reauth(mechanism.session_lifetime_millis()) {
                    self.fail(clone_closed_error(&err));
                    return Box::new(::futures::future::err(err));
                }

                if bytes.is_empty() {
                    Box::new(::futures::future::ok(()))
                } else {
                    let body = raw_bytes_body(&bytes);
                    Box::new(self.send_raw(SASL_HANDSHAKE_KEY, 1, false, body).map(|_| ()))
                }
            }
            SaslStep::Continue(bytes) => {
                let body = raw_bytes_body(&bytes);

                Box::new(self.send_raw(SASL_HANDSHAKE_KEY, 1, false, body).and_then(move |reply| {
                    let next = mechanism.step(&reply.body).chain_err(|| "SASL mechanism rejected broker challenge")?;

                    Ok((mechanism, next))
                }).and_then(move |(mechanism, next)| connection.sasl_loop(mechanism, next)))
            }
        }
    }

    /// Send `request` through `codec` and return a future for its decoded
    /// response, subject to `deadline` (or the connection's configured
    /// default request timeout if `None`).
    pub fn request<C: Codec>(&self, codec: C, request: C::Request, deadline: Option<Duration>) -> Box<Future<Item = C::Response, Error = Error>>
        where C: 'static,
              C::Response: 'static
    {
        if let Some(ref err) = self.inner.borrow().closed {
            return Box::new(::futures::future::err(clone_closed_error(err)));
        }

        let api_key = codec.api_key();
        let api_version = codec.api_version();

        {
            let inner = self.inner.borrow();

            if !inner.versions.supports(api_key, api_version) {
                return Box::new(::futures::future::err(ErrorKind::BrokerTooOld(api_key, api_version, inner.versions.max_version(api_key)).into()));
            }
        }

        let mut body = BytesMut::with_capacity(128);

        if let Err(err) = codec.encode::<BigEndian>(request, &mut body) {
            return Box::new(::futures::future::err(err));
        }

        let flexible = codec.is_flexible();
        let timeout = deadline.unwrap_or_else(|| self.inner.borrow().config.request_timeout);

        let pending = self.send_raw(api_key, api_version, flexible, body);

        let timer = self.inner.borrow().timer.clone();
        let with_deadline = pending.select(timer.sleep(timeout).then(|_| Err(ErrorKind::DeadlineExceeded.into())))
            .map(|(reply, _)| reply)
            .map_err(|(err, _)| err);

        let started = Instant::now();

        Box::new(with_deadline.and_then(move |reply| {
            if reply.api_key != api_key {
                bail!(ErrorKind::UnexpectedResponse(reply.api_key));
            }

            codec.decode(&reply.body)
        }).then(move |result| {
            metrics::observe_request(api_key, outcome_of(&result), elapsed_secs(started));
            result
        }))
    }

    /// Encode a bare header plus `body` as one request key/version,
    /// enqueue it for the write loop, and return a future for the raw
    /// reply bytes. Shared by the handshake, SASL exchange, and
    /// `request`'s own version-gated path.
    fn send_raw(&self, api_key: ApiKey, api_version: ApiVersion, flexible: bool, body: BytesMut) -> Box<Future<Item = RawReply, Error = Error>> {
        let reserved = {
            let mut inner = self.inner.borrow_mut();
            inner.slots.reserve(api_key)
        };

        let (correlation_id, receiver) = match reserved {
            Ok(pair) => pair,
            Err(err) => return Box::new(::futures::future::err(err)),
        };

        let client_id = self.inner.borrow().client_id.clone();

        let header = RequestHeader {
            api_key: api_key,
            api_version: api_version,
            correlation_id: correlation_id,
            client_id: client_id.map(Into::into),
        };

        let mut frame = BytesMut::with_capacity(SIZE_PREFIX_LEN + 16 + body.len());
        frame.put_i32::<BigEndian>(0); // length placeholder, patched below

        if let Err(err) = header.encode::<BigEndian>(flexible, &mut frame) {
            self.inner.borrow_mut().slots.cancel(correlation_id);
            return Box::new(::futures::future::err(err));
        }

        frame.extend_from_slice(&body);

        let len = (frame.len() - SIZE_PREFIX_LEN) as i32;
        BigEndian::write_i32(&mut frame[..SIZE_PREFIX_LEN], len);

        let sent = {
            let inner = self.inner.borrow();

            match inner.outgoing {
                Some(ref tx) => tx.unbounded_send(frame.to_vec()).is_ok(),
                None => false,
            }
        };

        if !sent {
            self.inner.borrow_mut().slots.cancel(correlation_id);
            return Box::new(::futures::future::err(ErrorKind::ConnectionClosed.into()));
        }

        Box::new(PendingRequest {
            correlation_id: correlation_id,
            inner: Some(self.inner.clone()),
            receiver: receiver,
        })
    }

    /// Close this connection: stop accepting new requests and fail every
    /// request still in flight with `ErrorKind::ClientClosed`.
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();

        if inner.closed.is_none() {
            inner.closed = Some(ErrorKind::ClientClosed.into());
            record_connection_closed();
        }

        inner.outgoing = None;

        let err = ErrorKind::ClientClosed.into();
        inner.slots.fail_all(&err);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed.is_some()
    }

    pub fn addr(&self) -> SocketAddr {
        self.inner.borrow().addr
    }

    pub fn in_flight_requests(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    pub fn versions(&self) -> VersionTable {
        self.inner.borrow().versions.clone()
    }

    /// Track one completed SASL reauth's granted session lifetime against
    /// `config.reauth_min_lifetime`. A grant at or above the minimum resets
    /// the streak; a grant below it extends the streak, tripping
    /// `ErrorKind::SaslReauthLoop` once `SASL_REAUTH_LOOP_THRESHOLD`
    /// consecutive short grants have been observed. A mechanism that never
    /// reports a lifetime (`None`) is assumed not to expire and never
    /// contributes to the streak.
    fn record_reauth(&self, lifetime_millis: Option<i64>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();

        let too_short = match lifetime_millis {
            Some(ms) => ms < duration_as_millis(inner.config.reauth_min_lifetime),
            None => false,
        };

        if too_short {
            inner.short_reauth_streak += 1;

            if inner.short_reauth_streak >= SASL_REAUTH_LOOP_THRESHOLD {
                bail!(ErrorKind::SaslReauthLoop);
            }
        } else {
            inner.short_reauth_streak = 0;
        }

        Ok(())
    }

    /// Close this connection with a caller-supplied terminal error instead
    /// of the generic `ClientClosed` `close()` uses, e.g.
    /// `ErrorKind::ChosenBrokerDead` when `Broker::mark_dead` tears down a
    /// connection whose broker id fell out of cluster metadata. Idempotent,
    /// same as `close()`.
    pub fn fail(&self, err: Error) {
        let mut inner = self.inner.borrow_mut();

        if inner.closed.is_none() {
            inner.slots.fail_all(&err);
            inner.closed = Some(err);
            inner.outgoing = None;
            record_connection_closed();
        }
    }
}

/// Decrement the process-wide open-connections gauge. Paired with the
/// increment in `Connection::open`; called from both `close` (caller-
/// initiated) and `fail` (write/read loop or protocol death), each of
/// which only runs once per connection thanks to the `closed.is_none()`
/// guard at their call sites.
fn record_connection_closed() {
    let open_now = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
    metrics::record_connections_open(open_now);
}

/// A request awaiting its reply, which cancels its slot if dropped before
/// completion (the caller gave up, or a `select` against a deadline timer
/// picked the timer arm first) so the slot doesn't sit occupying in-flight
/// capacity forever.
struct PendingRequest {
    correlation_id: CorrelationId,
    inner: Option<Rc<RefCell<Inner>>>,
    receiver: oneshot::Receiver<Result<RawReply>>,
}

impl Future for PendingRequest {
    type Item = RawReply;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        match self.receiver.poll() {
            Ok(Async::Ready(Ok(reply))) => {
                self.inner = None;
                Ok(Async::Ready(reply))
            }
            Ok(Async::Ready(Err(err))) => {
                self.inner = None;
                Err(err)
            }
            Ok(Async::NotReady) => Ok(Async::NotReady),
            Err(_canceled) => {
                self.inner = None;
                Err(ErrorKind::ConnectionClosed.into())
            }
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if let Some(ref inner) = self.inner {
            inner.borrow_mut().slots.cancel(self.correlation_id);
        }
    }
}

fn spawn_write_loop(handle: &Handle, write_half: WriteHalf<TcpStream>, frames: mpsc::UnboundedReceiver<Vec<u8>>, connection: Connection) {
    let task = frames
        .map_err(|_| -> Error { ErrorKind::ConnectionClosed.into() })
        .fold(write_half, |write_half, frame| io::write_all(write_half, frame).map(|(w, _)| w).map_err(|err| ErrorKind::IoError(err).into()))
        .then(move |result| {
            if let Err(err) = result {
                warn!("write loop for {} failed: {}", connection.addr(), err);
                connection.fail(err);
            }

            Ok(())
        });

    handle.spawn(task);
}

fn spawn_read_loop(handle: &Handle, read_half: ReadHalf<TcpStream>, connection: Connection) {
    let task = ::futures::stream::unfold(read_half, |read_half| Some(read_one_frame(read_half)))
        .for_each({
            let connection = connection.clone();

            move |frame| {
                let correlation_id = protocol::peek_correlation_id(&frame)?;
                let body = frame[CORRELATION_ID_LEN..].to_vec();

                trace!("received reply correlation id {} ({} body bytes)", correlation_id, body.len());

                connection.inner.borrow_mut().slots.complete(correlation_id, body)
            }
        })
        .then(move |result| {
            if let Err(err) = result {
                debug!("read loop for {} ended: {}", connection.addr(), err);
                connection.fail(err);
            }

            Ok(())
        });

    handle.spawn(task);
}

fn read_one_frame(read_half: ReadHalf<TcpStream>) -> Box<Future<Item = (Vec<u8>, ReadHalf<TcpStream>), Error = Error>> {
    let len_buf = vec![0u8; SIZE_PREFIX_LEN];

    Box::new(io::read_exact(read_half, len_buf).map_err(|err| -> Error { ErrorKind::IoError(err).into() }).and_then(|(read_half, len_buf)| {
        if len_buf.len() < SIZE_PREFIX_LEN {
            return Box::new(::futures::future::err(ErrorKind::Eof.into())) as Box<Future<Item = (Vec<u8>, ReadHalf<TcpStream>), Error = Error>>;
        }

        let len = BigEndian::read_i32(&len_buf);
        let body_buf = vec![0u8; len as usize];

        Box::new(io::read_exact(read_half, body_buf).map_err(|err| -> Error { ErrorKind::IoError(err).into() }))
    }))
}

fn raw_bytes_body(bytes: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(bytes.len() + 4);
    buf.put_i32::<BigEndian>(bytes.len() as i32);
    buf.put_slice(bytes);
    buf
}

named!(parse_error_code_nom<i16>, call!(be_i16));

fn parse_error_code(body: &[u8]) -> Result<i16> {
    match parse_error_code_nom(body) {
        ::nom::IResult::Done(_, code) => Ok(code),
        _ => bail!(ErrorKind::CodecError("short SASL handshake response")),
    }
}

fn parse_api_versions(body: &[u8]) -> Result<VersionTable> {
    match parse_api_versions_body(body) {
        ::nom::IResult::Done(_, (error_code, entries)) => {
            if error_code != 0 {
                bail!(ErrorKind::KafkaError(KafkaCode::from(error_code)));
            }

            let mut table = VersionTable::empty();

            for (key, _min, max) in entries {
                table.set_max(key, max);
            }

            Ok(table)
        }
        _ => bail!(ErrorKind::CodecError("malformed ApiVersions response")),
    }
}

named!(parse_api_versions_body<(i16, Vec<(ApiKey, ApiVersion, ApiVersion)>)>,
    do_parse!(
        error_code: be_i16
     >> entries: length_count!(::nom::be_i32, parse_api_version_entry)
     >> (error_code, entries)
    )
);

named!(parse_api_version_entry<(ApiKey, ApiVersion, ApiVersion)>,
    do_parse!(
        key: be_i16
     >> min: be_i16
     >> max: be_i16
     >> (key, min, max)
    )
);

fn clone_closed_error(err: &Error) -> Error {
    ErrorKind::Msg(err.to_string()).into()
}

fn duration_as_millis(d: Duration) -> i64 {
    d.as_secs() as i64 * 1000 + (d.subsec_nanos() / 1_000_000) as i64
}

fn elapsed_secs(since: Instant) -> f64 {
    let elapsed = since.elapsed();
    elapsed.as_secs() as f64 + f64::from(elapsed.subsec_nanos()) / 1e9
}

/// Label a completed request's outcome for `metrics::observe_request`,
/// reusing `classify`'s retry/skip predicates so the label reflects the
/// same view of "was this transient" that `Broker` uses to decide whether
/// to retry.
fn outcome_of<T>(result: &Result<T>) -> Outcome {
    match *result {
        Ok(_) => Outcome::Ok,
        Err(ref err) => {
            match *err.kind() {
                ErrorKind::KafkaError(_) => Outcome::KafkaError,
                _ => {
                    if classify::retriable_on_same_broker(Some(err)) || classify::skippable_to_next_broker(Some(err)) {
                        Outcome::Retriable
                    } else {
                        Outcome::Fatal
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A `Connection` with no backing socket (`outgoing: None`), good
    /// enough for exercising logic that doesn't touch the wire: the
    /// Api-Versions/SASL response parsers and the reauth-loop tracker.
    fn bare_connection() -> Connection {
        let inner = Rc::new(RefCell::new(Inner {
            addr: "127.0.0.1:0".parse().unwrap(),
            client_id: None,
            config: ConnectionConfig::default(),
            timer: Rc::new(Timer::default()),
            versions: VersionTable::empty(),
            slots: SlotTable::new(8),
            outgoing: None,
            closed: None,
            short_reauth_streak: 0,
        }));

        Connection { inner: inner }
    }

    #[test]
    fn parse_api_versions_populates_table() {
        let body = vec![
            0, 0, // error_code
            0, 0, 0, 1, // one entry
            0, 18, 0, 0, 0, 3, // key=18, min=0, max=3
        ];

        let table = parse_api_versions(&body).unwrap();

        assert_eq!(table.max_version(18), 3);
        assert_eq!(table.max_version(1), ::version::UNSUPPORTED);
    }

    #[test]
    fn parse_api_versions_surfaces_kafka_error_code() {
        let body = vec![0, 35, 0, 0, 0, 0]; // UnsupportedVersion, no entries

        let err = parse_api_versions(&body).unwrap_err();

        match *err.kind() {
            ErrorKind::KafkaError(KafkaCode::UnsupportedVersion) => {}
            ref other => panic!("unexpected error kind: {:?}", other),
        }
    }

    #[test]
    fn parse_error_code_rejects_short_body() {
        assert!(parse_error_code(&[0]).is_err());
    }

    #[test]
    fn parse_error_code_reads_be_i16() {
        assert_eq!(parse_error_code(&[0, 7]).unwrap(), 7);
    }

    #[test]
    fn raw_bytes_body_prefixes_length() {
        let body = raw_bytes_body(b"hi");

        assert_eq!(&body[..], &[0, 0, 0, 2, b'h', b'i'][..]);
    }

    #[test]
    fn record_reauth_resets_streak_on_healthy_lifetime() {
        let connection = bare_connection();
        let healthy = duration_as_millis(connection.inner.borrow().config.reauth_min_lifetime) + 1;

        connection.record_reauth(Some(healthy)).unwrap();
        connection.record_reauth(Some(healthy)).unwrap();

        assert_eq!(connection.inner.borrow().short_reauth_streak, 0);
    }

    #[test]
    fn record_reauth_never_trips_on_non_expiring_mechanism() {
        let connection = bare_connection();

        for _ in 0..10 {
            connection.record_reauth(None).unwrap();
        }

        assert_eq!(connection.inner.borrow().short_reauth_streak, 0);
    }

    #[test]
    fn record_reauth_trips_after_consecutive_short_grants() {
        let connection = bare_connection();
        let too_short = 1;

        for _ in 0..SASL_REAUTH_LOOP_THRESHOLD - 1 {
            connection.record_reauth(Some(too_short)).unwrap();
        }

        let result = connection.record_reauth(Some(too_short));

        match result.unwrap_err().kind() {
            &ErrorKind::SaslReauthLoop => {}
            other => panic!("unexpected error kind: {:?}", other),
        }
    }

    #[test]
    fn record_reauth_streak_interrupted_by_a_healthy_grant_does_not_trip() {
        let connection = bare_connection();
        let too_short = 1;
        let healthy = duration_as_millis(connection.inner.borrow().config.reauth_min_lifetime) + 1;

        for _ in 0..SASL_REAUTH_LOOP_THRESHOLD - 1 {
            connection.record_reauth(Some(too_short)).unwrap();
        }

        connection.record_reauth(Some(healthy)).unwrap();

        assert_eq!(connection.inner.borrow().short_reauth_streak, 0);
    }
}
