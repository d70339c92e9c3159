/// Various errors reported by a remote Kafka server.
///
/// We use numeric codes to indicate what problem occurred on the server.
/// These can be translated by the client into exceptions or
/// whatever the appropriate error handling mechanism in the client language.
///
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i16)]
pub enum KafkaCode {
    /// The server experienced an unexpected error when processing the request
    Unknown = -1,
    None = 0,
    /// The requested offset is outside the range of offsets
    /// maintained by the server for the given topic/partition
    OffsetOutOfRange = 1,
    /// This indicates that a message contents does not match its CRC
    CorruptMessage = 2,
    /// This request is for a topic or partition that does not exist
    /// on this broker.
    UnknownTopicOrPartition = 3,
    /// The message has a negative size
    InvalidMessageSize = 4,
    /// This error is thrown if we are in the middle of a leadership
    /// election and there is currently no leader for this partition
    /// and hence it is unavailable for writes.
    LeaderNotAvailable = 5,
    /// This error is thrown if the client attempts to send messages
    /// to a replica that is not the leader for some partition. It
    /// indicates that the clients metadata is out of date.
    NotLeaderForPartition = 6,
    /// This error is thrown if the request exceeds the user-specified
    /// time limit in the request.
    RequestTimedOut = 7,
    /// This is not a client facing error and is used mostly by tools
    /// when a broker is not alive.
    BrokerNotAvailable = 8,
    /// If replica is expected on a broker, but is not (this can be
    /// safely ignored).
    ReplicaNotAvailable = 9,
    /// The server has a configurable maximum message size to avoid
    /// unbounded memory allocation. This error is thrown if the
    /// client attempt to produce a message larger than this maximum.
    MessageSizeTooLarge = 10,
    /// Internal error code for broker-to-broker communication.
    StaleControllerEpoch = 11,
    /// If you specify a string larger than configured maximum for
    /// offset metadata
    OffsetMetadataTooLarge = 12,
    /// The server disconnected before a response was received.
    NetworkException = 13,
    /// The broker returns this error code for an offset fetch request
    /// if it is still loading offsets (after a leader change for that
    /// offsets topic partition), or in response to group membership
    /// requests (such as heartbeats) when group metadata is being
    /// loaded by the coordinator.
    GroupLoadInProgress = 14,
    /// The broker returns this error code for group coordinator
    /// requests, offset commits, and most group management requests
    /// if the offsets topic has not yet been created, or if the group
    /// coordinator is not active.
    GroupCoordinatorNotAvailable = 15,
    /// The broker returns this error code if it receives an offset
    /// fetch or commit request for a group that it is not a
    /// coordinator for.
    NotCoordinatorForGroup = 16,
    /// For a request which attempts to access an invalid topic
    /// (e.g. one which has an illegal name), or if an attempt is made
    /// to write to an internal topic (such as the consumer offsets
    /// topic).
    InvalidTopic = 17,
    /// If a message batch in a produce request exceeds the maximum
    /// configured segment size.
    RecordListTooLarge = 18,
    /// Returned from a produce request when the number of in-sync
    /// replicas is lower than the configured minimum and requiredAcks is
    /// -1.
    NotEnoughReplicas = 19,
    /// Returned from a produce request when the message was written
    /// to the log, but with fewer in-sync replicas than required.
    NotEnoughReplicasAfterAppend = 20,
    /// Returned from a produce request if the requested requiredAcks is
    /// invalid (anything other than -1, 1, or 0).
    InvalidRequiredAcks = 21,
    /// Returned from group membership requests (such as heartbeats) when
    /// the generation id provided in the request is not the current
    /// generation.
    IllegalGeneration = 22,
    /// Returned in join group when the member provides a protocol type or
    /// set of protocols which is not compatible with the current group.
    InconsistentGroupProtocol = 23,
    /// Returned in join group when the groupId is empty or null.
    InvalidGroupId = 24,
    /// Returned from group requests (offset commits/fetches, heartbeats,
    /// etc) when the memberId is not in the current generation.
    UnknownMemberId = 25,
    /// Return in join group when the requested session timeout is outside
    /// of the allowed range on the broker
    InvalidSessionTimeout = 26,
    /// Returned in heartbeat requests when the coordinator has begun
    /// rebalancing the group. This indicates to the client that it
    /// should rejoin the group.
    RebalanceInProgress = 27,
    /// This error indicates that an offset commit was rejected because of
    /// oversize metadata.
    InvalidCommitOffsetSize = 28,
    /// Returned by the broker when the client is not authorized to access
    /// the requested topic.
    TopicAuthorizationFailed = 29,
    /// Returned by the broker when the client is not authorized to access
    /// a particular groupId.
    GroupAuthorizationFailed = 30,
    /// Returned by the broker when the client is not authorized to use an
    /// inter-broker or administrative API.
    ClusterAuthorizationFailed = 31,
    /// The timestamp of the message is out of acceptable range.
    InvalidTimestamp = 32,
    /// The broker does not support the requested SASL mechanism.
    UnsupportedSaslMechanism = 33,
    /// Request is not valid given the current SASL state.
    IllegalSaslState = 34,
    /// The version of API is not supported.
    UnsupportedVersion = 35,
    /// Topic with this name already exists.
    TopicAlreadyExists = 36,
    /// Number of partitions is invalid.
    InvalidPartitions = 37,
    /// Replication-factor is invalid.
    InvalidReplicationFactor = 38,
    /// Replica assignment is invalid.
    InvalidReplicaAssignment = 39,
    /// Configuration is invalid.
    InvalidConfig = 40,
    /// This is not the correct controller for this cluster.
    NotController = 41,
    /// This most likely occurs because of a request being malformed by the client library
    /// or the message was sent to an incompatible broker. See the broker logs for more details.
    InvalidRequest = 42,
    /// The message format version on the broker does not support the request.
    UnsupportedForMessageFormat = 43,
    /// Request parameters do not satisfy the configured policy.
    PolicyViolation = 44,
}

impl From<i16> for KafkaCode {
    fn from(v: i16) -> Self {
        if v < -1 || v > 44 {
            KafkaCode::Unknown
        } else {
            unsafe { ::std::mem::transmute(v) }
        }
    }
}

use std::fmt;

use ids::{ApiKey, ApiVersion, BrokerId};

/// An optional capability an error value may expose to the classifier: does
/// the underlying failure look transient? Types that don't implement this
/// are treated as non-temporary by `classify::retriable_on_same_broker`
/// (see its doc comment for why the syscall check has to run first).
pub trait TemporaryError: fmt::Debug + fmt::Display + Send + 'static {
    fn is_temporary(&self) -> bool {
        false
    }
}

error_chain!{
    foreign_links {
        IoError(::std::io::Error);
        ParseError(::nom::ErrorKind);
    }

    errors {
        /// The codec collaborator failed to decode or encode a frame body.
        CodecError(reason: &'static str) {
            description("codec error")
            display("codec error: {}", reason)
        }

        /// TCP dial (connect) failed. Tracked separately from `IoError` so the
        /// classifier can tell "never connected" apart from "connection broke
        /// while serving" without re-parsing the `io::Error`.
        Dial(err: ::std::io::Error) {
            description("dial error")
            display("dial error: {}", err)
        }

        /// The peer closed the connection (EOF on read, or a reset observed
        /// above the raw syscall layer).
        ConnectionClosed {
            description("connection closed by peer")
            display("connection closed by peer")
        }

        /// End of stream reached while a reply was still expected.
        Eof {
            description("unexpected end of stream")
            display("unexpected end of stream")
        }

        /// A reply arrived whose correlation id matches no in-flight slot.
        /// Terminal for the `Connection` that observed it.
        CorrelationIdMismatch(id: ::ids::CorrelationId) {
            description("correlation id mismatch")
            display("reply with unknown correlation id {}: connection desynchronized", id)
        }

        /// The caller asked for a request key this crate has never heard of.
        UnknownRequestKey(key: ApiKey) {
            description("unknown request key")
            display("unknown request key {}", key)
        }

        /// The broker's negotiated `VersionTable` doesn't support the
        /// requested version of this key.
        BrokerTooOld(key: ApiKey, requested: ApiVersion, max_supported: ApiVersion) {
            description("broker too old for requested API version")
            display("broker supports key {} up to v{}, v{} requested", key, max_supported, requested)
        }

        /// The correlation id counter wrapped around onto an id that is
        /// still in flight.
        CorrelationIdLoopExhausted {
            description("correlation id space exhausted")
            display("correlation id wrapped around onto a live in-flight request")
        }

        /// `Connection::request` was called after `close()`.
        ClientClosed {
            description("client closed")
            display("client closed")
        }

        /// The broker this handle was bound to no longer appears in cluster
        /// metadata.
        ChosenBrokerDead(broker: BrokerId) {
            description("chosen broker no longer in cluster metadata")
            display("broker {} is no longer part of the cluster", broker)
        }

        /// A broker id was referenced that the caller's metadata view has
        /// never seen.
        UnknownBroker(broker: BrokerId) {
            description("unknown broker")
            display("unknown broker {}", broker)
        }

        /// The SASL handshake failed outright.
        SaslHandshakeFailed(reason: String) {
            description("SASL handshake failed")
            display("SASL handshake failed: {}", reason)
        }

        /// The broker keeps granting session lifetimes shorter than the
        /// library's minimum useful lifetime; the `Connection` preempts by
        /// self-closing rather than spinning on reauth.
        SaslReauthLoop {
            description("SASL reauth loop detected")
            display("broker granted too-short SASL session lifetimes repeatedly, closing connection")
        }

        /// A request's deadline fired before a reply arrived.
        DeadlineExceeded {
            description("deadline exceeded")
            display("request deadline exceeded")
        }

        /// The caller cancelled the request explicitly.
        Canceled {
            description("canceled")
            display("request canceled by caller")
        }

        /// Too many requests are already buffered for this connection/broker.
        MaxBufferedExceeded {
            description("max buffered requests exceeded")
            display("max buffered requests exceeded")
        }

        /// A buffered record was purged before it could be sent (e.g. the
        /// producer was closed, or its topic was deleted).
        PurgedWhileBuffered {
            description("purged while buffered")
            display("record purged while still buffered")
        }

        /// A produce record exhausted its configured retry budget.
        RecordRetriesExhausted {
            description("record retries exhausted")
            display("record retries exhausted")
        }

        /// A produce record's end-to-end delivery timeout fired.
        RecordDeliveryTimeout {
            description("record delivery timeout")
            display("record delivery timeout")
        }

        /// The consumer detected it can no longer prove no messages were
        /// skipped (e.g. offsets reset out from under it).
        DataLossDetected {
            description("data loss detected")
            display("data loss detected")
        }

        /// The producer id failed to load from the transaction coordinator.
        ProducerIdLoadFail {
            description("producer id load failed")
            display("failed to load producer id")
        }

        /// A response decoded to a different API key than was requested.
        UnexpectedResponse(key: ApiKey) {
            description("unexpected response")
            display("unexpected response for API key {}", key)
        }

        /// The broker rejected the request with a Kafka protocol error code.
        KafkaError(code: KafkaCode) {
            description("kafka error")
            display("kafka error: {:?}", code)
        }

        /// A capability-probed "is this temporary" error from a collaborator
        /// (codec, SASL mechanism, ...) that doesn't map to one of the kinds
        /// above. Boxed as a trait object so the classifier can still probe
        /// `TemporaryError::is_temporary` on it (see that trait's doc).
        Other(err: Box<TemporaryError>) {
            description("other error")
            display("{}", err)
        }
    }
}