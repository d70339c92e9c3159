use std::time::Duration;

/// Per-connection tuning, separate from whatever higher-level config a
/// `Broker`/cluster layer carries, mirroring the teacher's split between
/// `ClientConfig` (cluster-wide) and per-service timeouts threaded through
/// `TimeoutMiddleware::new(service, timer, request_timeout)`.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Requests buffered awaiting a reply before `Connection::request`
    /// starts failing new calls with `ErrorKind::MaxBufferedExceeded`.
    pub max_in_flight_requests: usize,
    /// Default per-request deadline, used when a caller doesn't supply one
    /// of its own.
    pub request_timeout: Duration,
    /// The shortest SASL session lifetime this crate is willing to accept
    /// without treating repeated short grants as `ErrorKind::SaslReauthLoop`.
    pub reauth_min_lifetime: Duration,
    /// Idle time after which an unused connection is eligible to be closed
    /// by its owning `Broker`.
    pub max_connection_idle: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            max_in_flight_requests: 128,
            request_timeout: Duration::from_secs(30),
            reauth_min_lifetime: Duration::from_secs(60),
            max_connection_idle: Duration::from_secs(5 * 60),
        }
    }
}
