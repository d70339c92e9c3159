//! Small numeric/identifier aliases shared by `protocol`, `errors`, `version`,
//! `connection` and `broker` without pulling any of them into a dependency
//! cycle (`errors` needs a `BrokerId` to name in `ErrorKind::ChosenBrokerDead`,
//! but `protocol`'s encoders return `errors::Result`).

/// A Kafka request key, e.g. `Produce = 0`, `ApiVersions = 18`.
pub type ApiKey = i16;

/// A request/response version understood by a particular broker for a given
/// `ApiKey`. `-1` means "not supported" inside a `VersionTable`.
pub type ApiVersion = i16;

/// The wire correlation id that pairs a request with its reply on one
/// `Connection`.
pub type CorrelationId = i32;

/// Identity of a broker within a cluster: the node id assigned by the
/// cluster, plus the host/port to dial.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BrokerId {
    pub node_id: i32,
    pub host: String,
    pub port: u16,
}

impl BrokerId {
    pub fn new<S: Into<String>>(node_id: i32, host: S, port: u16) -> Self {
        BrokerId {
            node_id: node_id,
            host: host.into(),
            port: port,
        }
    }
}

impl ::std::fmt::Display for BrokerId {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "{}:{}:{}", self.node_id, self.host, self.port)
    }
}
