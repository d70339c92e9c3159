//! The `Codec` collaborator: turns a caller's request into wire bytes and
//! wire bytes back into a caller's response.
//!
//! This crate multiplexes correlation ids and broker connections; it
//! deliberately doesn't know how to encode a `Metadata` or `Produce` body.
//! That knowledge lives in whatever implements `Codec` for a given request
//! type, grounded in the same split the teacher draws between
//! `protocol::Encodable`/the `parse_*` functions (wire shape) and
//! `client::KafkaClient` (which picks versions and calls them). Here the
//! version-picking and request-shape concerns are pulled apart explicitly:
//! `Connection`/`Broker` own versioning, `Codec` owns shape.

use bytes::{BytesMut, ByteOrder};

use errors::Result;
use ids::{ApiKey, ApiVersion};

/// Encodes one request type and decodes its matching response.
///
/// A `Codec` is stateless and `Clone`; `Connection` holds one per in-flight
/// request (boxed, via `BrokerRequest`) rather than one per connection,
/// since different requests on the same connection can carry different
/// concrete `Request`/`Response` types.
pub trait Codec {
    /// The request value this codec knows how to encode.
    type Request;
    /// The response value this codec produces from the matching reply.
    type Response;

    /// The request key this codec encodes, e.g. `protocol::ApiKeys::Fetch as
    /// ApiKey`. Used by `Connection`/`Broker` to consult the `VersionTable`
    /// before a request is ever encoded.
    fn api_key(&self) -> ApiKey;

    /// The request version this codec will encode at. `Connection::request`
    /// rejects the call up front with `ErrorKind::BrokerTooOld` if the
    /// negotiated `VersionTable` doesn't support it, so `encode` itself
    /// never has to handle an unsupported version.
    fn api_version(&self) -> ApiVersion;

    /// `true` if `api_version()` uses Kafka's compact, tagged-field framing.
    /// Passed straight through to `protocol::RequestHeader::encode`.
    fn is_flexible(&self) -> bool {
        false
    }

    /// Encode `request`'s body onto `dst`. The request header (api key,
    /// version, correlation id, client id) has already been written by the
    /// time this is called; `encode` only appends the body.
    fn encode<T: ByteOrder>(&self, request: Self::Request, dst: &mut BytesMut) -> Result<()>;

    /// Decode a response body out of `src`, which contains exactly the
    /// bytes after the response header (the header's correlation id has
    /// already been consumed to find this codec's in-flight slot).
    fn decode(&self, src: &[u8]) -> Result<Self::Response>;
}

#[cfg(test)]
mod tests {
    use bytes::{BigEndian, BufMut, ByteOrder, BytesMut};

    use errors::Result;
    use ids::{ApiKey, ApiVersion};

    use super::*;

    #[derive(Clone)]
    struct EchoCodec;

    impl Codec for EchoCodec {
        type Request = i32;
        type Response = i32;

        fn api_key(&self) -> ApiKey {
            3
        }

        fn api_version(&self) -> ApiVersion {
            0
        }

        fn encode<T: ByteOrder>(&self, request: i32, dst: &mut BytesMut) -> Result<()> {
            dst.put_i32::<T>(request);
            Ok(())
        }

        fn decode(&self, src: &[u8]) -> Result<i32> {
            Ok(BigEndian::read_i32(src))
        }
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let codec = EchoCodec;
        let mut buf = BytesMut::with_capacity(4);

        codec.encode::<BigEndian>(42, &mut buf).unwrap();

        assert_eq!(codec.decode(&buf[..]).unwrap(), 42);
    }
}
