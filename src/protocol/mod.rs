//! Kafka request/response header framing.
//!
//! This crate's core is transport, not a full per-API codec library: the
//! body of any given request/response is the `codec::Codec` collaborator's
//! job (see that module). This module owns only the 4-byte length prefix
//! and the header fields every request/response shares, grounded in the
//! teacher's `protocol::{RequestHeader, ResponseHeader}` and its
//! `parse_str`/`parse_string`/`parse_bytes` nom combinators, which are kept
//! verbatim below since `Codec` implementors still need them to decode
//! string/bytes fields inside a body.

use std::str;
use std::borrow::{Cow, ToOwned};

use bytes::{BigEndian, ByteOrder, BufMut, BytesMut};
use nom::{be_i16, be_i32};

use errors::Result;
use ids::{ApiKey, ApiVersion, CorrelationId};

/// Length of the wire length-prefix that precedes every request/response.
pub const SIZE_PREFIX_LEN: usize = 4;

/// The numeric codes the `ApiKey` field in a request header can take, named
/// for the keys this crate's `VersionTable` baselines and tests reference.
/// Request/response bodies for any of these are supplied by a `Codec`
/// collaborator, not modeled here.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i16)]
pub enum ApiKeys {
    Produce = 0,
    Fetch = 1,
    Offsets = 2,
    Metadata = 3,
    OffsetCommit = 8,
    OffsetFetch = 9,
    GroupCoordinator = 10,
    JoinGroup = 11,
    Heartbeat = 12,
    LeaveGroup = 13,
    SyncGroup = 14,
    SaslHandshake = 17,
    ApiVersions = 18,
    CreateTopics = 19,
    DeleteTopics = 20,
    SaslAuthenticate = 36,
}

/// A Kafka request header: `ApiKey`, `ApiVersion`, `CorrelationId`, and an
/// optional client id string.
///
/// `client_id` is borrowed rather than owned since callers (the
/// `Connection` write task) build a header fresh per request from a
/// connection-wide client id string and don't need to own a copy each time.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestHeader<'a> {
    pub api_key: ApiKey,
    pub api_version: ApiVersion,
    pub correlation_id: CorrelationId,
    pub client_id: Option<Cow<'a, str>>,
}

impl<'a> RequestHeader<'a> {
    /// Encode this header onto `dst`. `flexible` selects Kafka's compact
    /// (tagged-field) framing used by newer request versions; non-flexible
    /// headers get the classic `int16`-length string and no tag buffer.
    pub fn encode<T: ByteOrder>(self, flexible: bool, dst: &mut BytesMut) -> Result<()> {
        dst.put_i16::<T>(self.api_key);
        dst.put_i16::<T>(self.api_version);
        dst.put_i32::<T>(self.correlation_id);

        if flexible {
            put_compact_string::<T>(dst, self.client_id.as_ref().map(|s| s.as_ref()));
            put_empty_tag_buffer(dst);
        } else {
            put_string::<T>(dst, self.client_id.as_ref().map(|s| s.as_ref()));
        }

        Ok(())
    }
}

/// A Kafka response header: just the correlation id that pairs it back to
/// the in-flight request slot that sent it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    pub correlation_id: CorrelationId,
}

named!(pub parse_response_header<ResponseHeader>,
    do_parse!(
        correlation_id: be_i32
     >> (ResponseHeader { correlation_id: correlation_id })
    )
);

/// Parse just the trailing tagged-field buffer of a flexible response
/// header (a single `0` byte when there are no tags, which is all this
/// crate ever sends or expects back).
named!(pub parse_empty_tag_buffer<()>,
    do_parse!(tag!(&[0][..]) >> (()))
);

fn put_string<T: ByteOrder>(dst: &mut BytesMut, s: Option<&str>) {
    match s {
        Some(s) => {
            dst.put_i16::<T>(s.len() as i16);
            dst.put_slice(s.as_bytes());
        }
        None => dst.put_i16::<T>(-1),
    }
}

fn put_compact_string<T: ByteOrder>(dst: &mut BytesMut, s: Option<&str>) {
    match s {
        Some(s) => {
            put_unsigned_varint(dst, s.len() as u32 + 1);
            dst.put_slice(s.as_bytes());
        }
        None => put_unsigned_varint(dst, 0),
    }
}

/// This crate never attaches tags of its own; a bare `0` (no tags) is
/// always correct to send.
fn put_empty_tag_buffer(dst: &mut BytesMut) {
    put_unsigned_varint(dst, 0);
}

fn put_unsigned_varint(dst: &mut BytesMut, mut value: u32) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80;
        }

        dst.put_u8(byte);

        if value == 0 {
            break;
        }
    }
}

/// Decode only the correlation id out of a raw response frame, without
/// fully parsing the rest of the header or body. Used by `Connection`'s
/// read loop on the hot path: it needs the id to look up the in-flight
/// slot before it can even know which `Codec` to hand the remaining bytes
/// to.
pub fn peek_correlation_id(buf: &[u8]) -> Result<CorrelationId> {
    if buf.len() < 4 {
        bail!(::errors::ErrorKind::Eof);
    }

    Ok(BigEndian::read_i32(buf))
}

named!(pub parse_str<Option<Cow<str>>>,
    do_parse!(
        len: be_i16
     >> s: cond!(len > 0, map!(map_res!(take!(len), str::from_utf8), Cow::from))
     >> (s)
    )
);

named!(pub parse_string<String>,
    do_parse!(
        len: be_i16
     >> s: cond_reduce!(len > 0, map!(map_res!(take!(len), str::from_utf8), ToOwned::to_owned))
     >> (s)
    )
);

named!(pub parse_bytes<Option<Cow<[u8]>>>,
    do_parse!(
        len: be_i32
     >> s: cond!(len > 0, map!(take!(len), Cow::from))
     >> (s)
    )
);

#[cfg(test)]
mod tests {
    use bytes::BigEndian;
    use nom::{IResult, Needed, ErrorKind};

    use super::*;

    #[test]
    fn test_parse_str() {
        assert_eq!(parse_str(b"\0"), IResult::Incomplete(Needed::Size(2)));
        assert_eq!(parse_str(b"\xff\xff"), IResult::Done(&b""[..], None));
        assert_eq!(parse_str(b"\0\0"), IResult::Done(&b""[..], None));
        assert_eq!(parse_str(b"\0\x04test"),
                   IResult::Done(&b""[..], Some(Cow::from("test"))));
    }

    #[test]
    fn test_parse_string() {
        assert_eq!(parse_string(b"\0"), IResult::Incomplete(Needed::Size(2)));
        assert_eq!(parse_string(b"\xff\xff"),
                   IResult::Error(ErrorKind::CondReduce));
        assert_eq!(parse_string(b"\0\0"), IResult::Error(ErrorKind::CondReduce));
        assert_eq!(parse_string(b"\0\x04test"),
                   IResult::Done(&b""[..], "test".to_owned()));
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes(b"\0"), IResult::Incomplete(Needed::Size(4)));
        assert_eq!(parse_bytes(b"\xff\xff\xff\xff"),
                   IResult::Done(&b""[..], None));
        assert_eq!(parse_bytes(b"\0\0\0\0"), IResult::Done(&b""[..], None));
        assert_eq!(parse_bytes(b"\0\0\0\x04test"),
                   IResult::Done(&b""[..], Some(Cow::from(&b"test"[..]))));
    }

    #[test]
    fn request_header_round_trips_non_flexible() {
        let header = RequestHeader {
            api_key: ApiKeys::ApiVersions as ApiKey,
            api_version: 0,
            correlation_id: 123,
            client_id: Some("client".into()),
        };

        let mut buf = BytesMut::with_capacity(64);
        header.encode::<BigEndian>(false, &mut buf).unwrap();

        assert_eq!(&buf[..],
                   &[0, 18, 0, 0, 0, 0, 0, 123, 0, 6, 99, 108, 105, 101, 110, 116][..]);
    }

    #[test]
    fn request_header_round_trips_flexible_no_client_id() {
        let header = RequestHeader {
            api_key: ApiKeys::Fetch as ApiKey,
            api_version: 13,
            correlation_id: 7,
            client_id: None,
        };

        let mut buf = BytesMut::with_capacity(64);
        header.encode::<BigEndian>(true, &mut buf).unwrap();

        // api_key, api_version, correlation_id, compact-nullable-string(0 => null), empty tag buffer
        assert_eq!(&buf[..], &[0, 1, 0, 13, 0, 0, 0, 7, 0, 0][..]);
    }

    #[test]
    fn peek_correlation_id_rejects_short_buffers() {
        assert!(peek_correlation_id(&[0, 0, 1][..]).is_err());
    }

    #[test]
    fn peek_correlation_id_reads_a_response_frames_leading_i32() {
        // unlike a request header, a response starts with the correlation
        // id directly -- no api key/version fields precede it.
        let mut buf = BytesMut::with_capacity(8);
        buf.put_i32::<BigEndian>(123);
        buf.put_slice(b"body");

        assert_eq!(peek_correlation_id(&buf[..]).unwrap(), 123);
    }
}
