//! Pure, stateless predicates over an `Error` value: does it make sense to
//! retry the same broker, skip to another, or is it a sentinel caller-intent
//! error that must surface verbatim?
//!
//! None of these functions touch I/O or the `Connection`/`Broker` state
//! machines; they only pattern-match on `ErrorKind`. Keeping them pure makes
//! them trivial to unit test against the scenarios in the crate's test
//! suite without standing up a broker.

use errors::{Error, ErrorKind};

/// True iff `e`'s kind is a dial (connect) failure.
///
/// Dial failures are deliberately *not* retried on the same broker (see
/// `retriable_on_same_broker`) to avoid fast-looping on a broken
/// resolver/connect path; the broker handle is expected to skip to another
/// broker instead.
pub fn is_dial_error(e: &Error) -> bool {
    match *e.kind() {
        ErrorKind::Dial(_) => true,
        _ => false,
    }
}

/// Should the same request be retried on the same broker connection?
///
/// `None` (no error) is always `false`.
///
/// Ordering is significant: the syscall-level / well-known-kind checks run
/// before the generic `TemporaryError` probe. A network-operation wrapper
/// coming from a collaborator will typically answer `is_temporary() ==
/// false` unconditionally (it doesn't know about retryable syscall errors
/// underneath it), which would hide a retriable I/O failure if probed
/// first.
pub fn retriable_on_same_broker(e: Option<&Error>) -> bool {
    let e = match e {
        Some(e) => e,
        None => return false,
    };

    match *e.kind() {
        ErrorKind::Dial(_) => false,
        ErrorKind::IoError(_) => true,
        ErrorKind::ConnectionClosed | ErrorKind::Eof => true,
        ErrorKind::ProducerIdLoadFail |
        ErrorKind::ChosenBrokerDead(_) |
        ErrorKind::SaslReauthLoop |
        ErrorKind::CorrelationIdMismatch(_) => true,
        _ => temporary_hint(e).unwrap_or(false),
    }
}

/// Should the caller's broker selector try a different broker?
///
/// Cancellation and deadline-exceeded are never reclassified as skippable —
/// they represent caller intent and must surface verbatim.
pub fn skippable_to_next_broker(e: Option<&Error>) -> bool {
    let e = match e {
        Some(e) => e,
        None => return false,
    };

    match *e.kind() {
        ErrorKind::UnknownBroker(_) => true,
        ErrorKind::Canceled | ErrorKind::DeadlineExceeded => false,
        ErrorKind::Dial(_) | ErrorKind::IoError(_) | ErrorKind::ConnectionClosed | ErrorKind::Eof => true,
        _ => false,
    }
}

/// Probe the `TemporaryError` capability, if the error exposes one.
fn temporary_hint(e: &Error) -> Option<bool> {
    match *e.kind() {
        ErrorKind::Other(ref err) => Some(err.is_temporary()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use errors::{Error, ErrorKind, TemporaryError};
    use ids::BrokerId;

    use super::*;

    fn broker() -> BrokerId {
        BrokerId::new(1, "broker-1", 9092)
    }

    #[test]
    fn no_error_is_never_retriable() {
        assert!(!retriable_on_same_broker(None));
        assert!(!skippable_to_next_broker(None));
    }

    #[test]
    fn dial_error_is_skippable_not_retriable() {
        let err: Error = ErrorKind::Dial(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")).into();

        assert!(is_dial_error(&err));
        assert!(!retriable_on_same_broker(Some(&err)));
        assert!(skippable_to_next_broker(Some(&err)));
    }

    #[test]
    fn syscall_io_error_is_retriable_on_same_broker() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer").into();

        assert!(!is_dial_error(&err));
        assert!(retriable_on_same_broker(Some(&err)));
    }

    #[test]
    fn connection_closed_is_retriable() {
        let err: Error = ErrorKind::ConnectionClosed.into();

        assert!(retriable_on_same_broker(Some(&err)));
        assert!(skippable_to_next_broker(Some(&err)));
    }

    #[test]
    fn lifecycle_errors_are_retriable_on_same_broker() {
        for kind in vec![
            ErrorKind::ProducerIdLoadFail,
            ErrorKind::ChosenBrokerDead(broker()),
            ErrorKind::SaslReauthLoop,
            ErrorKind::CorrelationIdMismatch(42),
        ] {
            let err: Error = kind.into();
            assert!(retriable_on_same_broker(Some(&err)));
        }
    }

    #[test]
    fn cancellation_and_deadline_are_never_skippable() {
        let canceled: Error = ErrorKind::Canceled.into();
        let deadline: Error = ErrorKind::DeadlineExceeded.into();

        assert!(!skippable_to_next_broker(Some(&canceled)));
        assert!(!skippable_to_next_broker(Some(&deadline)));
        assert!(!retriable_on_same_broker(Some(&canceled)));
        assert!(!retriable_on_same_broker(Some(&deadline)));
    }

    #[test]
    fn unknown_broker_is_skippable() {
        let err: Error = ErrorKind::UnknownBroker(broker()).into();

        assert!(skippable_to_next_broker(Some(&err)));
        assert!(!retriable_on_same_broker(Some(&err)));
    }

    #[derive(Debug)]
    struct FlakyCollaboratorError(bool);

    impl ::std::fmt::Display for FlakyCollaboratorError {
        fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
            write!(f, "flaky collaborator error")
        }
    }

    impl ::std::error::Error for FlakyCollaboratorError {
        fn description(&self) -> &str {
            "flaky collaborator error"
        }
    }

    impl TemporaryError for FlakyCollaboratorError {
        fn is_temporary(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn temporary_probe_only_applies_to_unclassified_errors() {
        let temporary: Error = ErrorKind::Other(Box::new(FlakyCollaboratorError(true))).into();
        let permanent: Error = ErrorKind::Other(Box::new(FlakyCollaboratorError(false))).into();

        assert!(retriable_on_same_broker(Some(&temporary)));
        assert!(!retriable_on_same_broker(Some(&permanent)));
    }

    #[test]
    fn types_lacking_temporary_default_to_non_retriable() {
        let err: Error = ErrorKind::UnexpectedResponse(7).into();

        assert!(!retriable_on_same_broker(Some(&err)));
    }
}
