//! The `Sasl` collaborator: drives a SASL mechanism's challenge/response
//! exchange during connection setup, after the Api-Versions handshake and
//! before the connection is handed back to its caller.
//!
//! Grounded in the same collaborator split as `codec::Codec`: this crate
//! owns *when* SASL runs (once, at connection open, gating everything
//! else) and how its failures classify (`errors::ErrorKind::
//! SaslHandshakeFailed`, `SaslReauthLoop`); a mechanism (PLAIN, SCRAM,
//! OAUTHBEARER, ...) owns the actual byte exchange by implementing this
//! trait. None of those mechanisms are implemented here — the teacher's
//! pack never retrieved one either, and the library stays mechanism
//! agnostic by design (SPEC_FULL.md's Non-goals exclude bundling vendor
//! SASL backends).

use errors::Result;

/// One step of a SASL exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslStep {
    /// Send `bytes` to the broker and expect another reply to continue the
    /// exchange.
    Continue(Vec<u8>),
    /// Send `bytes` (may be empty) and consider the exchange complete
    /// without waiting for a further reply.
    Done(Vec<u8>),
}

/// A SASL mechanism driver.
///
/// `Connection::authenticate` calls `initial()`, sends it, and then
/// alternates `step(reply)` with further sends until a `SaslStep::Done` is
/// returned or an error propagates as `ErrorKind::SaslHandshakeFailed`.
pub trait Sasl {
    /// The mechanism name sent in `SaslHandshakeRequest`, e.g. `"PLAIN"`.
    fn mechanism(&self) -> &str;

    /// The first message this mechanism sends, before any reply has been
    /// seen.
    fn initial(&mut self) -> Result<SaslStep>;

    /// Advance the exchange given the broker's last reply.
    fn step(&mut self, reply: &[u8]) -> Result<SaslStep>;

    /// How long a session this mechanism's last completed handshake is
    /// good for, if the mechanism tracks expiry (e.g. OAUTHBEARER token
    /// lifetimes). `None` means the session doesn't expire on its own.
    ///
    /// `Connection` compares this against its configured minimum reauth
    /// interval; a mechanism that repeatedly grants sessions shorter than
    /// that minimum trips `ErrorKind::SaslReauthLoop` rather than let the
    /// connection spin reauthenticating.
    fn session_lifetime_millis(&self) -> Option<i64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal two-step mechanism: send a fixed token, expect `b"ok"`
    /// back, done.
    struct FixedToken {
        token: Vec<u8>,
        sent: bool,
    }

    impl Sasl for FixedToken {
        fn mechanism(&self) -> &str {
            "FIXED"
        }

        fn initial(&mut self) -> Result<SaslStep> {
            self.sent = true;
            Ok(SaslStep::Continue(self.token.clone()))
        }

        fn step(&mut self, reply: &[u8]) -> Result<SaslStep> {
            if reply == b"ok" {
                Ok(SaslStep::Done(Vec::new()))
            } else {
                bail!(::errors::ErrorKind::SaslHandshakeFailed("unexpected challenge".into()))
            }
        }
    }

    #[test]
    fn completes_on_expected_reply() {
        let mut mech = FixedToken { token: b"token".to_vec(), sent: false };

        match mech.initial().unwrap() {
            SaslStep::Continue(bytes) => assert_eq!(bytes, b"token"),
            SaslStep::Done(_) => panic!("expected Continue"),
        }

        assert!(mech.sent);

        match mech.step(b"ok").unwrap() {
            SaslStep::Done(bytes) => assert!(bytes.is_empty()),
            SaslStep::Continue(_) => panic!("expected Done"),
        }
    }

    #[test]
    fn unexpected_reply_fails_handshake() {
        let mut mech = FixedToken { token: b"token".to_vec(), sent: false };

        mech.initial().unwrap();

        assert!(mech.step(b"no").is_err());
    }

    #[test]
    fn default_session_lifetime_is_none() {
        let mech = FixedToken { token: Vec::new(), sent: false };

        assert_eq!(mech.session_lifetime_millis(), None);
    }
}
