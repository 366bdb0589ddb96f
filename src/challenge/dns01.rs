use crate::{
    challenge::ChallengeState,
    error::Result,
    identifier::{to_ace, Identifier},
    json::Json,
    login::Login,
};

/// The `dns-01` challenge ([RFC 8555 §8.4]).
///
/// Validation looks up a TXT record under the `_acme-challenge` label of
/// the domain:
///
/// ```text
/// _acme-challenge.<domain>.  TXT  <digest>
/// ```
///
/// Create the record returned by [`to_rr_name()`] with the value of
/// [`digest()`], then [`trigger()`][crate::challenge::Challenge::trigger]
/// the challenge. Mind your DNS propagation delay.
///
/// [`to_rr_name()`]: Self::to_rr_name
/// [`digest()`]: Self::digest
/// [RFC 8555 §8.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.4
pub struct Dns01Challenge {
    pub(super) inner: ChallengeState,
}

impl Dns01Challenge {
    /// Challenge type name: `dns-01`
    pub const TYPE: &'static str = "dns-01";

    /// Label of the TXT record.
    pub const RECORD_NAME_PREFIX: &'static str = "_acme-challenge";

    pub(crate) fn new(login: Login, data: Json) -> Result<Dns01Challenge> {
        Ok(Dns01Challenge {
            inner: ChallengeState::new(login, data, Some(Self::TYPE))?,
        })
    }

    pub fn token(&self) -> Result<String> {
        self.inner.token()
    }

    pub fn key_authorization(&self) -> Result<String> {
        self.inner.key_authorization()
    }

    /// The TXT record value: `base64url(SHA-256(key-authorization))`.
    pub fn digest(&self) -> Result<String> {
        Ok(crate::crypto::jose::dns_txt_digest(
            &self.key_authorization()?,
        ))
    }

    /// The resource record name for a domain identifier, with a trailing
    /// full stop, e.g. `_acme-challenge.www.example.org.`.
    pub fn to_rr_name(identifier: &Identifier) -> Result<String> {
        Ok(format!(
            "{}.{}.",
            Self::RECORD_NAME_PREFIX,
            identifier.domain()?
        ))
    }

    /// Like [`Dns01Challenge::to_rr_name()`], for a plain domain name.
    pub fn domain_rr_name(domain: &str) -> Result<String> {
        Ok(format!("{}.{}.", Self::RECORD_NAME_PREFIX, to_ace(domain)?))
    }
}
