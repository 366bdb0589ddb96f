use sha2::{Digest as _, Sha256};

use crate::{
    challenge::ChallengeState,
    error::Result,
    identifier::Identifier,
    json::Json,
    login::Login,
};

/// The `dns-account-01` challenge ([draft-ietf-acme-scoped-dns-challenges]).
///
/// A variant of `dns-01` whose record label is derived from the account
/// URL, so multiple ACME accounts can hold validation records for the same
/// domain concurrently:
///
/// ```text
/// _<account-label>._acme-challenge.<domain>.  TXT  <digest>
/// ```
///
/// This challenge is based on an RFC draft. It may change or be removed
/// without notice, SemVer rules do not apply here.
///
/// [draft-ietf-acme-scoped-dns-challenges]: https://datatracker.ietf.org/doc/draft-ietf-acme-scoped-dns-challenges/
pub struct DnsAccount01Challenge {
    pub(super) inner: ChallengeState,
}

impl DnsAccount01Challenge {
    /// Challenge type name: `dns-account-01`
    pub const TYPE: &'static str = "dns-account-01";

    pub(crate) fn new(login: Login, data: Json) -> Result<DnsAccount01Challenge> {
        Ok(DnsAccount01Challenge {
            inner: ChallengeState::new(login, data, Some(Self::TYPE))?,
        })
    }

    pub fn token(&self) -> Result<String> {
        self.inner.token()
    }

    pub fn key_authorization(&self) -> Result<String> {
        self.inner.key_authorization()
    }

    /// The TXT record value, same derivation as for `dns-01`.
    pub fn digest(&self) -> Result<String> {
        Ok(crate::crypto::jose::dns_txt_digest(
            &self.key_authorization()?,
        ))
    }

    /// The account scoped label: base32 of the first 10 bytes of the
    /// SHA-256 digest of the account URL, lowercased.
    pub fn account_label(&self) -> String {
        let digest = Sha256::digest(self.inner.login().account_location());
        base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &digest[..10])
            .to_ascii_lowercase()
    }

    /// The resource record name for a domain identifier, with a trailing
    /// full stop, e.g.
    /// `_ujmmovf2vn55tgye._acme-challenge.www.example.org.`.
    pub fn to_rr_name(&self, identifier: &Identifier) -> Result<String> {
        Ok(format!(
            "_{}._acme-challenge.{}.",
            self.account_label(),
            identifier.domain()?
        ))
    }
}
