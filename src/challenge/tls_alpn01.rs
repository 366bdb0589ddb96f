use x509_cert::ext::Extension;

use crate::{
    challenge::ChallengeState,
    crypto::jose,
    error::Result,
    json::Json,
    login::Login,
};

/// The `tls-alpn-01` challenge ([RFC 8737]).
///
/// Validation opens a TLS connection to the domain on port 443,
/// negotiating the [`jose::ACME_TLS_ALPN_NAME`] ALPN protocol. The served
/// certificate must be self-signed for the identifier and carry the
/// critical `acmeValidation` extension from
/// [`acme_validation_extension()`].
///
/// [`acme_validation_extension()`]: Self::acme_validation_extension
/// [RFC 8737]: https://datatracker.ietf.org/doc/html/rfc8737
pub struct TlsAlpn01Challenge {
    pub(super) inner: ChallengeState,
}

impl TlsAlpn01Challenge {
    /// Challenge type name: `tls-alpn-01`
    pub const TYPE: &'static str = "tls-alpn-01";

    pub(crate) fn new(login: Login, data: Json) -> Result<TlsAlpn01Challenge> {
        Ok(TlsAlpn01Challenge {
            inner: ChallengeState::new(login, data, Some(Self::TYPE))?,
        })
    }

    pub fn token(&self) -> Result<String> {
        self.inner.token()
    }

    pub fn key_authorization(&self) -> Result<String> {
        self.inner.key_authorization()
    }

    /// The `acmeValidation` extension to put into the validation
    /// certificate: the SHA-256 digest of the key authorization in a DER
    /// OCTET STRING, marked critical.
    pub fn acme_validation_extension(&self) -> Result<Extension> {
        jose::acme_validation_extension(&self.key_authorization()?)
    }
}

#[cfg(test)]
mod tests {
    use sha2::{Digest as _, Sha256};

    use super::*;
    use crate::test;

    #[test]
    fn extension_wraps_the_key_authorization_digest() {
        let (login, _transport) = test::login(vec![]);
        let challenge = TlsAlpn01Challenge::new(
            login,
            Json::parse(test::TLS_ALPN01_CHALLENGE_JSON).unwrap(),
        )
        .unwrap();

        let extension = challenge.acme_validation_extension().unwrap();
        assert_eq!(extension.extn_id, jose::ID_PE_ACME_IDENTIFIER);
        assert!(extension.critical);

        let digest = Sha256::digest(challenge.key_authorization().unwrap());
        assert_eq!(&extension.extn_value.as_bytes()[2..], digest.as_slice());
    }
}
