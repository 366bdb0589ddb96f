//! The issued certificate chain, its alternates, and revocation.

use std::io::{BufReader, Cursor, Write};

use der::Decode as _;
use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::{
    connection::Connection,
    crypto::KeyPair,
    error::{AcmeError, Result},
    json::JsonBuilder,
    login::Login,
    session::Session,
};

/// An issued certificate chain, leaf first.
///
/// Unlike the other resources, this one is not backed by JSON; downloading
/// it yields a `application/pem-certificate-chain` document. The download
/// is performed lazily and cached.
pub struct Certificate {
    login: Login,
    location: String,
    chain_pem: Mutex<Option<String>>,
    alternates: Mutex<Vec<String>>,
}

impl Certificate {
    pub(crate) fn bind(login: Login, location: String) -> Certificate {
        Certificate {
            login,
            location,
            chain_pem: Mutex::new(None),
            alternates: Mutex::new(Vec::new()),
        }
    }

    /// The certificate URL.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Downloads the certificate chain. A no-op if it was downloaded
    /// before.
    pub fn download(&self) -> Result<()> {
        let mut chain = self.chain_pem.lock();
        if chain.is_some() {
            return Ok(());
        }

        log::debug!("downloading certificate {}", self.location);
        let mut conn = self.login.session().connect();
        conn.post_as_get_certificate(&self.location, &self.login)?;
        let pem = conn.read_certificates()?;

        // there must be at least the end entity certificate
        if decode_pem_chain(&pem)?.is_empty() {
            return Err(AcmeError::Protocol(
                "certificate response contains no certificates".to_owned(),
            ));
        }

        *self.alternates.lock() = conn.links("alternate");
        *chain = Some(pem);
        Ok(())
    }

    /// The certificate chain as PEM, leaf first, as sent by the server.
    pub fn certificate_chain_pem(&self) -> Result<String> {
        self.download()?;
        Ok(self
            .chain_pem
            .lock()
            .clone()
            .unwrap_or_default())
    }

    /// The certificate chain in DER encoding, leaf first.
    pub fn certificate_chain_der(&self) -> Result<Vec<Vec<u8>>> {
        decode_pem_chain(&self.certificate_chain_pem()?)
    }

    /// The parsed certificate chain, leaf first.
    pub fn certificate_chain(&self) -> Result<Vec<x509_cert::Certificate>> {
        self.certificate_chain_der()?
            .iter()
            .map(|der| {
                x509_cert::Certificate::from_der(der)
                    .map_err(|err| AcmeError::Protocol(format!("invalid certificate: {err}")))
            })
            .collect()
    }

    /// The expiry of the end entity certificate.
    pub fn not_after(&self) -> Result<OffsetDateTime> {
        let chain = self.certificate_chain()?;
        let leaf = chain
            .first()
            .ok_or_else(|| AcmeError::Protocol("empty certificate chain".to_owned()))?;

        let unix = leaf
            .tbs_certificate
            .validity
            .not_after
            .to_date_time()
            .unix_duration();
        OffsetDateTime::from_unix_timestamp(unix.as_secs() as i64)
            .map_err(|err| AcmeError::Protocol(format!("invalid notAfter: {err}")))
    }

    /// Counts the whole days the end entity certificate is still valid.
    /// Negative for an expired certificate.
    pub fn valid_days_left(&self) -> Result<i64> {
        Ok((self.not_after()? - OffsetDateTime::now_utc()).whole_days())
    }

    /// Writes the PEM chain to `writer`.
    pub fn write_certificate(&self, writer: &mut dyn Write) -> Result<()> {
        let pem = self.certificate_chain_pem()?;
        writer
            .write_all(pem.as_bytes())
            .map_err(|err| AcmeError::Protocol(format!("cannot write certificate: {err}")))
    }

    /// URLs of alternate chains (e.g. with a different root), from the
    /// `Link: rel="alternate"` headers of the download.
    pub fn alternate_urls(&self) -> Result<Vec<String>> {
        self.download()?;
        Ok(self.alternates.lock().clone())
    }

    /// Binds the alternate chains for download.
    pub fn alternates(&self) -> Result<Vec<Certificate>> {
        Ok(self
            .alternate_urls()?
            .into_iter()
            .map(|url| self.login.bind_certificate(url))
            .collect())
    }

    /// Revokes this certificate ([RFC 8555 §7.6]), authorized by the
    /// account that ordered it.
    ///
    /// [RFC 8555 §7.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.6
    pub fn revoke(&self, reason: Option<RevocationReason>) -> Result<()> {
        let leaf = self
            .certificate_chain_der()?
            .into_iter()
            .next()
            .ok_or_else(|| AcmeError::Protocol("empty certificate chain".to_owned()))?;

        let url = self.login.session().resource_url("revokeCert")?;
        let payload = revocation_payload(&leaf, reason);

        log::debug!("revoking {}", self.location);
        let mut conn = self.login.session().connect();
        conn.send_signed_request(&url, &payload, &self.login)
    }

    /// Revokes a certificate without an account, authorized by its own
    /// certificate key pair. `cert_der` is the DER encoded end entity
    /// certificate.
    pub fn revoke_with_key(
        session: &Session,
        certificate_key: &KeyPair,
        cert_der: &[u8],
        reason: Option<RevocationReason>,
    ) -> Result<()> {
        let url = session.resource_url("revokeCert")?;
        let payload = revocation_payload(cert_der, reason);

        let mut conn = Connection::new(session);
        conn.send_signed_request_with_key(&url, &payload, certificate_key)
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl Eq for Certificate {}

fn revocation_payload(cert_der: &[u8], reason: Option<RevocationReason>) -> JsonBuilder {
    let mut payload = JsonBuilder::new();
    payload.put_base64("certificate", cert_der);
    if let Some(code) = reason.and_then(RevocationReason::code) {
        payload.put("reason", code);
    }
    payload
}

/// Splits a PEM stream into DER certificates, preserving order. Extra
/// whitespace between the blocks is tolerated.
fn decode_pem_chain(pem: &str) -> Result<Vec<Vec<u8>>> {
    let mut reader = BufReader::new(Cursor::new(pem));
    rustls_pemfile::certs(&mut reader)
        .map(|result| result.map(|cert| cert.to_vec()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|err| AcmeError::Protocol(format!("invalid PEM certificate chain: {err}")))
}

/// Reasons for a certificate revocation.
///
/// The reason codes are taken from [RFC 5280 §5.3.1].
///
/// [RFC 5280 §5.3.1]: https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CaCompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    // value 7 is not used
    RemoveFromCrl = 8,
    PrivilegeWithdrawn = 9,
    AaCompromise = 10,
}

impl RevocationReason {
    /// The reason code for the revocation request.
    ///
    /// > the reason code CRL entry extension SHOULD be absent instead of
    /// > using the unspecified (0) reasonCode value
    ///
    /// so [`RevocationReason::Unspecified`] maps to no code at all.
    pub(crate) fn code(self) -> Option<usize> {
        match self {
            RevocationReason::Unspecified => None,
            reason => Some(reason as usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    fn certificate(responses: Vec<crate::http::HttpResponse>) -> (Certificate, test::ScriptedCalls) {
        let (login, transport) = test::login(responses);
        (
            login.bind_certificate("https://example.com/acme/cert/fae41c070f967713109028"),
            transport,
        )
    }

    #[test]
    fn download_is_lazy_and_cached() {
        let (certificate, transport) = certificate(vec![
            test::nonce_response("n-1"),
            test::pem_chain_response(test::CERT_CHAIN_PEM),
        ]);

        let pem = certificate.certificate_chain_pem().unwrap();
        assert!(pem.contains("BEGIN CERTIFICATE"));

        // cached, no further download
        certificate.certificate_chain_pem().unwrap();
        let posts = transport
            .requests()
            .iter()
            .filter(|r| r.method == "POST")
            .count();
        assert_eq!(posts, 1);
    }

    #[test]
    fn chain_decodes_in_order() {
        let (certificate, _transport) = certificate(vec![
            test::nonce_response("n-1"),
            test::pem_chain_response(test::CERT_CHAIN_PEM),
        ]);

        let chain = certificate.certificate_chain_der().unwrap();
        assert_eq!(chain.len(), 2);
        // leaf first: the fixture blocks decode to distinct markers
        assert_eq!(chain[0], b"leaf certificate");
        assert_eq!(chain[1], b"issuer certificate");
    }

    #[test]
    fn pem_splitting_tolerates_extra_whitespace() {
        let spaced = test::CERT_CHAIN_PEM.replace("-----\n-----", "-----\n\n\n   \n-----");
        let chain = decode_pem_chain(&spaced).unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn empty_chain_is_a_protocol_error() {
        let (certificate, _transport) = certificate(vec![
            test::nonce_response("n-1"),
            test::pem_chain_response("\n"),
        ]);

        let err = certificate.download().unwrap_err();
        assert!(err.to_string().contains("no certificates"));
    }

    #[test]
    fn alternate_links_are_collected() {
        let (certificate, _transport) = certificate(vec![
            test::nonce_response("n-1"),
            test::pem_chain_response(test::CERT_CHAIN_PEM)
                .with_header(
                    "Link",
                    "<https://example.com/acme/cert/1/alt1>;rel=\"alternate\"",
                )
                .with_header(
                    "Link",
                    "<https://example.com/acme/cert/1/alt2>;rel=\"alternate\"",
                ),
        ]);

        assert_eq!(
            certificate.alternate_urls().unwrap(),
            vec![
                "https://example.com/acme/cert/1/alt1",
                "https://example.com/acme/cert/1/alt2"
            ]
        );
        assert_eq!(certificate.alternates().unwrap().len(), 2);
    }

    #[test]
    fn revoke_posts_the_leaf_certificate() {
        let (certificate, transport) = certificate(vec![
            test::nonce_response("n-1"),
            test::pem_chain_response(test::CERT_CHAIN_PEM),
            test::nonce_response("n-2"),
            test::json_response(200, "{}"),
        ]);

        certificate
            .revoke(Some(RevocationReason::Superseded))
            .unwrap();

        let requests = transport.requests();
        let post = requests.last().unwrap();
        assert_eq!(post.url, "https://example.com/acme/revoke-cert");

        let payload = crate::json::Json::parse(&post.jose_payload().unwrap()).unwrap();
        assert_eq!(
            payload.get("certificate").as_string().unwrap(),
            crate::util::base64url(b"leaf certificate")
        );
        assert_eq!(payload.get("reason").as_int().unwrap(), 4);
    }

    #[test]
    fn unspecified_reason_is_omitted() {
        let payload = revocation_payload(b"cert", Some(RevocationReason::Unspecified));
        let json = payload.to_json();
        assert!(!json.contains_key("reason"));

        let payload = revocation_payload(b"cert", None);
        assert!(!payload.to_json().contains_key("reason"));
    }
}
