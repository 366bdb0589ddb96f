//! JOSE helpers: JWK mapping, RFC 7638 thumbprints, flattened JWS signing,
//! and the derived values used by the standard challenge types.
//!
//! See [RFC 8555 §6.2] for the request signing rules.
//!
//! [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2

use der::{asn1::ObjectIdentifier, asn1::OctetString, Encode as _};
use hmac::{Hmac, Mac as _};
use sha2::{Digest as _, Sha256};
use x509_cert::ext::Extension;

use crate::{
    crypto::KeyPair,
    error::{AcmeError, Result},
    json::{Json, JsonBuilder},
    util::base64url,
};

/// ALPN protocol name for tls-alpn-01 validation ([RFC 8737 §4]).
///
/// [RFC 8737 §4]: https://datatracker.ietf.org/doc/html/rfc8737#section-4
pub const ACME_TLS_ALPN_NAME: &str = "acme-tls/1";

/// OID of the `acmeValidation` certificate extension (`id-pe-acmeIdentifier`).
pub const ID_PE_ACME_IDENTIFIER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.1.31");

/// The public key of `key` as a JWK object.
///
/// Only the required members are emitted, in lexicographical order, so the
/// serialized form is also the RFC 7638 canonical form.
pub fn public_jwk(key: &KeyPair) -> Json {
    let mut jwk = JsonBuilder::new();
    match key {
        KeyPair::EcP256(key) => {
            let point = key.verifying_key().to_encoded_point(false);
            let x = point.x().expect("uncompressed point has x");
            let y = point.y().expect("uncompressed point has y");
            jwk.put("crv", "P-256")
                .put("kty", "EC")
                .put("x", base64url(x))
                .put("y", base64url(y));
        }
        KeyPair::Rsa(key) => {
            use rsa::traits::PublicKeyParts as _;
            jwk.put("e", base64url(&key.e().to_bytes_be()))
                .put("kty", "RSA")
                .put("n", base64url(&key.n().to_bytes_be()));
        }
        KeyPair::Ed25519(key) => {
            jwk.put("crv", "Ed25519")
                .put("kty", "OKP")
                .put("x", base64url(&key.verifying_key().to_bytes()));
        }
    }
    jwk.to_json()
}

/// SHA-256 thumbprint of the public key, per [RFC 7638].
///
/// [RFC 7638]: https://datatracker.ietf.org/doc/html/rfc7638
pub fn thumbprint(key: &KeyPair) -> [u8; 32] {
    Sha256::digest(public_jwk(key).to_string()).into()
}

/// Key authorization for a challenge token ([RFC 8555 §8.1]).
///
/// [RFC 8555 §8.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.1
pub fn key_authorization(token: &str, key: &KeyPair) -> String {
    format!("{token}.{}", base64url(&thumbprint(key)))
}

/// The TXT record digest of a key authorization, as placed in DNS for the
/// dns-01 challenge family ([RFC 8555 §8.4]).
///
/// [RFC 8555 §8.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.4
pub fn dns_txt_digest(key_authorization: &str) -> String {
    base64url(&Sha256::digest(key_authorization))
}

/// The `acmeValidation` extension for a tls-alpn-01 validation certificate
/// ([RFC 8737 §3]): the SHA-256 digest of the key authorization, wrapped in
/// a DER OCTET STRING, marked critical.
///
/// [RFC 8737 §3]: https://datatracker.ietf.org/doc/html/rfc8737#section-3
pub fn acme_validation_extension(key_authorization: &str) -> Result<Extension> {
    let digest: [u8; 32] = Sha256::digest(key_authorization).into();
    let inner = OctetString::new(digest.to_vec())
        .and_then(|octets| octets.to_der())
        .map_err(|err| AcmeError::Crypto(format!("cannot encode acmeValidation: {err}")))?;
    let extn_value = OctetString::new(inner)
        .map_err(|err| AcmeError::Crypto(format!("cannot encode acmeValidation: {err}")))?;

    Ok(Extension {
        extn_id: ID_PE_ACME_IDENTIFIER,
        critical: true,
        extn_value,
    })
}

/// Builds a signed request in JWS flattened JSON serialization.
///
/// The protected header carries `alg`, the request `url`, the `nonce` (when
/// one is used), and exactly one of `kid` or the full public `jwk`. An empty
/// payload produces a POST-as-GET request.
pub(crate) fn sign_request(
    url: &str,
    nonce: Option<&str>,
    payload: Option<&str>,
    key: &KeyPair,
    kid: Option<&str>,
) -> Result<String> {
    let mut header = JsonBuilder::new();
    header.put("alg", key.alg());
    match kid {
        Some(kid) => header.put("kid", kid),
        None => header.put_json("jwk", &public_jwk(key)),
    };
    if let Some(nonce) = nonce {
        header.put("nonce", nonce);
    }
    header.put("url", url);

    let protected = base64url(&header.to_string());
    let payload = payload.map(base64url).unwrap_or_default();
    let signature = key.sign(format!("{protected}.{payload}").as_bytes())?;

    let mut jws = JsonBuilder::new();
    jws.put("protected", protected)
        .put("payload", payload)
        .put_base64("signature", signature);
    Ok(jws.to_string())
}

/// Builds the `externalAccountBinding` object of a newAccount request
/// ([RFC 8555 §7.3.4]): the account's public JWK, signed with the HMAC key
/// handed out by the CA.
///
/// [RFC 8555 §7.3.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.4
pub(crate) fn external_account_binding(
    key_identifier: &str,
    mac_key: &[u8],
    account_key: &KeyPair,
    url: &str,
) -> Result<Json> {
    let mut header = JsonBuilder::new();
    header
        .put("alg", "HS256")
        .put("kid", key_identifier)
        .put("url", url);

    let protected = base64url(&header.to_string());
    let payload = base64url(&public_jwk(account_key).to_string());

    let mut mac = Hmac::<Sha256>::new_from_slice(mac_key)
        .map_err(|err| AcmeError::Crypto(format!("invalid HMAC key: {err}")))?;
    mac.update(format!("{protected}.{payload}").as_bytes());
    let signature = mac.finalize().into_bytes();

    let mut jws = JsonBuilder::new();
    jws.put("protected", protected)
        .put("payload", payload)
        .put_base64("signature", signature);
    Ok(jws.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test, util::base64url_decode};

    fn ec_key() -> KeyPair {
        KeyPair::from_pkcs8_pem(test::EC_KEY_PEM).unwrap()
    }

    #[test]
    fn ec_jwk_is_canonical() {
        let jwk = public_jwk(&ec_key());
        assert_eq!(
            jwk.to_string(),
            concat!(
                "{\"crv\":\"P-256\",\"kty\":\"EC\",",
                "\"x\":\"RlJFhBRik7RSaQyZssQhGfgLgcFKsV5JxyWrrjX7cwQ\",",
                "\"y\":\"0bmTrcG3hvq7mOK2SDGoaRRhjvhZAhfu_srPfESuSwo\"}"
            )
        );
    }

    #[test]
    fn ed25519_jwk_is_canonical() {
        let key = KeyPair::from_pkcs8_pem(test::ED25519_KEY_PEM).unwrap();
        assert_eq!(
            public_jwk(&key).to_string(),
            "{\"crv\":\"Ed25519\",\"kty\":\"OKP\",\"x\":\"4_Wz1YFi-8W8vwNlQfedl-gXGCHGxFjizSGkquck7q0\"}"
        );
        assert_eq!(
            base64url(&thumbprint(&key)),
            "yMEInMG5zkQBSnBzaidpt6iO2L7_A5goK7qU4WgZSlk"
        );
    }

    #[test]
    fn ec_thumbprint_matches_vector() {
        assert_eq!(
            base64url(&thumbprint(&ec_key())),
            "mBnSG6Fz3K73ysAu4MA28cyaHhhS37Xow9ViM1O8sRQ"
        );
    }

    #[test]
    fn key_authorization_concatenates_token_and_thumbprint() {
        let key_auth = key_authorization("evaGxfADs6pSRb2LAv9IZf17Dt3juxGJyPCt92wr-oA", &ec_key());
        assert_eq!(
            key_auth,
            "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJyPCt92wr-oA.mBnSG6Fz3K73ysAu4MA28cyaHhhS37Xow9ViM1O8sRQ"
        );
    }

    #[test]
    fn dns_digest_matches_vector() {
        let key_auth =
            "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJyPCt92wr-oA.mBnSG6Fz3K73ysAu4MA28cyaHhhS37Xow9ViM1O8sRQ";
        assert_eq!(
            dns_txt_digest(key_auth),
            "WG3gRQAvmmBUM2Lx53X1_lSeb-hGL0iYNB96lLN0sEU"
        );
    }

    #[test]
    fn acme_validation_extension_wraps_the_digest() {
        let key_auth = "token.thumbprint";
        let extension = acme_validation_extension(key_auth).unwrap();

        assert_eq!(extension.extn_id, ID_PE_ACME_IDENTIFIER);
        assert!(extension.critical);

        // extnValue is a DER OCTET STRING (tag 0x04, length 0x20) wrapping
        // the SHA-256 of the key authorization
        let value = extension.extn_value.as_bytes();
        assert_eq!(value.len(), 34);
        assert_eq!(&value[..2], &[0x04, 0x20]);
        assert_eq!(&value[2..], Sha256::digest(key_auth).as_slice());
    }

    #[test]
    fn signed_request_parses_back() {
        let key = ec_key();
        let url = "https://example.com/acme/new-order";
        let jws = sign_request(url, Some("zXQ6xQ"), Some(r#"{"foo":"bar"}"#), &key, None).unwrap();

        let jws = Json::parse(&jws).unwrap();
        let protected = base64url_decode(&jws.get("protected").as_string().unwrap()).unwrap();
        let header = Json::parse_bytes(&protected).unwrap();

        assert_eq!(header.get("alg").as_string().unwrap(), "ES256");
        assert_eq!(header.get("nonce").as_string().unwrap(), "zXQ6xQ");
        assert_eq!(header.get("url").as_string().unwrap(), url);
        assert!(header.contains_key("jwk"));
        assert!(!header.contains_key("kid"));
        assert_eq!(
            header.get("jwk").as_object().unwrap(),
            public_jwk(&key)
        );

        let payload = base64url_decode(&jws.get("payload").as_string().unwrap()).unwrap();
        assert_eq!(payload, br#"{"foo":"bar"}"#);

        let signature = base64url_decode(&jws.get("signature").as_string().unwrap()).unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn post_as_get_has_empty_payload() {
        let jws = sign_request(
            "https://example.com/acme/order/1",
            Some("nonce"),
            None,
            &ec_key(),
            Some("https://example.com/acme/acct/1"),
        )
        .unwrap();

        let jws = Json::parse(&jws).unwrap();
        assert_eq!(jws.get("payload").as_string().unwrap(), "");

        let protected = base64url_decode(&jws.get("protected").as_string().unwrap()).unwrap();
        let header = Json::parse_bytes(&protected).unwrap();
        assert_eq!(
            header.get("kid").as_string().unwrap(),
            "https://example.com/acme/acct/1"
        );
        assert!(!header.contains_key("jwk"));
    }

    #[test]
    fn external_account_binding_is_hmac_signed() {
        let key = ec_key();
        let binding = external_account_binding(
            "kid-1",
            b"secret-mac-key",
            &key,
            "https://example.com/acme/new-acct",
        )
        .unwrap();

        let protected = base64url_decode(&binding.get("protected").as_string().unwrap()).unwrap();
        let header = Json::parse_bytes(&protected).unwrap();
        assert_eq!(header.get("alg").as_string().unwrap(), "HS256");
        assert_eq!(header.get("kid").as_string().unwrap(), "kid-1");

        let payload = base64url_decode(&binding.get("payload").as_string().unwrap()).unwrap();
        assert_eq!(Json::parse_bytes(&payload).unwrap(), public_jwk(&key));

        // HMAC-SHA256 output
        let signature = base64url_decode(&binding.get("signature").as_string().unwrap()).unwrap();
        assert_eq!(signature.len(), 32);
    }
}
