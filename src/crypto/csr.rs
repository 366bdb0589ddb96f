use der::{asn1::Ia5String, asn1::OctetString, Encode as _};
use x509_cert::{
    builder::{Builder as _, RequestBuilder},
    ext::pkix::{name::GeneralName, SubjectAltName},
    name::Name,
};

use crate::{
    crypto::KeyPair,
    error::{AcmeError, Result},
    identifier::Identifier,
};

/// Creates a PKCS#10 CSR for the given identifiers, signed with the
/// certificate key pair, and returns its DER encoding.
///
/// The first identifier becomes the Common Name, all identifiers are listed
/// in a Subject Alternative Name extension. DNS names are converted to their
/// ASCII compatible encoding.
pub(crate) fn create_csr(key: &KeyPair, identifiers: &[Identifier]) -> Result<Vec<u8>> {
    let primary = identifiers
        .first()
        .ok_or_else(|| AcmeError::Crypto("CSR needs at least one identifier".to_owned()))?;

    let common_name = wire_value(primary)?;
    let subject = format!("CN={common_name}")
        .parse::<Name>()
        .map_err(|err| AcmeError::Crypto(format!("invalid subject: {err}")))?;

    let san = SubjectAltName(
        identifiers
            .iter()
            .map(general_name)
            .collect::<Result<Vec<_>>>()?,
    );

    match key {
        KeyPair::EcP256(signer) => {
            let mut csr = RequestBuilder::new(subject, signer)
                .map_err(|err| AcmeError::Crypto(format!("cannot build CSR: {err}")))?;
            csr.add_extension(&san)
                .map_err(|err| AcmeError::Crypto(format!("cannot add SAN: {err}")))?;
            let csr = csr
                .build::<p256::ecdsa::DerSignature>()
                .map_err(|err| AcmeError::Crypto(format!("cannot sign CSR: {err}")))?;
            csr.to_der()
                .map_err(|err| AcmeError::Crypto(format!("cannot encode CSR: {err}")))
        }
        KeyPair::Rsa(signer) => {
            let signer = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new((**signer).clone());
            let mut csr = RequestBuilder::new(subject, &signer)
                .map_err(|err| AcmeError::Crypto(format!("cannot build CSR: {err}")))?;
            csr.add_extension(&san)
                .map_err(|err| AcmeError::Crypto(format!("cannot add SAN: {err}")))?;
            let csr = csr
                .build::<rsa::pkcs1v15::Signature>()
                .map_err(|err| AcmeError::Crypto(format!("cannot sign CSR: {err}")))?;
            csr.to_der()
                .map_err(|err| AcmeError::Crypto(format!("cannot encode CSR: {err}")))
        }
        KeyPair::Ed25519(_) => Err(AcmeError::NotSupported(
            "Ed25519 certificate keys".to_owned(),
        )),
    }
}

fn wire_value(identifier: &Identifier) -> Result<String> {
    if identifier.is_type_dns() {
        identifier.domain()
    } else {
        Ok(identifier.value().to_owned())
    }
}

fn general_name(identifier: &Identifier) -> Result<GeneralName> {
    if identifier.is_type_dns() {
        let ace = identifier.domain()?;
        let name = Ia5String::new(&ace)
            .map_err(|err| AcmeError::Crypto(format!("invalid SAN {ace:?}: {err}")))?;
        Ok(GeneralName::DnsName(name))
    } else {
        let address: std::net::IpAddr = identifier.value().parse().map_err(|_| {
            AcmeError::Crypto(format!("invalid IP identifier: {}", identifier.value()))
        })?;
        let octets = match address {
            std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
            std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        let octets = OctetString::new(octets)
            .map_err(|err| AcmeError::Crypto(format!("invalid IP identifier: {err}")))?;
        Ok(GeneralName::IpAddress(octets))
    }
}
