use serde::{Deserialize, Serialize};

use crate::error::{AcmeError, Result};

/// An identifier to be validated, usually a domain name.
///
/// See [RFC 8555 §7.1.3].
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub(crate) _type: String,
    pub(crate) value: String,
}

impl Identifier {
    /// Type constant for DNS identifiers.
    pub const TYPE_DNS: &'static str = "dns";

    /// Type constant for IP address identifiers ([RFC 8738]).
    ///
    /// [RFC 8738]: https://datatracker.ietf.org/doc/html/rfc8738
    pub const TYPE_IP: &'static str = "ip";

    /// Creates a DNS identifier.
    ///
    /// The domain is kept verbatim. Unicode domains are converted to their
    /// ASCII compatible encoding when the identifier is sent to the server.
    pub fn dns(domain: impl Into<String>) -> Self {
        Identifier {
            _type: Self::TYPE_DNS.to_owned(),
            value: domain.into(),
        }
    }

    /// Creates an IP address identifier.
    pub fn ip(address: impl Into<String>) -> Self {
        Identifier {
            _type: Self::TYPE_IP.to_owned(),
            value: address.into(),
        }
    }

    /// Creates an identifier with an arbitrary type.
    pub fn new(_type: impl Into<String>, value: impl Into<String>) -> Self {
        Identifier {
            _type: _type.into(),
            value: value.into(),
        }
    }

    /// The identifier type, e.g. `"dns"`.
    pub fn identifier_type(&self) -> &str {
        &self._type
    }

    /// The identifier value as given.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_type_dns(&self) -> bool {
        self._type == Self::TYPE_DNS
    }

    /// The domain name of a DNS identifier, in ASCII compatible encoding.
    ///
    /// Fails with a protocol error if this is not a DNS identifier.
    pub fn domain(&self) -> Result<String> {
        if !self.is_type_dns() {
            return Err(AcmeError::Protocol(format!(
                "not a dns identifier: {}",
                self._type
            )));
        }
        to_ace(&self.value)
    }

    /// The identifier as it is sent over the wire, with DNS values
    /// normalized to ASCII compatible encoding.
    pub(crate) fn to_wire(&self) -> Result<Identifier> {
        if self.is_type_dns() {
            Ok(Identifier {
                _type: self._type.clone(),
                value: to_ace(&self.value)?,
            })
        } else {
            Ok(self.clone())
        }
    }
}

/// Converts a domain name to its ASCII compatible encoding (ACE, see
/// [RFC 3492]). ASCII domains are only lowercased.
///
/// [RFC 3492]: https://datatracker.ietf.org/doc/html/rfc3492
pub fn to_ace(domain: &str) -> Result<String> {
    let domain = domain.trim();
    idna::domain_to_ascii(domain)
        .map_err(|_| AcmeError::Protocol(format!("invalid domain name: {domain}")))
}
