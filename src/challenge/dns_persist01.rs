use time::OffsetDateTime;

use crate::{
    challenge::ChallengeState,
    error::{AcmeError, Result},
    identifier::{to_ace, Identifier},
    json::Json,
    login::Login,
};

// limits imposed by the draft
const ISSUER_SIZE_LIMIT: usize = 10;
const DOMAIN_LENGTH_LIMIT: usize = 253;

/// The `dns-persist-01` challenge ([draft-ietf-acme-dns-persist]).
///
/// Instead of a per-order digest, a long-lived TXT record authorizes a CA
/// to issue for the domain:
///
/// ```text
/// _validation-persist.<domain>.  TXT  <rdata>
/// ```
///
/// The RDATA names one of the CA's issuer domains and the account URL, and
/// optionally a wildcard policy and an expiry. Use [`build_rdata()`] to
/// assemble it.
///
/// This challenge is based on an RFC draft. It may change or be removed
/// without notice, SemVer rules do not apply here.
///
/// [`build_rdata()`]: Self::build_rdata
/// [draft-ietf-acme-dns-persist]: https://datatracker.ietf.org/doc/draft-ietf-acme-dns-persist/
pub struct DnsPersist01Challenge {
    pub(super) inner: ChallengeState,
}

impl DnsPersist01Challenge {
    /// Challenge type name: `dns-persist-01`
    pub const TYPE: &'static str = "dns-persist-01";

    /// Label of the TXT record.
    pub const RECORD_NAME_PREFIX: &'static str = "_validation-persist";

    pub(crate) fn new(login: Login, data: Json) -> Result<DnsPersist01Challenge> {
        Ok(DnsPersist01Challenge {
            inner: ChallengeState::new(login, data, Some(Self::TYPE))?,
        })
    }

    /// The issuer domain names offered by the CA. Guaranteed to contain 1
    /// to 10 entries of at most 253 characters; anything else is rejected
    /// as mandated by the draft.
    pub fn issuer_domain_names(&self) -> Result<Vec<String>> {
        let json = self.inner.json()?;
        let names = json
            .get("issuer-domain-names")
            .as_array()?
            .iter()
            .map(|v| v.as_string())
            .collect::<Result<Vec<_>>>()?;

        if names.is_empty() {
            return Err(AcmeError::Protocol(
                "issuer-domain-names missing or empty".to_owned(),
            ));
        }
        if names.len() > ISSUER_SIZE_LIMIT {
            return Err(AcmeError::Protocol(format!(
                "issuer-domain-names size limit exceeded: {} > {ISSUER_SIZE_LIMIT}",
                names.len()
            )));
        }
        if names.iter().any(|name| name.len() > DOMAIN_LENGTH_LIMIT) {
            return Err(AcmeError::Protocol(
                "issuer-domain-names content too long".to_owned(),
            ));
        }

        Ok(names)
    }

    /// The resource record name for a domain identifier, with a trailing
    /// full stop, e.g. `_validation-persist.www.example.org.`.
    pub fn to_rr_name(identifier: &Identifier) -> Result<String> {
        Ok(format!(
            "{}.{}.",
            Self::RECORD_NAME_PREFIX,
            identifier.domain()?
        ))
    }

    /// Like [`DnsPersist01Challenge::to_rr_name()`], for a plain domain
    /// name.
    pub fn domain_rr_name(domain: &str) -> Result<String> {
        Ok(format!("{}.{}.", Self::RECORD_NAME_PREFIX, to_ace(domain)?))
    }

    /// A builder for the RDATA value of the TXT record.
    pub fn build_rdata(&self) -> Result<RdataBuilder> {
        let issuer_domain_names = self.issuer_domain_names()?;
        Ok(RdataBuilder {
            account_url: self.inner.login().account_location().to_owned(),
            issuer: issuer_domain_names[0].clone(),
            issuer_domain_names,
            wildcard: false,
            quotes: true,
            persist_until: None,
        })
    }

    /// Convenience call for a standard RDATA without optional tags.
    pub fn rdata(&self) -> Result<String> {
        Ok(self.build_rdata()?.build())
    }
}

/// Builder for the RDATA of the `dns-persist-01` TXT record.
///
/// Unless overridden, the first offered issuer domain name is used, no
/// wildcard policy and no persistence limit are added, and the output is
/// split into quote-enclosed strings.
#[derive(Debug)]
pub struct RdataBuilder {
    account_url: String,
    issuer_domain_names: Vec<String>,
    issuer: String,
    wildcard: bool,
    quotes: bool,
    persist_until: Option<OffsetDateTime>,
}

impl RdataBuilder {
    /// Selects a different issuer domain name. It must be one of
    /// [`DnsPersist01Challenge::issuer_domain_names()`].
    pub fn issuer_domain_name(mut self, issuer: &str) -> Result<RdataBuilder> {
        if !self.issuer_domain_names.iter().any(|name| name == issuer) {
            return Err(AcmeError::Protocol(format!(
                "domain {issuer} is not in the list of issuer-domain-names"
            )));
        }
        self.issuer = issuer.to_owned();
        Ok(self)
    }

    /// Requests wildcard validation.
    pub fn wildcard(mut self) -> RdataBuilder {
        self.wildcard = true;
        self
    }

    /// Limits how long the CA may use this record.
    pub fn persist_until(mut self, instant: OffsetDateTime) -> RdataBuilder {
        self.persist_until = Some(instant);
        self
    }

    /// Emits a single unquoted string. Proper splitting of the resulting
    /// RDATA must then be done externally.
    pub fn no_quotes(mut self) -> RdataBuilder {
        self.quotes = false;
        self
    }

    /// Builds the RDATA string for the DNS TXT record.
    pub fn build(self) -> String {
        let mut parts = vec![
            self.issuer,
            format!("accounturi={}", self.account_url),
        ];
        if self.wildcard {
            parts.push("policy=wildcard".to_owned());
        }
        if let Some(until) = self.persist_until {
            parts.push(format!("persistUntil={}", until.unix_timestamp()));
        }

        if self.quotes {
            // parts are not expected to contain quotes, so no escaping here
            format!("\"{}\"", parts.join(";\" \" "))
        } else {
            parts.join("; ")
        }
    }
}
