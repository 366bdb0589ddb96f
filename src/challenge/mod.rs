//! Challenge resources.
//!
//! The server offers one or more challenges per authorization. Which kinds a
//! client can solve depends on its environment, so challenges are dispatched
//! at runtime: a registry maps the challenge type string to a constructor,
//! and [`Challenge`] tags the constructed resource with its concrete
//! variant. Types the registry does not know come back as
//! [`GenericChallenge`], with the raw JSON still accessible.

use std::{collections::HashMap, time::Duration};

use time::OffsetDateTime;

use crate::{
    crypto::jose,
    error::{AcmeError, Result},
    json::{Json, JsonBuilder},
    login::Login,
    problem::Problem,
    resource::{self, ResourceState},
    session::ChallengeFactory,
    status::Status,
};

mod dns01;
mod dns_account01;
mod dns_persist01;
mod email_reply00;
mod http01;
mod tls_alpn01;

pub use self::{
    dns01::Dns01Challenge,
    dns_account01::DnsAccount01Challenge,
    dns_persist01::{DnsPersist01Challenge, RdataBuilder},
    email_reply00::EmailReply00Challenge,
    http01::Http01Challenge,
    tls_alpn01::TlsAlpn01Challenge,
};

const RESOURCE: &str = "Challenge";

/// The challenge registry used by new sessions.
pub(crate) fn default_registry() -> HashMap<String, ChallengeFactory> {
    let mut registry: HashMap<String, ChallengeFactory> = HashMap::new();
    registry.insert(Http01Challenge::TYPE.to_owned(), |login, data| {
        Ok(Challenge::Http01(Http01Challenge::new(login, data)?))
    });
    registry.insert(Dns01Challenge::TYPE.to_owned(), |login, data| {
        Ok(Challenge::Dns01(Dns01Challenge::new(login, data)?))
    });
    registry.insert(DnsAccount01Challenge::TYPE.to_owned(), |login, data| {
        Ok(Challenge::DnsAccount01(DnsAccount01Challenge::new(
            login, data,
        )?))
    });
    registry.insert(DnsPersist01Challenge::TYPE.to_owned(), |login, data| {
        Ok(Challenge::DnsPersist01(DnsPersist01Challenge::new(
            login, data,
        )?))
    });
    registry.insert(TlsAlpn01Challenge::TYPE.to_owned(), |login, data| {
        Ok(Challenge::TlsAlpn01(TlsAlpn01Challenge::new(login, data)?))
    });
    registry.insert(EmailReply00Challenge::TYPE.to_owned(), |login, data| {
        Ok(Challenge::EmailReply00(EmailReply00Challenge::new(
            login, data,
        )?))
    });
    registry
}

/// Constructs a [`GenericChallenge`] for an unregistered type.
pub(crate) fn generic(login: Login, data: Json) -> Result<Challenge> {
    Ok(Challenge::Generic(GenericChallenge::new(login, data)?))
}

/// A challenge offered by the server, tagged with its concrete type.
pub enum Challenge {
    Http01(Http01Challenge),
    Dns01(Dns01Challenge),
    DnsAccount01(DnsAccount01Challenge),
    DnsPersist01(DnsPersist01Challenge),
    TlsAlpn01(TlsAlpn01Challenge),
    EmailReply00(EmailReply00Challenge),
    /// A challenge type this library has no special support for.
    Generic(GenericChallenge),
}

impl Challenge {
    fn inner(&self) -> &ChallengeState {
        match self {
            Challenge::Http01(c) => &c.inner,
            Challenge::Dns01(c) => &c.inner,
            Challenge::DnsAccount01(c) => &c.inner,
            Challenge::DnsPersist01(c) => &c.inner,
            Challenge::TlsAlpn01(c) => &c.inner,
            Challenge::EmailReply00(c) => &c.inner,
            Challenge::Generic(c) => &c.inner,
        }
    }

    /// The challenge type string, e.g. `"http-01"`.
    pub fn challenge_type(&self) -> Result<String> {
        self.inner().challenge_type()
    }

    /// The challenge URL.
    pub fn location(&self) -> &str {
        self.inner().state.location()
    }

    /// The current challenge status. One of pending, processing, valid or
    /// invalid.
    pub fn status(&self) -> Result<Status> {
        self.inner().status()
    }

    /// The instant the server validated this challenge, if it did.
    pub fn validated(&self) -> Result<Option<OffsetDateTime>> {
        self.inner().validated()
    }

    /// The reason why the challenge failed, if it did.
    pub fn error(&self) -> Result<Option<Problem>> {
        self.inner().error()
    }

    /// The raw challenge document.
    pub fn json(&self) -> Result<Json> {
        self.inner().json()
    }

    /// Tells the server that the challenge response is in place and
    /// validation can start.
    ///
    /// Whatever the challenge requires on your side (a DNS record, a file on
    /// the web server, a validation certificate) must be reachable from the
    /// public internet before this call, and must stay up until the
    /// challenge reaches a terminal status.
    pub fn trigger(&self) -> Result<()> {
        let payload = match self {
            Challenge::EmailReply00(c) => c.response_payload()?,
            // all other standard types respond with an empty object
            _ => JsonBuilder::new(),
        };
        self.inner().trigger(payload)
    }

    /// Polls until the challenge is valid or invalid.
    pub fn wait_for_completion(&self, timeout: Duration) -> Result<Status> {
        resource::wait_for_status(
            &self.inner().state,
            RESOURCE,
            &[Status::Valid, Status::Invalid],
            timeout,
        )
    }

    /// Fetches the current challenge state from the server, returning the
    /// `Retry-After` estimation if the server sent one.
    pub fn fetch(&self) -> Result<Option<OffsetDateTime>> {
        self.inner().fetch()
    }

    /// Like [`Challenge::fetch()`], but fails with [`AcmeError::RetryAfter`]
    /// when the server signalled that validation is still in progress.
    pub fn update(&self) -> Result<()> {
        match self.inner().fetch()? {
            None => Ok(()),
            Some(retry_after) => Err(AcmeError::RetryAfter {
                status: self.status()?,
                retry_after: Some(retry_after),
            }),
        }
    }

    pub fn as_http01(&self) -> Option<&Http01Challenge> {
        match self {
            Challenge::Http01(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_dns01(&self) -> Option<&Dns01Challenge> {
        match self {
            Challenge::Dns01(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_dns_account01(&self) -> Option<&DnsAccount01Challenge> {
        match self {
            Challenge::DnsAccount01(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_dns_persist01(&self) -> Option<&DnsPersist01Challenge> {
        match self {
            Challenge::DnsPersist01(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_tls_alpn01(&self) -> Option<&TlsAlpn01Challenge> {
        match self {
            Challenge::TlsAlpn01(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_email_reply00(&self) -> Option<&EmailReply00Challenge> {
        match self {
            Challenge::EmailReply00(c) => Some(c),
            _ => None,
        }
    }
}

impl PartialEq for Challenge {
    fn eq(&self, other: &Self) -> bool {
        self.location() == other.location()
    }
}

impl Eq for Challenge {}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Challenge")
            .field("location", &self.location())
            .finish_non_exhaustive()
    }
}

/// A challenge type without dedicated support. Exposes the generic
/// accessors through [`Challenge`]; proprietary fields can be read from
/// [`Challenge::json()`].
pub struct GenericChallenge {
    inner: ChallengeState,
}

impl GenericChallenge {
    pub(crate) fn new(login: Login, data: Json) -> Result<GenericChallenge> {
        Ok(GenericChallenge {
            inner: ChallengeState::new(login, data, None)?,
        })
    }
}

/// Shared state of all challenge variants.
pub(crate) struct ChallengeState {
    state: ResourceState,
    expected_type: Option<&'static str>,
}

impl ChallengeState {
    /// Validates the challenge document and binds the resource to the
    /// challenge URL. A concrete variant only accepts its own type.
    pub(crate) fn new(
        login: Login,
        data: Json,
        expected_type: Option<&'static str>,
    ) -> Result<ChallengeState> {
        let challenge_type = data.get("type").as_string()?;
        if let Some(expected) = expected_type {
            if challenge_type != expected {
                return Err(AcmeError::Protocol(format!(
                    "incompatible type {challenge_type} for this challenge"
                )));
            }
        } else if challenge_type.trim().is_empty() {
            return Err(AcmeError::Protocol("challenge without type".to_owned()));
        }

        let location = data.get("url").as_url()?;
        Ok(ChallengeState {
            state: ResourceState::of(login, location, data),
            expected_type,
        })
    }

    pub(crate) fn login(&self) -> &Login {
        self.state.login()
    }

    pub(crate) fn json(&self) -> Result<Json> {
        self.state.json(RESOURCE)
    }

    pub(crate) fn challenge_type(&self) -> Result<String> {
        self.json()?.get("type").as_string()
    }

    pub(crate) fn status(&self) -> Result<Status> {
        self.json()?.get("status").as_status()
    }

    pub(crate) fn validated(&self) -> Result<Option<OffsetDateTime>> {
        self.json()?.get("validated").map(|v| v.as_instant())
    }

    pub(crate) fn error(&self) -> Result<Option<Problem>> {
        self.json()?
            .get("error")
            .map(|v| v.as_problem(self.state.location()))
    }

    /// The challenge token. Present in all token based challenge types.
    pub(crate) fn token(&self) -> Result<String> {
        self.json()?.get("token").as_string()
    }

    /// The key authorization of the challenge token.
    pub(crate) fn key_authorization(&self) -> Result<String> {
        Ok(jose::key_authorization(
            &self.token()?,
            self.login().key_pair(),
        ))
    }

    fn trigger(&self, payload: JsonBuilder) -> Result<()> {
        log::debug!("triggering {}", self.state.location());
        let login = self.state.login().clone();
        let mut conn = login.session().connect();
        conn.send_signed_request(self.state.location(), &payload, &login)?;
        self.state.set_json(conn.read_json_response()?);
        self.validate()
    }

    fn fetch(&self) -> Result<Option<OffsetDateTime>> {
        let retry_after = self.state.fetch()?;
        self.validate()?;
        Ok(retry_after)
    }

    /// The server must neither move the challenge nor change its type.
    fn validate(&self) -> Result<()> {
        let json = self.json()?;
        let challenge_type = json.get("type").as_string()?;
        if let Some(expected) = self.expected_type {
            if challenge_type != expected {
                return Err(AcmeError::Protocol(format!(
                    "incompatible type {challenge_type} for this challenge"
                )));
            }
        }
        let url = json.get("url").as_url()?;
        if url != self.state.location() {
            return Err(AcmeError::Protocol(
                "challenge has changed its location".to_owned(),
            ));
        }
        Ok(())
    }
}
