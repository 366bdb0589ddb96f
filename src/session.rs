//! The session against a single ACME provider: directory cache, nonce pool,
//! network settings, and the challenge type registry.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::{
    challenge::{self, Challenge},
    connection::Connection,
    error::{AcmeError, Result},
    http::{HttpTransport, UreqTransport},
    json::Json,
    login::Login,
};

const LETS_ENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETS_ENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Constructs a [`Challenge`] of a registered type from its JSON document.
pub type ChallengeFactory = fn(Login, Json) -> Result<Challenge>;

/// Enumeration of known ACME API directories.
#[derive(Debug, Clone)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt directory.
    ///
    /// Not appropriate for testing / development.
    LetsEncrypt,

    /// The staging Let's Encrypt directory.
    ///
    /// Use for testing and development. Doesn't issue "valid" certificates.
    /// The root signing certificate is not supposed to be in any trust
    /// chains.
    LetsEncryptStaging,

    /// Provide an arbitrary directory URL to connect to.
    Other(&'a str),
}

impl DirectoryUrl<'_> {
    fn to_url(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETS_ENCRYPT_URL,
            DirectoryUrl::LetsEncryptStaging => LETS_ENCRYPT_STAGING_URL,
            DirectoryUrl::Other(url) => url,
        }
    }
}

/// Network behavior of a [`Session`].
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,

    /// Minimum delay between two polls of a pending resource. Also the
    /// fallback when the server sends no `Retry-After` estimation.
    pub poll_interval: Duration,

    /// Value of the `Accept-Language` header, e.g. `"de, en;q=0.8"`.
    /// Problem documents use this language where the CA supports it.
    pub accept_language: Option<String>,

    pub user_agent: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(3),
            accept_language: None,
            user_agent: concat!("acme-kit/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// A session with an ACME provider.
///
/// The session caches the provider's directory after the first use and
/// keeps the replay nonce between requests. It is cheap to clone; clones
/// share the cache and the nonce pool.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    directory_url: String,
    settings: NetworkSettings,
    transport: Arc<dyn HttpTransport>,
    directory: Mutex<Option<Json>>,
    nonce: Mutex<Option<String>>,
    challenges: Mutex<HashMap<String, ChallengeFactory>>,
}

impl Session {
    /// Creates a session with default [`NetworkSettings`].
    pub fn new(url: DirectoryUrl<'_>) -> Session {
        Session::with_settings(url, NetworkSettings::default())
    }

    pub fn with_settings(url: DirectoryUrl<'_>, settings: NetworkSettings) -> Session {
        let transport = Arc::new(UreqTransport::new(&settings));
        Session::with_transport(url, transport, settings)
    }

    /// Creates a session using a custom [`HttpTransport`].
    pub fn with_transport(
        url: DirectoryUrl<'_>,
        transport: Arc<dyn HttpTransport>,
        settings: NetworkSettings,
    ) -> Session {
        Session {
            inner: Arc::new(SessionInner {
                directory_url: url.to_url().to_owned(),
                settings,
                transport,
                directory: Mutex::new(None),
                nonce: Mutex::new(None),
                challenges: Mutex::new(challenge::default_registry()),
            }),
        }
    }

    pub fn directory_url(&self) -> &str {
        &self.inner.directory_url
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.inner.settings
    }

    pub(crate) fn transport(&self) -> &dyn HttpTransport {
        &*self.inner.transport
    }

    pub(crate) fn connect(&self) -> Connection {
        Connection::new(self)
    }

    /// The provider's directory document. Fetched once, then served from
    /// the cache.
    pub fn directory(&self) -> Result<Json> {
        let mut cache = self.inner.directory.lock();
        if let Some(directory) = &*cache {
            return Ok(directory.clone());
        }

        log::debug!("fetching directory from {}", self.inner.directory_url);
        let mut conn = self.connect();
        conn.get(&self.inner.directory_url)?;
        let directory = conn.read_json_response()?;

        *cache = Some(directory.clone());
        Ok(directory)
    }

    /// Drops the cached directory, forcing a refetch on next use.
    pub fn reset_directory(&self) {
        *self.inner.directory.lock() = None;
    }

    /// The URL of a directory resource, e.g. `"newOrder"`.
    pub fn resource_url(&self, name: &str) -> Result<String> {
        self.directory()?
            .get(name)
            .optional()
            .ok_or_else(|| AcmeError::NotSupported(name.to_owned()))?
            .as_url()
    }

    /// The directory's `meta` object. Empty if the provider sends none.
    pub fn meta(&self) -> Result<Json> {
        Ok(self
            .directory()?
            .get("meta")
            .map(|meta| meta.as_object())?
            .unwrap_or_default())
    }

    /// URL of the provider's current terms of service.
    pub fn terms_of_service(&self) -> Result<Option<String>> {
        self.meta()?.get("termsOfService").map(|v| v.as_url())
    }

    /// URL of the provider's website.
    pub fn website(&self) -> Result<Option<String>> {
        self.meta()?.get("website").map(|v| v.as_url())
    }

    /// Hostnames the provider recognizes as referring to itself for CAA
    /// record validation.
    pub fn caa_identities(&self) -> Result<Vec<String>> {
        self.meta()?
            .get("caaIdentities")
            .as_array()?
            .iter()
            .map(|v| v.as_string())
            .collect()
    }

    /// Checks if the provider requires an external account binding on
    /// newAccount requests.
    pub fn external_account_required(&self) -> Result<bool> {
        Ok(self
            .meta()?
            .get("externalAccountRequired")
            .map(|v| v.as_bool())?
            .unwrap_or(false))
    }

    /// The certificate profiles the provider offers, mapping profile name
    /// to a description. Empty if the provider announces none.
    pub fn profiles(&self) -> Result<Json> {
        Ok(self
            .meta()?
            .get("profiles")
            .map(|profiles| profiles.as_object())?
            .unwrap_or_default())
    }

    /// Takes a nonce from the pool, or requests a fresh one via a HEAD
    /// request on the newNonce resource.
    pub(crate) fn new_nonce(&self) -> Result<String> {
        if let Some(nonce) = self.inner.nonce.lock().take() {
            log::trace!("using pooled nonce");
            return Ok(nonce);
        }

        let url = self.resource_url("newNonce")?;
        log::debug!("requesting new nonce");
        let response = self.transport().request("HEAD", &url, &[], None)?;
        if !response.is_success() {
            return Err(AcmeError::Protocol(format!(
                "newNonce failed with HTTP {}",
                response.status
            )));
        }
        response
            .header("replay-nonce")
            .map(str::to_owned)
            .ok_or_else(|| AcmeError::Protocol("no Replay-Nonce header".to_owned()))
    }

    /// Banks the `Replay-Nonce` of a response for the next signed request.
    pub(crate) fn bank_nonce(&self, nonce: Option<&str>) {
        if let Some(nonce) = nonce {
            log::trace!("banking nonce");
            *self.inner.nonce.lock() = Some(nonce.to_owned());
        }
    }

    /// Constructs the matching [`Challenge`] for a challenge document.
    /// Unregistered types produce a generic challenge.
    pub fn create_challenge(&self, login: &Login, data: Json) -> Result<Challenge> {
        let challenge_type = data.get("type").as_string()?;
        let factory = self.inner.challenges.lock().get(&challenge_type).copied();
        match factory {
            Some(factory) => factory(login.clone(), data),
            None => challenge::generic(login.clone(), data),
        }
    }

    /// Registers a constructor for a proprietary challenge type.
    pub fn register_challenge(&self, challenge_type: &str, factory: ChallengeFactory) {
        self.inner
            .challenges
            .lock()
            .insert(challenge_type.to_owned(), factory);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("directory_url", &self.inner.directory_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn directory_is_fetched_once() {
        let (session, transport) = test::session(vec![test::directory_response()]);

        let directory = session.directory().unwrap();
        assert_eq!(
            directory.get("newNonce").as_url().unwrap(),
            "https://example.com/acme/new-nonce"
        );

        // second call must hit the cache, the script has no response left
        let directory = session.directory().unwrap();
        assert!(directory.contains_key("newOrder"));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn reset_forces_refetch() {
        let (session, transport) =
            test::session(vec![test::directory_response(), test::directory_response()]);

        session.directory().unwrap();
        session.reset_directory();
        session.directory().unwrap();
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn unknown_resources_are_not_supported() {
        let (session, _transport) = test::session(vec![test::directory_response()]);

        assert!(session.resource_url("newOrder").is_ok());
        let err = session.resource_url("renewalInfo").unwrap_err();
        assert!(matches!(err, AcmeError::NotSupported(name) if name == "renewalInfo"));
    }

    #[test]
    fn reads_directory_metadata() {
        let (session, _transport) = test::session(vec![test::directory_response()]);

        assert_eq!(
            session.terms_of_service().unwrap().as_deref(),
            Some("https://example.com/acme/terms/2017-5-30")
        );
        assert_eq!(session.caa_identities().unwrap(), vec!["example.com"]);
        assert!(!session.external_account_required().unwrap());
        assert!(session.profiles().unwrap().is_empty());
    }

    #[test]
    fn nonce_pool_holds_one_nonce() {
        let (session, transport) = test::session(vec![
            test::directory_response(),
            test::nonce_response("nonce-1"),
        ]);

        session.bank_nonce(Some("banked"));
        assert_eq!(session.new_nonce().unwrap(), "banked");

        // pool is now empty, the next nonce comes from a HEAD request
        assert_eq!(session.new_nonce().unwrap(), "nonce-1");
        let requests = transport.requests();
        let head = requests.last().unwrap();
        assert_eq!(head.method, "HEAD");
        assert_eq!(head.url, "https://example.com/acme/new-nonce");
    }
}
