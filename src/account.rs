//! Account resource, account creation and account modification.

use time::OffsetDateTime;

use crate::{
    authorization::Authorization,
    certificate::RevocationReason,
    crypto::{jose, KeyPair},
    error::{AcmeError, Result},
    identifier::Identifier,
    json::{Json, JsonBuilder},
    login::Login,
    order::OrderBuilder,
    resource::{self, ResourceState},
    session::Session,
    status::Status,
    util::base64url_decode,
};

const RESOURCE: &str = "Account";

/// An account at the ACME provider.
///
/// See [RFC 8555 §7.1.2].
///
/// # Example JSON
///
/// ```json
/// {
///   "status": "valid",
///   "contact": [
///     "mailto:cert-admin@example.com"
///   ],
///   "termsOfServiceAgreed": true,
///   "orders": "https://example.com/acme/acct/1/orders"
/// }
/// ```
///
/// [RFC 8555 §7.1.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.2
pub struct Account {
    state: ResourceState,
}

impl Account {
    pub(crate) fn bind(login: Login, location: String) -> Account {
        Account {
            state: ResourceState::bind(login, location),
        }
    }

    pub(crate) fn of(login: Login, location: String, json: Json) -> Account {
        Account {
            state: ResourceState::of(login, location, json),
        }
    }

    /// The account URL. Also used as `kid` of all signed requests.
    pub fn location(&self) -> &str {
        self.state.location()
    }

    pub fn login(&self) -> &Login {
        self.state.login()
    }

    /// The raw account document.
    pub fn json(&self) -> Result<Json> {
        self.state.json(RESOURCE)
    }

    /// Account status: valid, deactivated, or revoked.
    pub fn status(&self) -> Result<Status> {
        self.json()?.get("status").as_status()
    }

    /// The contact URIs of this account.
    pub fn contacts(&self) -> Result<Vec<String>> {
        self.json()?
            .get("contact")
            .as_array()?
            .iter()
            .map(|v| v.as_string())
            .collect()
    }

    pub fn terms_of_service_agreed(&self) -> Result<Option<bool>> {
        self.json()?.get("termsOfServiceAgreed").map(|v| v.as_bool())
    }

    /// Checks if an external account binding was established at creation.
    pub fn has_external_account_binding(&self) -> Result<bool> {
        Ok(self.json()?.contains_key("externalAccountBinding"))
    }

    /// Fetches the account's order list (first page) and binds each order.
    pub fn orders(&self) -> Result<Vec<crate::order::Order>> {
        let orders_url = self.json()?.get("orders").as_url()?;
        let login = self.login().clone();

        let mut conn = login.session().connect();
        conn.post_as_get(&orders_url, &login)?;
        let json = conn.read_json_response()?;

        json.get("orders")
            .as_array()?
            .iter()
            .map(|v| Ok(login.bind_order(v.as_url()?)))
            .collect()
    }

    /// Starts building a new certificate order.
    pub fn new_order(&self) -> OrderBuilder {
        OrderBuilder::new(self.login().clone())
    }

    /// Pre-authorizes an identifier, so later orders can skip its
    /// validation. Fails with [`AcmeError::NotSupported`] if the CA offers
    /// no `newAuthz` endpoint.
    pub fn pre_authorize(&self, identifier: Identifier) -> Result<Authorization> {
        let login = self.login().clone();
        let url = login
            .session()
            .resource_url("newAuthz")
            .map_err(|_| AcmeError::NotSupported("pre-authorization".to_owned()))?;

        let mut payload = JsonBuilder::new();
        payload.put_identifier("identifier", &identifier)?;

        let mut conn = login.session().connect();
        conn.send_signed_request(&url, &payload, &login)?;
        let location = conn.location()?;
        let json = conn.read_json_response()?;
        Ok(Authorization::of(login, location, json))
    }

    /// Pre-authorizes a domain name.
    pub fn pre_authorize_domain(&self, domain: &str) -> Result<Authorization> {
        self.pre_authorize(Identifier::dns(domain))
    }

    /// Starts modifying the account's contacts or terms of service
    /// agreement.
    pub fn modify(&self) -> AccountEditor<'_> {
        AccountEditor {
            account: self,
            contacts: Vec::new(),
            terms_agreed: None,
        }
    }

    /// Replaces the account key ([RFC 8555 §7.3.5]).
    ///
    /// The inner key change object is signed with the new key, the outer
    /// request with the current one. On success, the old key is no longer
    /// usable; the returned [`Login`] carries the new key.
    ///
    /// [RFC 8555 §7.3.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.5
    pub fn key_change(&self, new_key: KeyPair) -> Result<Login> {
        let login = self.login().clone();
        let url = login.session().resource_url("keyChange")?;

        let mut key_change = JsonBuilder::new();
        key_change
            .put("account", self.location())
            .put_json("oldKey", &jose::public_jwk(login.key_pair()));

        // inner JWS: no nonce, the new key as jwk
        let inner = jose::sign_request(&url, None, Some(&key_change.to_string()), &new_key, None)?;
        let inner = Json::parse(&inner)?;
        let mut payload = JsonBuilder::new();
        payload
            .put("protected", inner.get("protected").as_string()?)
            .put("payload", inner.get("payload").as_string()?)
            .put("signature", inner.get("signature").as_string()?);

        let mut conn = login.session().connect();
        conn.send_signed_request(&url, &payload, &login)?;

        log::info!("account key changed for {}", self.location());
        let new_login = Login::new(
            login.session().clone(),
            self.location().to_owned(),
            new_key,
        );
        self.state.invalidate();
        Ok(new_login)
    }

    /// Permanently deactivates the account ([RFC 8555 §7.3.6]). There is no
    /// way back.
    ///
    /// [RFC 8555 §7.3.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.6
    pub fn deactivate(&self) -> Result<()> {
        log::debug!("deactivating account {}", self.location());
        let login = self.login().clone();
        let mut payload = JsonBuilder::new();
        payload.put("status", "deactivated");

        let mut conn = login.session().connect();
        conn.send_signed_request(self.location(), &payload, &login)?;
        self.state.set_json(conn.read_json_response()?);
        Ok(())
    }

    /// Revokes a certificate issued to this account. `cert_der` is the DER
    /// encoded end-entity certificate.
    pub fn revoke_certificate(
        &self,
        cert_der: &[u8],
        reason: Option<RevocationReason>,
    ) -> Result<()> {
        let login = self.login().clone();
        let url = login.session().resource_url("revokeCert")?;

        let mut payload = JsonBuilder::new();
        payload.put_base64("certificate", cert_der);
        if let Some(code) = reason.and_then(RevocationReason::code) {
            payload.put("reason", code);
        }

        let mut conn = login.session().connect();
        conn.send_signed_request(&url, &payload, &login)
    }

    /// Fetches the current account state from the server.
    pub fn fetch(&self) -> Result<Option<OffsetDateTime>> {
        self.state.fetch()
    }

    /// Like [`Account::fetch()`], but fails with [`AcmeError::RetryAfter`]
    /// when the server signalled that it is still processing.
    pub fn update(&self) -> Result<()> {
        resource::update(&self.state, RESOURCE)
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.location() == other.location()
    }
}

impl Eq for Account {}

/// Collects changes to an [`Account`], committed in a single request.
pub struct AccountEditor<'a> {
    account: &'a Account,
    contacts: Vec<String>,
    terms_agreed: Option<bool>,
}

impl AccountEditor<'_> {
    /// Replaces the account's contacts with the given URI (and any further
    /// contacts added before the commit).
    pub fn add_contact(mut self, contact: impl Into<String>) -> Self {
        self.contacts.push(contact.into());
        self
    }

    /// Adds an email contact.
    pub fn add_email(self, email: &str) -> Self {
        self.add_contact(format!("mailto:{email}"))
    }

    /// Signals agreement to the current terms of service.
    pub fn agree_to_terms_of_service(mut self) -> Self {
        self.terms_agreed = Some(true);
        self
    }

    /// Sends the changes to the server and refreshes the account document.
    pub fn commit(self) -> Result<()> {
        let login = self.account.login().clone();
        let mut payload = JsonBuilder::new();
        if !self.contacts.is_empty() {
            payload.put("contact", self.contacts);
        }
        if let Some(agreed) = self.terms_agreed {
            payload.put("termsOfServiceAgreed", agreed);
        }

        let mut conn = login.session().connect();
        conn.send_signed_request(self.account.location(), &payload, &login)?;
        self.account.state.set_json(conn.read_json_response()?);
        Ok(())
    }
}

/// Builder for the newAccount request ([RFC 8555 §7.3]).
///
/// ```no_run
/// use acme_kit::{AccountBuilder, DirectoryUrl, Session, create_p256_key};
///
/// # fn main() -> acme_kit::Result<()> {
/// let session = Session::new(DirectoryUrl::LetsEncryptStaging);
/// let login = AccountBuilder::new()
///     .add_email("cert-admin@example.com")
///     .agree_to_terms_of_service()
///     .create_login(&session, create_p256_key())?;
/// # Ok(()) }
/// ```
///
/// [RFC 8555 §7.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3
#[derive(Default)]
pub struct AccountBuilder {
    contacts: Vec<String>,
    terms_agreed: Option<bool>,
    only_return_existing: Option<bool>,
    key_identifier: Option<(String, Vec<u8>)>,
}

impl AccountBuilder {
    pub fn new() -> AccountBuilder {
        AccountBuilder::default()
    }

    /// Adds a contact URI, e.g. `mailto:cert-admin@example.com`.
    pub fn add_contact(mut self, contact: impl Into<String>) -> Self {
        self.contacts.push(contact.into());
        self
    }

    /// Adds an email contact.
    pub fn add_email(self, email: &str) -> Self {
        self.add_contact(format!("mailto:{email}"))
    }

    /// Documents that the user has agreed to the provider's terms of
    /// service.
    pub fn agree_to_terms_of_service(mut self) -> Self {
        self.terms_agreed = Some(true);
        self
    }

    /// Only looks up the account for the given key, without creating a new
    /// one. The server fails with `accountDoesNotExist` if the key is
    /// unknown.
    pub fn only_return_existing(mut self) -> Self {
        self.only_return_existing = Some(true);
        self
    }

    /// Binds the new account to an external account ([RFC 8555 §7.3.4]).
    /// `key_identifier` and the base64url encoded MAC key are issued by the
    /// CA.
    ///
    /// [RFC 8555 §7.3.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.4
    pub fn with_key_identifier(mut self, key_identifier: &str, mac_key: &str) -> Result<Self> {
        let mac_key = base64url_decode(mac_key.trim())
            .map_err(|_| AcmeError::Crypto("invalid base64url MAC key".to_owned()))?;
        self.key_identifier = Some((key_identifier.to_owned(), mac_key));
        Ok(self)
    }

    /// Registers the account and returns it, populated from the server's
    /// response.
    pub fn create(self, session: &Session, key_pair: KeyPair) -> Result<Account> {
        let (login, json) = self.register(session, key_pair)?;
        let location = login.account_location().to_owned();
        Ok(Account::of(login, location, json))
    }

    /// Registers the account and returns the [`Login`] for it.
    pub fn create_login(self, session: &Session, key_pair: KeyPair) -> Result<Login> {
        let (login, _json) = self.register(session, key_pair)?;
        Ok(login)
    }

    fn register(self, session: &Session, key_pair: KeyPair) -> Result<(Login, Json)> {
        let url = session.resource_url("newAccount")?;

        let mut payload = JsonBuilder::new();
        if !self.contacts.is_empty() {
            payload.put("contact", self.contacts);
        }
        if let Some(agreed) = self.terms_agreed {
            payload.put("termsOfServiceAgreed", agreed);
        }
        if let Some(existing) = self.only_return_existing {
            payload.put("onlyReturnExisting", existing);
        }
        if let Some((key_identifier, mac_key)) = &self.key_identifier {
            let binding =
                jose::external_account_binding(key_identifier, mac_key, &key_pair, &url)?;
            payload.put_json("externalAccountBinding", &binding);
        }

        log::debug!("registering account");
        let mut conn = session.connect();
        conn.send_signed_request_with_key(&url, &payload, &key_pair)?;

        let location = conn.location()?;
        let json = conn.read_json_response()?;
        log::info!("account URL: {location}");

        Ok((Login::new(session.clone(), location, key_pair), json))
    }
}
