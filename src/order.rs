//! Order life cycle.
//!
//! An order walks through pending, ready, processing, and finally valid
//! (or invalid). The caller authorizes the identifiers while the order is
//! pending, finalizes it with a CSR once ready, and downloads the
//! certificate when it becomes valid.

use std::{collections::HashSet, time::Duration};

use time::OffsetDateTime;

use crate::{
    authorization::Authorization,
    certificate::Certificate,
    crypto::{self, KeyPair},
    error::{AcmeError, Result},
    identifier::Identifier,
    json::{Json, JsonBuilder},
    login::Login,
    problem::Problem,
    resource::{self, ResourceState},
    status::Status,
    util::base64url,
};

const RESOURCE: &str = "Order";

/// A certificate order.
///
/// See [RFC 8555 §7.1.3].
///
/// # Example JSON
///
/// ```json
/// {
///   "status": "pending",
///   "expires": "2019-01-09T08:26:43.570360537Z",
///   "identifiers": [
///     { "type": "dns", "value": "example.org" }
///   ],
///   "authorizations": [
///     "https://example.com/acme/authz/1"
///   ],
///   "finalize": "https://example.com/acme/finalize/1"
/// }
/// ```
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
pub struct Order {
    state: ResourceState,
}

impl Order {
    pub(crate) fn bind(login: Login, location: String) -> Order {
        Order {
            state: ResourceState::bind(login, location),
        }
    }

    pub(crate) fn of(login: Login, location: String, json: Json) -> Order {
        Order {
            state: ResourceState::of(login, location, json),
        }
    }

    /// The order URL.
    pub fn location(&self) -> &str {
        self.state.location()
    }

    /// The raw order document.
    pub fn json(&self) -> Result<Json> {
        self.state.json(RESOURCE)
    }

    pub fn status(&self) -> Result<Status> {
        self.json()?.get("status").as_status()
    }

    /// When the server will consider this order stale.
    pub fn expires(&self) -> Result<Option<OffsetDateTime>> {
        self.json()?.get("expires").map(|v| v.as_instant())
    }

    /// The identifiers this order covers.
    pub fn identifiers(&self) -> Result<Vec<Identifier>> {
        self.json()?
            .get("identifiers")
            .as_array()?
            .iter()
            .map(|v| v.as_identifier())
            .collect()
    }

    /// The domain names of this order, in ASCII compatible encoding.
    pub fn domains(&self) -> Result<Vec<String>> {
        self.identifiers()?
            .iter()
            .filter(|identifier| identifier.is_type_dns())
            .map(Identifier::domain)
            .collect()
    }

    pub fn not_before(&self) -> Result<Option<OffsetDateTime>> {
        self.json()?.get("notBefore").map(|v| v.as_instant())
    }

    pub fn not_after(&self) -> Result<Option<OffsetDateTime>> {
        self.json()?.get("notAfter").map(|v| v.as_instant())
    }

    /// The certificate profile the server selected, if profiles are in use.
    pub fn profile(&self) -> Result<Option<String>> {
        self.json()?.get("profile").map(|v| v.as_string())
    }

    /// The reason the order failed, if the server reported one.
    pub fn error(&self) -> Result<Option<Problem>> {
        self.json()?
            .get("error")
            .map(|v| v.as_problem(self.state.location()))
    }

    /// The URLs of the authorizations belonging to this order.
    pub fn authorization_urls(&self) -> Result<Vec<String>> {
        self.json()?
            .get("authorizations")
            .as_array()?
            .iter()
            .map(|v| v.as_url())
            .collect()
    }

    /// Binds all authorizations of this order. Their documents are fetched
    /// lazily.
    pub fn authorizations(&self) -> Result<Vec<Authorization>> {
        let login = self.state.login();
        Ok(self
            .authorization_urls()?
            .into_iter()
            .map(|url| login.bind_authorization(url))
            .collect())
    }

    fn finalize_url(&self) -> Result<String> {
        self.json()?.get("finalize").as_url()
    }

    /// The certificate URL, present once the order is valid.
    pub fn certificate_url(&self) -> Result<Option<String>> {
        self.json()?.get("certificate").map(|v| v.as_url())
    }

    /// Finalizes the order with a DER encoded PKCS#10 CSR
    /// ([RFC 8555 §7.4]).
    ///
    /// The order must be ready. Afterwards it is usually processing; use
    /// [`Order::wait_for_completion()`] to find out whether the
    /// certificate was issued.
    ///
    /// [RFC 8555 §7.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.4
    pub fn execute(&self, csr_der: &[u8]) -> Result<()> {
        let login = self.state.login().clone();
        let finalize_url = self.finalize_url()?;

        let mut payload = JsonBuilder::new();
        payload.put("csr", base64url(csr_der));

        log::debug!("finalizing {}", self.location());
        let mut conn = login.session().connect();
        conn.send_signed_request(&finalize_url, &payload, &login)?;
        self.state.set_json(conn.read_json_response()?);
        Ok(())
    }

    /// Builds a CSR for the order's identifiers, signs it with the given
    /// certificate key, and finalizes the order with it.
    pub fn execute_with_key(&self, certificate_key: &KeyPair) -> Result<()> {
        let csr = crypto::create_csr(certificate_key, &self.identifiers()?)?;
        self.execute(&csr)
    }

    /// Polls until all authorizations are completed and the order is ready
    /// for finalization (or became invalid).
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<Status> {
        resource::wait_for_status(
            &self.state,
            RESOURCE,
            &[Status::Ready, Status::Invalid],
            timeout,
        )
    }

    /// Polls until the certificate is issued: the order is valid (or
    /// became invalid).
    pub fn wait_for_completion(&self, timeout: Duration) -> Result<Status> {
        resource::wait_for_status(
            &self.state,
            RESOURCE,
            &[Status::Valid, Status::Invalid],
            timeout,
        )
    }

    /// The issued certificate. Only available once the order is valid.
    pub fn certificate(&self) -> Result<Certificate> {
        let url = self.certificate_url()?.ok_or_else(|| {
            AcmeError::Protocol("order has no certificate URL yet".to_owned())
        })?;
        Ok(self.state.login().bind_certificate(url))
    }

    /// Fetches the current order state from the server.
    pub fn fetch(&self) -> Result<Option<OffsetDateTime>> {
        self.state.fetch()
    }

    /// Like [`Order::fetch()`], but fails with [`AcmeError::RetryAfter`]
    /// when the server signalled that it is still processing.
    pub fn update(&self) -> Result<()> {
        resource::update(&self.state, RESOURCE)
    }
}

impl PartialEq for Order {
    fn eq(&self, other: &Self) -> bool {
        self.location() == other.location()
    }
}

impl Eq for Order {}

/// Builder for the newOrder request.
///
/// Created via [`Account::new_order()`].
///
/// ```no_run
/// # fn doc(account: acme_kit::Account) -> acme_kit::Result<()> {
/// let order = account
///     .new_order()
///     .domain("example.org")
///     .domain("www.example.org")
///     .create()?;
/// # Ok(()) }
/// ```
///
/// [`Account::new_order()`]: crate::account::Account::new_order()
pub struct OrderBuilder {
    login: Login,
    identifiers: Vec<Identifier>,
    not_before: Option<OffsetDateTime>,
    not_after: Option<OffsetDateTime>,
    profile: Option<String>,
}

impl OrderBuilder {
    pub(crate) fn new(login: Login) -> OrderBuilder {
        OrderBuilder {
            login,
            identifiers: Vec::new(),
            not_before: None,
            not_after: None,
            profile: None,
        }
    }

    /// Adds a domain name to the order.
    pub fn domain(self, domain: impl Into<String>) -> Self {
        self.identifier(Identifier::dns(domain))
    }

    /// Adds several domain names to the order.
    pub fn domains(mut self, domains: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for domain in domains {
            self = self.domain(domain);
        }
        self
    }

    /// Adds an identifier to the order.
    pub fn identifier(mut self, identifier: Identifier) -> Self {
        self.identifiers.push(identifier);
        self
    }

    /// Requested start of the certificate's validity.
    pub fn not_before(mut self, instant: OffsetDateTime) -> Self {
        self.not_before = Some(instant);
        self
    }

    /// Requested end of the certificate's validity.
    pub fn not_after(mut self, instant: OffsetDateTime) -> Self {
        self.not_after = Some(instant);
        self
    }

    /// Requests a certificate profile offered in the directory's
    /// [`profiles`][crate::session::Session::profiles].
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Sends the newOrder request and returns the created order.
    pub fn create(self) -> Result<Order> {
        // duplicate identifiers upset some CAs
        let mut identifiers = Vec::new();
        let mut seen = HashSet::new();
        for identifier in self.identifiers {
            let wire = identifier.to_wire()?;
            if seen.insert((wire.identifier_type().to_owned(), wire.value().to_owned())) {
                identifiers.push(wire);
            }
        }
        if identifiers.is_empty() {
            return Err(AcmeError::Protocol(
                "order needs at least one identifier".to_owned(),
            ));
        }

        let url = self.login.session().resource_url("newOrder")?;

        let mut payload = JsonBuilder::new();
        payload.put("identifiers", serde_json::to_value(identifiers)?);
        if let Some(not_before) = self.not_before {
            payload.put_instant("notBefore", not_before);
        }
        if let Some(not_after) = self.not_after {
            payload.put_instant("notAfter", not_after);
        }
        if let Some(profile) = &self.profile {
            payload.put("profile", profile.clone());
        }

        log::debug!("creating order");
        let mut conn = self.login.session().connect();
        conn.send_signed_request(&url, &payload, &self.login)?;

        let location = conn.location()?;
        let json = conn.read_json_response()?;
        log::info!("order URL: {location}");

        Ok(Order::of(self.login, location, json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn create_posts_deduplicated_identifiers() {
        let (account, transport) = test::account(vec![
            test::nonce_response("n-1"),
            test::json_response(201, test::ORDER_JSON)
                .with_header("Location", "https://example.com/acme/order/1"),
        ]);

        let order = account
            .new_order()
            .domain("example.org")
            .domain("Example.ORG")
            .domain("www.example.org")
            .create()
            .unwrap();

        assert_eq!(order.location(), "https://example.com/acme/order/1");
        assert_eq!(order.status().unwrap(), Status::Pending);

        let requests = transport.requests();
        let post = requests.last().unwrap();
        assert_eq!(post.url, "https://example.com/acme/new-order");

        let payload = Json::parse(&post.jose_payload().unwrap()).unwrap();
        let identifiers = payload.get("identifiers").as_array().unwrap();
        // "Example.ORG" normalizes to a duplicate and is dropped
        assert_eq!(identifiers.len(), 2);
        assert_eq!(
            identifiers[0].as_identifier().unwrap().value(),
            "example.org"
        );
    }

    #[test]
    fn create_without_identifiers_fails() {
        let (account, _transport) = test::account(vec![]);
        assert!(account.new_order().create().is_err());
    }

    #[test]
    fn reads_order_fields() {
        let (login, _transport) = test::login(vec![]);
        let order = Order::of(
            login,
            "https://example.com/acme/order/1".to_owned(),
            Json::parse(test::ORDER_JSON).unwrap(),
        );

        assert_eq!(order.status().unwrap(), Status::Pending);
        assert_eq!(order.domains().unwrap(), vec!["example.org"]);
        assert!(order.expires().unwrap().is_some());
        assert_eq!(order.error().unwrap(), None);
        assert_eq!(order.certificate_url().unwrap(), None);
        assert_eq!(
            order.authorization_urls().unwrap(),
            vec!["https://example.com/acme/authz/1"]
        );
        assert_eq!(order.authorizations().unwrap().len(), 1);
    }

    #[test]
    fn execute_posts_the_csr_and_updates_the_order() {
        let (login, transport) = test::login(vec![
            test::nonce_response("n-1"),
            test::json_response(
                200,
                r#"{
                    "status": "processing",
                    "identifiers": [{"type": "dns", "value": "example.org"}],
                    "authorizations": ["https://example.com/acme/authz/1"],
                    "finalize": "https://example.com/acme/finalize/1"
                }"#,
            ),
        ]);
        let order = Order::of(
            login,
            "https://example.com/acme/order/1".to_owned(),
            Json::parse(test::ORDER_JSON).unwrap(),
        );

        order.execute(b"fake-csr-der").unwrap();
        assert_eq!(order.status().unwrap(), Status::Processing);

        let requests = transport.requests();
        let post = requests.last().unwrap();
        assert_eq!(post.url, "https://example.com/acme/finalize/1");

        let payload = Json::parse(&post.jose_payload().unwrap()).unwrap();
        assert_eq!(
            payload.get("csr").as_string().unwrap(),
            base64url(b"fake-csr-der")
        );
    }

    #[test]
    fn certificate_requires_a_certificate_url() {
        let (login, _transport) = test::login(vec![]);
        let order = Order::of(
            login.clone(),
            "https://example.com/acme/order/1".to_owned(),
            Json::parse(test::ORDER_JSON).unwrap(),
        );
        assert!(order.certificate().is_err());

        let order = Order::of(
            login,
            "https://example.com/acme/order/1".to_owned(),
            Json::parse(test::VALID_ORDER_JSON).unwrap(),
        );
        let certificate = order.certificate().unwrap();
        assert_eq!(
            certificate.location(),
            "https://example.com/acme/cert/fae41c070f967713109028"
        );
    }

    #[test]
    fn polling_follows_retry_after_and_reaches_the_target() {
        let (login, transport) = test::login(vec![
            test::nonce_response("n-1"),
            test::json_response(
                200,
                r#"{
                    "status": "processing",
                    "identifiers": [{"type": "dns", "value": "example.org"}],
                    "authorizations": ["https://example.com/acme/authz/1"],
                    "finalize": "https://example.com/acme/finalize/1"
                }"#,
            )
            .with_header("Retry-After", "2"),
            test::nonce_response("n-2"),
            test::json_response(200, test::VALID_ORDER_JSON),
        ]);

        let order = Order::bind(login, "https://example.com/acme/order/1".to_owned());

        let started = std::time::Instant::now();
        let status = order.wait_for_completion(Duration::from_secs(10)).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(status, Status::Valid);
        // first poll came back processing with Retry-After: 2, the second
        // poll happened after the minimum interval
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(10));

        let posts = transport
            .requests()
            .iter()
            .filter(|r| r.method == "POST")
            .count();
        assert_eq!(posts, 2);
    }
}
