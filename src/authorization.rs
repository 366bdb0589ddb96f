use std::time::Duration;

use time::OffsetDateTime;

use crate::{
    challenge::Challenge,
    error::{AcmeError, Result},
    identifier::Identifier,
    json::{Json, JsonBuilder},
    login::Login,
    resource::{self, ResourceState},
    status::Status,
};

const RESOURCE: &str = "Authorization";

/// An authorization: the server's offer to prove control over a single
/// identifier, via one of several challenges.
///
/// See [RFC 8555 §7.1.4].
///
/// # Example JSON
///
/// ```json
/// {
///   "identifier": { "type": "dns", "value": "example.org" },
///   "status": "pending",
///   "expires": "2019-01-09T08:26:43Z",
///   "challenges": [
///     {
///       "type": "http-01",
///       "status": "pending",
///       "url": "https://example.com/acme/challenge/1/101",
///       "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w"
///     }
///   ]
/// }
/// ```
///
/// [RFC 8555 §7.1.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.4
pub struct Authorization {
    state: ResourceState,
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorization").finish_non_exhaustive()
    }
}

impl Authorization {
    pub(crate) fn bind(login: Login, location: String) -> Authorization {
        Authorization {
            state: ResourceState::bind(login, location),
        }
    }

    pub(crate) fn of(login: Login, location: String, json: Json) -> Authorization {
        Authorization {
            state: ResourceState::of(login, location, json),
        }
    }

    /// The authorization URL.
    pub fn location(&self) -> &str {
        self.state.location()
    }

    /// The raw authorization document.
    pub fn json(&self) -> Result<Json> {
        self.state.json(RESOURCE)
    }

    pub fn status(&self) -> Result<Status> {
        Ok(self.json()?.get("status").as_status()?)
    }

    /// The identifier this authorization is about.
    pub fn identifier(&self) -> Result<Identifier> {
        self.json()?.get("identifier").as_identifier()
    }

    /// Checks if this authorization was created for a wildcard domain.
    pub fn is_wildcard(&self) -> Result<bool> {
        Ok(self
            .json()?
            .get("wildcard")
            .map(|v| v.as_bool())?
            .unwrap_or(false))
    }

    /// When the server will consider this authorization invalid.
    pub fn expires(&self) -> Result<Option<OffsetDateTime>> {
        self.json()?.get("expires").map(|v| v.as_instant())
    }

    /// All challenges the server offers for this authorization. Solving any
    /// one of them makes the authorization valid.
    pub fn challenges(&self) -> Result<Vec<Challenge>> {
        let login = self.state.login();
        self.json()?
            .get("challenges")
            .as_array()?
            .iter()
            .map(|value| login.challenge(value.as_object()?))
            .collect()
    }

    /// Finds the challenge of the given type, e.g.
    /// [`Http01Challenge::TYPE`].
    ///
    /// Returns `None` if the server does not offer that type. An
    /// authorization offering the same type twice is malformed and is
    /// rejected with a protocol error.
    ///
    /// [`Http01Challenge::TYPE`]: crate::challenge::Http01Challenge::TYPE
    pub fn find_challenge(&self, challenge_type: &str) -> Result<Option<Challenge>> {
        let json = self.json()?;
        let mut matching = Vec::new();
        for value in json.get("challenges").as_array()? {
            let challenge = value.as_object()?;
            if challenge.get("type").as_string()? == challenge_type {
                matching.push(challenge);
            }
        }

        if matching.len() > 1 {
            return Err(AcmeError::Protocol(format!(
                "multiple {challenge_type} challenges in authorization"
            )));
        }

        matching
            .pop()
            .map(|challenge| self.state.login().challenge(challenge))
            .transpose()
    }

    /// Deactivates this authorization, e.g. when giving up control over the
    /// identifier.
    pub fn deactivate(&self) -> Result<()> {
        log::debug!("deactivating {}", self.location());
        let login = self.state.login().clone();
        let mut payload = JsonBuilder::new();
        payload.put("status", "deactivated");

        let mut conn = login.session().connect();
        conn.send_signed_request(self.location(), &payload, &login)?;
        self.state.set_json(conn.read_json_response()?);
        Ok(())
    }

    /// Fetches the current authorization state from the server.
    pub fn fetch(&self) -> Result<Option<OffsetDateTime>> {
        self.state.fetch()
    }

    /// Like [`Authorization::fetch()`], but fails with
    /// [`AcmeError::RetryAfter`] when the server signalled that it is still
    /// processing.
    pub fn update(&self) -> Result<()> {
        resource::update(&self.state, RESOURCE)
    }

    /// Polls until the authorization is valid or invalid.
    pub fn wait_for_completion(&self, timeout: Duration) -> Result<Status> {
        resource::wait_for_status(
            &self.state,
            RESOURCE,
            &[Status::Valid, Status::Invalid],
            timeout,
        )
    }
}

impl PartialEq for Authorization {
    fn eq(&self, other: &Self) -> bool {
        self.location() == other.location()
    }
}

impl Eq for Authorization {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{challenge::{Dns01Challenge, Http01Challenge}, test};

    fn authorization() -> (Authorization, test::ScriptedCalls) {
        let (login, transport) = test::login(vec![]);
        (
            Authorization::of(
                login,
                "https://example.com/acme/authz/1".to_owned(),
                Json::parse(test::AUTHORIZATION_JSON).unwrap(),
            ),
            transport,
        )
    }

    #[test]
    fn reads_authorization_fields() {
        let (authorization, _transport) = authorization();

        assert_eq!(authorization.status().unwrap(), Status::Pending);
        assert_eq!(authorization.identifier().unwrap().value(), "example.org");
        assert!(!authorization.is_wildcard().unwrap());
        assert!(authorization.expires().unwrap().is_some());
        assert_eq!(authorization.challenges().unwrap().len(), 3);
    }

    #[test]
    fn finds_challenges_by_type() {
        let (authorization, _transport) = authorization();

        let challenge = authorization
            .find_challenge(Http01Challenge::TYPE)
            .unwrap()
            .unwrap();
        assert!(challenge.as_http01().is_some());

        let challenge = authorization
            .find_challenge(Dns01Challenge::TYPE)
            .unwrap()
            .unwrap();
        assert!(challenge.as_dns01().is_some());

        assert!(authorization
            .find_challenge("email-reply-00")
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicate_challenge_types_are_rejected() {
        let (login, _transport) = test::login(vec![]);
        let authorization = Authorization::of(
            login,
            "https://example.com/acme/authz/1".to_owned(),
            Json::parse(
                r#"{
                    "identifier": {"type": "dns", "value": "example.org"},
                    "status": "pending",
                    "challenges": [
                        {
                            "type": "http-01",
                            "status": "pending",
                            "url": "https://example.com/acme/challenge/1/101",
                            "token": "a"
                        },
                        {
                            "type": "http-01",
                            "status": "pending",
                            "url": "https://example.com/acme/challenge/1/102",
                            "token": "b"
                        }
                    ]
                }"#,
            )
            .unwrap(),
        );

        let err = authorization.find_challenge("http-01").unwrap_err();
        assert_eq!(
            err.to_string(),
            "multiple http-01 challenges in authorization"
        );
    }

    #[test]
    fn lazy_binding_fetches_on_first_getter() {
        let (login, transport) = test::login(vec![
            test::nonce_response("n-1"),
            test::json_response(200, test::AUTHORIZATION_JSON),
        ]);

        let authorization =
            login.bind_authorization("https://example.com/acme/authz/1".to_owned());
        assert_eq!(
            authorization.identifier().unwrap().value(),
            "example.org"
        );
        // one POST-as-GET for the first getter, none for the second
        let posts_before = transport
            .requests()
            .iter()
            .filter(|r| r.method == "POST")
            .count();
        assert_eq!(posts_before, 1);

        authorization.status().unwrap();
        let posts_after = transport
            .requests()
            .iter()
            .filter(|r| r.method == "POST")
            .count();
        assert_eq!(posts_after, 1);
    }
}
