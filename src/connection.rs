//! A single request/response round trip against the ACME server.
//!
//! A [`Connection`] handles everything [RFC 8555 §6] requires on the wire:
//! JWS signing, nonce bookkeeping, problem documents, `Retry-After`,
//! `Location` and `Link` headers, and content type enforcement. It is
//! single use: send one request, read the response, drop it.
//!
//! [RFC 8555 §6]: https://datatracker.ietf.org/doc/html/rfc8555#section-6

use time::OffsetDateTime;

use crate::{
    crypto::{jose, KeyPair},
    error::{AcmeError, Result},
    http::{Headers, HttpResponse},
    json::{Json, JsonBuilder},
    login::Login,
    problem::Problem,
    session::Session,
};

pub(crate) const CONTENT_TYPE_JOSE: &str = "application/jose+json";
pub(crate) const CONTENT_TYPE_JSON: &str = "application/json";
pub(crate) const CONTENT_TYPE_PROBLEM: &str = "application/problem+json";
pub(crate) const CONTENT_TYPE_PEM_CHAIN: &str = "application/pem-certificate-chain";

/// Upper bound on signing attempts when the server keeps rejecting nonces.
const MAX_NONCE_ATTEMPTS: u32 = 10;

pub(crate) struct Connection {
    session: Session,
    request_url: Option<String>,
    response: Option<HttpResponse>,
}

impl Connection {
    pub(crate) fn new(session: &Session) -> Connection {
        Connection {
            session: session.clone(),
            request_url: None,
            response: None,
        }
    }

    /// Plain unsigned GET. Only used for the directory document.
    pub(crate) fn get(&mut self, url: &str) -> Result<()> {
        self.request_url = Some(url.to_owned());
        let headers = self.request_headers(CONTENT_TYPE_JSON, false);

        log::debug!("GET {url}");
        let response = self
            .session
            .transport()
            .request("GET", url, &headers, None)?;
        self.session.bank_nonce(response.header("replay-nonce"));

        if !response.is_success() {
            let problem = self.problem_of(&response, url);
            return Err(self.translate(problem, &response));
        }

        self.response = Some(response);
        Ok(())
    }

    /// Signed POST with the given payload, using the account URL as key ID.
    pub(crate) fn send_signed_request(
        &mut self,
        url: &str,
        payload: &JsonBuilder,
        login: &Login,
    ) -> Result<()> {
        self.send_jose(
            url,
            Some(payload.to_string()),
            login.key_pair(),
            Some(login.account_location()),
            CONTENT_TYPE_JSON,
        )
    }

    /// Signed POST carrying the full public key instead of a key ID.
    ///
    /// Used for newAccount and for revocations authorized by the
    /// certificate key.
    pub(crate) fn send_signed_request_with_key(
        &mut self,
        url: &str,
        payload: &JsonBuilder,
        key: &KeyPair,
    ) -> Result<()> {
        self.send_jose(url, Some(payload.to_string()), key, None, CONTENT_TYPE_JSON)
    }

    /// Authenticated read: a signed POST with an empty payload
    /// ([RFC 8555 §6.3]).
    ///
    /// [RFC 8555 §6.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.3
    pub(crate) fn post_as_get(&mut self, url: &str, login: &Login) -> Result<()> {
        self.send_jose(
            url,
            None,
            login.key_pair(),
            Some(login.account_location()),
            CONTENT_TYPE_JSON,
        )
    }

    /// POST-as-GET for a certificate chain.
    pub(crate) fn post_as_get_certificate(&mut self, url: &str, login: &Login) -> Result<()> {
        self.send_jose(
            url,
            None,
            login.key_pair(),
            Some(login.account_location()),
            CONTENT_TYPE_PEM_CHAIN,
        )
    }

    fn send_jose(
        &mut self,
        url: &str,
        payload: Option<String>,
        key: &KeyPair,
        kid: Option<&str>,
        accept: &str,
    ) -> Result<()> {
        self.request_url = Some(url.to_owned());
        let headers = self.request_headers(accept, true);

        let mut attempt = 1;
        loop {
            // each attempt consumes a nonce, one-shot per RFC 8555 §6.5
            let nonce = self.session.new_nonce()?;
            let body = jose::sign_request(url, Some(&nonce), payload.as_deref(), key, kid)?;

            log::debug!("POST {url}");
            let response = self
                .session
                .transport()
                .request("POST", url, &headers, Some(&body))?;
            self.session.bank_nonce(response.header("replay-nonce"));

            if response.is_success() {
                self.response = Some(response);
                return Ok(());
            }

            let problem = self.problem_of(&response, url);
            if problem.is_bad_nonce() && attempt < MAX_NONCE_ATTEMPTS {
                log::debug!("bad nonce, retrying with a fresh one");
                attempt += 1;
                continue;
            }

            return Err(self.translate(problem, &response));
        }
    }

    fn request_headers(&self, accept: &str, jose_body: bool) -> Headers {
        let mut headers = Headers::new();
        if jose_body {
            headers.push(("content-type".to_owned(), CONTENT_TYPE_JOSE.to_owned()));
        }
        headers.push(("accept".to_owned(), accept.to_owned()));
        if let Some(language) = &self.session.settings().accept_language {
            headers.push(("accept-language".to_owned(), language.clone()));
        }
        headers
    }

    /// Reads the problem document of an error response. Responses without a
    /// parseable problem body get a synthetic one, so the error taxonomy
    /// stays uniform.
    fn problem_of(&self, response: &HttpResponse, url: &str) -> Problem {
        if response.content_type().as_deref() == Some(CONTENT_TYPE_PROBLEM) {
            if let Ok(json) = Json::parse_bytes(&response.body) {
                return Problem::new(json, url);
            }
        }

        let mut json = JsonBuilder::new();
        json.put("type", "about:blank")
            .put("title", response.status_text.clone())
            .put("status", response.status)
            .put(
                "detail",
                format!("HTTP {} {}", response.status, response.status_text),
            );
        Problem::new(json.to_json(), url)
    }

    fn translate(&self, problem: Problem, response: &HttpResponse) -> AcmeError {
        if problem.is_rate_limited() {
            AcmeError::RateLimited {
                retry_after: retry_after_of(response),
                documents: self.links_of(response, "help"),
                problem,
            }
        } else if problem.is_user_action_required() {
            AcmeError::UserActionRequired {
                terms_of_service: self.links_of(response, "terms-of-service").into_iter().next(),
                problem,
            }
        } else {
            AcmeError::Server { problem }
        }
    }

    fn response(&self) -> Result<&HttpResponse> {
        self.response
            .as_ref()
            .ok_or_else(|| AcmeError::Protocol("no response received yet".to_owned()))
    }

    /// Reads the response body as JSON. Anything but `application/json` is a
    /// protocol violation.
    pub(crate) fn read_json_response(&self) -> Result<Json> {
        let response = self.response()?;
        match response.content_type().as_deref() {
            Some(CONTENT_TYPE_JSON) => Json::parse_bytes(&response.body),
            other => Err(AcmeError::Protocol(format!(
                "unexpected content type {}, expected {CONTENT_TYPE_JSON}",
                other.unwrap_or("(none)")
            ))),
        }
    }

    /// Reads the response body as a PEM certificate chain.
    pub(crate) fn read_certificates(&self) -> Result<String> {
        let response = self.response()?;
        match response.content_type().as_deref() {
            Some(CONTENT_TYPE_PEM_CHAIN) => Ok(response.body_text()),
            other => Err(AcmeError::Protocol(format!(
                "unexpected content type {}, expected {CONTENT_TYPE_PEM_CHAIN}",
                other.unwrap_or("(none)")
            ))),
        }
    }

    /// The `Location` header, resolved against the request URL.
    pub(crate) fn location(&self) -> Result<String> {
        let response = self.response()?;
        let location = response
            .header("location")
            .ok_or_else(|| AcmeError::Protocol("no Location header".to_owned()))?;
        Ok(self.resolve(location))
    }

    /// URLs of all `Link` headers with the given relation.
    pub(crate) fn links(&self, rel: &str) -> Vec<String> {
        match self.response() {
            Ok(response) => self.links_of(response, rel),
            Err(_) => Vec::new(),
        }
    }

    fn links_of(&self, response: &HttpResponse, rel: &str) -> Vec<String> {
        response
            .header_values("link")
            .flat_map(parse_link_header)
            .filter(|(_, rels)| rels.split_ascii_whitespace().any(|r| r == rel))
            .map(|(url, _)| self.resolve(&url))
            .collect()
    }

    /// The `Retry-After` header as an instant, supporting both the
    /// delta-seconds and the HTTP-date form.
    pub(crate) fn retry_after(&self) -> Option<OffsetDateTime> {
        retry_after_of(self.response().ok()?)
    }

    fn resolve(&self, reference: &str) -> String {
        let base = self.request_url.as_deref().unwrap_or_default();
        match url::Url::parse(base).and_then(|base| base.join(reference)) {
            Ok(resolved) => resolved.into(),
            Err(_) => reference.to_owned(),
        }
    }
}

fn retry_after_of(response: &HttpResponse) -> Option<OffsetDateTime> {
    let value = response.header("retry-after")?.trim();
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        let seconds: i64 = value.parse().ok()?;
        Some(OffsetDateTime::now_utc() + time::Duration::seconds(seconds))
    } else {
        httpdate::parse_http_date(value)
            .ok()
            .map(OffsetDateTime::from)
    }
}

/// Parses one `Link` header value into `(url, rel)` pairs.
fn parse_link_header(value: &str) -> Vec<(String, String)> {
    let mut links = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        let Some(end) = part.find('>') else { continue };
        let Some(url) = part.strip_prefix('<').map(|rest| &rest[..end - 1]) else {
            continue;
        };
        let rel = part[end + 1..]
            .split(';')
            .map(str::trim)
            .find_map(|param| param.strip_prefix("rel="))
            .map(|rel| rel.trim_matches('"').to_owned())
            .unwrap_or_default();
        links.push((url.to_owned(), rel));
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    fn response_with(headers: &[(&str, &str)]) -> HttpResponse {
        HttpResponse {
            status: 200,
            status_text: "OK".to_owned(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: Vec::new(),
        }
    }

    #[test]
    fn parses_link_headers() {
        let links = parse_link_header(
            "<https://example.com/acme/cert/1/1>;rel=\"alternate\", \
             <https://example.com/docs>;rel=\"help index\"",
        );
        assert_eq!(
            links,
            vec![
                (
                    "https://example.com/acme/cert/1/1".to_owned(),
                    "alternate".to_owned()
                ),
                ("https://example.com/docs".to_owned(), "help index".to_owned()),
            ]
        );
    }

    #[test]
    fn retry_after_delta_seconds() {
        let response = response_with(&[("retry-after", "120")]);
        let retry_after = retry_after_of(&response).unwrap();

        let delta = retry_after - OffsetDateTime::now_utc();
        assert!(delta > time::Duration::seconds(118));
        assert!(delta <= time::Duration::seconds(120));
    }

    #[test]
    fn retry_after_http_date() {
        let response = response_with(&[("retry-after", "Wed, 21 Oct 2065 07:28:00 GMT")]);
        let retry_after = retry_after_of(&response).unwrap();
        assert_eq!(retry_after.year(), 2065);
    }

    #[test]
    fn retry_after_absent_or_malformed() {
        assert_eq!(retry_after_of(&response_with(&[])), None);
        assert_eq!(
            retry_after_of(&response_with(&[("retry-after", "soonish")])),
            None
        );
    }

    const BAD_NONCE_PROBLEM: &str = r#"{
        "type": "urn:ietf:params:acme:error:badNonce",
        "detail": "JWS has an invalid anti-replay nonce"
    }"#;

    #[test]
    fn bad_nonce_is_retried_once_with_a_fresh_nonce() {
        let (login, transport) = test::login(vec![
            test::nonce_response("nonce-1"),
            test::problem_response(400, BAD_NONCE_PROBLEM).with_header("Replay-Nonce", "nonce-2"),
            test::json_response(200, r#"{"status": "valid"}"#),
        ]);

        let mut conn = login.session().connect();
        conn.post_as_get("https://example.com/acme/order/1", &login)
            .unwrap();
        assert_eq!(
            conn.read_json_response()
                .unwrap()
                .get("status")
                .as_string()
                .unwrap(),
            "valid"
        );

        let requests = transport.requests();
        let posts: Vec<_> = requests.iter().filter(|r| r.method == "POST").collect();
        assert_eq!(posts.len(), 2);

        // the retry used the nonce banked from the failed response
        assert_eq!(posts[0].jose_nonce().as_deref(), Some("nonce-1"));
        assert_eq!(posts[1].jose_nonce().as_deref(), Some("nonce-2"));
    }

    #[test]
    fn bad_nonce_storm_eventually_surfaces() {
        let mut script = vec![test::nonce_response("nonce-0")];
        for ix in 1..=MAX_NONCE_ATTEMPTS {
            script.push(
                test::problem_response(400, BAD_NONCE_PROBLEM)
                    .with_header("Replay-Nonce", &format!("nonce-{ix}")),
            );
        }
        let (login, transport) = test::login(script);

        let mut conn = login.session().connect();
        let err = conn
            .post_as_get("https://example.com/acme/order/1", &login)
            .unwrap_err();
        assert!(matches!(err, AcmeError::Server { .. }));

        let requests = transport.requests();
        let posts: Vec<_> = requests.iter().filter(|r| r.method == "POST").collect();
        assert_eq!(posts.len(), MAX_NONCE_ATTEMPTS as usize);

        // every attempt consumed a different nonce
        let mut nonces: Vec<_> = posts.iter().filter_map(|p| p.jose_nonce()).collect();
        nonces.sort();
        nonces.dedup();
        assert_eq!(nonces.len(), MAX_NONCE_ATTEMPTS as usize);
    }

    #[test]
    fn rate_limit_problems_carry_retry_after_and_documents() {
        let (login, _transport) = test::login(vec![
            test::nonce_response("n-1"),
            test::problem_response(
                429,
                r#"{
                    "type": "urn:ietf:params:acme:error:rateLimited",
                    "detail": "too many new orders"
                }"#,
            )
            .with_header("Retry-After", "3600")
            .with_header(
                "Link",
                "<https://example.com/docs/rate-limits>;rel=\"help\"",
            ),
        ]);

        let mut conn = login.session().connect();
        let err = conn
            .post_as_get("https://example.com/acme/new-order", &login)
            .unwrap_err();

        match err {
            AcmeError::RateLimited {
                retry_after,
                documents,
                problem,
            } => {
                assert!(retry_after.is_some());
                assert_eq!(documents, vec!["https://example.com/docs/rate-limits"]);
                assert_eq!(problem.to_string(), "too many new orders");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn user_action_required_carries_the_terms_of_service() {
        let (login, _transport) = test::login(vec![
            test::nonce_response("n-1"),
            test::problem_response(
                403,
                r#"{
                    "type": "urn:ietf:params:acme:error:userActionRequired",
                    "detail": "terms of service have changed",
                    "instance": "https://example.com/acme/agreement"
                }"#,
            )
            .with_header(
                "Link",
                "<https://example.com/acme/terms/2026>;rel=\"terms-of-service\"",
            ),
        ]);

        let mut conn = login.session().connect();
        let err = conn
            .post_as_get("https://example.com/acme/acct/1", &login)
            .unwrap_err();

        match err {
            AcmeError::UserActionRequired {
                terms_of_service,
                problem,
            } => {
                assert_eq!(
                    terms_of_service.as_deref(),
                    Some("https://example.com/acme/terms/2026")
                );
                assert_eq!(
                    problem.instance().as_deref(),
                    Some("https://example.com/acme/agreement")
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn responses_without_problem_body_become_synthetic_problems() {
        let (login, _transport) = test::login(vec![
            test::nonce_response("n-1"),
            crate::http::HttpResponse {
                status: 500,
                status_text: "Internal Server Error".to_owned(),
                headers: vec![("content-type".to_owned(), "text/html".to_owned())],
                body: b"<html>boom</html>".to_vec(),
            },
        ]);

        let mut conn = login.session().connect();
        let err = conn
            .post_as_get("https://example.com/acme/order/1", &login)
            .unwrap_err();

        match err {
            AcmeError::Server { problem } => {
                assert_eq!(problem.status(), Some(500));
                assert_eq!(problem.to_string(), "HTTP 500 Internal Server Error");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn json_reader_enforces_the_content_type() {
        let (login, _transport) = test::login(vec![
            test::nonce_response("n-1"),
            crate::http::HttpResponse {
                status: 200,
                status_text: "OK".to_owned(),
                headers: vec![("content-type".to_owned(), "text/plain".to_owned())],
                body: b"{}".to_vec(),
            },
        ]);

        let mut conn = login.session().connect();
        conn.post_as_get("https://example.com/acme/order/1", &login)
            .unwrap();

        let err = conn.read_json_response().unwrap_err();
        assert!(err.to_string().contains("unexpected content type"));
    }

    #[test]
    fn certificate_reader_enforces_the_content_type() {
        let (login, _transport) = test::login(vec![
            test::nonce_response("n-1"),
            test::json_response(200, "{}"),
        ]);

        let mut conn = login.session().connect();
        conn.post_as_get_certificate("https://example.com/acme/cert/1", &login)
            .unwrap();
        assert!(conn.read_certificates().is_err());
    }

    #[test]
    fn location_is_resolved_against_the_request_url() {
        let (login, _transport) = test::login(vec![
            test::nonce_response("n-1"),
            test::json_response(201, "{}").with_header("Location", "/acme/order/17"),
        ]);

        let mut conn = login.session().connect();
        conn.post_as_get("https://example.com/acme/new-order", &login)
            .unwrap();
        assert_eq!(
            conn.location().unwrap(),
            "https://example.com/acme/order/17"
        );
    }
}
