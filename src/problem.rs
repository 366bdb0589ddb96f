use std::fmt;

use crate::{identifier::Identifier, json::Json};

/// Prefix of the ACME error namespace.
const ACME_ERROR_PREFIX: &str = "urn:ietf:params:acme:error:";

/// A problem document, as defined in [RFC 7807], with the ACME specific
/// members from [RFC 8555 §6.7].
///
/// # Example JSON
///
/// ```json
/// {
///   "type": "urn:ietf:params:acme:error:malformed",
///   "detail": "Some of the identifiers requested were rejected",
///   "subproblems": [
///     {
///       "type": "urn:ietf:params:acme:error:malformed",
///       "detail": "Invalid underscore in DNS name \"_example.org\"",
///       "identifier": { "type": "dns", "value": "_example.org" }
///     }
///   ]
/// }
/// ```
///
/// [RFC 7807]: https://datatracker.ietf.org/doc/html/rfc7807
/// [RFC 8555 §6.7]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.7
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    json: Json,
    base_url: String,
}

impl Problem {
    pub(crate) fn new(json: Json, base_url: &str) -> Problem {
        Problem {
            json,
            base_url: base_url.to_owned(),
        }
    }

    /// The problem type URI. Defaults to `about:blank` when the server sent
    /// no type.
    pub fn type_uri(&self) -> String {
        self.json
            .get("type")
            .as_string()
            .unwrap_or_else(|_| "about:blank".to_owned())
    }

    /// The error name within the ACME error namespace, e.g. `"badNonce"`.
    ///
    /// Empty if the problem type is not an ACME error URN.
    pub fn acme_error(&self) -> Option<String> {
        self.type_uri()
            .strip_prefix(ACME_ERROR_PREFIX)
            .map(str::to_owned)
    }

    /// A short, human-readable summary of the problem.
    pub fn title(&self) -> Option<String> {
        self.json.get("title").as_string().ok()
    }

    /// A detailed, human-readable explanation specific to this occurrence.
    pub fn detail(&self) -> Option<String> {
        self.json.get("detail").as_string().ok()
    }

    /// The HTTP status code the server associated with this problem.
    pub fn status(&self) -> Option<u16> {
        self.json
            .get("status")
            .as_int()
            .ok()
            .and_then(|s| u16::try_from(s).ok())
    }

    /// A URI the user should visit for further instructions, resolved
    /// against the URL of the request that produced this problem.
    pub fn instance(&self) -> Option<String> {
        let instance = self.json.get("instance").as_string().ok()?;
        match url::Url::parse(&self.base_url).and_then(|base| base.join(&instance)) {
            Ok(resolved) => Some(resolved.into()),
            Err(_) => Some(instance),
        }
    }

    /// The identifier this problem relates to, if the server sent one.
    pub fn identifier(&self) -> Option<Identifier> {
        self.json.get("identifier").as_identifier().ok()
    }

    /// Further problems, e.g. one per rejected identifier of an order.
    pub fn subproblems(&self) -> Vec<Problem> {
        self.json
            .get("subproblems")
            .as_array()
            .unwrap_or_default()
            .iter()
            .filter_map(|value| value.as_object().ok())
            .map(|json| Problem::new(json, &self.base_url))
            .collect()
    }

    /// The raw problem document.
    pub fn json(&self) -> &Json {
        &self.json
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.acme_error().as_deref() == Some("badNonce")
    }

    pub fn is_rate_limited(&self) -> bool {
        self.acme_error().as_deref() == Some("rateLimited")
    }

    pub fn is_user_action_required(&self) -> bool {
        self.acme_error().as_deref() == Some("userActionRequired")
    }
}

/// Prefers the most specific description the server provided.
impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(detail) = self.detail() {
            write!(f, "{detail}")
        } else if let Some(title) = self.title() {
            write!(f, "{title}")
        } else {
            write!(f, "{}", self.type_uri())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.com/acme/order/123";

    fn problem(doc: &str) -> Problem {
        Problem::new(Json::parse(doc).unwrap(), BASE)
    }

    #[test]
    fn reads_standard_members() {
        let problem = problem(
            r#"{
                "type": "urn:ietf:params:acme:error:rateLimited",
                "title": "Too many requests",
                "detail": "Rate limit for new orders exceeded",
                "status": 429,
                "instance": "/documents/rate-limits"
            }"#,
        );

        assert_eq!(problem.type_uri(), "urn:ietf:params:acme:error:rateLimited");
        assert_eq!(problem.acme_error().as_deref(), Some("rateLimited"));
        assert!(problem.is_rate_limited());
        assert_eq!(problem.title().as_deref(), Some("Too many requests"));
        assert_eq!(problem.status(), Some(429));
        assert_eq!(
            problem.instance().as_deref(),
            Some("https://example.com/documents/rate-limits")
        );
        assert_eq!(problem.to_string(), "Rate limit for new orders exceeded");
    }

    #[test]
    fn display_falls_back_to_title_and_type() {
        let problem_with_title = problem(r#"{"type": "urn:ietf:params:acme:error:badCSR", "title": "CSR invalid"}"#);
        assert_eq!(problem_with_title.to_string(), "CSR invalid");

        let problem_without_title = problem(r#"{"type": "urn:ietf:params:acme:error:badCSR"}"#);
        assert_eq!(problem_without_title.to_string(), "urn:ietf:params:acme:error:badCSR");

        let empty_problem = problem("{}");
        assert_eq!(empty_problem.type_uri(), "about:blank");
        assert_eq!(empty_problem.acme_error(), None);
    }

    #[test]
    fn collects_subproblems() {
        let problem = problem(
            r#"{
                "type": "urn:ietf:params:acme:error:malformed",
                "detail": "Some identifiers were rejected",
                "subproblems": [
                    {
                        "type": "urn:ietf:params:acme:error:rejectedIdentifier",
                        "detail": "invalid underscore",
                        "identifier": {"type": "dns", "value": "_example.org"}
                    },
                    {
                        "type": "urn:ietf:params:acme:error:unsupportedIdentifier",
                        "detail": "no wildcards"
                    }
                ]
            }"#,
        );

        let subproblems = problem.subproblems();
        assert_eq!(subproblems.len(), 2);
        assert_eq!(
            subproblems[0].acme_error().as_deref(),
            Some("rejectedIdentifier")
        );
        assert_eq!(
            subproblems[0].identifier().unwrap().value(),
            "_example.org"
        );
        assert_eq!(subproblems[1].identifier(), None);
    }
}
