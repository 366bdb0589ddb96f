use std::io::Read as _;

use crate::{
    error::{AcmeError, Result},
    session::NetworkSettings,
};

/// Header name/value pairs of a request.
pub type Headers = Vec<(String, String)>;

/// The HTTP client used to reach the ACME provider.
///
/// The crate ships a [ureq] based implementation and uses it by default.
/// Implement this trait to swap in another client, e.g. one with a custom
/// trust store, or a scripted one for tests.
///
/// Implementations must return error responses (4xx/5xx) as an
/// [`HttpResponse`] and only fail with [`AcmeError::Network`] when no
/// response was received at all. Redirects must not be followed.
///
/// [ureq]: https://docs.rs/ureq
pub trait HttpTransport: Send + Sync {
    fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<HttpResponse>;
}

/// A complete HTTP response: status, headers, and the full body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    /// Header pairs with lowercased names. Repeated headers (e.g. `Link`)
    /// appear once per value.
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// The first value of the given header, name matched case insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).next()
    }

    /// All values of the given header.
    pub fn header_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// The media type of the body, without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        let value = self.header("content-type")?;
        let media_type = value.split(';').next().unwrap_or(value);
        Some(media_type.trim().to_ascii_lowercase())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Adds a header, name lowercased. Useful when assembling responses in
    /// a custom transport.
    pub fn with_header(mut self, name: &str, value: &str) -> HttpResponse {
        self.headers.push((name.to_ascii_lowercase(), value.to_owned()));
        self
    }
}

/// Default transport, backed by a blocking [`ureq::Agent`].
pub(crate) struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub(crate) fn new(settings: &NetworkSettings) -> UreqTransport {
        UreqTransport {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(settings.connect_timeout)
                .timeout_read(settings.read_timeout)
                .timeout_write(settings.read_timeout)
                .user_agent(&settings.user_agent)
                .redirects(0)
                .build(),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<HttpResponse> {
        let mut request = self.agent.request(method, url);
        for (name, value) in headers {
            request = request.set(name, value);
        }

        log::trace!("{method} {url}");

        let result = match body {
            Some(body) => request.send_string(body),
            None => request.call(),
        };

        let response = match result {
            Ok(response) => response,
            // error statuses still carry a response we must inspect
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => {
                return Err(AcmeError::Network(err.to_string()));
            }
        };

        let status = response.status();
        let status_text = response.status_text().to_owned();

        let mut collected = Headers::new();
        for name in response.headers_names() {
            for value in response.all(&name) {
                collected.push((name.to_ascii_lowercase(), value.to_owned()));
            }
        }

        // the server sometimes closes the TLS connection abruptly even
        // though the body was fully received
        let mut body = Vec::new();
        response.into_reader().read_to_end(&mut body).ok();

        Ok(HttpResponse {
            status,
            status_text,
            headers: collected,
            body,
        })
    }
}
