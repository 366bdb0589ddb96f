use crate::{challenge::ChallengeState, error::Result, json::Json, login::Login};

/// The `http-01` challenge ([RFC 8555 §8.3]).
///
/// Validation fetches the key authorization from a well-known URI of the
/// domain, over plain HTTP on port 80:
///
/// ```text
/// http://<domain>/.well-known/acme-challenge/<token>
/// ```
///
/// Serve [`key_authorization()`] there as `text/plain`, then
/// [`trigger()`][crate::challenge::Challenge::trigger] the challenge.
///
/// [`key_authorization()`]: Self::key_authorization
/// [RFC 8555 §8.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.3
pub struct Http01Challenge {
    pub(super) inner: ChallengeState,
}

impl std::fmt::Debug for Http01Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http01Challenge").finish_non_exhaustive()
    }
}

impl Http01Challenge {
    /// Challenge type name: `http-01`
    pub const TYPE: &'static str = "http-01";

    pub(crate) fn new(login: Login, data: Json) -> Result<Http01Challenge> {
        Ok(Http01Challenge {
            inner: ChallengeState::new(login, data, Some(Self::TYPE))?,
        })
    }

    /// The challenge token, used as file name of the well-known URI.
    pub fn token(&self) -> Result<String> {
        self.inner.token()
    }

    /// The content to be served: the key authorization of the token.
    pub fn key_authorization(&self) -> Result<String> {
        self.inner.key_authorization()
    }

    /// The absolute path of the resource to serve, e.g.
    /// `/.well-known/acme-challenge/<token>`.
    pub fn well_known_path(&self) -> Result<String> {
        Ok(format!("/.well-known/acme-challenge/{}", self.token()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn provides_token_and_key_authorization() {
        let (login, _transport) = test::login(vec![]);
        let challenge =
            Http01Challenge::new(login, Json::parse(test::HTTP01_CHALLENGE_JSON).unwrap()).unwrap();

        assert_eq!(
            challenge.token().unwrap(),
            "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJyPCt92wr-oA"
        );
        // token "." base64url(SHA-256 thumbprint of the account key)
        assert_eq!(
            challenge.key_authorization().unwrap(),
            "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJyPCt92wr-oA.mBnSG6Fz3K73ysAu4MA28cyaHhhS37Xow9ViM1O8sRQ"
        );
        assert_eq!(
            challenge.well_known_path().unwrap(),
            "/.well-known/acme-challenge/evaGxfADs6pSRb2LAv9IZf17Dt3juxGJyPCt92wr-oA"
        );
    }
}
