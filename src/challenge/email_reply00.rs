use parking_lot::Mutex;

use crate::{
    challenge::ChallengeState,
    crypto::jose,
    error::{AcmeError, Result},
    json::{Json, JsonBuilder},
    login::Login,
};

/// The `email-reply-00` challenge ([RFC 8823]), used to validate email
/// addresses for S/MIME certificates.
///
/// The full challenge token is split in two: the first part arrives in the
/// subject of the challenge email, the second part is in the challenge
/// document. Reading the email and producing the signed S/MIME response is
/// outside the scope of this crate; this resource only computes the key
/// authorization and triggers the challenge once the caller supplies the
/// subject token via [`set_token_part1()`].
///
/// [`set_token_part1()`]: Self::set_token_part1
/// [RFC 8823]: https://datatracker.ietf.org/doc/html/rfc8823
pub struct EmailReply00Challenge {
    pub(super) inner: ChallengeState,
    token_part1: Mutex<Option<String>>,
}

impl EmailReply00Challenge {
    /// Challenge type name: `email-reply-00`
    pub const TYPE: &'static str = "email-reply-00";

    pub(crate) fn new(login: Login, data: Json) -> Result<EmailReply00Challenge> {
        Ok(EmailReply00Challenge {
            inner: ChallengeState::new(login, data, Some(Self::TYPE))?,
            token_part1: Mutex::new(None),
        })
    }

    /// The sender of the challenge email.
    pub fn from(&self) -> Result<Option<String>> {
        self.inner.json()?.get("from").map(|v| v.as_string())
    }

    /// The second part of the token, from the challenge document.
    pub fn token_part2(&self) -> Result<String> {
        self.inner.token()
    }

    /// Supplies the first part of the token, taken from the subject of the
    /// challenge email (the part after `ACME:`).
    pub fn set_token_part1(&self, token_part1: impl Into<String>) {
        *self.token_part1.lock() = Some(token_part1.into());
    }

    /// The full token: subject part and document part concatenated.
    pub fn token(&self) -> Result<String> {
        let part1 = self.token_part1.lock().clone().ok_or_else(|| {
            AcmeError::Protocol("token part 1 not set, read it from the challenge email".to_owned())
        })?;
        Ok(format!("{part1}{}", self.token_part2()?))
    }

    /// The key authorization over the full token.
    pub fn key_authorization(&self) -> Result<String> {
        Ok(jose::key_authorization(
            &self.token()?,
            self.inner.login().key_pair(),
        ))
    }

    /// The trigger payload of this challenge carries the key authorization.
    pub(crate) fn response_payload(&self) -> Result<JsonBuilder> {
        let mut payload = JsonBuilder::new();
        payload.put("keyAuthorization", self.key_authorization()?);
        Ok(payload)
    }
}
