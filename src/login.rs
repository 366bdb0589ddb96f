use std::sync::Arc;

use crate::{
    account::Account,
    authorization::Authorization,
    certificate::Certificate,
    challenge::Challenge,
    crypto::KeyPair,
    error::Result,
    json::Json,
    order::Order,
    session::Session,
};

/// A [`Session`] login: the account URL paired with the account key.
///
/// All authenticated calls go through a login. It is immutable; replacing
/// the account key (see [`Account::key_change()`]) produces a new login.
/// Cloning is cheap, clones share the underlying session.
///
/// [`Account::key_change()`]: crate::account::Account::key_change()
#[derive(Clone)]
pub struct Login {
    inner: Arc<LoginInner>,
}

struct LoginInner {
    session: Session,
    account_location: String,
    key_pair: KeyPair,
}

impl Login {
    /// Creates a login for an existing account.
    ///
    /// Use [`AccountBuilder`] to register a new account, or to look up the
    /// account URL of a key pair via `only_return_existing`.
    ///
    /// [`AccountBuilder`]: crate::account::AccountBuilder
    pub fn new(session: Session, account_location: impl Into<String>, key_pair: KeyPair) -> Login {
        Login {
            inner: Arc::new(LoginInner {
                session,
                account_location: account_location.into(),
                key_pair,
            }),
        }
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// The account URL, used as `kid` in signed requests.
    pub fn account_location(&self) -> &str {
        &self.inner.account_location
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.inner.key_pair
    }

    /// The [`Account`] resource of this login.
    pub fn account(&self) -> Account {
        Account::bind(self.clone(), self.inner.account_location.clone())
    }

    /// Binds an [`Order`] resource by its URL. No data is fetched until a
    /// getter needs it.
    pub fn bind_order(&self, location: impl Into<String>) -> Order {
        Order::bind(self.clone(), location.into())
    }

    /// Binds an [`Authorization`] resource by its URL.
    pub fn bind_authorization(&self, location: impl Into<String>) -> Authorization {
        Authorization::bind(self.clone(), location.into())
    }

    /// Binds a [`Certificate`] resource by its URL.
    pub fn bind_certificate(&self, location: impl Into<String>) -> Certificate {
        Certificate::bind(self.clone(), location.into())
    }

    /// Creates the matching [`Challenge`] resource for a challenge JSON
    /// document, via the session's challenge registry.
    pub fn challenge(&self, data: Json) -> Result<Challenge> {
        self.inner.session.create_challenge(self, data)
    }

    /// Binds a [`Challenge`] resource by its URL.
    ///
    /// Unlike the other binders this fetches the challenge document right
    /// away, because the concrete challenge type is only known from the
    /// document itself.
    pub fn bind_challenge(&self, location: &str) -> Result<Challenge> {
        let mut conn = self.inner.session.connect();
        conn.post_as_get(location, self)?;
        self.challenge(conn.read_json_response()?)
    }
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("account_location", &self.inner.account_location)
            .finish_non_exhaustive()
    }
}
