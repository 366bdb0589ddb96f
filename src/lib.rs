//! A client library for ACME (Automatic Certificate Management Environment)
//! providers such as [Let's Encrypt](https://letsencrypt.org/).
//!
//! It implements the [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555)
//! protocol engine: accounts, orders, authorizations, challenges, and
//! certificate download/revocation, over a blocking HTTPS transport.
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use acme_kit::{
//!     challenge::Http01Challenge, create_p256_key, AccountBuilder, DirectoryUrl, Session,
//! };
//!
//! fn request_certificate() -> acme_kit::Result<()> {
//!     // Use DirectoryUrl::LetsEncryptStaging for dev/testing.
//!     let session = Session::new(DirectoryUrl::LetsEncrypt);
//!
//!     let account = AccountBuilder::new()
//!         .add_email("cert-admin@example.com")
//!         .agree_to_terms_of_service()
//!         .create(&session, create_p256_key())?;
//!
//!     let order = account.new_order().domain("example.org").create()?;
//!
//!     for authorization in order.authorizations()? {
//!         let challenge = authorization
//!             .find_challenge(Http01Challenge::TYPE)?
//!             .expect("CA offers http-01");
//!         let http01 = challenge.as_http01().unwrap();
//!
//!         // Serve the key authorization under
//!         // http://example.org/.well-known/acme-challenge/<token>,
//!         // then tell the CA to validate it.
//!         println!("serve {:?} at {}", http01.key_authorization()?, http01.well_known_path()?);
//!         challenge.trigger()?;
//!         challenge.wait_for_completion(Duration::from_secs(60))?;
//!     }
//!
//!     order.wait_until_ready(Duration::from_secs(60))?;
//!     let certificate_key = create_p256_key();
//!     order.execute_with_key(&certificate_key)?;
//!     order.wait_for_completion(Duration::from_secs(60))?;
//!
//!     let certificate = order.certificate()?;
//!     println!("{}", certificate.certificate_chain_pem()?);
//!     Ok(())
//! }
//! ```
//!
//! # Domain Ownership
//!
//! Before the CA issues a certificate, every identifier of the order must be
//! authorized by solving one of the offered challenges; which one fits
//! depends on what you control:
//!
//! - [`challenge::Http01Challenge`]: a file served by the domain's web
//!   server;
//! - [`challenge::Dns01Challenge`] (and its account scoped and persistent
//!   draft variants): a TXT record in the domain's DNS zone;
//! - [`challenge::TlsAlpn01Challenge`]: a special certificate served under
//!   the `acme-tls/1` ALPN protocol.
//!
//! # Rate Limits
//!
//! Providers enforce [rate limits]. Rate limit problems surface as
//! [`AcmeError::RateLimited`] with the instant the limit lifts. Use the
//! staging environment while developing.
//!
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

pub mod account;
pub mod authorization;
pub mod certificate;
pub mod challenge;
mod connection;
pub mod crypto;
mod error;
pub mod http;
mod identifier;
mod json;
mod login;
mod order;
mod problem;
mod resource;
pub mod session;
mod status;
mod util;

#[cfg(test)]
mod test;

pub use crate::{
    account::{Account, AccountBuilder},
    authorization::Authorization,
    certificate::{Certificate, RevocationReason},
    challenge::Challenge,
    crypto::{create_ed25519_key, create_p256_key, create_rsa_key, KeyPair},
    error::{AcmeError, Result},
    identifier::Identifier,
    json::{Json, JsonBuilder, Value},
    login::Login,
    order::{Order, OrderBuilder},
    problem::Problem,
    session::{DirectoryUrl, NetworkSettings, Session},
    status::Status,
};
