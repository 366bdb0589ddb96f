//! Shared plumbing of server-side resources: the location handle, the lazy
//! JSON cache, and the polling loop.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::{
    error::{AcmeError, Result},
    json::Json,
    login::Login,
    status::Status,
};

/// State shared by all JSON backed resources: the location URL, the cached
/// resource document, and the server's last `Retry-After` estimation.
///
/// The cache is filled lazily. Getters call [`ResourceState::json()`],
/// which fetches the document from the server on first use.
pub(crate) struct ResourceState {
    login: Login,
    location: String,
    data: Mutex<Option<Json>>,
    retry_after: Mutex<Option<OffsetDateTime>>,
}

impl ResourceState {
    /// Binds a resource by location only. The document is fetched when
    /// first needed.
    pub(crate) fn bind(login: Login, location: String) -> ResourceState {
        ResourceState {
            login,
            location,
            data: Mutex::new(None),
            retry_after: Mutex::new(None),
        }
    }

    /// Binds a resource that is already populated, e.g. from a creation
    /// response.
    pub(crate) fn of(login: Login, location: String, json: Json) -> ResourceState {
        let state = ResourceState::bind(login, location);
        state.set_json(json);
        state
    }

    pub(crate) fn login(&self) -> &Login {
        &self.login
    }

    pub(crate) fn location(&self) -> &str {
        &self.location
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.data.lock().is_some()
    }

    /// The resource document. Performs a [`ResourceState::fetch()`] if no
    /// data is cached yet; a failing fetch surfaces as
    /// [`AcmeError::LazyLoading`] naming the resource.
    pub(crate) fn json(&self, resource: &'static str) -> Result<Json> {
        if let Some(json) = &*self.data.lock() {
            return Ok(json.clone());
        }

        self.fetch().map_err(|err| AcmeError::LazyLoading {
            resource,
            source: Box::new(err),
        })?;

        self.data
            .lock()
            .clone()
            .ok_or_else(|| AcmeError::Protocol(format!("{resource} has no data")))
    }

    /// Fetches the current resource document via POST-as-GET and returns
    /// the server's `Retry-After` estimation, if it sent one.
    pub(crate) fn fetch(&self) -> Result<Option<OffsetDateTime>> {
        log::debug!("fetching {}", self.location);
        let mut conn = self.login.session().connect();
        conn.post_as_get(&self.location, &self.login)?;

        let json = conn.read_json_response()?;
        let retry_after = conn.retry_after();
        if let Some(instant) = retry_after {
            log::debug!("Retry-After: {instant}");
        }

        self.set_json(json);
        *self.retry_after.lock() = retry_after;
        Ok(retry_after)
    }

    /// Replaces the cached document, invalidating all derived state first.
    pub(crate) fn set_json(&self, json: Json) {
        self.invalidate();
        *self.data.lock() = Some(json);
    }

    /// Drops the cached document and the `Retry-After` estimation,
    /// enforcing a fetch on next access.
    pub(crate) fn invalidate(&self) {
        *self.data.lock() = None;
        *self.retry_after.lock() = None;
    }

    pub(crate) fn retry_after(&self) -> Option<OffsetDateTime> {
        *self.retry_after.lock()
    }
}

/// Fetches the resource and fails with [`AcmeError::RetryAfter`] if the
/// server signalled that it is still being processed.
pub(crate) fn update(state: &ResourceState, resource: &'static str) -> Result<()> {
    match state.fetch()? {
        None => Ok(()),
        Some(retry_after) => Err(AcmeError::RetryAfter {
            status: state
                .json(resource)?
                .get("status")
                .as_status()
                .unwrap_or(Status::Unknown),
            retry_after: Some(retry_after),
        }),
    }
}

/// Polls the resource until its status is one of `targets`.
///
/// The poll cadence follows the server's `Retry-After` estimation, with the
/// session's `poll_interval` as lower bound, and never sleeps beyond the
/// caller's deadline. When the deadline passes without reaching a target
/// status, [`AcmeError::RetryAfter`] carries the current status and the
/// server's last estimation.
pub(crate) fn wait_for_status(
    state: &ResourceState,
    resource: &'static str,
    targets: &[Status],
    timeout: Duration,
) -> Result<Status> {
    let poll_interval = state.login().session().settings().poll_interval;
    let deadline = Instant::now() + timeout;

    loop {
        let status = state.json(resource)?.get("status").as_status()?;
        if targets.contains(&status) {
            return Ok(status);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(AcmeError::RetryAfter {
                status,
                retry_after: state.retry_after(),
            });
        }

        let mut delay = poll_interval;
        if let Some(retry_after) = state.retry_after() {
            // a Retry-After in the past falls back to the minimum interval
            if let Ok(until) = Duration::try_from(retry_after - OffsetDateTime::now_utc()) {
                delay = delay.max(until);
            }
        }
        delay = delay.min(deadline - now);

        log::debug!("{resource} is {status}, next poll in {delay:?}");
        std::thread::sleep(delay);

        state.fetch()?;
    }
}
