//! HTTP session shared between the negotiation layer and the transport.
//!
//! A [`Session`] owns the outbound headers, the cookie jar and an optional
//! [`Authenticator`] hook. The transport reads it on every connection attempt, so
//! header or cookie changes made between connects (e.g. a refreshed bearer token)
//! are picked up by the next reconnect.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as ReqwestClient, Method};
/// Secret string type that redacts values in debug output.
pub use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::Result;
use crate::error::Error;

/// Mutable view over the session's headers handed to an [`Authenticator`].
///
/// Changes made through the loader are stored in the [`Session`] and persist for every later
/// request and connection attempt.
pub struct HeadersLoader<'hdr> {
    headers: &'hdr mut HeaderMap,
}

impl<'hdr> HeadersLoader<'hdr> {
    pub(crate) fn new(headers: &'hdr mut HeaderMap) -> Self {
        Self { headers }
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.headers
    }

    /// Insert (or replace) a header, validating both name and value.
    pub fn insert(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.insert(name, value);
        Ok(())
    }
}

/// Authentication hook run right before the session's headers are read.
///
/// The hook edits a copy of the session's headers that is stored back once it returns, so it
/// may read the [`Session`] it belongs to.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, loader: &mut HeadersLoader<'_>) -> Result<()>;
}

impl<F> Authenticator for F
where
    F: Fn(&mut HeadersLoader<'_>) -> Result<()> + Send + Sync + 'static,
{
    fn authenticate(&self, loader: &mut HeadersLoader<'_>) -> Result<()> {
        self(loader)
    }
}

/// Injects `Authorization: Bearer <token>` on every request.
#[derive(Clone, Debug)]
pub struct BearerToken {
    token: SecretString,
}

impl BearerToken {
    #[must_use]
    pub fn new(token: String) -> Self {
        Self {
            token: SecretString::from(token),
        }
    }
}

impl Authenticator for BearerToken {
    fn authenticate(&self, loader: &mut HeadersLoader<'_>) -> Result<()> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))?;
        value.set_sensitive(true);
        loader
            .headers_mut()
            .insert(reqwest::header::AUTHORIZATION, value);
        Ok(())
    }
}

/// Headers and cookies projected from a [`Session`] for a single connection attempt.
#[non_exhaustive]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub headers: HeaderMap,
    /// `name=value` pairs joined by `"; "`; empty when the jar is empty
    pub cookie: String,
}

impl ConnectParams {
    /// Headers formatted as `"name: value"` lines. Bytes that are not UTF-8 are replaced.
    #[must_use]
    pub fn header_lines(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|(name, value)| format!("{name}: {}", String::from_utf8_lossy(value.as_bytes())))
            .collect()
    }
}

/// Shared HTTP session state: headers, cookies, an optional auth hook and an HTTP client.
pub struct Session {
    client: ReqwestClient,
    headers: RwLock<HeaderMap>,
    cookies: RwLock<Vec<(String, String)>>,
    auth: Option<Arc<dyn Authenticator>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("headers", &self.headers)
            .field("cookies", &self.cookies.read().map(|c| c.len()))
            .field("auth", &self.auth.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(ReqwestClient::new())
    }
}

impl Session {
    #[must_use]
    pub fn new(client: ReqwestClient) -> Self {
        Self {
            client,
            headers: RwLock::new(HeaderMap::new()),
            cookies: RwLock::new(Vec::new()),
            auth: None,
        }
    }

    #[must_use]
    pub fn with_auth<A: Authenticator>(mut self, auth: A) -> Self {
        self.auth = Some(Arc::new(auth));
        self
    }

    /// Like [`Session::with_auth`] for a plain closure.
    #[must_use]
    pub fn with_auth_fn<F>(self, hook: F) -> Self
    where
        F: Fn(&mut HeadersLoader<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.with_auth(hook)
    }

    /// Insert (or replace) an outbound header.
    pub fn insert_header(&self, name: &str, value: &str) -> Result<()> {
        let mut headers = self.headers.write().unwrap_or_else(PoisonError::into_inner);
        HeadersLoader::new(&mut headers).insert(name, value)
    }

    /// Snapshot of the current headers, without running the auth hook.
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set a cookie, replacing any previous value under the same name in place.
    pub fn set_cookie(&self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() || name.contains(['=', ';']) {
            return Err(Error::validation(format!("invalid cookie name `{name}`")));
        }

        let mut cookies = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        match cookies.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => value.clone_into(&mut entry.1),
            None => cookies.push((name.to_owned(), value.to_owned())),
        }
        Ok(())
    }

    pub fn remove_cookie(&self, name: &str) -> Option<String> {
        let mut cookies = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        let index = cookies.iter().position(|(existing, _)| existing == name)?;
        Some(cookies.remove(index).1)
    }

    #[must_use]
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Project the session's current headers and cookies.
    ///
    /// The [`Authenticator`] hook, if any, runs first on a copy of the headers, and the copy
    /// replaces the session's headers once the hook succeeds, so whatever it injects is both
    /// returned here and kept in the session. Nothing is cached: every call reflects the state
    /// at call time.
    pub fn project(&self) -> Result<ConnectParams> {
        let mut headers = self.headers();

        if let Some(auth) = &self.auth {
            auth.authenticate(&mut HeadersLoader::new(&mut headers))?;
            *self.headers.write().unwrap_or_else(PoisonError::into_inner) = headers.clone();
        }

        let cookie = self
            .cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");

        Ok(ConnectParams { headers, cookie })
    }

    /// Issue a GET with the session's projected headers and cookies.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self), fields(path = url.path(), status_code))
    )]
    pub async fn get(&self, url: &Url) -> Result<()> {
        let params = self.project()?;

        let mut headers = params.headers;
        if !params.cookie.is_empty() {
            headers.insert(COOKIE, HeaderValue::from_str(&params.cookie)?);
        }

        let response = self
            .client
            .request(Method::GET, url.clone())
            .headers(headers)
            .send()
            .await?;
        let status_code = response.status();

        #[cfg(feature = "tracing")]
        tracing::Span::current().record("status_code", status_code.as_u16());

        if !status_code.is_success() {
            let message = response.text().await.unwrap_or_default();

            #[cfg(feature = "tracing")]
            tracing::warn!(status = %status_code, path = url.path(), %message, "GET request failed");

            return Err(Error::status(
                status_code,
                Method::GET,
                url.path().to_owned(),
                message,
            ));
        }

        Ok(())
    }
}
