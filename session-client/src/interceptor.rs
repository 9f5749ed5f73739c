//! Request interception as a tower layer over the HTTP client.
//!
//! `SessionLayer` is registered once on a client at startup; every request it
//! wraps emits one activity signal when its cycle completes. A 401 from any
//! endpoint other than the renewal endpoint triggers one renewal and exactly
//! one reissue of the request with the new bearer. A second failure is
//! returned as is.

use std::sync::Arc;
use std::task::{Context, Poll};

use common_auth::{bearer_from_headers, bearer_header, role_hint, Role};
use common_observability::SessionMetrics;
use futures::future::{BoxFuture, FutureExt};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Request, RequestBuilder, Response, StatusCode};
use tower::{Layer, Service, ServiceExt};
use tracing::debug;

use crate::activity::{ActivitySource, ActivityTracker};
use crate::config::REFRESH_PATH;
use crate::error::SessionResult;
use crate::refresh::RefreshCoordinator;
use crate::store::CredentialStore;

#[derive(Clone)]
pub struct SessionLayer {
    shared: Arc<InterceptorShared>,
}

struct InterceptorShared {
    refresh: RefreshCoordinator,
    store: Arc<CredentialStore>,
    activity: ActivityTracker,
    metrics: Arc<SessionMetrics>,
}

impl SessionLayer {
    pub fn new(
        refresh: RefreshCoordinator,
        store: Arc<CredentialStore>,
        activity: ActivityTracker,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(InterceptorShared {
                refresh,
                store,
                activity,
                metrics,
            }),
        }
    }
}

impl<S> Layer<S> for SessionLayer {
    type Service = SessionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionService {
            inner,
            shared: self.shared.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SessionService<S> {
    inner: S,
    shared: Arc<InterceptorShared>,
}

impl<S> Service<Request> for SessionService<S>
where
    S: Service<Request, Response = Response, Error = reqwest::Error> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = reqwest::Error;
    type Future = BoxFuture<'static, Result<Response, reqwest::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // Keep the service that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let shared = self.shared.clone();

        async move {
            let replay = request.try_clone();
            let used = bearer_from_headers(request.headers()).ok();
            let renewal_call = request.url().path().ends_with(REFRESH_PATH);

            let result = match inner.call(request).await {
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED && !renewal_call => {
                    shared.recover(inner, response, replay, used).await
                }
                other => other,
            };
            shared.activity.record(ActivitySource::Request);
            result
        }
        .boxed()
    }
}

impl InterceptorShared {
    async fn recover<S>(
        &self,
        inner: S,
        original: Response,
        replay: Option<Request>,
        used: Option<String>,
    ) -> Result<Response, reqwest::Error>
    where
        S: Service<Request, Response = Response, Error = reqwest::Error>,
    {
        let Some(used) = used else {
            return Ok(original);
        };
        let Some(mut replay) = replay else {
            debug!("request body cannot be replayed; returning authorization failure");
            return Ok(original);
        };

        let request_role = self.store.role_of_token(&used).or_else(|| role_hint(&used));
        if let Some(role) = request_role {
            if self.store.lifecycle().state(role).is_terminated() {
                debug!(%role, "session already terminated; not renewing");
                self.metrics.retry("terminated");
                return Ok(original);
            }
        }
        let fresh = match self.already_renewed(&used, request_role) {
            Some(token) => token,
            None => match self.refresh.refresh(&used).await {
                Ok(token) => token,
                Err(err) => {
                    debug!(%err, "renewal unavailable; returning authorization failure");
                    self.metrics.retry("refresh_failed");
                    return Ok(original);
                }
            },
        };

        if let (Some(expected), Some(received)) = (request_role, role_hint(&fresh)) {
            if expected != received {
                debug!(%expected, %received, "renewed credential belongs to another role");
                self.metrics.retry("role_mismatch");
                return Ok(original);
            }
        }
        let Some(header) = bearer_header(&fresh) else {
            return Ok(original);
        };
        replay.headers_mut().insert(AUTHORIZATION, header);

        let response = inner.oneshot(replay).await;
        let outcome = match &response {
            Ok(response) if response.status().is_success() => "succeeded",
            _ => "failed",
        };
        self.metrics.retry(outcome);
        response
    }

    // A renewal that settled before this request's failure came back already
    // replaced the token in the store; reuse it instead of renewing again.
    fn already_renewed(&self, used: &str, role: Option<Role>) -> Option<String> {
        if self.refresh.in_flight() {
            return None;
        }
        let current = self.store.token(role?)?;
        (current != used).then_some(current)
    }
}

/// HTTP client whose requests go through the session layer.
#[derive(Clone)]
pub struct AuthorizedClient {
    client: Client,
    service: SessionService<Client>,
    store: Arc<CredentialStore>,
}

impl AuthorizedClient {
    pub fn new(client: Client, layer: &SessionLayer, store: Arc<CredentialStore>) -> Self {
        Self {
            service: layer.layer(client.clone()),
            client,
            store,
        }
    }

    /// Plain client for building requests.
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Send `builder`, attaching `role`'s bearer (or the generic session
    /// bearer) unless the request already carries one.
    pub async fn send(&self, role: Option<Role>, builder: RequestBuilder) -> SessionResult<Response> {
        let mut request = builder.build()?;
        if !request.headers().contains_key(AUTHORIZATION) {
            let token = match role {
                Some(role) => self.store.token(role),
                None => self.store.generic_token(),
            };
            if let Some(header) = token.as_deref().and_then(bearer_header) {
                request.headers_mut().insert(AUTHORIZATION, header);
            }
        }
        Ok(self.service.clone().oneshot(request).await?)
    }
}
