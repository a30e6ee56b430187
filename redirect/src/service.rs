use crate::config::{Config, CookieConfig, ValidationError};
use crate::decision::{Decision, RequestView, decide};
use crate::errors::RedirectError;
use crate::matcher::PathMatcher;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS, UPSTREAM_ERRORS};
use bytes::Bytes;
use http::header::{LOCATION, SET_COOKIE};
use http::{HeaderName, Uri, Version};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::service::Service as HyperService;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use regions::RegionCache;
use shared::http::{add_via_header, filter_hop_by_hop, make_boxed_error_response};
use shared::{counter, histogram};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use url::Url;

type ResponseBody = BoxBody<Bytes, hyper::Error>;

/// Public storefront service. Redirects page requests under the visitor's
/// country prefix and forwards everything else to the upstream storefront.
#[derive(Clone)]
pub struct RedirectService {
    inner: Arc<Inner>,
}

struct Inner {
    cache: RegionCache,
    matcher: PathMatcher,
    cookie: CookieConfig,
    geo_header: HeaderName,
    upstream: Url,
    upstream_timeout: Duration,
    client: Client<HttpConnector, Incoming>,
}

impl RedirectService {
    pub fn new(config: &Config, cache: RegionCache) -> Result<Self, RedirectError> {
        config.validate()?;

        let geo_header = HeaderName::from_bytes(config.geo_header.as_bytes())
            .map_err(|_| ValidationError::InvalidGeoHeader(config.geo_header.clone()))?;

        let client: Client<_, Incoming> =
            Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            inner: Arc::new(Inner {
                cache,
                matcher: PathMatcher::new(config.excluded_prefixes.clone()),
                cookie: config.cookie.clone(),
                geo_header,
                upstream: config.upstream.clone(),
                upstream_timeout: config.upstream_timeout(),
                client,
            }),
        })
    }
}

impl Inner {
    async fn handle(&self, request: Request<Incoming>) -> Response<ResponseBody> {
        let start = Instant::now();

        let decision = if self.matcher.is_excluded(request.uri().path()) {
            Decision::Forward
        } else {
            let snapshot = self.cache.snapshot().await;
            let view = RequestView::from_request(&request, &self.geo_header, &self.cookie.name);
            decide(&view, &snapshot, self.cache.default_region(), &self.cookie)
        };

        let action = decision.action();
        tracing::debug!(path = request.uri().path(), action, "Handling request");
        counter!(REQUESTS, "action" => action).increment(1);

        let response = match decision {
            Decision::Forward => self.forward(request).await,
            Decision::Redirect {
                location,
                set_cookie,
            } => redirect_response(&location, set_cookie.as_deref()),
        };

        histogram!(REQUEST_DURATION, "action" => action).record(start.elapsed().as_secs_f64());
        response
    }

    async fn forward(&self, request: Request<Incoming>) -> Response<ResponseBody> {
        match self.send_to_upstream(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Forwarding to upstream failed");
                counter!(UPSTREAM_ERRORS).increment(1);
                make_boxed_error_response(e.status())
            }
        }
    }

    /// Sends `request` to the upstream with the path and query of the
    /// incoming request. The timeout covers the response head only; the
    /// body is streamed back to the client.
    async fn send_to_upstream(
        &self,
        request: Request<Incoming>,
    ) -> Result<Response<ResponseBody>, RedirectError> {
        let uri = self.upstream_uri(request.uri())?;

        let (mut parts, body) = request.into_parts();
        let version = parts.version;
        filter_hop_by_hop(&mut parts.headers, version);
        add_via_header(&mut parts.headers, version);
        parts.uri = uri;
        // Upstream connections are http/1
        parts.version = Version::HTTP_11;

        let response = timeout(
            self.upstream_timeout,
            self.client.request(Request::from_parts(parts, body)),
        )
        .await
        .map_err(|_| RedirectError::UpstreamTimeout)?
        .map_err(|e| RedirectError::UpstreamRequest(e.to_string()))?;

        let (mut parts, body) = response.into_parts();
        let version = parts.version;
        filter_hop_by_hop(&mut parts.headers, version);
        add_via_header(&mut parts.headers, version);

        Ok(Response::from_parts(parts, body.boxed()))
    }

    fn upstream_uri(&self, incoming: &Uri) -> Result<Uri, RedirectError> {
        let mut url = self.upstream.clone();
        url.set_path(incoming.path());
        url.set_query(incoming.query());
        Ok(url.as_str().parse()?)
    }
}

fn redirect_response(location: &str, set_cookie: Option<&str>) -> Response<ResponseBody> {
    let mut builder = Response::builder()
        .status(StatusCode::TEMPORARY_REDIRECT)
        .header(LOCATION, location);
    if let Some(cookie) = set_cookie {
        builder = builder.header(SET_COOKIE, cookie);
    }

    builder
        .body(Empty::new().map_err(|never| match never {}).boxed())
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, location, "Failed to build redirect response");
            make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        })
}

impl HyperService<Request<Incoming>> for RedirectService {
    type Response = Response<ResponseBody>;
    type Error = RedirectError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.handle(req).await) })
    }
}
