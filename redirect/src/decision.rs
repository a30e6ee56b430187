use crate::config::CookieConfig;
use crate::resolve::{first_segment, resolve_country_code};
use cookie::Cookie;
use http::header::{COOKIE, HOST};
use http::{HeaderMap, HeaderName, Request};
use regions::RegionSnapshot;
use uuid::Uuid;

const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// What to do with a storefront request.
#[derive(Debug, PartialEq)]
pub enum Decision {
    /// Pass the request to the upstream unchanged
    Forward,
    /// Answer with a 307 to `location`, optionally setting the cache id cookie
    Redirect {
        location: String,
        set_cookie: Option<String>,
    },
}

impl Decision {
    pub fn action(&self) -> &'static str {
        match self {
            Decision::Forward => "forward",
            Decision::Redirect {
                set_cookie: Some(_),
                ..
            } => "set_cookie",
            Decision::Redirect { .. } => "redirect",
        }
    }
}

/// The parts of a request the redirect decision looks at.
#[derive(Debug, Default)]
pub struct RequestView<'a> {
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub host: Option<&'a str>,
    pub scheme: &'a str,
    pub geo_country: Option<&'a str>,
    pub cache_id: Option<String>,
}

impl<'a> RequestView<'a> {
    pub fn from_request<B>(req: &'a Request<B>, geo_header: &HeaderName, cookie_name: &str) -> Self {
        let headers = req.headers();
        let header_str = |name: &HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

        let scheme = header_str(&X_FORWARDED_PROTO)
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or(req.uri().scheme_str())
            .unwrap_or("http");

        RequestView {
            path: req.uri().path(),
            query: req.uri().query().filter(|q| !q.is_empty()),
            host: header_str(&HOST).or(req.uri().authority().map(|a| a.as_str())),
            scheme,
            geo_country: header_str(geo_header).filter(|v| !v.is_empty()),
            cache_id: cookie_value(headers, cookie_name),
        }
    }

    /// Absolute URL on the request's own origin, or just the path when the
    /// request carries no host.
    fn location(&self, path: &str) -> String {
        let query = self.query.map(|q| format!("?{q}")).unwrap_or_default();
        match self.host {
            Some(host) => format!("{}://{host}{path}{query}", self.scheme),
            None => format!("{path}{query}"),
        }
    }
}

/// Value of the first cookie called `name` across all Cookie headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| Cookie::split_parse(v))
        .filter_map(Result::ok)
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
}

/// Set-Cookie value for the cache id cookie.
pub fn cache_id_cookie(config: &CookieConfig, cache_id: &str) -> String {
    let max_age = i64::try_from(config.max_age_secs).unwrap_or(i64::MAX);
    Cookie::build((config.name.clone(), cache_id.to_string()))
        .max_age(cookie::time::Duration::seconds(max_age))
        .path("/")
        .build()
        .to_string()
}

/// Decides whether `request` is forwarded or redirected.
///
/// A URL that already starts with the resolved country is forwarded once
/// the visitor carries a cache id; otherwise it is redirected to itself
/// while the cookie is set. Any other page URL is redirected under the
/// resolved country prefix. Paths with a dot are treated as files and
/// forwarded as is, as are requests for which no country resolves.
///
/// A URL carries the country only when its whole first segment equals the
/// resolved code, ignoring case: `/US/store` carries `us`, while
/// `/campus` and `/products/us` do not.
pub fn decide(
    request: &RequestView<'_>,
    snapshot: &RegionSnapshot,
    default_region: &str,
    cookie: &CookieConfig,
) -> Decision {
    let country = resolve_country_code(
        request.path,
        request.geo_country,
        snapshot,
        default_region,
    );

    let url_has_country = match (&country, first_segment(request.path)) {
        (Some(country), Some(segment)) => segment.eq_ignore_ascii_case(country),
        _ => false,
    };

    if url_has_country {
        if request.cache_id.is_some() {
            return Decision::Forward;
        }
        let cache_id = Uuid::new_v4().to_string();
        return Decision::Redirect {
            location: request.location(request.path),
            set_cookie: Some(cache_id_cookie(cookie, &cache_id)),
        };
    }

    if request.path.contains('.') {
        return Decision::Forward;
    }

    match country {
        Some(country) => {
            let rest = if request.path == "/" { "" } else { request.path };
            Decision::Redirect {
                location: request.location(&format!("/{country}{rest}")),
                set_cookie: None,
            }
        }
        None => Decision::Forward,
    }
}
