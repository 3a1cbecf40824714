//! Split `cache-control` into a client-facing and a shared-cache header.

use axum::http::{HeaderMap, HeaderValue, header::CACHE_CONTROL};

use crate::cache::Revalidate;
use crate::context::ContextSnapshot;

use super::{CDN_CACHE_CONTROL, HeaderConfig, HeaderError, RequestInfo, directives};

/// Explicit bound given to a bare `stale-while-revalidate`.
pub const ONE_YEAR_SECS: u64 = 31_536_000;
pub const DEFAULT_CLIENT_CACHE_CONTROL: &str = "public, max-age=0, must-revalidate";

const SHARED_ONLY_DIRECTIVES: [&str; 2] = ["s-maxage", "stale-while-revalidate"];

pub(crate) fn set_cache_control_headers(
    headers: &mut HeaderMap,
    request: &RequestInfo,
    context: Option<&ContextSnapshot>,
    config: &HeaderConfig,
) -> Result<(), HeaderError> {
    if !request.is_cacheable_method()
        || headers.contains_key(CDN_CACHE_CONTROL)
        || headers.contains_key(&config.shared_cache_control)
    {
        return Ok(());
    }

    if let Some(revalidate) = context.and_then(|snapshot| snapshot.route_handler_revalidate) {
        let shared = match revalidate {
            Revalidate::Never => format!("public, max-age={ONE_YEAR_SECS}, must-revalidate"),
            Revalidate::After(secs) => {
                format!("s-maxage={secs}, stale-while-revalidate={ONE_YEAR_SECS}")
            }
        };
        headers.insert(
            config.shared_cache_control.clone(),
            HeaderValue::from_str(&shared)?,
        );
        return Ok(());
    }

    let Some(original) = headers.get(CACHE_CONTROL) else {
        return Ok(());
    };
    let parsed = directives::parse(original.to_str()?);

    let client = directives::render(
        parsed
            .iter()
            .filter(|directive| !SHARED_ONLY_DIRECTIVES.contains(&directive.name.as_str())),
    );

    let shared = parsed
        .iter()
        .map(|directive| {
            if directive.name == "stale-while-revalidate" && directive.value.is_none() {
                format!("stale-while-revalidate={ONE_YEAR_SECS}")
            } else {
                directive.render()
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let client = if client.is_empty() {
        DEFAULT_CLIENT_CACHE_CONTROL.to_string()
    } else {
        client
    };

    headers.insert(CACHE_CONTROL, HeaderValue::from_str(&client)?);
    headers.insert(
        config.shared_cache_control.clone(),
        HeaderValue::from_str(&shared)?,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::http::Method;

    use super::*;

    fn translate(cache_control: &str, method: Method) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_str(cache_control).unwrap());
        set_cache_control_headers(
            &mut headers,
            &RequestInfo::new(method, "/"),
            None,
            &HeaderConfig::default(),
        )
        .unwrap();
        headers
    }

    fn shared(headers: &HeaderMap) -> Option<&str> {
        headers
            .get(&HeaderConfig::default().shared_cache_control)
            .and_then(|value| value.to_str().ok())
    }

    #[test]
    fn shared_directives_move_to_the_shared_header() {
        let headers = translate(
            "public, s-maxage=604800, stale-while-revalidate=86400",
            Method::GET,
        );
        assert_eq!(headers[CACHE_CONTROL], "public");
        assert_eq!(
            shared(&headers),
            Some("public, s-maxage=604800, stale-while-revalidate=86400")
        );
    }

    #[test]
    fn bare_stale_while_revalidate_gets_one_year() {
        let headers = translate("s-maxage=60, stale-while-revalidate", Method::GET);
        assert_eq!(headers[CACHE_CONTROL], DEFAULT_CLIENT_CACHE_CONTROL);
        assert_eq!(
            shared(&headers),
            Some("s-maxage=60, stale-while-revalidate=31536000")
        );
    }

    #[test]
    fn non_cacheable_methods_are_untouched() {
        let headers = translate("s-maxage=60", Method::POST);
        assert_eq!(headers[CACHE_CONTROL], "s-maxage=60");
        assert_eq!(shared(&headers), None);
    }

    #[test]
    fn existing_override_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("s-maxage=60"));
        headers.insert(CDN_CACHE_CONTROL, HeaderValue::from_static("max-age=10"));
        set_cache_control_headers(
            &mut headers,
            &RequestInfo::new(Method::GET, "/"),
            None,
            &HeaderConfig::default(),
        )
        .unwrap();
        assert_eq!(headers[CACHE_CONTROL], "s-maxage=60");
        assert_eq!(shared(&headers), None);
    }

    #[test]
    fn route_handler_revalidate_sets_shared_header_only() {
        let snapshot = ContextSnapshot {
            route_handler_revalidate: Some(Revalidate::After(30)),
            ..Default::default()
        };
        let mut headers = HeaderMap::new();
        set_cache_control_headers(
            &mut headers,
            &RequestInfo::new(Method::HEAD, "/api/feed"),
            Some(&snapshot),
            &HeaderConfig::default(),
        )
        .unwrap();
        assert!(!headers.contains_key(CACHE_CONTROL));
        assert_eq!(
            shared(&headers),
            Some("s-maxage=30, stale-while-revalidate=31536000")
        );

        let snapshot = ContextSnapshot {
            route_handler_revalidate: Some(Revalidate::Never),
            ..Default::default()
        };
        let mut headers = HeaderMap::new();
        set_cache_control_headers(
            &mut headers,
            &RequestInfo::new(Method::GET, "/api/feed"),
            Some(&snapshot),
            &HeaderConfig::default(),
        )
        .unwrap();
        assert_eq!(
            shared(&headers),
            Some("public, max-age=31536000, must-revalidate")
        );
    }

    #[test]
    fn no_cache_control_means_no_shared_header() {
        let mut headers = HeaderMap::new();
        set_cache_control_headers(
            &mut headers,
            &RequestInfo::new(Method::GET, "/"),
            None,
            &HeaderConfig::default(),
        )
        .unwrap();
        assert!(headers.is_empty());
    }
}
