//! Shared-cache vary directive: `header=a|b,language=en|fr,cookie=c|d`.

use axum::http::{HeaderMap, HeaderValue, header::VARY};

use super::{HeaderConfig, HeaderError, RequestInfo};

pub const PREVIEW_BYPASS_COOKIE: &str = "__prerender_bypass";
pub const PREVIEW_DATA_COOKIE: &str = "__next_preview_data";
pub const LOCALE_COOKIE: &str = "NEXT_LOCALE";

#[derive(Debug, Default, PartialEq, Eq)]
struct VaryValues {
    header: Vec<String>,
    language: Vec<String>,
    cookie: Vec<String>,
    /// Sections written by the origin that this layer does not compute.
    extra: Vec<(String, Vec<String>)>,
}

impl VaryValues {
    fn section_mut(&mut self, name: &str) -> &mut Vec<String> {
        match name {
            "header" => &mut self.header,
            "language" => &mut self.language,
            "cookie" => &mut self.cookie,
            other => {
                let index = match self.extra.iter().position(|(name, _)| name == other) {
                    Some(index) => index,
                    None => {
                        self.extra.push((other.to_string(), Vec::new()));
                        self.extra.len() - 1
                    }
                };
                &mut self.extra[index].1
            }
        }
    }

    /// Merge a previously rendered vary value.
    fn merge_rendered(&mut self, rendered: &str) {
        for section in rendered.split(',') {
            let Some((name, values)) = section.trim().split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let target = self.section_mut(name);
            for value in values.split('|') {
                push_unique(target, value);
            }
        }
    }

    fn render(&self) -> String {
        [
            ("header", &self.header),
            ("language", &self.language),
            ("cookie", &self.cookie),
        ]
        .into_iter()
        .chain(self.extra.iter().map(|(name, values)| (name.as_str(), values)))
        .filter(|(_, values)| !values.is_empty())
        .map(|(name, values)| format!("{name}={}", values.join("|")))
        .collect::<Vec<_>>()
        .join(",")
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() && !values.iter().any(|existing| existing == value) {
        values.push(value.to_string());
    }
}

pub(crate) fn set_vary_headers(
    headers: &mut HeaderMap,
    request: &RequestInfo,
    config: &HeaderConfig,
) -> Result<(), HeaderError> {
    let mut values = VaryValues::default();

    if let Some(existing) = headers.get(&config.shared_vary) {
        values.merge_rendered(existing.to_str()?);
    }

    for vary in headers.get_all(VARY) {
        for name in vary.to_str()?.split(',') {
            push_unique(&mut values.header, &name.to_ascii_lowercase());
        }
    }
    push_unique(&mut values.header, config.debug_header.as_str());

    push_unique(&mut values.cookie, PREVIEW_BYPASS_COOKIE);
    push_unique(&mut values.cookie, PREVIEW_DATA_COOKIE);

    if let Some(i18n) = config.i18n.as_ref() {
        let at_root = request.path == "/"
            || config.base_path.as_deref() == Some(request.path.as_str());
        if i18n.locale_detection && at_root {
            for locale in &i18n.locales {
                push_unique(&mut values.language, locale);
            }
            push_unique(&mut values.cookie, LOCALE_COOKIE);
        }
    }

    headers.insert(
        config.shared_vary.clone(),
        HeaderValue::from_str(&values.render())?,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::http::Method;

    use super::*;
    use crate::headers::I18nConfig;

    fn i18n_config() -> HeaderConfig {
        HeaderConfig {
            base_path: Some("/docs".to_string()),
            i18n: Some(I18nConfig {
                locales: vec!["en".to_string(), "fr".to_string()],
                locale_detection: true,
            }),
            ..HeaderConfig::default()
        }
    }

    fn vary(headers: &HeaderMap, config: &HeaderConfig) -> String {
        headers[&config.shared_vary].to_str().unwrap().to_string()
    }

    #[test]
    fn origin_vary_and_preview_cookies_are_included() {
        let config = HeaderConfig::default();
        let mut headers = HeaderMap::new();
        headers.append(VARY, HeaderValue::from_static("Accept, RSC"));
        headers.append(VARY, HeaderValue::from_static("accept"));

        set_vary_headers(&mut headers, &RequestInfo::new(Method::GET, "/blog"), &config)
            .unwrap();

        assert_eq!(
            vary(&headers, &config),
            "header=accept|rsc|x-debug-logging,cookie=__prerender_bypass|__next_preview_data"
        );
    }

    #[test]
    fn locales_only_apply_at_root_or_base_path() {
        let config = i18n_config();

        for path in ["/", "/docs"] {
            let mut headers = HeaderMap::new();
            set_vary_headers(&mut headers, &RequestInfo::new(Method::GET, path), &config)
                .unwrap();
            assert_eq!(
                vary(&headers, &config),
                "header=x-debug-logging,language=en|fr,cookie=__prerender_bypass|__next_preview_data|NEXT_LOCALE"
            );
        }

        let mut headers = HeaderMap::new();
        set_vary_headers(
            &mut headers,
            &RequestInfo::new(Method::GET, "/docs/intro"),
            &config,
        )
        .unwrap();
        assert!(!vary(&headers, &config).contains("language="));
    }

    #[test]
    fn disabled_locale_detection_skips_languages() {
        let mut config = i18n_config();
        if let Some(i18n) = config.i18n.as_mut() {
            i18n.locale_detection = false;
        }
        let mut headers = HeaderMap::new();
        set_vary_headers(&mut headers, &RequestInfo::new(Method::GET, "/"), &config).unwrap();
        assert!(!vary(&headers, &config).contains(LOCALE_COOKIE));
    }

    #[test]
    fn existing_shared_vary_is_merged() {
        let config = HeaderConfig::default();
        let mut headers = HeaderMap::new();
        headers.insert(
            config.shared_vary.clone(),
            HeaderValue::from_static("query=page,cookie=ab-test|__prerender_bypass"),
        );

        set_vary_headers(&mut headers, &RequestInfo::new(Method::GET, "/"), &config).unwrap();

        assert_eq!(
            vary(&headers, &config),
            "header=x-debug-logging,cookie=ab-test|__prerender_bypass|__next_preview_data,query=page"
        );
    }
}
