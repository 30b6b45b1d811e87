/*
 * redirect.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tagliacarte, a cross-platform email client.
 *
 * Tagliacarte is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tagliacarte is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tagliacarte.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Redirect target resolution. Servers send absolute, scheme-relative and path-relative
//! `Location` headers, and some redirect to the very URL that was requested.

use url::Url;

use crate::protocol::ews::error::EwsError;
use crate::protocol::ews::response::Response;

/// Scheme, authority and path of a URL or URL reference. Query and fragment are dropped.
struct UrlParts {
    /// None when the reference has no scheme.
    https: Option<bool>,
    /// Lowercase host[:port]; empty when the reference has no authority.
    netloc: String,
    path: String,
}

fn url_parts(url: &str) -> UrlParts {
    if let Ok(parsed) = Url::parse(url) {
        let mut netloc = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        if let Some(port) = parsed.port() {
            netloc = format!("{}:{}", netloc, port);
        }
        return UrlParts {
            https: Some(parsed.scheme() == "https"),
            netloc,
            path: parsed.path().to_string(),
        };
    }
    // Relative reference: no scheme
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let reference = &url[..end];
    match reference.strip_prefix("//") {
        Some(rest) => {
            let slash = rest.find('/').unwrap_or(rest.len());
            UrlParts {
                https: None,
                netloc: rest[..slash].to_ascii_lowercase(),
                path: rest[slash..].to_string(),
            }
        }
        None => UrlParts {
            https: None,
            netloc: String::new(),
            path: reference.to_string(),
        },
    }
}

/// Split a URL into (is https, lowercase host[:port], path). Relative references give an
/// empty host.
pub fn split_url(url: &str) -> (bool, String, String) {
    let parts = url_parts(url);
    (parts.https.unwrap_or(false), parts.netloc, parts.path)
}

/// Absolute redirect target of a 301/302 `response`.
///
/// Host and scheme missing from `Location` are taken from the response URL; a path that is
/// not absolute is appended to the response URL's path. The request URL used for the
/// comparisons is the first URL in the redirect history, if any.
///
/// - No `Location`, or a target equal to the request URL: `EwsError::Transport`.
/// - `allow_relative == false` and the target has the request's scheme and host:
///   `EwsError::Redirect`.
/// - `require_relative == true` and the target changes scheme or host: `EwsError::Redirect`.
pub fn get_redirect_url(
    response: &Response,
    allow_relative: bool,
    require_relative: bool,
) -> Result<String, EwsError> {
    let location = response
        .headers
        .get("location")
        .filter(|l| !l.is_empty())
        .ok_or_else(|| EwsError::Transport("HTTP redirect but no location header".to_string()))?;
    let mut redirect = url_parts(location);
    let request_url = response.history.first().map(String::as_str).unwrap_or(&response.url);
    let request = url_parts(request_url);
    let current = url_parts(&response.url);

    if redirect.netloc.is_empty() {
        redirect.netloc = current.netloc;
        redirect.https = current.https;
    } else if redirect.https.is_none() {
        redirect.https = current.https;
    }
    if !redirect.path.starts_with('/') {
        let base = if current.path.is_empty() { "/" } else { current.path.as_str() };
        redirect.path = format!("{}{}", base, redirect.path);
    }
    let redirect_https = redirect.https.unwrap_or(false);
    let redirect_url = format!(
        "{}://{}{}",
        if redirect_https { "https" } else { "http" },
        redirect.netloc,
        redirect.path
    );
    if redirect_url == request_url {
        return Err(EwsError::Transport(format!("Redirect to same location: {}", redirect_url)));
    }
    let same_origin = request.https.unwrap_or(false) == redirect_https && request.netloc == redirect.netloc;
    if (!allow_relative && same_origin) || (require_relative && !same_origin) {
        return Err(EwsError::Redirect { url: redirect_url });
    }
    Ok(redirect_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirect(from: &str, location: &str) -> Response {
        Response::new(302, from).with_header("Location", location)
    }

    #[test]
    fn split_url_parts() {
        assert_eq!(
            split_url("https://Mail.Example.com/EWS/Exchange.asmx?x=1"),
            (true, "mail.example.com".to_string(), "/EWS/Exchange.asmx".to_string())
        );
        assert_eq!(
            split_url("http://host:8080/ews"),
            (false, "host:8080".to_string(), "/ews".to_string())
        );
        assert_eq!(split_url("/ews/other.asmx"), (false, String::new(), "/ews/other.asmx".to_string()));
    }

    #[test]
    fn path_absolute_location_inherits_scheme_and_host() {
        let r = redirect("https://host/ews/exchange.asmx", "/ews/other.asmx");
        assert_eq!(get_redirect_url(&r, true, false).unwrap(), "https://host/ews/other.asmx");
    }

    #[test]
    fn absolute_location_is_taken_verbatim() {
        let r = redirect("https://host/ews/exchange.asmx", "https://otherhost/x");
        assert_eq!(get_redirect_url(&r, true, false).unwrap(), "https://otherhost/x");
    }

    #[test]
    fn scheme_relative_location_inherits_scheme() {
        let r = redirect("https://host/ews/exchange.asmx", "//otherhost/ews/exchange.asmx");
        assert_eq!(get_redirect_url(&r, true, false).unwrap(), "https://otherhost/ews/exchange.asmx");
    }

    #[test]
    fn path_relative_location_is_appended_to_response_path() {
        let r = redirect("https://host/ews/", "exchange.asmx");
        assert_eq!(get_redirect_url(&r, true, false).unwrap(), "https://host/ews/exchange.asmx");
    }

    #[test]
    fn redirect_to_same_location_is_rejected() {
        let r = redirect("https://host/ews/exchange.asmx", "/ews/exchange.asmx");
        assert!(matches!(get_redirect_url(&r, true, false), Err(EwsError::Transport(_))));
    }

    #[test]
    fn history_supplies_the_request_url() {
        let r = redirect("https://host/b", "https://host/a").with_history(vec!["https://host/a".to_string()]);
        assert!(matches!(get_redirect_url(&r, true, false), Err(EwsError::Transport(_))));
    }

    #[test]
    fn missing_location_is_a_transport_error() {
        let r = Response::new(302, "https://host/ews");
        assert!(matches!(get_redirect_url(&r, true, false), Err(EwsError::Transport(_))));
    }

    #[test]
    fn relative_policies() {
        let same = redirect("https://host/ews/exchange.asmx", "/ews/other.asmx");
        match get_redirect_url(&same, false, false) {
            Err(EwsError::Redirect { url }) => assert_eq!(url, "https://host/ews/other.asmx"),
            other => panic!("unexpected {:?}", other),
        }
        let cross = redirect("https://host/ews/exchange.asmx", "http://host/ews/exchange.asmx");
        match get_redirect_url(&cross, true, true) {
            Err(EwsError::Redirect { url }) => assert_eq!(url, "http://host/ews/exchange.asmx"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(get_redirect_url(&same, true, true).is_ok());
    }
}
