//! Mapping of HTTP(S) endpoints onto WebSocket endpoints.

use url::Url;

use crate::Result;

/// Derive the WebSocket URL for an HTTP(S) endpoint.
///
/// `https` becomes `wss`; every other scheme becomes `ws`. Host, port, path, query and
/// fragment are carried over as-is.
///
/// ```
/// use signalr_ws_transport::ws::endpoint::ws_url;
///
/// let url = ws_url("https://x.com/hub?id=1#frag").unwrap();
/// assert_eq!(url.as_str(), "wss://x.com/hub?id=1#frag");
/// ```
pub fn ws_url(url: &str) -> Result<Url> {
    let mut parsed = Url::parse(url)?;
    let scheme = if parsed.scheme() == "https" { "wss" } else { "ws" };

    if parsed.set_scheme(scheme).is_ok() {
        return Ok(parsed);
    }

    // `set_scheme` refuses to move between special and non-special schemes, so rebuild
    // the URL around the new scheme instead.
    let rest = parsed
        .as_str()
        .strip_prefix(parsed.scheme())
        .unwrap_or_default();
    Ok(Url::parse(&format!("{scheme}{rest}"))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_becomes_wss() {
        let url = ws_url("https://x.com/hub?id=1#frag").expect("valid url");

        assert_eq!(url.as_str(), "wss://x.com/hub?id=1#frag");
    }

    #[test]
    fn http_becomes_ws() {
        let url = ws_url("http://127.0.0.1:8080/signalr/connect?transport=webSockets&connectionToken=a%2Bb")
            .expect("valid url");

        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:8080/signalr/connect?transport=webSockets&connectionToken=a%2Bb"
        );
    }

    #[test]
    fn unknown_scheme_defaults_to_ws() {
        let url = ws_url("ftp://x.com/hub?id=1").expect("valid url");
        assert_eq!(url.as_str(), "ws://x.com/hub?id=1");

        let url = ws_url("custom://x.com/hub#top").expect("valid url");
        assert_eq!(url.as_str(), "ws://x.com/hub#top");
    }

    #[test]
    fn already_websocket_scheme() {
        assert_eq!(
            ws_url("wss://x.com/hub").expect("valid url").as_str(),
            "ws://x.com/hub"
        );
    }

    #[test]
    fn malformed_url_should_fail() {
        let err = ws_url("://missing-scheme").expect_err("should not parse");

        assert_eq!(err.kind(), crate::error::Kind::Validation);
    }
}
