use anyhow::{Context, Result};
use async_tungstenite::{
    tokio::connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderValue, Request, Response},
    },
};
use url::Url;

use crate::socket::CommSocket;

const USER_AGENT: &str = "panel-comm";

/// The URL of an application server listening on `port`, as reachable from
/// the browser that displays `notebook_url`.
///
/// ```rust
/// use panel_comm::server_url;
///
/// assert_eq!(server_url("http://localhost:8888", 5006), "http://localhost:5006/");
/// assert_eq!(server_url("localhost:8888", 5006), "http://localhost:5006/");
/// ```
pub fn server_url(notebook_url: &str, port: u16) -> String {
    if notebook_url.starts_with("http") {
        let host = notebook_url
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(notebook_url);
        format!("{}:{}/", host, port)
    } else {
        let host = notebook_url.split(':').next().unwrap_or(notebook_url);
        format!("http://{}:{}/", host, port)
    }
}

/// The notebook origin without its scheme, as used in allowed-origin lists.
pub fn origin_url(url: &str) -> &str {
    if url.starts_with("http") {
        url.split_once("//").map(|(_, rest)| rest).unwrap_or(url)
    } else {
        url
    }
}

/// A running application server that documents can be synchronized with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionServer {
    pub base_url: String,
    pub token: Option<String>,
}

impl SessionServer {
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed_url = Url::parse(url).context("Failed to parse server URL")?;
        let base_url = format!(
            "{}://{}{}{}",
            parsed_url.scheme(),
            parsed_url.host_str().unwrap_or("localhost"),
            parsed_url
                .port()
                .map(|p| format!(":{}", p))
                .unwrap_or_default(),
            parsed_url.path().trim_end_matches('/')
        );

        let token = parsed_url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned());

        Ok(Self { base_url, token })
    }

    /// WebSocket endpoint of the application `app`.
    pub fn ws_url(&self, app: &str, session_id: Option<&str>) -> Result<Url> {
        let endpoint = format!(
            "{}/{}/ws",
            self.base_url.trim_end_matches('/'),
            app.trim_matches('/')
        )
        .replacen("http", "ws", 1);
        let mut url = Url::parse(&endpoint).context("Failed to build WebSocket URL")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(session_id) = session_id {
                query.append_pair("bokeh-session-id", session_id);
            }
            if let Some(token) = &self.token {
                query.append_pair("token", token);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    /// Open the patch channel of an application session.
    pub async fn connect(
        &self,
        app: &str,
        session_id: Option<&str>,
    ) -> Result<(CommSocket, Response<Option<Vec<u8>>>)> {
        let ws_url = self.ws_url(app, session_id)?;

        let mut req: Request<()> = ws_url.as_str().into_client_request()?;
        req.headers_mut()
            .insert("User-Agent", HeaderValue::from_static(USER_AGENT));

        let (ws_stream, response) = connect_async(req)
            .await
            .with_context(|| format!("Failed to connect to {}", ws_url))?;
        tracing::debug!(url = %ws_url, status = %response.status(), "connected comm socket");

        Ok((CommSocket::new(ws_stream), response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        let server = SessionServer::from_url("http://127.0.0.1:5006/?token=abc").unwrap();
        assert_eq!(server.base_url, "http://127.0.0.1:5006");
        assert_eq!(server.token.as_deref(), Some("abc"));

        let server = SessionServer::from_url("https://example.com/proxy/").unwrap();
        assert_eq!(server.base_url, "https://example.com/proxy");
        assert_eq!(server.token, None);

        assert!(SessionServer::from_url("not a url").is_err());
    }

    #[test]
    fn test_ws_url() {
        let server = SessionServer::from_url("http://localhost:5006").unwrap();
        assert_eq!(
            server.ws_url("app", None).unwrap().as_str(),
            "ws://localhost:5006/app/ws"
        );
        assert_eq!(
            server.ws_url("/app/", Some("s1")).unwrap().as_str(),
            "ws://localhost:5006/app/ws?bokeh-session-id=s1"
        );

        let secure = SessionServer::from_url("https://example.com?token=t").unwrap();
        assert_eq!(
            secure.ws_url("app", None).unwrap().as_str(),
            "wss://example.com/app/ws?token=t"
        );
    }

    #[test]
    fn test_origin_url() {
        assert_eq!(origin_url("http://localhost:8888"), "localhost:8888");
        assert_eq!(origin_url("localhost:8888"), "localhost:8888");
    }

    #[test]
    fn test_server_url_keeps_scheme() {
        assert_eq!(
            server_url("https://hub.example.com:443", 5006),
            "https://hub.example.com:5006/"
        );
    }
}
