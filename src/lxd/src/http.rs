//! `HypervisorClient` over the LXD REST API on a local unix socket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hyper::client::Client;
use hyper::{Body, Method, Request};
use hyperlocal::UnixConnector;
use serde::de::DeserializeOwned;
use serde::Serialize;

use lxdlet_core::{AdapterConfig, LxdletError, Result};

use crate::api::{
    ContainerInfo, ContainerRuntimeState, ContainerStatePut, ContainersPost, Envelope,
    ImageAlias, ImageAliasEntry, ImageInfo, ImageSource, ImagesPost, Operation, ServerInfo,
};
use crate::client::{HypervisorClient, NewContainer};

/// LXD client bound to one daemon socket.
///
/// The underlying hyper client keeps idle connections for reuse; requests
/// are otherwise independent of each other.
#[derive(Clone)]
pub struct LxdClient {
    socket: PathBuf,
    image_server: Option<String>,
    image_protocol: String,
    client: Client<UnixConnector, Body>,
}

impl LxdClient {
    /// Create a client for the daemon listening on `socket`, creating
    /// containers from local image aliases.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            image_server: None,
            image_protocol: String::new(),
            client: Client::builder().build(UnixConnector),
        }
    }

    /// Create a client from the adapter configuration.
    pub fn from_config(config: &AdapterConfig) -> Self {
        let client = Self::new(&config.lxd_socket);
        match &config.image_server {
            Some(server) => client.with_image_remote(server, &config.image_protocol),
            None => client,
        }
    }

    /// Resolve image aliases against a remote server instead of local aliases.
    pub fn with_image_remote(mut self, server: &str, protocol: &str) -> Self {
        self.image_server = Some(server.to_string());
        self.image_protocol = protocol.to_string();
        self
    }

    /// Path of the daemon socket.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn image_source<'a>(&'a self, alias: &'a str, mode: Option<&'static str>) -> ImageSource<'a> {
        ImageSource {
            kind: "image",
            mode,
            alias,
            server: self.image_server.as_deref(),
            protocol: self
                .image_server
                .as_ref()
                .map(|_| self.image_protocol.as_str()),
        }
    }

    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Envelope> {
        let uri: hyper::Uri = hyperlocal::Uri::new(&self.socket, path).into();
        let body = body.map(Body::from).unwrap_or_else(Body::empty);

        let request = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(body)
            .map_err(|e| LxdletError::Other(format!("invalid request {}: {}", path, e)))?;

        tracing::debug!(method = %method, path = %path, "LXD request");

        let response = self.client.request(request).await.map_err(|e| {
            LxdletError::ConnectionError(format!("{}: {}", self.socket.display(), e))
        })?;
        let status = response.status().as_u16();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| {
                LxdletError::ConnectionError(format!("{}: {}", self.socket.display(), e))
            })?;

        parse_envelope(status, &bytes)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let envelope = self.send(Method::GET, path, None).await?;
        metadata(envelope)
    }

    async fn send_json<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Envelope> {
        let body = serde_json::to_vec(body)?;
        self.send(method, path, Some(body)).await
    }

    /// Block on a background operation when asked to.
    async fn finish(&self, envelope: Envelope, wait: bool) -> Result<()> {
        if !wait || envelope.operation.is_empty() {
            return Ok(());
        }

        let path = format!("{}/wait", envelope.operation);
        let operation: Operation = self.get(&path).await?;
        if operation.succeeded() {
            Ok(())
        } else {
            let message = if operation.err.is_empty() {
                operation.status
            } else {
                operation.err
            };
            Err(LxdletError::OperationFailed {
                operation: envelope.operation,
                message,
            })
        }
    }

    async fn update_state(&self, name: &str, state: ContainerStatePut, wait: bool) -> Result<()> {
        let path = format!("/1.0/containers/{}/state", encode_segment(name));
        let envelope = self.send_json(Method::PUT, &path, &state).await?;
        self.finish(envelope, wait).await
    }

    async fn alias_target(&self, alias: &str) -> Result<String> {
        let path = format!("/1.0/images/aliases/{}", encode_segment(alias));
        let entry: ImageAliasEntry = self.get(&path).await?;
        Ok(entry.target)
    }
}

#[async_trait]
impl HypervisorClient for LxdClient {
    async fn server_info(&self) -> Result<ServerInfo> {
        self.get("/1.0").await
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        self.get("/1.0/containers?recursion=1").await
    }

    async fn get_container(&self, name: &str) -> Result<ContainerInfo> {
        self.get(&format!("/1.0/containers/{}", encode_segment(name)))
            .await
    }

    async fn container_state(&self, name: &str) -> Result<ContainerRuntimeState> {
        self.get(&format!("/1.0/containers/{}/state", encode_segment(name)))
            .await
    }

    async fn create_container(&self, request: &NewContainer, wait: bool) -> Result<()> {
        let body = ContainersPost {
            name: &request.name,
            source: self.image_source(&request.image, None),
            config: &request.config,
        };
        let envelope = self
            .send_json(Method::POST, "/1.0/containers", &body)
            .await?;
        self.finish(envelope, wait).await
    }

    async fn start_container(&self, name: &str, wait: bool) -> Result<()> {
        let state = ContainerStatePut {
            action: "start",
            timeout: -1,
            force: false,
            stateful: false,
        };
        self.update_state(name, state, wait).await
    }

    async fn stop_container(&self, name: &str, wait: bool) -> Result<()> {
        let state = ContainerStatePut {
            action: "stop",
            timeout: -1,
            force: true,
            stateful: false,
        };
        self.update_state(name, state, wait).await
    }

    async fn delete_container(&self, name: &str, wait: bool) -> Result<()> {
        let path = format!("/1.0/containers/{}", encode_segment(name));
        let envelope = self.send(Method::DELETE, &path, None).await?;
        self.finish(envelope, wait).await
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        self.get("/1.0/images?recursion=1").await
    }

    async fn get_image(&self, alias: &str) -> Result<ImageInfo> {
        let fingerprint = self.alias_target(alias).await?;
        self.get(&format!("/1.0/images/{}", encode_segment(&fingerprint)))
            .await
    }

    async fn pull_image(&self, alias: &str, wait: bool) -> Result<()> {
        if self.image_server.is_none() {
            return Err(LxdletError::ConfigError(format!(
                "cannot pull image '{}': no image server configured",
                alias
            )));
        }

        let body = ImagesPost {
            source: self.image_source(alias, Some("pull")),
            aliases: vec![ImageAlias {
                name: alias.to_string(),
                description: String::new(),
            }],
            auto_update: false,
        };
        let envelope = self.send_json(Method::POST, "/1.0/images", &body).await?;
        self.finish(envelope, wait).await
    }

    async fn delete_image(&self, alias: &str, wait: bool) -> Result<()> {
        let fingerprint = self.alias_target(alias).await?;
        let path = format!("/1.0/images/{}", encode_segment(&fingerprint));
        let envelope = self.send(Method::DELETE, &path, None).await?;
        self.finish(envelope, wait).await
    }
}

/// Turn an HTTP response into an envelope, mapping LXD error responses.
fn parse_envelope(status: u16, body: &[u8]) -> Result<Envelope> {
    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(_) => {
            let message = String::from_utf8_lossy(body).trim().to_string();
            return Err(if status == 404 {
                LxdletError::NotFound(message)
            } else {
                LxdletError::HypervisorError {
                    status_code: status,
                    message,
                }
            });
        }
    };

    if envelope.kind == "error" || status >= 400 {
        let code = if envelope.error_code != 0 {
            envelope.error_code
        } else {
            status
        };
        return Err(if code == 404 {
            LxdletError::NotFound(envelope.error)
        } else {
            LxdletError::HypervisorError {
                status_code: code,
                message: envelope.error,
            }
        });
    }

    Ok(envelope)
}

fn metadata<T: DeserializeOwned>(envelope: Envelope) -> Result<T> {
    Ok(serde_json::from_value(envelope.metadata)?)
}

/// Percent-encode one URL path segment (image aliases may contain `/`).
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;
    use tokio::sync::Mutex;

    /// A request seen by the fake daemon: method, path, body.
    type Seen = Arc<Mutex<Vec<(String, String, String)>>>;

    /// Serve canned `(status, body)` responses keyed by `"METHOD path"`.
    fn fake_daemon(
        dir: &tempfile::TempDir,
        routes: HashMap<&'static str, (u16, &'static str)>,
    ) -> (PathBuf, Seen) {
        let socket = dir.path().join("unix.socket");
        let listener = UnixListener::bind(&socket).unwrap();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let seen_task = seen.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();
                let seen = seen_task.clone();
                tokio::spawn(async move {
                    let (method, path, body) = read_request(&mut stream).await;
                    let key = format!("{} {}", method, path);
                    seen.lock().await.push((method, path, body));

                    let (status, payload) = routes.get(key.as_str()).copied().unwrap_or((
                        404,
                        r#"{"type":"error","error":"not found","error_code":404}"#,
                    ));
                    let response = format!(
                        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        payload.len(),
                        payload
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (socket, seen)
    }

    async fn read_request(stream: &mut tokio::net::UnixStream) -> (String, String, String) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break buf.len();
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut lines = head.lines();
        let mut request_line = lines.next().unwrap_or_default().split_whitespace();
        let method = request_line.next().unwrap_or_default().to_string();
        let path = request_line.next().unwrap_or_default().to_string();
        let content_length = lines
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buf[header_end.min(buf.len())..].to_vec();
        while body.len() < content_length {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }

        (method, path, String::from_utf8_lossy(&body).to_string())
    }

    #[test]
    fn test_parse_sync_envelope() {
        let body = br#"{"type":"sync","status":"Success","status_code":200,"metadata":{"api_version":"1.0"}}"#;
        let envelope = parse_envelope(200, body).unwrap();
        assert_eq!(envelope.kind, "sync");
        let info: ServerInfo = metadata(envelope).unwrap();
        assert_eq!(info.api_version, "1.0");
    }

    #[test]
    fn test_parse_not_found_envelope() {
        let body = br#"{"type":"error","error":"Container not found","error_code":404}"#;
        let err = parse_envelope(404, body).unwrap_err();
        assert!(matches!(err, LxdletError::NotFound(ref m) if m == "Container not found"));
    }

    #[test]
    fn test_parse_error_envelope() {
        let body = br#"{"type":"error","error":"Name already in use","error_code":409}"#;
        let err = parse_envelope(409, body).unwrap_err();
        assert!(matches!(
            err,
            LxdletError::HypervisorError { status_code: 409, .. }
        ));
    }

    #[test]
    fn test_parse_non_json_body() {
        let err = parse_envelope(502, b"bad gateway").unwrap_err();
        assert!(matches!(
            err,
            LxdletError::HypervisorError { status_code: 502, ref message } if message == "bad gateway"
        ));
    }

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("pod-abc-web"), "pod-abc-web");
        assert_eq!(encode_segment("library/nginx"), "library%2Fnginx");
        assert_eq!(encode_segment("a b"), "a%20b");
    }

    #[tokio::test]
    async fn test_server_info() {
        let dir = tempfile::tempdir().unwrap();
        let routes = HashMap::from([(
            "GET /1.0",
            (
                200,
                r#"{"type":"sync","status_code":200,"metadata":{"api_version":"1.0","environment":{"server_version":"5.0.2"}}}"#,
            ),
        )]);
        let (socket, _) = fake_daemon(&dir, routes);

        let client = LxdClient::new(socket);
        let info = client.server_info().await.unwrap();
        assert_eq!(info.api_version, "1.0");
        assert_eq!(info.environment.server_version, "5.0.2");
    }

    #[tokio::test]
    async fn test_get_missing_container() {
        let dir = tempfile::tempdir().unwrap();
        let (socket, _) = fake_daemon(&dir, HashMap::new());

        let client = LxdClient::new(socket);
        let err = client.get_container("pod-abc-web").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_waits_for_operation() {
        let dir = tempfile::tempdir().unwrap();
        let routes = HashMap::from([
            (
                "POST /1.0/containers",
                (
                    202,
                    r#"{"type":"async","status_code":100,"operation":"/1.0/operations/op1"}"#,
                ),
            ),
            (
                "GET /1.0/operations/op1/wait",
                (
                    200,
                    r#"{"type":"sync","status_code":200,"metadata":{"id":"op1","status":"Success","status_code":200}}"#,
                ),
            ),
        ]);
        let (socket, seen) = fake_daemon(&dir, routes);

        let client = LxdClient::new(socket)
            .with_image_remote("https://images.linuxcontainers.org", "simplestreams");
        let request = NewContainer {
            name: "pod-abc-web".to_string(),
            image: "ubuntu/22.04".to_string(),
            config: HashMap::new(),
        };
        client.create_container(&request, true).await.unwrap();

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 2);
        let body: serde_json::Value = serde_json::from_str(&seen[0].2).unwrap();
        assert_eq!(body["name"], "pod-abc-web");
        assert_eq!(body["source"]["alias"], "ubuntu/22.04");
        assert_eq!(body["source"]["protocol"], "simplestreams");
        assert_eq!(seen[1].1, "/1.0/operations/op1/wait");
    }

    #[tokio::test]
    async fn test_failed_operation_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let routes = HashMap::from([
            (
                "PUT /1.0/containers/pod-abc-web/state",
                (
                    202,
                    r#"{"type":"async","status_code":100,"operation":"/1.0/operations/op2"}"#,
                ),
            ),
            (
                "GET /1.0/operations/op2/wait",
                (
                    200,
                    r#"{"type":"sync","status_code":200,"metadata":{"id":"op2","status":"Failure","status_code":400,"err":"Failed to start"}}"#,
                ),
            ),
        ]);
        let (socket, seen) = fake_daemon(&dir, routes);

        let client = LxdClient::new(socket);
        let err = client.start_container("pod-abc-web", true).await.unwrap_err();
        assert!(matches!(
            err,
            LxdletError::OperationFailed { ref message, .. } if message == "Failed to start"
        ));

        let seen = seen.lock().await;
        let body: serde_json::Value = serde_json::from_str(&seen[0].2).unwrap();
        assert_eq!(body["action"], "start");
        assert_eq!(body["timeout"], -1);
    }

    #[tokio::test]
    async fn test_stop_is_forced_and_no_wait_skips_operation() {
        let dir = tempfile::tempdir().unwrap();
        let routes = HashMap::from([(
            "PUT /1.0/containers/pod-abc-web/state",
            (
                202,
                r#"{"type":"async","status_code":100,"operation":"/1.0/operations/op3"}"#,
            ),
        )]);
        let (socket, seen) = fake_daemon(&dir, routes);

        let client = LxdClient::new(socket);
        client.stop_container("pod-abc-web", false).await.unwrap();

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        let body: serde_json::Value = serde_json::from_str(&seen[0].2).unwrap();
        assert_eq!(body["action"], "stop");
        assert_eq!(body["force"], true);
    }

    #[tokio::test]
    async fn test_get_image_resolves_alias() {
        let dir = tempfile::tempdir().unwrap();
        let routes = HashMap::from([
            (
                "GET /1.0/images/aliases/library%2Fnginx",
                (
                    200,
                    r#"{"type":"sync","status_code":200,"metadata":{"name":"library/nginx","target":"f00d"}}"#,
                ),
            ),
            (
                "GET /1.0/images/f00d",
                (
                    200,
                    r#"{"type":"sync","status_code":200,"metadata":{"fingerprint":"f00d","size":1024,"aliases":[{"name":"library/nginx"}]}}"#,
                ),
            ),
        ]);
        let (socket, _) = fake_daemon(&dir, routes);

        let client = LxdClient::new(socket);
        let image = client.get_image("library/nginx").await.unwrap();
        assert_eq!(image.fingerprint, "f00d");
        assert_eq!(image.size, 1024);
        assert_eq!(image.aliases[0].name, "library/nginx");
    }

    #[tokio::test]
    async fn test_pull_without_remote_is_rejected() {
        let client = LxdClient::new("/nonexistent/unix.socket");
        let err = client.pull_image("ubuntu/22.04", true).await.unwrap_err();
        assert!(matches!(err, LxdletError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_unreachable_socket() {
        let dir = tempfile::tempdir().unwrap();
        let client = LxdClient::new(dir.path().join("missing.socket"));
        let err = client.list_containers().await.unwrap_err();
        assert!(matches!(err, LxdletError::ConnectionError(_)));
    }
}
