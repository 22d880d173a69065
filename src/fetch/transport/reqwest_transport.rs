//! Reqwest-based implementation of the [`Transport`] trait.
//!
//! Keeps one pooled client per egress proxy for the current identity
//! generation. A new generation drops every pooled client so kept-alive
//! connections opened under the old identity are closed. All clients share
//! a single cookie jar, so session cookies survive identity changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::cookie::Jar;
use tokio::sync::Mutex;

use super::{Transport, TransportError, TransportRequest, TransportResponse};
use crate::fetcher::ResourceError;
use crate::modules::identity::Identity;

/// Plain HTTP session: persistent cookies, connection pooling, no scripts.
pub struct HttpTransport {
    jar: Arc<Jar>,
    timeout: Duration,
    clients: Mutex<ClientPool>,
    closed: AtomicBool,
}

/// Clients built for one identity generation.
#[derive(Default)]
struct ClientPool {
    generation: u64,
    by_proxy: HashMap<Option<String>, Client>,
}

impl HttpTransport {
    /// Builds the direct client eagerly so TLS/backend problems surface at
    /// construction rather than on the first request.
    pub fn new(timeout: Duration) -> Result<Self, ResourceError> {
        let jar = Arc::new(Jar::default());
        let direct = build_client(&jar, timeout, None)?;

        let mut clients = ClientPool::default();
        clients.by_proxy.insert(None, direct);

        Ok(Self {
            jar,
            timeout,
            clients: Mutex::new(clients),
            closed: AtomicBool::new(false),
        })
    }

    /// Cookie store shared by every pooled client.
    pub fn cookie_jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }

    async fn client(&self, identity: &Identity) -> Result<Client, TransportError> {
        let mut pool = self.clients.lock().await;
        if pool.generation != identity.generation() {
            log::debug!(
                "identity generation {} -> {}, dropping {} pooled client(s)",
                pool.generation,
                identity.generation(),
                pool.by_proxy.len()
            );
            pool.by_proxy.clear();
            pool.generation = identity.generation();
        }

        let key = identity.proxy().map(str::to_string);
        if let Some(client) = pool.by_proxy.get(&key) {
            return Ok(client.clone());
        }

        let client = build_client(&self.jar, self.timeout, identity.proxy())
            .map_err(|err| TransportError::Network(err.to_string()))?;
        pool.by_proxy.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let client = self.client(&request.identity).await?;
        let response = client
            .get(request.url.clone())
            .headers(request.headers.as_header_map().clone())
            .send()
            .await
            .map_err(|err| self.map_error(err))?;

        let status = response.status().as_u16();
        let url = response.url().clone();
        let body = response.text().await.map_err(|err| self.map_error(err))?;

        Ok(TransportResponse { status, body, url })
    }

    async fn close(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.clients.lock().await.by_proxy.clear();
            log::debug!("http transport closed");
        }
    }
}

impl HttpTransport {
    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

fn build_client(jar: &Arc<Jar>, timeout: Duration, proxy: Option<&str>) -> Result<Client, ResourceError> {
    let mut builder = Client::builder()
        .cookie_provider(jar.clone())
        .timeout(timeout)
        .gzip(true)
        .brotli(true);

    if let Some(endpoint) = proxy {
        let proxy = reqwest::Proxy::all(endpoint).map_err(|source| ResourceError::InvalidProxy {
            endpoint: endpoint.to_string(),
            source,
        })?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::headers::HeaderSet;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use url::Url;

    #[tokio::test]
    async fn closed_transport_refuses_requests() {
        let mut transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        transport.close().await;
        transport.close().await;

        let err = transport
            .send(&TransportRequest {
                url: Url::parse("http://127.0.0.1:9/").unwrap(),
                headers: HeaderSet::new(),
                identity: Identity::direct(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let err = transport
            .send(&TransportRequest {
                url: Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap(),
                headers: HeaderSet::new(),
                identity: Identity::direct(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }

    #[tokio::test]
    async fn clients_are_pooled_per_proxy() {
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let tor = Identity::via_proxy("socks5h://127.0.0.1:9150", 0);
        transport.client(&tor).await.unwrap();
        transport.client(&tor).await.unwrap();
        transport.client(&Identity::direct()).await.unwrap();
        assert_eq!(transport.clients.lock().await.by_proxy.len(), 2);
    }

    #[tokio::test]
    async fn new_generation_drops_pooled_clients() {
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        transport
            .client(&Identity::via_proxy("http://10.0.0.1:3128", 0))
            .await
            .unwrap();
        transport
            .client(&Identity::via_proxy("http://10.0.0.2:3128", 1))
            .await
            .unwrap();

        let pool = transport.clients.lock().await;
        assert_eq!(pool.generation, 1);
        assert_eq!(pool.by_proxy.len(), 1);
        assert!(pool.by_proxy.contains_key(&Some("http://10.0.0.2:3128".to_string())));
    }

    /// Keep-alive HTTP proxy answering every request with `ok`; returns its
    /// URL and the number of TCP connections it accepted.
    async fn keep_alive_proxy() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut reader = BufReader::new(read_half);
                    let mut line = String::new();
                    loop {
                        // Request head ends with an empty line; GETs carry no body.
                        loop {
                            line.clear();
                            match reader.read_line(&mut line).await {
                                Ok(0) | Err(_) => return,
                                Ok(_) if line == "\r\n" => break,
                                Ok(_) => {}
                            }
                        }
                        let reply = "HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok";
                        if write_half.write_all(reply.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        (format!("http://{addr}"), accepted)
    }

    #[tokio::test]
    async fn rotated_identity_opens_fresh_connections() {
        let (proxy, accepted) = keep_alive_proxy().await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse("http://shop.example/item/42").unwrap();

        for generation in 0..3 {
            let response = transport
                .send(&TransportRequest {
                    url: url.clone(),
                    headers: HeaderSet::new(),
                    identity: Identity::via_proxy(proxy.clone(), generation),
                })
                .await
                .unwrap();
            assert_eq!(response.body, "ok");
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }
}
