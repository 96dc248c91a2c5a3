/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::net::SocketAddr;

use reqwest::redirect;

use crate::{Error, USER_AGENT};

use super::{AuditConfig, NetTransport, Transport};

impl NetTransport {
    pub fn new(config: &AuditConfig) -> crate::Result<Self> {
        Ok(NetTransport {
            http: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(config.timeout)
                .redirect(redirect::Policy::none())
                .build()?,
            timeout: config.timeout,
            ehlo_hostname: config.ehlo_hostname.clone(),
        })
    }

    pub(crate) async fn get_policy(&self, url: &str) -> crate::Result<String> {
        let response = self.http.get(url).send().await?.error_for_status()?;

        // Redirects are not followed, anything but a 200 is a failure
        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::Http(format!(
                "Policy host replied with status {}.",
                response.status()
            )));
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
        {
            if !content_type.starts_with("text/plain") {
                tracing::warn!(
                    module = "https",
                    event = "content-type",
                    url = url,
                    content_type = content_type,
                    "Policy is not served as text/plain."
                );
            }
        }

        let bytes = response.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|err| Error::InvalidPolicy(err.to_string()))
    }
}

impl Transport for NetTransport {
    async fn starttls(&self, hostname: &str, addr: SocketAddr) -> crate::Result<()> {
        self.try_starttls(hostname, addr).await
    }

    async fn fetch_policy(&self, url: &str) -> crate::Result<String> {
        self.get_policy(url).await
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use crate::{
        audit::{AuditConfig, NetTransport},
        Error,
    };

    async fn spawn_mock_http_server(status: &str, content_type: &str, body: &[u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut response = format!(
            concat!(
                "HTTP/1.1 {}\r\n",
                "Content-Type: {}\r\n",
                "Content-Length: {}\r\n",
                "Location: http://127.0.0.1:1/.well-known/mta-sts.txt\r\n",
                "Connection: close\r\n\r\n"
            ),
            status,
            content_type,
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(body);

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf_u8 = vec![0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf_u8).await {
                    Ok(br) if br > 0 => request.extend_from_slice(&buf_u8[0..br]),
                    _ => return,
                }
            }
            stream.write_all(&response).await.unwrap();
            stream.shutdown().await.ok();
        });

        addr
    }

    async fn get_policy(status: &str, content_type: &str, body: &[u8]) -> crate::Result<String> {
        let addr = spawn_mock_http_server(status, content_type, body).await;
        NetTransport::new(&AuditConfig::default())
            .unwrap()
            .get_policy(&format!("http://{addr}/.well-known/mta-sts.txt"))
            .await
    }

    #[tokio::test]
    async fn fetch_policy_status() {
        let policy = "version: STSv1\nmode: enforce\nmx: mx.example.com\nmax_age: 86400\n";
        assert_eq!(
            get_policy("200 OK", "text/plain", policy.as_bytes()).await,
            Ok(policy.to_string())
        );

        // Served with the wrong content type, still accepted
        assert_eq!(
            get_policy("200 OK", "text/html; charset=utf-8", policy.as_bytes()).await,
            Ok(policy.to_string())
        );

        for (status, expected) in [
            (
                "301 Moved Permanently",
                "Policy host replied with status 301 Moved Permanently.",
            ),
            ("204 No Content", "Policy host replied with status 204 No Content."),
            ("404 Not Found", "Policy not found."),
            (
                "500 Internal Server Error",
                "Policy host replied with status 500 Internal Server Error.",
            ),
        ] {
            assert_eq!(
                get_policy(status, "text/plain", b"").await,
                Err(Error::Http(expected.to_string())),
                "{status}"
            );
        }
    }

    #[tokio::test]
    async fn fetch_policy_invalid_utf8() {
        assert!(matches!(
            get_policy("200 OK", "text/plain", b"version: STSv1\n\xff\xfe").await,
            Err(Error::InvalidPolicy(_))
        ));
    }
}
