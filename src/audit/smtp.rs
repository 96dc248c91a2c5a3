/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::net::SocketAddr;

use mail_send::{
    smtp::{tls::build_tls_connector, AssertReply},
    SmtpClient,
};
use smtp_proto::{EhloResponse, EXT_START_TLS};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::Error;

use super::NetTransport;

impl NetTransport {
    pub(crate) async fn try_starttls(&self, hostname: &str, addr: SocketAddr) -> crate::Result<()> {
        let mut smtp_client = SmtpClient::connect(addr, self.timeout).await?;
        read_greeting(&mut smtp_client).await?;

        let capabilities = say_ehlo(&mut smtp_client, &self.ehlo_hostname).await?;
        if !capabilities.has_capability(EXT_START_TLS) {
            return Err(Error::MissingStartTls);
        }

        let response = smtp_client.cmd("STARTTLS\r\n").await?;
        if response.code() != 220 {
            return Err(mail_send::Error::UnexpectedReply(response).into());
        }

        let tls_connector = build_tls_connector(false);
        let mut smtp_client = tokio::time::timeout(
            self.timeout,
            smtp_client.into_tls(&tls_connector, hostname),
        )
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|err| Error::Tls(err.to_string()))?;

        tracing::debug!(
            module = "smtp",
            event = "tls-established",
            host = hostname,
            addr = %addr
        );

        // The session is no longer needed once the handshake succeeded
        let _ = smtp_client.cmd("QUIT\r\n").await;

        Ok(())
    }
}

async fn read_greeting<T: AsyncRead + AsyncWrite + Unpin>(
    smtp_client: &mut SmtpClient<T>,
) -> crate::Result<()> {
    tokio::time::timeout(smtp_client.timeout, smtp_client.read())
        .await
        .map_err(|_| Error::Timeout)?
        .and_then(|r| r.assert_code(220))
        .map_err(Into::into)
}

async fn say_ehlo<T: AsyncRead + AsyncWrite + Unpin>(
    smtp_client: &mut SmtpClient<T>,
    ehlo_hostname: &str,
) -> crate::Result<EhloResponse<String>> {
    tokio::time::timeout(smtp_client.timeout, async {
        smtp_client
            .stream
            .write_all(format!("EHLO {ehlo_hostname}\r\n").as_bytes())
            .await?;
        smtp_client.read_ehlo().await
    })
    .await
    .map_err(|_| Error::Timeout)?
    .map_err(Into::into)
}
