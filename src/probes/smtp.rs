use anyhow::{anyhow, bail, Context, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::types::{CheckOutcome, CheckResult};

const EHLO_NAME: &str = "mxwatch.invalid";

/// One plaintext SMTP session up to (but not including) the TLS handshake.
pub struct SmtpSession {
    stream: TcpStream,
    pub banner: String,
    timeout: Duration,
}

impl SmtpSession {
    /// Connect and consume the 220 greeting.
    pub async fn open(host: &str, port: u16, timeout_ms: u64) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let timeout = Duration::from_millis(timeout_ms);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow!("connect to {addr} timed out"))?
            .with_context(|| format!("connect to {addr}"))?;

        let mut session = Self {
            stream,
            banner: String::new(),
            timeout,
        };
        let banner = session.read_reply().await.context("read SMTP greeting")?;
        if !banner.starts_with("220") {
            bail!(
                "unexpected SMTP greeting from {addr}: {}",
                banner.lines().next().unwrap_or("")
            );
        }
        session.banner = banner;
        Ok(session)
    }

    /// Send EHLO and collect the (possibly multiline) capability reply.
    pub async fn ehlo(&mut self) -> Result<String> {
        self.stream
            .write_all(format!("EHLO {EHLO_NAME}\r\n").as_bytes())
            .await?;
        self.read_reply().await
    }

    /// Negotiate STARTTLS and hand back the raw stream, ready for a TLS
    /// handshake. Err when the server does not offer or refuses it.
    pub async fn into_starttls(mut self) -> Result<TcpStream> {
        let caps = self.ehlo().await.context("EHLO before STARTTLS")?;
        if !caps.to_ascii_uppercase().contains("STARTTLS") {
            bail!("server does not advertise STARTTLS");
        }
        self.stream.write_all(b"STARTTLS\r\n").await?;
        let reply = self.read_reply().await.context("STARTTLS reply")?;
        if !reply.starts_with("220") {
            bail!("STARTTLS refused: {}", reply.lines().next().unwrap_or(""));
        }
        Ok(self.stream)
    }

    async fn read_reply(&mut self) -> Result<String> {
        let mut out = String::new();
        let mut buf = [0u8; 4096];

        let n = tokio::time::timeout(self.timeout, self.stream.read(&mut buf))
            .await
            .map_err(|_| anyhow!("SMTP reply timed out"))??;
        if n == 0 {
            bail!("connection closed mid-reply");
        }
        out.push_str(&String::from_utf8_lossy(&buf[..n]));

        // Multiline replies ("250-...") keep coming until a final line.
        loop {
            let last = out.lines().last().unwrap_or("");
            if is_final_reply(last) || !is_multiline_reply(last) {
                break;
            }
            match tokio::time::timeout(Duration::from_millis(200), self.stream.read(&mut buf)).await
            {
                Ok(Ok(m)) if m > 0 => out.push_str(&String::from_utf8_lossy(&buf[..m])),
                _ => break,
            }
        }
        Ok(out)
    }
}

fn is_multiline_reply(line: &str) -> bool {
    // "250-PIPELINING"
    line.len() >= 4 && line.get(3..4) == Some("-")
}

fn is_final_reply(line: &str) -> bool {
    // "250 PIPELINING"
    line.len() >= 4 && line.get(3..4) == Some(" ")
}

pub(crate) fn push_line(out: &mut String, label: &str, value: &str) {
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(label);
    out.push_str(": ");
    out.push_str(value);
}

/// Battery check 0, the canary: is STARTTLS on offer at all? One connect,
/// one EHLO, no handshake.
pub async fn check_starttls(host: &str, port: u16, timeout_ms: u64) -> Result<CheckResult> {
    let mut session = SmtpSession::open(host, port, timeout_ms).await?;

    let mut evidence = String::new();
    push_line(
        &mut evidence,
        "smtp_banner",
        session.banner.lines().next().unwrap_or("").trim(),
    );

    let outcome = match session.ehlo().await {
        Ok(caps) => {
            let advertised = caps.to_ascii_uppercase().contains("STARTTLS");
            push_line(
                &mut evidence,
                "smtp_starttls_advertised",
                if advertised { "yes" } else { "no" },
            );
            if advertised {
                CheckOutcome::Pass
            } else {
                CheckOutcome::Fail
            }
        }
        Err(e) => {
            push_line(&mut evidence, "smtp_ehlo", &format!("failed: {e}"));
            CheckOutcome::Error
        }
    };

    Ok(CheckResult::new("starttls", outcome, Some(evidence)))
}
