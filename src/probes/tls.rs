use anyhow::{anyhow, Result};
use chrono::Utc;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode, SslVersion};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;
use x509_parser::prelude::*;

use super::smtp::{push_line, SmtpSession};
use crate::types::{CheckOutcome, CheckResult};

/// Upgrade a stream that has just negotiated STARTTLS. Verification is off:
/// the point is to observe what the server offers, not to trust it.
async fn upgrade_to_tls(
    stream: TcpStream,
    sni: &str,
    max_version: Option<SslVersion>,
) -> Result<SslStream<TcpStream>> {
    let mut builder = SslConnector::builder(SslMethod::tls())?;
    builder.set_verify(SslVerifyMode::NONE);
    if let Some(v) = max_version {
        builder.set_min_proto_version(Some(SslVersion::TLS1))?;
        builder.set_max_proto_version(Some(v))?;
    }
    let connector = builder.build();
    let ssl = connector.configure()?.into_ssl(sni)?;

    let mut tls = SslStream::new(ssl, stream)?;
    std::pin::Pin::new(&mut tls)
        .connect()
        .await
        .map_err(|e| anyhow!("TLS handshake failed: {e}"))?;
    Ok(tls)
}

/// STARTTLS then a default handshake; records the negotiated protocol and
/// cipher. Anything below TLS 1.2 negotiated by default is a weakness.
pub async fn check_handshake(host: &str, port: u16, timeout_ms: u64) -> Result<CheckResult> {
    let session = SmtpSession::open(host, port, timeout_ms).await?;
    let mut evidence = String::new();

    let stream = match session.into_starttls().await {
        Ok(s) => s,
        Err(e) => {
            push_line(&mut evidence, "tls_starttls", &format!("unavailable: {e}"));
            return Ok(CheckResult::new(
                "handshake",
                CheckOutcome::Fail,
                Some(evidence),
            ));
        }
    };

    match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        upgrade_to_tls(stream, host, None),
    )
    .await
    {
        Err(_) => {
            push_line(&mut evidence, "tls_handshake", "timed out");
            Ok(CheckResult::new(
                "handshake",
                CheckOutcome::Error,
                Some(evidence),
            ))
        }
        Ok(Err(e)) => {
            push_line(&mut evidence, "tls_handshake", &format!("failed: {e}"));
            Ok(CheckResult::new(
                "handshake",
                CheckOutcome::Fail,
                Some(evidence),
            ))
        }
        Ok(Ok(tls)) => {
            let ssl = tls.ssl();
            let version = ssl.version_str();
            push_line(&mut evidence, "tls_version", version);
            if let Some(cipher) = ssl.current_cipher() {
                push_line(&mut evidence, "tls_cipher", cipher.name());
            }
            let outcome = match version {
                "TLSv1.3" | "TLSv1.2" => CheckOutcome::Pass,
                _ => CheckOutcome::Fail,
            };
            Ok(CheckResult::new("handshake", outcome, Some(evidence)))
        }
    }
}

/// STARTTLS handshake, then certificate inspection via DER parse: subject,
/// issuer, SANs, validity window.
pub async fn check_certificate(host: &str, port: u16, timeout_ms: u64) -> Result<CheckResult> {
    let session = SmtpSession::open(host, port, timeout_ms).await?;
    let mut evidence = String::new();

    let stream = match session.into_starttls().await {
        Ok(s) => s,
        Err(e) => {
            push_line(&mut evidence, "tls_starttls", &format!("unavailable: {e}"));
            return Ok(CheckResult::new(
                "certificate",
                CheckOutcome::Fail,
                Some(evidence),
            ));
        }
    };

    let tls = match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        upgrade_to_tls(stream, host, None),
    )
    .await
    {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            push_line(&mut evidence, "tls_handshake", &format!("failed: {e}"));
            return Ok(CheckResult::new(
                "certificate",
                CheckOutcome::Fail,
                Some(evidence),
            ));
        }
        Err(_) => {
            push_line(&mut evidence, "tls_handshake", "timed out");
            return Ok(CheckResult::new(
                "certificate",
                CheckOutcome::Error,
                Some(evidence),
            ));
        }
    };

    let Some(cert) = tls.ssl().peer_certificate() else {
        push_line(&mut evidence, "tls_cert", "no certificate presented");
        return Ok(CheckResult::new(
            "certificate",
            CheckOutcome::Fail,
            Some(evidence),
        ));
    };

    let der = match cert.to_der() {
        Ok(d) => d,
        Err(e) => {
            push_line(&mut evidence, "tls_cert", &format!("DER export failed: {e}"));
            return Ok(CheckResult::new(
                "certificate",
                CheckOutcome::Error,
                Some(evidence),
            ));
        }
    };
    let parsed = match parse_x509_certificate(&der) {
        Ok((_, p)) => p,
        Err(e) => {
            push_line(&mut evidence, "tls_cert", &format!("parse failed: {e}"));
            return Ok(CheckResult::new(
                "certificate",
                CheckOutcome::Error,
                Some(evidence),
            ));
        }
    };

    let subject_cn = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("");
    push_line(&mut evidence, "tls_cert_subject_cn", subject_cn);

    let issuer_cn = parsed
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("");
    push_line(&mut evidence, "tls_cert_issuer_cn", issuer_cn);

    if let Ok(Some(ext)) = parsed.subject_alternative_name() {
        for name in ext.value.general_names.iter() {
            if let GeneralName::DNSName(d) = name {
                push_line(&mut evidence, "tls_cert_san_dns", d);
            }
        }
    }

    let self_signed = parsed.subject().to_string() == parsed.issuer().to_string();
    push_line(
        &mut evidence,
        "tls_cert_self_signed",
        if self_signed { "yes" } else { "no" },
    );

    let not_after = parsed.validity().not_after.timestamp();
    let days_left = (not_after - Utc::now().timestamp()) / 86_400;
    push_line(&mut evidence, "tls_cert_days_to_expiry", &days_left.to_string());

    let outcome = if !parsed.validity().is_valid() || self_signed {
        CheckOutcome::Fail
    } else {
        CheckOutcome::Pass
    };
    Ok(CheckResult::new("certificate", outcome, Some(evidence)))
}

/// Offers at most TLS 1.1 and expects the server to refuse. A completed
/// handshake here means the host still speaks legacy protocols.
pub async fn check_legacy_protocols(host: &str, port: u16, timeout_ms: u64) -> Result<CheckResult> {
    let session = SmtpSession::open(host, port, timeout_ms).await?;
    let mut evidence = String::new();

    let stream = match session.into_starttls().await {
        Ok(s) => s,
        Err(e) => {
            push_line(&mut evidence, "tls_starttls", &format!("unavailable: {e}"));
            return Ok(CheckResult::new(
                "legacy-protocols",
                CheckOutcome::Fail,
                Some(evidence),
            ));
        }
    };

    match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        upgrade_to_tls(stream, host, Some(SslVersion::TLS1_1)),
    )
    .await
    {
        Ok(Ok(tls)) => {
            push_line(
                &mut evidence,
                "tls_legacy_negotiated",
                tls.ssl().version_str(),
            );
            Ok(CheckResult::new(
                "legacy-protocols",
                CheckOutcome::Fail,
                Some(evidence),
            ))
        }
        Ok(Err(_)) => {
            push_line(&mut evidence, "tls_legacy_negotiated", "refused");
            Ok(CheckResult::new(
                "legacy-protocols",
                CheckOutcome::Pass,
                Some(evidence),
            ))
        }
        Err(_) => {
            push_line(&mut evidence, "tls_legacy_negotiated", "timed out");
            Ok(CheckResult::new(
                "legacy-protocols",
                CheckOutcome::Error,
                Some(evidence),
            ))
        }
    }
}
