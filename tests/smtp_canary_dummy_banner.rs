use mxwatch::probes::{ProbeRunner, StarttlsProbeRunner, CANARY_CHECK};
use mxwatch::types::CheckOutcome;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Dummy SMTP server: greeting, then a scripted EHLO reply.
async fn spawn_smtp_server(ehlo_reply: &'static [u8]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = socket
            .write_all(b"220 dummy.smtp ESMTP Service Ready\r\n")
            .await;
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        let _ = socket.write_all(ehlo_reply).await;
        // Hold the socket open briefly so the probe can finish reading.
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
    });
    port
}

#[tokio::test]
async fn canary_reports_starttls_advertised() {
    let port = spawn_smtp_server(b"250-dummy.smtp\r\n250-SIZE 35882577\r\n250 STARTTLS\r\n").await;

    let runner = StarttlsProbeRunner::new(port, 2000);
    let result = runner.run_single("127.0.0.1", CANARY_CHECK).await.unwrap();

    assert_eq!(result.checks.len(), 1);
    let check = &result.checks[0];
    assert_eq!(check.name, "starttls");
    assert_eq!(check.outcome, CheckOutcome::Pass);
    let evidence = check.evidence.as_deref().unwrap();
    assert!(evidence.contains("smtp_banner: 220 dummy.smtp ESMTP Service Ready"));
    assert!(evidence.contains("smtp_starttls_advertised: yes"));
}

#[tokio::test]
async fn canary_flags_missing_starttls() {
    let port = spawn_smtp_server(b"250-dummy.smtp\r\n250 SIZE 35882577\r\n").await;

    let runner = StarttlsProbeRunner::new(port, 2000);
    let result = runner.run_single("127.0.0.1", CANARY_CHECK).await.unwrap();

    let check = &result.checks[0];
    assert_eq!(check.outcome, CheckOutcome::Fail);
    assert!(check
        .evidence
        .as_deref()
        .unwrap()
        .contains("smtp_starttls_advertised: no"));
}

#[tokio::test]
async fn canary_errors_when_nothing_listens() {
    // Bind then drop to get a port that is almost certainly closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let runner = StarttlsProbeRunner::new(port, 500);
    assert!(runner.run_single("127.0.0.1", CANARY_CHECK).await.is_err());
}
