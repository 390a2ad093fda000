use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Load and trade requests
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_load_request_reports_amperage() -> Result<()> {
    let server = TestServer::start().await?;
    let mut stream = TcpStream::connect(server.addr).await?;

    // Startup load: node 3 exports 5 A, node 5 draws 25 A.
    assert_eq!(request(&mut stream, "rql,3").await?, "par,-5;");
    assert_eq!(request(&mut stream, "rql,5;").await?, "par,25;");

    server.state.set_amperage(4, 25.0).await?;
    assert_eq!(request(&mut stream, "rql,4").await?, "par,25;");

    server.state.set_amperage(4, 1.5).await?;
    assert_eq!(request(&mut stream, "rql,4").await?, "par,1.5;");

    server.stop().await
}

#[tokio::test]
async fn test_unknown_node_is_an_error_reply() -> Result<()> {
    let server = TestServer::start().await?;
    let mut stream = TcpStream::connect(server.addr).await?;

    assert_eq!(request(&mut stream, "rql,9").await?, "err,unknown_node;");
    // Connection survives.
    assert_eq!(request(&mut stream, "rni").await?, "pni,3;");

    server.stop().await
}

#[tokio::test]
async fn test_trade_estimate() -> Result<()> {
    let server = TestServer::start().await?;
    let mut stream = TcpStream::connect(server.addr).await?;

    assert_eq!(request(&mut stream, "rlc,3,5,1,0,0,0").await?, "plc,1;");
    assert_eq!(request(&mut stream, "rlc,3,6,0,10,20,30;").await?, "plc,0;");

    server.stop().await
}

#[tokio::test]
async fn test_engine_failure_keeps_connection_open() -> Result<()> {
    let server = TestServer::start_with(ServerOptions {
        engine: Box::new(FailingEngine),
        ..ServerOptions::default()
    })
    .await?;
    let mut stream = TcpStream::connect(server.addr).await?;

    assert_eq!(
        request(&mut stream, "rlc,3,5,1,0,0,0").await?,
        "err,estimation_unavailable;"
    );
    assert_eq!(request(&mut stream, "rql,5").await?, "par,25;");

    server.stop().await
}

#[tokio::test]
async fn test_trade_on_unloaded_node_is_rejected() -> Result<()> {
    let server = TestServer::start().await?;
    let mut stream = TcpStream::connect(server.addr).await?;

    // Buyer 1 is the transformer, which has no cable slot.
    assert_eq!(
        request(&mut stream, "rlc,0,0,0,1,5,1").await?,
        "err,invalid_trade;"
    );
    assert_eq!(request(&mut stream, "rlc,3,5,1,0,0,0").await?, "plc,1;");

    server.stop().await
}

#[tokio::test]
async fn test_several_requests_in_one_write() -> Result<()> {
    let server = TestServer::start().await?;
    let mut stream = TcpStream::connect(server.addr).await?;

    stream.write_all(b"rni;rql,5;rql,6\n").await?;
    assert_eq!(read_replies(&mut stream, 3).await?, "pni,3;par,25;par,15;");

    server.stop().await
}

// ══════════════════════════════════════════════════════════════════════════════
//  Protocol violations
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_unknown_header_closes_connection() -> Result<()> {
    let server = TestServer::start().await?;
    let mut stream = TcpStream::connect(server.addr).await?;

    stream.write_all(b"xyz,1,2").await?;
    expect_closed(&mut stream).await?;

    server.stop().await
}

#[tokio::test]
async fn test_malformed_requests_close_connection() -> Result<()> {
    let server = TestServer::start().await?;

    for bad in ["rql,abc", "rql", "rlc,3,5,1", "rlc,3,5,x,0,0,0", "rql,-4", "\n"] {
        let mut stream = TcpStream::connect(server.addr).await?;
        stream.write_all(bad.as_bytes()).await?;
        expect_closed(&mut stream)
            .await
            .with_context(|| format!("request {bad:?}"))?;
    }

    server.stop().await
}

#[tokio::test]
async fn test_violation_after_valid_request_still_answers_first() -> Result<()> {
    let server = TestServer::start().await?;
    let mut stream = TcpStream::connect(server.addr).await?;

    stream.write_all(b"rql,5;bogus;").await?;
    assert_eq!(read_replies(&mut stream, 1).await?, "par,25;");
    expect_closed(&mut stream).await?;

    server.stop().await
}
