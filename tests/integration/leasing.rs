use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Node leasing
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_first_household_gets_smallest_node() -> Result<()> {
    let server = TestServer::start().await?;
    let mut stream = TcpStream::connect(server.addr).await?;

    assert_eq!(request(&mut stream, "rni").await?, "pni,3;");

    // Same connection asking again is refused, not given a second node.
    assert_eq!(request(&mut stream, "rni;").await?, "pni,-1;");
    assert_eq!(server.state.available_nodes().await, vec![5, 6]);

    server.stop().await
}

#[tokio::test]
async fn test_distinct_households_get_distinct_nodes() -> Result<()> {
    if !skip_unless_aliases() {
        return Ok(());
    }
    let server = TestServer::start().await?;

    let mut a = server.connect_from(2).await?;
    let mut b = server.connect_from(3).await?;
    assert_eq!(request(&mut a, "rni").await?, "pni,3;");
    assert_eq!(request(&mut b, "rni").await?, "pni,5;");

    server.stop().await
}

#[tokio::test]
async fn test_exhausted_pool_returns_sentinel() -> Result<()> {
    if !skip_unless_aliases() {
        return Ok(());
    }
    let server = TestServer::start().await?;

    let mut held = Vec::new();
    for (octet, expected) in [(2, "pni,3;"), (3, "pni,5;"), (4, "pni,6;")] {
        let mut stream = server.connect_from(octet).await?;
        assert_eq!(request(&mut stream, "rni").await?, expected);
        held.push(stream);
    }

    let mut late = server.connect_from(5).await?;
    assert_eq!(request(&mut late, "rni").await?, "pni,-1;");
    assert!(server.state.available_nodes().await.is_empty());

    server.stop().await
}

#[tokio::test]
async fn test_reconnect_returns_node_to_pool() -> Result<()> {
    if !skip_unless_aliases() {
        return Ok(());
    }
    let server = TestServer::start().await?;

    let mut first = server.connect_from(2).await?;
    assert_eq!(request(&mut first, "rni").await?, "pni,3;");

    // Reconnecting retires the old worker and reclaims its node.
    let _second = server.connect_from(2).await?;
    expect_closed(&mut first).await?;

    let mut other = server.connect_from(3).await?;
    assert_eq!(request(&mut other, "rni").await?, "pni,3;");

    server.stop().await
}

#[tokio::test]
async fn test_disconnect_keeps_lease_by_default() -> Result<()> {
    if !skip_unless_aliases() {
        return Ok(());
    }
    let server = TestServer::start().await?;

    let mut a = server.connect_from(2).await?;
    assert_eq!(request(&mut a, "rni").await?, "pni,3;");
    drop(a);

    let mut b = server.connect_from(3).await?;
    assert_eq!(request(&mut b, "rni").await?, "pni,5;");

    server.stop().await
}

#[tokio::test]
async fn test_release_on_disconnect() -> Result<()> {
    if !skip_unless_aliases() {
        return Ok(());
    }
    let mut options = ServerOptions::default();
    options.network.release_on_disconnect = true;
    let server = TestServer::start_with(options).await?;

    let mut a = server.connect_from(2).await?;
    assert_eq!(request(&mut a, "rni").await?, "pni,3;");
    drop(a);
    server.wait_for_free_node(3).await?;

    let mut b = server.connect_from(3).await?;
    assert_eq!(request(&mut b, "rni").await?, "pni,3;");

    server.stop().await
}

#[tokio::test]
async fn test_idle_timeout_reclaims_lease() -> Result<()> {
    if !skip_unless_aliases() {
        return Ok(());
    }
    let mut options = ServerOptions::default();
    options.network.idle_timeout_secs = 1;
    let server = TestServer::start_with(options).await?;

    let mut a = server.connect_from(2).await?;
    assert_eq!(request(&mut a, "rni").await?, "pni,3;");

    // Node is released before the socket is closed.
    expect_closed(&mut a).await?;
    assert!(server.state.available_nodes().await.contains(&3));

    let mut b = server.connect_from(3).await?;
    assert_eq!(request(&mut b, "rni").await?, "pni,3;");

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_households_never_share_a_node() -> Result<()> {
    if !skip_unless_aliases() {
        return Ok(());
    }
    let server = TestServer::start().await?;

    let mut tasks = Vec::new();
    for octet in 2..=7u8 {
        let stream = server.connect_from(octet).await?;
        tasks.push(tokio::spawn(async move {
            let mut stream = stream;
            let reply = request(&mut stream, "rni").await;
            (reply, stream)
        }));
    }

    let mut granted = Vec::new();
    let mut refused = 0;
    let mut streams = Vec::new();
    for task in tasks {
        let (reply, stream) = task.await?;
        match reply?.as_str() {
            "pni,-1;" => refused += 1,
            other => granted.push(other.to_string()),
        }
        streams.push(stream);
    }

    granted.sort();
    assert_eq!(granted, vec!["pni,3;", "pni,5;", "pni,6;"]);
    assert_eq!(refused, 3);
    assert!(server.state.pool_is_partitioned().await);

    server.stop().await
}
