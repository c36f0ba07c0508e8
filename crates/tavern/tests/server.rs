//! Integration tests for the Tavern server: authentication, rooms,
//! broadcast, and the reconnection handoff, all over real sockets.

use std::sync::Arc;
use std::time::Duration;

use tavern::{BcryptHasher, TavernServer};
use tavern_transport::LineConnection;

// =========================================================================
// Helpers
// =========================================================================

/// A running server plus the tempdir backing its credential file.
struct TestServer {
    addr: String,
    _dir: tempfile::TempDir,
}

async fn start_server() -> TestServer {
    start_server_with(|b| b).await
}

async fn start_server_with<F>(configure: F) -> TestServer
where
    F: FnOnce(tavern::TavernServerBuilder) -> tavern::TavernServerBuilder,
{
    let dir = tempfile::tempdir().expect("tempdir");
    let builder = TavernServer::builder()
        .bind_addr("127.0.0.1:0")
        .credentials_path(dir.path().join("users.txt"))
        // No model service in tests; point at a dead port.
        .llm_host("http://127.0.0.1:1");

    let server = configure(builder)
        // Minimum bcrypt cost keeps auth fast.
        .build(BcryptHasher::new(4))
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    TestServer { addr, _dir: dir }
}

async fn connect(addr: &str) -> Arc<LineConnection> {
    LineConnection::connect(addr).await.expect("should connect")
}

/// Receives one line, failing the test if the server stalls.
async fn recv(conn: &LineConnection) -> String {
    tokio::time::timeout(Duration::from_secs(5), conn.recv_line())
        .await
        .expect("server should answer within 5s")
        .expect("transport should stay healthy")
        .expect("connection should stay open")
}

/// Skips informational lines until one matches the predicate.
async fn recv_until<F>(conn: &LineConnection, pred: F) -> String
where
    F: Fn(&str) -> bool,
{
    loop {
        let line = recv(conn).await;
        if pred(&line) {
            return line;
        }
    }
}

/// Waits until the server closes this connection.
async fn recv_eof(conn: &LineConnection) {
    loop {
        let line = tokio::time::timeout(
            Duration::from_secs(5),
            conn.recv_line(),
        )
        .await
        .expect("server should close within 5s")
        .expect("transport should stay healthy");
        if line.is_none() {
            return;
        }
    }
}

/// Registers a fresh user and returns the reconnection token.
async fn register(
    conn: &LineConnection,
    username: &str,
    password: &str,
) -> String {
    recv_until(conn, |l| l.starts_with("LOGIN ")).await;
    conn.send_line(&format!("REGISTER {username} {password}"))
        .await
        .expect("send");

    let token_line =
        recv_until(conn, |l| l.starts_with("AUTH_TOKEN ")).await;
    recv_until(conn, |l| l.starts_with("Welcome ")).await;
    token_line["AUTH_TOKEN ".len()..].to_string()
}

async fn join(conn: &LineConnection, room: &str) {
    conn.send_line(&format!("JOIN {room}")).await.expect("send");
    recv_until(conn, |l| l == format!("Joined room: {room}")).await;
}

// =========================================================================
// Authentication
// =========================================================================

#[tokio::test]
async fn test_register_issues_token_and_welcome() {
    let server = start_server().await;
    let conn = connect(&server.addr).await;

    recv_until(&conn, |l| l.starts_with("LOGIN ")).await;
    conn.send_line("REGISTER alice pw1").await.expect("send");

    assert_eq!(recv(&conn).await, "Registration successful.");
    assert_eq!(recv(&conn).await, "Authentication successful.");
    let token_line = recv(&conn).await;
    assert!(token_line.starts_with("AUTH_TOKEN "));
    assert_eq!(token_line["AUTH_TOKEN ".len()..].len(), 44);
    assert_eq!(recv(&conn).await, "Welcome alice!");
}

#[tokio::test]
async fn test_login_with_registered_credentials() {
    let server = start_server().await;

    let first = connect(&server.addr).await;
    register(&first, "alice", "pw1").await;
    first.send_line("QUIT").await.expect("send");
    // EOF guarantees the server finished tearing the session down.
    recv_eof(&first).await;

    let second = connect(&server.addr).await;
    recv_until(&second, |l| l.starts_with("LOGIN ")).await;
    second.send_line("LOGIN alice pw1").await.expect("send");
    assert_eq!(recv(&second).await, "Authentication successful.");
    recv_until(&second, |l| l == "Welcome alice!").await;
}

#[tokio::test]
async fn test_login_wrong_password_counts_attempt() {
    let server = start_server().await;
    let conn = connect(&server.addr).await;

    recv_until(&conn, |l| l.starts_with("LOGIN ")).await;
    conn.send_line("LOGIN ghost nope").await.expect("send");

    assert_eq!(recv(&conn).await, "Invalid username or password");
    assert_eq!(recv(&conn).await, "Authentication failed. Attempt 1 of 3");
}

#[tokio::test]
async fn test_three_failed_attempts_disconnect() {
    let server = start_server().await;
    let conn = connect(&server.addr).await;

    for _ in 0..3 {
        recv_until(&conn, |l| l.starts_with("LOGIN ")).await;
        conn.send_line("LOGIN ghost nope").await.expect("send");
        recv_until(&conn, |l| l.starts_with("Authentication failed."))
            .await;
    }

    recv_until(&conn, |l| {
        l == "Maximum authentication attempts reached. Disconnecting..."
    })
    .await;
    recv_eof(&conn).await;
}

#[tokio::test]
async fn test_malformed_auth_line_counts_attempt() {
    let server = start_server().await;
    let conn = connect(&server.addr).await;

    recv_until(&conn, |l| l.starts_with("LOGIN ")).await;
    conn.send_line("HELLO there").await.expect("send");

    assert_eq!(recv(&conn).await, "Invalid authentication format");
    assert_eq!(recv(&conn).await, "Authentication failed. Attempt 1 of 3");
}

#[tokio::test]
async fn test_register_duplicate_username_rejected() {
    let server = start_server().await;

    let first = connect(&server.addr).await;
    register(&first, "bob", "pw1").await;

    let second = connect(&server.addr).await;
    recv_until(&second, |l| l.starts_with("LOGIN ")).await;
    second.send_line("REGISTER bob other").await.expect("send");
    assert_eq!(
        recv(&second).await,
        "Username already exists. Please choose a different username."
    );
}

#[tokio::test]
async fn test_concurrent_register_same_name_exactly_one_wins() {
    let server = start_server().await;

    let a = connect(&server.addr).await;
    let b = connect(&server.addr).await;
    recv_until(&a, |l| l.starts_with("LOGIN ")).await;
    recv_until(&b, |l| l.starts_with("LOGIN ")).await;

    let (ra, rb) = tokio::join!(
        a.send_line("REGISTER bob pw1"),
        b.send_line("REGISTER bob pw1"),
    );
    ra.expect("send");
    rb.expect("send");

    let outcome = |l: &str| {
        l == "Registration successful."
            || l.starts_with("Username already exists")
    };
    let oa = recv_until(&a, outcome).await;
    let ob = recv_until(&b, outcome).await;

    let successes = [&oa, &ob]
        .iter()
        .filter(|l| l.as_str() == "Registration successful.")
        .count();
    assert_eq!(successes, 1, "got {oa:?} and {ob:?}");
}

#[tokio::test]
async fn test_fresh_login_while_active_rejected() {
    let server = start_server().await;

    let first = connect(&server.addr).await;
    register(&first, "alice", "pw1").await;

    let second = connect(&server.addr).await;
    recv_until(&second, |l| l.starts_with("LOGIN ")).await;
    second.send_line("LOGIN alice pw1").await.expect("send");
    assert_eq!(recv(&second).await, "Error: Username already active.");
    assert_eq!(
        recv(&second).await,
        "Authentication failed. Attempt 1 of 3"
    );

    // The original session is unaffected.
    first.send_line("HELP").await.expect("send");
    recv_until(&first, |l| l == "Available commands:").await;
}

// =========================================================================
// Rooms and broadcast
// =========================================================================

#[tokio::test]
async fn test_join_and_send_broadcasts_in_order() {
    let server = start_server().await;

    let alice = connect(&server.addr).await;
    register(&alice, "alice", "pw1").await;
    join(&alice, "general").await;

    let bob = connect(&server.addr).await;
    register(&bob, "bob", "pw2").await;
    join(&bob, "general").await;

    for i in 0..3 {
        alice
            .send_line(&format!("SEND message {i}"))
            .await
            .expect("send");
    }

    for i in 0..3 {
        let line = recv_until(&bob, |l| l.starts_with("alice: ")).await;
        assert_eq!(line, format!("alice: message {i}"));
    }
    // The author hears their own messages too.
    for i in 0..3 {
        let line = recv_until(&alice, |l| l.starts_with("alice: ")).await;
        assert_eq!(line, format!("alice: message {i}"));
    }
}

#[tokio::test]
async fn test_join_notifies_existing_members() {
    let server = start_server().await;

    let alice = connect(&server.addr).await;
    register(&alice, "alice", "pw1").await;
    join(&alice, "general").await;

    let bob = connect(&server.addr).await;
    register(&bob, "bob", "pw2").await;
    join(&bob, "general").await;

    recv_until(&alice, |l| l == "[bob enters the room]").await;
}

#[tokio::test]
async fn test_join_second_room_leaves_first() {
    let server = start_server().await;

    let alice = connect(&server.addr).await;
    register(&alice, "alice", "pw1").await;
    join(&alice, "first").await;

    let bob = connect(&server.addr).await;
    register(&bob, "bob", "pw2").await;
    join(&bob, "first").await;

    alice.send_line("JOIN second").await.expect("send");
    recv_until(&alice, |l| l == "Left room: first").await;
    recv_until(&alice, |l| l == "Joined room: second").await;
    recv_until(&bob, |l| l == "[alice leaves the room]").await;

    // A message in the old room no longer reaches alice; her next
    // line is from the new room.
    bob.send_line("SEND only for first").await.expect("send");
    alice.send_line("SEND hello second").await.expect("send");
    let line = recv_until(&alice, |l| l.contains(':')).await;
    assert_eq!(line, "alice: hello second");
}

#[tokio::test]
async fn test_send_without_room_prompts_join() {
    let server = start_server().await;
    let conn = connect(&server.addr).await;
    register(&conn, "alice", "pw1").await;

    conn.send_line("SEND hello?").await.expect("send");
    assert_eq!(
        recv(&conn).await,
        "You are not in a room. Use JOIN <room_name> to join a room."
    );
}

#[tokio::test]
async fn test_leave_room_and_leave_again() {
    let server = start_server().await;
    let conn = connect(&server.addr).await;
    register(&conn, "alice", "pw1").await;
    join(&conn, "general").await;

    conn.send_line("LEAVE").await.expect("send");
    recv_until(&conn, |l| l == "Left room: general").await;

    conn.send_line("LEAVE").await.expect("send");
    assert_eq!(recv(&conn).await, "You are not in a room.");
}

#[tokio::test]
async fn test_list_rooms_empty_then_sorted() {
    let server = start_server().await;
    let conn = connect(&server.addr).await;
    register(&conn, "alice", "pw1").await;

    conn.send_line("LIST").await.expect("send");
    assert_eq!(recv(&conn).await, "No rooms available.");

    join(&conn, "zoo").await;
    join(&conn, "attic").await;

    conn.send_line("LIST").await.expect("send");
    recv_until(&conn, |l| l == "Available rooms:").await;
    assert_eq!(recv(&conn).await, "- attic");
    assert_eq!(recv(&conn).await, "- zoo");
}

#[tokio::test]
async fn test_unknown_command_names_itself() {
    let server = start_server().await;
    let conn = connect(&server.addr).await;
    register(&conn, "alice", "pw1").await;

    conn.send_line("DANCE").await.expect("send");
    assert_eq!(
        recv(&conn).await,
        "Unknown command: DANCE. Type HELP for a list of commands."
    );
}

#[tokio::test]
async fn test_quit_says_goodbye_and_closes() {
    let server = start_server().await;
    let conn = connect(&server.addr).await;
    register(&conn, "alice", "pw1").await;

    conn.send_line("QUIT").await.expect("send");
    recv_until(&conn, |l| l == "Goodbye alice!").await;
    recv_eof(&conn).await;
}

#[tokio::test]
async fn test_quit_in_room_notifies_members() {
    let server = start_server().await;

    let alice = connect(&server.addr).await;
    register(&alice, "alice", "pw1").await;
    join(&alice, "general").await;

    let bob = connect(&server.addr).await;
    register(&bob, "bob", "pw2").await;
    join(&bob, "general").await;

    alice.send_line("QUIT").await.expect("send");
    recv_until(&bob, |l| l == "[alice leaves the room]").await;
}

// =========================================================================
// Timeouts and sweeping
// =========================================================================

#[tokio::test]
async fn test_idle_connection_is_torn_down_and_room_notified() {
    let server =
        start_server_with(|b| b.idle_timeout(Duration::from_millis(150)))
            .await;

    let bob = connect(&server.addr).await;
    register(&bob, "bob", "pw2").await;
    join(&bob, "general").await;

    let alice = connect(&server.addr).await;
    register(&alice, "alice", "pw1").await;
    join(&alice, "general").await;

    // Alice goes silent. Bob keeps his own idle timer fresh with HELP
    // while waiting for her departure to reach the room.
    let mut saw_departure = false;
    for _ in 0..40 {
        bob.send_line("HELP").await.expect("send");
        let line = recv_until(&bob, |l| {
            l == "[alice leaves the room]"
                || l == "QUIT - Disconnect from the server"
        })
        .await;
        if line == "[alice leaves the room]" {
            saw_departure = true;
            break;
        }
        // Pause between polls, staying well inside bob's own window.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(saw_departure, "silent member should be evicted");
    recv_eof(&alice).await;
}

#[tokio::test]
async fn test_expired_token_rejected_after_sweep() {
    let server = start_server_with(|b| {
        b.token_ttl(Duration::from_millis(50))
            .sweep_interval(Duration::from_millis(50))
    })
    .await;

    let old = connect(&server.addr).await;
    let token = register(&old, "alice", "pw1").await;
    old.send_line("QUIT").await.expect("send");
    recv_eof(&old).await;

    // Several sweep ticks past the TTL.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let new = connect(&server.addr).await;
    recv_until(&new, |l| l.starts_with("LOGIN ")).await;
    new.send_line(&format!("RECONNECT {token}"))
        .await
        .expect("send");

    assert_eq!(
        recv(&new).await,
        "Invalid or expired token. Please login with credentials."
    );
}

// =========================================================================
// Reconnection
// =========================================================================

#[tokio::test]
async fn test_reconnect_hands_off_room_and_kicks_old_connection() {
    let server = start_server().await;

    let old = connect(&server.addr).await;
    let token = register(&old, "alice", "pw1").await;
    join(&old, "general").await;

    let bob = connect(&server.addr).await;
    register(&bob, "bob", "pw2").await;
    join(&bob, "general").await;

    let new = connect(&server.addr).await;
    recv_until(&new, |l| l.starts_with("LOGIN ")).await;
    new.send_line(&format!("RECONNECT {token}"))
        .await
        .expect("send");

    recv_until(&new, |l| l == "Reconnected to room: general").await;
    recv_until(&new, |l| l == "Welcome alice!").await;
    recv_until(&bob, |l| l == "[alice re-enters the room]").await;

    // No departure is broadcast for the superseded connection, and the
    // old socket is closed by the server.
    recv_eof(&old).await;

    // The resumed session is fully live in the room.
    new.send_line("SEND back again").await.expect("send");
    recv_until(&bob, |l| l == "alice: back again").await;
}

#[tokio::test]
async fn test_reconnect_without_room_restores_identity_only() {
    let server = start_server().await;

    let old = connect(&server.addr).await;
    let token = register(&old, "alice", "pw1").await;

    let new = connect(&server.addr).await;
    recv_until(&new, |l| l.starts_with("LOGIN ")).await;
    new.send_line(&format!("RECONNECT {token}"))
        .await
        .expect("send");

    // Straight to the greeting: no room line, no fresh token.
    assert_eq!(recv(&new).await, "Welcome alice!");
    recv_eof(&old).await;
}

#[tokio::test]
async fn test_reconnect_bogus_token_fails_attempt() {
    let server = start_server().await;
    let conn = connect(&server.addr).await;

    recv_until(&conn, |l| l.starts_with("LOGIN ")).await;
    conn.send_line("RECONNECT not-a-real-token")
        .await
        .expect("send");

    assert_eq!(
        recv(&conn).await,
        "Invalid or expired token. Please login with credentials."
    );
    assert_eq!(recv(&conn).await, "Authentication failed. Attempt 1 of 3");
}

#[tokio::test]
async fn test_reconnect_expired_token_rejected() {
    let server =
        start_server_with(|b| b.token_ttl(Duration::ZERO)).await;

    let old = connect(&server.addr).await;
    let token = register(&old, "alice", "pw1").await;
    old.send_line("QUIT").await.expect("send");
    recv_eof(&old).await;

    let new = connect(&server.addr).await;
    recv_until(&new, |l| l.starts_with("LOGIN ")).await;
    new.send_line(&format!("RECONNECT {token}"))
        .await
        .expect("send");

    assert_eq!(
        recv(&new).await,
        "Invalid or expired token. Please login with credentials."
    );
}

#[tokio::test]
async fn test_failed_reconnect_leaves_live_session_untouched() {
    let server = start_server().await;

    let alice = connect(&server.addr).await;
    register(&alice, "alice", "pw1").await;
    join(&alice, "general").await;

    let intruder = connect(&server.addr).await;
    recv_until(&intruder, |l| l.starts_with("LOGIN ")).await;
    intruder
        .send_line("RECONNECT forged-token")
        .await
        .expect("send");
    recv_until(&intruder, |l| l.starts_with("Invalid or expired token"))
        .await;

    alice.send_line("SEND still here").await.expect("send");
    recv_until(&alice, |l| l == "alice: still here").await;
}

#[tokio::test]
async fn test_reconnect_racing_join_still_closes_old_connection() {
    let server = start_server().await;

    let old = connect(&server.addr).await;
    let token = register(&old, "alice", "pw1").await;
    join(&old, "general").await;

    let new = connect(&server.addr).await;
    recv_until(&new, |l| l.starts_with("LOGIN ")).await;

    // Fire a room switch on the doomed connection at the same moment
    // the replacement reconnects. The old session's JOIN may land after
    // the handoff has already taken its room, leaving it holding a
    // membership it no longer owns; its teardown must still remove that
    // membership, or the room keeps its outbound channel alive and the
    // socket never closes.
    let resume_line = format!("RECONNECT {token}");
    let (switched, resumed) = tokio::join!(
        old.send_line("JOIN refuge"),
        new.send_line(&resume_line),
    );
    switched.expect("send");
    resumed.expect("send");

    recv_until(&new, |l| l == "Welcome alice!").await;
    recv_eof(&old).await;

    // The resumed session is live whichever way the race went.
    new.send_line("HELP").await.expect("send");
    recv_until(&new, |l| l == "Available commands:").await;
}

#[tokio::test]
async fn test_token_survives_disconnect_without_quit() {
    let server = start_server().await;

    let old = connect(&server.addr).await;
    let token = register(&old, "alice", "pw1").await;
    join(&old, "general").await;

    // Abrupt drop, as a network failure would look to the server.
    old.close().await.expect("close");

    let new = connect(&server.addr).await;
    recv_until(&new, |l| l.starts_with("LOGIN ")).await;
    new.send_line(&format!("RECONNECT {token}"))
        .await
        .expect("send");
    recv_until(&new, |l| l == "Welcome alice!").await;
}
