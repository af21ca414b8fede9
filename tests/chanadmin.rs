//! Integration tests for `:admin`, the channel administration verb:
//! settings, sizing, passwords, status gates, delegation, purge, delete.

mod common;

use common::{TestClient, TestServer};

async fn join(client: &mut TestClient, channel: &str) -> Vec<String> {
    client
        .send_line(&format!("channel open {channel}"))
        .await
        .expect("send open");
    client
        .recv_until(|l| l.contains("is live"))
        .await
        .expect("join greeting")
}

async fn recv_lines(client: &mut TestClient, n: usize) -> Vec<String> {
    let mut lines = Vec::with_capacity(n);
    for _ in 0..n {
        lines.push(client.recv_line().await.expect("line"));
    }
    lines
}

#[tokio::test]
async fn settings_report_and_resizing() {
    let server = TestServer::spawn(18401).await.expect("spawn");
    let mut alice = server
        .connect_registered("alice", "pw")
        .await
        .expect("alice");
    join(&mut alice, "vault").await;

    alice.send_line(":admin settings").await.expect("settings");
    let lines = recv_lines(&mut alice, 7).await;
    assert_eq!(
        lines,
        vec![
            "channel 'vault':".to_string(),
            "  owner: alice".to_string(),
            "  delegate: none".to_string(),
            "  status: open".to_string(),
            "  buffer: 100, replay: 10".to_string(),
            "  members: 1, retained lines: 0".to_string(),
            "  password: no".to_string(),
        ]
    );

    alice.send_line("hello").await.expect("post");
    assert_eq!(alice.recv_line().await.expect("echo"), "alice: hello");

    alice.send_line(":admin buffer 50").await.expect("buffer");
    assert_eq!(
        alice.recv_line().await.expect("reply"),
        "** buffer resized to 50"
    );
    alice.send_line(":admin replay 5").await.expect("replay");
    assert_eq!(
        alice.recv_line().await.expect("reply"),
        "** replay resized to 5"
    );
    alice.send_line(":admin replay 200").await.expect("replay");
    assert_eq!(
        alice.recv_line().await.expect("error"),
        "error: invalid configuration: replay size must be between 1 and the buffer size (50)"
    );

    alice.send_line(":admin settings").await.expect("settings");
    let lines = recv_lines(&mut alice, 7).await;
    assert_eq!(lines[4], "  buffer: 50, replay: 5");
    assert_eq!(lines[5], "  members: 1, retained lines: 1");
}

#[tokio::test]
async fn password_guards_the_door() {
    let server = TestServer::spawn(18402).await.expect("spawn");
    let mut alice = server
        .connect_registered("alice", "pw")
        .await
        .expect("alice");
    let mut bob = server.connect_registered("bob", "pw").await.expect("bob");
    join(&mut alice, "vault").await;

    alice
        .send_line(":admin password sesame")
        .await
        .expect("set");
    assert_eq!(
        alice.recv_line().await.expect("reply"),
        "** password updated"
    );

    let lines = bob.cmd("channel open vault").await.expect("no password");
    assert_eq!(lines, vec!["error: wrong channel password".to_string()]);
    let lines = bob.cmd("channel open vault nope").await.expect("wrong");
    assert_eq!(lines, vec!["error: wrong channel password".to_string()]);

    bob.send_line("channel open vault sesame")
        .await
        .expect("open");
    bob.recv_until(|l| l.contains("is live"))
        .await
        .expect("greeting");
    alice.drain().await;

    // Members without the owner's keys cannot touch the password.
    bob.send_line(":admin password mine").await.expect("send");
    assert_eq!(
        bob.recv_line().await.expect("denied"),
        "error: you do not own that"
    );
    bob.cmd(":exit").await.expect("exit");
    alice.drain().await;

    alice.send_line(":admin password").await.expect("clear");
    assert_eq!(
        alice.recv_line().await.expect("reply"),
        "** password cleared"
    );
    let greeting = join(&mut bob, "vault").await;
    assert_eq!(greeting[0], "** joined 'vault' as bob (2 here)");
}

#[tokio::test]
async fn status_gates_joining_and_posting() {
    let server = TestServer::spawn(18403).await.expect("spawn");
    let mut alice = server
        .connect_registered("alice", "pw")
        .await
        .expect("alice");
    let mut bob = server.connect_registered("bob", "pw").await.expect("bob");
    join(&mut alice, "vault").await;

    alice.send_line(":admin status locked").await.expect("lock");
    assert_eq!(
        alice.recv_line().await.expect("broadcast"),
        "** 'vault' is now locked"
    );

    let lines = bob.cmd("channel open vault").await.expect("locked");
    assert_eq!(
        lines,
        vec!["error: the channel is not accepting new members".to_string()]
    );

    // An invitation opens the lock once.
    alice.send_line(":invite bob").await.expect("invite");
    assert_eq!(alice.recv_line().await.expect("reply"), "** invited bob");
    assert_eq!(
        bob.recv_line().await.expect("nudge"),
        "** new inbox message from alice"
    );

    let greeting = join(&mut bob, "vault").await;
    assert_eq!(greeting[0], "** joined 'vault' as bob (2 here)");
    alice.drain().await;
    bob.cmd(":exit").await.expect("exit");
    alice.drain().await;

    let lines = bob.cmd("channel open vault").await.expect("consumed");
    assert_eq!(
        lines,
        vec!["error: the channel is not accepting new members".to_string()]
    );
    let lines = bob.cmd("messages list").await.expect("list");
    assert_eq!(lines[0], "inbox (1):");
    assert!(lines[1].contains("you are invited to 'vault'"));

    // Archived channels refuse posts as well as joins.
    alice
        .send_line(":admin status archived")
        .await
        .expect("archive");
    assert_eq!(
        alice.recv_line().await.expect("broadcast"),
        "** 'vault' is now archived"
    );
    alice.send_line("hello").await.expect("post");
    assert_eq!(
        alice.recv_line().await.expect("refused"),
        "error: the channel is archived"
    );
    let lines = bob.cmd("channel open vault").await.expect("archived");
    assert_eq!(
        lines,
        vec!["error: the channel is not accepting new members".to_string()]
    );

    alice.send_line(":admin status open").await.expect("reopen");
    assert_eq!(
        alice.recv_line().await.expect("broadcast"),
        "** 'vault' is now open"
    );
    let greeting = join(&mut bob, "vault").await;
    assert_eq!(greeting[0], "** joined 'vault' as bob (2 here)");
}

#[tokio::test]
async fn delegate_holds_the_keys_but_not_the_deed() {
    let server = TestServer::spawn(18404).await.expect("spawn");
    let mut alice = server
        .connect_registered("alice", "pw")
        .await
        .expect("alice");
    let mut bob = server.connect_registered("bob", "pw").await.expect("bob");
    let mut carol = server
        .connect_registered("carol", "pw")
        .await
        .expect("carol");
    join(&mut alice, "lobby").await;
    join(&mut bob, "lobby").await;
    join(&mut carol, "lobby").await;
    alice.drain().await;
    bob.drain().await;

    alice
        .send_line(":admin delegate bob")
        .await
        .expect("delegate");
    assert_eq!(
        alice.recv_line().await.expect("reply"),
        "** bob is now the channel administrator"
    );

    // The delegate can resize and moderate.
    bob.send_line(":admin buffer 64").await.expect("buffer");
    assert_eq!(
        bob.recv_line().await.expect("reply"),
        "** buffer resized to 64"
    );
    bob.send_line(":kick carol").await.expect("kick");
    assert_eq!(
        bob.recv_line().await.expect("broadcast"),
        "** carol was kicked by bob"
    );
    let lines = carol.until_prompt().await.expect("eviction");
    assert_eq!(lines, vec!["** you were kicked from 'lobby' by bob".to_string()]);
    alice.drain().await;

    // Only the owner may move the delegation.
    bob.send_line(":admin delegate carol").await.expect("send");
    assert_eq!(
        bob.recv_line().await.expect("denied"),
        "error: you do not own that"
    );
    alice.send_line(":admin delegate ghost").await.expect("send");
    assert_eq!(
        alice.recv_line().await.expect("unknown"),
        "error: no such account: ghost"
    );

    alice.send_line(":admin delegate").await.expect("clear");
    assert_eq!(
        alice.recv_line().await.expect("reply"),
        "** delegation cleared"
    );
    bob.send_line(":admin buffer 32").await.expect("send");
    assert_eq!(
        bob.recv_line().await.expect("denied"),
        "error: you do not own that"
    );
}

#[tokio::test]
async fn purge_clears_history_and_delete_frees_the_name() {
    let server = TestServer::spawn(18405).await.expect("spawn");
    let mut alice = server
        .connect_registered("alice", "pw")
        .await
        .expect("alice");
    let mut bob = server.connect_registered("bob", "pw").await.expect("bob");
    join(&mut alice, "lobby").await;
    for body in ["m1", "m2"] {
        alice.send_line(body).await.expect("post");
        assert_eq!(
            alice.recv_line().await.expect("echo"),
            format!("alice: {body}")
        );
    }

    let greeting = join(&mut bob, "lobby").await;
    assert_eq!(greeting[1], "alice: m1");
    assert_eq!(greeting[2], "alice: m2");
    bob.cmd(":exit").await.expect("exit");
    alice.drain().await;

    alice.send_line(":admin purge").await.expect("purge");
    assert_eq!(
        alice.recv_line().await.expect("reply"),
        "** history purged"
    );

    let greeting = join(&mut bob, "lobby").await;
    assert_eq!(
        greeting,
        vec![
            "** joined 'lobby' as bob (2 here)".to_string(),
            "** 'lobby' is live; :help for commands, :exit to leave".to_string(),
        ]
    );
    alice.drain().await;

    // Deletion notifies every member and returns them to the menu.
    alice.send_line(":admin delete").await.expect("delete");
    let lines = alice.until_prompt().await.expect("notice");
    assert_eq!(lines, vec!["** channel 'lobby' was deleted".to_string()]);
    let lines = bob.until_prompt().await.expect("notice");
    assert_eq!(lines, vec!["** channel 'lobby' was deleted".to_string()]);

    let lines = alice.cmd("channel list").await.expect("list");
    assert_eq!(lines, vec!["no channels yet".to_string()]);
}
