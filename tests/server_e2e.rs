// tests/server_e2e.rs
// End-to-end scenarios over a real socket: handshake, commands, fan-out

mod test_utils;

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::time::sleep;

use augury::store::Store;
use test_utils::{TestClient, spawn_server};

fn in_millis(ms: i64) -> String {
    (Utc::now() + chrono::Duration::milliseconds(ms))
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[tokio::test]
async fn ping_round_trip() {
    let server = spawn_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client.send("ping").await;
    assert_eq!(client.recv_text().await, "pingpong");
}

#[tokio::test]
async fn unknown_command_keeps_the_session_open() {
    let server = spawn_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client.send("xxxx").await;
    assert_eq!(client.recv_text().await, "what");

    // still alive
    client.send("ping").await;
    assert_eq!(client.recv_text().await, "pingpong");
}

#[tokio::test]
async fn commands_require_authentication() {
    let server = spawn_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client.send("chts").await;
    assert_eq!(client.recv_text().await, "chtsfail");

    client.send("sndm1 hello").await;
    assert_eq!(client.recv_text().await, "sndmfail");
}

#[tokio::test]
async fn bad_token_is_rejected() {
    let server = spawn_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client.send("usernot-a-real-token").await;
    assert_eq!(client.recv_text().await, "token_fail");

    // validation failures keep the session
    client.send("ping").await;
    assert_eq!(client.recv_text().await, "pingpong");
}

#[tokio::test]
async fn create_join_and_send() {
    let server = spawn_server().await;

    let mut alice = TestClient::connect(server.addr).await;
    assert_eq!(alice.authenticate("token-alice").await, "Alice");

    alice.send("crtcHello").await;
    let created = alice.recv_text().await;
    assert_eq!(created, "crtccreated:1");
    alice.drain_chat_list().await;

    alice.send("cjtk1").await;
    let token = alice
        .recv_text()
        .await
        .strip_prefix("cjtk")
        .expect("cjtk reply")
        .to_string();
    assert!(token.contains('.'));

    let mut bob = TestClient::connect(server.addr).await;
    assert_eq!(bob.authenticate("token-bob").await, "Bob");

    bob.send(&format!("join{token}")).await;
    assert_eq!(bob.recv_text().await, "joinjoined");
    bob.drain_chat_list().await;

    // membership landed on both sides
    assert_eq!(
        server.store.chat_members(1).await.unwrap(),
        ["uid-alice", "uid-bob"]
    );
    assert_eq!(server.store.user_chat_ids("uid-bob").await.unwrap(), [1]);

    alice.send("sndm1 hi").await;
    assert_eq!(alice.recv_text().await, "sndmok");

    // the other member gets the message as a newm event
    let event = bob.recv_with_prefix("newm1,").await;
    let body: Value = serde_json::from_str(&event["newm1,".len()..]).unwrap();
    assert_eq!(body["content"], "hi");
    assert_eq!(body["sender"]["displayName"], "Alice");

    // exactly one message stored; preview line carries the display name
    let messages = server.store.chat_messages(1).await.unwrap();
    assert_eq!(messages.len(), 1);
    let chats = server.store.chats_by_ids(&[1]).await.unwrap();
    assert_eq!(chats[0].last_message, "Alice: hi");

    // the sender does not get their own newm
    sleep(Duration::from_millis(100)).await;
    alice.send("ping").await;
    assert_eq!(alice.recv_text().await, "pingpong");
}

#[tokio::test]
async fn tampered_join_token_is_rejected() {
    let server = spawn_server().await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.authenticate("token-alice").await;
    alice.send("crtcHello").await;
    alice.recv_text().await;
    alice.drain_chat_list().await;

    alice.send("cjtk1").await;
    let token = alice
        .recv_text()
        .await
        .strip_prefix("cjtk")
        .unwrap()
        .to_string();

    // flip the first hash character
    let mut tampered = token.clone().into_bytes();
    tampered[0] = if tampered[0] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(tampered).unwrap();

    let mut bob = TestClient::connect(server.addr).await;
    bob.authenticate("token-bob").await;
    bob.send(&format!("join{tampered}")).await;
    assert_eq!(bob.recv_text().await, "joininvalid_token");

    assert_eq!(server.store.chat_members(1).await.unwrap(), ["uid-alice"]);
}

#[tokio::test]
async fn membership_is_required_for_chat_commands() {
    let server = spawn_server().await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.authenticate("token-alice").await;
    alice.send("crtcPrivate").await;
    alice.recv_text().await;
    alice.drain_chat_list().await;

    let mut bob = TestClient::connect(server.addr).await;
    bob.authenticate("token-bob").await;

    bob.send("msgs1").await;
    assert_eq!(bob.recv_text().await, "msgsnot_member");
    bob.send("sndm1 hi").await;
    assert_eq!(bob.recv_text().await, "sndmnot_member");
    bob.send("cjtk1").await;
    assert_eq!(bob.recv_text().await, "cjtknot_member");
}

/// Drives a chat of three members through the whole assertion lifecycle:
/// casting, the closed casting window, voting, majority completion, scoring.
#[tokio::test]
async fn assertion_full_lifecycle() {
    let server = spawn_server().await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.authenticate("token-alice").await;
    alice.send("crtcForecasts").await;
    assert_eq!(alice.recv_text().await, "crtccreated:1");
    alice.drain_chat_list().await;

    alice.send("cjtk1").await;
    let token = alice
        .recv_text()
        .await
        .strip_prefix("cjtk")
        .unwrap()
        .to_string();

    let mut bob = TestClient::connect(server.addr).await;
    bob.authenticate("token-bob").await;
    bob.send(&format!("join{token}")).await;
    assert_eq!(bob.recv_text().await, "joinjoined");
    bob.drain_chat_list().await;

    let mut carol = TestClient::connect(server.addr).await;
    carol.authenticate("token-carol").await;
    carol.send(&format!("join{token}")).await;
    assert_eq!(carol.recv_text().await, "joinjoined");
    carol.drain_chat_list().await;

    // casting stays open for ~1.2s, validation opens ~1.3s after that
    let casting = in_millis(1200);
    let validation = in_millis(2500);
    alice
        .send(&format!("assr1,{validation},{casting},Will it rain tomorrow"))
        .await;
    // author-visible fan-out: the author's sessions see the newm too
    let (created, event) = alice.recv_pair("assrcreated:", "newm1,").await;
    assert_eq!(created, "assrcreated:1");
    let body: Value = serde_json::from_str(&event["newm1,".len()..]).unwrap();
    assert_eq!(body["type"], "assertion");
    assert_eq!(body["content"]["text"], "Will it rain tomorrow");

    // every member sees the new assertion
    bob.recv_with_prefix("newm1,").await;
    carol.recv_with_prefix("newm1,").await;

    bob.send("pred1,0.8,true").await;
    // the caller's own copy of the refreshed assertion is flagged
    let (reply, own) = bob.recv_pair("pred", "assr{").await;
    assert_eq!(reply, "predadded");
    let own: Value = serde_json::from_str(&own["assr".len()..]).unwrap();
    assert_eq!(own["didPredict"], true);

    carol.send("pred1,0.3,false").await;
    assert_eq!(carol.recv_with_prefix("pred").await, "predadded");

    // a second forecast from the same user does not go through
    bob.send("pred1,0.9,true").await;
    assert_eq!(bob.recv_with_prefix("pred").await, "predadd_failed");
    let row = server.store.assertion(1).await.unwrap().unwrap();
    assert_eq!(row.predictions.len(), 2);
    assert_eq!(row.predictions["uid-bob"].confidence, 0.8);

    // out-of-range confidence is rejected
    carol.send("pred1,1.5,true").await;
    assert_eq!(
        carol.recv_with_prefix("pred").await,
        "predinvalid_confidence"
    );

    // past the casting deadline, before the validation date
    sleep(Duration::from_millis(1400)).await;
    alice.send("pred1,0.9,true").await;
    assert_eq!(
        alice.recv_with_prefix("pred").await,
        "predcasting_deadline_passed"
    );
    alice.send("vote1,true").await;
    assert_eq!(alice.recv_with_prefix("vote").await, "votevoting_not_open");

    // past the validation date: voting opens
    sleep(Duration::from_millis(1300)).await;
    alice.send("vote1,true").await;
    assert_eq!(alice.recv_with_prefix("vote").await, "votevoted");
    // every member sees the refreshed, still-open assertion
    let open = bob.recv_with_prefix("assr{").await;
    let open: Value = serde_json::from_str(&open["assr".len()..]).unwrap();
    assert_eq!(open["completed"], false);

    let row = server.store.assertion(1).await.unwrap().unwrap();
    assert!(!row.completed, "one of three votes is not a majority");

    // the second yes vote reaches ceil(3/2) = 2 and settles the assertion
    bob.send("vote1,true").await;
    let (reply, event) = bob.recv_pair("vote", "assr{").await;
    assert_eq!(reply, "votevoted");
    let settled: Value = serde_json::from_str(&event["assr".len()..]).unwrap();
    assert_eq!(settled["completed"], true);
    assert_eq!(settled["finalAnswer"], true);

    let row = server.store.assertion(1).await.unwrap().unwrap();
    assert!(row.completed);
    assert!(row.final_answer);

    // |0.5-0.8|*1000 + 500 = 800 for Bob, -|0.5-0.3|*1000 + 500 = 300 for Carol
    let stats = server.store.chat_stats(1).await.unwrap();
    assert_eq!(stats.score_sum["uid-bob"], 800);
    assert_eq!(stats.score_sum["uid-carol"], 300);
    assert_eq!(stats.score_sum["uid-alice"], 0);
    assert_eq!(stats.predictions["uid-bob"], 1);
    assert_eq!(stats.predictions["uid-carol"], 1);

    // completion is terminal: no further votes, no re-scoring
    carol.send("vote1,false").await;
    assert_eq!(
        carol.recv_with_prefix("vote").await,
        "voteassertion_complete"
    );
    let stats = server.store.chat_stats(1).await.unwrap();
    assert_eq!(stats.score_sum["uid-bob"], 800);
    assert_eq!(stats.predictions["uid-bob"], 1);

    // the member scoreboard reflects the settled scores
    alice.send("memb1").await;
    let memb = alice.recv_with_prefix("memb1,").await;
    let members: Value = serde_json::from_str(&memb["memb1,".len()..]).unwrap();
    let names: Vec<&str> = members
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["displayName"].as_str().unwrap())
        .collect();
    // Bob 800, Alice 500 (no forecasts), Carol 300
    assert_eq!(names, ["Bob", "Alice", "Carol"]);
    assert_eq!(members[0]["elo"], 800);
    assert_eq!(members[1]["elo"], 500);
    assert_eq!(members[2]["elo"], 300);
}

#[tokio::test]
async fn assertion_rejects_bad_dates() {
    let server = spawn_server().await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.authenticate("token-alice").await;
    alice.send("crtcForecasts").await;
    alice.recv_text().await;
    alice.drain_chat_list().await;

    // casting deadline already behind us
    let past = in_millis(-5000);
    let future = in_millis(60_000);
    alice.send(&format!("assr1,{future},{past},too late")).await;
    assert_eq!(alice.recv_text().await, "assrcasting_deadline_past");

    // validation before the casting deadline
    let casting = in_millis(60_000);
    let validation = in_millis(30_000);
    alice
        .send(&format!("assr1,{validation},{casting},backwards"))
        .await;
    assert_eq!(alice.recv_text().await, "assrvalidation_before_casting");

    alice.send("assr1,not-a-date,also-not,text").await;
    assert_eq!(alice.recv_text().await, "assrinvalid_format");

    alice.send("assrjust-one-field").await;
    assert_eq!(alice.recv_text().await, "assrinvalid_format");

    assert!(server.store.assertion(1).await.unwrap().is_none());
}

#[tokio::test]
async fn message_history_resolves_assertions() {
    let server = spawn_server().await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.authenticate("token-alice").await;
    alice.send("crtcForecasts").await;
    alice.recv_text().await;
    alice.drain_chat_list().await;

    alice.send("sndm1 first message").await;
    assert_eq!(alice.recv_text().await, "sndmok");

    let casting = in_millis(60_000);
    let validation = in_millis(120_000);
    alice
        .send(&format!("assr1,{validation},{casting},history check"))
        .await;
    alice.recv_with_prefix("assrcreated:").await;

    alice.send("msgs1").await;
    let reply = alice.recv_with_prefix("msgs1,").await;
    let entries: Value = serde_json::from_str(&reply["msgs1,".len()..]).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);

    assert_eq!(entries[0]["content"], "first message");
    assert_eq!(entries[0]["sender"]["displayName"], "Alice");

    assert_eq!(entries[1]["type"], "assertion");
    assert_eq!(entries[1]["content"]["text"], "history check");
    assert_eq!(entries[1]["content"]["completed"], false);
    assert_eq!(entries[1]["content"]["didPredict"], false);
}
