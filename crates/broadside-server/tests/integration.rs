//! End-to-end tests over the in-process transport.
//!
//! Covers the match flow from create to rematch, reconnection within the grace period,
//! grace expiry, relay re-delivery and the input-error paths.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broadside_protocol::{
    AttackResult, Envelope, GameCreated, GameJoined, MessageCode, SessionId, SessionIssued,
    StartGamePayload,
};
use broadside_server::transport::channel::{self, Remote};
use broadside_server::{
    Admission, LinkStatus, LoggingUsageCounter, ServerConfig, ServerContext, TransportError,
    UsageCounter, UsageError, UsageEvent,
};
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(5);

/// Cruiser along row 0, destroyer at (2,2)-(3,2), battleship along row 4.
const LAYOUT: [[u8; 5]; 5] = [
    [4, 4, 4, 0, 0],
    [0, 0, 0, 0, 0],
    [0, 0, 3, 3, 0],
    [0, 0, 0, 0, 0],
    [5, 5, 5, 5, 0],
];

const SHIP_CELLS: [(i64, i64); 9] = [
    (0, 0),
    (1, 0),
    (2, 0),
    (2, 2),
    (3, 2),
    (0, 4),
    (1, 4),
    (2, 4),
    (3, 4),
];

const OPEN_WATER: [(i64, i64); 8] = [
    (0, 1),
    (1, 1),
    (2, 1),
    (3, 1),
    (4, 1),
    (0, 3),
    (1, 3),
    (2, 3),
];

fn test_config() -> ServerConfig {
    ServerConfig {
        backoff_factor_ms: 1,
        ..ServerConfig::default()
    }
}

fn context(config: ServerConfig) -> Arc<ServerContext> {
    Arc::new(ServerContext::new(config))
}

async fn connect(ctx: &Arc<ServerContext>, requested: Option<SessionId>) -> (Remote, Admission) {
    let (connection, remote) = channel::pair();
    let admission = ctx.accept(connection, requested).await;
    (remote, admission)
}

async fn expect(remote: &mut Remote, code: MessageCode) -> Envelope {
    let envelope = remote
        .recv_within(WAIT)
        .await
        .unwrap_or_else(|| panic!("no frame while waiting for {code:?}"));
    assert_eq!(envelope.code, code, "unexpected frame {envelope:?}");
    envelope
}

/// Like [`expect`], skipping grace and reconnection notices on the way.
async fn expect_past_notices(remote: &mut Remote, code: MessageCode) -> Envelope {
    loop {
        let envelope = remote
            .recv_within(WAIT)
            .await
            .unwrap_or_else(|| panic!("no frame while waiting for {code:?}"));
        if !matches!(
            envelope.code,
            MessageCode::PeerGracePeriod | MessageCode::PeerReconnected
        ) {
            assert_eq!(envelope.code, code, "unexpected frame {envelope:?}");
            return envelope;
        }
    }
}

fn send(remote: &Remote, code: MessageCode, payload: Value) {
    remote.send_json(&json!({ "code": code.as_u8(), "payload": payload }));
}

struct Table {
    host: Remote,
    join: Remote,
    host_session: SessionId,
    join_session: SessionId,
    game_id: String,
    host_id: String,
    join_id: String,
}

/// Connects two clients and seats them in one match.
async fn seat_players(ctx: &Arc<ServerContext>) -> Table {
    let (mut host, host_admission) = connect(ctx, None).await;
    expect(&mut host, MessageCode::SessionIdIssued).await;
    let (mut join, join_admission) = connect(ctx, None).await;
    expect(&mut join, MessageCode::SessionIdIssued).await;

    send(&host, MessageCode::CreateGame, json!({ "difficulty": "easy" }));
    let created: GameCreated = expect(&mut host, MessageCode::CreateGame)
        .await
        .payload_as()
        .unwrap();

    send(
        &join,
        MessageCode::JoinGame,
        json!({ "gameId": created.game_id.as_str() }),
    );
    let joined: GameJoined = expect(&mut join, MessageCode::JoinGame)
        .await
        .payload_as()
        .unwrap();
    assert_eq!(joined.difficulty, broadside_protocol::Difficulty::Easy);
    expect(&mut join, MessageCode::SelectGrid).await;
    expect(&mut host, MessageCode::SelectGrid).await;

    Table {
        host,
        join,
        host_session: host_admission.session_id().clone(),
        join_session: join_admission.session_id().clone(),
        game_id: created.game_id.to_string(),
        host_id: created.host_id.to_string(),
        join_id: joined.player_id.to_string(),
    }
}

/// Both players submit [`LAYOUT`]; the host moves first.
async fn start_match(table: &mut Table) {
    send(
        &table.host,
        MessageCode::Ready,
        json!({ "gameId": table.game_id, "playerId": table.host_id, "defenceGrid": LAYOUT }),
    );
    expect(&mut table.host, MessageCode::Ready).await;
    expect(&mut table.join, MessageCode::Ready).await;

    send(
        &table.join,
        MessageCode::Ready,
        json!({ "gameId": table.game_id, "playerId": table.join_id, "defenceGrid": LAYOUT }),
    );
    expect(&mut table.join, MessageCode::Ready).await;
    let join_start: StartGamePayload = expect(&mut table.join, MessageCode::StartGame)
        .await
        .payload_as()
        .unwrap();
    assert!(!join_start.turn);

    expect(&mut table.host, MessageCode::Ready).await;
    let host_start: StartGamePayload = expect(&mut table.host, MessageCode::StartGame)
        .await
        .payload_as()
        .unwrap();
    assert!(host_start.turn);
}

fn attack(remote: &Remote, game_id: &str, player_id: &str, x: i64, y: i64) {
    send(
        remote,
        MessageCode::Attack,
        json!({ "gameId": game_id, "playerId": player_id, "x": x, "y": y }),
    );
}

/// One attack, returning what the attacker and the defender were told.
async fn exchange(
    attacker: &mut Remote,
    defender: &mut Remote,
    game_id: &str,
    player_id: &str,
    at: (i64, i64),
) -> (AttackResult, AttackResult) {
    attack(attacker, game_id, player_id, at.0, at.1);
    let own = expect(attacker, MessageCode::Attack).await.payload_as().unwrap();
    let theirs = expect(defender, MessageCode::Attack).await.payload_as().unwrap();
    (own, theirs)
}

fn codes(frames: &[Envelope]) -> Vec<MessageCode> {
    frames.iter().map(|frame| frame.code).collect()
}

/// The host sinks the whole fleet while the join player fires into open water.
async fn play_out(table: &mut Table) {
    let Table {
        host,
        join,
        game_id,
        host_id,
        join_id,
        ..
    } = table;
    for (shot, &target) in SHIP_CELLS.iter().enumerate() {
        let (own, theirs) = exchange(host, join, game_id, host_id, target).await;
        assert!(!own.turn);
        assert!(theirs.turn);
        if shot + 1 < SHIP_CELLS.len() {
            exchange(join, host, game_id, join_id, OPEN_WATER[shot]).await;
        }
    }
}

/// Waits until the server holds `session` for a reconnection.
async fn await_grace(ctx: &Arc<ServerContext>, session: &SessionId) {
    let held = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(found) = ctx.sessions.find(session).await {
                if found.link().status == LinkStatus::Grace {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(held.is_ok(), "session {session} never entered its grace period");
}

#[tokio::test]
async fn destroyer_sinks_on_second_hit() {
    let ctx = context(test_config());
    let mut table = seat_players(&ctx).await;
    start_match(&mut table).await;
    let Table {
        host,
        join,
        game_id,
        host_id,
        join_id,
        ..
    } = &mut table;

    let (own, theirs) = exchange(host, join, game_id, host_id, (2, 2)).await;
    assert_eq!(own.cell_state, broadside_protocol::CellState::Hit);
    assert_eq!((own.sunken_ships_host, own.sunken_ships_join), (0, 0));
    assert_eq!(own.sunk_ship_coordinates, None);
    assert!(!own.turn);
    assert!(theirs.turn);

    exchange(join, host, game_id, join_id, (4, 1)).await;

    let (own, _) = exchange(host, join, game_id, host_id, (3, 2)).await;
    assert_eq!(own.sunken_ships_join, 1);
    assert_eq!(own.sunk_ship_coordinates.map(|hull| hull.len()), Some(2));
}

#[tokio::test]
async fn full_match_then_rematch() {
    let usage = Arc::new(LoggingUsageCounter::new());
    let ctx = Arc::new(ServerContext::with_usage(test_config(), usage.clone()));
    let mut table = seat_players(&ctx).await;
    start_match(&mut table).await;
    play_out(&mut table).await;
    let Table {
        host,
        join,
        game_id,
        join_id,
        ..
    } = &mut table;

    let won = expect(host, MessageCode::EndGame).await;
    assert_eq!(won.payload.as_ref().unwrap()["outcome"], "won");
    let lost = expect(join, MessageCode::EndGame).await;
    assert_eq!(lost.payload.as_ref().unwrap()["outcome"], "lost");

    // No more shots once the match is decided.
    attack(join, game_id, join_id, 4, 4);
    let refused = expect(join, MessageCode::Attack).await;
    assert_eq!(refused.error.unwrap().error_details, "GameOver");

    send(host, MessageCode::RematchCall, json!({ "gameId": game_id }));
    expect(join, MessageCode::RematchCall).await;
    send(join, MessageCode::RematchAccepted, json!({ "gameId": game_id }));
    expect(join, MessageCode::RematchAccepted).await;
    expect(host, MessageCode::RematchAccepted).await;

    assert_eq!(usage.games_created(), 1);
    assert_eq!(usage.rematches(), 1);

    // Fresh round: grids are blank again and the host moves first.
    start_match(&mut table).await;
}

#[tokio::test]
async fn rematch_rejection_reaches_the_caller() {
    let ctx = context(test_config());
    let mut table = seat_players(&ctx).await;

    // Mid-match the offer is refused and the opponent hears nothing.
    send(&table.join, MessageCode::RematchCall, json!({ "gameId": table.game_id }));
    let early = expect(&mut table.join, MessageCode::RematchCall).await;
    assert_eq!(early.error.unwrap().error_details, "GameNotFinished");

    start_match(&mut table).await;
    play_out(&mut table).await;
    expect(&mut table.host, MessageCode::EndGame).await;
    expect(&mut table.join, MessageCode::EndGame).await;

    send(&table.join, MessageCode::RematchCall, json!({ "gameId": table.game_id }));
    expect(&mut table.host, MessageCode::RematchCall).await;
    send(&table.host, MessageCode::RematchRejected, json!({ "gameId": table.game_id }));
    expect(&mut table.join, MessageCode::RematchRejected).await;
}

#[tokio::test]
async fn reconnection_within_grace_resumes_the_session() {
    let ctx = context(test_config());
    let mut table = seat_players(&ctx).await;
    start_match(&mut table).await;

    // The host's socket vanishes without a close handshake.
    let Table {
        host,
        join,
        host_session,
        game_id,
        host_id,
        join_id,
        ..
    } = table;
    drop(host);
    let mut join = join;
    expect(&mut join, MessageCode::PeerGracePeriod).await;

    let (mut host, admission) = connect(&ctx, Some(host_session.clone())).await;
    assert_eq!(admission, Admission::Resumed(host_session.clone()));
    let issued: SessionIssued = expect(&mut host, MessageCode::SessionIdIssued)
        .await
        .payload_as()
        .unwrap();
    assert_eq!(issued.session_id, host_session);
    expect(&mut join, MessageCode::PeerReconnected).await;

    // The match association survived: the host still holds the turn.
    exchange(&mut host, &mut join, &game_id, &host_id, (2, 2)).await;
    exchange(&mut join, &mut host, &game_id, &join_id, (0, 1)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stray = codes(&join.drain());
    assert!(!stray.contains(&MessageCode::PeerGracePeriod));
    assert!(!stray.contains(&MessageCode::PeerDisconnected));
}

#[tokio::test]
async fn grace_expiry_disconnects_and_frees_the_match() {
    let ctx = context(ServerConfig {
        grace_period_secs: 1,
        ..test_config()
    });
    let table = seat_players(&ctx).await;
    let Table {
        host,
        mut join,
        host_session,
        game_id,
        ..
    } = table;

    drop(host);
    expect(&mut join, MessageCode::PeerGracePeriod).await;
    expect(&mut join, MessageCode::PeerDisconnected).await;

    // The expired session cannot be resumed.
    let (mut late, admission) = connect(&ctx, Some(host_session.clone())).await;
    assert!(matches!(admission, Admission::Fresh(_)));
    expect(&mut late, MessageCode::InvalidSessionId).await;
    expect(&mut late, MessageCode::SessionIdIssued).await;

    // The remaining player cannot start a rematch against nobody.
    send(&join, MessageCode::RematchCall, json!({ "gameId": game_id }));
    let refused = expect(&mut join, MessageCode::RematchCall).await;
    assert_eq!(refused.error.unwrap().error_details, "PeerMissing");
    assert_eq!(ctx.matches.len().await, 1);

    // Once the last player is gone, so is the match.
    drop(join);
    let emptied = tokio::time::timeout(WAIT, async {
        while !ctx.matches.is_empty().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(emptied.is_ok(), "match was not removed");
}

#[tokio::test]
async fn relay_waits_for_receiver_to_reconnect() {
    let ctx = context(test_config());
    let mut table = seat_players(&ctx).await;
    start_match(&mut table).await;
    let Table {
        host,
        mut join,
        host_session,
        game_id,
        host_id,
        join_id,
        ..
    } = table;
    let mut host = host;

    exchange(&mut host, &mut join, &game_id, &host_id, (2, 2)).await;

    // The host's next write fails as if the socket died; its read side never notices.
    host.fail_next_write(TransportError::AbnormalClosure);
    attack(&join, &game_id, &join_id, 1, 1);
    let own: AttackResult = expect(&mut join, MessageCode::Attack)
        .await
        .payload_as()
        .unwrap();
    assert!(!own.turn);
    expect(&mut join, MessageCode::PeerGracePeriod).await;

    let (mut resumed, admission) = connect(&ctx, Some(host_session)).await;
    assert!(matches!(admission, Admission::Resumed(_)));
    expect(&mut resumed, MessageCode::SessionIdIssued).await;
    let relayed: AttackResult = expect(&mut resumed, MessageCode::Attack)
        .await
        .payload_as()
        .unwrap();
    assert_eq!((relayed.x, relayed.y), (1, 1));
    assert!(relayed.turn);
    expect(&mut join, MessageCode::PeerReconnected).await;
}

#[tokio::test]
async fn player_keeps_playing_and_resumes_while_peer_is_away() {
    let ctx = context(test_config());
    let mut table = seat_players(&ctx).await;
    start_match(&mut table).await;
    let Table {
        mut host,
        mut join,
        host_session,
        join_session,
        game_id,
        host_id,
        join_id,
    } = table;

    exchange(&mut host, &mut join, &game_id, &host_id, (2, 2)).await;
    drop(host);
    expect(&mut join, MessageCode::PeerGracePeriod).await;

    // The shot is answered at once and held for the absent host.
    attack(&join, &game_id, &join_id, 1, 1);
    let own: AttackResult = expect(&mut join, MessageCode::Attack)
        .await
        .payload_as()
        .unwrap();
    assert!(!own.turn);
    join.send_text("garbage");
    expect(&mut join, MessageCode::InvalidSignal).await;

    // The join player drops too and gets its own session back.
    drop(join);
    await_grace(&ctx, &join_session).await;
    let (mut join, admission) = connect(&ctx, Some(join_session.clone())).await;
    assert_eq!(admission, Admission::Resumed(join_session));
    expect(&mut join, MessageCode::SessionIdIssued).await;

    // The host returns to the held shot.
    let (mut host, admission) = connect(&ctx, Some(host_session.clone())).await;
    assert_eq!(admission, Admission::Resumed(host_session));
    expect(&mut host, MessageCode::SessionIdIssued).await;
    let relayed: AttackResult = expect(&mut host, MessageCode::Attack)
        .await
        .payload_as()
        .unwrap();
    assert_eq!((relayed.x, relayed.y), (1, 1));
    assert!(relayed.turn);
    expect(&mut join, MessageCode::PeerReconnected).await;

    // Both players still share the match. Notices about the join player's own drop may
    // still be queued ahead of the host's reply.
    attack(&host, &game_id, &host_id, 3, 2);
    let own: AttackResult = expect_past_notices(&mut host, MessageCode::Attack)
        .await
        .payload_as()
        .unwrap();
    assert_eq!(own.sunken_ships_join, 1);
    let theirs: AttackResult = expect(&mut join, MessageCode::Attack)
        .await
        .payload_as()
        .unwrap();
    assert!(theirs.turn);
}

#[tokio::test]
async fn input_errors_keep_the_connection_open() {
    let ctx = context(test_config());
    let mut table = seat_players(&ctx).await;
    start_match(&mut table).await;
    let Table {
        host,
        join,
        game_id,
        host_id,
        join_id,
        ..
    } = &mut table;

    host.send_text("definitely not json");
    expect(host, MessageCode::InvalidSignal).await;

    host.send_json(&json!({ "payload": {} }));
    expect(host, MessageCode::SignalAbsent).await;

    host.send_json(&json!({ "code": MessageCode::StartGame.as_u8() }));
    expect(host, MessageCode::InvalidSignal).await;

    attack(join, game_id, join_id, 0, 0);
    let out_of_turn = expect(join, MessageCode::Attack).await;
    assert_eq!(out_of_turn.error.unwrap().error_details, "NotYourTurn");

    attack(host, game_id, host_id, 5, 0);
    let off_board = expect(host, MessageCode::Attack).await;
    assert_eq!(off_board.error.unwrap().error_details, "OutOfBounds");

    send(host, MessageCode::Ready, json!({ "gameId": game_id }));
    let bad_payload = expect(host, MessageCode::Ready).await;
    assert_eq!(bad_payload.error.unwrap().error_details, "InvalidPayload");

    // Still the host's turn after all of that.
    let (own, _) = exchange(host, join, game_id, host_id, (4, 4)).await;
    assert_eq!(own.cell_state, broadside_protocol::CellState::Miss);
}

#[tokio::test]
async fn clean_close_skips_the_grace_period() {
    let ctx = context(test_config());
    let mut table = seat_players(&ctx).await;

    table.host.fail_read(TransportError::NormalClosure);
    expect(&mut table.join, MessageCode::PeerDisconnected).await;
    assert_eq!(ctx.sessions.live_count().await, 1);
}

#[tokio::test]
async fn repeated_transient_read_failures_end_the_session() {
    let ctx = context(test_config());
    let mut table = seat_players(&ctx).await;

    for _ in 0..3 {
        table.host.fail_read(TransportError::Timeout);
    }
    expect(&mut table.join, MessageCode::PeerDisconnected).await;
}

#[tokio::test]
async fn sweep_reaps_sessions_and_tells_the_peer() {
    let ctx = context(test_config());
    let mut table = seat_players(&ctx).await;

    let reaped = ctx.sessions.cleanup_sweep(Duration::ZERO).await;
    assert_eq!(reaped, 2);
    assert_eq!(ctx.sessions.live_count().await, 0);
    assert!(ctx.matches.is_empty().await);

    // Both connection tasks wind down; neither client is left hanging open.
    let closed = tokio::time::timeout(WAIT, async {
        while table.host.recv_text().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok());
}

struct FailingCounter;

#[async_trait]
impl UsageCounter for FailingCounter {
    async fn record(&self, _event: UsageEvent) -> Result<(), UsageError> {
        Err(UsageError::Unavailable("metrics store offline".into()))
    }
}

#[tokio::test]
async fn usage_failures_never_fail_requests() {
    let ctx = Arc::new(ServerContext::with_usage(
        test_config(),
        Arc::new(FailingCounter),
    ));
    let (mut client, _) = connect(&ctx, None).await;
    expect(&mut client, MessageCode::SessionIdIssued).await;

    send(&client, MessageCode::CreateGame, json!({ "difficulty": "hard" }));
    let created = expect(&mut client, MessageCode::CreateGame).await;
    assert!(!created.is_error());
}
