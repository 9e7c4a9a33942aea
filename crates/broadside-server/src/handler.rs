//! Request dispatch: applies one decoded request to its match and says who hears what.
//!
//! Handlers never write to a socket. They return [`Replies`] and the connection task
//! delivers them after every match lock has been released.

use broadside_core::{AttackReport, MatchError, Role};
use broadside_protocol::{
    AttackRequest, AttackResult, CreateGameRequest, Envelope, GameCreated, GameId, GameJoined,
    GameRequest, JoinGameRequest, MessageCode, Outcome, PlayerId, PlayerReady, ReadyRequest,
    Request, SessionId, WireError,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::matches::MatchHandle;
use crate::server::ServerContext;
use crate::session::{MatchBinding, Session};
use crate::usage::{record_usage, UsageEvent};

/// A frame bound for the opponent's session.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub to: SessionId,
    pub game_id: GameId,
    pub envelope: Envelope,
}

/// Everything one request produced, in delivery order per recipient.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Replies {
    pub own: Vec<Envelope>,
    pub peer: Vec<Delivery>,
}

impl Replies {
    fn own(envelope: Envelope) -> Self {
        Self {
            own: vec![envelope],
            peer: Vec::new(),
        }
    }

    fn to_peer(&mut self, peer: Option<&SessionId>, game_id: &GameId, envelope: Envelope) {
        if let Some(to) = peer {
            self.peer.push(Delivery {
                to: to.clone(),
                game_id: game_id.clone(),
                envelope,
            });
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("session already plays match {0}")]
    AlreadyInGame(GameId),

    #[error("not a player in match {0}")]
    NotInGame(GameId),

    #[error("match {0} not found")]
    GameNotFound(GameId),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error("reply could not be encoded: {0}")]
    Wire(#[from] WireError),
}

impl RequestError {
    pub fn details(&self) -> &'static str {
        match self {
            RequestError::AlreadyInGame(_) => "AlreadyInGame",
            RequestError::NotInGame(_) => "NotInGame",
            RequestError::GameNotFound(_) => "GameNotFound",
            RequestError::Match(err) => err.details(),
            RequestError::Wire(_) => "EncodeFailed",
        }
    }
}

pub async fn handle(ctx: &ServerContext, session: &Session, request: Request) -> Replies {
    let code = request.code();
    let result = match request {
        Request::CreateGame(req) => create_game(ctx, session, req).await,
        Request::JoinGame(req) => join_game(ctx, session, req).await,
        Request::Ready(req) => ready(ctx, session, req).await,
        Request::Attack(req) => attack(ctx, session, req).await,
        Request::RematchCall(req) => call_rematch(ctx, session, req).await,
        Request::RematchAccepted(req) => accept_rematch(ctx, session, req).await,
        Request::RematchRejected(req) => reject_rematch(ctx, session, req).await,
    };
    result.unwrap_or_else(|err| {
        debug!(session = %session.id(), ?code, %err, "request rejected");
        Replies::own(Envelope::error(code, err.details(), err.to_string()))
    })
}

fn new_player_id() -> PlayerId {
    PlayerId::new(Uuid::new_v4().simple().to_string())
}

/// The session's binding, checked against the match (and player) a request names.
fn bound(
    session: &Session,
    game_id: &GameId,
    player_id: Option<&PlayerId>,
) -> Result<MatchBinding, RequestError> {
    session
        .binding()
        .filter(|binding| &binding.game_id == game_id)
        .filter(|binding| player_id.map_or(true, |id| &binding.player_id == id))
        .ok_or_else(|| RequestError::NotInGame(game_id.clone()))
}

async fn find(ctx: &ServerContext, game_id: &GameId) -> Result<MatchHandle, RequestError> {
    ctx.matches
        .find(game_id)
        .await
        .map_err(|_| RequestError::GameNotFound(game_id.clone()))
}

fn ensure_unbound(session: &Session) -> Result<(), RequestError> {
    match session.binding() {
        Some(binding) => Err(RequestError::AlreadyInGame(binding.game_id)),
        None => Ok(()),
    }
}

async fn create_game(
    ctx: &ServerContext,
    session: &Session,
    req: CreateGameRequest,
) -> Result<Replies, RequestError> {
    ensure_unbound(session)?;

    let (game_id, game) = ctx.matches.create(req.difficulty).await;
    let host_id = new_player_id();
    game.lock().create_host(session.id().clone(), host_id.clone())?;
    ctx.matches
        .add_player(&game_id)
        .await
        .map_err(|_| RequestError::GameNotFound(game_id.clone()))?;

    session.bind(MatchBinding {
        game_id: game_id.clone(),
        player_id: host_id.clone(),
        role: Role::Host,
    });
    record_usage(
        ctx.usage.as_ref(),
        UsageEvent::GameCreated {
            game_id: game_id.clone(),
            difficulty: req.difficulty,
        },
    )
    .await;
    info!(session = %session.id(), game = %game_id, "host created match");

    Ok(Replies::own(Envelope::with_payload(
        MessageCode::CreateGame,
        &GameCreated { game_id, host_id },
    )?))
}

async fn join_game(
    ctx: &ServerContext,
    session: &Session,
    req: JoinGameRequest,
) -> Result<Replies, RequestError> {
    ensure_unbound(session)?;
    let game = find(ctx, &req.game_id).await?;
    let player_id = new_player_id();

    let (difficulty, host) = {
        let mut game = game.lock();
        game.create_join(session.id().clone(), player_id.clone())?;
        (game.difficulty(), game.peer_session(Role::Join).cloned())
    };
    ctx.matches
        .add_player(&req.game_id)
        .await
        .map_err(|_| RequestError::GameNotFound(req.game_id.clone()))?;

    session.bind(MatchBinding {
        game_id: req.game_id.clone(),
        player_id: player_id.clone(),
        role: Role::Join,
    });
    info!(session = %session.id(), game = %req.game_id, "player joined match");

    let mut replies = Replies::own(Envelope::with_payload(
        MessageCode::JoinGame,
        &GameJoined {
            game_id: req.game_id.clone(),
            player_id,
            difficulty,
        },
    )?);
    replies.own.push(Envelope::select_grid(&req.game_id)?);
    replies.to_peer(host.as_ref(), &req.game_id, Envelope::select_grid(&req.game_id)?);
    Ok(replies)
}

async fn ready(
    ctx: &ServerContext,
    session: &Session,
    req: ReadyRequest,
) -> Result<Replies, RequestError> {
    let binding = bound(session, &req.game_id, Some(&req.player_id))?;
    let game = find(ctx, &req.game_id).await?;

    let (peer, start) = {
        let mut game = game.lock();
        game.set_ready(binding.role, &req.defence_grid)?;
        let turn_of = |role: Role| game.slot(role).is_some_and(|slot| slot.turn);
        let start = game
            .both_ready()
            .then(|| (turn_of(binding.role), turn_of(binding.role.opponent())));
        (game.peer_session(binding.role).cloned(), start)
    };

    let ack = Envelope::with_payload(
        MessageCode::Ready,
        &PlayerReady {
            game_id: req.game_id.clone(),
            player_id: req.player_id.clone(),
        },
    )?;
    let mut replies = Replies::own(ack.clone());
    replies.to_peer(peer.as_ref(), &req.game_id, ack);

    if let Some((own_turn, peer_turn)) = start {
        info!(game = %req.game_id, "match started");
        replies.own.push(Envelope::start_game(&req.game_id, own_turn)?);
        replies.to_peer(
            peer.as_ref(),
            &req.game_id,
            Envelope::start_game(&req.game_id, peer_turn)?,
        );
    }
    Ok(replies)
}

fn attack_result(report: &AttackReport, turn: bool) -> AttackResult {
    AttackResult {
        x: report.at.x,
        y: report.at.y,
        cell_state: report.cell_state,
        sunken_ships_host: report.sunken_ships_host,
        sunken_ships_join: report.sunken_ships_join,
        sunk_ship_coordinates: report.sunk_ship_coordinates(),
        turn,
    }
}

async fn attack(
    ctx: &ServerContext,
    session: &Session,
    req: AttackRequest,
) -> Result<Replies, RequestError> {
    let binding = bound(session, &req.game_id, Some(&req.player_id))?;
    let game = find(ctx, &req.game_id).await?;

    let (report, peer) = {
        let mut game = game.lock();
        let report = game.attack(binding.role, req.x, req.y)?;
        (report, game.peer_session(binding.role).cloned())
    };
    if let Some((kind, _)) = &report.sunk_ship {
        debug!(game = %req.game_id, ?kind, "ship sunk");
    }

    // The attacker always reads `turn: false`, including on the final shot.
    let mut replies = Replies::own(Envelope::with_payload(
        MessageCode::Attack,
        &attack_result(&report, false),
    )?);
    replies.to_peer(
        peer.as_ref(),
        &req.game_id,
        Envelope::with_payload(MessageCode::Attack, &attack_result(&report, true))?,
    );

    if let Some(winner) = report.winner {
        info!(game = %req.game_id, ?winner, "match finished");
        let (own, other) = if winner == binding.role {
            (Outcome::Won, Outcome::Lost)
        } else {
            (Outcome::Lost, Outcome::Won)
        };
        replies.own.push(Envelope::end_game(own)?);
        replies.to_peer(peer.as_ref(), &req.game_id, Envelope::end_game(other)?);
    }
    Ok(replies)
}

async fn call_rematch(
    ctx: &ServerContext,
    session: &Session,
    req: GameRequest,
) -> Result<Replies, RequestError> {
    let binding = bound(session, &req.game_id, None)?;
    let game = find(ctx, &req.game_id).await?;

    let peer = {
        let mut game = game.lock();
        let peer = game
            .peer_session(binding.role)
            .cloned()
            .ok_or(MatchError::PeerMissing)?;
        game.call_rematch()?;
        peer
    };
    info!(game = %req.game_id, role = ?binding.role, "rematch called");

    let mut replies = Replies::default();
    replies.to_peer(
        Some(&peer),
        &req.game_id,
        Envelope::game_ref(MessageCode::RematchCall, &req.game_id)?,
    );
    Ok(replies)
}

async fn accept_rematch(
    ctx: &ServerContext,
    session: &Session,
    req: GameRequest,
) -> Result<Replies, RequestError> {
    let binding = bound(session, &req.game_id, None)?;
    let game = find(ctx, &req.game_id).await?;

    let peer = {
        let mut game = game.lock();
        if !game.rematch_requested() {
            return Err(MatchError::RematchNotCalled.into());
        }
        game.accept_rematch()?;
        game.peer_session(binding.role).cloned()
    };
    record_usage(
        ctx.usage.as_ref(),
        UsageEvent::Rematch {
            game_id: req.game_id.clone(),
        },
    )
    .await;
    info!(game = %req.game_id, "rematch accepted");

    let accepted = Envelope::game_ref(MessageCode::RematchAccepted, &req.game_id)?;
    let mut replies = Replies::own(accepted.clone());
    replies.to_peer(peer.as_ref(), &req.game_id, accepted);
    Ok(replies)
}

async fn reject_rematch(
    ctx: &ServerContext,
    session: &Session,
    req: GameRequest,
) -> Result<Replies, RequestError> {
    let binding = bound(session, &req.game_id, None)?;
    let game = find(ctx, &req.game_id).await?;

    let peer = {
        let mut game = game.lock();
        game.reject_rematch()?;
        game.peer_session(binding.role).cloned()
    };
    info!(game = %req.game_id, "rematch rejected");

    let mut replies = Replies::default();
    replies.to_peer(
        peer.as_ref(),
        &req.game_id,
        Envelope::game_ref(MessageCode::RematchRejected, &req.game_id)?,
    );
    Ok(replies)
}
