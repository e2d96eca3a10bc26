//! Login, account creation, character selection and connection housekeeping.

use crate::admission::{CreateAccountError, LoginRejection};
use crate::connection::ConnectionId;
use crate::context::ServerContext;
use crate::dispatch::HandlerError;
use crate::session::User;
use log::{debug, info, warn};
use shared::packets::{
    CreateNewAccount, Login, Message, Ping, SelectAccountCharacter, SetUdpPort,
};
use shared::protocol::GameMessage;
use shared::{BitReader, ServerPacket};

pub fn login(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = Login::read_body(reader)?;
    let Some(handle) = ctx.connections.handle(conn).cloned() else {
        return Ok(());
    };
    if ctx.sessions.has_state(conn) {
        info!("Connection {} sent a login while already logged in", conn);
        return Ok(());
    }

    match ctx.admission.login(&msg.name, &msg.password) {
        Ok(pending) => {
            let names = pending.character_names();
            if let Err(pending) = ctx.sessions.begin_login(conn, pending) {
                ctx.admission.release(pending.account());
                return Ok(());
            }
            handle.send(&ServerPacket::LoginSuccessful);
            handle.send(&ServerPacket::AccountCharacters { names });
            Ok(())
        }
        Err(LoginRejection::Store(e)) => {
            handle.send(&ServerPacket::LoginUnsuccessful {
                message: GameMessage::LoginServerError,
            });
            Err(e.into())
        }
        Err(rejection) => {
            handle.send(&ServerPacket::LoginUnsuccessful {
                message: rejection.message(),
            });
            Ok(())
        }
    }
}

pub fn create_new_account(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = CreateNewAccount::read_body(reader)?;
    let Some(handle) = ctx.connections.handle(conn) else {
        return Ok(());
    };
    if ctx.sessions.has_state(conn) {
        warn!(
            "Connection {} tried to create account `{}` after logging in",
            conn, msg.name
        );
        return Ok(());
    }

    let result = ctx
        .admission
        .create_account(&msg.name, &msg.password, &msg.email);
    let (success, message, failure) = match result {
        Ok(()) => (true, GameMessage::CreateAccountSuccessful, None),
        Err(CreateAccountError::Store(e)) => {
            (false, GameMessage::CreateAccountServerError, Some(e))
        }
        Err(e) => {
            info!("Connection {} could not create `{}`: {}", conn, msg.name, e);
            (false, e.message(), None)
        }
    };

    handle.send(&ServerPacket::CreateAccountResult { success, message });
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

pub fn select_account_character(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = SelectAccountCharacter::read_body(reader)?;
    let Some(handle) = ctx.connections.handle(conn).cloned() else {
        return Ok(());
    };
    let Some(pending) = ctx.sessions.pending_mut(conn) else {
        info!("Connection {} selected a character without a pending login", conn);
        return Ok(());
    };

    let record = match pending.select(msg.index) {
        Ok(record) => record,
        Err(e) => {
            info!("Connection {} character selection failed: {}", conn, e);
            handle.send(&ServerPacket::SendMessage {
                message: GameMessage::InvalidAccountCharacter,
            });
            return Ok(());
        }
    };

    let account = pending.account().to_string();
    let user = User::from_record(&account, record, handle);
    info!("Account `{}` is playing `{}`", account, user.name);
    ctx.sessions.promote(conn, user);

    if ctx.enter_world(conn) && !ctx.motd.is_empty() {
        ctx.send_to(
            conn,
            &ServerPacket::Chat {
                text: ctx.motd.clone(),
            },
        );
    }
    Ok(())
}

/// Only playing users get an answer.
pub fn ping(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    Ping::read_body(reader)?;
    if let Some(user) = ctx.sessions.user(conn) {
        user.send(&ServerPacket::Ping);
    }
    Ok(())
}

/// Needs no session; the unreliable channel is set up before login.
pub fn set_udp_port(
    ctx: &mut ServerContext,
    conn: ConnectionId,
    reader: &mut BitReader<'_>,
) -> Result<(), HandlerError> {
    let msg = SetUdpPort::read_body(reader)?;
    if ctx.connections.set_unreliable_port(conn, msg.port) {
        debug!("Connection {} uses unreliable port {}", conn, msg.port);
    }
    Ok(())
}
