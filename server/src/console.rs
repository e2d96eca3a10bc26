//! Administrative console.
//!
//! A dedicated thread reads commands from standard input and posts them to the simulation thread,
//! which runs them between ticks and answers with a result string. Commands therefore see the
//! same world state the handlers do and never need their own locking.

use crate::context::ServerContext;
use crate::dispatch::ProcessorStats;
use crate::game_loop::ShutdownHandle;
use log::{debug, info};
use shared::protocol::MAX_CHAT_LENGTH;
use shared::ServerPacket;
use std::io::{self, BufRead};
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};

/// One console line waiting for the simulation thread.
#[derive(Debug)]
pub struct ConsoleRequest {
    pub line: String,
    pub reply: oneshot::Sender<String>,
}

type Command = fn(&mut ServerContext, &ProcessorStats, &str) -> String;

const COMMANDS: &[(&str, &str, Command)] = &[
    ("help", "list the console commands", help),
    ("shutdown", "stop the server", shutdown),
    ("online", "list the users in the world", online),
    ("connections", "count open connections and sessions", connections),
    ("kick", "<name> disconnect a user", kick),
    ("motd", "[text] show or replace the message of the day", motd),
    ("say", "<text> send a server message to everyone in the world", say),
    ("stats", "show message processor statistics", stats),
];

/// Starts the thread that reads commands from stdin.
///
/// The thread stops once shutdown has been requested or the simulation thread has gone away. A
/// read that is already blocked on stdin only returns after the next line.
pub fn spawn_console(
    requests: mpsc::UnboundedSender<ConsoleRequest>,
    shutdown: ShutdownHandle,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                if shutdown.is_requested() {
                    break;
                }
                let Ok(line) = line else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let (reply, response) = oneshot::channel();
                let request = ConsoleRequest {
                    line: line.to_string(),
                    reply,
                };
                if requests.send(request).is_err() {
                    break;
                }
                match response.blocking_recv() {
                    Ok(result) => println!(" - {}", result),
                    Err(_) => break,
                }
            }
            debug!("Console thread finished");
        })
}

/// Runs one console line and returns what should be printed for it.
pub fn execute(ctx: &mut ServerContext, stats: &ProcessorStats, line: &str) -> String {
    let line = line.trim();
    let (name, args) = line
        .split_once(char::is_whitespace)
        .map(|(name, args)| (name, args.trim()))
        .unwrap_or((line, ""));

    match COMMANDS
        .iter()
        .find(|(command, ..)| command.eq_ignore_ascii_case(name))
    {
        Some((_, _, run)) => run(ctx, stats, args),
        None => format!("Unknown command `{}`, type `help` for a list", name),
    }
}

fn help(_ctx: &mut ServerContext, _stats: &ProcessorStats, _args: &str) -> String {
    COMMANDS
        .iter()
        .map(|(name, about, _)| format!("{}: {}", name, about))
        .collect::<Vec<_>>()
        .join("\n")
}

fn shutdown(ctx: &mut ServerContext, _stats: &ProcessorStats, _args: &str) -> String {
    ctx.shutdown.request();
    "Shutting down".to_string()
}

fn online(ctx: &mut ServerContext, _stats: &ProcessorStats, _args: &str) -> String {
    let mut names: Vec<_> = ctx
        .sessions
        .users()
        .map(|(_, user)| user.name.as_str())
        .collect();
    if names.is_empty() {
        return "Nobody is online".to_string();
    }
    names.sort_unstable();
    format!("{} online: {}", names.len(), names.join(", "))
}

fn connections(ctx: &mut ServerContext, _stats: &ProcessorStats, _args: &str) -> String {
    format!(
        "{} connections, {} sessions, {} in the world",
        ctx.connections.len(),
        ctx.sessions.len(),
        ctx.sessions.user_count()
    )
}

fn kick(ctx: &mut ServerContext, _stats: &ProcessorStats, args: &str) -> String {
    if args.is_empty() {
        return "Usage: kick <name>".to_string();
    }
    let Some(conn) = ctx.sessions.find_user_by_name(args) else {
        return format!("`{}` is not online", args);
    };
    if let Some(handle) = ctx.connections.handle(conn) {
        handle.close();
    }
    info!("Kicked `{}` from the console", args);
    format!("Kicked `{}`", args)
}

fn motd(ctx: &mut ServerContext, _stats: &ProcessorStats, args: &str) -> String {
    if args.is_empty() {
        if ctx.motd.is_empty() {
            return "No message of the day".to_string();
        }
        return format!("Message of the day: {}", ctx.motd);
    }
    if args.len() > MAX_CHAT_LENGTH {
        return format!("The message of the day is limited to {} bytes", MAX_CHAT_LENGTH);
    }
    ctx.motd = args.to_string();
    "Message of the day updated".to_string()
}

fn say(ctx: &mut ServerContext, _stats: &ProcessorStats, args: &str) -> String {
    if args.is_empty() {
        return "Usage: say <text>".to_string();
    }
    let text = format!("[Server] {}", args);
    if text.len() > MAX_CHAT_LENGTH {
        return format!("Messages are limited to {} bytes", MAX_CHAT_LENGTH);
    }

    let packet = ServerPacket::Chat { text };
    let reached = ctx
        .sessions
        .users()
        .filter(|(_, user)| user.send(&packet))
        .count();
    format!("Sent to {} users", reached)
}

fn stats(_ctx: &mut ServerContext, stats: &ProcessorStats, _args: &str) -> String {
    if stats.total_calls() == 0 {
        return "No messages processed yet".to_string();
    }
    format!("{} messages\n{}", stats.total_calls(), stats.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{received, TestServer};
    use shared::protocol::ClientPacketId;

    fn run(server: &mut TestServer, line: &str) -> String {
        execute(&mut server.ctx, &ProcessorStats::default(), line)
    }

    #[test]
    fn test_help_lists_every_command() {
        let mut server = TestServer::new();
        let help = run(&mut server, "help");
        for (name, ..) in COMMANDS {
            assert!(help.contains(name));
        }
    }

    #[test]
    fn test_unknown_command() {
        let mut server = TestServer::new();
        assert_eq!(
            run(&mut server, "teleport bob"),
            "Unknown command `teleport`, type `help` for a list"
        );
    }

    #[test]
    fn test_shutdown_sets_the_flag() {
        let mut server = TestServer::new();
        assert!(!server.ctx.shutdown.is_requested());
        run(&mut server, "  SHUTDOWN ");
        assert!(server.ctx.shutdown.is_requested());
    }

    #[test]
    fn test_online_and_connections() {
        let mut server = TestServer::new();
        assert_eq!(run(&mut server, "online"), "Nobody is online");

        server.create_account("bob", "secret");
        server.create_account("alice", "secret");
        let _bob = server.connect(1);
        let _alice = server.connect(2);
        let _idle = server.connect(3);
        server.play(1, "bob", "secret");
        server.play(2, "alice", "secret");

        assert_eq!(run(&mut server, "online"), "2 online: alice, bob");
        assert_eq!(
            run(&mut server, "connections"),
            "3 connections, 2 sessions, 2 in the world"
        );
    }

    #[test]
    fn test_kick_closes_the_connection() {
        let mut server = TestServer::new();
        server.create_account("alice", "secret");
        let _rx = server.connect(1);
        server.play(1, "alice", "secret");

        assert_eq!(run(&mut server, "kick nobody"), "`nobody` is not online");
        assert_eq!(run(&mut server, "kick alice"), "Kicked `alice`");
        assert!(server.ctx.connections.handle(1).unwrap().is_closed());

        assert_eq!(server.drain_teardowns(), 1);
        assert!(!server.ctx.admission.is_online("alice"));
    }

    #[test]
    fn test_motd_show_and_replace() {
        let mut server = TestServer::new();
        server.ctx.motd.clear();
        assert_eq!(run(&mut server, "motd"), "No message of the day");

        run(&mut server, "motd Double cash weekend");
        assert_eq!(server.ctx.motd, "Double cash weekend");
        assert_eq!(
            run(&mut server, "motd"),
            "Message of the day: Double cash weekend"
        );
    }

    #[test]
    fn test_say_reaches_users_in_the_world() {
        let mut server = TestServer::new();
        server.create_account("alice", "secret");
        let mut rx = server.connect(1);
        server.play(1, "alice", "secret");
        received(&mut rx);

        assert_eq!(run(&mut server, "say restart in 5"), "Sent to 1 users");
        assert_eq!(
            received(&mut rx),
            vec![ServerPacket::Chat {
                text: "[Server] restart in 5".to_string()
            }]
        );
        assert_eq!(run(&mut server, "say"), "Usage: say <text>");
    }

    #[test]
    fn test_stats_summary() {
        let mut server = TestServer::new();
        let mut stats = ProcessorStats::default();
        assert_eq!(
            execute(&mut server.ctx, &stats, "stats"),
            "No messages processed yet"
        );

        stats.record(ClientPacketId::Ping, 0);
        let summary = execute(&mut server.ctx, &stats, "stats");
        assert!(summary.starts_with("1 messages"));
        assert!(summary.contains("Ping"));
    }
}
