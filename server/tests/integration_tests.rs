//! Integration tests for the networked server
//!
//! These tests start a real server on a loopback port and talk to it over TCP.

use server::accounts::{AccountStore, CharacterRecord, CredentialStore};
use server::config::ServerSettings;
use server::console::ConsoleRequest;
use server::content::GameData;
use server::game_loop::{start, RunningServer};
use server::network::{read_frame, write_frame};
use shared::packets::{
    Attack, BuyFromShop, CreateNewAccount, Login, Message, MoveRight, Ping, Say,
    SelectAccountCharacter, UseWorld,
};
use shared::protocol::GameMessage;
use shared::ServerPacket;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn settings() -> ServerSettings {
    ServerSettings {
        bind_address: "127.0.0.1:0".to_string(),
        update_rate_ms: 1,
        ..Default::default()
    }
}

fn store_with(names: &[&str]) -> Arc<AccountStore> {
    let store = Arc::new(AccountStore::in_memory());
    let start = GameData::demo().start;
    for name in names {
        store
            .create_account(
                name,
                "secret",
                "someone@example.com",
                CharacterRecord::new(name, start),
            )
            .unwrap();
    }
    store
}

async fn start_server(settings: ServerSettings, store: Arc<AccountStore>) -> RunningServer {
    start(settings, store, GameData::demo()).await.unwrap()
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn connect(server: &RunningServer) -> Self {
        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        Self { stream }
    }

    async fn send<M: Message>(&mut self, message: M) {
        write_frame(&mut self.stream, &message.encode().unwrap())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Option<ServerPacket> {
        let frame = timeout(WAIT, read_frame(&mut self.stream))
            .await
            .expect("timed out waiting for the server")
            .ok()??;
        Some(ServerPacket::decode(&frame).unwrap())
    }

    /// Skips messages until one matches.
    async fn recv_until<F: Fn(&ServerPacket) -> bool>(&mut self, wanted: F) -> ServerPacket {
        loop {
            let packet = self.recv().await.expect("connection closed");
            if wanted(&packet) {
                return packet;
            }
        }
    }

    async fn login(&mut self, name: &str) -> ServerPacket {
        self.send(Login {
            name: name.to_string(),
            password: "secret".to_string(),
        })
        .await;
        self.recv().await.expect("connection closed")
    }

    /// Logs in, selects the first character and waits until the client is in the world.
    async fn play(&mut self, name: &str) {
        assert_eq!(self.login(name).await, ServerPacket::LoginSuccessful);
        self.recv_until(|packet| matches!(packet, ServerPacket::AccountCharacters { .. }))
            .await;
        self.send(SelectAccountCharacter { index: 0 }).await;
        self.recv_until(|packet| matches!(packet, ServerPacket::SetCash { .. }))
            .await;
    }

    /// Sends a ping and waits for the answer, proving the connection is alive and in the world.
    async fn ping(&mut self) {
        self.send(Ping).await;
        self.recv_until(|packet| *packet == ServerPacket::Ping).await;
    }

    /// True once the server has closed the connection.
    async fn closed(&mut self) -> bool {
        loop {
            match timeout(WAIT, read_frame(&mut self.stream)).await {
                Ok(Ok(Some(_))) => continue,
                Ok(Ok(None)) | Ok(Err(_)) => return true,
                Err(_) => return false,
            }
        }
    }
}

/// LOGIN AND ADMISSION TESTS
mod login_tests {
    use super::*;

    /// Creates an account over the wire and plays it
    #[tokio::test]
    async fn create_account_then_play() {
        let server = start_server(settings(), store_with(&[])).await;
        let mut client = TestClient::connect(&server).await;

        client
            .send(CreateNewAccount {
                name: "newbie".to_string(),
                password: "secret".to_string(),
                email: "newbie@example.com".to_string(),
            })
            .await;
        assert_eq!(
            client.recv().await,
            Some(ServerPacket::CreateAccountResult {
                success: true,
                message: GameMessage::CreateAccountSuccessful
            })
        );

        assert_eq!(client.login("newbie").await, ServerPacket::LoginSuccessful);
        assert_eq!(
            client.recv().await,
            Some(ServerPacket::AccountCharacters {
                names: vec!["newbie".to_string()]
            })
        );
        client.send(SelectAccountCharacter { index: 0 }).await;
        assert_eq!(client.recv().await, Some(ServerPacket::SetMap { map: 1 }));
        client
            .recv_until(|packet| matches!(packet, ServerPacket::Chat { .. }))
            .await;
        client.ping().await;

        server.stop().await;
    }

    /// Many simultaneous logins to one account admit exactly one connection
    #[tokio::test]
    async fn concurrent_logins_admit_exactly_one() {
        let server = start_server(settings(), store_with(&["alice"])).await;

        let mut clients = Vec::new();
        for _ in 0..8 {
            clients.push(TestClient::connect(&server).await);
        }
        let attempts = clients.into_iter().map(|mut client| {
            tokio::spawn(async move {
                let reply = client.login("alice").await;
                (client, reply)
            })
        });

        let mut replies = Vec::new();
        let mut survivors = Vec::new();
        for attempt in attempts.collect::<Vec<_>>() {
            let (client, reply) = attempt.await.unwrap();
            replies.push(reply);
            survivors.push(client);
        }

        let admitted = replies
            .iter()
            .filter(|reply| **reply == ServerPacket::LoginSuccessful)
            .count();
        assert_eq!(admitted, 1);
        assert!(replies
            .iter()
            .filter(|reply| **reply != ServerPacket::LoginSuccessful)
            .all(|reply| *reply
                == ServerPacket::LoginUnsuccessful {
                    message: GameMessage::LoginUserAlreadyOnline
                }));

        server.stop().await;
    }

    /// Wrong passwords are refused without closing the connection
    #[tokio::test]
    async fn wrong_password_then_right_one() {
        let server = start_server(settings(), store_with(&["alice"])).await;
        let mut client = TestClient::connect(&server).await;

        client
            .send(Login {
                name: "alice".to_string(),
                password: "guess".to_string(),
            })
            .await;
        assert_eq!(
            client.recv().await,
            Some(ServerPacket::LoginUnsuccessful {
                message: GameMessage::LoginInvalidNamePassword
            })
        );
        assert_eq!(client.login("alice").await, ServerPacket::LoginSuccessful);

        server.stop().await;
    }

    /// A disconnected user frees the account for the next login
    #[tokio::test]
    async fn name_is_released_after_disconnect() {
        let server = start_server(settings(), store_with(&["alice"])).await;
        let mut first = TestClient::connect(&server).await;
        first.play("alice").await;
        drop(first);

        let deadline = Instant::now() + WAIT;
        loop {
            let mut second = TestClient::connect(&server).await;
            if second.login("alice").await == ServerPacket::LoginSuccessful {
                break;
            }
            assert!(Instant::now() < deadline, "account was never released");
            sleep(Duration::from_millis(20)).await;
        }

        server.stop().await;
    }
}

/// PROTOCOL VIOLATION TESTS
mod protocol_tests {
    use super::*;

    /// Gameplay messages before login are ignored, not punished
    #[tokio::test]
    async fn unauthenticated_messages_are_ignored() {
        let server = start_server(settings(), store_with(&["alice"])).await;
        let mut client = TestClient::connect(&server).await;

        client.send(MoveRight).await;
        client
            .send(Say {
                text: "hello?".to_string(),
            })
            .await;
        assert_eq!(client.login("alice").await, ServerPacket::LoginSuccessful);

        server.stop().await;
    }

    /// Gameplay messages between login and character selection are ignored
    #[tokio::test]
    async fn messages_before_character_selection_are_ignored() {
        let server = start_server(settings(), store_with(&["alice"])).await;
        let mut client = TestClient::connect(&server).await;

        assert_eq!(client.login("alice").await, ServerPacket::LoginSuccessful);
        client
            .recv_until(|packet| matches!(packet, ServerPacket::AccountCharacters { .. }))
            .await;
        client.send(Attack).await;
        client
            .send(Say {
                text: "anyone?".to_string(),
            })
            .await;
        client.send(UseWorld { entity: 0 }).await;
        client.send(BuyFromShop { slot: 0, amount: 1 }).await;
        client.send(Ping).await;

        // Nothing was answered, so the first reply to the selection is the map.
        client.send(SelectAccountCharacter { index: 0 }).await;
        assert_eq!(client.recv().await, Some(ServerPacket::SetMap { map: 1 }));
        client.ping().await;

        server.stop().await;
    }

    /// Unknown opcodes and truncated payloads are dropped
    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let server = start_server(settings(), store_with(&["alice"])).await;
        let mut client = TestClient::connect(&server).await;

        // Opcode 31 does not exist.
        write_frame(&mut client.stream, &[0xFF]).await.unwrap();
        // A login opcode with nothing after it.
        let login = Login {
            name: "alice".to_string(),
            password: "secret".to_string(),
        }
        .encode()
        .unwrap();
        write_frame(&mut client.stream, &login[..1]).await.unwrap();
        // Empty frames are skipped by the reader.
        client.stream.write_u16(0).await.unwrap();

        assert_eq!(client.login("alice").await, ServerPacket::LoginSuccessful);
        server.stop().await;
    }

    /// Frames above the configured limit close the connection
    #[tokio::test]
    async fn oversized_frame_disconnects() {
        let server = start_server(settings(), store_with(&[])).await;
        let mut client = TestClient::connect(&server).await;

        client.stream.write_u16(u16::MAX).await.unwrap();
        assert!(client.closed().await);

        server.stop().await;
    }
}

/// SERVER LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Silent connections are closed by the periodic purge
    #[tokio::test]
    async fn idle_connections_are_pruned() {
        let settings = ServerSettings {
            purge_interval_ms: 50,
            idle_timeout_ms: 100,
            ..settings()
        };
        let server = start_server(settings, store_with(&[])).await;
        let mut client = TestClient::connect(&server).await;

        assert!(client.closed().await);
        server.stop().await;
    }

    /// Chat reaches other users on the same map
    #[tokio::test]
    async fn users_on_a_map_hear_each_other() {
        let server = start_server(settings(), store_with(&["alice", "bob"])).await;
        let mut alice = TestClient::connect(&server).await;
        let mut bob = TestClient::connect(&server).await;
        alice.play("alice").await;
        bob.play("bob").await;

        alice
            .send(Say {
                text: "hi bob".to_string(),
            })
            .await;
        let heard = bob
            .recv_until(|packet| {
                matches!(packet, ServerPacket::Chat { text } if text.starts_with("alice"))
            })
            .await;
        assert_eq!(
            heard,
            ServerPacket::Chat {
                text: "alice: hi bob".to_string()
            }
        );

        server.stop().await;
    }

    /// Console commands are answered by the running server
    #[tokio::test]
    async fn console_commands_reach_the_simulation() {
        let server = start_server(settings(), store_with(&["alice"])).await;
        let mut client = TestClient::connect(&server).await;
        client.play("alice").await;

        let (reply, response) = oneshot::channel();
        server
            .console()
            .send(ConsoleRequest {
                line: "online".to_string(),
                reply,
            })
            .unwrap();
        let answer = timeout(WAIT, response).await.unwrap().unwrap();
        assert_eq!(answer, "1 online: alice");

        server.stop().await;
    }

    /// Stopping the server saves characters and closes connections
    #[tokio::test]
    async fn stop_saves_and_disconnects() {
        let store = store_with(&["alice"]);
        let server = start_server(settings(), Arc::clone(&store)).await;
        let mut client = TestClient::connect(&server).await;
        client.play("alice").await;

        client.send(MoveRight).await;
        client.ping().await;
        sleep(Duration::from_millis(100)).await;
        server.stop().await;

        assert!(client.closed().await);
        let saved = &store.characters("alice").unwrap()[0];
        assert!(saved.x > GameData::demo().start.x);
    }

    /// The shutdown console command stops the loop on its own
    #[tokio::test]
    async fn shutdown_command_stops_the_server() {
        let server = start_server(settings(), store_with(&[])).await;
        let shutdown = server.shutdown_handle();

        let (reply, response) = oneshot::channel();
        server
            .console()
            .send(ConsoleRequest {
                line: "shutdown".to_string(),
                reply,
            })
            .unwrap();
        assert_eq!(timeout(WAIT, response).await.unwrap().unwrap(), "Shutting down");
        timeout(WAIT, shutdown.wait()).await.unwrap();
        assert!(shutdown.is_requested());

        server.stop().await;
    }
}
