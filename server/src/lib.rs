//! # Game Server Library
//!
//! This library provides the authoritative server for a side-scrolling online RPG. It owns
//! the world, the accounts and every character, and clients only ever send requests that the
//! server validates and answers.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! All gameplay decisions are made here: movement, combat rolls, item pickups, shop trades
//! and NPC dialogs. Clients are told the outcome through server messages.
//!
//! ### Connection and Session Management
//! Handles the complete lifecycle of a client:
//! - Connection establishment, framing and idle detection
//! - Login under a single admission lock, so one account is never online twice
//! - Character selection and entry into the world
//! - Disconnect teardown that saves the character and frees the account
//!
//! ### Message Dispatch
//! Every client message starts with a bit-packed opcode. A table built at startup maps each
//! opcode to its handler and refuses to start the server if one is missing.
//!
//! ## Architecture Design
//!
//! ### Single Simulation Thread
//! One `simulation` thread owns the [`context::ServerContext`] and runs every handler, console
//! command and world update. Gameplay code never locks anything. The only shared structures are
//! the disconnect queue and the admission lock.
//!
//! ### Async Network Layer
//! Tokio tasks accept TCP connections, split the stream into length-prefixed frames and forward
//! them over unbounded channels. Outgoing messages are queued per connection and written by a
//! dedicated writer task.
//!
//! ## Module Organization
//!
//! - `config`: settings loaded from TOML with command line overrides
//! - `clock`: the game clock abstraction
//! - `connection`: connection handles, the registry and the disconnect path
//! - `accounts`, `admission`: the account database and login admission control
//! - `content`, `inventory`, `session`, `world`: game data, characters and maps
//! - `dispatch`, `handlers`: the opcode table and one handler per client message
//! - `context`, `console`, `network`, `game_loop`: wiring it all together
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::accounts::AccountStore;
//! use server::config::ServerSettings;
//! use server::content::GameData;
//! use server::game_loop::start;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ServerSettings::default();
//!     let server = start(settings, Arc::new(AccountStore::in_memory()), GameData::demo()).await?;
//!     println!("listening on {}", server.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod accounts;
pub mod admission;
pub mod clock;
pub mod config;
pub mod connection;
pub mod console;
pub mod content;
pub mod context;
pub mod dispatch;
pub mod game_loop;
pub mod handlers;
pub mod inventory;
pub mod network;
pub mod session;
pub mod world;
