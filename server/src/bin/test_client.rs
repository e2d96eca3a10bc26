//! Headless scripted client for poking at a running server.
//!
//! Logs in (optionally creating the account first), selects the first character, walks a bit,
//! says hello, pings and prints every message the server sends back.

use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use server::network::{read_frame, write_frame};
use shared::packets::{
    CreateNewAccount, Login, Message, MoveRight, MoveStop, Ping, Say, SelectAccountCharacter,
};
use shared::ServerPacket;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:44445")]
    server: String,
    /// Account name
    #[clap(short, long, default_value = "tester")]
    name: String,
    /// Account password
    #[clap(short, long, default_value = "password")]
    password: String,
    /// Create the account with this email before logging in
    #[clap(short, long)]
    create: Option<String>,
    /// How long to walk right, in milliseconds
    #[clap(short, long, default_value = "500")]
    walk: u64,
}

async fn send<M: Message, W>(writer: &mut W, message: M) -> Result<(), Box<dyn std::error::Error>>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let payload = message.encode()?;
    write_frame(writer, &payload).await?;
    Ok(())
}

/// Waits for the next server message, printing anything that is not what `wanted` accepts.
async fn expect<F>(
    reader: &mut OwnedReadHalf,
    mut wanted: F,
) -> Result<ServerPacket, Box<dyn std::error::Error>>
where
    F: FnMut(&ServerPacket) -> bool,
{
    loop {
        let frame = timeout(Duration::from_secs(5), read_frame(reader))
            .await??
            .ok_or("server closed the connection")?;
        let packet = ServerPacket::decode(&frame)?;
        if wanted(&packet) {
            return Ok(packet);
        }
        println!("<- {:?}", packet);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    stream.set_nodelay(true)?;
    info!("Connected to {}", args.server);
    let (mut reader, mut writer) = stream.into_split();

    if let Some(email) = args.create {
        send(
            &mut writer,
            CreateNewAccount {
                name: args.name.clone(),
                password: args.password.clone(),
                email,
            },
        )
        .await?;
        let result = expect(&mut reader, |packet| {
            matches!(packet, ServerPacket::CreateAccountResult { .. })
        })
        .await?;
        println!("<- {:?}", result);
    }

    send(
        &mut writer,
        Login {
            name: args.name.clone(),
            password: args.password.clone(),
        },
    )
    .await?;
    match expect(&mut reader, |packet| {
        matches!(
            packet,
            ServerPacket::LoginSuccessful | ServerPacket::LoginUnsuccessful { .. }
        )
    })
    .await?
    {
        ServerPacket::LoginSuccessful => info!("Logged in as `{}`", args.name),
        other => {
            warn!("Login failed: {:?}", other);
            return Ok(());
        }
    }

    let characters = expect(&mut reader, |packet| {
        matches!(packet, ServerPacket::AccountCharacters { .. })
    })
    .await?;
    println!("<- {:?}", characters);
    send(&mut writer, SelectAccountCharacter { index: 0 }).await?;

    let printer = tokio::spawn(async move {
        while let Ok(Some(frame)) = read_frame(&mut reader).await {
            match ServerPacket::decode(&frame) {
                Ok(packet) => println!("<- {:?}", packet),
                Err(e) => warn!("Undecodable server message: {}", e),
            }
        }
        info!("Server closed the connection");
    });

    send(&mut writer, MoveRight).await?;
    sleep(Duration::from_millis(args.walk)).await;
    send(&mut writer, MoveStop).await?;
    send(
        &mut writer,
        Say {
            text: "Hello from the test client".to_string(),
        },
    )
    .await?;
    send(&mut writer, Ping).await?;
    sleep(Duration::from_secs(1)).await;

    drop(writer);
    printer.abort();
    info!("Test client finished");
    Ok(())
}
