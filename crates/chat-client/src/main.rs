// crates/chat-client/src/main.rs

use anyhow::Result;
use chat_client::{ClientSession, Destination};
use chat_core::Category;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[clap(name = "chat-client")]
#[clap(about = "Line-oriented client for the chat server")]
struct Cli {
    /// Server IP address
    #[clap(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[clap(short, long, default_value = "9000")]
    port: u16,

    /// Username to register
    #[clap(short, long)]
    username: String,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "debug".into()),
            )
            .init();
    }

    let session = ClientSession::connect(&cli.server, cli.port, cli.username).await?;
    let user_id = session.login().await?;
    println!("logged in as '{}' (id {})", session.username(), user_id);
    println!("commands: /users, /status <s>, /msg <user> <text>, /all <text>, /inbox, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        drain_notifications(&session);

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result = match line.split_once(' ') {
            _ if line == "/quit" => break,
            _ if line == "/users" => match session.request_connected_users().await {
                Ok(users) => {
                    for user in users.values() {
                        println!("  {} (id {}) - {}", user.name, user.id, user.status);
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            },
            _ if line == "/inbox" => {
                drain_notifications(&session);
                Ok(())
            }
            Some(("/status", status)) => session.change_status(status).await.map(|s| {
                println!("status is now '{}'", s);
            }),
            Some(("/all", text)) => session.broadcast(text).await.map(|s| {
                println!("server: {}", s);
            }),
            Some(("/msg", rest)) => match rest.split_once(' ') {
                Some((user, text)) => session
                    .direct_message(text, Destination::Name(user.to_string()))
                    .await
                    .map(|s| {
                        println!("server: {}", s);
                    }),
                None => {
                    println!("usage: /msg <user> <text>");
                    Ok(())
                }
            },
            _ => {
                println!("unknown command: {}", line);
                Ok(())
            }
        };

        if let Err(e) = result {
            eprintln!("error: {}", e);
            if session.is_stopped() {
                break;
            }
        }
    }

    session.stop_session().await;
    Ok(())
}

fn drain_notifications(session: &ClientSession) {
    while let Some(msg) = session.try_pop_message(Category::Broadcast) {
        println!("[all] {} (id {}): {}", msg.from_username, msg.from_id, msg.body);
    }
    while let Some(msg) = session.try_pop_message(Category::Direct) {
        println!("[dm] {} (id {}): {}", msg.from_username, msg.from_id, msg.body);
    }
}
