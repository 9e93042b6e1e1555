use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    load_settings, load_settings_from, CompletionService, HttpCompletionService,
    RoomSessionManager, SessionEvent, SessionPhase,
};
use shared::{
    domain::{RoomId, UserId},
    protocol::User,
};
use storage::{RecordStore, SqliteRecordStore};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "sqlite://data/chat.db")]
    database_url: String,
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    display_name: Option<String>,
    /// Settings file; defaults to `client.toml` in the working directory.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Create the default public rooms when the store has none.
    #[arg(long)]
    seed: bool,
}

const SEED_ROOMS: &[(&str, &str, &str)] = &[
    ("general", "Genel", "Herkese açık sohbet"),
    ("tech", "Yazılım Dünyası", "Kodlama, AI ve Teknoloji"),
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };

    let store = SqliteRecordStore::new(&args.database_url)
        .await
        .with_context(|| format!("failed to open store at {}", args.database_url))?;

    let user = User::new(
        args.user_id.as_str(),
        args.display_name.clone().unwrap_or_else(|| args.user_id.clone()),
    );
    store.create_user(&user).await?;
    store.create_user(&settings.assistant.as_user()).await?;
    if args.seed && store.list_public_rooms().await?.is_empty() {
        for (id, name, topic) in SEED_ROOMS {
            store.create_public_room(&RoomId::from(*id), name, topic).await?;
        }
        info!(rooms = SEED_ROOMS.len(), "seeded public rooms");
    }

    let completion: Arc<dyn CompletionService> =
        Arc::new(HttpCompletionService::new(settings.completion.clone()));
    let manager = RoomSessionManager::new(Arc::new(store), completion, settings);
    spawn_event_printer(&manager);

    enter_session(&manager, user).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match handle_line(&manager, line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => println!("! {err:#}"),
        }
    }

    manager.sign_out().await;
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(manager: &Arc<RoomSessionManager>, line: &str) -> Result<bool> {
    let (command, argument) = match line.split_once(' ') {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };

    match command {
        "/quit" => return Ok(false),
        "/rooms" => print_rooms(manager).await,
        "/users" => {
            for user in manager.users().await {
                let marker = if user.is_automated { " (bot)" } else { "" };
                println!("  {} {}{marker}", user.id, user.display_name);
            }
        }
        "/join" => {
            let outcome = manager.switch_room(&RoomId::from(argument)).await?;
            println!("* {outcome:?}");
            print_view(manager).await;
        }
        "/dm" => {
            let room_id = manager.open_direct_message(&UserId::from(argument)).await?;
            println!("* direct messages in {room_id}");
            print_view(manager).await;
        }
        "/block" => {
            let phase = manager.set_blocked(&UserId::from(argument), true).await?;
            println!("* blocked {argument} ({phase:?})");
        }
        "/unblock" => {
            let phase = manager.set_blocked(&UserId::from(argument), false).await?;
            println!("* unblocked {argument} ({phase:?})");
        }
        "/blocked" => {
            for id in manager.block_registry().blocked_ids().await {
                println!("  {id}");
            }
        }
        "/dms" => {
            let allowed = argument != "off";
            manager.set_direct_messages_allowed(allowed).await;
            println!("* direct messages {}", if allowed { "on" } else { "off" });
        }
        _ if command.starts_with('/') => println!("! unknown command {command}"),
        _ => {
            manager.send_message(line).await?;
        }
    }
    Ok(true)
}

async fn enter_session(manager: &Arc<RoomSessionManager>, user: User) -> Result<()> {
    let first = manager.sign_in(user).await;
    print_rooms(manager).await;
    if let Some(first) = first {
        manager.switch_room(&first).await?;
        print_view(manager).await;
    }
    Ok(())
}

async fn print_view(manager: &RoomSessionManager) {
    let view = manager.view().await;
    if let Some(room) = &view.room {
        println!("== {} ({})", room.name, room.topic);
    }
    if view.blocked {
        println!("* this conversation is blocked");
        return;
    }
    for message in &view.messages {
        println!("<{}> {}", message.sender_name, message.body);
    }
}

async fn print_rooms(manager: &RoomSessionManager) {
    if manager.is_demo_mode().await {
        println!("* store unreachable, demo rooms are local only");
    }
    for room in manager.rooms().await {
        println!("  {} {} [{}]", room.id, room.name, room.kind.as_str());
    }
}

fn spawn_event_printer(manager: &RoomSessionManager) {
    let mut events = manager.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::MessageAppended { message }) => {
                    println!("<{}> {}", message.sender_name, message.body);
                }
                Ok(SessionEvent::PhaseChanged {
                    room_id: Some(room_id),
                    phase: SessionPhase::Blocked,
                }) => println!("* {room_id} is hidden while blocked"),
                Ok(SessionEvent::RoomAdded { room }) => println!("* new room {}", room.id),
                Ok(SessionEvent::Error(err)) => println!("! {err}"),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
