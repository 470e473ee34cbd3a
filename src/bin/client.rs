use clap::Parser;
use collab_sync::{make_patch, ClientMessage, PatchBundle, ServerMessage};
use colored::*;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

#[derive(Parser)]
#[command(name = "sync-client")]
#[command(about = "Interactive client for a collaborative document session")]
struct Cli {
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Bearer token handed out by whatever issues this deployment's JWTs.
    #[arg(short, long)]
    token: String,

    /// Document to join immediately after authenticating.
    #[arg(short, long)]
    document: Option<String>,
}

/// Local view of the one document the interactive loop is editing:
/// `shadow` is what the server last agreed on, `content` is what the
/// user has typed since. Diffing the two produces the patch sent on
/// `edit`.
struct ClientState {
    document_id: Option<String>,
    shadow: String,
    content: String,
}

impl ClientState {
    fn new() -> Self {
        Self { document_id: None, shadow: String::new(), content: String::new() }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    println!("{}", "Collaborative Editor Client".blue().bold());
    println!("server: {}", cli.server.cyan());

    let stream = TcpStream::connect(&cli.server).await?;
    println!("{}", "connected".green());

    let (read_half, mut write_half) = stream.into_split();

    send(&mut write_half, &ClientMessage::Authenticate { token: cli.token.clone() }).await?;

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    match read_one(&mut reader, &mut line).await? {
        Some(ServerMessage::Authenticated { user }) => {
            println!("authenticated as {} ({})", user.username.green(), user.id.dimmed());
        }
        Some(ServerMessage::Error { message }) => {
            eprintln!("{} {}", "authentication failed:".red(), message);
            return Ok(());
        }
        Some(_) => {
            eprintln!("{}", "unexpected first message from server".red());
            return Ok(());
        }
        None => {
            eprintln!("{}", "connection closed during handshake".red());
            return Ok(());
        }
    }

    let state = Arc::new(Mutex::new(ClientState::new()));
    let write_half = Arc::new(Mutex::new(write_half));

    if let Some(document_id) = cli.document.clone() {
        state.lock().await.document_id = Some(document_id.clone());
        send(&mut *write_half.lock().await, &ClientMessage::JoinDocument { document_id }).await?;
    }

    let reader_state = Arc::clone(&state);
    let reader_task = tokio::spawn(async move {
        if let Err(e) = receive_loop(reader, reader_state).await {
            eprintln!("{} {}", "connection error:".red(), e);
        }
    });

    let command_state = Arc::clone(&state);
    let command_task = tokio::spawn(async move {
        if let Err(e) = command_loop(command_state, write_half).await {
            eprintln!("{} {}", "command loop error:".red(), e);
        }
    });

    tokio::select! {
        _ = reader_task => println!("{}", "connection closed".yellow()),
        _ = command_task => println!("{}", "session ended".yellow()),
    }

    Ok(())
}

async fn receive_loop(
    mut reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    state: Arc<Mutex<ClientState>>,
) -> Result<(), String> {
    let mut line = String::new();
    loop {
        match read_one(&mut reader, &mut line).await? {
            Some(message) => handle_server_message(&state, message).await,
            None => return Ok(()),
        }
    }
}

async fn handle_server_message(state: &Arc<Mutex<ClientState>>, message: ServerMessage) {
    match message {
        ServerMessage::DocumentData { document, active_editors } => {
            let mut guard = state.lock().await;
            guard.shadow = document.content.clone();
            guard.content = document.content.clone();
            drop(guard);
            println!("\n{} \"{}\"", "document:".bold(), truncate(&document.content, 70).blue());
            println!("{} {}", "editors online:".dimmed(), active_editors.len());
            prompt();
        }
        ServerMessage::DocumentChange { patches, user_id, username } => {
            let mut guard = state.lock().await;
            let (new_shadow, shadow_results) = collab_sync::apply(&patches, &guard.shadow);
            if PatchBundle::fully_applied(&shadow_results) {
                guard.shadow = new_shadow;
                let (new_content, content_results) = collab_sync::apply(&patches, &guard.content);
                if PatchBundle::fully_applied(&content_results) {
                    guard.content = new_content.clone();
                    drop(guard);
                    println!("\n{} {} edited the document", "live:".green().bold(), username.cyan());
                    println!("document: \"{}\"", truncate(&new_content, 70).blue());
                    prompt();
                    return;
                }
            }
            drop(guard);
            println!("\n{} patch from {} did not apply cleanly, waiting for resync", "warn:".yellow(), user_id);
            prompt();
        }
        ServerMessage::SyncRequired { content, server_shadow_version } => {
            let mut guard = state.lock().await;
            guard.shadow = content.clone();
            guard.content = content.clone();
            drop(guard);
            println!("\n{} server shadow v{} did not match, resynchronized", "resync:".yellow().bold(), server_shadow_version);
            println!("document: \"{}\"", truncate(&content, 70).blue());
            prompt();
        }
        ServerMessage::DocumentUpdated { content, user_id, username } => {
            let mut guard = state.lock().await;
            guard.shadow = content.clone();
            guard.content = content.clone();
            drop(guard);
            println!("\n{} {} ({}) updated the document", "update:".green().bold(), username.cyan(), user_id.dimmed());
            println!("document: \"{}\"", truncate(&content, 70).blue());
            prompt();
        }
        ServerMessage::CursorPosition { username, cursor_position, .. } => {
            println!("\n{} {} moved to offset {}", "cursor:".dimmed(), username, cursor_position);
            prompt();
        }
        ServerMessage::EditorJoined { username, active_editors, .. } => {
            println!("\n{} {} joined ({} online)", "+".green().bold(), username.cyan(), active_editors.len());
            prompt();
        }
        ServerMessage::EditorLeft { username, active_editors, .. } => {
            println!("\n{} {} left ({} online)", "-".red().bold(), username.cyan(), active_editors.len());
            prompt();
        }
        ServerMessage::VersionCreated { version_index, username, .. } => {
            println!("\n{} version {} saved by {}", "snapshot:".blue(), version_index, username.cyan());
            prompt();
        }
        ServerMessage::OfflineEditsAvailable { count } => {
            println!("\n{} {} offline edit(s) pending, run 'sync-offline' to replay them", "offline:".yellow(), count);
            prompt();
        }
        ServerMessage::OfflineEditSaved => {
            println!("\n{}", "offline edit buffered".dimmed());
            prompt();
        }
        ServerMessage::OfflineEditsSynced { success, count } => {
            println!("\n{} replayed {} edit(s), success={}", "offline-sync:".blue(), count, success);
            prompt();
        }
        ServerMessage::Error { message } => {
            println!("\n{} {}", "error:".red().bold(), message);
            prompt();
        }
        ServerMessage::Authenticated { .. } => {}
    }
}

async fn command_loop(
    state: Arc<Mutex<ClientState>>,
    write_half: Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
) -> Result<(), String> {
    print_help();

    loop {
        print!("\n> ");
        io::stdout().flush().map_err(|e| e.to_string())?;

        let mut input = String::new();
        io::stdin().read_line(&mut input).map_err(|e| e.to_string())?;
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let parts: Vec<&str> = input.splitn(2, ' ').collect();
        match parts[0] {
            "join" => {
                if let Some(document_id) = parts.get(1) {
                    let document_id = document_id.trim().to_string();
                    state.lock().await.document_id = Some(document_id.clone());
                    send(&mut *write_half.lock().await, &ClientMessage::JoinDocument { document_id }).await?;
                } else {
                    println!("usage: join <document-id>");
                }
            }
            "leave" => {
                let document_id = state.lock().await.document_id.clone();
                if let Some(document_id) = document_id {
                    send(&mut *write_half.lock().await, &ClientMessage::LeaveDocument { document_id }).await?;
                } else {
                    println!("not currently in a document");
                }
            }
            "edit" => {
                if let Some(text) = parts.get(1) {
                    let mut guard = state.lock().await;
                    if guard.document_id.is_none() {
                        println!("join a document first");
                        continue;
                    }
                    guard.content = text.to_string();
                    let bundle = make_patch(&guard.shadow, &guard.content);
                    guard.shadow = guard.content.clone();
                    let document_id = guard.document_id.clone().unwrap();
                    drop(guard);
                    if bundle.is_empty() {
                        println!("no changes to send");
                    } else {
                        send(
                            &mut *write_half.lock().await,
                            &ClientMessage::DocumentChange { document_id, patches: bundle, client_shadow_version: None },
                        )
                        .await?;
                        println!("{}", "change sent".dimmed());
                    }
                } else {
                    println!("usage: edit <new full text>");
                }
            }
            "cursor" => {
                if let Some(offset) = parts.get(1).and_then(|s| s.trim().parse::<usize>().ok()) {
                    let document_id = state.lock().await.document_id.clone();
                    if let Some(document_id) = document_id {
                        send(
                            &mut *write_half.lock().await,
                            &ClientMessage::CursorPosition {
                                document_id,
                                cursor_position: offset,
                                selection: collab_sync::Selection { start: offset, end: offset },
                            },
                        )
                        .await?;
                    } else {
                        println!("join a document first");
                    }
                } else {
                    println!("usage: cursor <offset>");
                }
            }
            "save-offline" => {
                if let Some(text) = parts.get(1) {
                    let mut guard = state.lock().await;
                    if guard.document_id.is_none() {
                        println!("join a document first");
                        continue;
                    }
                    guard.content = text.to_string();
                    let bundle = make_patch(&guard.shadow, &guard.content);
                    guard.shadow = guard.content.clone();
                    let document_id = guard.document_id.clone().unwrap();
                    drop(guard);
                    send(
                        &mut *write_half.lock().await,
                        &ClientMessage::SaveOfflineEdit { document_id, patches: bundle, timestamp: chrono::Utc::now() },
                    )
                    .await?;
                } else {
                    println!("usage: save-offline <new full text>");
                }
            }
            "sync-offline" => {
                let document_id = state.lock().await.document_id.clone();
                if let Some(document_id) = document_id {
                    send(&mut *write_half.lock().await, &ClientMessage::SyncOfflineEdits { document_id }).await?;
                } else {
                    println!("join a document first");
                }
            }
            "show" => {
                let guard = state.lock().await;
                println!("document: {:?}", guard.document_id);
                println!("content: \"{}\"", truncate(&guard.content, 70));
            }
            "help" | "?" => print_help(),
            "quit" | "exit" => {
                println!("{}", "goodbye".dimmed());
                break;
            }
            other => println!("unknown command: '{other}'. Type 'help' for a list."),
        }
    }

    Ok(())
}

fn prompt() {
    print!("\n> ");
    io::stdout().flush().ok();
}

fn print_help() {
    println!("\n{}", "Commands:".bold());
    println!("  {} <id>          - join a document", "join".green());
    println!("  {}                - leave the current document", "leave".green());
    println!("  {} <text>         - replace document content and send the patch", "edit".green());
    println!("  {} <offset>       - broadcast a cursor position", "cursor".green());
    println!("  {} <text>   - buffer an edit made while disconnected", "save-offline".green());
    println!("  {}            - replay buffered offline edits", "sync-offline".green());
    println!("  {}                - show local state", "show".yellow());
    println!("  {}                - show this help", "help".white());
    println!("  {}                - quit", "quit".red());
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        format!("{}...", &text[..max_len.saturating_sub(3)])
    }
}

async fn send(
    stream: &mut tokio::net::tcp::OwnedWriteHalf,
    message: &ClientMessage,
) -> Result<(), String> {
    let json = serde_json::to_string(message).map_err(|e| e.to_string())?;
    let mut bytes = json.into_bytes();
    bytes.push(b'\n');
    stream.write_all(&bytes).await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn read_one(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    line: &mut String,
) -> Result<Option<ServerMessage>, String> {
    line.clear();
    match reader.read_line(line).await {
        Ok(0) => Ok(None),
        Ok(_) => serde_json::from_str(line.trim()).map(Some).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}
