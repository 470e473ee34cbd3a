use clap::Parser;
use collab_sync::protocol::{decode_client_message, encode};
use collab_sync::{
    AuthGate, AuthenticatedUser, ClientMessage, Config, JwtAuthGate, OfflineBuffer, PersistenceStore, RoomRegistry,
    ServerMessage, Session, ShadowStore, SqlitePersistence, SyncEngine,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();
    info!(address = %config.address, database = %config.database_path, environment = %config.environment, "starting collab-sync server");

    let persistence: Arc<dyn PersistenceStore> = Arc::new(SqlitePersistence::new(&config.database_path)?);
    let auth_gate: Arc<dyn AuthGate> = Arc::new(JwtAuthGate::new(&config.token_secret));
    let engine = Arc::new(SyncEngine::new(
        Arc::new(RoomRegistry::new()),
        Arc::new(ShadowStore::new()),
        Arc::clone(&persistence),
        Arc::new(OfflineBuffer::new()),
        config.snapshot_interval_secs,
    ));

    let listener = TcpListener::bind(&config.address).await?;
    info!(address = %config.address, "listening");

    let outbound_capacity = config.outbound_capacity;
    let shutdown_grace = Duration::from_millis(config.shutdown_grace_ms);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        info!(%addr, "accepted connection");
                        let engine = Arc::clone(&engine);
                        let auth_gate = Arc::clone(&auth_gate);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, engine, auth_gate, outbound_capacity).await {
                                warn!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, draining outbound queues");
                tokio::time::sleep(shutdown_grace).await;
                break;
            }
        }
    }

    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    engine: Arc<SyncEngine>,
    auth_gate: Arc<dyn AuthGate>,
    outbound_capacity: usize,
) -> Result<(), String> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    let user = match authenticate(&mut reader, &mut write_half, auth_gate.as_ref()).await? {
        Some(user) => user,
        None => return Ok(()),
    };

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(outbound_capacity);
    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match encode(&message) {
                Ok(bytes) => {
                    if write_half.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode outbound message"),
            }
        }
    });

    let session = Arc::new(Session::new(user.clone(), tx.clone()));
    info!(session_id = %session.id, user_id = %user.id, "session authenticated");
    tx.try_send(ServerMessage::Authenticated { user: user.clone() }).ok();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                session.touch();
                match decode_client_message(&line) {
                    Ok(message) => dispatch(&engine, &session, message).await,
                    Err(e) => {
                        let _ = session.try_send(ServerMessage::Error { message: format!("invalid message: {e}") });
                    }
                }
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "read error, closing connection");
                break;
            }
        }
    }

    engine.disconnect(&session);
    drop(session);
    writer_task.abort();
    Ok(())
}

async fn authenticate(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    auth_gate: &dyn AuthGate,
) -> Result<Option<AuthenticatedUser>, String> {
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) => return Err(e.to_string()),
    }

    let token = match decode_client_message(&line) {
        Ok(ClientMessage::Authenticate { token }) => token,
        Ok(_) => {
            let bytes = encode(&ServerMessage::Error { message: "first message must be Authenticate".to_string() }).unwrap();
            let _ = writer.write_all(&bytes).await;
            return Ok(None);
        }
        Err(e) => {
            let bytes = encode(&ServerMessage::Error { message: format!("invalid handshake: {e}") }).unwrap();
            let _ = writer.write_all(&bytes).await;
            return Ok(None);
        }
    };

    match auth_gate.authenticate(&token) {
        Ok(user) => Ok(Some(user)),
        Err(e) => {
            warn!(error = %e, "handshake rejected");
            let bytes = encode(&ServerMessage::Error { message: e.to_string() }).unwrap();
            let _ = writer.write_all(&bytes).await;
            Ok(None)
        }
    }
}

async fn dispatch(engine: &Arc<SyncEngine>, session: &Arc<Session>, message: ClientMessage) {
    use collab_sync::document::DocumentId;

    match message {
        ClientMessage::Authenticate { .. } => {
            let _ = session.try_send(ServerMessage::Error { message: "already authenticated".to_string() });
        }
        ClientMessage::JoinDocument { document_id } => {
            if let Err(e) = engine.join_document(session, DocumentId::from(document_id)).await {
                let _ = session.try_send(ServerMessage::Error { message: e.to_string() });
            }
        }
        ClientMessage::LeaveDocument { document_id } => {
            engine.leave_document(session, DocumentId::from(document_id));
        }
        ClientMessage::DocumentChange { document_id, patches, client_shadow_version } => {
            if let Err(e) = engine.document_change(session, DocumentId::from(document_id), patches, client_shadow_version).await {
                let _ = session.try_send(ServerMessage::Error { message: e.to_string() });
            }
        }
        ClientMessage::CursorPosition { document_id, cursor_position, selection } => {
            engine.cursor_position(session, DocumentId::from(document_id), cursor_position, selection);
        }
        ClientMessage::SaveOfflineEdit { document_id, patches, timestamp } => {
            engine.save_offline_edit(session, DocumentId::from(document_id), patches, timestamp);
        }
        ClientMessage::SyncOfflineEdits { document_id } => {
            if let Err(e) = engine.sync_offline_edits(session, DocumentId::from(document_id)).await {
                let _ = session.try_send(ServerMessage::Error { message: e.to_string() });
            }
        }
    }
}
