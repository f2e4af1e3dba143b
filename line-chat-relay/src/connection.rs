//! Reader and writer halves of one client session.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::mpsc,
};
use tracing::{debug, info};

use crate::{
    clock::Clock,
    coordinator::{ClientId, Coordinator},
    message::{
        QUIT_COMMAND, chat_line, departure_notice, display_name, join_notice, read_line,
        write_line, write_prompt,
    },
};

/// Runs one client session over a TCP connection.
pub async fn handle_connection(
    stream: TcpStream,
    coordinator: Coordinator,
    clock: Arc<dyn Clock>,
) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    run_session(BufReader::new(reader), writer, peer, coordinator, clock).await
}

/// Drives the inbound half of a session: nickname, register, chat loop,
/// departure, unregister. The outbound half runs on its own task.
pub async fn run_session<R, W>(
    mut reader: R,
    mut writer: W,
    peer: Option<SocketAddr>,
    coordinator: Coordinator,
    clock: Arc<dyn Clock>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    write_prompt(&mut writer).await?;
    let Some(raw_name) = read_line(&mut reader).await? else {
        debug!(?peer, "connection closed before a nickname was sent");
        return Ok(());
    };
    let name = display_name(&raw_name);

    let (client, outbox) = coordinator.new_client(name.clone());
    let client_id = client.id();
    tokio::spawn(run_writer(writer, outbox, client_id));

    coordinator.register(client).await?;
    info!(?peer, client_id, %name, "client joined");
    coordinator.broadcast(join_notice(&name)).await?;

    relay_chat_lines(&mut reader, &coordinator, clock.as_ref(), &name).await?;

    coordinator.broadcast(departure_notice(&name)).await?;
    coordinator.unregister(client_id).await?;
    info!(?peer, client_id, %name, "client left");

    Ok(())
}

async fn relay_chat_lines<R>(
    reader: &mut R,
    coordinator: &Coordinator,
    clock: &dyn Clock,
    name: &str,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let text = match read_line(reader).await {
            Ok(Some(text)) => text,
            Ok(None) => break,
            Err(err) => {
                debug!(%name, error = ?err, "read failed; ending session");
                break;
            }
        };

        if text == QUIT_COMMAND {
            break;
        }

        coordinator
            .broadcast(chat_line(clock.now(), name, &text))
            .await?;
    }

    Ok(())
}

/// Drains the outbox onto the transport until the coordinator drops the
/// client, then closes the write side.
async fn run_writer<W>(mut writer: W, mut outbox: mpsc::Receiver<String>, client_id: ClientId)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbox.recv().await {
        if let Err(err) = write_line(&mut writer, &message).await {
            debug!(client_id, error = ?err, "failed to deliver message to client");
            return;
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(client_id, error = ?err, "failed to close client transport");
    }
}
