use std::io::BufRead;

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedReadHalf},
    select,
    sync::mpsc,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{read_line, write_line},
};

const PROMPT: &str = "> ";

/// Terminal client: prints relay lines in the background while stdin lines
/// are sent to the relay. Ends when stdin closes or the relay hangs up.
pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (reader, mut writer) = stream.into_split();
    let mut receiver = tokio::spawn(receive_lines(BufReader::new(reader)));
    let mut input = spawn_stdin_reader();

    write_stdout(PROMPT).await?;
    loop {
        select! {
            line = input.recv() => {
                let Some(line) = line else { break };
                write_line(&mut writer, &line).await?;
                write_stdout(PROMPT).await?;
            }
            received = &mut receiver => {
                if let Ok(Err(error)) = received {
                    warn!(?error, "lost connection to relay");
                }
                return Ok(());
            }
        }
    }

    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
    Ok(())
}

async fn receive_lines(mut reader: BufReader<OwnedReadHalf>) -> io::Result<()> {
    while let Some(line) = read_line(&mut reader).await? {
        // Overwrite the pending prompt, then redraw it below the message.
        write_stdout(&format!("\r{line}\n{PROMPT}")).await?;
    }
    Ok(())
}

/// Stdin is read on a plain thread so a pending read never holds up runtime
/// shutdown once the relay has closed the connection.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (lines, receiver) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if lines.blocking_send(line).is_err() {
                break;
            }
        }
    });
    receiver
}

async fn write_stdout(text: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await
}
