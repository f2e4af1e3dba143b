use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn terminal_client_chats_through_relay_binary() -> Result<()> {
    let binary = Path::new(env!("CARGO_BIN_EXE_line_chat_relay"));

    let (mut server_child, mut server_stdout) = spawn_server(binary).await?;
    let port = read_server_port(&mut server_stdout).await?;
    let addr = format!("127.0.0.1:{port}");

    // Drain additional relay logs in the background so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    // Bob uses the terminal client; the nickname is just his first stdin line.
    let mut bob = spawn_client(binary, &addr).await?;
    bob.send_line("Bob").await?;
    read_until(&mut bob.stdout, ">>> Bob has joined the chat!").await?;

    // Alice speaks the wire protocol directly.
    let (mut alice_reader, mut alice_writer) = connect(&addr).await?;
    send(&mut alice_writer, "Alice").await?;
    let joined = read_line_expect(&mut alice_reader, "waiting for alice join").await?;
    assert_eq!(joined, "Enter your nickname: >>> Alice has joined the chat!");
    read_until(&mut bob.stdout, ">>> Alice has joined the chat!").await?;

    send(&mut alice_writer, "hello bob").await?;
    let echo = read_line_expect(&mut alice_reader, "waiting for alice echo").await?;
    assert!(echo.ends_with("] [Alice]: hello bob"), "unexpected echo: {echo}");
    read_until(&mut bob.stdout, "] [Alice]: hello bob").await?;

    bob.send_line("hi alice").await?;
    let reply = read_line_expect(&mut alice_reader, "waiting for bob's reply").await?;
    assert!(reply.ends_with("] [Bob]: hi alice"), "unexpected reply: {reply}");

    // Bob quits; the relay closes his connection and the client exits cleanly.
    bob.send_line("/quit").await?;
    let departure = read_line_expect(&mut alice_reader, "waiting for bob to leave").await?;
    assert_eq!(departure, "<<< Bob has left the chat.");
    ensure_success(&mut bob.child, "bob client").await?;

    // The relay has no graceful shutdown; terminate it manually.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    Ok(())
}

#[tokio::test]
async fn bind_failure_exits_with_error() -> Result<()> {
    let binary = Path::new(env!("CARGO_BIN_EXE_line_chat_relay"));
    let occupied = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = occupied.local_addr()?;

    let status = timeout(
        READ_TIMEOUT,
        Command::new(binary)
            .arg("server")
            .arg("--listen")
            .arg(addr.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status(),
    )
    .await??;

    assert!(!status.success());
    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn relay")?;
    let stdout = child
        .stdout
        .take()
        .context("relay stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_port(reader: &mut BufReader<ChildStdout>) -> Result<u16> {
    let line = read_line(reader)
        .await?
        .context("relay did not emit listening address")?;
    let rest = line
        .split("127.0.0.1:")
        .nth(1)
        .ok_or_else(|| anyhow!("relay banner missing socket: {line}"))?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits
        .parse()
        .with_context(|| format!("unexpected relay banner format: {line}"))
}

async fn spawn_client(binary: &Path, addr: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--server")
        .arg(addr)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn client")?;
    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    Ok(ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    })
}

async fn connect(addr: &str) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn send(writer: &mut OwnedWriteHalf, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Reads client output until a line contains `needle`. The terminal client
/// interleaves prompt redraws with relay lines, so exact matching is avoided.
async fn read_until<R>(reader: &mut R, needle: &str) -> Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        match read_line(reader).await? {
            Some(line) if line.contains(needle) => return Ok(line),
            Some(_) => continue,
            None => return Err(anyhow!("stream closed before '{needle}'")),
        }
    }
}

async fn read_line_expect<R>(reader: &mut R, description: &str) -> Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes_io = match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    if bytes_io? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .with_context(|| format!("{name} did not exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
