use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;

// RCON payloads are small; anything past this is a corrupt stream.
const MAX_PACKET_BYTES: usize = 4110;

// Servers send at most one junk packet ahead of the auth response.
const MAX_AUTH_REPLIES: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// The instance is not accepting console connections, likely not ready yet.
    #[error("console connection refused")]
    ConnectionRefused,
    #[error("console call timed out")]
    Timeout,
    #[error("console command failed: {0}")]
    Execution(String),
}

fn classify_io(e: io::Error) -> ConsoleError {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ConsoleError::ConnectionRefused,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConsoleError::Timeout,
        _ => ConsoleError::Execution(e.to_string()),
    }
}

/// Administrative verbs exposed over the console. Pure string formatting
/// around the single-exchange primitive; no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleCommand {
    Kick,
    Ban,
    Pardon,
    WhitelistAdd,
    WhitelistRemove,
    Op,
    Deop,
    Say,
}

impl ConsoleCommand {
    fn verb(&self) -> &'static str {
        match self {
            ConsoleCommand::Kick => "kick",
            ConsoleCommand::Ban => "ban",
            ConsoleCommand::Pardon => "pardon",
            ConsoleCommand::WhitelistAdd => "whitelist add",
            ConsoleCommand::WhitelistRemove => "whitelist remove",
            ConsoleCommand::Op => "op",
            ConsoleCommand::Deop => "deop",
            ConsoleCommand::Say => "say",
        }
    }

    pub fn line(&self, argument: &str) -> String {
        format!("{} {}", self.verb(), argument)
    }
}

#[derive(Debug)]
struct Packet {
    id: i32,
    ptype: i32,
    body: String,
}

fn encode_packet(id: i32, ptype: i32, body: &str) -> Vec<u8> {
    let len = (4 + 4 + body.len() + 2) as i32;
    let mut out = Vec::with_capacity(body.len() + 14);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&ptype.to_le_bytes());
    out.extend_from_slice(body.as_bytes());
    out.extend_from_slice(&[0, 0]);
    out
}

fn read_packet<R: Read>(r: &mut R) -> io::Result<Packet> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = i32::from_le_bytes(len_buf);
    if !(10..=MAX_PACKET_BYTES as i32).contains(&len) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid rcon packet length: {len}"),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;

    let id = i32::from_le_bytes(payload[0..4].try_into().expect("4-byte slice"));
    let ptype = i32::from_le_bytes(payload[4..8].try_into().expect("4-byte slice"));
    let body_end = payload.len().saturating_sub(2);
    let body = String::from_utf8_lossy(&payload[8..body_end]).to_string();

    Ok(Packet { id, ptype, body })
}

/// One authenticated request/response exchange. Blocks the calling thread.
fn execute_blocking(
    host: &str,
    port: u16,
    password: &str,
    command: &str,
    timeout: Duration,
) -> Result<String, ConsoleError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(classify_io)?
        .next()
        .ok_or_else(|| ConsoleError::Execution(format!("cannot resolve {host}:{port}")))?;

    let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(classify_io)?;
    stream.set_read_timeout(Some(timeout)).map_err(classify_io)?;
    stream.set_write_timeout(Some(timeout)).map_err(classify_io)?;

    stream
        .write_all(&encode_packet(1, SERVERDATA_AUTH, password))
        .map_err(classify_io)?;

    // Some servers send an empty response value before the auth response.
    // The wait is bounded so a chatty peer cannot hold the worker past a
    // few read timeouts.
    let mut authed = false;
    for _ in 0..MAX_AUTH_REPLIES {
        let pkt = read_packet(&mut stream).map_err(classify_io)?;
        if pkt.ptype != SERVERDATA_AUTH_RESPONSE {
            continue;
        }
        if pkt.id == -1 {
            return Err(ConsoleError::Execution(
                "console authentication rejected".to_string(),
            ));
        }
        authed = true;
        break;
    }
    if !authed {
        return Err(ConsoleError::Execution(
            "console authentication did not complete".to_string(),
        ));
    }

    stream
        .write_all(&encode_packet(2, SERVERDATA_EXECCOMMAND, command))
        .map_err(classify_io)?;

    let pkt = read_packet(&mut stream).map_err(classify_io)?;
    Ok(pkt.body)
}

/// Runs the blocking console exchange on a dedicated worker thread so it can
/// never stall the scheduling loop.
pub async fn execute(
    host: String,
    port: u16,
    password: String,
    command: String,
    timeout: Duration,
) -> Result<String, ConsoleError> {
    tokio::task::spawn_blocking(move || {
        execute_blocking(&host, port, &password, &command, timeout)
    })
    .await
    .map_err(|e| ConsoleError::Execution(format!("console worker failed: {e}")))?
}
