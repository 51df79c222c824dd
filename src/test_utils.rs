//! In-process RFB panel server for session tests.
//!
//! Speaks just enough of the protocol (3.8 handshake, Raw/CopyRect/
//! DesktopSize updates) to exercise a real session over loopback TCP.
//! Behaviour is scripted: one batch of rectangles is sent per update
//! request, and the script can close the connection once exhausted to
//! simulate a panel going away mid-run.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::debug;

use crate::rfb::PixelFormat;
use crate::rfb::auth;

/// Authentication the scripted panel demands.
#[derive(Clone, Copy)]
pub enum PanelAuth {
    Open,
    Password(&'static str),
}

/// One scripted rectangle.
#[derive(Clone)]
pub enum ScriptRect {
    /// Raw fill of the given region with one byte value.
    Fill { x: u16, y: u16, w: u16, h: u16, value: u8 },
    CopyRect { x: u16, y: u16, w: u16, h: u16, src_x: u16, src_y: u16 },
    DesktopSize { w: u16, h: u16 },
}

/// What the panel does after the handshake.
#[derive(Clone)]
pub struct PanelScript {
    pub auth: PanelAuth,
    pub width: u16,
    pub height: u16,
    /// One batch is sent per framebuffer update request, in order.
    pub updates: Vec<Vec<ScriptRect>>,
    /// Close the connection when an update request arrives after the last
    /// scripted batch. Otherwise the panel stays connected and silent.
    pub close_when_exhausted: bool,
}

impl PanelScript {
    pub fn open(width: u16, height: u16) -> Self {
        Self { auth: PanelAuth::Open, width, height, updates: Vec::new(), close_when_exhausted: false }
    }

    pub fn with_update(mut self, rects: Vec<ScriptRect>) -> Self {
        self.updates.push(rects);
        self
    }

    pub fn full_fill(self, value: u8) -> Self {
        let (w, h) = (self.width, self.height);
        self.with_update(vec![ScriptRect::Fill { x: 0, y: 0, w, h, value }])
    }
}

/// Client traffic the panel observed after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedClientEvent {
    UpdateRequest { incremental: bool },
    Pointer { mask: u8, x: u16, y: u16 },
    Key { keysym: u32, pressed: bool },
}

/// Bind a scripted panel on loopback and serve one connection.
pub async fn spawn_panel(
    script: PanelScript,
) -> (SocketAddr, mpsc::UnboundedReceiver<ObservedClientEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let _ = serve(stream, script, events_tx).await;
        }
    });
    (addr, events_rx)
}

/// Bind a listener that accepts but never speaks RFB.
pub async fn spawn_silent_panel() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            // Hold the socket open without a banner.
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            drop(stream);
        }
    });
    addr
}

async fn serve(
    mut stream: TcpStream,
    script: PanelScript,
    events: mpsc::UnboundedSender<ObservedClientEvent>,
) -> std::io::Result<()> {
    // Version exchange.
    stream.write_all(b"RFB 003.008\n").await?;
    let mut banner = [0u8; 12];
    stream.read_exact(&mut banner).await?;
    assert_eq!(&banner, b"RFB 003.008\n", "client must answer with 3.8");

    // Security.
    match script.auth {
        PanelAuth::Open => {
            stream.write_all(&[1, 1]).await?; // one type: None
            let mut choice = [0u8; 1];
            stream.read_exact(&mut choice).await?;
            assert_eq!(choice[0], 1);
            stream.write_all(&0u32.to_be_bytes()).await?;
        }
        PanelAuth::Password(expected) => {
            stream.write_all(&[1, 2]).await?; // one type: VncAuthentication
            let mut choice = [0u8; 1];
            stream.read_exact(&mut choice).await?;
            assert_eq!(choice[0], 2);
            let challenge = [7u8; 16];
            stream.write_all(&challenge).await?;
            let mut response = [0u8; 16];
            stream.read_exact(&mut response).await?;
            if response == auth::challenge_response(&challenge, expected) {
                stream.write_all(&0u32.to_be_bytes()).await?;
            } else {
                stream.write_all(&1u32.to_be_bytes()).await?;
                let reason = b"bad password";
                stream.write_all(&(reason.len() as u32).to_be_bytes()).await?;
                stream.write_all(reason).await?;
                return Ok(());
            }
        }
    }

    // ClientInit / ServerInit.
    let mut shared = [0u8; 1];
    stream.read_exact(&mut shared).await?;
    let name = b"mock-panel";
    stream.write_all(&script.width.to_be_bytes()).await?;
    stream.write_all(&script.height.to_be_bytes()).await?;
    stream.write_all(&PixelFormat::rgba32().to_bytes()).await?;
    stream.write_all(&(name.len() as u32).to_be_bytes()).await?;
    stream.write_all(name).await?;

    // Message loop.
    let mut next_update = 0usize;
    loop {
        let mut msg_type = [0u8; 1];
        if stream.read_exact(&mut msg_type).await.is_err() {
            return Ok(()); // client went away
        }
        match msg_type[0] {
            0 => {
                let mut rest = [0u8; 19];
                stream.read_exact(&mut rest).await?;
            }
            2 => {
                let mut head = [0u8; 3];
                stream.read_exact(&mut head).await?;
                let count = u16::from_be_bytes([head[1], head[2]]) as usize;
                let mut encodings = vec![0u8; count * 4];
                stream.read_exact(&mut encodings).await?;
            }
            3 => {
                let mut rest = [0u8; 9];
                stream.read_exact(&mut rest).await?;
                let _ = events
                    .send(ObservedClientEvent::UpdateRequest { incremental: rest[0] == 1 });
                if next_update < script.updates.len() {
                    send_update(&mut stream, &script.updates[next_update]).await?;
                    next_update += 1;
                } else if script.close_when_exhausted {
                    debug!("script exhausted, closing connection");
                    return Ok(());
                }
            }
            4 => {
                let mut rest = [0u8; 7];
                stream.read_exact(&mut rest).await?;
                let keysym = u32::from_be_bytes([rest[3], rest[4], rest[5], rest[6]]);
                let _ = events.send(ObservedClientEvent::Key { keysym, pressed: rest[0] == 1 });
            }
            5 => {
                let mut rest = [0u8; 5];
                stream.read_exact(&mut rest).await?;
                let _ = events.send(ObservedClientEvent::Pointer {
                    mask: rest[0],
                    x: u16::from_be_bytes([rest[1], rest[2]]),
                    y: u16::from_be_bytes([rest[3], rest[4]]),
                });
            }
            other => panic!("unexpected client message type {other}"),
        }
    }
}

async fn send_update(stream: &mut TcpStream, rects: &[ScriptRect]) -> std::io::Result<()> {
    let mut buf = vec![0u8, 0];
    buf.extend_from_slice(&(rects.len() as u16).to_be_bytes());
    for rect in rects {
        match *rect {
            ScriptRect::Fill { x, y, w, h, value } => {
                for v in [x, y, w, h] {
                    buf.extend_from_slice(&v.to_be_bytes());
                }
                buf.extend_from_slice(&0i32.to_be_bytes());
                buf.extend(std::iter::repeat(value).take(w as usize * h as usize * 4));
            }
            ScriptRect::CopyRect { x, y, w, h, src_x, src_y } => {
                for v in [x, y, w, h] {
                    buf.extend_from_slice(&v.to_be_bytes());
                }
                buf.extend_from_slice(&1i32.to_be_bytes());
                buf.extend_from_slice(&src_x.to_be_bytes());
                buf.extend_from_slice(&src_y.to_be_bytes());
            }
            ScriptRect::DesktopSize { w, h } => {
                for v in [0u16, 0, w, h] {
                    buf.extend_from_slice(&v.to_be_bytes());
                }
                buf.extend_from_slice(&(-223i32).to_be_bytes());
            }
        }
    }
    stream.write_all(&buf).await
}
