//! TCP transport and RFB handshake.
//!
//! Owns the socket from `connect` until the handshake completes, then splits
//! into read/write halves handed to the run loop and the input bridge.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

use crate::error::ConnectError;
use crate::rfb::wire::{self, ProtocolVersion, SecurityType, ServerInit, VERSION_BANNER_LEN};
use crate::rfb::{PixelFormat, auth};
use crate::types::Endpoint;

/// A connected, handshaken RFB transport.
pub struct Transport {
    stream: TcpStream,
    endpoint: Endpoint,
}

/// Outcome of a completed handshake.
pub struct Negotiated {
    pub read_half: OwnedReadHalf,
    pub write_half: OwnedWriteHalf,
    pub init: ServerInit,
    pub version: ProtocolVersion,
}

impl Transport {
    /// Open a TCP connection to the endpoint, bounded by `timeout`.
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, ConnectError> {
        let address = endpoint.address();
        debug!(%address, "opening transport");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| ConnectError::timeout(&endpoint.host, endpoint.port, timeout))?
            .map_err(|e| ConnectError::refused(&endpoint.host, endpoint.port, e))?;
        // Input events are tiny and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle on transport");
        }
        Ok(Self { stream, endpoint: endpoint.clone() })
    }

    /// Run the full RFB handshake: version exchange, security negotiation,
    /// `ClientInit`/`ServerInit`. Consumes the transport and returns the
    /// split halves plus the server's parameters.
    pub async fn handshake(mut self) -> Result<Negotiated, ConnectError> {
        let version = self.exchange_versions().await?;
        let security = self.negotiate_security(version).await?;
        self.authenticate(version, security).await?;

        // ClientInit: always shared, so a capture session does not kick an
        // operator's interactive viewer off the panel.
        self.write(&wire::client_init(true)).await?;

        let mut header = [0u8; ServerInit::HEADER_LEN];
        self.read(&mut header).await?;
        let name_len = ServerInit::name_len(&header)
            .map_err(|e| ConnectError::protocol_mismatch(e.to_string()))?;
        if name_len > 4096 {
            return Err(ConnectError::protocol_mismatch(format!(
                "ServerInit name length {name_len} exceeds sanity limit"
            )));
        }
        let mut name = vec![0u8; name_len];
        self.read(&mut name).await?;
        let init = ServerInit::parse(&header, &name)
            .map_err(|e| ConnectError::protocol_mismatch(e.to_string()))?;

        info!(
            endpoint = %self.endpoint,
            width = init.width,
            height = init.height,
            name = %init.name,
            "handshake complete"
        );

        let (read_half, write_half) = self.stream.into_split();
        Ok(Negotiated { read_half, write_half, init, version })
    }

    async fn exchange_versions(&mut self) -> Result<ProtocolVersion, ConnectError> {
        let mut banner = [0u8; VERSION_BANNER_LEN];
        self.read(&mut banner).await?;
        let server_version = ProtocolVersion::from_banner(&banner)
            .map_err(|e| ConnectError::protocol_mismatch(e.to_string()))?;
        // Respond with the highest version both sides speak.
        let version = server_version.min(ProtocolVersion::V3_8);
        self.write(version.banner()).await?;
        debug!(?server_version, ?version, "version negotiated");
        Ok(version)
    }

    async fn negotiate_security(
        &mut self,
        version: ProtocolVersion,
    ) -> Result<SecurityType, ConnectError> {
        let offered = match version {
            ProtocolVersion::V3_3 => {
                // The server dictates a single type as a u32.
                let mut raw = [0u8; 4];
                self.read(&mut raw).await?;
                let value = u32::from_be_bytes(raw);
                if value == 0 {
                    let reason = self.read_reason().await?;
                    return Err(ConnectError::protocol_mismatch(reason));
                }
                let Some(security) =
                    u8::try_from(value).ok().and_then(SecurityType::from_wire)
                else {
                    return Err(ConnectError::protocol_mismatch(format!(
                        "server requires unsupported security type {value}"
                    )));
                };
                return self.check_credential(security);
            }
            ProtocolVersion::V3_7 | ProtocolVersion::V3_8 => {
                let mut count = [0u8; 1];
                self.read(&mut count).await?;
                if count[0] == 0 {
                    let reason = self.read_reason().await?;
                    return Err(ConnectError::protocol_mismatch(reason));
                }
                let mut types = vec![0u8; count[0] as usize];
                self.read(&mut types).await?;
                types
            }
        };

        // Prefer the cheapest type the server offers.
        let supports_none = offered.contains(&SecurityType::None.to_wire());
        let supports_vnc = offered.contains(&SecurityType::VncAuthentication.to_wire());
        let security = if supports_none {
            SecurityType::None
        } else if supports_vnc {
            SecurityType::VncAuthentication
        } else {
            return Err(ConnectError::protocol_mismatch(format!(
                "no common security type, server offered {offered:?}"
            )));
        };
        let security = self.check_credential(security)?;
        self.write(&[security.to_wire()]).await?;
        debug!(?security, "security type selected");
        Ok(security)
    }

    fn check_credential(&self, security: SecurityType) -> Result<SecurityType, ConnectError> {
        if security == SecurityType::VncAuthentication && self.endpoint.password.is_none() {
            return Err(ConnectError::auth_rejected(
                "server requires a password and none was configured",
            ));
        }
        Ok(security)
    }

    async fn authenticate(
        &mut self,
        version: ProtocolVersion,
        security: SecurityType,
    ) -> Result<(), ConnectError> {
        match security {
            SecurityType::None => {
                // Only 3.8 sends a SecurityResult for type None.
                if version == ProtocolVersion::V3_8 {
                    self.read_security_result(version).await?;
                }
                Ok(())
            }
            SecurityType::VncAuthentication => {
                let mut challenge = [0u8; 16];
                self.read(&mut challenge).await?;
                // check_credential already ensured a password is present.
                let password = self.endpoint.password.as_deref().unwrap_or_default();
                let response = auth::challenge_response(&challenge, password);
                self.write(&response).await?;
                self.read_security_result(version).await
            }
        }
    }

    async fn read_security_result(
        &mut self,
        version: ProtocolVersion,
    ) -> Result<(), ConnectError> {
        let mut raw = [0u8; 4];
        self.read(&mut raw).await?;
        if u32::from_be_bytes(raw) == 0 {
            return Ok(());
        }
        let reason = if version == ProtocolVersion::V3_8 {
            self.read_reason().await?
        } else {
            "authentication failed".to_string()
        };
        Err(ConnectError::auth_rejected(reason))
    }

    /// Read a u32-length-prefixed reason string (failure paths only).
    async fn read_reason(&mut self) -> Result<String, ConnectError> {
        let mut raw = [0u8; 4];
        self.read(&mut raw).await?;
        let len = u32::from_be_bytes(raw) as usize;
        if len > 4096 {
            return Err(ConnectError::protocol_mismatch(format!(
                "reason string length {len} exceeds sanity limit"
            )));
        }
        let mut reason = vec![0u8; len];
        self.read(&mut reason).await?;
        Ok(String::from_utf8_lossy(&reason).into_owned())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<(), ConnectError> {
        self.stream.read_exact(buf).await.map_err(|e| {
            ConnectError::protocol_mismatch(format!("connection lost during handshake: {e}"))
        })?;
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), ConnectError> {
        self.stream.write_all(buf).await.map_err(|e| {
            ConnectError::protocol_mismatch(format!("connection lost during handshake: {e}"))
        })
    }
}

/// Initial messages sent right after the handshake: pin the pixel format,
/// advertise encodings, request the first full framebuffer.
pub fn post_handshake_messages(format: &PixelFormat, width: u16, height: u16) -> Vec<u8> {
    let mut out = wire::set_pixel_format(format);
    out.extend_from_slice(&wire::set_encodings(&[
        wire::Encoding::Raw,
        wire::Encoding::CopyRect,
        wire::Encoding::DesktopSize,
    ]));
    out.extend_from_slice(&wire::framebuffer_update_request(false, 0, 0, width, height));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_handshake_batch_layout() {
        let batch = post_handshake_messages(&PixelFormat::rgba32(), 800, 480);
        // SetPixelFormat (20) + SetEncodings with 3 encodings (16) + full
        // update request (10).
        assert_eq!(batch.len(), 46);
        assert_eq!(batch[0], 0);
        assert_eq!(batch[20], 2);
        assert_eq!(batch[36], 3);
        assert_eq!(batch[37], 0); // non-incremental
    }
}
