//! Protocol detection on a freshly accepted stream.

use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{Instant, timeout};
use tracing::trace;

use crate::protocol::native::NETWORK_COMPATIBILITY_VERSION;
use crate::server::connection::ConnectionError;
use crate::server::transport::Transport;

/// Top byte of the first word sent by an HTTP client (`'P'` of `POST`/`PUT`).
const HTTP_SIGNATURE: u32 = b'P' as u32;

/// How long to wait for a client to say anything.
#[derive(Debug, Clone, Copy)]
pub struct DetectWindow {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

/// The protocol family chosen from the first word on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detected {
    /// Packed network-compatibility version of a native client.
    Native { version_token: i32 },
    /// Total length of a compatibility startup packet, length word included.
    Compatibility { declared_length: usize },
}

/// Decides the protocol family from the first big-endian word.
pub fn classify(first_word: i32) -> Result<Detected, ConnectionError> {
    match (first_word as u32) >> 24 {
        0 => Ok(Detected::Compatibility {
            declared_length: first_word as usize,
        }),
        HTTP_SIGNATURE => Err(ConnectionError::HttpNotSupported),
        _ => Ok(Detected::Native {
            version_token: first_word,
        }),
    }
}

/// Text written to clients that stay silent, typically a browser pointed at
/// the wrong port.
pub fn banner() -> String {
    format!(
        "This service expects harbor network protocol {NETWORK_COMPATIBILITY_VERSION} \
         or a PostgreSQL compatible client.\n"
    )
}

/// Reads the first word from `io`, leaving any later bytes in `buf`.
pub async fn sniff<T: Transport>(
    io: &mut T,
    buf: &mut BytesMut,
    window: DetectWindow,
) -> Result<Detected, ConnectionError> {
    if !io.is_secure() {
        wait_for_data(io, buf, window).await?;
    }

    while buf.len() < 4 {
        if io.read_buf(buf).await? == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
    }
    classify(buf.get_i32())
}

/// Polls for the first byte until the window closes. A silent client gets
/// the banner and the connection fails.
async fn wait_for_data<T: Transport>(
    io: &mut T,
    buf: &mut BytesMut,
    window: DetectWindow,
) -> Result<(), ConnectionError> {
    let deadline = Instant::now() + window.max_wait;
    while buf.is_empty() {
        let now = Instant::now();
        if now >= deadline {
            io.write_all(banner().as_bytes()).await?;
            io.flush().await?;
            return Err(ConnectionError::UnknownClient(
                window.max_wait.as_millis() as u64,
            ));
        }

        let slice = window.poll_interval.min(deadline - now);
        match timeout(slice, io.read_buf(buf)).await {
            Ok(Ok(0)) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => trace!("No client data yet"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::native::version;
    use tokio::io::duplex;

    fn window(max_wait_ms: u64) -> DetectWindow {
        DetectWindow {
            poll_interval: Duration::from_millis(10),
            max_wait: Duration::from_millis(max_wait_ms),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(84).unwrap(),
            Detected::Compatibility {
                declared_length: 84
            }
        );
        let token = version::to_token("2.0.0.0").unwrap();
        assert_eq!(
            classify(token).unwrap(),
            Detected::Native {
                version_token: token
            }
        );
        // "POST"
        let http = i32::from_be_bytes(*b"POST");
        assert!(matches!(
            classify(http),
            Err(ConnectionError::HttpNotSupported)
        ));
        // Any other non-zero top byte is native.
        for top in [0x01u8, 0x47, 0x51, 0xff] {
            let word = i32::from_be_bytes([top, 0, 0, 0]);
            assert!(matches!(
                classify(word),
                Ok(Detected::Native { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_sniff_keeps_remaining_bytes() {
        let (mut server, mut client) = duplex(64);
        client
            .write_all(&[0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f])
            .await
            .unwrap();

        let mut buf = BytesMut::new();
        let detected = sniff(&mut server, &mut buf, window(1000)).await.unwrap();
        assert_eq!(detected, Detected::Compatibility { declared_length: 8 });
        while buf.len() < 4 {
            server.read_buf(&mut buf).await.unwrap();
        }
        assert_eq!(&buf[..], &[0x04, 0xd2, 0x16, 0x2f]);
    }

    #[tokio::test]
    async fn test_sniff_waits_for_split_word() {
        let (mut server, mut client) = duplex(64);
        let task = tokio::spawn(async move {
            client.write_all(&[0xff]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.write_all(&[0xe1, 0x7b, 0x80]).await.unwrap();
            client
        });

        let mut buf = BytesMut::new();
        let detected = sniff(&mut server, &mut buf, window(1000)).await.unwrap();
        assert_eq!(
            detected,
            Detected::Native {
                version_token: -2_000_000
            }
        );
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_client_gets_banner() {
        let (mut server, mut client) = duplex(1024);
        let mut buf = BytesMut::new();
        let result = sniff(&mut server, &mut buf, window(50)).await;
        assert!(matches!(result, Err(ConnectionError::UnknownClient(50))));

        let mut text = vec![0u8; banner().len()];
        client.read_exact(&mut text).await.unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains(NETWORK_COMPATIBILITY_VERSION));
    }

    #[tokio::test]
    async fn test_eof_before_first_word() {
        let (mut server, mut client) = duplex(64);
        client.write_all(&[0, 0]).await.unwrap();
        drop(client);

        let mut buf = BytesMut::new();
        let err = sniff(&mut server, &mut buf, window(1000)).await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
