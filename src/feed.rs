use log::{debug, info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::Sender;

use crate::telemetry::{decode_envelope, EventKind, TelemetryEvent};

/// Consume newline-delimited telemetry envelopes from the transport
/// collaborator and forward decoded records to the engine loop.
/// Undecodable payloads, invalid UTF-8 included, are dropped silently,
/// never raised; only a real I/O error or end of input ends the feed.
pub async fn feed_loop<R>(mut reader: R, tx: Sender<(EventKind, TelemetryEvent)>)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut decoded = 0u64;
    let mut dropped = 0u64;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // Lossy decode: a line with invalid UTF-8 simply fails
                // envelope parsing below and is counted as dropped.
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match decode_envelope(line) {
                    Some((kind, event)) => {
                        decoded += 1;
                        if tx.send((kind, event)).await.is_err() {
                            // Engine loop is gone, nothing left to feed.
                            break;
                        }
                    }
                    None => {
                        dropped += 1;
                        debug!("dropped undecodable payload ({} so far)", dropped);
                    }
                }
            }
            Err(read_error) => {
                warn!("feed read error: {}", read_error);
                break;
            }
        }
    }

    info!(
        "feed closed: {} records decoded, {} payloads dropped",
        decoded, dropped
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;
    use tokio::sync::mpsc;

    const VALID_VP: &str = concat!(
        r#"{"VP":{"desi":"69","oper":22,"veh":1172,"tsi":100,"spd":5.0,"hdg":90,"#,
        r#""lat":60.2456,"long":24.9927,"acc":0.1,"dl":0,"loc":"GPS","start":"18:06"}}"#,
    );

    #[tokio::test]
    async fn test_feed_decodes_and_drops() {
        let input = format!(
            "{}\nthis is not json\n\n{}\n",
            VALID_VP, r#"{"DOC":{"desi":"69","oper":22,"veh":1172,"tsi":101}}"#
        );
        let (tx, mut rx) = mpsc::channel(16);

        feed_loop(BufReader::new(input.as_bytes()), tx).await;

        let (kind, event) = rx.recv().await.unwrap();
        assert_eq!(kind, EventKind::Position);
        assert_eq!(event.vehicle, 1172);

        let (kind, _) = rx.recv().await.unwrap();
        assert_eq!(kind, EventKind::DoorClose);

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_feed() {
        let mut input: Vec<u8> = vec![0xff, 0xfe, 0xfd, b'\n'];
        input.extend_from_slice(VALID_VP.as_bytes());
        input.push(b'\n');
        let (tx, mut rx) = mpsc::channel(16);

        feed_loop(BufReader::new(input.as_slice()), tx).await;

        // The record after the garbage line still arrives.
        let (kind, event) = rx.recv().await.unwrap();
        assert_eq!(kind, EventKind::Position);
        assert_eq!(event.vehicle, 1172);
        assert!(rx.recv().await.is_none());
    }
}
