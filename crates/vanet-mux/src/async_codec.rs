//! tokio codec over the 27.010 parser and encoder.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use vanet_tkvs::Clock;

use crate::codec::{encode_frame, Frame};
use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::parser::Parser;

/// Frame codec for `tokio_util::codec::Framed`.
///
/// Decoding yields every complete frame, valid or not; check
/// [`Frame::status`] before acting on one. Encoding takes
/// `(dlci, control, payload)`.
pub struct MuxCodec {
    parser: Parser,
    clock: Arc<dyn Clock>,
}

impl MuxCodec {
    pub fn new(clock: Arc<dyn Clock>, config: &MuxConfig) -> Self {
        let timeout = clock.ms_to_ticks(config.frame_timeout_ms);
        Self {
            parser: Parser::new(config.length_mode, timeout),
            clock,
        }
    }
}

impl Decoder for MuxCodec {
    type Item = Frame;
    type Error = MuxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let now = self.clock.ticks();
        let mut consumed = 0;
        let mut frame = None;
        for &byte in src.iter() {
            consumed += 1;
            if let Some(found) = self.parser.push(byte, now) {
                frame = Some(found);
                break;
            }
        }
        src.advance(consumed);
        Ok(frame)
    }
}

impl Encoder<(u8, u8, Bytes)> for MuxCodec {
    type Error = MuxError;

    fn encode(&mut self, (dlci, control, payload): (u8, u8, Bytes), dst: &mut BytesMut) -> Result<()> {
        encode_frame(dlci, control, &payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;
    use vanet_tkvs::ManualClock;

    use super::*;
    use crate::codec::{FrameStatus, FrameType};

    fn codec() -> MuxCodec {
        MuxCodec::new(Arc::new(ManualClock::new(32)), &MuxConfig::default())
    }

    #[test]
    fn decode_waits_for_close_flag() {
        let mut codec = codec();
        let mut wire = BytesMut::new();
        codec
            .encode((1, FrameType::Uih.control(), Bytes::from_static(b"sync")), &mut wire)
            .unwrap();
        let tail = wire.split_off(5);

        assert!(codec.decode(&mut wire).unwrap().is_none());
        assert!(wire.is_empty());
        wire.extend_from_slice(&tail);
        let frame = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.dlci(), 1);
        assert_eq!(&frame.info[..], b"sync");
    }

    #[test]
    fn oversize_payload_is_an_encode_error() {
        let mut codec = codec();
        let mut wire = BytesMut::new();
        let err = codec
            .encode((1, FrameType::Uih.control(), Bytes::from(vec![0u8; 200])), &mut wire)
            .unwrap_err();
        assert!(matches!(err, MuxError::PayloadTooLarge { size: 200, .. }));
    }

    #[tokio::test]
    async fn framed_round_trip() {
        let (a, b) = tokio::io::duplex(1024);
        let mut tx = Framed::new(a, codec());
        let mut rx = Framed::new(b, codec());

        tx.send((0, FrameType::Sabm.with_pf(), Bytes::new())).await.unwrap();
        tx.send((4, FrameType::Uih.control(), Bytes::from(vec![7u8; 128])))
            .await
            .unwrap();

        let sabm = rx.next().await.unwrap().unwrap();
        assert_eq!(sabm.frame_type(), Some(FrameType::Sabm));
        assert!(sabm.pf());

        let data = rx.next().await.unwrap().unwrap();
        assert_eq!(data.status, FrameStatus::Valid);
        assert_eq!(data.info.len(), 128);
    }
}
