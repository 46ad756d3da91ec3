use prost::{bytes::BufMut, Message};

use super::{BusError, BytesBus, MessageBus};
use crate::{
    messages::{ConversionError, ParticipantMessage},
    perunwire::Envelope,
    types::Address,
};

/// Frames [ParticipantMessage]s the way go-perun does: a big-endian u16 length
/// followed by the protobuf [Envelope].
#[derive(Debug)]
pub struct ProtoBufEncodingLayer<B: BytesBus> {
    pub bus: B,
}

impl<B: BytesBus> ProtoBufEncodingLayer<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn encode<T: Message>(msg: T) -> Result<Vec<u8>, BusError> {
        // Go-perun writes a u16 for the length (2 bytes), this means we cannot
        // use `encode_length_delimited`, which would write a variable length
        // integer using LEB128. Go-perun silently truncates longer lengths, we
        // refuse to send them.
        let len = msg.encoded_len();
        if len >= (1 << 16) {
            return Err(BusError::FrameTooLarge(len));
        }

        let mut buf = Vec::with_capacity(2 + len);
        buf.put_slice(&(len as u16).to_be_bytes());
        msg.encode(&mut buf)?;
        Ok(buf)
    }
}

/// Decode one frame into (sender, recipient, message).
pub fn decode_frame(frame: &[u8]) -> Result<(Address, Address, ParticipantMessage), BusError> {
    if frame.len() < 2 {
        return Err(BusError::TruncatedFrame);
    }
    let len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    let body = frame.get(2..2 + len).ok_or(BusError::TruncatedFrame)?;

    let envelope = Envelope::decode(body)?;
    let sender: Address = envelope
        .sender
        .as_slice()
        .try_into()
        .or(Err(ConversionError::ByteLengthMismatch))?;
    let recipient: Address = envelope
        .recipient
        .as_slice()
        .try_into()
        .or(Err(ConversionError::ByteLengthMismatch))?;
    let msg = envelope.msg.ok_or(ConversionError::EmptyEnvelope)?;
    Ok((sender, recipient, msg.try_into()?))
}

impl<B: BytesBus> MessageBus for ProtoBufEncodingLayer<B> {
    fn send_to_participant(
        &self,
        sender: &Address,
        recipient: &Address,
        msg: ParticipantMessage,
    ) -> Result<(), BusError> {
        tracing::debug!(%sender, %recipient, kind = msg.kind(), "send");
        let envelope = Envelope {
            sender: sender.0.to_vec(),
            recipient: recipient.0.to_vec(),
            msg: Some(msg.into()),
        };

        let buf = Self::encode(envelope)?;
        self.bus.send_to_participant(sender, recipient, &buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{perunwire, types::Hash};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<Vec<u8>>>);

    impl BytesBus for Recorder {
        fn send_to_participant(&self, _: &Address, _: &Address, msg: &[u8]) -> Result<(), BusError> {
            self.0.lock().unwrap().push(msg.to_vec());
            Ok(())
        }
    }

    #[test]
    fn frame_has_u16_length_prefix() {
        let layer = ProtoBufEncodingLayer::new(Recorder::default());
        let (a, b) = (Address([1; 20]), Address([2; 20]));
        let msg = ParticipantMessage::ChannelUpdateRejected {
            id: Hash([3; 32]),
            version: 4,
            reason: "no".into(),
        };
        layer.send_to_participant(&a, &b, msg.clone()).unwrap();

        let frames = layer.bus.0.lock().unwrap();
        let frame = &frames[0];
        let len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        assert_eq!(len, frame.len() - 2);

        let (sender, recipient, decoded) =
            decode_frame(frame).unwrap();
        assert_eq!((sender, recipient), (a, b));
        assert_eq!(decoded, msg);
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let huge = perunwire::ChannelProposalRejMsg {
            proposal_id: vec![0; 32],
            reason: "x".repeat(1 << 16),
        };
        assert!(matches!(
            ProtoBufEncodingLayer::<Recorder>::encode(huge),
            Err(BusError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn truncated_and_empty_frames_are_rejected() {
        type Layer = ProtoBufEncodingLayer<Recorder>;
        assert!(matches!(decode_frame(&[0]), Err(BusError::TruncatedFrame)));
        assert!(matches!(
            decode_frame(&[0, 10, 1, 2]),
            Err(BusError::TruncatedFrame)
        ));

        let empty = Layer::encode(Envelope {
            sender: vec![1; 20],
            recipient: vec![2; 20],
            msg: None,
        })
        .unwrap();
        assert!(matches!(
            decode_frame(&empty),
            Err(BusError::Conversion(ConversionError::EmptyEnvelope))
        ));
    }
}
