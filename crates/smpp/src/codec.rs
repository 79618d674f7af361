use crate::pdu::{CommandStatus, Frame, Pdu, PduError, HEADER_LEN, MAX_PDU_LEN};
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length-prefixed PDU framing for `tokio_util::codec::Framed`
#[derive(Debug, Default, Clone, Copy)]
pub struct SmppCodec;

impl Decoder for SmppCodec {
    type Item = Frame;
    type Error = PduError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, PduError> {
        if src.len() < 4 {
            return Ok(None);
        }

        let command_length = (&src[..4]).get_u32() as usize;
        if !(HEADER_LEN..=MAX_PDU_LEN).contains(&command_length) {
            return Err(PduError::InvalidLength(command_length));
        }

        if src.len() < command_length {
            src.reserve(command_length - src.len());
            return Ok(None);
        }

        let raw = src.split_to(command_length).freeze();
        let header = &raw[..HEADER_LEN];
        let command_id = (&header[4..8]).get_u32();
        let command_status = CommandStatus((&header[8..12]).get_u32());
        let sequence_number = (&header[12..16]).get_u32();

        // The frame is already consumed, so a bad body must not end the stream
        match Frame::decode(raw) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => Ok(Some(Frame {
                command_status,
                sequence_number,
                pdu: Pdu::Invalid {
                    command_id,
                    reason: e.to_string(),
                },
            })),
        }
    }
}

impl Encoder<Frame> for SmppCodec {
    type Error = PduError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), PduError> {
        frame.encode(dst)
    }
}
