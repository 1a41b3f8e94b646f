//! Encodes logical messages into wire frames. Grounded on the teacher's
//! `write.rs` (`write_frame_client`/`write_frame_server` bit-packing),
//! generalized to also drive the deflate encoder.

use super::{apply_mask, Message, OpCode, Role};
use crate::compression::Deflater;
use crate::error::Error;
use rand::random;

const MAX_CONTROL_PAYLOAD: usize = 125;

pub struct OutputFramer {
    role: Role,
    deflater: Option<Deflater>,
}

impl OutputFramer {
    pub fn new(role: Role, deflater: Option<Deflater>) -> OutputFramer {
        OutputFramer { role, deflater }
    }

    /// Encodes `message` as a single FIN frame. `compress` requests RSV1 be
    /// set and the payload deflated; it is ignored for control frames and
    /// silently downgraded to `false` if no compressor was negotiated.
    pub fn encode(&mut self, message: &Message, compress: bool) -> Result<Vec<u8>, Error> {
        let opcode = message.opcode();
        let is_control = opcode.is_control();
        let mut payload = self.payload_bytes(message);
        if is_control && payload.len() > MAX_CONTROL_PAYLOAD {
            payload.truncate(MAX_CONTROL_PAYLOAD);
        }

        let set_rsv1 = compress && !is_control && self.deflater.is_some();
        if set_rsv1 {
            if let Some(deflater) = self.deflater.as_mut() {
                payload = deflater.compress(&payload)?;
            }
        }

        Ok(self.frame_bytes(opcode, &payload, set_rsv1))
    }

    fn payload_bytes(&self, message: &Message) -> Vec<u8> {
        match message {
            Message::Text(s) => s.clone().into_bytes(),
            Message::Binary(b) => b.clone(),
            Message::Ping(b) => b.clone(),
            Message::Pong(b) => b.clone(),
            Message::Close(code, reason) => {
                let mut out = Vec::new();
                if let Some(code) = code {
                    out.extend_from_slice(&code.to_be_bytes());
                    let mut reason_bytes = reason.clone().into_bytes();
                    truncate_utf8(&mut reason_bytes, MAX_CONTROL_PAYLOAD - 2);
                    out.extend_from_slice(&reason_bytes);
                }
                out
            }
        }
    }

    fn frame_bytes(&self, opcode: OpCode, payload: &[u8], set_rsv1: bool) -> Vec<u8> {
        let mut header = Vec::with_capacity(14);
        let first_byte = 0x80 | (if set_rsv1 { 0x40 } else { 0x00 }) | opcode.as_u8();
        header.push(first_byte);

        let masked = self.role == Role::Client;
        let mask_bit = if masked { 0x80 } else { 0x00 };
        let len = payload.len();
        if len <= 125 {
            header.push(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            header.push(mask_bit | 126);
            header.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            header.push(mask_bit | 127);
            header.extend_from_slice(&(len as u64).to_be_bytes());
        }

        let mut out = header;
        if masked {
            let key = random_nonzero_mask_key();
            out.extend_from_slice(&key);
            let mut masked_payload = payload.to_vec();
            apply_mask(&mut masked_payload, key);
            out.extend_from_slice(&masked_payload);
        } else {
            out.extend_from_slice(payload);
        }
        out
    }
}

/// A fresh non-zero 32-bit mask key per RFC 6455 §5.3; an all-zero key would
/// mask the payload with itself, a degenerate case the RFC tells clients to
/// avoid by drawing from a source of randomness.
fn random_nonzero_mask_key() -> [u8; 4] {
    loop {
        let key: [u8; 4] = random();
        if key != [0, 0, 0, 0] {
            return key;
        }
    }
}

fn truncate_utf8(bytes: &mut Vec<u8>, max_len: usize) {
    if bytes.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while cut > 0 && (bytes[cut] & 0xC0) == 0x80 {
        cut -= 1;
    }
    bytes.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::input::InputFramer;
    use crate::frame::FrameEvent;

    #[test]
    fn client_frames_are_masked_server_frames_are_not() {
        let mut client_out = OutputFramer::new(Role::Client, None);
        let bytes = client_out.encode(&Message::Text("hi".into()), false).unwrap();
        assert_eq!(bytes[1] & 0x80, 0x80);

        let mut server_out = OutputFramer::new(Role::Server, None);
        let bytes = server_out.encode(&Message::Text("hi".into()), false).unwrap();
        assert_eq!(bytes[1] & 0x80, 0x00);
    }

    #[test]
    fn control_frame_payload_is_truncated_to_125() {
        let mut out = OutputFramer::new(Role::Server, None);
        let big_reason = "x".repeat(200);
        let bytes = out
            .encode(&Message::Close(Some(1000), big_reason), false)
            .unwrap();
        let len_byte = bytes[1] & 0x7F;
        assert!(len_byte as usize <= 125);
    }

    #[test]
    fn round_trips_through_input_framer() {
        let mut out = OutputFramer::new(Role::Client, None);
        let bytes = out.encode(&Message::Binary(vec![1, 2, 3, 4]), false).unwrap();
        let mut input = InputFramer::new(Role::Server, None, None);
        let events = input.feed(&bytes);
        assert_eq!(events.len(), 1);
        match &events[0] {
            FrameEvent::Message(Message::Binary(b), _) => assert_eq!(b, &vec![1, 2, 3, 4]),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
