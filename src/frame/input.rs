//! Incremental, byte-driven frame parser. Bytes are appended to an internal
//! buffer and a frame is parsed off the front whenever enough of it has
//! arrived; this is the append-and-retry idiom `tungstenite-rs` uses for its
//! `FrameHeader::parse`, which keeps the framer transport-agnostic instead of
//! the teacher's blocking `read_exact`-per-field approach in `read.rs`.

use super::{apply_mask, Message, OpCode, Role};
use crate::compression::Inflater;
use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// A completed message, and — for a text/binary message decoded from a
    /// compressed frame — the on-wire (pre-inflate) byte length, so the
    /// caller can record incoming compression statistics alongside the
    /// decompressed payload. Control messages are never compressed and
    /// always carry `None`.
    Message(Message, Option<usize>),
    ProtocolError(ProtocolError),
    MessageTooBig,
}

struct RawFrame {
    fin: bool,
    rsv1: bool,
    opcode: OpCode,
    payload: Vec<u8>,
}

enum ParsedFrame {
    Frame(RawFrame),
    Error(ProtocolError),
    TooBig,
}

struct InProgress {
    opcode: OpCode,
    compressed: bool,
    payload: Vec<u8>,
}

enum HandleOutcome {
    Event(FrameEvent),
    None,
    Fatal(FrameEvent),
}

pub struct InputFramer {
    role: Role,
    inflater: Option<Inflater>,
    max_message_size: Option<usize>,
    buffer: Vec<u8>,
    in_progress: Option<InProgress>,
    latched: bool,
}

impl InputFramer {
    pub fn new(role: Role, inflater: Option<Inflater>, max_message_size: Option<usize>) -> InputFramer {
        InputFramer {
            role,
            inflater,
            max_message_size,
            buffer: Vec::new(),
            in_progress: None,
            latched: false,
        }
    }

    /// Appends `bytes` to the internal buffer and returns every frame event
    /// that can now be produced. Once a fatal event (protocol error or
    /// message-too-big) is returned, the framer is latched and further
    /// calls return nothing.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<FrameEvent> {
        if self.latched {
            return Vec::new();
        }
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        loop {
            let frame = match self.try_parse_frame() {
                Some(ParsedFrame::Frame(frame)) => frame,
                Some(ParsedFrame::Error(err)) => {
                    events.push(FrameEvent::ProtocolError(err));
                    self.latched = true;
                    break;
                }
                Some(ParsedFrame::TooBig) => {
                    self.in_progress = None;
                    events.push(FrameEvent::MessageTooBig);
                    self.latched = true;
                    break;
                }
                None => break,
            };
            match self.handle_frame(frame) {
                HandleOutcome::Event(event) => events.push(event),
                HandleOutcome::None => {}
                HandleOutcome::Fatal(event) => {
                    events.push(event);
                    self.latched = true;
                    break;
                }
            }
        }
        events
    }

    fn try_parse_frame(&mut self) -> Option<ParsedFrame> {
        let buf = &self.buffer;
        if buf.len() < 2 {
            return None;
        }
        let b0 = buf[0];
        let b1 = buf[1];
        let fin = b0 & 0x80 != 0;
        let rsv1 = b0 & 0x40 != 0;
        let rsv2 = b0 & 0x20 != 0;
        let rsv3 = b0 & 0x10 != 0;
        let opcode_raw = b0 & 0x0F;
        let masked = b1 & 0x80 != 0;
        let len7 = b1 & 0x7F;

        let mut offset = 2usize;
        let payload_len: u64 = if len7 == 126 {
            if buf.len() < offset + 2 {
                return None;
            }
            let v = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as u64;
            offset += 2;
            v
        } else if len7 == 127 {
            if buf.len() < offset + 8 {
                return None;
            }
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&buf[offset..offset + 8]);
            offset += 8;
            u64::from_be_bytes(arr)
        } else {
            len7 as u64
        };

        if payload_len > isize::MAX as u64 {
            self.buffer.clear();
            return Some(ParsedFrame::Error(ProtocolError::InvalidLength));
        }
        let payload_len = payload_len as usize;

        // Check the declared length against the budget before requiring the
        // payload bytes themselves to have arrived, so an oversize length
        // can't be used to force buffering the whole message first.
        if let Some(opcode) = OpCode::from_u8(opcode_raw) {
            if !opcode.is_control() && !self.within_budget(payload_len) {
                self.buffer.clear();
                return Some(ParsedFrame::TooBig);
            }
        }

        let mask_key = if masked {
            if buf.len() < offset + 4 {
                return None;
            }
            let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        if buf.len() < offset + payload_len {
            return None;
        }

        let mut payload = self.buffer[offset..offset + payload_len].to_vec();
        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }
        self.buffer.drain(..offset + payload_len);

        if rsv2 || rsv3 {
            return Some(ParsedFrame::Error(ProtocolError::ReservedBitsNotZero));
        }

        let peer_must_mask = self.role == Role::Server;
        if peer_must_mask && !masked {
            return Some(ParsedFrame::Error(ProtocolError::MissingMask));
        }
        if !peer_must_mask && masked {
            return Some(ParsedFrame::Error(ProtocolError::UnexpectedMask));
        }

        let opcode = match OpCode::from_u8(opcode_raw) {
            Some(op) => op,
            None => return Some(ParsedFrame::Error(ProtocolError::InvalidOpcode(opcode_raw))),
        };

        if opcode.is_control() {
            if !fin {
                return Some(ParsedFrame::Error(ProtocolError::FragmentedControlFrame));
            }
            if payload.len() > 125 {
                return Some(ParsedFrame::Error(ProtocolError::ControlFramePayloadTooLarge));
            }
            if rsv1 {
                return Some(ParsedFrame::Error(ProtocolError::UnexpectedCompressionBit));
            }
        }

        Some(ParsedFrame::Frame(RawFrame {
            fin,
            rsv1,
            opcode,
            payload,
        }))
    }

    fn current_message_len(&self) -> usize {
        self.in_progress.as_ref().map_or(0, |p| p.payload.len())
    }

    fn within_budget(&self, additional: usize) -> bool {
        match self.max_message_size {
            None => true,
            Some(limit) => self.current_message_len() + additional <= limit,
        }
    }

    fn handle_frame(&mut self, frame: RawFrame) -> HandleOutcome {
        if frame.opcode.is_control() {
            return match self.decode_control(frame) {
                Ok(event) => HandleOutcome::Event(event),
                Err(err) => HandleOutcome::Fatal(FrameEvent::ProtocolError(err)),
            };
        }

        match frame.opcode {
            OpCode::Continuation => {
                if frame.rsv1 {
                    return HandleOutcome::Fatal(FrameEvent::ProtocolError(
                        ProtocolError::UnexpectedCompressionBit,
                    ));
                }
                let in_progress = match self.in_progress.as_mut() {
                    Some(p) => p,
                    None => {
                        return HandleOutcome::Fatal(FrameEvent::ProtocolError(
                            ProtocolError::UnexpectedContinuation,
                        ))
                    }
                };
                in_progress.payload.extend_from_slice(&frame.payload);
                if frame.fin {
                    let in_progress = self.in_progress.take().unwrap();
                    self.finish(in_progress)
                } else {
                    HandleOutcome::None
                }
            }
            OpCode::Text | OpCode::Binary => {
                if self.in_progress.is_some() {
                    return HandleOutcome::Fatal(FrameEvent::ProtocolError(
                        ProtocolError::FragmentedInProgress,
                    ));
                }
                if frame.rsv1 && self.inflater.is_none() {
                    return HandleOutcome::Fatal(FrameEvent::ProtocolError(
                        ProtocolError::UnexpectedCompressionBit,
                    ));
                }
                let in_progress = InProgress {
                    opcode: frame.opcode,
                    compressed: frame.rsv1,
                    payload: frame.payload,
                };
                if frame.fin {
                    self.finish(in_progress)
                } else {
                    self.in_progress = Some(in_progress);
                    HandleOutcome::None
                }
            }
            _ => unreachable!("control frames handled above"),
        }
    }

    fn finish(&mut self, in_progress: InProgress) -> HandleOutcome {
        let mut payload = in_progress.payload;
        let mut compressed_wire_len = None;
        if in_progress.compressed {
            compressed_wire_len = Some(payload.len());
            let inflater = self.inflater.as_mut().expect("rsv1 only set when negotiated");
            match inflater.decompress(&payload) {
                Ok(decompressed) => payload = decompressed,
                Err(e) => {
                    return HandleOutcome::Fatal(FrameEvent::ProtocolError(
                        ProtocolError::DecompressionFailed(e.to_string()),
                    ))
                }
            }
        }
        match in_progress.opcode {
            OpCode::Text => match String::from_utf8(payload) {
                Ok(text) => {
                    HandleOutcome::Event(FrameEvent::Message(Message::Text(text), compressed_wire_len))
                }
                Err(_) => {
                    HandleOutcome::Fatal(FrameEvent::ProtocolError(ProtocolError::InvalidUtf8))
                }
            },
            OpCode::Binary => {
                HandleOutcome::Event(FrameEvent::Message(Message::Binary(payload), compressed_wire_len))
            }
            _ => unreachable!("only text/binary reach finish()"),
        }
    }

    fn decode_control(&self, frame: RawFrame) -> Result<FrameEvent, ProtocolError> {
        match frame.opcode {
            OpCode::Ping => Ok(FrameEvent::Message(Message::Ping(frame.payload), None)),
            OpCode::Pong => Ok(FrameEvent::Message(Message::Pong(frame.payload), None)),
            OpCode::Close => {
                let payload = frame.payload;
                if payload.is_empty() {
                    return Ok(FrameEvent::Message(Message::Close(None, String::new()), None));
                }
                if payload.len() == 1 {
                    return Err(ProtocolError::InvalidCloseFrame);
                }
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                let reason = String::from_utf8(payload[2..].to_vec())
                    .map_err(|_| ProtocolError::InvalidUtf8)?;
                Ok(FrameEvent::Message(Message::Close(Some(code), reason), None))
            }
            _ => unreachable!("only control opcodes reach decode_control"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::output::OutputFramer;

    fn server_frame(opcode: u8, fin: bool, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![(if fin { 0x80 } else { 0 }) | opcode];
        assert!(payload.len() <= 125);
        out.push(payload.len() as u8);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn rejects_masked_frame_from_server() {
        let mut input = InputFramer::new(Role::Client, None, None);
        let mut frame = server_frame(0x1, true, b"hi");
        frame[1] |= 0x80;
        frame.splice(2..2, [0u8, 0, 0, 0]);
        let events = input.feed(&frame);
        assert!(matches!(
            events[0],
            FrameEvent::ProtocolError(ProtocolError::UnexpectedMask)
        ));
    }

    #[test]
    fn reassembles_fragmented_text_message() {
        let mut input = InputFramer::new(Role::Client, None, None);
        let mut bytes = Vec::new();
        bytes.extend(vec![0x01, 5]);
        bytes.extend_from_slice(b"Hello");
        bytes.extend(vec![0x00, 2]);
        bytes.extend_from_slice(b", ");
        bytes.extend(vec![0x80, 6]);
        bytes.extend_from_slice(b"world.");
        let events = input.feed(&bytes);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            FrameEvent::Message(Message::Text("Hello, world.".to_string()), None)
        );
    }

    #[test]
    fn continuation_without_start_is_protocol_error() {
        let mut input = InputFramer::new(Role::Client, None, None);
        let bytes = server_frame(0x0, true, b"oops");
        let events = input.feed(&bytes);
        assert!(matches!(
            events[0],
            FrameEvent::ProtocolError(ProtocolError::UnexpectedContinuation)
        ));
    }

    #[test]
    fn oversize_message_is_flagged_before_full_payload_buffered() {
        let mut input = InputFramer::new(Role::Server, None, Some(4));
        let mut out = OutputFramer::new(Role::Client, None);
        let bytes = out.encode(&Message::Binary(vec![0; 10]), false).unwrap();
        let events = input.feed(&bytes);
        assert_eq!(events[0], FrameEvent::MessageTooBig);
    }

    #[test]
    fn latches_after_fatal_event() {
        let mut input = InputFramer::new(Role::Client, None, None);
        let bytes = server_frame(0x0, true, b"oops");
        let _ = input.feed(&bytes);
        let more = input.feed(&server_frame(0x1, true, b"hi"));
        assert!(more.is_empty());
    }
}
