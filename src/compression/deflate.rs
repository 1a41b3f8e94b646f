//! Streaming raw-DEFLATE wrapper around `flate2`, generalizing the teacher's
//! `decoder.rs` (`Decompress` in raw mode, trailing `00 00 ff ff` handling)
//! with a symmetric encoder the teacher had only sketched, commented out,
//! in `encoder.rs`.

use crate::error::Error;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// Trailing bytes RFC 7692 §7.2.1 says a DEFLATE block ending in sync-flush
/// always has, and that senders must strip before putting it on the wire.
const DEFLATE_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

pub struct Deflater {
    compressor: Compress,
    no_context_takeover: bool,
    window_bits: u8,
}

impl Deflater {
    pub fn new(window_bits: u8, no_context_takeover: bool) -> Deflater {
        Deflater {
            compressor: Compress::new_with_window_bits(Compression::default(), false, window_bits),
            no_context_takeover,
            window_bits,
        }
    }

    /// Compresses one full message payload, flushing so the output ends on
    /// a byte boundary, then strips the trailing empty-block bytes.
    pub fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(payload.len());
        self.compressor
            .compress_vec(payload, &mut out, FlushCompress::Sync)
            .map_err(|e| Error::CompressionFailed(e.to_string()))?;
        if out.ends_with(&DEFLATE_TAIL) {
            out.truncate(out.len() - DEFLATE_TAIL.len());
        }
        if self.no_context_takeover {
            self.compressor = Compress::new_with_window_bits(
                Compression::default(),
                false,
                self.window_bits,
            );
        }
        Ok(out)
    }
}

pub struct Inflater {
    decompressor: Decompress,
    no_context_takeover: bool,
    window_bits: u8,
}

impl Inflater {
    pub fn new(window_bits: u8, no_context_takeover: bool) -> Inflater {
        Inflater {
            decompressor: Decompress::new_with_window_bits(false, window_bits),
            no_context_takeover,
            window_bits,
        }
    }

    /// Re-appends the stripped trailer and inflates a full message payload.
    pub fn decompress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let mut input = Vec::with_capacity(payload.len() + DEFLATE_TAIL.len());
        input.extend_from_slice(payload);
        input.extend_from_slice(&DEFLATE_TAIL);

        let start_in = self.decompressor.total_in();
        let start_out = self.decompressor.total_out();
        let mut out = vec![0u8; (input.len() * 4).max(256)];
        loop {
            let consumed = (self.decompressor.total_in() - start_in) as usize;
            let produced = (self.decompressor.total_out() - start_out) as usize;
            if produced == out.len() {
                out.resize(out.len() * 2, 0);
            }
            let status = self
                .decompressor
                .decompress(&input[consumed..], &mut out[produced..], FlushDecompress::Sync)
                .map_err(|e| Error::DecompressionFailed(e.to_string()))?;
            let made_progress = (self.decompressor.total_in() - start_in) as usize != consumed
                || (self.decompressor.total_out() - start_out) as usize != produced;
            match status {
                Status::StreamEnd => break,
                Status::BufError => break,
                Status::Ok => {
                    if !made_progress {
                        break;
                    }
                }
            }
        }

        let produced = (self.decompressor.total_out() - start_out) as usize;
        out.truncate(produced);
        if self.no_context_takeover {
            self.decompressor = Decompress::new_with_window_bits(false, self.window_bits);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_then_decompress_round_trips() {
        let mut deflater = Deflater::new(15, false);
        let mut inflater = Inflater::new(15, false);
        let message = b"the quick brown fox jumps over the lazy dog, repeatedly, repeatedly";
        let compressed = deflater.compress(message).unwrap();
        let decompressed = inflater.decompress(&compressed).unwrap();
        assert_eq!(decompressed, message);
    }

    #[test]
    fn no_context_takeover_resets_between_messages() {
        let mut deflater = Deflater::new(15, true);
        let mut inflater = Inflater::new(15, true);
        for _ in 0..3 {
            let compressed = deflater.compress(b"repeat me").unwrap();
            let decompressed = inflater.decompress(&compressed).unwrap();
            assert_eq!(decompressed, b"repeat me");
        }
    }

    #[test]
    fn context_takeover_preserved_shrinks_later_messages() {
        let mut deflater = Deflater::new(15, false);
        let body = b"abcdefghijklmnopqrstuvwxyz".repeat(4);
        let first = deflater.compress(&body).unwrap();
        let second = deflater.compress(&body).unwrap();
        assert!(second.len() <= first.len());
    }
}
