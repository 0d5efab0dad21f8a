//! Incremental UTF-8 decoding of raw transport chunks.
//!
//! Chunks from the transport are not aligned to character boundaries: a
//! multi-byte character may start at the end of one chunk and finish in the
//! next. The decoder carries the incomplete tail forward so concatenating
//! every emitted fragment reproduces the original text exactly.

use crate::error::DecodeError;

/// Stateful chunk-to-text decoder. One per session.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    /// Proper prefix of an encoded character awaiting its remaining bytes.
    pending: Vec<u8>,
    /// Bytes already emitted as text, for error offsets.
    consumed: u64,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `chunk` together with any bytes left over from the previous call.
    ///
    /// Returns the longest character-aligned prefix; an incomplete trailing
    /// character is held until the next call.
    ///
    /// # Errors
    /// Returns `DecodeError::InvalidSequence` for bytes that are invalid
    /// regardless of what follows.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<String, DecodeError> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        match std::str::from_utf8(&buf) {
            Ok(text) => {
                self.consumed += buf.len() as u64;
                Ok(text.to_string())
            }
            Err(err) => {
                let valid = err.valid_up_to();
                if err.error_len().is_some() {
                    return Err(DecodeError::InvalidSequence {
                        offset: self.consumed + valid as u64,
                    });
                }
                self.pending = buf.split_off(valid);
                self.consumed += valid as u64;
                // `buf` is exactly the validated prefix now.
                Ok(String::from_utf8_lossy(&buf).into_owned())
            }
        }
    }

    /// Signals end of stream.
    ///
    /// # Errors
    /// Returns `DecodeError::Truncated` if a partial character is still pending.
    pub fn finish(&mut self) -> Result<String, DecodeError> {
        if self.pending.is_empty() {
            return Ok(String::new());
        }
        Err(DecodeError::Truncated {
            pending: self.pending.len(),
        })
    }

    /// Number of bytes currently held back.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "héllo wörld — 日本語の文章 🎉 end";

    fn decode_all(chunks: &[&[u8]]) -> Result<String, DecodeError> {
        let mut decoder = ChunkDecoder::new();
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&decoder.decode(chunk)?);
        }
        out.push_str(&decoder.finish()?);
        Ok(out)
    }

    #[test]
    fn test_every_two_way_split_roundtrips() {
        let bytes = SAMPLE.as_bytes();
        for i in 0..=bytes.len() {
            let (a, b) = bytes.split_at(i);
            assert_eq!(decode_all(&[a, b]).unwrap(), SAMPLE, "split at {i}");
        }
    }

    #[test]
    fn test_every_three_way_split_roundtrips() {
        let bytes = SAMPLE.as_bytes();
        for i in 0..=bytes.len() {
            for j in i..=bytes.len() {
                let chunks = [&bytes[..i], &bytes[i..j], &bytes[j..]];
                assert_eq!(decode_all(&chunks).unwrap(), SAMPLE, "split at {i},{j}");
            }
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let chunks: Vec<&[u8]> = SAMPLE.as_bytes().chunks(1).collect();
        assert_eq!(decode_all(&chunks).unwrap(), SAMPLE);
    }

    #[test]
    fn test_pending_holds_partial_character() {
        let mut decoder = ChunkDecoder::new();
        let emoji = "🎉".as_bytes();
        assert_eq!(decoder.decode(&emoji[..3]).unwrap(), "");
        assert_eq!(decoder.pending_len(), 3);
        assert_eq!(decoder.decode(&emoji[3..]).unwrap(), "🎉");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_truncated_at_end_of_stream() {
        let bytes = "日".as_bytes();
        let err = decode_all(&[&bytes[..2]]).unwrap_err();
        assert_eq!(err, DecodeError::Truncated { pending: 2 });
    }

    #[test]
    fn test_invalid_byte_mid_stream() {
        let err = decode_all(&[b"ok ", &[0xFF], b"more"]).unwrap_err();
        assert_eq!(err, DecodeError::InvalidSequence { offset: 3 });
    }

    #[test]
    fn test_invalid_continuation_across_chunks() {
        // 0xE6 starts a 3-byte sequence; 'A' cannot continue it.
        let err = decode_all(&[b"ab", &[0xE6], b"A"]).unwrap_err();
        assert_eq!(err, DecodeError::InvalidSequence { offset: 2 });
    }

    #[test]
    fn test_empty_chunks_are_harmless() {
        assert_eq!(decode_all(&[b"", b"abc", b"", b""]).unwrap(), "abc");
    }
}
