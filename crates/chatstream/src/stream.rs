//! Reassembly of network chunks into protocol lines.
//!
//! Chunks arrive split at arbitrary byte offsets, so neither a UTF-8 character
//! nor an SSE line is guaranteed to be whole. Everything incomplete is carried
//! into the next call; nothing is ever emitted twice or emitted half-parsed.
use crate::providers::base::DecodeResult;
use crate::providers::factory::Adapter;

/// Decode `carry + raw_chunk` into protocol events.
///
/// Every newline-terminated line is handed to the adapter. The unterminated
/// trailing segment is decoded only when the adapter recognises it as a whole
/// frame; otherwise it comes back as `remainder`. Lines after the end marker are
/// ignored.
pub fn decode(adapter: &Adapter, raw_chunk: &str, carry: &str) -> DecodeResult {
    let mut buffer = String::with_capacity(carry.len() + raw_chunk.len());
    buffer.push_str(carry);
    buffer.push_str(raw_chunk);

    let mut result = DecodeResult::default();
    let mut rest = buffer.as_str();
    while let Some(pos) = rest.find('\n') {
        decode_into(adapter, &rest[..pos], &mut result);
        if result.is_end {
            return result;
        }
        rest = &rest[pos + 1..];
    }

    if !rest.trim().is_empty() {
        if adapter.is_complete_frame(rest) {
            decode_into(adapter, rest, &mut result);
        } else {
            result.remainder = rest.to_string();
        }
    }
    result
}

/// Decode whatever is left once the transport has closed, complete or not
pub fn flush(adapter: &Adapter, carry: &str) -> DecodeResult {
    let mut result = DecodeResult::default();
    for line in carry.lines() {
        decode_into(adapter, line, &mut result);
        if result.is_end {
            break;
        }
    }
    result
}

fn decode_into(adapter: &Adapter, line: &str, result: &mut DecodeResult) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    result.absorb(adapter.decode_line(line));
}

/// Holds back the bytes of a multi-byte character split across chunks
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // genuinely invalid input: nothing later can repair it
            Err(_) => self.pending.len(),
        };
        let tail = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }

    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Per-stream reassembly state: the UTF-8 tail and the line carry
pub struct ChunkReassembler<'a> {
    adapter: &'a Adapter,
    carry: String,
    utf8: Utf8Carry,
}

impl<'a> ChunkReassembler<'a> {
    pub fn new(adapter: &'a Adapter) -> Self {
        Self {
            adapter,
            carry: String::new(),
            utf8: Utf8Carry::default(),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> DecodeResult {
        let text = self.utf8.push(bytes);
        let result = decode(self.adapter, &text, &self.carry);
        self.carry = result.remainder.clone();
        result
    }

    /// Called once the transport is exhausted
    pub fn finish(&mut self) -> DecodeResult {
        let tail = self.utf8.finish();
        self.carry.push_str(&tail);
        let carry = std::mem::take(&mut self.carry);
        if !carry.trim().is_empty() {
            tracing::debug!(carry = %carry, "flushing unterminated tail at end of stream");
        }
        flush(self.adapter, &carry)
    }
}
