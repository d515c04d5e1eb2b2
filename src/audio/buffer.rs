//! # Audio Buffer Management
//!
//! Implements the append-only byte accumulator behind one question's answer.
//! Frames are concatenated exactly in arrival order and handed over in one
//! piece at the question boundary.
//!
//! ## Key Features:
//! - **Append-only**: No reordering, no coalescing beyond byte concatenation
//! - **One-shot drain**: The finalization pipeline is the single consumer
//! - **Byte cap**: The only sanctioned way a frame is ever dropped (backpressure)
//! - **Opaque content**: Bytes are never inspected or decoded here; compressed
//!   container chunks are not independently decodable

use std::fmt;

/// Errors from buffer append operations.
#[derive(Debug, PartialEq, Eq)]
pub enum BufferError {
    /// The client sent a zero-length binary frame
    EmptyChunk,

    /// Accepting the chunk would exceed the per-question byte cap
    CapExceeded { buffered: usize, max: usize },
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::EmptyChunk => write!(f, "Empty audio chunk"),
            BufferError::CapExceeded { buffered, max } => write!(
                f,
                "Audio buffer cap exceeded ({} of {} bytes buffered)",
                buffered, max
            ),
        }
    }
}

/// Append-only audio accumulator scoped to one question's active lifetime.
///
/// ## Ownership:
/// Exclusively owned by the question segment it belongs to (or by the state
/// machine when acting as the pending buffer). No locking is needed because
/// per-connection message handling is serialized.
#[derive(Debug)]
pub struct AudioBuffer {
    /// Concatenated frame bytes, arrival order
    data: Vec<u8>,

    /// Number of frames accepted (diagnostics and liveness signal)
    chunk_count: u64,

    /// Maximum bytes this buffer will accept
    max_bytes: usize,
}

impl AudioBuffer {
    /// Create an empty buffer with the given byte cap.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            data: Vec::new(),
            chunk_count: 0,
            max_bytes,
        }
    }

    /// Append one binary frame.
    ///
    /// ## Returns:
    /// - **Ok(())**: Frame accepted, counters updated
    /// - **Err(BufferError)**: Frame rejected; the buffer is unchanged
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), BufferError> {
        if chunk.is_empty() {
            return Err(BufferError::EmptyChunk);
        }

        if self.data.len() + chunk.len() > self.max_bytes {
            return Err(BufferError::CapExceeded {
                buffered: self.data.len(),
                max: self.max_bytes,
            });
        }

        self.data.extend_from_slice(chunk);
        self.chunk_count += 1;
        Ok(())
    }

    /// Take all buffered bytes, leaving the buffer empty.
    ///
    /// ## Single consumer:
    /// Called exactly once per question, by the finalization pipeline. The
    /// chunk counter survives the drain - it describes how many frames were
    /// received, not how many bytes remain.
    pub fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of frames accepted since creation.
    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_arrival_order() {
        let mut buffer = AudioBuffer::new(1024);
        buffer.append(&[1, 2, 3]).unwrap();
        buffer.append(&[4, 5]).unwrap();
        buffer.append(&[6]).unwrap();

        assert_eq!(buffer.chunk_count(), 3);
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.drain(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_drain_is_one_shot() {
        let mut buffer = AudioBuffer::new(1024);
        buffer.append(&[9, 9]).unwrap();

        assert_eq!(buffer.drain(), vec![9, 9]);
        // Second drain yields nothing, but the chunk counter survives
        assert!(buffer.drain().is_empty());
        assert_eq!(buffer.chunk_count(), 1);
    }

    #[test]
    fn test_empty_chunk_rejected() {
        let mut buffer = AudioBuffer::new(1024);
        assert_eq!(buffer.append(&[]), Err(BufferError::EmptyChunk));
        assert_eq!(buffer.chunk_count(), 0);
    }

    #[test]
    fn test_cap_enforced_and_buffer_unchanged() {
        let mut buffer = AudioBuffer::new(4);
        buffer.append(&[1, 2, 3]).unwrap();

        // This frame would push us past the cap, so it's rejected whole
        let err = buffer.append(&[4, 5]).unwrap_err();
        assert!(matches!(err, BufferError::CapExceeded { buffered: 3, max: 4 }));

        // The rejected frame left no trace
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.chunk_count(), 1);

        // A frame that fits is still accepted afterwards
        buffer.append(&[4]).unwrap();
        assert_eq!(buffer.drain(), vec![1, 2, 3, 4]);
    }
}
