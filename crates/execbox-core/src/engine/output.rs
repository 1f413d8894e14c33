//! Streaming capture of child output.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::session::{ExecutionSession, OutputStream};

const READ_BUFFER_SIZE: usize = 8192;

/// Incremental UTF-8 decoder.
///
/// Multi-byte sequences split across reads are carried to the next call
/// instead of being replaced. Genuinely invalid bytes decode lossily.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `carry + bytes` as is complete.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.carry.clear();
                    return out;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    // Always valid by construction of valid_up_to
                    out.push_str(&String::from_utf8_lossy(&self.carry[..valid_up_to]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid_up_to + len);
                        }
                        None => {
                            // Incomplete tail; wait for more bytes
                            self.carry.drain(..valid_up_to);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        rest
    }
}

/// Read `reader` to EOF, appending decoded text to the session.
pub async fn pump<R>(mut reader: R, session: Arc<ExecutionSession>, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Utf8Decoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => session.append(stream, &decoder.decode(&buf[..n])),
            Err(e) => {
                tracing::debug!(execution_id = %session.id(), ?stream, "Output read failed: {}", e);
                break;
            }
        }
    }

    session.append(stream, &decoder.finish());
}
