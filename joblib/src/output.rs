use crate::types::OutputBlob;
use bytes::BytesMut;

/// Append-only record of everything a job has written.
///
/// Chunks are kept as the `Bytes` handed to the broadcaster, so appending never
/// copies earlier output. Concatenation happens once per snapshot.
#[derive(Default, Debug)]
pub struct OutputLog {
    chunks: Vec<OutputBlob>,
    len: usize,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: OutputBlob) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push(chunk);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn to_bytes(&self) -> OutputBlob {
        match self.chunks.as_slice() {
            [] => OutputBlob::new(),
            [only] => only.clone(),
            chunks => {
                let mut buf = BytesMut::with_capacity(self.len);
                for chunk in chunks {
                    buf.extend_from_slice(chunk);
                }
                buf.freeze()
            }
        }
    }
}
