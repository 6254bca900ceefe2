use std::collections::VecDeque;
use std::io::{self, Read};

use crate::VoiceError;

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
/// Page header after the capture pattern, up to and including the segment count.
const HEADER_REST: usize = 23;
const FLAG_CONTINUED: u8 = 0x01;

/// Pulls whole packets out of an Ogg bitstream.
///
/// Packets may span pages: a lacing value of 255 means the packet continues
/// in the next segment, possibly on the next page.
pub struct OggPacketReader<R> {
    reader: R,
    ready: VecDeque<Vec<u8>>,
    partial: Vec<u8>,
    finished: bool,
}

impl<R: Read> OggPacketReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            ready: VecDeque::new(),
            partial: Vec::new(),
            finished: false,
        }
    }

    /// Next complete packet, or `None` at a clean end of stream.
    pub fn next_packet(&mut self) -> Result<Option<Vec<u8>>, VoiceError> {
        while self.ready.is_empty() {
            if self.finished || !self.read_page()? {
                self.finished = true;
                return Ok(None);
            }
        }
        Ok(self.ready.pop_front())
    }

    /// Read one page. Returns `false` at end of stream.
    fn read_page(&mut self) -> Result<bool, VoiceError> {
        let mut pattern = [0u8; 4];
        if !read_exact_or_eof(&mut self.reader, &mut pattern)? {
            return Ok(false);
        }
        if &pattern != CAPTURE_PATTERN {
            return Err(VoiceError::InvalidOgg("missing capture pattern".into()));
        }

        let mut header = [0u8; HEADER_REST];
        self.read_exact(&mut header)?;
        let header_type = header[1];
        let segments = header[HEADER_REST - 1] as usize;

        let mut lacing = vec![0u8; segments];
        self.read_exact(&mut lacing)?;
        let body_len: usize = lacing.iter().map(|v| *v as usize).sum();
        let mut body = vec![0u8; body_len];
        self.read_exact(&mut body)?;

        if header_type & FLAG_CONTINUED == 0 && !self.partial.is_empty() {
            tracing::debug!(bytes = self.partial.len(), "dropping unterminated Ogg packet");
            self.partial.clear();
        }

        let mut offset = 0;
        for value in lacing {
            let len = value as usize;
            self.partial.extend_from_slice(&body[offset..offset + len]);
            offset += len;
            if value < 255 {
                self.ready.push_back(std::mem::take(&mut self.partial));
            }
        }
        Ok(true)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), VoiceError> {
        if read_exact_or_eof(&mut self.reader, buf)? {
            Ok(())
        } else {
            Err(VoiceError::InvalidOgg("stream ended inside a page".into()))
        }
    }
}

/// `read_exact` that reports a clean EOF before the first byte as `false`.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool, VoiceError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(VoiceError::InvalidOgg("stream ended inside a page".into())),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}
