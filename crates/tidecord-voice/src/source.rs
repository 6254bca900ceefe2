use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::ogg::OggPacketReader;
use crate::VoiceError;

/// A stream of 20 ms Opus frames.
///
/// `prepare` runs once before the first `read`, `cleanup` once after the last
/// (also when playback is cut short). Sources are driven from the player's
/// own thread, so blocking reads are fine.
pub trait AudioSource: Send {
    fn prepare(&mut self) -> Result<(), VoiceError> {
        Ok(())
    }

    /// Next frame, or `None` when the source is exhausted.
    fn read(&mut self) -> Result<Option<Vec<u8>>, VoiceError>;

    fn cleanup(&mut self) {}
}

/// Pre-framed packets held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    frames: VecDeque<Vec<u8>>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl AudioSource for MemorySource {
    fn read(&mut self) -> Result<Option<Vec<u8>>, VoiceError> {
        Ok(self.frames.pop_front())
    }
}

/// Opus packets read from an Ogg stream. The `OpusHead` and `OpusTags`
/// header packets are skipped.
pub struct OggOpusSource<R> {
    packets: OggPacketReader<R>,
}

impl<R: Read + Send> OggOpusSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            packets: OggPacketReader::new(reader),
        }
    }
}

fn is_opus_header(packet: &[u8]) -> bool {
    packet.starts_with(b"OpusHead") || packet.starts_with(b"OpusTags")
}

impl<R: Read + Send> AudioSource for OggOpusSource<R> {
    fn read(&mut self) -> Result<Option<Vec<u8>>, VoiceError> {
        loop {
            match self.packets.next_packet()? {
                Some(packet) if is_opus_header(&packet) || packet.is_empty() => continue,
                other => return Ok(other),
            }
        }
    }
}

/// Transcodes any input ffmpeg understands into Ogg/Opus at 48 kHz stereo.
pub struct FfmpegSource {
    program: OsString,
    input: OsString,
    before_input: Vec<OsString>,
    output_args: Vec<OsString>,
    child: Option<Child>,
    stream: Option<OggOpusSource<ChildStdout>>,
}

impl FfmpegSource {
    pub fn new(input: impl Into<OsString>) -> Self {
        Self {
            program: "ffmpeg".into(),
            input: input.into(),
            before_input: vec!["-vn".into()],
            output_args: [
                "-f", "opus", "-ar", "48000", "-ac", "2", "-b:a", "96K", "-filter:a", "volume=0.5",
            ]
            .into_iter()
            .map(OsString::from)
            .collect(),
            child: None,
            stream: None,
        }
    }

    /// Use a specific ffmpeg binary.
    pub fn program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    /// Extra options placed before `-i`.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.before_input.extend(args.into_iter().map(Into::into));
        self
    }

    /// Extra output options, appended after the defaults.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.before_input)
            .arg("-i")
            .arg(&self.input)
            .args(&self.output_args)
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        command
    }
}

impl AudioSource for FfmpegSource {
    fn prepare(&mut self) -> Result<(), VoiceError> {
        let mut child = self.command().spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoiceError::Source("ffmpeg stdout was not captured".into()))?;
        tracing::debug!(input = ?self.input, pid = child.id(), "spawned ffmpeg");
        self.stream = Some(OggOpusSource::new(stdout));
        self.child = Some(child);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Vec<u8>>, VoiceError> {
        match self.stream.as_mut() {
            Some(stream) => stream.read(),
            None => Err(VoiceError::Source("ffmpeg source read before prepare".into())),
        }
    }

    fn cleanup(&mut self) {
        self.stream = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ogg::tests::stream;

    #[test]
    fn ogg_source_skips_opus_headers() {
        let data = stream(&[b"OpusHead....", b"OpusTags....", b"frame-1", b"frame-2"]);
        let mut source = OggOpusSource::new(std::io::Cursor::new(data));
        assert_eq!(source.read().unwrap().unwrap(), b"frame-1");
        assert_eq!(source.read().unwrap().unwrap(), b"frame-2");
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn ffmpeg_command_line() {
        let source = FfmpegSource::new("song.mp3").input_args(["-ss", "5"]);
        let command = source.command();
        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(command.get_program(), "ffmpeg");
        assert_eq!(
            args,
            [
                "-vn", "-ss", "5", "-i", "song.mp3", "-f", "opus", "-ar", "48000", "-ac", "2",
                "-b:a", "96K", "-filter:a", "volume=0.5", "-"
            ]
        );
    }

    #[test]
    fn missing_binary_fails_prepare() {
        let mut source = FfmpegSource::new("x").program("/nonexistent/ffmpeg-binary");
        assert!(matches!(source.prepare(), Err(VoiceError::Io(_))));
        assert!(source.read().is_err());
        source.cleanup();
    }

    #[test]
    fn memory_source_drains() {
        let mut source = MemorySource::new(vec![vec![1], vec![2]]);
        assert_eq!(source.remaining(), 2);
        assert_eq!(source.read().unwrap(), Some(vec![1]));
        assert_eq!(source.read().unwrap(), Some(vec![2]));
        assert_eq!(source.read().unwrap(), None);
    }
}
