use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tidecord_models::voice::SpeakingFlags;
use tidecord_models::Snowflake;

use crate::packet::SILENCE_FRAME;
use crate::{AudioSource, VoiceError, VoiceRegistry, VoiceSession};

pub const FRAME_DURATION: Duration = Duration::from_millis(20);
/// Silence frames sent before going quiet, so decoders on the far end do
/// not interpolate over the gap.
pub const SILENCE_FRAMES: usize = 5;
/// Longest the player thread blocks before looking at its inbox again.
const IDLE_POLL: Duration = Duration::from_secs(1);

pub type FinishCallback = Box<dyn FnOnce() + Send + 'static>;

/// A source plus what to run when it finishes, is skipped or is stopped.
pub struct Track {
    source: Box<dyn AudioSource>,
    on_finish: Option<FinishCallback>,
}

impl Track {
    pub fn new(source: impl AudioSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            on_finish: None,
        }
    }

    pub fn on_finish(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_finish = Some(Box::new(callback));
        self
    }

    fn finish(mut self) {
        self.source.cleanup();
        if let Some(callback) = self.on_finish.take() {
            callback();
        }
    }
}

/// What to do once the last queued track has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterFinish {
    /// Stay connected and wait for more tracks.
    Idle,
    /// Drop the guild's voice session.
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
    Stopped,
}

enum Command {
    Play(Track),
    Enqueue(Track),
    Pause,
    Resume,
    Skip,
    Stop,
    Shutdown,
}

struct Status {
    state: Mutex<PlayerState>,
    queued: AtomicUsize,
    frames_sent: AtomicU64,
}

/// Plays tracks into a guild's voice session at a fixed 20 ms cadence.
///
/// The player runs on its own thread and never holds on to a session that
/// has stopped: it looks the guild up in the [`VoiceRegistry`] again, so
/// playback carries on across voice reconnects.
pub struct AudioPlayer {
    guild_id: Snowflake,
    commands: mpsc::Sender<Command>,
    status: Arc<Status>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AudioPlayer {
    pub fn new(
        registry: Arc<VoiceRegistry>,
        guild_id: Snowflake,
        after: AfterFinish,
    ) -> Result<Self, VoiceError> {
        let (commands, inbox) = mpsc::channel();
        let status = Arc::new(Status {
            state: Mutex::new(PlayerState::Idle),
            queued: AtomicUsize::new(0),
            frames_sent: AtomicU64::new(0),
        });
        let worker = Worker {
            guild_id,
            registry,
            session: None,
            inbox,
            status: status.clone(),
            after,
            current: None,
            queue: VecDeque::new(),
            paused: false,
            sent_silence: true,
            speaking: false,
            pacer: Pacer::default(),
        };
        let thread = std::thread::Builder::new()
            .name(format!("audio-{guild_id}"))
            .spawn(move || worker.run())?;

        Ok(Self {
            guild_id,
            commands,
            status,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn guild_id(&self) -> Snowflake {
        self.guild_id
    }

    /// Drop whatever is playing or queued and play `track` now.
    pub fn play(&self, track: Track) -> Result<(), VoiceError> {
        self.send(Command::Play(track))
    }

    /// Append `track` to the queue; starts it right away when idle.
    pub fn enqueue(&self, track: Track) -> Result<(), VoiceError> {
        self.status.queued.fetch_add(1, Ordering::SeqCst);
        self.send(Command::Enqueue(track))
    }

    pub fn pause(&self) -> Result<(), VoiceError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), VoiceError> {
        self.send(Command::Resume)
    }

    /// Finish the current track and move on to the next one.
    pub fn skip(&self) -> Result<(), VoiceError> {
        self.send(Command::Skip)
    }

    /// Finish the current track and clear the queue.
    pub fn stop(&self) -> Result<(), VoiceError> {
        self.send(Command::Stop)
    }

    /// Stop playback and wait for the player thread to exit.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                tracing::error!(guild_id = %self.guild_id, "audio thread panicked");
            }
        }
    }

    pub fn state(&self) -> PlayerState {
        *self.status.state.lock()
    }

    /// Tracks waiting behind the current one.
    pub fn queued(&self) -> usize {
        self.status.queued.load(Ordering::SeqCst)
    }

    pub fn frames_sent(&self) -> u64 {
        self.status.frames_sent.load(Ordering::SeqCst)
    }

    fn send(&self, command: Command) -> Result<(), VoiceError> {
        self.commands
            .send(command)
            .map_err(|_| VoiceError::PlayerClosed)
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        // Not joined: dropping may happen on an async worker thread.
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl std::fmt::Debug for AudioPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPlayer")
            .field("guild_id", &self.guild_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Send deadlines measured from a fixed start, so late sends do not push
/// later frames back.
#[derive(Debug, Default)]
pub(crate) struct Pacer {
    start: Option<Instant>,
    frames: u32,
}

impl Pacer {
    pub(crate) fn begin(&mut self, now: Instant) {
        self.start = Some(now);
        self.frames = 0;
    }

    pub(crate) fn reset(&mut self) {
        self.start = None;
        self.frames = 0;
    }

    /// Count one sent frame and return how long to sleep until the next is due.
    pub(crate) fn advance(&mut self, now: Instant) -> Duration {
        let start = *self.start.get_or_insert(now);
        self.frames += 1;
        (start + FRAME_DURATION * self.frames).saturating_duration_since(now)
    }
}

struct Worker {
    guild_id: Snowflake,
    registry: Arc<VoiceRegistry>,
    session: Option<VoiceSession>,
    inbox: mpsc::Receiver<Command>,
    status: Arc<Status>,
    after: AfterFinish,
    current: Option<Track>,
    queue: VecDeque<Track>,
    paused: bool,
    sent_silence: bool,
    speaking: bool,
    pacer: Pacer,
}

impl Worker {
    fn run(mut self) {
        tracing::debug!(guild_id = %self.guild_id, "audio player started");
        'run: loop {
            loop {
                match self.inbox.try_recv() {
                    Ok(command) => {
                        if !self.apply(command) {
                            break 'run;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'run,
                }
            }

            if self.current.is_none() && !self.start_next() {
                self.set_state(PlayerState::Idle);
                if !self.wait_command(IDLE_POLL) {
                    break;
                }
                continue;
            }

            if self.paused {
                if !self.sent_silence {
                    self.go_quiet();
                }
                if !self.wait_command(IDLE_POLL) {
                    break;
                }
                continue;
            }

            let Some(session) = self.resolve_session() else {
                if !self.wait_command(IDLE_POLL) {
                    break;
                }
                continue;
            };
            if !session.is_ready() {
                // Speaking state and pacing restart on the next socket.
                self.speaking = false;
                self.pacer.reset();
                session.wait_ready_blocking(IDLE_POLL);
                continue;
            }

            let read = match self.current.as_mut() {
                Some(track) => track.source.read(),
                None => continue,
            };
            match read {
                Ok(Some(frame)) if !frame.is_empty() => self.send_frame(&session, &frame),
                Ok(_) => self.finish_current(),
                Err(err) => {
                    tracing::warn!(guild_id = %self.guild_id, error = %err, "audio source failed");
                    self.finish_current();
                }
            }
        }
        self.shutdown();
    }

    /// Returns `false` when the player must exit.
    fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::Play(track) => {
                self.abort_current();
                self.clear_queue();
                self.queue.push_back(track);
                self.status.queued.store(1, Ordering::SeqCst);
                self.paused = false;
            }
            Command::Enqueue(track) => self.queue.push_back(track),
            Command::Pause => {
                if self.current.is_some() && !self.paused {
                    self.paused = true;
                    self.sent_silence = false;
                    self.set_state(PlayerState::Paused);
                }
            }
            Command::Resume => {
                if self.paused {
                    self.paused = false;
                    self.set_state(PlayerState::Playing);
                }
            }
            Command::Skip => self.finish_current(),
            Command::Stop => {
                self.clear_queue();
                self.finish_current();
                self.paused = false;
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// Block up to `timeout` for one command. Returns `false` when the
    /// player must exit.
    fn wait_command(&mut self, timeout: Duration) -> bool {
        match self.inbox.recv_timeout(timeout) {
            Ok(command) => self.apply(command),
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn start_next(&mut self) -> bool {
        while let Some(mut track) = self.queue.pop_front() {
            self.status.queued.store(self.queue.len(), Ordering::SeqCst);
            match track.source.prepare() {
                Ok(()) => {
                    self.current = Some(track);
                    self.paused = false;
                    self.speaking = false;
                    self.pacer.reset();
                    self.set_state(PlayerState::Playing);
                    tracing::debug!(guild_id = %self.guild_id, "track started");
                    return true;
                }
                Err(err) => {
                    tracing::warn!(guild_id = %self.guild_id, error = %err, "failed to prepare audio source");
                    track.finish();
                }
            }
        }
        false
    }

    /// The current track ended or was skipped: clean it up, run its callback
    /// and go quiet when nothing else is queued.
    fn finish_current(&mut self) {
        let Some(track) = self.current.take() else {
            return;
        };
        tracing::debug!(guild_id = %self.guild_id, "track finished");
        track.finish();
        if self.queue.is_empty() {
            self.go_quiet();
            if self.after == AfterFinish::Disconnect {
                tracing::info!(guild_id = %self.guild_id, "queue drained, leaving voice");
                self.registry.remove(self.guild_id);
                self.session = None;
            }
        }
    }

    fn abort_current(&mut self) {
        if let Some(track) = self.current.take() {
            track.finish();
        }
    }

    fn clear_queue(&mut self) {
        self.queue.clear();
        self.status.queued.store(0, Ordering::SeqCst);
    }

    fn send_frame(&mut self, session: &VoiceSession, frame: &[u8]) {
        if !self.speaking {
            session.speak(SpeakingFlags::MICROPHONE);
            self.speaking = true;
            self.pacer.begin(Instant::now());
        }
        if let Err(err) = session.send_audio_frame(frame) {
            tracing::debug!(guild_id = %self.guild_id, error = %err, "audio frame not sent");
        }
        self.status.frames_sent.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.pacer.advance(Instant::now()));
    }

    /// Trail off with silence frames and clear the speaking indicator.
    fn go_quiet(&mut self) {
        self.sent_silence = true;
        if !self.speaking {
            return;
        }
        if let Some(session) = self.resolve_session().filter(|s| s.is_ready()) {
            for _ in 0..SILENCE_FRAMES {
                self.send_frame(&session, &SILENCE_FRAME);
            }
            session.speak(SpeakingFlags::empty());
        }
        self.speaking = false;
        self.pacer.reset();
    }

    /// The session to send on; looked up again once the held one has stopped.
    fn resolve_session(&mut self) -> Option<VoiceSession> {
        if let Some(session) = &self.session {
            if !session.is_stopped() {
                return Some(session.clone());
            }
        }
        let fresh = self
            .registry
            .get(self.guild_id)
            .filter(|s| !s.is_stopped());
        if fresh.is_some() && self.session.is_some() {
            tracing::info!(guild_id = %self.guild_id, "switched to new voice session");
        }
        self.session = fresh.clone();
        fresh
    }

    fn set_state(&self, state: PlayerState) {
        *self.status.state.lock() = state;
    }

    fn shutdown(&mut self) {
        if self.current.is_some() {
            self.go_quiet();
        }
        self.abort_current();
        self.clear_queue();
        self.set_state(PlayerState::Stopped);
        tracing::debug!(guild_id = %self.guild_id, "audio player stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySource;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn pacing_is_anchored_to_the_start() {
        let t0 = Instant::now();
        let mut pacer = Pacer::default();
        pacer.begin(t0);
        assert_eq!(pacer.advance(t0 + Duration::from_millis(5)), Duration::from_millis(15));
        // A late send does not shift the schedule.
        assert_eq!(pacer.advance(t0 + Duration::from_millis(45)), Duration::ZERO);
        assert_eq!(pacer.advance(t0 + Duration::from_millis(50)), Duration::from_millis(10));

        pacer.reset();
        let t1 = t0 + Duration::from_secs(1);
        assert_eq!(pacer.advance(t1), FRAME_DURATION);
    }

    #[test]
    fn shutdown_finishes_pending_track_without_a_session() {
        let registry = Arc::new(VoiceRegistry::new());
        let player = AudioPlayer::new(registry, Snowflake::new(1), AfterFinish::Idle).unwrap();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        player
            .play(Track::new(MemorySource::new(vec![vec![1, 2, 3]])).on_finish(move || {
                flag.store(true, Ordering::SeqCst);
            }))
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(player.state(), PlayerState::Playing);
        assert_eq!(player.frames_sent(), 0);

        player.shutdown();
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(player.state(), PlayerState::Stopped);
        assert!(player.play(Track::new(MemorySource::default())).is_err());
    }

    #[test]
    fn failing_prepare_runs_callback_and_moves_on() {
        struct Broken;
        impl AudioSource for Broken {
            fn prepare(&mut self) -> Result<(), VoiceError> {
                Err(VoiceError::Source("nope".into()))
            }
            fn read(&mut self) -> Result<Option<Vec<u8>>, VoiceError> {
                Ok(None)
            }
        }

        let registry = Arc::new(VoiceRegistry::new());
        let player = AudioPlayer::new(registry, Snowflake::new(2), AfterFinish::Idle).unwrap();
        let (tx, rx) = mpsc::channel();
        player
            .enqueue(Track::new(Broken).on_finish(move || {
                let _ = tx.send(());
            }))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(player.state(), PlayerState::Idle);
        assert_eq!(player.queued(), 0);
        player.shutdown();
    }
}
