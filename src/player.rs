use log::debug;
use tokio::sync::mpsc;

use crate::audio::{PlayerEvent, StreamPlayer};
use crate::catalog::Station;

/// Control surface of the audio output. `StreamPlayer` is the real
/// implementation; tests substitute a recording double.
pub trait PlaybackBackend {
    fn load(&self, url: &str);
    fn play(&self);
    fn pause(&self);
    fn stop(&self);
    fn seek(&self, seconds: f64);
    fn download(&self, url: &str);
}

impl PlaybackBackend for StreamPlayer {
    fn load(&self, url: &str) {
        StreamPlayer::load(self, url);
    }

    fn play(&self) {
        StreamPlayer::play(self);
    }

    fn pause(&self) {
        StreamPlayer::pause(self);
    }

    fn stop(&self) {
        StreamPlayer::stop(self);
    }

    fn seek(&self, seconds: f64) {
        StreamPlayer::seek(self, seconds);
    }

    fn download(&self, url: &str) {
        StreamPlayer::download(self, url);
    }
}

/// Snapshot of playback, shared by every part of the UI. Each field holds the
/// most recent value received from the playback handle; nothing recomputes
/// them independently.
#[derive(Debug, Clone, Default)]
pub struct PlaybackState {
    pub current_station: Option<Station>,
    pub is_playing: bool,
    pub track_title: String,
    pub duration_secs: f64,
    pub position_secs: f64,
    pub last_error: Option<String>,
}

impl PlaybackState {
    /// True when the stream reported a finite duration (live radio has none),
    /// which is what gates the seek bar and time display.
    pub fn has_duration(&self) -> bool {
        self.duration_secs > 0.0 && self.duration_secs.is_finite()
    }
}

/// Single source of truth for playback. Owns the one audio handle and is the
/// only writer of `PlaybackState`; everything else reads the state or calls
/// the three actions.
pub struct PlayerContext<B: PlaybackBackend> {
    backend: B,
    events: mpsc::UnboundedReceiver<PlayerEvent>,
    pub state: PlaybackState,
}

impl<B: PlaybackBackend> PlayerContext<B> {
    pub fn new(backend: B, events: mpsc::UnboundedReceiver<PlayerEvent>) -> Self {
        Self {
            backend,
            events,
            state: PlaybackState::default(),
        }
    }

    /// Play a station. Loading only happens when the station actually
    /// changes; re-selecting the station that is already bound resumes it
    /// (or does nothing if it is already playing).
    pub fn play_station(&mut self, station: &Station) {
        let same = self
            .state
            .current_station
            .as_ref()
            .is_some_and(|s| s.id == station.id);

        if !same {
            debug!("switching station to {} ({})", station.name, station.id);
            self.state.current_station = Some(station.clone());
            self.state.track_title.clear();
            self.state.duration_secs = 0.0;
            self.state.position_secs = 0.0;
            self.state.last_error = None;
            self.backend.load(&station.stream_url);
        }
        self.backend.play();
    }

    /// Pause when playing, resume when paused. Without a selected station
    /// there is nothing to toggle and the backend is not touched.
    pub fn toggle_play(&mut self) {
        if self.state.is_playing {
            self.backend.pause();
        } else if self.state.current_station.is_some() {
            self.backend.play();
        }
    }

    /// Delegates to the handle, which clamps to the known duration.
    pub fn seek(&mut self, seconds: f64) {
        self.backend.seek(seconds);
    }

    /// Stop playback entirely (used on shutdown).
    pub fn stop(&mut self) {
        self.backend.stop();
    }

    /// Save a copy of the current source. Only finite sources (known
    /// duration) can be saved; live radio is ignored.
    pub fn download(&mut self) {
        if !self.state.has_duration() {
            debug!("download ignored: source is not finite");
            return;
        }
        if let Some(station) = &self.state.current_station {
            self.backend.download(&station.stream_url);
        }
    }

    /// Drain pending handle events and fold them into the state. Called once
    /// per event-loop iteration, on the UI task.
    pub fn pump_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            apply_event(&mut self.state, event);
        }
    }
}

/// The one reducer over playback events.
pub fn apply_event(state: &mut PlaybackState, event: PlayerEvent) {
    match event {
        PlayerEvent::Connecting => {
            state.is_playing = false;
        }
        PlayerEvent::Playing => {
            // Playing without a bound station would violate the state
            // invariant; it can only happen from a stale event after stop.
            if state.current_station.is_some() {
                state.is_playing = true;
                state.last_error = None;
            } else {
                debug!("ignoring play event with no current station");
            }
        }
        PlayerEvent::Paused => {
            state.is_playing = false;
        }
        PlayerEvent::Stopped => {
            state.is_playing = false;
            state.position_secs = 0.0;
        }
        PlayerEvent::DurationKnown(duration) => {
            state.duration_secs = duration.max(0.0);
            if state.has_duration() {
                state.position_secs = state.position_secs.min(state.duration_secs);
            }
        }
        PlayerEvent::Position(position) => {
            state.position_secs = if state.has_duration() {
                position.clamp(0.0, state.duration_secs)
            } else {
                position.max(0.0)
            };
        }
        PlayerEvent::TrackTitle(title) => {
            state.track_title = title;
        }
        PlayerEvent::Error(message) => {
            state.is_playing = false;
            state.last_error = Some(message);
        }
    }
}

/// Test double for the playback backend, shared with the app-level tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Load(String),
        Play,
        Pause,
        Stop,
        Seek(f64),
        Download(String),
    }

    /// Records every backend call so tests can assert on exactly what the
    /// context asked the audio resource to do.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingBackend {
        calls: Rc<RefCell<Vec<Call>>>,
    }

    impl RecordingBackend {
        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }
    }

    impl PlaybackBackend for RecordingBackend {
        fn load(&self, url: &str) {
            self.calls.borrow_mut().push(Call::Load(url.to_string()));
        }

        fn play(&self) {
            self.calls.borrow_mut().push(Call::Play);
        }

        fn pause(&self) {
            self.calls.borrow_mut().push(Call::Pause);
        }

        fn stop(&self) {
            self.calls.borrow_mut().push(Call::Stop);
        }

        fn seek(&self, seconds: f64) {
            self.calls.borrow_mut().push(Call::Seek(seconds));
        }

        fn download(&self, url: &str) {
            self.calls.borrow_mut().push(Call::Download(url.to_string()));
        }
    }

    pub(crate) fn test_context() -> (
        PlayerContext<RecordingBackend>,
        RecordingBackend,
        mpsc::UnboundedSender<PlayerEvent>,
    ) {
        let backend = RecordingBackend::default();
        let (tx, rx) = mpsc::unbounded_channel();
        (PlayerContext::new(backend.clone(), rx), backend, tx)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{test_context, Call};
    use super::*;

    fn station(id: &str, name: &str) -> Station {
        Station {
            id: id.to_string(),
            name: name.to_string(),
            genre: "Jazz".to_string(),
            stream_url: format!("http://example.com/{id}.mp3"),
        }
    }

    #[test]
    fn play_station_loads_then_plays() {
        let (mut ctx, backend, _tx) = test_context();
        let jazz = station("1", "Jazz FM");

        ctx.play_station(&jazz);
        assert_eq!(
            backend.calls(),
            vec![Call::Load("http://example.com/1.mp3".to_string()), Call::Play]
        );
        assert_eq!(ctx.state.current_station.as_ref().unwrap().id, "1");
    }

    #[test]
    fn reselecting_playing_station_does_not_reload() {
        let (mut ctx, backend, tx) = test_context();
        let jazz = station("1", "Jazz FM");

        ctx.play_station(&jazz);
        tx.send(PlayerEvent::Playing).unwrap();
        ctx.pump_events();
        assert!(ctx.state.is_playing);

        ctx.play_station(&jazz);
        let loads = backend
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Load(_)))
            .count();
        assert_eq!(loads, 1);
    }

    #[test]
    fn reselecting_paused_station_resumes() {
        let (mut ctx, backend, tx) = test_context();
        let jazz = station("1", "Jazz FM");

        ctx.play_station(&jazz);
        tx.send(PlayerEvent::Playing).unwrap();
        tx.send(PlayerEvent::Paused).unwrap();
        ctx.pump_events();
        assert!(!ctx.state.is_playing);

        ctx.play_station(&jazz);
        assert_eq!(backend.calls().last(), Some(&Call::Play));
        let loads = backend
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Load(_)))
            .count();
        assert_eq!(loads, 1);
    }

    #[test]
    fn switching_station_reloads_and_resets_state() {
        let (mut ctx, backend, tx) = test_context();

        ctx.play_station(&station("1", "Jazz FM"));
        tx.send(PlayerEvent::Playing).unwrap();
        tx.send(PlayerEvent::TrackTitle("Old Song".to_string())).unwrap();
        tx.send(PlayerEvent::Position(42.0)).unwrap();
        ctx.pump_events();

        ctx.play_station(&station("2", "Rock Hits"));
        assert!(backend
            .calls()
            .contains(&Call::Load("http://example.com/2.mp3".to_string())));
        assert_eq!(ctx.state.current_station.as_ref().unwrap().id, "2");
        assert!(ctx.state.track_title.is_empty());
        assert_eq!(ctx.state.position_secs, 0.0);
    }

    #[test]
    fn toggle_with_no_station_touches_nothing() {
        let (mut ctx, backend, _tx) = test_context();
        ctx.toggle_play();
        assert!(backend.calls().is_empty());
        assert!(!ctx.state.is_playing);
    }

    #[test]
    fn toggle_pauses_when_playing_and_resumes_when_not() {
        let (mut ctx, backend, tx) = test_context();
        ctx.play_station(&station("1", "Jazz FM"));
        tx.send(PlayerEvent::Playing).unwrap();
        ctx.pump_events();

        ctx.toggle_play();
        assert_eq!(backend.calls().last(), Some(&Call::Pause));

        tx.send(PlayerEvent::Paused).unwrap();
        ctx.pump_events();
        ctx.toggle_play();
        assert_eq!(backend.calls().last(), Some(&Call::Play));
    }

    #[test]
    fn reducer_clamps_position_to_duration() {
        let mut state = PlaybackState::default();
        apply_event(&mut state, PlayerEvent::DurationKnown(100.0));
        apply_event(&mut state, PlayerEvent::Position(250.0));
        assert_eq!(state.position_secs, 100.0);
        apply_event(&mut state, PlayerEvent::Position(-5.0));
        assert_eq!(state.position_secs, 0.0);
    }

    #[test]
    fn reducer_ignores_play_without_station() {
        let mut state = PlaybackState::default();
        apply_event(&mut state, PlayerEvent::Playing);
        assert!(!state.is_playing);
    }

    #[test]
    fn stream_end_event_stops_playback() {
        let (mut ctx, _backend, tx) = test_context();
        ctx.play_station(&station("1", "Jazz FM"));
        tx.send(PlayerEvent::Playing).unwrap();
        tx.send(PlayerEvent::Position(120.0)).unwrap();
        tx.send(PlayerEvent::Stopped).unwrap();
        ctx.pump_events();

        assert!(!ctx.state.is_playing);
        assert_eq!(ctx.state.position_secs, 0.0);
    }

    #[test]
    fn download_only_applies_to_finite_sources() {
        let (mut ctx, backend, tx) = test_context();
        ctx.download();
        assert!(backend.calls().is_empty());

        ctx.play_station(&station("1", "Jazz FM"));
        // Live stream: duration unknown, nothing to save
        ctx.download();
        assert!(!backend
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Download(_))));

        tx.send(PlayerEvent::DurationKnown(300.0)).unwrap();
        ctx.pump_events();
        ctx.download();
        assert!(backend
            .calls()
            .contains(&Call::Download("http://example.com/1.mp3".to_string())));
    }

    #[test]
    fn error_event_surfaces_and_clears_on_play() {
        let (mut ctx, _backend, tx) = test_context();
        ctx.play_station(&station("1", "Jazz FM"));
        tx.send(PlayerEvent::Error("connection refused".to_string()))
            .unwrap();
        ctx.pump_events();
        assert!(!ctx.state.is_playing);
        assert_eq!(ctx.state.last_error.as_deref(), Some("connection refused"));

        tx.send(PlayerEvent::Playing).unwrap();
        ctx.pump_events();
        assert!(ctx.state.last_error.is_none());
    }
}
