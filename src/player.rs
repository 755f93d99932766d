use crate::listens::ListenHistory;
use crate::models::Station;
use anyhow::{anyhow, Result};
use tracing::{debug, info, warn};

pub const DEFAULT_VOLUME: f32 = 0.7;
const PLAY_FAILED: &str = "Failed to play station";

/// The one physical playback handle. Calls only request state changes;
/// the resulting state arrives back as [`MediaEvent`]s.
pub trait MediaOutput: Send {
    /// Replaces the current source and starts it.
    fn load(&self, url: &str) -> Result<()>;
    fn resume(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn set_volume(&self, volume: f32) -> Result<()>;
    /// Drops the source entirely.
    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// The output (re)started and accepts commands.
    Ready,
    Playing,
    Pause,
    Waiting,
    Error(String),
    MediaTitle(Option<String>),
    Crashed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    Loading,
    Playing,
    Paused,
    Errored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub station: Option<Station>,
    pub playing: bool,
    pub loading: bool,
    pub volume: f32,
    pub error: Option<String>,
    pub media_title: Option<String>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            station: None,
            playing: false,
            loading: false,
            volume: DEFAULT_VOLUME,
            error: None,
            media_title: None,
        }
    }
}

impl PlaybackState {
    pub fn phase(&self) -> PlaybackPhase {
        if self.station.is_none() {
            PlaybackPhase::Idle
        } else if self.loading {
            PlaybackPhase::Loading
        } else if self.playing {
            PlaybackPhase::Playing
        } else if self.error.is_some() {
            PlaybackPhase::Errored
        } else {
            PlaybackPhase::Paused
        }
    }
}

pub struct PlaybackController {
    output: Box<dyn MediaOutput>,
    state: PlaybackState,
    listens: Option<ListenHistory>,
    user_id: Option<String>,
}

impl PlaybackController {
    pub fn new(output: Box<dyn MediaOutput>, volume: f32) -> Self {
        let volume = clamp_volume(volume);
        if let Err(e) = output.set_volume(volume) {
            warn!(error = ?e, "failed to apply initial volume");
        }
        Self {
            output,
            state: PlaybackState {
                volume,
                ..PlaybackState::default()
            },
            listens: None,
            user_id: None,
        }
    }

    pub fn with_listen_history(mut self, listens: ListenHistory) -> Self {
        self.listens = Some(listens);
        self
    }

    /// Identity under which future plays are counted.
    pub fn set_user(&mut self, user_id: Option<String>) {
        self.user_id = user_id;
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn play(&mut self, station: Station) {
        self.state.station = Some(station.clone());
        self.state.playing = false;
        self.state.loading = true;
        self.state.error = None;
        self.state.media_title = None;

        let res = station
            .stream_url()
            .ok_or_else(|| anyhow!("Station has no stream URL"))
            .and_then(|url| self.output.load(url));
        if let Err(e) = res {
            warn!(stationuuid = %station.stationuuid, error = ?e, "playback failed");
            self.fail();
            return;
        }
        info!(stationuuid = %station.stationuuid, name = %station.name, "starting playback");
        self.record_listen(&station);
    }

    pub fn pause(&mut self) {
        if let Err(e) = self.output.pause() {
            warn!(error = ?e, "pause failed");
        }
    }

    pub fn resume(&mut self) {
        if self.state.station.is_none() {
            return;
        }
        if let Err(e) = self.output.resume() {
            warn!(error = ?e, "resume failed");
            self.fail();
        }
    }

    pub fn toggle_play_pause(&mut self) {
        if self.state.station.is_none() {
            return;
        }
        if self.state.playing {
            self.pause();
        } else {
            self.resume();
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        let volume = clamp_volume(volume);
        if let Err(e) = self.output.set_volume(volume) {
            warn!(error = ?e, "set volume failed");
        }
        self.state.volume = volume;
    }

    /// Leaves the last error in place.
    pub fn stop(&mut self) {
        if let Err(e) = self.output.clear() {
            warn!(error = ?e, "stop failed");
        }
        self.state.station = None;
        self.state.playing = false;
        self.state.loading = false;
        self.state.media_title = None;
    }

    pub fn handle_event(&mut self, event: MediaEvent) {
        debug!(?event, "media event");
        match event {
            MediaEvent::Ready => {
                if let Err(e) = self.output.set_volume(self.state.volume) {
                    warn!(error = ?e, "failed to reapply volume");
                }
                // A restarted output has lost its source.
                if let Some(station) = self.state.station.clone() {
                    if self.state.playing || self.state.loading {
                        self.play(station);
                    }
                }
            }
            MediaEvent::Crashed(msg) => {
                warn!(error = %msg, "media output crashed");
                if self.state.station.is_some() {
                    self.fail();
                }
            }
            _ if self.state.station.is_none() => {}
            MediaEvent::Playing => {
                self.state.playing = true;
                self.state.loading = false;
                self.state.error = None;
            }
            MediaEvent::Pause => {
                self.state.playing = false;
            }
            MediaEvent::Waiting => {
                self.state.loading = true;
            }
            MediaEvent::Error(msg) => {
                warn!(error = %msg, "stream error");
                self.fail();
            }
            MediaEvent::MediaTitle(title) => {
                self.state.media_title = title;
            }
        }
    }

    fn fail(&mut self) {
        self.state.playing = false;
        self.state.loading = false;
        self.state.error = Some(PLAY_FAILED.to_string());
    }

    fn record_listen(&self, station: &Station) {
        let Some(listens) = &self.listens else {
            return;
        };
        if let Err(e) = listens.record(self.user_id.as_deref(), station) {
            warn!(error = ?e, "failed to record listen");
        }
    }
}

pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, 1.0)
}


#[cfg(test)]
mod tests {
    use super::fake::FakeOutput;
    use super::*;
    use crate::models::test_station;
    use crate::storage::{MemoryStorage, Storage};
    use std::sync::Arc;

    fn controller() -> (FakeOutput, PlaybackController) {
        let out = FakeOutput::default();
        let ctl = PlaybackController::new(Box::new(out.clone()), DEFAULT_VOLUME);
        (out, ctl)
    }

    #[test]
    fn play_loads_resolved_url_and_enters_loading() {
        let (out, mut ctl) = controller();
        let mut st = test_station("a", "A");
        st.url_resolved = "https://resolved.example/a".into();
        ctl.play(st);

        assert_eq!(ctl.state().phase(), PlaybackPhase::Loading);
        assert!(out.calls().contains(&"load https://resolved.example/a".to_string()));
    }

    #[test]
    fn native_events_drive_the_phase() {
        let (_, mut ctl) = controller();
        ctl.play(test_station("a", "A"));

        ctl.handle_event(MediaEvent::Playing);
        assert_eq!(ctl.state().phase(), PlaybackPhase::Playing);
        ctl.handle_event(MediaEvent::Pause);
        assert_eq!(ctl.state().phase(), PlaybackPhase::Paused);
        ctl.handle_event(MediaEvent::Waiting);
        assert_eq!(ctl.state().phase(), PlaybackPhase::Loading);
        ctl.handle_event(MediaEvent::Error("decoder".into()));
        assert_eq!(ctl.state().phase(), PlaybackPhase::Errored);
        assert_eq!(ctl.state().error.as_deref(), Some("Failed to play station"));
        assert!(!ctl.state().playing);

        ctl.handle_event(MediaEvent::Playing);
        assert_eq!(ctl.state().error, None);
    }

    #[test]
    fn toggle_dispatches_on_playing_flag() {
        let (out, mut ctl) = controller();
        ctl.toggle_play_pause();
        assert!(!out.calls().iter().any(|c| c == "pause" || c == "resume"));

        ctl.play(test_station("a", "A"));
        ctl.handle_event(MediaEvent::Playing);
        ctl.toggle_play_pause();
        assert_eq!(out.calls().last().map(String::as_str), Some("pause"));

        ctl.handle_event(MediaEvent::Pause);
        ctl.toggle_play_pause();
        assert_eq!(out.calls().last().map(String::as_str), Some("resume"));
    }

    #[test]
    fn volume_is_clamped_and_leaves_phase_alone() {
        let (_, mut ctl) = controller();
        ctl.play(test_station("a", "A"));
        ctl.handle_event(MediaEvent::Playing);

        ctl.set_volume(-1.0);
        assert_eq!(ctl.state().volume, 0.0);
        ctl.set_volume(5.0);
        assert_eq!(ctl.state().volume, 1.0);
        ctl.set_volume(f32::NAN);
        assert_eq!(ctl.state().volume, 0.0);
        assert_eq!(ctl.state().phase(), PlaybackPhase::Playing);
    }

    #[test]
    fn stop_clears_station_and_flags_but_keeps_error() {
        let (out, mut ctl) = controller();
        ctl.play(test_station("a", "A"));
        ctl.handle_event(MediaEvent::Error("eof".into()));
        ctl.stop();

        let st = ctl.state();
        assert!(st.station.is_none());
        assert!(!st.playing && !st.loading);
        assert!(st.error.is_some());
        assert_eq!(st.phase(), PlaybackPhase::Idle);
        assert_eq!(out.calls().last().map(String::as_str), Some("clear"));

        ctl.handle_event(MediaEvent::Playing);
        assert!(!ctl.state().playing);
    }

    #[test]
    fn second_play_supersedes_first() {
        let (_, mut ctl) = controller();
        ctl.play(test_station("a", "A"));
        ctl.play(test_station("b", "B"));
        assert_eq!(ctl.state().station.as_ref().map(|s| s.id()), Some("b"));
        assert_eq!(ctl.state().phase(), PlaybackPhase::Loading);

        ctl.handle_event(MediaEvent::Playing);
        assert_eq!(ctl.state().station.as_ref().map(|s| s.id()), Some("b"));
        assert_eq!(ctl.state().phase(), PlaybackPhase::Playing);
    }

    #[test]
    fn failed_load_is_errored() {
        let out = FakeOutput {
            fail_load: true,
            ..FakeOutput::default()
        };
        let mut ctl = PlaybackController::new(Box::new(out), 0.5);
        ctl.play(test_station("a", "A"));
        assert_eq!(ctl.state().phase(), PlaybackPhase::Errored);
    }

    #[test]
    fn play_counts_a_listen_for_the_current_user() {
        let storage = Arc::new(MemoryStorage::new());
        let (_, ctl) = controller();
        let mut ctl = ctl.with_listen_history(ListenHistory::new(storage.clone()));
        ctl.set_user(Some("u1".into()));
        ctl.play(test_station("a", "A"));
        ctl.play(test_station("a", "A"));

        let history = ListenHistory::new(storage.clone());
        assert_eq!(history.entries(Some("u1")).unwrap()["a"].count, 2);
        assert!(storage.get("fh_listens:anon").unwrap().is_none());
    }

    #[test]
    fn broken_history_never_reaches_the_caller() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("fh_listens:anon", "garbage").unwrap();
        let (_, ctl) = controller();
        let mut ctl = ctl.with_listen_history(ListenHistory::new(storage));
        ctl.play(test_station("a", "A"));
        assert_eq!(ctl.state().phase(), PlaybackPhase::Loading);
    }

    #[test]
    fn restarted_output_reloads_active_station() {
        let (out, mut ctl) = controller();
        ctl.play(test_station("a", "A"));
        ctl.handle_event(MediaEvent::Playing);
        ctl.handle_event(MediaEvent::Ready);
        let loads = out.calls().iter().filter(|c| c.starts_with("load")).count();
        assert_eq!(loads, 2);
    }

    #[test]
    fn restart_reloads_even_when_volume_is_rejected() {
        let out = FakeOutput {
            fail_volume: true,
            ..FakeOutput::default()
        };
        let mut ctl = PlaybackController::new(Box::new(out.clone()), 0.5);
        ctl.play(test_station("a", "A"));
        ctl.handle_event(MediaEvent::Ready);

        let loads = out.calls().iter().filter(|c| c.starts_with("load")).count();
        assert_eq!(loads, 2);
        assert_eq!(ctl.state().volume, 0.5);
        assert_eq!(ctl.state().phase(), PlaybackPhase::Loading);
    }
}
