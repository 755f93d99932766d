use crate::auth::{AuthProvider, DisabledIdentity, GoTrueClient, IdentityService, SignUpOutcome, User};
use crate::config::AppConfig;
use crate::directory::{search_enabled, SearchOutcome, StationService, MIN_QUERY_CHARS};
use crate::favorites::FavoritesStore;
use crate::listens::ListenHistory;
use crate::models::{ListenEntry, Station};
use crate::mpv::MpvProcess;
use crate::player::{PlaybackController, PlaybackState};
use crate::radio_browser::RadioBrowserClient;
use crate::regions::find_region;
use crate::storage::{FileStorage, MemoryStorage, Storage};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

const TOP_LISTENS: usize = 8;
const LOAD_FAILED: &str = "Failed to load stations";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingSource {
    None,
    Region(String),
    Search(String),
    Popular,
    Favorites,
}

#[derive(Debug, Clone)]
pub struct ControllerState {
    pub playback: PlaybackState,
    pub source: ListingSource,
    pub listing: Vec<Station>,
    pub listing_loading: bool,
    pub favorites: Vec<Station>,
    pub user: Option<User>,
    pub premium: bool,
    pub top_listens: Vec<ListenEntry>,
    /// Outcome of the last account action.
    pub notice: Option<String>,
    pub error: Option<String>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            playback: PlaybackState::default(),
            source: ListingSource::None,
            listing: vec![],
            listing_loading: false,
            favorites: vec![],
            user: None,
            premium: false,
            top_listens: vec![],
            notice: None,
            error: None,
        }
    }
}

impl ControllerState {
    pub fn label_text(&self) -> String {
        if let Some(st) = &self.playback.station {
            let name = st.name.trim();
            if !name.is_empty() {
                return name.to_string();
            }
        }

        if let Some(t) = self
            .playback
            .media_title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            return t.to_string();
        }

        "radio".to_string()
    }

    pub fn is_favorite(&self, station_id: &str) -> bool {
        self.favorites.iter().any(|s| s.stationuuid == station_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    Search(String),
    Region(String),
    Popular,
    ShowFavorites,
    Play(Station),
    Pause,
    Resume,
    TogglePause,
    Stop,
    SetVolume(f32),
    ToggleFavorite(Station),
    SignIn { email: String, password: String },
    SignUp { email: String, password: String },
    SignOut,
    UpdateProfile { display_name: String, avatar_url: Option<String> },
    ActivatePremium,
    ShowHistory,
    Shutdown,
}

pub struct ControllerHandle {
    pub cmd_tx: mpsc::UnboundedSender<UiCommand>,
    pub state_rx: watch::Receiver<ControllerState>,
    _thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(UiCommand::Shutdown);
        if let Some(t) = self._thread.take() {
            let _ = t.join();
        }
    }
}

pub fn start_controller(config: AppConfig) -> ControllerHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ControllerState::default());

    let thread = std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = ?e, "failed to start controller runtime");
                return;
            }
        };
        rt.block_on(async move {
            if let Err(e) = controller_main(config, cmd_rx, state_tx).await {
                warn!(error = ?e, "controller exited with error");
            }
        });
    });

    ControllerHandle {
        cmd_tx,
        state_rx,
        _thread: Some(thread),
    }
}

#[derive(Debug)]
enum InternalMsg {
    ListingDone { seq: u64, res: Result<Option<Arc<Vec<Station>>>> },
    AccountDone(Result<String>),
}

/// Every service the application needs, built once and owned by the
/// controller loop.
struct Services {
    config: AppConfig,
    stations: Arc<StationService>,
    auth: Arc<AuthProvider>,
    favorites: FavoritesStore,
    listens: ListenHistory,
    player: PlaybackController,
    mpv: MpvProcess,
}

async fn build_services(
    config: AppConfig,
) -> Result<(Services, mpsc::UnboundedReceiver<crate::player::MediaEvent>)> {
    let storage: Arc<dyn Storage> = match FileStorage::open_default() {
        Ok(files) => Arc::new(files),
        Err(e) => {
            warn!(error = ?e, "no data directory, favorites and history will not be kept");
            Arc::new(MemoryStorage::new())
        }
    };

    let identity: Arc<dyn IdentityService> =
        match (config.supabase_url.as_deref(), config.supabase_anon_key.as_deref()) {
            (Some(url), Some(key)) => Arc::new(GoTrueClient::new(url, key)?),
            _ => {
                info!("identity service not configured, running as guest");
                Arc::new(DisabledIdentity)
            }
        };
    let auth = Arc::new(AuthProvider::new(identity, storage.clone()));
    auth.restore().await;

    let directory = RadioBrowserClient::connect(&config.api_base).await?;
    info!(base = %directory.base(), "station directory ready");
    let stations = Arc::new(StationService::new(Arc::new(directory)));

    let favorites = FavoritesStore::load(storage.clone(), auth.user_id());
    let listens = ListenHistory::new(storage);

    let (mpv, media_events) = MpvProcess::spawn(mpv_socket_path()?).await?;
    let mut player = PlaybackController::new(Box::new(mpv.clone()), config.player_volume())
        .with_listen_history(listens.clone());
    player.set_user(auth.user_id());

    Ok((
        Services {
            config,
            stations,
            auth,
            favorites,
            listens,
            player,
            mpv,
        },
        media_events,
    ))
}

async fn controller_main(
    config: AppConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<UiCommand>,
    state_tx: watch::Sender<ControllerState>,
) -> Result<()> {
    let (mut svc, mut media_events) = match build_services(config).await {
        Ok(built) => built,
        Err(e) => {
            state_tx.send_modify(|s| s.error = Some(format!("{e:#}")));
            return Err(e);
        }
    };
    let mut session_rx = svc.auth.subscribe();

    let mut state = state_tx.borrow().clone();
    state.playback = svc.player.state().clone();
    state.favorites = svc.favorites.list().to_vec();
    state.user = svc.auth.user();
    state.premium = svc.auth.is_premium();
    let _ = state_tx.send(state.clone());

    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<InternalMsg>();
    let mut listing_seq: u64 = 0;

    loop {
        tokio::select! {
            Some(cmd) = cmd_rx.recv() => {
                state.notice = None;
                match cmd {
                    UiCommand::Search(q) => {
                        if !search_enabled(&q) {
                            state.notice = Some(format!("Type at least {MIN_QUERY_CHARS} characters to search"));
                            let _ = state_tx.send(state.clone());
                            continue;
                        }
                        listing_seq += 1;
                        begin_listing(&mut state, ListingSource::Search(q.clone()));
                        let _ = state_tx.send(state.clone());

                        let stations = svc.stations.clone();
                        let tx = internal_tx.clone();
                        let seq = listing_seq;
                        tokio::spawn(async move {
                            let res = stations.search(&q).await.map(|out| match out {
                                SearchOutcome::Results(list) => Some(list),
                                SearchOutcome::Suppressed => None,
                            });
                            let _ = tx.send(InternalMsg::ListingDone { seq, res });
                        });
                    }
                    UiCommand::Region(id) => {
                        if find_region(&id).is_none() {
                            state.notice = Some(format!("Unknown region: {id}"));
                        }
                        listing_seq += 1;
                        begin_listing(&mut state, ListingSource::Region(id.clone()));
                        let _ = state_tx.send(state.clone());

                        let stations = svc.stations.clone();
                        let tx = internal_tx.clone();
                        let seq = listing_seq;
                        tokio::spawn(async move {
                            let res = stations.region(&id).await.map(Some);
                            let _ = tx.send(InternalMsg::ListingDone { seq, res });
                        });
                    }
                    UiCommand::Popular => {
                        listing_seq += 1;
                        begin_listing(&mut state, ListingSource::Popular);
                        let _ = state_tx.send(state.clone());

                        let stations = svc.stations.clone();
                        let tx = internal_tx.clone();
                        let seq = listing_seq;
                        tokio::spawn(async move {
                            let res = stations.popular().await.map(Some);
                            let _ = tx.send(InternalMsg::ListingDone { seq, res });
                        });
                    }
                    UiCommand::ShowFavorites => {
                        listing_seq += 1;
                        state.source = ListingSource::Favorites;
                        state.listing = svc.favorites.list().to_vec();
                        state.listing_loading = false;
                        state.error = None;
                        let _ = state_tx.send(state.clone());
                    }
                    UiCommand::Play(station) => {
                        svc.player.play(station);
                        state.playback = svc.player.state().clone();
                        let _ = state_tx.send(state.clone());
                    }
                    UiCommand::Pause => {
                        svc.player.pause();
                        state.playback = svc.player.state().clone();
                        let _ = state_tx.send(state.clone());
                    }
                    UiCommand::Resume => {
                        svc.player.resume();
                        state.playback = svc.player.state().clone();
                        let _ = state_tx.send(state.clone());
                    }
                    UiCommand::TogglePause => {
                        svc.player.toggle_play_pause();
                        state.playback = svc.player.state().clone();
                        let _ = state_tx.send(state.clone());
                    }
                    UiCommand::Stop => {
                        svc.player.stop();
                        state.playback = svc.player.state().clone();
                        let _ = state_tx.send(state.clone());
                    }
                    UiCommand::SetVolume(v) => {
                        svc.player.set_volume(v);
                        state.playback = svc.player.state().clone();
                        let _ = state_tx.send(state.clone());
                    }
                    UiCommand::ToggleFavorite(station) => {
                        svc.favorites.toggle(station);
                        state.favorites = svc.favorites.list().to_vec();
                        if state.source == ListingSource::Favorites {
                            state.listing = state.favorites.clone();
                        }
                        let _ = state_tx.send(state.clone());
                    }
                    UiCommand::SignIn { email, password } => {
                        spawn_account(&svc.auth, &internal_tx, move |auth| async move {
                            let user = auth.sign_in(&email, &password).await?;
                            Ok::<_, anyhow::Error>(format!(
                                "Signed in as {}",
                                user.email.as_deref().unwrap_or(&user.id)
                            ))
                        });
                    }
                    UiCommand::SignUp { email, password } => {
                        spawn_account(&svc.auth, &internal_tx, move |auth| async move {
                            Ok::<_, anyhow::Error>(match auth.sign_up(&email, &password).await? {
                                SignUpOutcome::SignedIn(_) => format!("Welcome, {email}"),
                                SignUpOutcome::ConfirmationRequired(_) => {
                                    "Check your email to confirm your account".to_string()
                                }
                            })
                        });
                    }
                    UiCommand::SignOut => {
                        spawn_account(&svc.auth, &internal_tx, |auth| async move {
                            auth.sign_out().await;
                            Ok::<_, anyhow::Error>("Signed out".to_string())
                        });
                    }
                    UiCommand::UpdateProfile { display_name, avatar_url } => {
                        spawn_account(&svc.auth, &internal_tx, move |auth| async move {
                            auth.update_profile(&display_name, avatar_url.as_deref()).await?;
                            Ok::<_, anyhow::Error>("Profile updated".to_string())
                        });
                    }
                    UiCommand::ActivatePremium => {
                        if svc.auth.user_id().is_none() {
                            state.notice = Some("Please sign in to upgrade to Premium.".to_string());
                            let _ = state_tx.send(state.clone());
                            continue;
                        }
                        spawn_account(&svc.auth, &internal_tx, |auth| async move {
                            auth.activate_premium().await?;
                            Ok::<_, anyhow::Error>("Premium access activated!".to_string())
                        });
                    }
                    UiCommand::ShowHistory => {
                        state.top_listens = match svc.listens.top(svc.auth.user_id().as_deref(), TOP_LISTENS) {
                            Ok(top) => top,
                            Err(e) => {
                                warn!(error = ?e, "failed to load listens");
                                vec![]
                            }
                        };
                        let _ = state_tx.send(state.clone());
                    }
                    UiCommand::Shutdown => {
                        svc.mpv.shutdown();
                        persist_volume(&mut svc).await;
                        return Ok(());
                    }
                }
            }
            ev = media_events.recv() => {
                let Some(ev) = ev else {
                    state.playback.playing = false;
                    state.playback.loading = false;
                    state.playback.error = Some("mpv controller stopped".to_string());
                    let _ = state_tx.send(state.clone());
                    return Ok(());
                };
                svc.player.handle_event(ev);
                state.playback = svc.player.state().clone();
                let _ = state_tx.send(state.clone());
            }
            Ok(()) = session_rx.changed() => {
                let user = session_rx.borrow_and_update().as_ref().map(|s| s.user.clone());
                let uid = user.as_ref().map(|u| u.id.clone());
                if svc.favorites.user_id() != uid.as_deref() {
                    svc.favorites.switch_user(uid.clone());
                }
                svc.player.set_user(uid);
                state.premium = user.as_ref().is_some_and(User::is_premium);
                state.user = user;
                state.favorites = svc.favorites.list().to_vec();
                if state.source == ListingSource::Favorites {
                    state.listing = state.favorites.clone();
                }
                let _ = state_tx.send(state.clone());
            }
            Some(msg) = internal_rx.recv() => {
                match msg {
                    InternalMsg::ListingDone { seq, res } => {
                        if seq != listing_seq {
                            continue;
                        }
                        state.listing_loading = false;
                        match res {
                            Ok(list) => {
                                state.listing = list.map(|l| l.as_ref().clone()).unwrap_or_default();
                                state.error = None;
                            }
                            Err(e) => {
                                warn!(error = ?e, "listing failed");
                                state.listing.clear();
                                state.error = Some(LOAD_FAILED.to_string());
                            }
                        }
                        let _ = state_tx.send(state.clone());
                    }
                    InternalMsg::AccountDone(res) => {
                        state.notice = Some(match res {
                            Ok(msg) => msg,
                            Err(e) => e.to_string(),
                        });
                        let _ = state_tx.send(state.clone());
                    }
                }
            }
        }
    }
}

fn begin_listing(state: &mut ControllerState, source: ListingSource) {
    state.source = source;
    state.listing_loading = true;
    state.error = None;
}

fn spawn_account<F, Fut>(auth: &Arc<AuthProvider>, tx: &mpsc::UnboundedSender<InternalMsg>, f: F)
where
    F: FnOnce(Arc<AuthProvider>) -> Fut,
    Fut: std::future::Future<Output = Result<String>> + Send + 'static,
{
    let fut = f(auth.clone());
    let tx = tx.clone();
    tokio::spawn(async move {
        let _ = tx.send(InternalMsg::AccountDone(fut.await));
    });
}

async fn persist_volume(svc: &mut Services) {
    let volume = svc.player.state().volume;
    if (svc.config.player_volume() - volume).abs() < f32::EPSILON {
        return;
    }
    svc.config.volume = f64::from(volume);
    match tokio::task::spawn_blocking(move || AppConfig::save_volume(volume)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = ?e, "failed to save config"),
        Err(e) => warn!(error = ?e, "config save task failed"),
    }
}

fn mpv_socket_path() -> Result<PathBuf> {
    let runtime = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);

    let dir = runtime.join("freqhub");
    std::fs::create_dir_all(&dir).with_context(|| format!("Create runtime dir: {dir:?}"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("chmod 700 runtime dir: {dir:?}"))?;
    }
    Ok(dir.join("mpv.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_station;

    #[test]
    fn label_prefers_station_name_then_stream_title() {
        let mut state = ControllerState::default();
        assert_eq!(state.label_text(), "radio");

        state.playback.media_title = Some(" Artist - Song ".into());
        assert_eq!(state.label_text(), "Artist - Song");

        state.playback.station = Some(test_station("a", "Jazz FM"));
        assert_eq!(state.label_text(), "Jazz FM");
    }

    #[test]
    fn favorite_lookup_is_by_id() {
        let mut state = ControllerState::default();
        state.favorites.push(test_station("a", "A"));
        assert!(state.is_favorite("a"));
        assert!(!state.is_favorite("b"));
    }

    #[test]
    fn begin_listing_clears_previous_error() {
        let mut state = ControllerState {
            error: Some(LOAD_FAILED.into()),
            ..ControllerState::default()
        };
        begin_listing(&mut state, ListingSource::Popular);
        assert!(state.listing_loading);
        assert!(state.error.is_none());
        assert_eq!(state.source, ListingSource::Popular);
    }
}
