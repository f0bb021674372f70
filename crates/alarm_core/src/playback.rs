use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    error::PlatformError,
    platform::{AudioAttributes, AudioBackend, MediaPlayer, PlaybackEvent, PlaybackListener},
    sound::SoundAsset,
};

struct ActivePlayer {
    generation: u64,
    asset_id: String,
    player: Arc<dyn MediaPlayer>,
}

type Slot = Mutex<Option<ActivePlayer>>;

/// Holds the single alert sound this process may be playing.
///
/// Starting a sound releases the previous player first. Playback is not
/// awaited: the player releases itself when it completes or fails.
pub struct AlertPlayer {
    backend: Arc<dyn AudioBackend>,
    current: Arc<Slot>,
    generation: AtomicU64,
}

impl AlertPlayer {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            current: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn play(&self, asset: &SoundAsset) -> Result<(), PlatformError> {
        self.stop();

        let player = self.backend.open(&asset.path, AudioAttributes::ALARM)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.current.lock() = Some(ActivePlayer {
            generation,
            asset_id: asset.id.clone(),
            player: player.clone(),
        });

        let listener = playback_listener(
            Arc::downgrade(&self.current),
            generation,
            Arc::downgrade(&player),
        );
        if let Err(err) = player.prepare_async(listener) {
            finish(&Arc::downgrade(&self.current), generation, &player);
            return Err(err);
        }
        debug!(asset = %asset.id, "player preparing asynchronously");
        Ok(())
    }

    /// Releases the active player, if any.
    pub fn stop(&self) {
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            debug!(asset = %previous.asset_id, "releasing previous player");
            previous.player.release();
        }
    }

    pub fn current_asset(&self) -> Option<String> {
        self.current
            .lock()
            .as_ref()
            .map(|active| active.asset_id.clone())
    }
}

fn playback_listener(
    slot: Weak<Slot>,
    generation: u64,
    player: Weak<dyn MediaPlayer>,
) -> PlaybackListener {
    Arc::new(move |event: PlaybackEvent| {
        let Some(active) = player.upgrade() else {
            return;
        };
        match event {
            PlaybackEvent::Prepared => {
                debug!("player prepared, starting playback");
                if let Err(err) = active.start() {
                    warn!(%err, "failed to start playback");
                    finish(&slot, generation, &active);
                }
            }
            PlaybackEvent::Completed => {
                debug!("playback completed");
                finish(&slot, generation, &active);
            }
            PlaybackEvent::Error { what, extra } => {
                error!(what, extra, "media player error");
                finish(&slot, generation, &active);
            }
        }
    })
}

fn finish(slot: &Weak<Slot>, generation: u64, player: &Arc<dyn MediaPlayer>) {
    player.release();
    if let Some(slot) = slot.upgrade() {
        let mut current = slot.lock();
        if current
            .as_ref()
            .is_some_and(|active| active.generation == generation)
        {
            *current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryAudio;
    use crate::sound::{SoundCatalog, SoundSelection};

    fn asset(id: &str) -> SoundAsset {
        match SoundCatalog::bundled().resolve(id) {
            SoundSelection::Asset(asset) => asset,
            SoundSelection::Silent => panic!("expected asset"),
        }
    }

    #[test]
    fn starting_a_sound_releases_the_previous_player() {
        let audio = Arc::new(InMemoryAudio::new());
        let player = AlertPlayer::new(audio.clone());

        player.play(&asset("shofar_candle")).unwrap();
        player.play(&asset("yomtov_default")).unwrap();

        let players = audio.players();
        assert_eq!(players.len(), 2);
        assert!(players[0].is_released());
        assert!(players[1].is_started());
        assert!(!players[1].is_released());
        assert_eq!(player.current_asset().as_deref(), Some("yomtov_default"));
    }

    #[test]
    fn completion_and_errors_release_the_player() {
        let audio = Arc::new(InMemoryAudio::new());
        let player = AlertPlayer::new(audio.clone());

        player.play(&asset("shofar_candle")).unwrap();
        audio.last_player().unwrap().emit(PlaybackEvent::Completed);
        assert!(audio.last_player().unwrap().is_released());
        assert!(player.current_asset().is_none());

        player.play(&asset("hodu_lahashem")).unwrap();
        audio
            .last_player()
            .unwrap()
            .emit(PlaybackEvent::Error { what: 1, extra: -1004 });
        assert!(audio.last_player().unwrap().is_released());
        assert!(player.current_asset().is_none());
    }

    #[test]
    fn stale_completion_does_not_clear_newer_player() {
        let audio = Arc::new(InMemoryAudio::new());
        let player = AlertPlayer::new(audio.clone());

        player.play(&asset("shofar_candle")).unwrap();
        let first = audio.last_player().unwrap();
        player.play(&asset("yomtov_default")).unwrap();
        first.emit(PlaybackEvent::Completed);

        assert_eq!(player.current_asset().as_deref(), Some("yomtov_default"));
        assert_eq!(first.release_count(), 1);
    }

    #[test]
    fn missing_asset_is_reported() {
        let audio = Arc::new(InMemoryAudio::new());
        let shofar = asset("shofar_candle");
        audio.mark_missing(&shofar.path);
        let player = AlertPlayer::new(audio.clone());
        assert!(matches!(player.play(&shofar), Err(PlatformError::Resource(_))));
        assert!(player.current_asset().is_none());
    }
}
