use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const SILENT: &str = "silent";
pub const DEFAULT_SOUND_ID: &str = "shofar_candle";

const BUNDLED: [(&str, &str); 7] = [
    ("shofar_candle", "flutter_assets/assets/sounds/Shofar-CandleAlarm.mp3"),
    ("rav_shalom_shofar", "flutter_assets/assets/sounds/RavShalomShofarDefaultlouder.mp3"),
    ("shabbat_shalom_song", "flutter_assets/assets/sounds/RYomTovShabbatShalomSong.mp3"),
    ("yomtov_default", "flutter_assets/assets/sounds/YomTov-Default.mp3"),
    ("ata_bechartanu", "flutter_assets/assets/sounds/Ata Bechartanu-YomTov.mp3"),
    ("ata_bechartanu_2", "flutter_assets/assets/sounds/Ata Bechartanu2-YomTov.mp3"),
    ("hodu_lahashem", "flutter_assets/assets/sounds/Hodu La'Hashem Ki Tov-YomTov.mp3"),
];

/// Which of the two independently configured alerts is firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    PreEvent,
    MainEvent,
}

impl AlertKind {
    pub fn from_pre_event(is_pre_event: bool) -> Self {
        if is_pre_event {
            AlertKind::PreEvent
        } else {
            AlertKind::MainEvent
        }
    }

    pub fn preference_key(self, namespace: &str) -> String {
        let key = match self {
            AlertKind::PreEvent => "pre_notification_sound",
            AlertKind::MainEvent => "candle_lighting_sound",
        };
        format!("{namespace}{key}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundAsset {
    pub id: String,
    pub path: String,
    /// True when the requested id was unknown and the default was used.
    pub substituted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoundSelection {
    Silent,
    Asset(SoundAsset),
}

#[derive(Debug, Clone)]
pub struct SoundCatalog {
    assets: BTreeMap<String, String>,
    default_id: String,
}

impl SoundCatalog {
    pub fn bundled() -> Self {
        Self {
            assets: BUNDLED
                .iter()
                .map(|(id, path)| (id.to_string(), path.to_string()))
                .collect(),
            default_id: DEFAULT_SOUND_ID.to_string(),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.assets.keys().map(String::as_str)
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn resolve(&self, id: &str) -> SoundSelection {
        if id == SILENT {
            return SoundSelection::Silent;
        }
        match self.assets.get(id) {
            Some(path) => SoundSelection::Asset(SoundAsset {
                id: id.to_string(),
                path: path.clone(),
                substituted: false,
            }),
            None => SoundSelection::Asset(SoundAsset {
                id: self.default_id.clone(),
                path: self.assets.get(&self.default_id).cloned().unwrap_or_default(),
                substituted: true,
            }),
        }
    }
}

impl Default for SoundCatalog {
    fn default() -> Self {
        Self::bundled()
    }
}
