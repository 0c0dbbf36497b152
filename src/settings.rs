use std::collections::HashMap;

use parking_lot::RwLock;

pub const ACTIVE_CAMERA_KEY: &str = "activeCamera";
pub const ACTIVE_AVATAR_KEY: &str = "activeAvatar";
pub const ACTIVE_BACKGROUND_KEY: &str = "activeBackground";

/// Asset keys of stored backgrounds carry this prefix.
pub const BACKGROUND_PREFIX: &str = "background_";

/// String preferences shared with the configuration surfaces.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);
}

/// Blob storage for avatar and background files.
pub trait AssetStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    fn put(&self, key: &str, bytes: Vec<u8>);

    fn keys(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }
}

#[derive(Debug, Default)]
pub struct MemoryAssets {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl AssetStore for MemoryAssets {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.read().get(key).cloned()
    }

    fn put(&self, key: &str, bytes: Vec<u8>) {
        self.blobs.write().insert(key.to_string(), bytes);
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

pub fn background_key(name: &str) -> String {
    format!("{BACKGROUND_PREFIX}{name}")
}

/// Names of all stored backgrounds, without the key prefix.
pub fn list_backgrounds(assets: &dyn AssetStore) -> Vec<String> {
    assets
        .keys()
        .into_iter()
        .filter_map(|key| key.strip_prefix(BACKGROUND_PREFIX).map(str::to_string))
        .collect()
}

/// Camera, avatar and background chosen by the user. Read once when the
/// pipeline is initialised; later changes need a new initialisation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveSelection {
    pub camera: Option<String>,
    pub avatar: Option<String>,
    pub background: Option<String>,
}

impl ActiveSelection {
    pub fn load(settings: &dyn SettingsStore) -> Self {
        let read = |key: &str| settings.get(key).filter(|value| !value.is_empty());
        Self {
            camera: read(ACTIVE_CAMERA_KEY),
            avatar: read(ACTIVE_AVATAR_KEY),
            background: read(ACTIVE_BACKGROUND_KEY),
        }
    }

    pub fn background_bytes(&self, assets: &dyn AssetStore) -> Option<Vec<u8>> {
        let name = self.background.as_deref()?;
        let bytes = assets.get(&background_key(name));
        if bytes.is_none() {
            log::warn!("active background `{name}` is not stored");
        }
        bytes
    }
}
