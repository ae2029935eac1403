use async_trait::async_trait;
use anyhow::Result;
#[cfg(not(target_arch = "wasm32"))]
use sha2::{Digest, Sha256};

#[cfg(target_arch = "wasm32")]
pub trait StorageBounds {}
#[cfg(target_arch = "wasm32")]
impl<T> StorageBounds for T {}

#[cfg(not(target_arch = "wasm32"))]
pub trait StorageBounds: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync> StorageBounds for T {}

/// String key-value store the story and chat transcripts live in.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Storage: StorageBounds {
    async fn load(&self, key: &str) -> Result<Option<String>>;
    async fn save(&self, key: &str, text: &str) -> Result<()>;
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

// --- Native Implementation ---

/// One file per key inside a data folder.
#[cfg(not(target_arch = "wasm32"))]
pub struct NativeStorage {
    root: std::path::PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl NativeStorage {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> std::path::PathBuf {
        self.root.join(format!("{}.json", file_stem(key)))
    }
}

/// Longest stem written as-is; file systems stop at 255 bytes per name.
#[cfg(not(target_arch = "wasm32"))]
const MAX_STEM: usize = 120;

/// Keys may contain anything a story title can; file names may not. Long keys
/// are cut and suffixed with a digest of the whole key. The encoder escapes
/// `~`, so a digested stem never collides with a short one.
#[cfg(not(target_arch = "wasm32"))]
fn file_stem(key: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
    if encoded.len() <= MAX_STEM {
        return encoded;
    }
    let digest = Sha256::digest(key.as_bytes());
    let suffix = hex::encode(&digest[..16]);
    // The encoding is pure ASCII, so any byte offset is a char boundary.
    format!("{}~{}", &encoded[..MAX_STEM - suffix.len() - 1], suffix)
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl Storage for NativeStorage {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        Ok(Some(tokio::fs::read_to_string(path).await?))
    }

    async fn save(&self, key: &str, text: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(key), text).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }
}

// --- Web Implementation ---

#[cfg(target_arch = "wasm32")]
use anyhow::anyhow;

/// Browser `localStorage`.
#[cfg(target_arch = "wasm32")]
pub struct WebStorage {
    store: web_sys::Storage,
}

#[cfg(target_arch = "wasm32")]
impl WebStorage {
    pub fn new() -> Result<Self> {
        let window = web_sys::window().ok_or_else(|| anyhow!("No window available"))?;
        let store = window
            .local_storage()
            .map_err(|e| anyhow!("Failed to open local storage: {:?}", e))?
            .ok_or_else(|| anyhow!("Local storage is disabled"))?;
        Ok(Self { store })
    }
}

#[cfg(target_arch = "wasm32")]
#[async_trait(?Send)]
impl Storage for WebStorage {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        self.store.get_item(key).map_err(|e| anyhow!("Get error: {:?}", e))
    }

    async fn save(&self, key: &str, text: &str) -> Result<()> {
        self.store.set_item(key, text).map_err(|e| anyhow!("Set error: {:?}", e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove_item(key).map_err(|e| anyhow!("Remove error: {:?}", e))
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    #[test]
    fn test_short_keys_keep_a_readable_name() {
        assert_eq!(file_stem("storyEncyclopedia"), "storyEncyclopedia");
        let stem = file_stem("chatMessages_A Tale / of Two");
        assert!(!stem.contains('/'));
        assert!(!stem.contains('~'));
    }

    #[test]
    fn test_long_keys_are_bounded_and_distinct() {
        let title = "重生之我在修仙世界当反派大魔王的那些年：从废柴少年到万界至尊";
        let a = file_stem(&format!("chatMessages_{}", title));
        let b = file_stem(&format!("chatMessages_{}！", title));
        assert!(a.len() <= MAX_STEM);
        assert!(a.contains('~'));
        assert_ne!(a, b);
        assert_eq!(a, file_stem(&format!("chatMessages_{}", title)));
    }

    #[tokio::test]
    async fn test_native_storage_contract() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = NativeStorage::new(dir.path().join("data"));

        assert_eq!(storage.load("missing").await?, None);
        storage.delete("missing").await?;

        storage.save("chatMessages_Old/Title", "[]").await?;
        storage.save("storyEncyclopedia", "{}").await?;
        assert_eq!(storage.load("storyEncyclopedia").await?.as_deref(), Some("{}"));
        assert_eq!(storage.load("chatMessages_Old/Title").await?.as_deref(), Some("[]"));

        storage.delete("storyEncyclopedia").await?;
        assert_eq!(storage.load("storyEncyclopedia").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_native_storage_accepts_long_non_ascii_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = NativeStorage::new(dir.path());
        let key = format!("chatMessages_{}", "修仙世界当反派大魔王".repeat(10));

        storage.save(&key, "[]").await?;
        assert_eq!(storage.load(&key).await?.as_deref(), Some("[]"));
        storage.delete(&key).await?;
        assert_eq!(storage.load(&key).await?, None);
        Ok(())
    }
}
