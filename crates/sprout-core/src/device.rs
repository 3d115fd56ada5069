//! Stable per-installation device identifier

use rand::Rng;
use tokio::sync::OnceCell;

use crate::db::KeyValueStore;
use crate::error::Result;

/// Storage key of the device identifier
pub const DEVICE_ID_KEY: &str = "sprout.device.id";

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 10;

/// Lazily generated, persisted device identifier.
///
/// The value is opaque to the client; only the remote store interprets it.
pub struct DeviceIdentity<S> {
    store: S,
    cached: OnceCell<String>,
}

impl<S: KeyValueStore> DeviceIdentity<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cached: OnceCell::new(),
        }
    }

    /// Return the persisted identifier, generating and storing one on first use.
    pub async fn device_id(&self) -> Result<String> {
        let id = self
            .cached
            .get_or_try_init(|| async {
                if let Some(existing) = self.store.get(DEVICE_ID_KEY).await? {
                    let existing = existing.trim();
                    if !existing.is_empty() {
                        return Ok::<_, crate::Error>(existing.to_string());
                    }
                }

                let generated = generate_device_id(crate::util::unix_millis_now(), &mut rand::rng());
                self.store.set(DEVICE_ID_KEY, &generated).await?;
                tracing::info!(
                    device = crate::util::fingerprint(&generated),
                    "Generated new device identifier"
                );
                Ok(generated)
            })
            .await?;
        Ok(id.clone())
    }
}

/// `<unix_ms>-<10 base36 chars>`
fn generate_device_id(now_ms: i64, rng: &mut impl Rng) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())]))
        .collect();
    format!("{now_ms}-{suffix}")
}
