use std::fmt;
use std::sync::Mutex;

use crate::error::DatafactError;

/// Round-robin pool of API keys shared by every task of one request.
///
/// `next()` hands out keys strictly in order (`k0, k1, …, kn-1, k0, …`);
/// which task receives which key is up to scheduling, but no key is skipped
/// or handed out twice in a row under contention.
pub struct KeyPool {
    keys: Vec<String>,
    cursor: Mutex<usize>,
}

impl KeyPool {
    /// Build a pool from a `;`-delimited list. Blank entries are dropped.
    pub fn parse(raw: &str) -> Result<Self, DatafactError> {
        let keys: Vec<String> = raw
            .split(';')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();

        if keys.is_empty() {
            return Err(DatafactError::Config(
                "gemini_api_key contains no usable keys".to_string(),
            ));
        }

        Ok(Self {
            keys,
            cursor: Mutex::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn next(&self) -> &str {
        // A poisoned lock only means another holder panicked between two
        // integer ops; the cursor is still in range.
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let idx = *cursor;
        *cursor = (idx + 1) % self.keys.len();
        &self.keys[idx]
    }
}

impl fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPool")
            .field("keys", &format_args!("[{} REDACTED]", self.keys.len()))
            .finish()
    }
}
