use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

// Sorted by ASCII value so that keys compare lexicographically in generation order.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIMESTAMP_LEN: usize = 8;
const RANDOM_LEN: usize = 12;

/// A chronologically ordered, practically unique child key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PushKey(String);

impl PushKey {
    /// Wraps a key read back from the database.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PushKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates push keys: 8 characters of millisecond timestamp followed by 12 random
/// characters. Keys generated in the same millisecond increment the random part, so
/// one generator always hands out strictly increasing keys.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    last_time: Option<u64>,
    last_random: [u8; RANDOM_LEN],
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_key(&mut self) -> PushKey {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        self.next_key_at(now)
    }

    pub fn next_key_at(&mut self, now_ms: u64) -> PushKey {
        // A clock that steps backwards must not break ordering.
        let mut now = match self.last_time {
            Some(last) => now_ms.max(last),
            None => now_ms,
        };

        let same_millisecond = self.last_time == Some(now);
        if !same_millisecond || !increment(&mut self.last_random) {
            if same_millisecond {
                now += 1;
            }
            let mut rng = rand::rng();
            for slot in self.last_random.iter_mut() {
                *slot = rng.random_range(0..64u8);
            }
        }
        self.last_time = Some(now);

        let mut key = String::with_capacity(TIMESTAMP_LEN + RANDOM_LEN);
        let mut stamp = [0u8; TIMESTAMP_LEN];
        let mut remaining = now;
        for slot in stamp.iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }
        key.extend(stamp.iter().map(|&b| b as char));
        key.extend(self.last_random.iter().map(|&i| PUSH_CHARS[i as usize] as char));

        PushKey(key)
    }
}

/// Adds one to the random suffix. Returns `false` on overflow.
fn increment(random: &mut [u8; RANDOM_LEN]) -> bool {
    for slot in random.iter_mut().rev() {
        if *slot == 63 {
            *slot = 0;
        } else {
            *slot += 1;
            return true;
        }
    }
    false
}
