use mcfleet_protocol::management::server::OnlinePlayers;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

static PLAYERS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"There are (?<online>\d+)/(?<max>\d+) players online:")
        .expect("Failed to compile PLAYERS_PATTERN regex")
});

/// Extracts `(online, max)` from the answer to a `list` command.
pub fn parse_player_counts(line: &str) -> Option<(u32, u32)> {
    let caps = PLAYERS_PATTERN.captures(line)?;
    let online = caps["online"].parse().ok()?;
    let max = caps["max"].parse().ok()?;
    Some((online, max))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct PlayerState {
    players: OnlinePlayers,
    // the line after a non-empty count lists the names
    expect_names: bool,
}

/// Player counters kept up to date from the server's console output.
#[derive(Default)]
pub struct PlayerTracker {
    state: Mutex<PlayerState>,
}

impl PlayerTracker {
    /// Feeds one stdout line; returns whether it carried new counts.
    pub fn observe(&self, line: &str) -> bool {
        let mut state = lock(&self.state);
        if let Some((online, max)) = parse_player_counts(line) {
            state.players.online = online;
            state.players.max = max;
            state.players.users.clear();
            state.expect_names = online > 0;
            return true;
        }

        if state.expect_names {
            state.expect_names = false;
            state.players.users = line
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect();
        }
        false
    }

    pub fn snapshot(&self) -> OnlinePlayers {
        lock(&self.state).players.clone()
    }

    pub fn reset(&self) {
        *lock(&self.state) = PlayerState::default();
    }
}

/// Bounded tail of the process output.
pub struct OutputHistory {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl OutputHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = lock(&self.lines);
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn clear(&self) {
        lock(&self.lines).clear();
    }

    /// The last `limit` lines, oldest first; everything when `limit` is `None`.
    pub fn tail(&self, limit: Option<usize>) -> Vec<String> {
        let lines = lock(&self.lines);
        let skip = limit.map_or(0, |limit| lines.len().saturating_sub(limit));
        lines.iter().skip(skip).cloned().collect()
    }
}
