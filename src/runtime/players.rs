//! Online players held in memory, with the most recent notices they were sent.

use log::info;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::collaborators::PlayerDirectory;
use crate::types::{Notice, PlayerId, WorldPos};

/// Notices remembered across all players before the oldest is dropped.
pub const NOTICE_HISTORY: usize = 256;

#[derive(Debug, Default)]
struct Roster {
    online: BTreeMap<PlayerId, WorldPos>,
    notices: VecDeque<(PlayerId, Notice)>,
    sent: u64,
}

#[derive(Debug, Default)]
pub struct PlayerRoster {
    inner: Mutex<Roster>,
}

impl PlayerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Roster> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `player` online at `position` (or move them there).
    pub fn place(&self, player: PlayerId, position: WorldPos) {
        self.lock().online.insert(player, position);
    }

    pub fn disconnect(&self, player: PlayerId) {
        self.lock().online.remove(&player);
    }

    /// Recent notices, oldest first.
    pub fn notices(&self) -> Vec<(PlayerId, Notice)> {
        self.lock().notices.iter().cloned().collect()
    }

    /// Notices sent over the roster's lifetime.
    pub fn notice_count(&self) -> u64 {
        self.lock().sent
    }

    pub fn notices_for(&self, player: PlayerId) -> Vec<Notice> {
        self.lock().notices.iter().filter(|(to, _)| *to == player).map(|(_, notice)| notice.clone()).collect()
    }
}

impl PlayerDirectory for PlayerRoster {
    fn locate(&self, player: PlayerId) -> Option<WorldPos> {
        self.lock().online.get(&player).cloned()
    }

    fn notify(&self, player: PlayerId, notice: Notice) {
        info!("Notice to {player}: {notice:?}");
        let mut roster = self.lock();
        if roster.notices.len() == NOTICE_HISTORY {
            roster.notices.pop_front();
        }
        roster.notices.push_back((player, notice));
        roster.sent += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RadioId;

    #[test]
    fn disconnect_hides_player() {
        let roster = PlayerRoster::new();
        roster.place(PlayerId(1), WorldPos::new("w", 1.0, 64.0, 1.0));
        assert!(roster.locate(PlayerId(1)).is_some());
        roster.disconnect(PlayerId(1));
        assert!(roster.locate(PlayerId(1)).is_none());
    }

    #[test]
    fn notices_are_kept_per_player() {
        let roster = PlayerRoster::new();
        roster.notify(PlayerId(1), Notice::ChannelBusy { channel: 3 });
        roster.notify(PlayerId(2), Notice::NoAntenna { radio: RadioId(4) });
        assert_eq!(roster.notices_for(PlayerId(1)), vec![Notice::ChannelBusy { channel: 3 }]);
        assert_eq!(roster.notices().len(), 2);
        assert_eq!(roster.notice_count(), 2);
    }

    #[test]
    fn notice_history_is_bounded() {
        let roster = PlayerRoster::new();
        for channel in 0..(NOTICE_HISTORY as u16 + 5) {
            roster.notify(PlayerId(1), Notice::ChannelBusy { channel });
        }

        let notices = roster.notices();
        assert_eq!(notices.len(), NOTICE_HISTORY);
        assert_eq!(notices[0], (PlayerId(1), Notice::ChannelBusy { channel: 5 }));
        assert_eq!(roster.notice_count(), NOTICE_HISTORY as u64 + 5);
    }
}
