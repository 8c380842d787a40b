//! Inbound audio fan-out.
//!
//! Speaking-state tracking and callback delivery are independent: every
//! user frame marks its sender as speaking, muting only gates the per-user
//! callback. The speaking set is never pruned automatically; call
//! [`ReceiveDispatcher::clear_speaking_users`] to reset it.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::RwLock;

use crate::common::types::UserId;

/// Receives raw decoded PCM.
pub type AudioCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

pub trait AudioReceiveHandler: Send + Sync {
    fn can_receive_combined(&self) -> bool;

    fn can_receive_user(&self) -> bool;

    fn handle_combined_audio(&self, frame: &[u8]);

    fn handle_user_audio(&self, user_id: UserId, frame: &[u8]);
}

/// Combined-audio-only handler.
#[derive(Default)]
pub struct BasicReceiveHandler {
    callback: RwLock<Option<AudioCallback>>,
}

impl BasicReceiveHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        Self {
            callback: RwLock::new(Some(Arc::new(callback))),
        }
    }

    pub fn set_callback(&self, callback: Option<AudioCallback>) {
        *self.callback.write() = callback;
    }
}

impl AudioReceiveHandler for BasicReceiveHandler {
    fn can_receive_combined(&self) -> bool {
        self.callback.read().is_some()
    }

    fn can_receive_user(&self) -> bool {
        false
    }

    fn handle_combined_audio(&self, frame: &[u8]) {
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(frame);
        }
    }

    fn handle_user_audio(&self, _user_id: UserId, _frame: &[u8]) {}
}

#[derive(Default)]
struct DispatchState {
    combined: Option<AudioCallback>,
    per_user: HashMap<UserId, AudioCallback>,
    muted: HashSet<UserId>,
    speaking: HashSet<UserId>,
}

/// Multi-user receive handler.
#[derive(Default)]
pub struct ReceiveDispatcher {
    state: RwLock<DispatchState>,
}

impl ReceiveDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_combined_callback(&self, callback: Option<AudioCallback>) {
        self.state.write().combined = callback;
    }

    /// Replaces any callback already registered for `user_id`.
    pub fn register_user_callback<F>(&self, user_id: UserId, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.state
            .write()
            .per_user
            .insert(user_id, Arc::new(callback));
    }

    pub fn unregister_user_callback(&self, user_id: UserId) -> bool {
        self.state.write().per_user.remove(&user_id).is_some()
    }

    /// Returns `false` if the user was already muted.
    pub fn mute_user(&self, user_id: UserId) -> bool {
        self.state.write().muted.insert(user_id)
    }

    pub fn unmute_user(&self, user_id: UserId) -> bool {
        self.state.write().muted.remove(&user_id)
    }

    pub fn is_muted(&self, user_id: UserId) -> bool {
        self.state.read().muted.contains(&user_id)
    }

    pub fn muted_users(&self) -> HashSet<UserId> {
        self.state.read().muted.clone()
    }

    /// Every user that delivered audio since the last clear, muted or not.
    pub fn get_speaking_users(&self) -> HashSet<UserId> {
        self.state.read().speaking.clone()
    }

    pub fn clear_speaking_users(&self) {
        self.state.write().speaking.clear();
    }
}

impl AudioReceiveHandler for ReceiveDispatcher {
    fn can_receive_combined(&self) -> bool {
        self.state.read().combined.is_some()
    }

    fn can_receive_user(&self) -> bool {
        true
    }

    fn handle_combined_audio(&self, frame: &[u8]) {
        let callback = self.state.read().combined.clone();
        if let Some(callback) = callback {
            callback(frame);
        }
    }

    fn handle_user_audio(&self, user_id: UserId, frame: &[u8]) {
        let callback = {
            let mut state = self.state.write();
            state.speaking.insert(user_id);
            if state.muted.contains(&user_id) {
                None
            } else {
                state.per_user.get(&user_id).cloned()
            }
        };
        if let Some(callback) = callback {
            callback(frame);
        }
    }
}

/// The handler a plugin registers for a guild.
#[derive(Clone)]
pub enum ReceiveHandler {
    Basic(Arc<BasicReceiveHandler>),
    MultiUser(Arc<ReceiveDispatcher>),
}

impl From<Arc<BasicReceiveHandler>> for ReceiveHandler {
    fn from(handler: Arc<BasicReceiveHandler>) -> Self {
        Self::Basic(handler)
    }
}

impl From<Arc<ReceiveDispatcher>> for ReceiveHandler {
    fn from(handler: Arc<ReceiveDispatcher>) -> Self {
        Self::MultiUser(handler)
    }
}

impl ReceiveHandler {
    pub fn is_multi_user(&self) -> bool {
        matches!(self, Self::MultiUser(_))
    }

    pub fn as_dispatcher(&self) -> Option<&Arc<ReceiveDispatcher>> {
        match self {
            Self::MultiUser(d) => Some(d),
            Self::Basic(_) => None,
        }
    }

    fn inner(&self) -> &dyn AudioReceiveHandler {
        match self {
            Self::Basic(h) => h.as_ref(),
            Self::MultiUser(h) => h.as_ref(),
        }
    }
}

impl AudioReceiveHandler for ReceiveHandler {
    fn can_receive_combined(&self) -> bool {
        self.inner().can_receive_combined()
    }

    fn can_receive_user(&self) -> bool {
        self.inner().can_receive_user()
    }

    fn handle_combined_audio(&self, frame: &[u8]) {
        self.inner().handle_combined_audio(frame)
    }

    fn handle_user_audio(&self, user_id: UserId, frame: &[u8]) {
        self.inner().handle_user_audio(user_id, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn counter() -> (Arc<Mutex<Vec<Vec<u8>>>>, impl Fn(&[u8]) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |frame: &[u8]| sink.lock().push(frame.to_vec()))
    }

    #[test]
    fn test_mute_does_not_hide_speaking() {
        let dispatcher = ReceiveDispatcher::new();
        let user = UserId(7);
        let (seen, callback) = counter();
        dispatcher.register_user_callback(user, callback);

        assert!(dispatcher.mute_user(user));
        assert!(!dispatcher.mute_user(user));
        dispatcher.handle_user_audio(user, &[1, 2]);

        assert!(dispatcher.get_speaking_users().contains(&user));
        assert!(seen.lock().is_empty());

        assert!(dispatcher.unmute_user(user));
        dispatcher.handle_user_audio(user, &[3, 4]);
        assert_eq!(*seen.lock(), vec![vec![3, 4]]);
    }

    #[test]
    fn test_speaking_accumulates_until_cleared() {
        let dispatcher = ReceiveDispatcher::new();
        dispatcher.handle_user_audio(UserId(1), &[0, 0]);
        dispatcher.handle_user_audio(UserId(2), &[0, 0]);
        dispatcher.handle_user_audio(UserId(1), &[0, 0]);
        assert_eq!(dispatcher.get_speaking_users().len(), 2);

        dispatcher.clear_speaking_users();
        assert!(dispatcher.get_speaking_users().is_empty());
    }

    #[test]
    fn test_user_without_callback_is_tracked_only() {
        let dispatcher = ReceiveDispatcher::new();
        let (seen, callback) = counter();
        dispatcher.register_user_callback(UserId(1), callback);

        dispatcher.handle_user_audio(UserId(2), &[9, 9]);
        assert!(seen.lock().is_empty());
        assert!(dispatcher.get_speaking_users().contains(&UserId(2)));

        assert!(dispatcher.unregister_user_callback(UserId(1)));
        assert!(!dispatcher.unregister_user_callback(UserId(1)));
    }

    #[test]
    fn test_combined_callback() {
        let dispatcher = ReceiveDispatcher::new();
        assert!(!dispatcher.can_receive_combined());
        assert!(dispatcher.can_receive_user());
        dispatcher.handle_combined_audio(&[1]);

        let (seen, callback) = counter();
        dispatcher.set_combined_callback(Some(Arc::new(callback)));
        assert!(dispatcher.can_receive_combined());
        dispatcher.handle_combined_audio(&[5, 6]);
        assert_eq!(*seen.lock(), vec![vec![5, 6]]);
    }

    #[test]
    fn test_callback_may_reenter_dispatcher() {
        let dispatcher = Arc::new(ReceiveDispatcher::new());
        let inner = dispatcher.clone();
        dispatcher.register_user_callback(UserId(1), move |_| {
            inner.mute_user(UserId(1));
        });
        dispatcher.handle_user_audio(UserId(1), &[0, 1]);
        assert!(dispatcher.is_muted(UserId(1)));
        assert_eq!(dispatcher.muted_users().len(), 1);
    }

    #[test]
    fn test_basic_handler_ignores_user_audio() {
        let (seen, callback) = counter();
        let handler = ReceiveHandler::from(Arc::new(BasicReceiveHandler::new(callback)));
        assert!(!handler.is_multi_user());
        assert!(handler.can_receive_combined());
        assert!(!handler.can_receive_user());

        handler.handle_user_audio(UserId(3), &[1, 1]);
        handler.handle_combined_audio(&[2, 2]);
        assert_eq!(*seen.lock(), vec![vec![2, 2]]);
    }
}
