//! Presence fan-out: status updates, pushes between authorized friends and
//! the offline notices sent on logout.

use super::open_host::OpenHostMode;
use crate::message::{status_payload, BuddyMessage};
use crate::session_registry::Sessions;
use crate::types::{KickReason, ProfileId, STATUS_SEARCHING_PUBLIC};
use tracing::{debug, info, warn};

/// Forwards status changes to the server discovery side.
pub trait PresenceHook: Send + Sync {
    fn status_updated(&self, profile_id: ProfileId, status_code: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoPresenceHook;

impl PresenceHook for NoPresenceHook {
    fn status_updated(&self, _profile_id: ProfileId, _status_code: &str) {}
}

/// Presence operations on behalf of `caller`, the session whose command is
/// running. Messages to the caller go out directly, all others are buffered.
pub struct PresenceBroadcaster<'a> {
    sessions: &'a mut Sessions,
    caller: ProfileId,
}

impl<'a> PresenceBroadcaster<'a> {
    pub fn new(sessions: &'a mut Sessions, caller: ProfileId) -> Self {
        Self { sessions, caller }
    }

    /// Store the caller's new status and push it to everyone it authorized.
    pub fn set_status(&mut self, code: &str, stat_string: &str, loc_string: &str) {
        let caller = self.caller;
        let Some(session) = self.sessions.online_mut(caller) else {
            return;
        };
        info!("📶 New status for {}: {}", caller, code);

        if code == STATUS_SEARCHING_PUBLIC && session.restricted {
            warn!("Restricted user {} searching for public rooms", caller);
            self.sessions.kick(caller, KickReason::RestrictedJoin);
            return;
        }

        session.status = status_payload(code, stat_string, loc_string);
        session.status_code = code.to_string();
        session.stat_string = stat_string.to_string();
        session.loc_string = loc_string.to_string();
        let first_update = !session.status_set;
        session.status_set = true;

        if first_update && session.open_host {
            OpenHostMode::new(self.sessions, caller).enable(false);
        }

        let friends: Vec<ProfileId> = self
            .sessions
            .lookup(caller)
            .map(|s| s.auth_friend_list.iter().copied().collect())
            .unwrap_or_default();
        for friend in friends {
            self.push_status(caller, friend);
        }
    }

    /// Deliver `from`'s status to `to` when both sides authorize each other.
    /// Returns whether a message was sent.
    pub fn push_status(&mut self, from: ProfileId, to: ProfileId) -> bool {
        let (Some(sender), Some(destination)) = (self.sessions.online(from), self.sessions.online(to))
        else {
            return false;
        };
        if !sender.has_authorized(to) || !destination.has_authorized(from) {
            return false;
        }

        if self.sessions.exploit_guard_blocks(sender, destination) {
            warn!(
                "Blocked message from {} to {} due to a stack overflow exploit",
                from, to
            );
            return false;
        }

        let message = BuddyMessage::status(from, &sender.status);
        if let Some(destination) = self.sessions.lookup_mut(to) {
            destination.record_status_sent(from);
        }
        self.sessions.deliver(self.caller, to, message)
    }

    /// Push in both directions; each direction is guarded on its own.
    pub fn exchange_status(&mut self, a: ProfileId, b: ProfileId) {
        self.push_status(a, b);
        self.push_status(b, a);
    }

    /// Tell every friend still authorizing `leaving` that it went offline and
    /// drop it from their lists.
    pub fn logout_broadcast(&mut self, leaving: ProfileId) {
        let friends: Vec<ProfileId> = match self.sessions.lookup(leaving) {
            Some(session) => session.auth_friend_list.iter().copied().collect(),
            None => return,
        };

        for friend in friends {
            let Some(peer) = self.sessions.online_mut(friend) else {
                continue;
            };
            if !peer.has_authorized(leaving) {
                continue;
            }
            peer.revoke_authorized(leaving);
            debug!("Sending offline status of {} to {}", leaving, friend);
            self.sessions
                .deliver(self.caller, friend, BuddyMessage::offline(leaving));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::friends::command::Command;
    use crate::message::BuddyMessageKind;
    use crate::session::ConnectionLink;
    use crate::session_registry::SessionRegistry;
    use crate::types::LoginInfo;
    use std::sync::{Arc, Mutex};

    fn befriend(registry: &SessionRegistry, a: ProfileId, b: ProfileId) {
        let mut sessions = registry.lock();
        for (x, y) in [(a, b), (b, a)] {
            let s = sessions.lookup_mut(x).unwrap();
            s.friend_list.insert(y);
            s.auth_friend_list.insert(y);
        }
    }

    fn status(code: &str, loc: &str) -> Command {
        Command::Status {
            code: code.to_string(),
            stat_string: String::new(),
            loc_string: loc.to_string(),
        }
    }

    #[test]
    fn test_status_reaches_authorized_friends_only() {
        let registry = SessionRegistry::default();
        for pid in [1, 2, 3] {
            registry
                .login(LoginInfo::new(pid, "mariokartwii", "RMCJ"), None)
                .unwrap();
        }
        befriend(&registry, 1, 2);

        registry.handle(1, status("1", "")).unwrap();

        let to_friend = registry.take_write_buffer(2);
        assert_eq!(to_friend.len(), 1);
        assert_eq!(to_friend[0].kind, BuddyMessageKind::Status);
        assert_eq!(to_friend[0].msg, "|s|1|ss||ls||ip|0|p|0|qm|0");
        assert!(registry.take_write_buffer(3).is_empty());
        assert_eq!(registry.snapshot(2).unwrap().recv_status_from, vec![1]);
    }

    #[test]
    fn test_exploit_guard() {
        let registry = SessionRegistry::default();
        registry
            .login(LoginInfo::new(1, "mariokartwii", "RMCJ"), None)
            .unwrap();
        registry
            .login(
                LoginInfo::new(2, "mariokartwii", "RMCJ").with_needs_exploit(true),
                None,
            )
            .unwrap();
        befriend(&registry, 1, 2);

        // Exactly 20 bytes still goes through
        registry.handle(1, status("1", &"a".repeat(20))).unwrap();
        assert_eq!(registry.take_write_buffer(2).len(), 1);

        registry.handle(1, status("1", &"a".repeat(21))).unwrap();
        assert!(registry.take_write_buffer(2).is_empty());

        // The unpatched side still hears about safe strings the other way
        registry.handle(2, status("1", &"b".repeat(40))).unwrap();
        assert_eq!(registry.take_write_buffer(1).len(), 1);
    }

    #[test]
    fn test_exploit_guard_ignores_other_titles() {
        let registry = SessionRegistry::default();
        registry
            .login(LoginInfo::new(1, "mariokartwii", "ABCD"), None)
            .unwrap();
        registry
            .login(
                LoginInfo::new(2, "mariokartwii", "RMCJ").with_needs_exploit(true),
                None,
            )
            .unwrap();
        befriend(&registry, 1, 2);

        registry.handle(1, status("1", &"a".repeat(64))).unwrap();
        assert_eq!(registry.take_write_buffer(2).len(), 1);
    }

    #[test]
    fn test_exchange_guards_each_direction() {
        let registry = SessionRegistry::default();
        registry
            .login(
                LoginInfo::new(1, "mariokartwii", "RMCJ").with_needs_exploit(true),
                None,
            )
            .unwrap();
        registry
            .login(LoginInfo::new(2, "mariokartwii", "RMCJ"), None)
            .unwrap();
        befriend(&registry, 1, 2);
        registry.lock().lookup_mut(2).unwrap().loc_string = "x".repeat(30);

        let mut sessions = registry.lock();
        let mut presence = PresenceBroadcaster::new(&mut sessions, 1);
        presence.exchange_status(1, 2);
        drop(sessions);

        // 2 -> 1 was blocked, 1 -> 2 still delivered
        assert!(registry.take_write_buffer(1).is_empty());
        assert_eq!(registry.take_write_buffer(2).len(), 1);
    }

    #[test]
    fn test_push_to_caller_is_immediate() {
        let registry = SessionRegistry::default();
        let (link, mut rx) = ConnectionLink::channel();
        registry
            .login(LoginInfo::new(1, "mariokartwii", "RMCJ"), Some(link))
            .unwrap();
        registry
            .login(LoginInfo::new(2, "mariokartwii", "RMCJ"), None)
            .unwrap();
        befriend(&registry, 1, 2);

        let mut sessions = registry.lock();
        assert!(PresenceBroadcaster::new(&mut sessions, 1).push_status(2, 1));
        drop(sessions);

        assert!(matches!(
            rx.try_recv().unwrap(),
            crate::message::Outbound::Message(BuddyMessage { from: 2, .. })
        ));
        assert!(registry.take_write_buffer(1).is_empty());
    }

    #[test]
    fn test_restricted_public_search_kicks_instead_of_broadcasting() {
        let registry = SessionRegistry::default();
        registry
            .login(
                LoginInfo::new(1, "mariokartwii", "RMCJ").with_restricted(true),
                None,
            )
            .unwrap();
        registry
            .login(LoginInfo::new(2, "mariokartwii", "RMCJ"), None)
            .unwrap();
        befriend(&registry, 1, 2);

        registry.handle(1, status("3", "")).unwrap();

        // Kicked without a connection: logged out on the spot
        assert!(registry.snapshot(1).is_none());
        let to_friend = registry.take_write_buffer(2);
        assert_eq!(to_friend, vec![BuddyMessage::offline(1)]);
    }

    #[test]
    fn test_presence_hook_sees_status_codes() {
        struct Recorder(Mutex<Vec<(ProfileId, String)>>);
        impl PresenceHook for Recorder {
            fn status_updated(&self, profile_id: ProfileId, status_code: &str) {
                self.0
                    .lock()
                    .unwrap()
                    .push((profile_id, status_code.to_string()));
            }
        }

        let hook = Arc::new(Recorder(Mutex::new(Vec::new())));
        let registry = SessionRegistry::with_collaborators(
            Default::default(),
            hook.clone(),
            Arc::new(crate::friend_code::NoFriendCodes),
        );
        registry
            .login(LoginInfo::new(1, "mariokartwii", "RMCJ"), None)
            .unwrap();
        registry.handle(1, status("2", "")).unwrap();

        assert_eq!(*hook.0.lock().unwrap(), vec![(1, "2".to_string())]);
    }
}
