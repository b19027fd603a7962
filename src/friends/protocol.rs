//! Friend requests and the mutual authorization handshake.
//!
//! A friendship is two directed halves: `friend_list` records who a player
//! asked for, `auth_friend_list` records who may see their presence. Adding
//! someone who already added you (or who is an open host) fills in both
//! `auth_friend_list`s at once.

use super::presence::PresenceBroadcaster;
use crate::error::ProtocolError;
use crate::message::BuddyMessage;
use crate::session_registry::Sessions;
use crate::types::ProfileId;
use tracing::{error, info, warn};

/// Friend commands issued by `requester`.
pub struct FriendshipProtocol<'a> {
    sessions: &'a mut Sessions,
    requester: ProfileId,
}

impl<'a> FriendshipProtocol<'a> {
    pub fn new(sessions: &'a mut Sessions, requester: ProfileId) -> Self {
        Self {
            sessions,
            requester,
        }
    }

    pub fn add_friend(&mut self, target: ProfileId) -> Result<(), ProtocolError> {
        let requester = self.requester;
        if target == requester {
            error!("{} attempted to add self as friend", requester);
            return Err(ProtocolError::SelfAddNotAllowed(requester));
        }

        let Some(me) = self.sessions.online(requester) else {
            return Ok(());
        };
        let requester_open_host = me.open_host;
        let already_authorized = me.has_authorized(target);
        let requester_needs_legacy = self.sessions.needs_legacy_auth(me);
        let game_name = me.game_name.clone();
        info!(
            "Add friend: {} -> {} ({})",
            requester,
            target,
            self.sessions.friend_code_for(target, &me.game_code)
        );

        if already_authorized && !requester_open_host {
            // Clients send this constantly and ignore any error reply anyway
            info!("{} already authorized {}", requester, target);
            return Ok(());
        }

        if let Some(me) = self.sessions.lookup_mut(requester) {
            me.friend_list.insert(target);
        }

        let Some(destination) = self.sessions.online(target) else {
            info!("Destination {} is not online", target);
            return Ok(());
        };
        if destination.game_name != game_name {
            warn!(
                "Destination {} is playing {}, not {}",
                target, destination.game_name, game_name
            );
            return Ok(());
        }

        let target_added_requester = destination.has_added(requester);
        if !destination.open_host && !target_added_requester {
            info!("Destination {} has not added {} yet", target, requester);
            return Ok(());
        }
        let target_needs_legacy = self.sessions.needs_legacy_auth(destination);

        // Friendship is now mutual
        if let Some(me) = self.sessions.lookup_mut(requester) {
            me.auth_friend_list.insert(target);
        }
        if let Some(destination) = self.sessions.lookup_mut(target) {
            destination.auth_friend_list.insert(requester);
        }

        self.sessions
            .buffer_to(target, BuddyMessage::buddy_auth(requester));
        if target_needs_legacy {
            self.sessions
                .buffer_to(target, BuddyMessage::legacy_auth(requester));
        }

        // An open host requester was already told when it enabled the mode
        let notify_requester = target_added_requester && !requester_open_host;
        if notify_requester {
            self.sessions
                .send_to(requester, BuddyMessage::buddy_auth(target));
            if requester_needs_legacy {
                self.sessions
                    .send_to(requester, BuddyMessage::legacy_auth(target));
            }
        }

        let mut presence = PresenceBroadcaster::new(self.sessions, requester);
        if notify_requester {
            presence.push_status(requester, target);
        }
        presence.push_status(target, requester);

        Ok(())
    }

    /// Forget a friend. Removing someone never added is not an error.
    pub fn remove_friend(&mut self, target: ProfileId) {
        let requester = self.requester;
        let Some(me) = self.sessions.lookup_mut(requester) else {
            return;
        };
        me.friend_list.remove(&target);
        let open_host = me.open_host;
        if !open_host {
            me.auth_friend_list.remove(&target);
        }
        let game_code = me.game_code.clone();
        info!(
            "Remove friend: {} -> {} ({})",
            requester,
            target,
            self.sessions.friend_code_for(target, &game_code)
        );

        if open_host {
            return;
        }

        let still_authorized = self
            .sessions
            .online(target)
            .is_some_and(|s| s.has_authorized(requester));
        if still_authorized {
            self.sessions
                .buffer_to(target, BuddyMessage::offline(requester));
        }
    }

    /// Accept a pending request from `from`; it must already be authorized.
    pub fn authorize_friend(&mut self, from: ProfileId) -> Result<(), ProtocolError> {
        let requester = self.requester;
        let pending = self
            .sessions
            .online(requester)
            .is_some_and(|s| s.has_authorized(from));
        if !pending {
            error!("{} is not an authorized friend of {}", from, requester);
            return Err(ProtocolError::AuthorizationNotPending(from));
        }

        PresenceBroadcaster::new(self.sessions, requester).exchange_status(requester, from);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::friends::command::Command;
    use crate::message::{status_payload, BuddyMessageKind, Outbound};
    use crate::session::ConnectionLink;
    use crate::session_registry::SessionRegistry;
    use crate::types::{LoginInfo, UnitCode};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<BuddyMessage> {
        let mut messages = Vec::new();
        while let Ok(outbound) = rx.try_recv() {
            if let Outbound::Message(message) = outbound {
                messages.push(message);
            }
        }
        messages
    }

    fn add(registry: &SessionRegistry, requester: ProfileId, target: ProfileId) -> Result<(), ProtocolError> {
        let mut sessions = registry.lock();
        FriendshipProtocol::new(&mut sessions, requester).add_friend(target)
    }

    #[test]
    fn test_pending_request_notifies_nobody() {
        let registry = SessionRegistry::default();
        for pid in [1, 2] {
            registry
                .login(LoginInfo::new(pid, "mariokartwii", "RMCJ"), None)
                .unwrap();
        }

        add(&registry, 1, 2).unwrap();
        add(&registry, 1, 2).unwrap();

        let me = registry.snapshot(1).unwrap();
        assert_eq!(me.friend_list, vec![2]);
        assert!(me.auth_friend_list.is_empty());
        assert!(registry.take_write_buffer(1).is_empty());
        assert!(registry.take_write_buffer(2).is_empty());
    }

    #[test]
    fn test_offline_target_recorded() {
        let registry = SessionRegistry::default();
        registry
            .login(LoginInfo::new(1, "mariokartwii", "RMCJ"), None)
            .unwrap();

        add(&registry, 1, 99).unwrap();
        assert_eq!(registry.snapshot(1).unwrap().friend_list, vec![99]);
    }

    #[test]
    fn test_cross_title_request_not_granted() {
        let registry = SessionRegistry::default();
        registry
            .login(LoginInfo::new(1, "mariokartwii", "RMCJ"), None)
            .unwrap();
        registry
            .login(LoginInfo::new(2, "smashbrosxwii", "RSBE").with_open_host(true), None)
            .unwrap();

        add(&registry, 1, 2).unwrap();
        assert!(registry.snapshot(1).unwrap().auth_friend_list.is_empty());
        assert!(registry.snapshot(2).unwrap().auth_friend_list.is_empty());
    }

    #[test]
    fn test_mutual_add_sends_legacy_auth_to_ds_titles() {
        let registry = SessionRegistry::default();
        let (link, mut rx) = ConnectionLink::channel();
        registry
            .login(
                LoginInfo::new(1, "mariokartds", "AMCE").with_unit_code(UnitCode::Ds),
                Some(link),
            )
            .unwrap();
        registry
            .login(
                LoginInfo::new(2, "mariokartds", "AMCE").with_unit_code(UnitCode::Ds),
                None,
            )
            .unwrap();

        add(&registry, 2, 1).unwrap();
        add(&registry, 1, 2).unwrap();

        let kinds: Vec<_> = registry
            .take_write_buffer(2)
            .into_iter()
            .map(|m| m.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                BuddyMessageKind::BuddyAuth,
                BuddyMessageKind::LegacyAuth,
                BuddyMessageKind::Status
            ]
        );

        let immediate: Vec<_> = drain(&mut rx).into_iter().map(|m| (m.kind, m.from)).collect();
        assert_eq!(
            immediate,
            vec![
                (BuddyMessageKind::BuddyAuth, 2),
                (BuddyMessageKind::LegacyAuth, 2),
                (BuddyMessageKind::Status, 2)
            ]
        );
    }

    #[test]
    fn test_remove_friend_sends_offline_to_authorizing_peer() {
        let registry = SessionRegistry::default();
        for pid in [1, 2] {
            registry
                .login(LoginInfo::new(pid, "mariokartwii", "RMCJ"), None)
                .unwrap();
        }
        add(&registry, 1, 2).unwrap();
        add(&registry, 2, 1).unwrap();
        registry.take_write_buffer(1);
        registry.take_write_buffer(2);

        {
            let mut sessions = registry.lock();
            FriendshipProtocol::new(&mut sessions, 1).remove_friend(2);
        }

        let me = registry.snapshot(1).unwrap();
        assert!(me.friend_list.is_empty());
        assert!(me.auth_friend_list.is_empty());
        assert_eq!(registry.take_write_buffer(2), vec![BuddyMessage::offline(1)]);

        // Second removal is silent
        {
            let mut sessions = registry.lock();
            FriendshipProtocol::new(&mut sessions, 1).remove_friend(2);
        }
        assert!(registry.take_write_buffer(2).is_empty());
    }

    #[test]
    fn test_open_host_remove_keeps_authorization() {
        let registry = SessionRegistry::default();
        registry
            .login(LoginInfo::new(1, "mariokartwii", "RMCJ").with_open_host(true), None)
            .unwrap();
        registry
            .login(LoginInfo::new(2, "mariokartwii", "RMCJ"), None)
            .unwrap();
        add(&registry, 2, 1).unwrap();
        registry.take_write_buffer(1);
        registry.take_write_buffer(2);

        {
            let mut sessions = registry.lock();
            FriendshipProtocol::new(&mut sessions, 1).remove_friend(2);
        }

        assert_eq!(registry.snapshot(1).unwrap().auth_friend_list, vec![2]);
        assert!(registry.take_write_buffer(2).is_empty());
    }

    fn befriend_with_status(registry: &SessionRegistry, a: ProfileId, b: ProfileId) {
        let mut sessions = registry.lock();
        for (x, y) in [(a, b), (b, a)] {
            let s = sessions.lookup_mut(x).unwrap();
            s.friend_list.insert(y);
            s.auth_friend_list.insert(y);
            s.status = status_payload("1", "s", &s.loc_string);
            s.status_set = true;
        }
    }

    #[test]
    fn test_authorize_exchanges_status_both_ways() {
        let registry = SessionRegistry::default();
        let (link, mut rx) = ConnectionLink::channel();
        registry
            .login(LoginInfo::new(1, "mariokartwii", "RMCJ"), Some(link))
            .unwrap();
        registry
            .login(LoginInfo::new(2, "mariokartwii", "RMCJ"), None)
            .unwrap();
        befriend_with_status(&registry, 1, 2);

        registry
            .handle(1, Command::AuthAdd { from_profile_id: 2 })
            .unwrap();

        // The caller hears from 2 directly, 2 gets the caller's status buffered
        assert_eq!(
            drain(&mut rx),
            vec![BuddyMessage::status(2, "|s|1|ss|s|ls||ip|0|p|0|qm|0")]
        );
        assert_eq!(
            registry.take_write_buffer(2),
            vec![BuddyMessage::status(1, "|s|1|ss|s|ls||ip|0|p|0|qm|0")]
        );
        assert_eq!(registry.snapshot(1).unwrap().recv_status_from, vec![2]);
        assert_eq!(registry.snapshot(2).unwrap().recv_status_from, vec![1]);
    }

    #[test]
    fn test_authorize_exchange_guards_each_direction() {
        let registry = SessionRegistry::default();
        let (link, mut rx) = ConnectionLink::channel();
        registry
            .login(
                LoginInfo::new(1, "mariokartwii", "RMCJ").with_needs_exploit(true),
                Some(link),
            )
            .unwrap();
        registry
            .login(LoginInfo::new(2, "mariokartwii", "RMCJ"), None)
            .unwrap();
        registry.lock().lookup_mut(2).unwrap().loc_string = "x".repeat(21);
        befriend_with_status(&registry, 1, 2);

        registry
            .handle(1, Command::AuthAdd { from_profile_id: 2 })
            .unwrap();

        // 2 -> 1 carries a long locstring to a vulnerable client
        assert!(drain(&mut rx).is_empty());
        let to_peer = registry.take_write_buffer(2);
        assert_eq!(to_peer.len(), 1);
        assert_eq!((to_peer[0].kind, to_peer[0].from), (BuddyMessageKind::Status, 1));
    }

    #[test]
    fn test_open_host_readd_notifies_target_only() {
        let registry = SessionRegistry::default();
        let (link, mut rx) = ConnectionLink::channel();
        registry
            .login(
                LoginInfo::new(100, "mariokartwii", "RMCJ").with_open_host(true),
                Some(link),
            )
            .unwrap();
        registry
            .login(LoginInfo::new(200, "mariokartwii", "RMCJ"), None)
            .unwrap();
        add(&registry, 200, 100).unwrap();
        assert!(registry.snapshot(100).unwrap().friend_list.is_empty());
        registry.take_write_buffer(100);
        registry.take_write_buffer(200);
        drain(&mut rx);

        // Already authorized, but an open host still goes through
        add(&registry, 100, 200).unwrap();

        assert_eq!(registry.snapshot(100).unwrap().friend_list, vec![200]);
        assert_eq!(registry.snapshot(100).unwrap().auth_friend_list, vec![200]);
        assert_eq!(
            registry.take_write_buffer(200),
            vec![BuddyMessage::buddy_auth(100)]
        );
        let immediate: Vec<_> = drain(&mut rx).into_iter().map(|m| (m.kind, m.from)).collect();
        assert_eq!(immediate, vec![(BuddyMessageKind::Status, 200)]);
        assert!(registry.take_write_buffer(100).is_empty());
    }

    #[test]
    fn test_authorize_requires_pending_grant() {
        let registry = SessionRegistry::default();
        for pid in [1, 2] {
            registry
                .login(LoginInfo::new(pid, "mariokartwii", "RMCJ"), None)
                .unwrap();
        }

        let mut sessions = registry.lock();
        let err = FriendshipProtocol::new(&mut sessions, 1)
            .authorize_friend(2)
            .unwrap_err();
        assert_eq!(err, ProtocolError::AuthorizationNotPending(2));
    }
}
