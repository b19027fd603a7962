//! Open host mode: a host of a public room authorizes everyone who adds it,
//! without adding them back.

use super::presence::PresenceBroadcaster;
use crate::message::BuddyMessage;
use crate::session_registry::Sessions;
use crate::types::ProfileId;
use tracing::info;

pub struct OpenHostMode<'a> {
    sessions: &'a mut Sessions,
    host: ProfileId,
}

impl<'a> OpenHostMode<'a> {
    pub fn new(sessions: &'a mut Sessions, host: ProfileId) -> Self {
        Self { sessions, host }
    }

    /// Authorize every online player waiting on the host.
    pub fn enable(&mut self, push_status: bool) {
        let host = self.host;
        let waiting: Vec<ProfileId> = self
            .sessions
            .all()
            .filter(|s| {
                s.logged_in
                    && s.profile_id != host
                    && s.has_added(host)
                    && !s.has_authorized(host)
            })
            .map(|s| s.profile_id)
            .collect();

        for peer in waiting {
            let (Some(peer_session), Some(host_session)) =
                (self.sessions.online(peer), self.sessions.online(host))
            else {
                continue;
            };
            let peer_needs_legacy = self.sessions.needs_legacy_auth(peer_session);
            let host_needs_legacy = self.sessions.needs_legacy_auth(host_session);

            if let Some(session) = self.sessions.lookup_mut(peer) {
                session.auth_friend_list.insert(host);
            }
            if let Some(session) = self.sessions.lookup_mut(host) {
                session.auth_friend_list.insert(peer);
            }
            info!("🏠 Open host {} authorized {}", host, peer);

            self.sessions
                .deliver(host, peer, BuddyMessage::buddy_auth(host));
            if peer_needs_legacy {
                self.sessions
                    .deliver(host, peer, BuddyMessage::legacy_auth(host));
            }
            self.sessions
                .deliver(host, host, BuddyMessage::buddy_auth(peer));
            if host_needs_legacy {
                self.sessions
                    .deliver(host, host, BuddyMessage::legacy_auth(peer));
            }

            if push_status {
                PresenceBroadcaster::new(self.sessions, host).exchange_status(host, peer);
            }
        }
    }

    /// Drop every authorization the host granted without adding the player
    /// itself. Friendships the host asked for survive.
    pub fn disable(&mut self) {
        let host = self.host;
        let granted: Vec<ProfileId> = match self.sessions.lookup(host) {
            Some(session) => session
                .auth_friend_list
                .iter()
                .copied()
                .filter(|id| !session.has_added(*id))
                .collect(),
            None => return,
        };

        for peer in granted {
            if let Some(host_session) = self.sessions.lookup_mut(host) {
                host_session.revoke_authorized(peer);
            }

            let Some(peer_session) = self.sessions.online_mut(peer) else {
                continue;
            };
            if !peer_session.has_authorized(host) {
                continue;
            }
            peer_session.revoke_authorized(host);
            info!("🏠 Open host {} revoked {}", host, peer);
            self.sessions.deliver(host, peer, BuddyMessage::offline(host));
        }
    }
}
