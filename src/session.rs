//! Per-connection friend and presence state.
//!
//! Each session owns its half of the friend graph: the ids it asked to add
//! (`friend_list`) and the ids it has granted presence to (`auth_friend_list`).
//! Sessions never reference each other directly; cross-session work goes
//! through the registry lock.

use crate::message::{BuddyMessage, Outbound};
use crate::types::{LoginInfo, ProfileId, UnitCode};
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tracing::debug;

/// Non-blocking handle to a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionLink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionLink {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    /// Create a link and the receiver the connection task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the connection task has gone away.
    pub fn send(&self, outbound: Outbound) -> bool {
        self.tx.send(outbound).is_ok()
    }
}

#[derive(Debug)]
pub struct Session {
    pub profile_id: ProfileId,
    pub game_name: String,
    pub game_code: String,
    pub unit_code: UnitCode,
    /// Ids this player asked to add.
    pub friend_list: BTreeSet<ProfileId>,
    /// Ids this player shares presence with.
    pub auth_friend_list: BTreeSet<ProfileId>,
    /// Ids whose presence has been pushed to this player. Diagnostics only.
    pub recv_status_from: BTreeSet<ProfileId>,
    pub status: String,
    pub status_code: String,
    pub stat_string: String,
    pub loc_string: String,
    pub status_set: bool,
    pub open_host: bool,
    pub restricted: bool,
    pub needs_exploit: bool,
    pub logged_in: bool,
    pub write_buffer: Vec<BuddyMessage>,
    link: Option<ConnectionLink>,
}

impl Session {
    pub fn new(info: LoginInfo, link: Option<ConnectionLink>) -> Self {
        Self {
            profile_id: info.profile_id,
            game_name: info.game_name,
            game_code: info.game_code,
            unit_code: info.unit_code,
            friend_list: BTreeSet::new(),
            auth_friend_list: BTreeSet::new(),
            recv_status_from: BTreeSet::new(),
            status: String::new(),
            status_code: String::new(),
            stat_string: String::new(),
            loc_string: String::new(),
            status_set: false,
            open_host: info.open_host,
            restricted: info.restricted,
            needs_exploit: info.needs_exploit,
            logged_in: true,
            write_buffer: Vec::new(),
            link,
        }
    }

    pub fn has_added(&self, profile_id: ProfileId) -> bool {
        self.friend_list.contains(&profile_id)
    }

    pub fn has_authorized(&self, profile_id: ProfileId) -> bool {
        self.auth_friend_list.contains(&profile_id)
    }

    /// Both halves of the friendship exist on this side.
    pub fn is_mutual_with(&self, profile_id: ProfileId) -> bool {
        self.has_added(profile_id) && self.has_authorized(profile_id)
    }

    /// Remove an authorization the caller has already seen in the list.
    ///
    /// # Panics
    /// If `profile_id` is not authorized. Callers check under the registry
    /// lock first, so a miss means the friend graph is corrupt.
    pub fn revoke_authorized(&mut self, profile_id: ProfileId) {
        if !self.auth_friend_list.remove(&profile_id) {
            panic!(
                "auth friend list of {} lost entry {} while the registry lock was held",
                self.profile_id, profile_id
            );
        }
    }

    pub fn record_status_sent(&mut self, sender: ProfileId) {
        self.recv_status_from.insert(sender);
    }

    /// Queue for the next flush of this session's connection.
    pub(crate) fn buffer(&mut self, message: BuddyMessage) {
        self.write_buffer.push(message);
        if let Some(link) = &self.link {
            if !link.send(Outbound::Flush) {
                debug!("Connection of {} is gone, message stays buffered", self.profile_id);
            }
        }
    }

    /// Hand straight to the connection; falls back to the buffer without one.
    pub(crate) fn send_now(&mut self, message: BuddyMessage) {
        match &self.link {
            Some(link) => {
                if let Err(mpsc::error::SendError(Outbound::Message(message))) =
                    link.tx.send(Outbound::Message(message))
                {
                    debug!("Connection of {} is gone, buffering message", self.profile_id);
                    self.write_buffer.push(message);
                }
            }
            None => self.write_buffer.push(message),
        }
    }

    pub(crate) fn signal(&self, outbound: Outbound) -> bool {
        self.link.as_ref().is_some_and(|link| link.send(outbound))
    }

    pub fn take_write_buffer(&mut self) -> Vec<BuddyMessage> {
        std::mem::take(&mut self.write_buffer)
    }
}
