//! Registry of logged-in sessions.
//!
//! One `parking_lot::Mutex` guards every session and therefore the whole
//! friend graph. Friend and presence operations routinely read one session
//! and write another, so they run start to finish under a single acquisition
//! of this lock. Nothing performs I/O while it is held: peers get messages
//! through their write buffer plus a non-blocking wake-up, and the caller's
//! own connection gets an unbounded queue push.

use crate::config::PresenceConfig;
use crate::error::RegistryError;
use crate::friend_code::{self, FriendCodeSource, NoFriendCodes};
use crate::friends::command::{Command, RawCommand};
use crate::friends::open_host::OpenHostMode;
use crate::friends::presence::{NoPresenceHook, PresenceBroadcaster, PresenceHook};
use crate::friends::protocol::FriendshipProtocol;
use crate::message::{BuddyMessage, Outbound};
use crate::session::{ConnectionLink, Session};
use crate::types::{KickReason, LoginInfo, ProfileId};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// The locked view of every session. Only reachable through
/// [`SessionRegistry::lock`], so holding one means holding the registry lock.
pub struct Sessions {
    sessions: HashMap<ProfileId, Session>,
    policy: PresenceConfig,
    friend_codes: Arc<dyn FriendCodeSource>,
}

impl Sessions {
    fn new(policy: PresenceConfig, friend_codes: Arc<dyn FriendCodeSource>) -> Self {
        Self {
            sessions: HashMap::new(),
            policy,
            friend_codes,
        }
    }

    pub fn lookup(&self, profile_id: ProfileId) -> Option<&Session> {
        self.sessions.get(&profile_id)
    }

    pub fn lookup_mut(&mut self, profile_id: ProfileId) -> Option<&mut Session> {
        self.sessions.get_mut(&profile_id)
    }

    /// Session that may take part in friend and presence traffic.
    pub fn online(&self, profile_id: ProfileId) -> Option<&Session> {
        self.sessions.get(&profile_id).filter(|s| s.logged_in)
    }

    pub fn online_mut(&mut self, profile_id: ProfileId) -> Option<&mut Session> {
        self.sessions.get_mut(&profile_id).filter(|s| s.logged_in)
    }

    pub fn all(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn policy(&self) -> &PresenceConfig {
        &self.policy
    }

    /// Friend code of `profile_id` in the caller's title, for log lines.
    pub(crate) fn friend_code_for(&self, profile_id: ProfileId, game_code: &str) -> String {
        friend_code::describe(self.friend_codes.as_ref(), profile_id, game_code)
    }

    /// DS titles and a few Wii titles only react to the plain text message.
    pub(crate) fn needs_legacy_auth(&self, session: &Session) -> bool {
        session.unit_code.is_ds_family()
            || self
                .policy
                .legacy_auth_games
                .iter()
                .any(|game| *game == session.game_name)
    }

    /// A long locstring from the vulnerable title overflows a stack buffer on
    /// unpatched clients of that title.
    pub(crate) fn exploit_guard_blocks(&self, sender: &Session, destination: &Session) -> bool {
        destination.needs_exploit
            && sender
                .game_code
                .starts_with(self.policy.vulnerable_game_prefix.as_str())
            && sender.loc_string.len() > self.policy.max_locstring_len
    }

    /// Queue in the session's write buffer and wake its connection.
    pub(crate) fn buffer_to(&mut self, to: ProfileId, message: BuddyMessage) -> bool {
        match self.sessions.get_mut(&to) {
            Some(session) => {
                debug!("Buffered bm {:?} from {} to {}", message.kind, message.from, to);
                session.buffer(message);
                true
            }
            None => false,
        }
    }

    /// Write straight to the session's connection.
    pub(crate) fn send_to(&mut self, to: ProfileId, message: BuddyMessage) -> bool {
        match self.sessions.get_mut(&to) {
            Some(session) => {
                debug!("Sent bm {:?} from {} to {}", message.kind, message.from, to);
                session.send_now(message);
                true
            }
            None => false,
        }
    }

    /// Messages for the session whose command is running go out directly,
    /// everyone else's are buffered.
    pub(crate) fn deliver(&mut self, caller: ProfileId, to: ProfileId, message: BuddyMessage) -> bool {
        if caller == to {
            self.send_to(to, message)
        } else {
            self.buffer_to(to, message)
        }
    }

    fn insert(&mut self, info: LoginInfo, link: Option<ConnectionLink>) -> Result<(), RegistryError> {
        if self.sessions.contains_key(&info.profile_id) {
            return Err(RegistryError::AlreadyLoggedIn(info.profile_id));
        }
        let profile_id = info.profile_id;
        self.sessions.insert(profile_id, Session::new(info, link));
        Ok(())
    }

    /// Notify and prune every peer, then drop the session.
    pub(crate) fn logout(&mut self, profile_id: ProfileId) -> bool {
        if !self.sessions.contains_key(&profile_id) {
            return false;
        }

        PresenceBroadcaster::new(self, profile_id).logout_broadcast(profile_id);

        // Grants this session never reciprocated (e.g. after a one-sided
        // removal) still point at it; they must not outlive it.
        for session in self.sessions.values_mut() {
            if session.profile_id != profile_id && session.auth_friend_list.remove(&profile_id) {
                debug!(
                    "Pruned stale authorization of {} held by {}",
                    profile_id, session.profile_id
                );
            }
        }

        self.sessions.remove(&profile_id);
        info!("👋 {} logged out ({} online)", profile_id, self.sessions.len());
        true
    }

    /// Mark the session as leaving and tell its connection to close.
    pub(crate) fn kick(&mut self, profile_id: ProfileId, reason: KickReason) -> bool {
        let Some(session) = self.sessions.get_mut(&profile_id).filter(|s| s.logged_in) else {
            return false;
        };

        session.logged_in = false;
        info!("🚫 Kicking {} ({})", profile_id, reason);

        if !session.signal(Outbound::Kick(reason)) {
            // Nobody left to run the logout for this session.
            self.logout(profile_id);
        }
        true
    }
}

/// Point-in-time copy of one session for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub profile_id: ProfileId,
    pub game_name: String,
    pub friend_list: Vec<ProfileId>,
    pub auth_friend_list: Vec<ProfileId>,
    pub recv_status_from: Vec<ProfileId>,
    pub status: String,
    pub loc_string: String,
    pub open_host: bool,
    pub logged_in: bool,
    pub buffered: usize,
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        Self {
            profile_id: session.profile_id,
            game_name: session.game_name.clone(),
            friend_list: session.friend_list.iter().copied().collect(),
            auth_friend_list: session.auth_friend_list.iter().copied().collect(),
            recv_status_from: session.recv_status_from.iter().copied().collect(),
            status: session.status.clone(),
            loc_string: session.loc_string.clone(),
            open_host: session.open_host,
            logged_in: session.logged_in,
            buffered: session.write_buffer.len(),
        }
    }
}

/// Authoritative "who is online", plus the entry points the transport calls.
pub struct SessionRegistry {
    sessions: Mutex<Sessions>,
    presence_hook: Arc<dyn PresenceHook>,
}

impl SessionRegistry {
    pub fn new(policy: PresenceConfig) -> Self {
        Self::with_collaborators(policy, Arc::new(NoPresenceHook), Arc::new(NoFriendCodes))
    }

    pub fn with_collaborators(
        policy: PresenceConfig,
        presence_hook: Arc<dyn PresenceHook>,
        friend_codes: Arc<dyn FriendCodeSource>,
    ) -> Self {
        Self {
            sessions: Mutex::new(Sessions::new(policy, friend_codes)),
            presence_hook,
        }
    }

    /// Take the registry lock. Keep the guard for the whole read-modify-write.
    pub fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock()
    }

    pub fn login(&self, info: LoginInfo, link: Option<ConnectionLink>) -> Result<(), RegistryError> {
        let profile_id = info.profile_id;
        let game_name = info.game_name.clone();
        let mut sessions = self.lock();
        sessions.insert(info, link)?;
        info!(
            "🎮 {} logged in to {} ({} online)",
            profile_id,
            game_name,
            sessions.len()
        );
        Ok(())
    }

    /// Returns false if the profile had no session.
    pub fn logout(&self, profile_id: ProfileId) -> bool {
        self.lock().logout(profile_id)
    }

    /// Run one client command for `profile_id`.
    pub fn handle(&self, profile_id: ProfileId, command: Command) -> Result<(), RegistryError> {
        if let Command::Status { code, .. } = &command {
            if self.lock().online(profile_id).is_none() {
                return Err(RegistryError::NotLoggedIn(profile_id));
            }
            self.presence_hook.status_updated(profile_id, code);
        }

        let mut sessions = self.lock();
        if sessions.online(profile_id).is_none() {
            return Err(RegistryError::NotLoggedIn(profile_id));
        }

        match command {
            Command::AddFriend { new_profile_id } => {
                FriendshipProtocol::new(&mut sessions, profile_id).add_friend(new_profile_id)?
            }
            Command::DelFriend { del_profile_id } => {
                FriendshipProtocol::new(&mut sessions, profile_id).remove_friend(del_profile_id)
            }
            Command::AuthAdd { from_profile_id } => {
                FriendshipProtocol::new(&mut sessions, profile_id)
                    .authorize_friend(from_profile_id)?
            }
            Command::Status {
                code,
                stat_string,
                loc_string,
            } => PresenceBroadcaster::new(&mut sessions, profile_id).set_status(
                &code,
                &stat_string,
                &loc_string,
            ),
        }
        Ok(())
    }

    /// Parse and run a raw command in one step.
    pub fn handle_raw(
        &self,
        profile_id: ProfileId,
        raw: &RawCommand,
    ) -> Result<(), RegistryError> {
        let command = Command::parse(raw)?;
        self.handle(profile_id, command)
    }

    /// Switch open host mode for a logged-in session.
    pub fn set_open_host(&self, profile_id: ProfileId, enabled: bool) -> Result<(), RegistryError> {
        let mut sessions = self.lock();
        let session = sessions
            .online_mut(profile_id)
            .ok_or(RegistryError::NotLoggedIn(profile_id))?;

        if session.open_host == enabled {
            return Ok(());
        }
        session.open_host = enabled;
        let status_set = session.status_set;
        info!("🏠 Open host {} for {}", if enabled { "enabled" } else { "disabled" }, profile_id);

        let mut mode = OpenHostMode::new(&mut sessions, profile_id);
        if !enabled {
            mode.disable();
        } else if status_set {
            mode.enable(true);
        }
        Ok(())
    }

    /// Forcibly disconnect a player. Returns false if they are not online.
    pub fn kick_player(&self, profile_id: ProfileId, reason: KickReason) -> bool {
        self.lock().kick(profile_id, reason)
    }

    /// Drain the messages waiting for `profile_id`'s connection.
    pub fn take_write_buffer(&self, profile_id: ProfileId) -> Vec<BuddyMessage> {
        self.lock()
            .lookup_mut(profile_id)
            .map(Session::take_write_buffer)
            .unwrap_or_default()
    }

    pub fn online_count(&self) -> usize {
        self.lock().all().filter(|s| s.logged_in).count()
    }

    pub fn snapshot(&self, profile_id: ProfileId) -> Option<SessionSnapshot> {
        self.lock().lookup(profile_id).map(SessionSnapshot::from)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(PresenceConfig::default())
    }
}
