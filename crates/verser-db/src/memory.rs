//! In-process storage backend. Same contract as [`crate::Database`], nothing
//! survives a restart.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Result, anyhow, bail};
use chrono::Utc;

use verser_types::models::{ChatMessage, Community, Membership, Role, UserStatus};

use crate::models::{NewCommunity, NewMessage, NewUser, UserRecord};
use crate::store::{CommunityStore, MembershipStore, MessageStore, UserStore, UsernameTaken};

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<i64, UserRecord>,
    communities: BTreeMap<i64, Community>,
    memberships: BTreeMap<i64, Membership>,
    messages: BTreeMap<i64, ChatMessage>,
    last_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn memberships_of(&self, user_id: i64, community_id: i64) -> impl Iterator<Item = &Membership> {
        self.memberships
            .values()
            .filter(move |m| m.user_id == user_id && m.community_id == community_id)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|e| anyhow!("memory store lock poisoned: {}", e))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|e| anyhow!("memory store lock poisoned: {}", e))
    }
}

impl UserStore for MemoryStore {
    fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        let mut state = self.write()?;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(UsernameTaken(user.username).into());
        }

        let record = UserRecord {
            id: state.next_id(),
            username: user.username,
            email: user.email,
            password: user.password,
            display_name: user.display_name,
            avatar: user.avatar,
            status: UserStatus::Offline,
            created_at: Utc::now(),
        };
        state.users.insert(record.id, record.clone());
        Ok(record)
    }

    fn get_user(&self, id: i64) -> Result<Option<UserRecord>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    fn update_user_status(&self, id: i64, status: UserStatus) -> Result<Option<UserRecord>> {
        let mut state = self.write()?;
        Ok(state.users.get_mut(&id).map(|user| {
            user.status = status;
            user.clone()
        }))
    }
}

impl MessageStore for MemoryStore {
    fn create_message(&self, message: NewMessage) -> Result<ChatMessage> {
        let mut state = self.write()?;
        if !state.users.contains_key(&message.user_id) {
            bail!("user not found: {}", message.user_id);
        }

        let msg = ChatMessage {
            id: state.next_id(),
            conversation_id: message.conversation_id,
            user_id: message.user_id,
            content: message.content,
            kind: message.kind,
            created_at: Utc::now(),
        };
        state.messages.insert(msg.id, msg.clone());
        Ok(msg)
    }

    fn list_messages(
        &self,
        conversation_id: i64,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<ChatMessage>> {
        let state = self.read()?;
        let mut page: Vec<ChatMessage> = state
            .messages
            .values()
            .rev()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| before.is_none_or(|cursor| m.id < cursor))
            .take(limit as usize)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }
}

impl CommunityStore for MemoryStore {
    fn create_community(&self, community: NewCommunity) -> Result<Community> {
        let mut state = self.write()?;
        if !state.users.contains_key(&community.creator_id) {
            bail!("user not found: {}", community.creator_id);
        }

        let community = Community {
            id: state.next_id(),
            name: community.name,
            description: community.description,
            creator_id: community.creator_id,
            created_at: Utc::now(),
        };
        state.communities.insert(community.id, community.clone());
        Ok(community)
    }

    fn get_community(&self, id: i64) -> Result<Option<Community>> {
        Ok(self.read()?.communities.get(&id).cloned())
    }

    fn list_communities(&self) -> Result<Vec<Community>> {
        Ok(self.read()?.communities.values().cloned().collect())
    }

    fn delete_community(&self, id: i64) -> Result<bool> {
        let mut state = self.write()?;
        state.memberships.retain(|_, m| m.community_id != id);
        Ok(state.communities.remove(&id).is_some())
    }
}

impl MembershipStore for MemoryStore {
    fn join(&self, user_id: i64, community_id: i64, role: Role) -> Result<Membership> {
        let mut state = self.write()?;
        if !state.users.contains_key(&user_id) {
            bail!("user not found: {}", user_id);
        }
        if !state.communities.contains_key(&community_id) {
            bail!("community not found: {}", community_id);
        }

        let membership = Membership {
            id: state.next_id(),
            user_id,
            community_id,
            role,
            joined_at: Utc::now(),
        };
        state.memberships.insert(membership.id, membership.clone());
        Ok(membership)
    }

    fn leave(&self, user_id: i64, community_id: i64) -> Result<bool> {
        let mut state = self.write()?;
        let before = state.memberships.len();
        state
            .memberships
            .retain(|_, m| !(m.user_id == user_id && m.community_id == community_id));
        Ok(state.memberships.len() < before)
    }

    fn is_member(&self, user_id: i64, community_id: i64) -> Result<bool> {
        Ok(self.read()?.memberships_of(user_id, community_id).next().is_some())
    }

    fn get_role(&self, user_id: i64, community_id: i64) -> Result<Option<Role>> {
        Ok(self
            .read()?
            .memberships_of(user_id, community_id)
            .next()
            .map(|m| m.role))
    }

    fn list_members(&self, community_id: i64) -> Result<Vec<UserRecord>> {
        let state = self.read()?;
        Ok(state
            .users
            .values()
            .filter(|u| {
                state
                    .memberships
                    .values()
                    .any(|m| m.community_id == community_id && m.user_id == u.id)
            })
            .cloned()
            .collect())
    }

    fn list_memberships(&self, community_id: i64) -> Result<Vec<Membership>> {
        Ok(self
            .read()?
            .memberships
            .values()
            .filter(|m| m.community_id == community_id)
            .cloned()
            .collect())
    }

    fn list_communities_for_user(&self, user_id: i64) -> Result<Vec<Community>> {
        let state = self.read()?;
        Ok(state
            .communities
            .values()
            .filter(|c| {
                state
                    .memberships
                    .values()
                    .any(|m| m.user_id == user_id && m.community_id == c.id)
            })
            .cloned()
            .collect())
    }

    fn update_role(
        &self,
        user_id: i64,
        community_id: i64,
        role: Role,
    ) -> Result<Option<Membership>> {
        let mut state = self.write()?;
        let mut first = None;
        for m in state
            .memberships
            .values_mut()
            .filter(|m| m.user_id == user_id && m.community_id == community_id)
        {
            m.role = role;
            if first.is_none() {
                first = Some(m.clone());
            }
        }
        Ok(first)
    }
}
