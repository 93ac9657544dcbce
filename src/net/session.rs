use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::{mapref::entry::Entry, DashMap};
use log::debug;
use uuid::Uuid;

use crate::{
    model::{Vec2f, Vec3d},
    net::endpoint::Endpoint,
};

#[derive(Debug, Clone)]
pub struct Session {
    pub entity_id: u32,
    pub uuid: Uuid,
    pub username: String,
    pub position: Vec3d,
    pub rotation: Vec2f,
    pub velocity: Vec3d,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Join {
    New(u32),
    Existing(u32),
    Full,
}

/// Which entity each connected peer controls, keyed by peer endpoint.
pub struct SessionTable {
    sessions: DashMap<Endpoint, Session>,
    max_connections: usize,
    id_counter: AtomicU32,
}

impl SessionTable {
    pub fn new(max_connections: usize) -> SessionTable {
        SessionTable {
            sessions: DashMap::new(),
            max_connections,
            id_counter: AtomicU32::new(1),
        }
    }

    pub fn new_id(&self) -> u32 {
        self.id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// A peer that is already known keeps its entity.
    pub fn join(&self, endpoint: Endpoint, username: &str, spawn: Vec3d) -> Join {
        let len = self.sessions.len();
        match self.sessions.entry(endpoint) {
            Entry::Occupied(entry) => Join::Existing(entry.get().entity_id),
            Entry::Vacant(entry) => {
                if len >= self.max_connections {
                    return Join::Full;
                }
                let entity_id = self.new_id();
                debug!("{} joined as entity {}", endpoint, entity_id);
                entry.insert(Session {
                    entity_id,
                    uuid: Uuid::new_v3(&Uuid::NAMESPACE_OID, username.as_bytes()),
                    username: username.to_string(),
                    position: spawn,
                    rotation: Default::default(),
                    velocity: Default::default(),
                });
                Join::New(entity_id)
            }
        }
    }

    pub fn get(&self, endpoint: &Endpoint) -> Option<Session> {
        self.sessions.get(endpoint).map(|s| s.clone())
    }

    pub fn update<F: FnOnce(&mut Session)>(&self, endpoint: &Endpoint, f: F) -> Option<Session> {
        let mut session = self.sessions.get_mut(endpoint)?;
        f(&mut session);
        Some(session.clone())
    }

    pub fn leave(&self, endpoint: &Endpoint) -> Option<Session> {
        self.sessions.remove(endpoint).map(|(_, s)| s)
    }

    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_peer_in_different_forms_keeps_entity() {
        let table = SessionTable::new(4);
        let spawn = Vec3d::default();

        let first = table.join(Endpoint::parse("127.0.0.1", 5000).unwrap(), "a", spawn);
        let again = table.join(Endpoint::parse("2130706433", 5000).unwrap(), "a", spawn);
        let other = table.join(Endpoint::parse("127.0.0.1", 5001).unwrap(), "b", spawn);

        assert_eq!(first, Join::New(1));
        assert_eq!(again, Join::Existing(1));
        assert_eq!(other, Join::New(2));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn full_table_rejects_new_peers() {
        let table = SessionTable::new(2);
        let spawn = Vec3d::default();
        for port in 0..2 {
            table.join(Endpoint::parse("10.0.0.1", port).unwrap(), "p", spawn);
        }
        assert_eq!(
            table.join(Endpoint::parse("10.0.0.1", 9).unwrap(), "p", spawn),
            Join::Full
        );

        table.leave(&Endpoint::parse("10.0.0.1", 0).unwrap());
        assert!(matches!(
            table.join(Endpoint::parse("10.0.0.1", 9).unwrap(), "p", spawn),
            Join::New(_)
        ));
    }

    #[test]
    fn uuid_is_derived_from_username() {
        let table = SessionTable::new(4);
        let a = Endpoint::parse("10.0.0.1", 1).unwrap();
        let b = Endpoint::parse("10.0.0.2", 1).unwrap();
        table.join(a, "alex", Vec3d::default());
        table.join(b, "alex", Vec3d::default());
        assert_eq!(table.get(&a).unwrap().uuid, table.get(&b).unwrap().uuid);
    }
}
