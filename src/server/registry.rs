//! Table of admitted participants
//!
//! The registry is owned by the dispatcher, so every mutation happens on a
//! single task and needs no lock. Admission workers only ever see the
//! [`CapacityGauge`], an occupancy counter updated in the same call that
//! mutates the table.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{ChatError, Result};
use crate::{ConnectionId, User};

/// A registered user together with the handle used to reach them
#[derive(Debug)]
pub struct Member<L> {
    pub user: User,
    pub link: L,
}

/// Read-only view of registry occupancy, shared with admission workers
#[derive(Debug, Clone)]
pub struct CapacityGauge {
    occupied: Arc<AtomicUsize>,
    capacity: usize,
}

impl CapacityGauge {
    pub fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Advisory only: a slot seen free here may be gone by the time the
    /// dialogue finishes
    pub fn is_full(&self) -> bool {
        self.occupied() >= self.capacity
    }
}

/// Fixed-capacity map from connection to member
#[derive(Debug)]
pub struct Registry<L> {
    members: HashMap<ConnectionId, Member<L>>,
    capacity: usize,
    occupied: Arc<AtomicUsize>,
}

impl<L> Registry<L> {
    pub fn new(capacity: usize) -> Self {
        Self {
            members: HashMap::with_capacity(capacity),
            capacity,
            occupied: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn gauge(&self) -> CapacityGauge {
        CapacityGauge {
            occupied: Arc::clone(&self.occupied),
            capacity: self.capacity,
        }
    }

    /// Register a user. Fails without touching the table when it is full or
    /// the connection is already present.
    pub fn try_insert(&mut self, connection: ConnectionId, user: User, link: L) -> Result<()> {
        if self.members.len() >= self.capacity {
            return Err(ChatError::capacity_exceeded(format!(
                "all {} slots are taken",
                self.capacity
            )));
        }
        if self.members.contains_key(&connection) {
            return Err(ChatError::internal(format!(
                "connection {} is already registered",
                connection
            )));
        }

        self.members.insert(connection, Member { user, link });
        self.publish();
        Ok(())
    }

    /// Unregister a connection, handing back its user for the departure
    /// notice
    pub fn remove(&mut self, connection: ConnectionId) -> Result<User> {
        let member = self
            .members
            .remove(&connection)
            .ok_or_else(|| ChatError::not_found(format!("connection {}", connection)))?;
        self.publish();
        Ok(member.user)
    }

    /// Visit every member. The visitor must not try to reach the registry
    /// itself.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Member<L>),
    {
        for member in self.members.values() {
            visitor(member);
        }
    }

    pub fn find_by_connection(&self, connection: ConnectionId) -> Result<&User> {
        self.members
            .get(&connection)
            .map(|member| &member.user)
            .ok_or_else(|| ChatError::not_found(format!("connection {}", connection)))
    }

    /// Handle used to reach one member directly
    pub fn link(&self, connection: ConnectionId) -> Result<&L> {
        self.members
            .get(&connection)
            .map(|member| &member.link)
            .ok_or_else(|| ChatError::not_found(format!("connection {}", connection)))
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.members.contains_key(&connection)
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn publish(&self) {
        self.occupied.store(self.members.len(), Ordering::Release);
    }
}
