//! Name registry for rooms, focuses and dialogs.
//!
//! [`NamingRegistry`] is the generic primitive: a concurrent map whose `bind`
//! is an atomic insert-if-absent, so concurrent binds of one name have
//! exactly one winner. [`RoomRegistry`] layers typed namespaces on top:
//!
//! | Key            | Value                 |
//! |----------------|-----------------------|
//! | `focus:{name}` | [`FocusActorHandle`]  |
//! | `room:{id}`    | [`RoomActorHandle`]   |
//! | `dialog:{id}`  | [`DialogActorHandle`] |
//!
//! The registry is the only shared mutable structure in the controller and is
//! passed around as `Arc<RoomRegistry>`.

use crate::actors::dialog::DialogActorHandle;
use crate::actors::focus::FocusActorHandle;
use crate::actors::room::RoomActorHandle;
use crate::errors::CcError;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

const FOCUS_PREFIX: &str = "focus:";
const ROOM_PREFIX: &str = "room:";
const DIALOG_PREFIX: &str = "dialog:";

/// Concurrent name → value binding.
#[derive(Debug)]
pub struct NamingRegistry<V> {
    entries: DashMap<String, V>,
}

impl<V> Default for NamingRegistry<V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V: Clone> NamingRegistry<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `value`.
    ///
    /// # Errors
    ///
    /// Returns `CcError::AlreadyBound` if the name is taken.
    pub fn bind(&self, name: &str, value: V) -> Result<(), CcError> {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(_) => Err(CcError::AlreadyBound(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<V> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    /// Remove `name`. Returns true if it was bound.
    pub fn unbind(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Remove `name` only if `matches` accepts the bound value.
    pub fn unbind_if(&self, name: &str, matches: impl FnOnce(&V) -> bool) -> bool {
        self.entries.remove_if(name, |_, v| matches(v)).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn count_prefix(&self, prefix: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .count()
    }
}

/// Values stored in the shared registry.
#[derive(Clone, Debug)]
pub enum RegistryEntry {
    Focus(FocusActorHandle),
    Room(RoomActorHandle),
    Dialog(DialogActorHandle),
}

/// Typed view over one [`NamingRegistry`] shared by all actors.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    names: NamingRegistry<RegistryEntry>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_focus(&self, room_name: &str, focus: FocusActorHandle) -> Result<(), CcError> {
        let key = format!("{FOCUS_PREFIX}{room_name}");
        self.names.bind(&key, RegistryEntry::Focus(focus))?;
        debug!(target: "cc.registry", key = %key, "Bound focus");
        Ok(())
    }

    #[must_use]
    pub fn lookup_focus(&self, room_name: &str) -> Option<FocusActorHandle> {
        match self.names.lookup(&format!("{FOCUS_PREFIX}{room_name}")) {
            Some(RegistryEntry::Focus(focus)) => Some(focus),
            _ => None,
        }
    }

    /// Unbind the focus of `room_name` if `focus` is still the bound one.
    pub fn unbind_focus(&self, room_name: &str, focus: &FocusActorHandle) -> bool {
        let key = format!("{FOCUS_PREFIX}{room_name}");
        let removed = self.names.unbind_if(&key, |entry| {
            matches!(entry, RegistryEntry::Focus(bound) if bound.same_actor(focus))
        });
        if removed {
            debug!(target: "cc.registry", key = %key, "Unbound focus");
        }
        removed
    }

    pub fn bind_room(&self, room_id: &str, room: RoomActorHandle) -> Result<(), CcError> {
        let key = format!("{ROOM_PREFIX}{room_id}");
        self.names.bind(&key, RegistryEntry::Room(room))?;
        debug!(target: "cc.registry", key = %key, "Bound room");
        Ok(())
    }

    #[must_use]
    pub fn lookup_room(&self, room_id: &str) -> Option<RoomActorHandle> {
        match self.names.lookup(&format!("{ROOM_PREFIX}{room_id}")) {
            Some(RegistryEntry::Room(room)) => Some(room),
            _ => None,
        }
    }

    pub fn unbind_room(&self, room_id: &str) -> bool {
        let key = format!("{ROOM_PREFIX}{room_id}");
        let removed = self.names.unbind(&key);
        if removed {
            debug!(target: "cc.registry", key = %key, "Unbound room");
        }
        removed
    }

    pub fn bind_dialog(&self, call_id: &str, dialog: DialogActorHandle) -> Result<(), CcError> {
        self.names
            .bind(&format!("{DIALOG_PREFIX}{call_id}"), RegistryEntry::Dialog(dialog))
    }

    #[must_use]
    pub fn lookup_dialog(&self, call_id: &str) -> Option<DialogActorHandle> {
        match self.names.lookup(&format!("{DIALOG_PREFIX}{call_id}")) {
            Some(RegistryEntry::Dialog(dialog)) => Some(dialog),
            _ => None,
        }
    }

    pub fn unbind_dialog(&self, call_id: &str) -> bool {
        self.names.unbind(&format!("{DIALOG_PREFIX}{call_id}"))
    }

    #[must_use]
    pub fn focus_count(&self) -> usize {
        self.names.count_prefix(FOCUS_PREFIX)
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.names.count_prefix(ROOM_PREFIX)
    }

    #[must_use]
    pub fn dialog_count(&self) -> usize {
        self.names.count_prefix(DIALOG_PREFIX)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_bind_lookup_unbind() {
        let registry: NamingRegistry<u32> = NamingRegistry::new();

        registry.bind("room:alpha", 1).unwrap();
        assert_eq!(registry.lookup("room:alpha"), Some(1));
        assert!(registry.lookup("room:beta").is_none());

        assert!(registry.unbind("room:alpha"));
        assert!(!registry.unbind("room:alpha"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rebind_fails() {
        let registry: NamingRegistry<u32> = NamingRegistry::new();
        registry.bind("room:alpha", 1).unwrap();

        let err = registry.bind("room:alpha", 2).unwrap_err();
        assert!(matches!(err, CcError::AlreadyBound(name) if name == "room:alpha"));
        assert_eq!(registry.lookup("room:alpha"), Some(1));
    }

    #[test]
    fn test_unbind_if_checks_value() {
        let registry: NamingRegistry<u32> = NamingRegistry::new();
        registry.bind("focus:alpha", 7).unwrap();

        assert!(!registry.unbind_if("focus:alpha", |v| *v == 8));
        assert!(registry.unbind_if("focus:alpha", |v| *v == 7));
        assert!(registry.lookup("focus:alpha").is_none());
    }

    #[test]
    fn test_concurrent_binds_have_one_winner() {
        let registry: Arc<NamingRegistry<usize>> = Arc::new(NamingRegistry::new());

        let threads: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.bind("room:alpha", i).is_ok())
            })
            .collect();

        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_prefix_counts() {
        let registry: NamingRegistry<u8> = NamingRegistry::new();
        registry.bind("room:a", 0).unwrap();
        registry.bind("room:b", 0).unwrap();
        registry.bind("dialog:c", 0).unwrap();
        assert_eq!(registry.count_prefix(ROOM_PREFIX), 2);
        assert_eq!(registry.count_prefix(DIALOG_PREFIX), 1);
        assert_eq!(registry.count_prefix(FOCUS_PREFIX), 0);
    }
}
