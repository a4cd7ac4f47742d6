//! Replicated entities and their properties.
//!
//! An entity is created on one peer from a registered [`SyncType`]. Its id comes from a per-connection pool
//! and its properties are numbered in the order the type declares them, so both peers agree on every
//! `(parent, index)` pair without sending names after the initial create. Setting a property sends a single
//! delta. Deltas applied from the wire never send anything back.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    consts::DEFAULT_SYNC_ID_CAPACITY,
    endpoint::Endpoint,
    error::{Error, Result},
    events::{LifecycleEvent, Observers},
    feature::{Feature, Installable},
    free_list::FreeList,
    link::Link,
    protocol::{self, CreateEnvelope, DestroyEnvelope, MessageKind, UpdateEnvelope},
    utils::lock,
    value::Value,
};

/// Configuration for the [`SyncManager`].
///
/// * `id_capacity` - Number of entity ids available per connection.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    id_capacity: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            id_capacity: DEFAULT_SYNC_ID_CAPACITY,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn id_capacity(mut self, capacity: u16) -> Self {
        self.id_capacity = capacity;
        self
    }
}

/// One declared property of a [`SyncType`].
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    pub name: &'static str,
    pub initial: Value,
}

impl PropertySpec {
    pub fn new(name: &'static str, initial: impl Into<Value>) -> Self {
        Self {
            name,
            initial: initial.into(),
        }
    }
}

/// A type whose instances can be replicated.
///
/// # Example
/// ```
/// use featurenet::{PropertySpec, SyncType};
///
/// struct Counter;
///
/// impl SyncType for Counter {
///     const TYPE_NAME: &'static str = "counter";
///     fn properties() -> Vec<PropertySpec> {
///         vec![PropertySpec::new("value", 0i32)]
///     }
/// }
/// ```
pub trait SyncType: 'static {
    /// Sent in create messages. Must be the same on both peers.
    const TYPE_NAME: &'static str;
    /// Properties in index order. Must be deterministic.
    fn properties() -> Vec<PropertySpec>;
}

#[derive(Clone)]
struct TypeEntry {
    name: &'static str,
    properties: fn() -> Vec<PropertySpec>,
}

#[derive(Debug)]
struct Property {
    name: &'static str,
    value: Value,
    last_updated: f64,
}

/// A live replicated object.
#[derive(Debug)]
pub struct SyncedEntity {
    id: u16,
    type_name: &'static str,
    link: Arc<Link>,
    alive: AtomicBool,
    properties: Mutex<Vec<Property>>,
}

impl SyncedEntity {
    fn new(id: u16, entry: &TypeEntry, values: Vec<Value>, link: Arc<Link>) -> Self {
        let time = link.time();
        let properties = (entry.properties)()
            .into_iter()
            .zip(values)
            .map(|(spec, value)| Property {
                name: spec.name,
                value,
                last_updated: time,
            })
            .collect();
        Self {
            id,
            type_name: entry.name,
            link,
            alive: AtomicBool::new(true),
            properties: Mutex::new(properties),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
    pub fn property_count(&self) -> usize {
        lock(&self.properties).len()
    }
    pub fn index_of(&self, name: &str) -> Option<u8> {
        lock(&self.properties)
            .iter()
            .position(|p| p.name == name)
            .map(|i| i as u8)
    }
    pub fn get(&self, index: u8) -> Option<Value> {
        lock(&self.properties)
            .get(index as usize)
            .map(|p| p.value.clone())
    }
    pub fn get_by_name(&self, name: &str) -> Option<Value> {
        lock(&self.properties)
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.clone())
    }
    pub fn values(&self) -> Vec<Value> {
        lock(&self.properties)
            .iter()
            .map(|p| p.value.clone())
            .collect()
    }
    /// Time of the last local or remote change to the property.
    pub fn last_updated(&self, index: u8) -> Option<f64> {
        lock(&self.properties)
            .get(index as usize)
            .map(|p| p.last_updated)
    }

    /// Changes a property and sends the delta to the remote side.
    ///
    /// Returns `false` without sending anything if the value is unchanged.
    pub fn set(&self, index: u8, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        if !self.is_alive() {
            return Err(Error::EntityDestroyed(self.id));
        }
        let mut properties = lock(&self.properties);
        let property = self.property_mut(&mut properties, index, &value)?;
        if property.value == value {
            return Ok(false);
        }
        property.value = value.clone();
        property.last_updated = self.link.time();
        // queued under the property lock so deltas leave in the order they were applied
        self.link.send(
            MessageKind::SyncUpdate,
            &UpdateEnvelope {
                parent: self.id,
                index,
                value,
            },
        )?;
        Ok(true)
    }

    pub fn set_by_name(&self, name: &str, value: impl Into<Value>) -> Result<bool> {
        let index = self.index_of(name).ok_or_else(|| Error::UnknownProperty {
            parent: self.id,
            name: name.to_string(),
        })?;
        self.set(index, value)
    }

    /// Applies a delta received from the remote side. Never sends.
    fn apply(&self, index: u8, value: Value) -> Result<()> {
        let mut properties = lock(&self.properties);
        let property = self.property_mut(&mut properties, index, &value)?;
        property.value = value;
        property.last_updated = self.link.time();
        Ok(())
    }

    fn property_mut<'a>(
        &self,
        properties: &'a mut [Property],
        index: u8,
        value: &Value,
    ) -> Result<&'a mut Property> {
        let property = properties
            .get_mut(index as usize)
            .ok_or(Error::PropertyOutOfRange {
                parent: self.id,
                index,
            })?;
        if property.value.kind() != value.kind() {
            return Err(Error::ValueKindMismatch {
                parent: self.id,
                index,
                expected: property.value.kind(),
                got: value.kind(),
            });
        }
        Ok(property)
    }

    fn kill(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

/// Creates, destroys and updates replicated entities on one connection.
pub struct SyncManager {
    link: Arc<Link>,
    enabled: AtomicBool,
    types: Mutex<HashMap<&'static str, TypeEntry>>,
    entities: Mutex<FreeList<Arc<SyncedEntity>>>,
    created: Observers<Arc<SyncedEntity>>,
    destroyed: Observers<Arc<SyncedEntity>>,
}

impl SyncManager {
    pub fn new(link: Arc<Link>, cfg: SyncConfig) -> Self {
        Self {
            link,
            enabled: AtomicBool::new(false),
            types: Mutex::new(HashMap::new()),
            entities: Mutex::new(FreeList::new(cfg.id_capacity)),
            created: Observers::new(),
            destroyed: Observers::new(),
        }
    }

    /// Makes `T` known so the remote side can create it here.
    pub fn register<T: SyncType>(&self) {
        let entry = TypeEntry {
            name: T::TYPE_NAME,
            properties: T::properties,
        };
        if lock(&self.types).insert(T::TYPE_NAME, entry).is_none() {
            log::debug!("registered synchronized type `{}`", T::TYPE_NAME);
        }
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        lock(&self.types).contains_key(type_name)
    }

    /// Entities created by the remote side, reported after they are in the table.
    pub fn on_remote_create(&self) -> &Observers<Arc<SyncedEntity>> {
        &self.created
    }

    /// Entities destroyed by the remote side, reported after they left the table.
    pub fn on_remote_destroy(&self) -> &Observers<Arc<SyncedEntity>> {
        &self.destroyed
    }

    pub fn entity(&self, id: u16) -> Option<Arc<SyncedEntity>> {
        lock(&self.entities).get(id).cloned()
    }

    pub fn entities(&self) -> Vec<Arc<SyncedEntity>> {
        lock(&self.entities)
            .iter()
            .map(|(_, entity)| entity.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entities).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates an entity of type `T` with its declared initial values.
    pub fn create<T: SyncType>(&self) -> Result<Arc<SyncedEntity>> {
        let values = T::properties().into_iter().map(|p| p.initial).collect();
        self.create_with_values::<T>(values)
    }

    /// Creates an entity of type `T` with explicit initial values, one per declared property.
    pub fn create_with_values<T: SyncType>(&self, values: Vec<Value>) -> Result<Arc<SyncedEntity>> {
        if !self.enabled.load(Ordering::Acquire) {
            return Err(Error::FeatureDisabled(Self::NAME));
        }
        self.register::<T>();
        let entry = TypeEntry {
            name: T::TYPE_NAME,
            properties: T::properties,
        };
        check_values(&entry, &values, u16::MAX)?;

        let mut entities = lock(&self.entities);
        let Some(id) = entities.vacant() else {
            log::error!(
                "cannot create `{}`: all {} entity ids are in use",
                T::TYPE_NAME,
                entities.capacity()
            );
            return Err(Error::IdPoolExhausted);
        };
        self.link.send(
            MessageKind::SyncCreate,
            &CreateEnvelope {
                type_name: T::TYPE_NAME.to_string(),
                parent: id,
                values: values.clone(),
            },
        )?;
        let entity = Arc::new(SyncedEntity::new(id, &entry, values, self.link.clone()));
        entities.insert_at(id, entity.clone());
        log::trace!("created `{}` as entity {id}", T::TYPE_NAME);
        Ok(entity)
    }

    /// Destroys a local or mirrored entity and tells the remote side. Returns `false` if it was already gone.
    pub fn destroy(&self, entity: &SyncedEntity) -> Result<bool> {
        self.destroy_id(entity.id())
    }

    pub fn destroy_id(&self, id: u16) -> Result<bool> {
        let mut entities = lock(&self.entities);
        let Some(entity) = entities.remove(id) else {
            return Ok(false);
        };
        entity.kill();
        self.link
            .send(MessageKind::SyncDestroy, &DestroyEnvelope { parent: id })?;
        log::trace!("destroyed entity {id}");
        Ok(true)
    }

    /// Drops every entity and returns all ids to the pool. Nothing is sent.
    pub fn reset(&self) {
        let dropped = lock(&self.entities).clear();
        if !dropped.is_empty() {
            log::debug!("dropped {} synchronized entities", dropped.len());
        }
        for entity in dropped {
            entity.kill();
        }
    }

    fn remote_create(&self, envelope: CreateEnvelope) -> Result<()> {
        let entry = lock(&self.types)
            .get(envelope.type_name.as_str())
            .cloned()
            .ok_or(Error::UnknownSyncType(envelope.type_name))?;
        check_values(&entry, &envelope.values, envelope.parent)?;
        let entity = Arc::new(SyncedEntity::new(
            envelope.parent,
            &entry,
            envelope.values,
            self.link.clone(),
        ));
        {
            let mut entities = lock(&self.entities);
            if entities.contains(envelope.parent) {
                log::warn!(
                    "dropped create of `{}`: entity {} is already live",
                    entry.name,
                    envelope.parent
                );
                return Ok(());
            }
            if !entities.insert_at(envelope.parent, entity.clone()) {
                log::warn!(
                    "dropped create of `{}`: id {} is outside the pool of {}",
                    entry.name,
                    envelope.parent,
                    entities.capacity()
                );
                return Ok(());
            }
        }
        log::trace!("mirrored `{}` as entity {}", entry.name, envelope.parent);
        self.created.notify(&entity);
        Ok(())
    }

    fn remote_destroy(&self, envelope: DestroyEnvelope) {
        let Some(entity) = lock(&self.entities).remove(envelope.parent) else {
            log::warn!("dropped destroy: no entity {}", envelope.parent);
            return;
        };
        entity.kill();
        log::trace!("remote destroyed entity {}", envelope.parent);
        self.destroyed.notify(&entity);
    }

    fn remote_update(&self, envelope: UpdateEnvelope) -> Result<()> {
        let Some(entity) = self.entity(envelope.parent) else {
            log::warn!("dropped update: no entity {}", envelope.parent);
            return Ok(());
        };
        entity.apply(envelope.index, envelope.value)?;
        log::trace!(
            "applied update to property {} of entity {}",
            envelope.index,
            envelope.parent
        );
        Ok(())
    }
}

/// Checks that `values` line up with the declared properties of `entry`.
fn check_values(entry: &TypeEntry, values: &[Value], parent: u16) -> Result<()> {
    let specs = (entry.properties)();
    if specs.len() != values.len() || specs.len() > u8::MAX as usize {
        return Err(Error::PropertyOutOfRange {
            parent,
            index: values.len().min(u8::MAX as usize) as u8,
        });
    }
    for (index, (spec, value)) in specs.iter().zip(values).enumerate() {
        if spec.initial.kind() != value.kind() {
            return Err(Error::ValueKindMismatch {
                parent,
                index: index as u8,
                expected: spec.initial.kind(),
                got: value.kind(),
            });
        }
    }
    Ok(())
}

impl Feature for SyncManager {
    fn message_kinds(&self) -> &'static [MessageKind] {
        &[
            MessageKind::SyncCreate,
            MessageKind::SyncDestroy,
            MessageKind::SyncUpdate,
        ]
    }

    fn on_enable(&self, _ep: &Endpoint) {
        self.enabled.store(true, Ordering::Release);
    }

    fn on_disable(&self, _ep: &Endpoint) {
        self.enabled.store(false, Ordering::Release);
        self.reset();
    }

    fn on_event(&self, _ep: &Endpoint, event: &LifecycleEvent) {
        if let LifecycleEvent::Disconnected(..) = event {
            self.reset();
        }
    }

    fn on_message(&self, _ep: &Endpoint, kind: MessageKind, body: &[u8]) -> Result<()> {
        match kind {
            MessageKind::SyncCreate => self.remote_create(protocol::read_body(body)?),
            MessageKind::SyncDestroy => {
                self.remote_destroy(protocol::read_body(body)?);
                Ok(())
            }
            MessageKind::SyncUpdate => self.remote_update(protocol::read_body(body)?),
            _ => Err(Error::UnknownMessageKind(kind as u8)),
        }
    }
}

impl Installable for SyncManager {
    const NAME: &'static str = "sync-manager";

    fn create(ep: &Endpoint) -> Self {
        Self::new(ep.link().clone(), ep.config().sync_config().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bridge::PeerId, DisconnectReason, EndpointConfig, Outgoing, Side};

    struct Counter;

    impl SyncType for Counter {
        const TYPE_NAME: &'static str = "counter";
        fn properties() -> Vec<PropertySpec> {
            vec![PropertySpec::new("value", 0i32)]
        }
    }

    struct Player;

    impl SyncType for Player {
        const TYPE_NAME: &'static str = "player";
        fn properties() -> Vec<PropertySpec> {
            vec![
                PropertySpec::new("name", "anonymous"),
                PropertySpec::new("health", 100u32),
                PropertySpec::new("x", 0f32),
            ]
        }
    }

    fn endpoint(side: Side, capacity: u16) -> (Endpoint, Arc<SyncManager>) {
        let ep = Endpoint::new(
            None,
            side,
            EndpointConfig::new().sync(SyncConfig::new().id_capacity(capacity)),
        );
        let sync = ep.add_feature::<SyncManager>();
        sync.register::<Counter>();
        sync.register::<Player>();
        ep.start(0.0);
        (ep, sync)
    }

    fn messages(ep: &Endpoint) -> Vec<Vec<u8>> {
        ep.drain_outgoing()
            .into_iter()
            .filter_map(|o| match o {
                Outgoing::Message(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    fn pump(from: &Endpoint, to: &Endpoint) {
        for msg in messages(from) {
            to.receive(&msg);
        }
    }

    #[test]
    fn counter_updates_replicate_in_order() {
        let (a, sync_a) = endpoint(Side::Client, 16);
        let (b, sync_b) = endpoint(Side::Server, 16);

        let counter = sync_a.create::<Counter>().unwrap();
        pump(&a, &b);
        let mirror = sync_b.entity(counter.id()).expect("mirrored");
        assert_eq!(mirror.type_name(), "counter");
        assert_eq!(mirror.get(0), Some(Value::I32(0)));

        for v in [42, 43, 44] {
            assert!(counter.set(0, v).unwrap());
        }
        let mut seen = Vec::new();
        for msg in messages(&a) {
            b.receive(&msg);
            seen.push(mirror.get(0).unwrap());
        }
        assert_eq!(
            seen,
            vec![Value::I32(42), Value::I32(43), Value::I32(44)]
        );
        assert_eq!(mirror.get_by_name("value"), Some(Value::I32(44)));
    }

    #[test]
    fn remote_apply_does_not_echo() {
        let (a, sync_a) = endpoint(Side::Client, 16);
        let (b, sync_b) = endpoint(Side::Server, 16);
        let player = sync_a.create::<Player>().unwrap();
        pump(&a, &b);
        player.set_by_name("health", 90u32).unwrap();
        pump(&a, &b);
        assert!(messages(&b).is_empty());
        assert_eq!(
            sync_b.entity(player.id()).unwrap().get(1),
            Some(Value::U32(90))
        );
    }

    #[test]
    fn unchanged_value_sends_nothing() {
        let (a, sync_a) = endpoint(Side::Client, 16);
        let counter = sync_a.create::<Counter>().unwrap();
        messages(&a);
        assert!(!counter.set(0, 0i32).unwrap());
        assert!(messages(&a).is_empty());
    }

    #[test]
    fn interleaved_parents_converge() {
        let (a, sync_a) = endpoint(Side::Client, 16);
        let (b, sync_b) = endpoint(Side::Server, 16);
        let first = sync_a.create::<Player>().unwrap();
        let second = sync_a.create::<Player>().unwrap();
        first.set(1, 50u32).unwrap();
        second.set(2, 1.5f32).unwrap();
        first.set(0, "alice").unwrap();
        second.set(1, 10u32).unwrap();
        first.set(1, 40u32).unwrap();
        pump(&a, &b);
        for entity in [&first, &second] {
            assert_eq!(
                sync_b.entity(entity.id()).unwrap().values(),
                entity.values()
            );
        }
    }

    #[test]
    fn remote_ids_are_removed_from_the_local_pool() {
        let (a, sync_a) = endpoint(Side::Client, 16);
        let (b, sync_b) = endpoint(Side::Server, 16);
        let remote = sync_a.create::<Counter>().unwrap();
        pump(&a, &b);
        let local = sync_b.create::<Counter>().unwrap();
        assert_ne!(local.id(), remote.id());
        assert_eq!(sync_b.len(), 2);
    }

    #[test]
    fn destroy_releases_the_id_on_both_sides() {
        let (a, sync_a) = endpoint(Side::Client, 16);
        let (b, sync_b) = endpoint(Side::Server, 16);
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        {
            let destroyed = destroyed.clone();
            sync_b
                .on_remote_destroy()
                .subscribe(move |entity| destroyed.lock().unwrap().push(entity.id()));
        }
        let counter = sync_a.create::<Counter>().unwrap();
        pump(&a, &b);
        let mirror = sync_b.entity(counter.id()).unwrap();
        assert!(sync_a.destroy(&counter).unwrap());
        assert!(!sync_a.destroy(&counter).unwrap());
        pump(&a, &b);

        assert!(!mirror.is_alive());
        assert!(sync_b.is_empty());
        assert_eq!(*destroyed.lock().unwrap(), vec![counter.id()]);
        assert!(matches!(
            counter.set(0, 1i32),
            Err(Error::EntityDestroyed(_))
        ));
        assert_eq!(sync_a.create::<Counter>().unwrap().id(), counter.id());
    }

    #[test]
    fn pool_exhaustion_fails_one_creation_only() {
        let (_a, sync_a) = endpoint(Side::Client, 2);
        let first = sync_a.create::<Counter>().unwrap();
        sync_a.create::<Counter>().unwrap();
        assert!(matches!(
            sync_a.create::<Counter>(),
            Err(Error::IdPoolExhausted)
        ));
        assert!(first.is_alive());
        assert_eq!(sync_a.len(), 2);
    }

    #[test]
    fn bad_updates_are_ignored() {
        let (a, sync_a) = endpoint(Side::Client, 16);
        let (b, sync_b) = endpoint(Side::Server, 16);
        let counter = sync_a.create::<Counter>().unwrap();
        pump(&a, &b);

        let unknown_parent = UpdateEnvelope {
            parent: 9,
            index: 0,
            value: Value::I32(1),
        };
        let out_of_range = UpdateEnvelope {
            parent: counter.id(),
            index: 3,
            value: Value::I32(1),
        };
        let wrong_kind = UpdateEnvelope {
            parent: counter.id(),
            index: 0,
            value: Value::Bool(true),
        };
        for envelope in [unknown_parent, out_of_range, wrong_kind] {
            b.receive(&protocol::encode(MessageKind::SyncUpdate, &envelope).unwrap());
        }
        b.receive(
            &protocol::encode(MessageKind::SyncDestroy, &DestroyEnvelope { parent: 12 }).unwrap(),
        );

        let mirror = sync_b.entity(counter.id()).unwrap();
        assert_eq!(mirror.get(0), Some(Value::I32(0)));
        counter.set(0, 7i32).unwrap();
        pump(&a, &b);
        assert_eq!(mirror.get(0), Some(Value::I32(7)));
    }

    #[test]
    fn duplicate_and_unknown_creates_are_dropped() {
        let (a, sync_a) = endpoint(Side::Client, 16);
        let (b, sync_b) = endpoint(Side::Server, 16);
        let created = Arc::new(Mutex::new(0));
        {
            let created = created.clone();
            sync_b
                .on_remote_create()
                .subscribe(move |_| *created.lock().unwrap() += 1);
        }
        let counter = sync_a.create::<Counter>().unwrap();
        pump(&a, &b);
        counter.set(0, 5i32).unwrap();
        pump(&a, &b);

        let duplicate = CreateEnvelope {
            type_name: "counter".to_string(),
            parent: counter.id(),
            values: vec![Value::I32(0)],
        };
        b.receive(&protocol::encode(MessageKind::SyncCreate, &duplicate).unwrap());
        let unknown = CreateEnvelope {
            type_name: "ghost".to_string(),
            parent: 3,
            values: vec![],
        };
        b.receive(&protocol::encode(MessageKind::SyncCreate, &unknown).unwrap());

        assert_eq!(*created.lock().unwrap(), 1);
        assert_eq!(sync_b.len(), 1);
        assert_eq!(
            sync_b.entity(counter.id()).unwrap().get(0),
            Some(Value::I32(5))
        );
    }

    #[test]
    fn disconnect_resets_the_table() {
        let (a, sync_a) = endpoint(Side::Client, 4);
        let entity = sync_a.create::<Counter>().unwrap();
        a.emit(LifecycleEvent::Disconnected(
            PeerId(0),
            DisconnectReason::lost("gone"),
        ));
        assert!(sync_a.is_empty());
        assert!(!entity.is_alive());
        assert_eq!(sync_a.create::<Counter>().unwrap().id(), 0);
    }

    #[test]
    fn mismatched_initial_values_are_rejected() {
        let (_a, sync_a) = endpoint(Side::Client, 4);
        assert!(matches!(
            sync_a.create_with_values::<Counter>(vec![Value::Bool(false)]),
            Err(Error::ValueKindMismatch { .. })
        ));
        assert!(matches!(
            sync_a.create_with_values::<Counter>(vec![]),
            Err(Error::PropertyOutOfRange { .. })
        ));
        let e = sync_a
            .create_with_values::<Counter>(vec![Value::I32(9)])
            .unwrap();
        assert_eq!(e.get(0), Some(Value::I32(9)));
    }
}
