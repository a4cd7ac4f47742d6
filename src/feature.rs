//! Pluggable protocol capabilities and the per-endpoint registry that owns them.
//!
//! A feature moves through `Installed -> Enabled -> Disabled` while it sits in the registry. It only talks
//! to the network while enabled. Lifecycle hooks run with the registry's lifecycle lock held, so a hook must
//! not install, remove, enable or disable features itself; looking features up is fine.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    endpoint::Endpoint, error::Result, events::LifecycleEvent, protocol::MessageKind,
    utils::lock, value::DataPack,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureState {
    /// Installed but never enabled.
    Installed,
    Enabled,
    Disabled,
}

/// A pluggable unit of protocol behavior attached to an [`Endpoint`].
pub trait Feature: Send + Sync + 'static {
    /// Priority features receive lifecycle events before non-priority features and public observers.
    fn is_priority(&self) -> bool {
        false
    }
    /// Internal message kinds this feature consumes.
    fn message_kinds(&self) -> &'static [MessageKind] {
        &[]
    }
    /// Whether this feature is offered raw application data packs.
    fn is_data_target(&self) -> bool {
        false
    }
    fn on_install(&self, _ep: &Endpoint) {}
    fn on_uninstall(&self, _ep: &Endpoint) {}
    fn on_enable(&self, _ep: &Endpoint) {}
    fn on_disable(&self, _ep: &Endpoint) {}
    fn on_event(&self, _ep: &Endpoint, _event: &LifecycleEvent) {}
    /// Called on every endpoint update while enabled.
    fn update(&self, _ep: &Endpoint, _time: f64) {}
    /// Handles one message of a kind listed in [`message_kinds`](Feature::message_kinds).
    ///
    /// An error is logged by the endpoint and the message is dropped; the connection stays usable.
    fn on_message(&self, _ep: &Endpoint, _kind: MessageKind, _body: &[u8]) -> Result<()> {
        Ok(())
    }
    /// Offers an application data pack. Returns `true` if this feature consumed it.
    fn on_data(&self, _ep: &Endpoint, _pack: &DataPack) -> bool {
        false
    }
}

/// A feature that can be constructed and installed by type.
pub trait Installable: Feature + Sized {
    const NAME: &'static str;
    /// Builds a fresh instance for `ep`. Runs before the feature is registered, so it may install the
    /// features it depends on.
    fn create(ep: &Endpoint) -> Self;
}

struct Slot {
    name: &'static str,
    feature: Arc<dyn Feature>,
    any: Arc<dyn Any + Send + Sync>,
    state: FeatureState,
}

#[derive(Default)]
struct Registry {
    order: Vec<TypeId>,
    slots: HashMap<TypeId, Slot>,
}

impl Registry {
    fn ordered(&self) -> impl Iterator<Item = &Slot> {
        self.order.iter().filter_map(|id| self.slots.get(id))
    }
}

#[derive(Default)]
pub struct FeatureManager {
    lifecycle: Mutex<()>,
    registry: Mutex<Registry>,
}

impl FeatureManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<F: Installable>(&self) -> Option<Arc<F>> {
        let any = lock(&self.registry)
            .slots
            .get(&TypeId::of::<F>())
            .map(|slot| slot.any.clone())?;
        any.downcast::<F>().ok()
    }

    pub fn contains<F: Installable>(&self) -> bool {
        lock(&self.registry).slots.contains_key(&TypeId::of::<F>())
    }

    pub fn state<F: Installable>(&self) -> Option<FeatureState> {
        lock(&self.registry)
            .slots
            .get(&TypeId::of::<F>())
            .map(|slot| slot.state)
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the installed instance of `F`, installing a new one first if there is none.
    pub fn add<F: Installable>(&self, ep: &Endpoint) -> Arc<F> {
        if let Some(existing) = self.get::<F>() {
            return existing;
        }
        self.add_instance(ep, F::create(ep))
    }

    /// Installs `feature` unless an instance of `F` is already present, in which case that one is returned
    /// and `feature` is dropped.
    pub fn add_instance<F: Installable>(&self, ep: &Endpoint, feature: F) -> Arc<F> {
        let _guard = lock(&self.lifecycle);
        if let Some(existing) = self.get::<F>() {
            return existing;
        }
        let feature = Arc::new(feature);
        {
            let mut registry = lock(&self.registry);
            registry.order.push(TypeId::of::<F>());
            registry.slots.insert(
                TypeId::of::<F>(),
                Slot {
                    name: F::NAME,
                    feature: feature.clone(),
                    any: feature.clone(),
                    state: FeatureState::Installed,
                },
            );
        }
        log::debug!(
            "installed feature `{}` ({})",
            F::NAME,
            if feature.is_priority() {
                "priority"
            } else {
                "public"
            }
        );
        feature.on_install(ep);
        if ep.is_running() {
            self.switch(ep, TypeId::of::<F>(), true);
        }
        feature
    }

    /// Disables then uninstalls `F`. Returns `false` if it was not installed.
    pub fn remove<F: Installable>(&self, ep: &Endpoint) -> bool {
        let _guard = lock(&self.lifecycle);
        let id = TypeId::of::<F>();
        if !lock(&self.registry).slots.contains_key(&id) {
            log::debug!("feature `{}` is not installed, nothing to remove", F::NAME);
            return false;
        }
        self.switch(ep, id, false);
        let slot = {
            let mut registry = lock(&self.registry);
            registry.order.retain(|other| *other != id);
            registry.slots.remove(&id)
        };
        if let Some(slot) = slot {
            slot.feature.on_uninstall(ep);
            log::debug!("uninstalled feature `{}`", slot.name);
        }
        true
    }

    /// Enables `F`. Returns `false` if it is not installed.
    pub fn enable<F: Installable>(&self, ep: &Endpoint) -> bool {
        let _guard = lock(&self.lifecycle);
        self.switch(ep, TypeId::of::<F>(), true)
    }

    /// Disables `F`. Safe to call any number of times. Returns `false` if it is not installed.
    pub fn disable<F: Installable>(&self, ep: &Endpoint) -> bool {
        let _guard = lock(&self.lifecycle);
        self.switch(ep, TypeId::of::<F>(), false)
    }

    pub(crate) fn enable_all(&self, ep: &Endpoint) {
        let _guard = lock(&self.lifecycle);
        let ids = lock(&self.registry).order.clone();
        for id in ids {
            self.switch(ep, id, true);
        }
    }

    pub(crate) fn disable_all(&self, ep: &Endpoint) {
        let _guard = lock(&self.lifecycle);
        let ids = lock(&self.registry).order.clone();
        for id in ids.into_iter().rev() {
            self.switch(ep, id, false);
        }
    }

    /// Flips the enabled flag and runs the matching hook if the state actually changed.
    fn switch(&self, ep: &Endpoint, id: TypeId, enable: bool) -> bool {
        let changed = {
            let mut registry = lock(&self.registry);
            let Some(slot) = registry.slots.get_mut(&id) else {
                return false;
            };
            let target = if enable {
                FeatureState::Enabled
            } else {
                FeatureState::Disabled
            };
            let is_enabled = slot.state == FeatureState::Enabled;
            if is_enabled == enable {
                None
            } else {
                slot.state = target;
                Some((slot.name, slot.feature.clone()))
            }
        };
        if let Some((name, feature)) = changed {
            if enable {
                log::debug!("enabling feature `{name}`");
                feature.on_enable(ep);
            } else {
                log::debug!("disabling feature `{name}`");
                feature.on_disable(ep);
            }
        }
        true
    }

    fn enabled_where(&self, pred: impl Fn(&dyn Feature) -> bool) -> Vec<Arc<dyn Feature>> {
        lock(&self.registry)
            .ordered()
            .filter(|slot| slot.state == FeatureState::Enabled && pred(slot.feature.as_ref()))
            .map(|slot| slot.feature.clone())
            .collect()
    }

    /// Enabled features that accept raw application data, in registration order.
    pub fn data_targets(&self) -> Vec<Arc<dyn Feature>> {
        self.enabled_where(|f| f.is_data_target())
    }

    /// The first enabled feature that consumes `kind`.
    pub fn route(&self, kind: MessageKind) -> Option<Arc<dyn Feature>> {
        self.enabled_where(|f| f.message_kinds().contains(&kind))
            .into_iter()
            .next()
    }

    pub(crate) fn enabled(&self) -> Vec<Arc<dyn Feature>> {
        self.enabled_where(|_| true)
    }

    /// Enabled features split into priority and public listeners, each in registration order.
    pub(crate) fn listeners(&self) -> (Vec<Arc<dyn Feature>>, Vec<Arc<dyn Feature>>) {
        self.enabled().into_iter().partition(|f| f.is_priority())
    }
}
