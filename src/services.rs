//! A minimal typed service registry.
//!
//! Services are keyed by their Rust type. A type is either registered once
//! (`add_singleton`) or any number of times (`add`, resolved with `get_all`).
//! Options types are assembled from `configure` and `post_configure` actions each
//! time they are requested.
//!
//! Trait objects are registered behind an `Arc`, e.g. `Arc<dyn StartupFilter>`.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{HostError, Result};

type Entry = Box<dyn Any + Send + Sync>;

type OptionsAction<T> = Arc<dyn Fn(&mut T) + Send + Sync>;

struct OptionsActions<T> {
    configure: Vec<OptionsAction<T>>,
    post_configure: Vec<OptionsAction<T>>,
}

impl<T> Default for OptionsActions<T> {
    fn default() -> Self {
        Self {
            configure: Vec::new(),
            post_configure: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Registrations {
    singletons: HashMap<TypeId, Entry>,
    multi: HashMap<TypeId, Vec<Entry>>,
    options: HashMap<TypeId, Entry>,
}

impl Registrations {
    fn get<T: 'static>(&self) -> Option<&T> {
        self.singletons
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<T>())
    }

    fn get_all<T: 'static>(&self) -> impl Iterator<Item = &T> {
        self.multi
            .get(&TypeId::of::<T>())
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.downcast_ref::<T>())
    }

    fn options_actions<T: 'static>(&self) -> Option<&OptionsActions<T>> {
        self.options
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<OptionsActions<T>>())
    }
}

/// Mutable registry populated while the host is built.
#[derive(Default)]
pub struct ServiceCollection {
    registrations: Registrations,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` as the single instance of `T`, replacing any previous one.
    pub fn add_singleton<T>(&mut self, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.registrations
            .singletons
            .insert(TypeId::of::<T>(), Box::new(value));
        self
    }

    /// Registers `value` only if no instance of `T` is registered yet.
    ///
    /// Returns whether the value was added.
    pub fn try_add_singleton<T>(&mut self, value: T) -> bool
    where
        T: Send + Sync + 'static,
    {
        if self.contains::<T>() {
            return false;
        }
        self.add_singleton(value);
        true
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.registrations
            .singletons
            .contains_key(&TypeId::of::<T>())
    }

    /// Returns the registered instance of `T`.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.registrations.get::<T>()
    }

    /// Appends `value` to the registrations of `T`.
    pub fn add<T>(&mut self, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.registrations
            .multi
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Box::new(value));
        self
    }

    /// Adds an action that configures the options type `T`.
    ///
    /// Actions run in registration order, starting from `T::default()`.
    pub fn configure<T, F>(&mut self, action: F) -> &mut Self
    where
        T: Default + Send + Sync + 'static,
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.update_options_actions::<T>(|actions| actions.configure.push(Arc::new(action)));
        self
    }

    /// Adds an action that runs after every `configure` action of `T`.
    pub fn post_configure<T, F>(&mut self, action: F) -> &mut Self
    where
        T: Default + Send + Sync + 'static,
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.update_options_actions::<T>(|actions| actions.post_configure.push(Arc::new(action)));
        self
    }

    fn update_options_actions<T>(&mut self, update: impl FnOnce(&mut OptionsActions<T>))
    where
        T: Send + Sync + 'static,
    {
        let key = TypeId::of::<T>();
        let mut actions: Box<OptionsActions<T>> = self
            .registrations
            .options
            .remove(&key)
            .and_then(|entry| entry.downcast().ok())
            .unwrap_or_default();
        update(&mut actions);
        self.registrations.options.insert(key, actions);
    }

    /// Freezes the registrations.
    pub fn build_provider(self) -> ServiceProvider {
        ServiceProvider {
            registrations: self.registrations,
        }
    }
}

impl fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCollection")
            .field("singletons", &self.registrations.singletons.len())
            .field("multi", &self.registrations.multi.len())
            .field("options", &self.registrations.options.len())
            .finish()
    }
}

/// Read-only registry produced by [`ServiceCollection::build_provider`].
pub struct ServiceProvider {
    registrations: Registrations,
}

impl ServiceProvider {
    /// Returns a clone of the registered instance of `T`.
    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.registrations.get::<T>().cloned()
    }

    /// Like [`ServiceProvider::get`], but a missing service is an error.
    ///
    /// # Errors
    /// Returns `HostError::ServiceNotRegistered` naming `T`.
    pub fn require<T: Clone + 'static>(&self) -> Result<T> {
        self.get::<T>()
            .ok_or(HostError::ServiceNotRegistered(type_name::<T>()))
    }

    /// Returns every instance registered with `add`, in registration order.
    pub fn get_all<T: Clone + 'static>(&self) -> Vec<T> {
        self.registrations.get_all::<T>().cloned().collect()
    }

    /// Assembles the options type `T` from its configure actions.
    pub fn options<T: Default + 'static>(&self) -> T {
        let mut options = T::default();
        if let Some(actions) = self.registrations.options_actions::<T>() {
            for action in actions.configure.iter().chain(&actions.post_configure) {
                action(&mut options);
            }
        }
        options
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("singletons", &self.registrations.singletons.len())
            .field("multi", &self.registrations.multi.len())
            .finish_non_exhaustive()
    }
}
