//! Master registries: execution, routing, broadcast, acknowledgment handlers.
//!
//! Populated at startup and passed around by value; read-only once the
//! master loop runs. Registration mistakes come back as
//! [`RegistrationError`] instead of silently overwriting an entry.

use ica_common::ack::Acknowledgment;
use ica_common::command::{Command, ComponentType};
use ica_common::error::RegistrationError;
use ica_common::reference::{ChannelId, Reference};
use std::collections::HashMap;
use std::sync::Arc;

use super::MasterController;

/// Handler for a command the master executes itself.
pub type ExecHandler =
    Arc<dyn Fn(&mut MasterController, Reference, &Command) -> Acknowledgment + Send + Sync>;

/// Continuation run when a master-originated command is acknowledged.
pub type AckHandler = Arc<dyn Fn(&mut MasterController, Reference, &Acknowledgment) + Send + Sync>;

/// Hook run when a master-originated command times out.
pub type TimeoutHook = Arc<dyn Fn(&mut MasterController, Reference, &'static str) + Send + Sync>;

/// Where a command name goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Executed by the master's own handler.
    Local,
    /// Forwarded to a worker channel.
    Channel(ChannelId),
    /// Nothing registered.
    Unrouted,
}

#[derive(Default)]
pub struct Registry {
    execution: HashMap<&'static str, ExecHandler>,
    name_routes: HashMap<&'static str, ChannelId>,
    component_routes: HashMap<ComponentType, ChannelId>,
    default_route: Option<ChannelId>,
    broadcast: Vec<ChannelId>,
    broadcast_names: Vec<&'static str>,
    ack_handlers: HashMap<&'static str, AckHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local execution handler.
    pub fn register_execution(
        &mut self,
        name: &'static str,
        handler: ExecHandler,
    ) -> Result<(), RegistrationError> {
        if self.execution.contains_key(name) {
            return Err(RegistrationError::DuplicateName { name });
        }
        if self.name_routes.contains_key(name) {
            return Err(RegistrationError::ExecutedAndRouted { name });
        }
        self.execution.insert(name, handler);
        Ok(())
    }

    /// Route a command name to a channel.
    pub fn register_route(&mut self, name: &'static str, channel: ChannelId) -> Result<(), RegistrationError> {
        if self.name_routes.contains_key(name) {
            return Err(RegistrationError::DuplicateName { name });
        }
        if self.execution.contains_key(name) {
            return Err(RegistrationError::ExecutedAndRouted { name });
        }
        self.name_routes.insert(name, channel);
        Ok(())
    }

    /// Route every command of a family to a channel, unless a name route
    /// or local handler exists for it.
    pub fn register_component_route(
        &mut self,
        component: ComponentType,
        channel: ChannelId,
    ) -> Result<(), RegistrationError> {
        if self.component_routes.contains_key(&component) {
            return Err(RegistrationError::DuplicateName { name: component.name() });
        }
        self.component_routes.insert(component, channel);
        Ok(())
    }

    /// Fallback channel for commands no other route covers.
    pub fn set_default_route(&mut self, channel: ChannelId) {
        self.default_route = Some(channel);
    }

    /// Append a channel to the broadcast list. Already-listed channels
    /// keep their position.
    pub fn add_broadcast(&mut self, channel: ChannelId) {
        if !self.broadcast.contains(&channel) {
            self.broadcast.push(channel);
        }
    }

    /// Mark a command name as broadcast: it is fanned out to the broadcast
    /// list on top of any regular route.
    pub fn designate_broadcast(&mut self, name: &'static str) {
        if !self.broadcast_names.contains(&name) {
            self.broadcast_names.push(name);
        }
    }

    pub fn register_ack_handler(
        &mut self,
        name: &'static str,
        handler: AckHandler,
    ) -> Result<(), RegistrationError> {
        if self.ack_handlers.contains_key(name) {
            return Err(RegistrationError::DuplicateName { name });
        }
        self.ack_handlers.insert(name, handler);
        Ok(())
    }

    /// Resolution order: local handler, name route, component route,
    /// default route.
    pub fn resolve(&self, name: &str, component: ComponentType) -> Route {
        if self.execution.contains_key(name) {
            return Route::Local;
        }
        self.name_routes
            .get(name)
            .or_else(|| self.component_routes.get(&component))
            .or(self.default_route.as_ref())
            .map_or(Route::Unrouted, |ch| Route::Channel(*ch))
    }

    pub fn execution_handler(&self, name: &str) -> Option<ExecHandler> {
        self.execution.get(name).cloned()
    }

    pub fn ack_handler(&self, name: &str) -> Option<AckHandler> {
        self.ack_handlers.get(name).cloned()
    }

    pub fn is_broadcast(&self, name: &str) -> bool {
        self.broadcast_names.contains(&name)
    }

    pub fn broadcast_list(&self) -> &[ChannelId] {
        &self.broadcast
    }

    /// Drop every route and broadcast entry pointing at `channel`.
    pub fn forget_channel(&mut self, channel: ChannelId) {
        self.name_routes.retain(|_, ch| *ch != channel);
        self.component_routes.retain(|_, ch| *ch != channel);
        if self.default_route == Some(channel) {
            self.default_route = None;
        }
        self.broadcast.retain(|ch| *ch != channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ica_common::command::names;

    fn noop() -> ExecHandler {
        Arc::new(|_, _, _| Acknowledgment::ok())
    }

    #[test]
    fn duplicate_execution_rejected() {
        let mut reg = Registry::new();
        reg.register_execution(names::SHUTDOWN, noop()).unwrap();
        assert_eq!(
            reg.register_execution(names::SHUTDOWN, noop()),
            Err(RegistrationError::DuplicateName { name: names::SHUTDOWN })
        );
    }

    #[test]
    fn executed_and_routed_rejected_both_ways() {
        let mut reg = Registry::new();
        reg.register_execution(names::SHUTDOWN, noop()).unwrap();
        assert_eq!(
            reg.register_route(names::SHUTDOWN, ChannelId(1)),
            Err(RegistrationError::ExecutedAndRouted { name: names::SHUTDOWN })
        );

        reg.register_route(names::DEVICE, ChannelId(1)).unwrap();
        assert_eq!(
            reg.register_execution(names::DEVICE, noop()),
            Err(RegistrationError::ExecutedAndRouted { name: names::DEVICE })
        );
    }

    #[test]
    fn resolution_order() {
        let mut reg = Registry::new();
        assert_eq!(reg.resolve(names::DEVICE, ComponentType::DeviceControl), Route::Unrouted);

        reg.set_default_route(ChannelId(9));
        assert_eq!(reg.resolve(names::DEVICE, ComponentType::DeviceControl), Route::Channel(ChannelId(9)));

        reg.register_component_route(ComponentType::DeviceControl, ChannelId(2)).unwrap();
        assert_eq!(reg.resolve(names::DEVICE, ComponentType::DeviceControl), Route::Channel(ChannelId(2)));

        reg.register_route(names::DEVICE, ChannelId(3)).unwrap();
        assert_eq!(reg.resolve(names::DEVICE, ComponentType::DeviceControl), Route::Channel(ChannelId(3)));

        reg.register_execution(names::SHUTDOWN, noop()).unwrap();
        assert_eq!(reg.resolve(names::SHUTDOWN, ComponentType::Master), Route::Local);
    }

    #[test]
    fn duplicate_component_route_rejected() {
        let mut reg = Registry::new();
        reg.register_component_route(ComponentType::DataLogging, ChannelId(1)).unwrap();
        assert!(reg.register_component_route(ComponentType::DataLogging, ChannelId(2)).is_err());
    }

    #[test]
    fn broadcast_list_is_an_ordered_set() {
        let mut reg = Registry::new();
        reg.add_broadcast(ChannelId(3));
        reg.add_broadcast(ChannelId(1));
        reg.add_broadcast(ChannelId(3));
        assert_eq!(reg.broadcast_list(), &[ChannelId(3), ChannelId(1)]);
    }

    #[test]
    fn forget_channel_drops_routes() {
        let mut reg = Registry::new();
        reg.register_route(names::DEVICE, ChannelId(1)).unwrap();
        reg.register_component_route(ComponentType::DataLogging, ChannelId(1)).unwrap();
        reg.add_broadcast(ChannelId(1));
        reg.add_broadcast(ChannelId(2));
        reg.forget_channel(ChannelId(1));
        assert_eq!(reg.resolve(names::DEVICE, ComponentType::DeviceControl), Route::Unrouted);
        assert_eq!(reg.broadcast_list(), &[ChannelId(2)]);
    }
}
