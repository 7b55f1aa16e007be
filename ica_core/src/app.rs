//! System assembly: master, workers, routes and the startup sequence.

use ica_common::command::{Command, CommandKind, ComponentType};
use ica_common::error::DispatchError;
use ica_common::event::SharedEventSink;
use ica_common::reference::ChannelId;
use ica_common::state::{InitStage, OperationEvent, StatePermissions};
use std::sync::Arc;
use tracing::info;

use crate::config::SystemConfig;
use crate::device::{DevicePool, DeviceWorker, SimulatedDriver};
use crate::gate::StateGate;
use crate::logging::{DayLog, LoggingWorker};
use crate::master::MasterController;

/// A wired system, ready for [`System::startup`].
pub struct System {
    pub master: MasterController,
    pub device: ChannelId,
    pub logging: ChannelId,
    pub device_pool: Arc<DevicePool>,
    pub day_log: DayLog,
    auto_monitor: bool,
}

impl System {
    /// Build the gate, master and both workers from `config`.
    ///
    /// Device commands route to the device worker, data-logging commands
    /// to the logging worker; the logging worker also receives every
    /// broadcast.
    pub fn build(config: &SystemConfig, events: SharedEventSink) -> Result<Self, DispatchError> {
        let gate = StateGate::new(&config.gate.required_init_stages, events.clone()).shared();
        let mut master = MasterController::new(&config.master, gate, events);

        let device_worker = DeviceWorker::new(SimulatedDriver::new(&config.device), &config.device);
        let device_pool = device_worker.pool();
        let device = master.add_worker(device_worker)?;

        let day_log = DayLog::new();
        let logging = master.add_worker(LoggingWorker::new(day_log.clone()))?;

        master.register_state_handlers()?;
        master.register_component_route(ComponentType::DeviceControl, device)?;
        master.register_component_route(ComponentType::DataLogging, logging)?;
        master.add_broadcast(logging)?;

        Ok(Self {
            master,
            device,
            logging,
            device_pool,
            day_log,
            auto_monitor: config.gate.auto_monitor,
        })
    }

    /// Start the workers, report the settings stage and walk the gate to
    /// Init. Remaining stages arrive from the workers; Idle follows once
    /// all required stages have succeeded.
    ///
    /// Workers report their stage once, from initialisation. A later
    /// `EnterInit` clears the recorded stages, so whoever re-enters Init
    /// must submit `CmdInitStageProgress` for every required stage again
    /// (or fire `InitComplete`) before the gate returns to Idle.
    pub fn startup(&mut self) -> Result<(), DispatchError> {
        self.master.go();
        self.master.submit(state_command(CommandKind::InitStageProgress {
            stage: InitStage::Settings,
            success: true,
        }))?;
        if self.auto_monitor {
            self.master
                .submit(state_command(CommandKind::OperationEvent(OperationEvent::MonitorStart)))?;
            self.master
                .submit(state_command(CommandKind::OperationEvent(OperationEvent::SwitchPressed)))?;
        }
        info!(
            operation = self.master.gate().read().operation().name(),
            "startup sequence submitted"
        );
        Ok(())
    }
}

fn state_command(kind: CommandKind) -> Command {
    Command::new(kind).allowed_in(StatePermissions::ANYWHERE)
}
