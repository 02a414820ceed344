//! Coordinators turn one large range into many work units and drive the
//! engines that scan them: `LocalCoordinator` fans out across the devices of
//! one machine, `WorkCoordinator` runs the distributed unit registry.

mod distributed;
mod local;

pub use distributed::{CoordinatorConfig, WorkCoordinator, WorkUnit, WorkerStatus};
pub use local::{DeviceSpec, LocalCoordinator};
