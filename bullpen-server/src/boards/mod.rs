pub mod dashboard;
pub mod mount;
pub mod orchestrator;
pub mod provisioner;

pub use dashboard::Dashboard;
pub use mount::{InvalidMountPath, mount_paths_overlap, normalize_mount_path};
pub use orchestrator::{BoardOrchestrator, ProvisionReport};
pub use provisioner::{
    BoardFailure, BoardPhase, BoardProvisioner, MountedBoard, ProvisionError,
};
