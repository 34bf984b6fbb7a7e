pub mod config;
pub mod device;
pub mod error;
pub mod exit_code;
pub mod frn;
pub mod status;
pub mod stream;
pub mod volume;

pub use device::{Device, DeviceInfo, DeviceManager, DeviceType, Partition, PermissionLevel};
pub use error::{OrcError, Result};
pub use exit_code::ExitCode;
pub use frn::Frn;
pub use status::Status;
pub use stream::{ByteStream, FileDisposition};
pub use volume::{Altitude, BackendKind, FilesystemType, Volume};
