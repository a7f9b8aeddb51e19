use thiserror::Error;
use vmesh_bmf::{BuildError, DispatchError, InterfaceId, InterfaceSendError};
use vmesh_wire::Vnid;

/// Runtime errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error("interface port {0} is already attached")]
    DuplicateInterface(InterfaceId),

    #[error("variable {name:?} or id {vnid} is already registered")]
    DuplicateVariable { name: String, vnid: Vnid },

    #[error("variable id 0 is reserved for name resolution")]
    ReservedVnid,

    #[error("send failed: {0}")]
    Send(#[from] InterfaceSendError),

    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("local delivery failed: {0}")]
    Dispatch(DispatchError),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
