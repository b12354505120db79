use nodewarden_types::Protocol;

use crate::alloc::AllocError;
use crate::exec::ExecError;

/// Failures surfaced by the engines and the dispatcher.
///
/// Absent clients are not errors: delete/update paths report them as a
/// `false` result so callers decide how to translate them.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("protocol {0} is not enabled on this node")]
    ProtocolDisabled(Protocol),

    #[error("invalid backup payload: {0}")]
    InvalidBackup(&'static str),

    #[error("peer limit reached ({limit})")]
    PeerLimitReached { limit: u32 },

    #[error("client id already exists: {0}")]
    DuplicateClientId(String),

    #[error("no protocols configured or detected")]
    NoProtocols,

    #[error("malformed json document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server config has no inbounds")]
    MissingInbound,

    #[error("missing secret material: {0}")]
    MissingSecret(&'static str),

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Link(#[from] nodewarden_types::link::LinkError),
}

impl NodeError {
    /// True when the node (docker daemon, container, or any backend at all)
    /// is unreachable rather than the request being wrong.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::NoProtocols => true,
            Self::Exec(e) => e.is_unavailable(),
            _ => false,
        }
    }
}
