use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dbus connection error")]
    DbusError(#[from] zbus::Error),
    #[error("Dbus call failed: {0}")]
    DbusCallError(#[from] zbus::fdo::Error),
    #[error("{0} did not reply within {1}ms")]
    Timeout(String, u64),
    #[error("Malformed reply from {peer}: {reason}")]
    MalformedReply { peer: String, reason: String },
    #[error("Could not become {0}, another tray owns it")]
    NameTaken(String),
    #[error("Icon could not be decoded: {0}")]
    Decode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "x11")]
    #[error("X11 connection error")]
    X11Connection(#[from] x11rb::errors::ConnectionError),
    #[cfg(feature = "x11")]
    #[error("X11 request failed")]
    X11Reply(#[from] x11rb::errors::ReplyError),
    #[cfg(feature = "x11")]
    #[error("X11 request failed")]
    X11ReplyOrId(#[from] x11rb::errors::ReplyOrIdError),
}

impl Error {
    pub(crate) fn malformed(peer: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::MalformedReply { peer: peer.into(), reason: reason.to_string() }
    }

    /// Whether this error only tells us that the peer doesn't have the property we asked for.
    ///
    /// Many items leave optional properties unimplemented, which is fine and shouldn't be logged
    /// as a failure.
    pub fn is_missing_property(&self) -> bool {
        use zbus::fdo::Error as Fdo;
        let fdo = match self {
            Error::DbusCallError(e) => e,
            Error::DbusError(zbus::Error::FDO(e)) => e.as_ref(),
            _ => return false,
        };
        match fdo {
            Fdo::UnknownProperty(_) | Fdo::InvalidArgs(_) => true,
            // this error is reported by discord, blueman-applet
            Fdo::Failed(msg) => msg == "error occurred in Get",
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
