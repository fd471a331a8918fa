//! Ownership handshake between the inbound and outbound half of one exchange.

use crate::error::{Error, Result};

/// Which halves of a proxied exchange still reference the shared context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pairing {
    /// The inbound side is waiting for an outbound connection.
    #[default]
    Unpaired,
    Paired,
    ServerDetached,
    ClientDetached,
    /// Nobody references the context any more; it can be dropped.
    BothDetached,
}

impl Pairing {
    /// The outbound side started its transaction. A retried transaction on a
    /// fresh connection pairs again.
    pub fn pair(&mut self) -> Result<()> {
        match self {
            Pairing::Unpaired | Pairing::Paired => {
                *self = Pairing::Paired;
                Ok(())
            }
            _ => Err(Error::InvalidState),
        }
    }

    pub fn detach_server(&mut self) {
        *self = match self {
            Pairing::Unpaired | Pairing::ClientDetached | Pairing::BothDetached => Pairing::BothDetached,
            Pairing::Paired | Pairing::ServerDetached => Pairing::ServerDetached,
        };
    }

    /// An unpaired outbound transaction never held the context.
    pub fn detach_client(&mut self) {
        *self = match self {
            Pairing::Unpaired => Pairing::Unpaired,
            Pairing::Paired | Pairing::ClientDetached => Pairing::ClientDetached,
            Pairing::ServerDetached | Pairing::BothDetached => Pairing::BothDetached,
        };
    }

    pub fn server_attached(self) -> bool {
        matches!(self, Pairing::Unpaired | Pairing::Paired | Pairing::ClientDetached)
    }

    pub fn client_attached(self) -> bool {
        matches!(self, Pairing::Paired | Pairing::ServerDetached)
    }

    pub fn is_finished(self) -> bool {
        self == Pairing::BothDetached
    }
}
