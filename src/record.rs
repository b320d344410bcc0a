//! Transport records: one active (protocol, port) pair under an address.

use crate::error::TableError;
use crate::id_pool::{Id, IdClass};
use core::fmt;

/// Transport protocol of a record, tagged with its IP protocol number.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum Protocol {
    Tcp = 6,
    Udp = 17,
}

impl Protocol {
    /// IP protocol number (6 or 17).
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Pool this protocol's record ids are drawn from.
    pub fn id_class(self) -> IdClass {
        match self {
            Protocol::Tcp => IdClass::Tcp,
            Protocol::Udp => IdClass::Udp,
        }
    }
}

impl TryFrom<u8> for Protocol {
    type Error = TableError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            6 => Ok(Protocol::Tcp),
            17 => Ok(Protocol::Udp),
            other => Err(TableError::UnknownProtocol(other)),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        })
    }
}

/// What a caller attaches with `set`: a protocol and a port.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Endpoint {
    pub protocol: Protocol,
    pub port: u16,
}

impl Endpoint {
    pub const fn tcp(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            port,
        }
    }

    pub const fn udp(port: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            port,
        }
    }
}

/// Fields shared by both record variants.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PortRecord {
    pub id: Id,
    pub port: u16,
}

/// A live record in an address entry's list. The variant is the protocol.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TransportRecord {
    Tcp(PortRecord),
    Udp(PortRecord),
}

impl TransportRecord {
    pub(crate) fn new(protocol: Protocol, id: Id, port: u16) -> Self {
        let r = PortRecord { id, port };
        match protocol {
            Protocol::Tcp => TransportRecord::Tcp(r),
            Protocol::Udp => TransportRecord::Udp(r),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            TransportRecord::Tcp(_) => Protocol::Tcp,
            TransportRecord::Udp(_) => Protocol::Udp,
        }
    }

    fn fields(&self) -> &PortRecord {
        match self {
            TransportRecord::Tcp(r) | TransportRecord::Udp(r) => r,
        }
    }

    pub fn id(&self) -> Id {
        self.fields().id
    }

    pub fn port(&self) -> u16 {
        self.fields().port
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            protocol: self.protocol(),
            port: self.port(),
        }
    }

    pub fn matches(&self, protocol: Protocol, port: u16) -> bool {
        self.protocol() == protocol && self.port() == port
    }
}

impl fmt::Display for TransportRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{[{:<3}] {} {:<4}}}", self.id(), self.protocol(), self.port())
    }
}
