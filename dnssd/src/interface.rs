//! Network interface selection and name lookups.

use crate::{Error, Result, ffi};
use std::fmt;

const INTERFACE_ANY: u32 = 0;
const INTERFACE_LOCAL_ONLY: u32 = u32::MAX;
const INTERFACE_UNICAST: u32 = u32::MAX - 1;

/// Represents a network interface for DNS-SD operations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NetworkInterface {
    /// No interface specified, operate on all available interfaces
    #[default]
    Any,
    /// Services running only on the local machine
    LocalOnly,
    /// Unicast DNS only
    Unicast,
    /// An interface at a specified index
    AtIndex(u32),
}

impl NetworkInterface {
    /// Looks up the interface with the specified name (e.g. `en0`).
    pub fn by_name(name: &str) -> Result<Self> {
        interface_name_to_index(name).map(NetworkInterface::AtIndex)
    }

    /// Converts the specified wire interface index to a `NetworkInterface`.
    pub fn from_index(index: u32) -> Self {
        match index {
            INTERFACE_ANY => NetworkInterface::Any,
            INTERFACE_LOCAL_ONLY => NetworkInterface::LocalOnly,
            INTERFACE_UNICAST => NetworkInterface::Unicast,
            _ => NetworkInterface::AtIndex(index),
        }
    }

    /// Converts this interface to the value used on the wire.
    pub fn index(self) -> u32 {
        match self {
            NetworkInterface::Any => INTERFACE_ANY,
            NetworkInterface::LocalOnly => INTERFACE_LOCAL_ONLY,
            NetworkInterface::Unicast => INTERFACE_UNICAST,
            NetworkInterface::AtIndex(i) => i,
        }
    }
}

/// The interface a reply arrived on: its name when the lookup succeeds, otherwise its index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(untagged))]
pub enum InterfaceName {
    Name(String),
    Index(u32),
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceName::Name(name) => f.write_str(name),
            InterfaceName::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Translates between interface names and indexes.
pub trait InterfaceResolver: Send + Sync {
    fn name_to_index(&self, name: &str) -> Result<u32>;

    fn index_to_name(&self, index: u32) -> Result<String>;

    /// Resolves `index` to a name, falling back to the numeric form when the lookup fails.
    fn describe(&self, index: u32) -> InterfaceName {
        self.index_to_name(index)
            .map(InterfaceName::Name)
            .unwrap_or(InterfaceName::Index(index))
    }
}

/// [`InterfaceResolver`] backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemInterfaces;

impl InterfaceResolver for SystemInterfaces {
    fn name_to_index(&self, name: &str) -> Result<u32> {
        interface_name_to_index(name)
    }

    fn index_to_name(&self, index: u32) -> Result<String> {
        index_to_interface_name(index)
    }
}

/// Returns the index of the interface named `name`.
pub fn interface_name_to_index(name: &str) -> Result<u32> {
    ffi::if_nametoindex(name).ok_or_else(|| Error::UnknownInterface(name.to_string()))
}

/// Returns the name of the interface at `index`.
pub fn index_to_interface_name(index: u32) -> Result<String> {
    ffi::if_indextoname(index).ok_or_else(|| Error::UnknownInterface(index.to_string()))
}
