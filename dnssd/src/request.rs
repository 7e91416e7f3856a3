//! Parameters of the operations that can be started on a [`TransactionManager`].
//!
//! [`TransactionManager`]: crate::TransactionManager

use crate::flags::{Flag, Flags};
use crate::interface::NetworkInterface;
use crate::name::construct_full_name;
use crate::service_type::parse_regtype;
use crate::txt_record::TxtRecord;
use crate::wire::Request;
use crate::{Error, Result};

const DEFAULT_DOMAIN: &str = "local";

/// Which list of recommended domains to enumerate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DomainKind {
    /// Domains recommended for browsing
    #[default]
    Browse,
    /// Domains recommended for registration
    Registration,
}

impl DomainKind {
    fn flag(self) -> Flag {
        match self {
            DomainKind::Browse => Flag::BrowseDomains,
            DomainKind::Registration => Flag::RegistrationDomains,
        }
    }
}

/// Browse for instances of a registration type.
#[derive(Builder, BuilderDelegate, Clone, Debug, Getters, PartialEq, Eq)]
#[builder(build_fn(error = "crate::Error"))]
pub struct BrowseRequest {
    /// Registration type, e.g. `_http._tcp` or `_http._tcp,_printer`
    #[builder(setter(into))]
    regtype: String,
    /// Domain to browse; all default browse domains when absent
    #[builder(default, setter(into, strip_option))]
    domain: Option<String>,
    #[builder(default)]
    interface: NetworkInterface,
}

impl BrowseRequest {
    pub(crate) fn to_wire(&self) -> Result<Request> {
        parse_regtype(&self.regtype)?;

        Ok(Request::Browse {
            flags: 0,
            interface_index: self.interface.index(),
            regtype: self.regtype.clone(),
            domain: self.domain.clone().unwrap_or_default(),
        })
    }
}

/// Resolve a named instance to its target host, port and TXT record.
#[derive(Builder, BuilderDelegate, Clone, Debug, Getters, PartialEq, Eq)]
#[builder(build_fn(error = "crate::Error"))]
pub struct ResolveRequest {
    #[builder(setter(into))]
    name: String,
    #[builder(setter(into))]
    regtype: String,
    #[builder(setter(into))]
    domain: String,
    #[builder(default)]
    interface: NetworkInterface,
}

impl ResolveRequest {
    pub(crate) fn to_wire(&self) -> Result<Request> {
        construct_full_name(&self.name, &self.regtype, &self.domain)?;

        Ok(Request::Resolve {
            flags: 0,
            interface_index: self.interface.index(),
            name: self.name.clone(),
            regtype: self.regtype.clone(),
            domain: self.domain.clone(),
        })
    }
}

/// Register (advertise) a service.
#[derive(Builder, BuilderDelegate, Clone, Debug, Getters, PartialEq, Eq)]
#[builder(build_fn(error = "crate::Error"))]
pub struct RegisterRequest {
    /// Instance name; the daemon picks the computer name when absent
    #[builder(default, setter(into, strip_option))]
    name: Option<String>,
    #[builder(setter(into))]
    regtype: String,
    /// Registration domain; the default registration domains when absent
    #[builder(default, setter(into, strip_option))]
    domain: Option<String>,
    /// Target host; this host when absent
    #[builder(default, setter(into, strip_option))]
    host: Option<String>,
    port: u16,
    #[builder(default, setter(strip_option))]
    txt: Option<TxtRecord>,
    #[builder(default)]
    interface: NetworkInterface,
    /// Report a name conflict instead of renaming automatically
    #[builder(default)]
    no_auto_rename: bool,
}

/// Registration parameters that the daemon does not echo back in its reply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Registration {
    pub(crate) interface: NetworkInterface,
    pub(crate) port: u16,
    pub(crate) txt: Option<TxtRecord>,
}

impl RegisterRequest {
    pub(crate) fn to_wire(&self) -> Result<Request> {
        let service_type = parse_regtype(&self.regtype)?;

        if let Some(name) = &self.name {
            let domain = self.domain.as_deref().unwrap_or(DEFAULT_DOMAIN);
            construct_full_name(name, &service_type.regtype(), domain)?;
        }

        if self.host.as_deref() == Some("") {
            return Err(Error::InvalidRequest("host cannot be empty".into()));
        }

        let txt = match &self.txt {
            Some(txt) => txt.to_bytes()?,
            None => vec![],
        };

        let flags = if self.no_auto_rename {
            Flags::from(Flag::NoAutoRename)
        } else {
            Flags::empty()
        };

        Ok(Request::Register {
            flags: flags.bits(),
            interface_index: self.interface.index(),
            name: self.name.clone().unwrap_or_default(),
            regtype: self.regtype.clone(),
            domain: self.domain.clone().unwrap_or_default(),
            host: self.host.clone().unwrap_or_default(),
            port: self.port,
            txt,
        })
    }

    pub(crate) fn registration(&self) -> Registration {
        Registration {
            interface: self.interface,
            port: self.port,
            txt: self.txt.clone(),
        }
    }
}

/// Enumerate the domains recommended for browsing or registration.
#[derive(Builder, BuilderDelegate, Clone, Debug, Default, Getters, PartialEq, Eq)]
#[builder(default, build_fn(error = "crate::Error"))]
pub struct EnumerateRequest {
    kind: DomainKind,
    interface: NetworkInterface,
}

impl EnumerateRequest {
    pub(crate) fn to_wire(&self) -> Request {
        Request::EnumerateDomains {
            flags: self.kind.flag().bits(),
            interface_index: self.interface.index(),
        }
    }
}
