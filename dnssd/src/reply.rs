//! Typed replies delivered to transaction handlers.

use crate::flags::{Flag, Flags};
use crate::interface::{InterfaceName, InterfaceResolver};
use crate::name::{FullNameMode, create_full_name, normalize_domain, split_full_name};
use crate::prelude::BuilderDelegate;
use crate::request::Registration;
use crate::transaction::TransactionRef;
use crate::txt_record::TxtRecord;
use crate::wire::{ReplyBody, ReplyFrame};
use crate::Result;
use std::fmt;

/// Callback invoked for every reply (or error) of a transaction.
///
/// Handlers run on the thread that calls [`TransactionManager::poll()`] and must not call
/// `poll()` themselves. They may stop any transaction, including their own.
///
/// [`TransactionManager::poll()`]: crate::TransactionManager::poll
pub type ReplyHandler = dyn Fn(Result<Reply>) + Send + Sync;

/// A reply produced by a running transaction.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(tag = "type"))]
pub enum Reply {
    DomainEnum(DomainEnumReply),
    Browse(BrowseReply),
    Resolve(ResolveReply),
    Register(RegisterReply),
}

/// A domain found by [`TransactionManager::enumerate_domains()`].
///
/// [`TransactionManager::enumerate_domains()`]: crate::TransactionManager::enumerate_domains
#[derive(Builder, BuilderDelegate, Clone, Debug, Getters)]
#[builder(build_fn(error = "crate::Error"))]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct DomainEnumReply {
    #[cfg_attr(feature = "serde", serde(skip))]
    service: TransactionRef,
    flags: Flags,
    interface: InterfaceName,
    domain: String,
    fullname: String,
}

/// A service instance that appeared or disappeared during a browse.
#[derive(Builder, BuilderDelegate, Clone, Debug, Getters)]
#[builder(build_fn(error = "crate::Error"))]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct BrowseReply {
    #[cfg_attr(feature = "serde", serde(skip))]
    service: TransactionRef,
    flags: Flags,
    interface: InterfaceName,
    name: String,
    kind: String,
    domain: String,
    fullname: String,
}

/// The location and metadata of a resolved service instance.
#[derive(Builder, BuilderDelegate, Clone, Debug, Getters)]
#[builder(build_fn(error = "crate::Error"))]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ResolveReply {
    #[cfg_attr(feature = "serde", serde(skip))]
    service: TransactionRef,
    flags: Flags,
    interface: InterfaceName,
    name: String,
    kind: String,
    domain: String,
    fullname: String,
    target: String,
    port: u16,
    txt: TxtRecord,
}

/// Confirms a registration, carrying the name the daemon actually registered.
#[derive(Builder, BuilderDelegate, Clone, Debug, Getters)]
#[builder(build_fn(error = "crate::Error"))]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RegisterReply {
    #[cfg_attr(feature = "serde", serde(skip))]
    service: TransactionRef,
    flags: Flags,
    interface: InterfaceName,
    name: String,
    kind: String,
    domain: String,
    fullname: String,
    port: u16,
    txt: Option<TxtRecord>,
}

impl Reply {
    /// Builds the reply for a decoded wire frame.
    ///
    /// `more_coming` is folded into the reply flags. Register replies take interface, port and
    /// TXT record from `registration`.
    pub(crate) fn from_wire(
        frame: &ReplyFrame,
        body: ReplyBody,
        service: TransactionRef,
        resolver: &dyn InterfaceResolver,
        registration: Option<&Registration>,
        more_coming: bool,
    ) -> Result<Self> {
        let mut flags = Flags::from_bits(frame.flags);
        if more_coming {
            flags = flags.with(Flag::MoreComing);
        }

        let reply = match body {
            ReplyBody::DomainEnum { domain } => {
                let domain = normalize_domain(&domain).to_string();

                Reply::DomainEnum(
                    DomainEnumReply::builder()
                        .service(service)
                        .flags(flags)
                        .interface(resolver.describe(frame.interface_index))
                        .fullname(format!("{domain}."))
                        .domain(domain)
                        .build()?,
                )
            }
            ReplyBody::Browse {
                name,
                regtype,
                domain,
            } => {
                let fullname = create_full_name(&name, &regtype, &domain, FullNameMode::BestEffort)?;

                Reply::Browse(
                    BrowseReply::builder()
                        .service(service)
                        .flags(flags)
                        .interface(resolver.describe(frame.interface_index))
                        .name(name)
                        .kind(normalize_domain(&regtype).to_string())
                        .domain(normalize_domain(&domain).to_string())
                        .fullname(fullname)
                        .build()?,
                )
            }
            ReplyBody::Resolve {
                fullname,
                target,
                port,
                txt,
            } => {
                let (name, kind, domain) = split_full_name(&fullname)?.into_parts();

                Reply::Resolve(
                    ResolveReply::builder()
                        .service(service)
                        .flags(flags)
                        .interface(resolver.describe(frame.interface_index))
                        .name(name)
                        .kind(kind)
                        .domain(domain)
                        .fullname(fullname)
                        .target(target)
                        .port(port)
                        .txt(TxtRecord::from_bytes(&txt))
                        .build()?,
                )
            }
            ReplyBody::Register {
                name,
                regtype,
                domain,
            } => {
                let fullname = create_full_name(&name, &regtype, &domain, FullNameMode::BestEffort)?;
                let registration = registration.cloned().unwrap_or_default();

                Reply::Register(
                    RegisterReply::builder()
                        .service(service)
                        .flags(flags)
                        .interface(resolver.describe(registration.interface.index()))
                        .name(name)
                        .kind(normalize_domain(&regtype).to_string())
                        .domain(normalize_domain(&domain).to_string())
                        .fullname(fullname)
                        .port(registration.port)
                        .txt(registration.txt)
                        .build()?,
                )
            }
        };

        Ok(reply)
    }

    /// Returns a weak handle on the transaction that produced this reply.
    pub fn service(&self) -> &TransactionRef {
        match self {
            Reply::DomainEnum(r) => r.service(),
            Reply::Browse(r) => r.service(),
            Reply::Resolve(r) => r.service(),
            Reply::Register(r) => r.service(),
        }
    }

    pub fn flags(&self) -> Flags {
        match self {
            Reply::DomainEnum(r) => *r.flags(),
            Reply::Browse(r) => *r.flags(),
            Reply::Resolve(r) => *r.flags(),
            Reply::Register(r) => *r.flags(),
        }
    }

    pub fn interface(&self) -> &InterfaceName {
        match self {
            Reply::DomainEnum(r) => r.interface(),
            Reply::Browse(r) => r.interface(),
            Reply::Resolve(r) => r.interface(),
            Reply::Register(r) => r.interface(),
        }
    }

    pub fn domain(&self) -> &str {
        match self {
            Reply::DomainEnum(r) => r.domain(),
            Reply::Browse(r) => r.domain(),
            Reply::Resolve(r) => r.domain(),
            Reply::Register(r) => r.domain(),
        }
    }

    pub fn fullname(&self) -> &str {
        match self {
            Reply::DomainEnum(r) => r.fullname(),
            Reply::Browse(r) => r.fullname(),
            Reply::Resolve(r) => r.fullname(),
            Reply::Register(r) => r.fullname(),
        }
    }

    /// Returns true if more replies are ready for immediate delivery. Defer expensive updates
    /// until a reply where this is false.
    pub fn more_coming(&self) -> bool {
        self.flags().more_coming()
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Reply::DomainEnum(_) => "DomainEnum",
            Reply::Browse(_) => "Browse",
            Reply::Resolve(_) => "Resolve",
            Reply::Register(_) => "Register",
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<Reply::{} {}>", self.kind_name(), self.fullname())
    }
}
