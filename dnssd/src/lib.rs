//! `dnssd` is a DNS Service Discovery client that talks to a local responder daemon (such as
//! mDNSResponder) over its unix socket. It browses for services, resolves them, registers them
//! and enumerates recommended domains, all multiplexed over one connection.
//!
//! Most users of this crate need only [`TransactionManager`], the request builders in
//! [`request`] and the [`Reply`] types delivered to handlers.
//!
//! # Examples
//!
//! ## Browsing services
//!
//! ```no_run
//! use dnssd::prelude::*;
//! use dnssd::{BrowseRequest, ConnectionConfig, EventLoop, Reply, TransactionManager};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> dnssd::Result<()> {
//!     let manager = Arc::new(TransactionManager::connect(&ConnectionConfig::from_env())?);
//!     let request = BrowseRequest::builder().regtype("_http._tcp").build()?;
//!
//!     let _browse = manager.browse(&request, |result| match result {
//!         Ok(Reply::Browse(reply)) if reply.flags().is_add() => {
//!             println!("found {}", reply.fullname());
//!         }
//!         Ok(reply) => println!("{reply}"),
//!         Err(e) => eprintln!("browse failed: {e}"),
//!     })?;
//!
//!     // polls on a background thread until dropped
//!     let event_loop = EventLoop::spawn(manager, Duration::from_millis(500))?;
//!     std::thread::sleep(Duration::from_secs(10));
//!     event_loop.shutdown()
//! }
//! ```
//!
//! ## Registering a service
//!
//! Replies are only delivered while the manager is polled. `poll()` may also be called
//! directly:
//!
//! ```no_run
//! use dnssd::prelude::*;
//! use dnssd::{ConnectionConfig, RegisterRequest, TransactionManager, TxtRecord};
//! use std::time::Duration;
//!
//! fn main() -> dnssd::Result<()> {
//!     let manager = TransactionManager::connect(&ConnectionConfig::default())?;
//!
//!     let mut txt = TxtRecord::new();
//!     txt.set("path", "/")?;
//!
//!     let request = RegisterRequest::builder()
//!         .regtype("_http._tcp")
//!         .port(8080)
//!         .txt(txt)
//!         .build()?;
//!
//!     let registration = manager.register(&request, |result| {
//!         println!("registered: {:?}", result);
//!     })?;
//!
//!     manager.poll(Duration::from_secs(5))?;
//!     registration.stop()
//! }
//! ```

#![allow(clippy::needless_doctest_main)]
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate dnssd_macros;
#[macro_use]
extern crate derive_getters;
#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_new;
extern crate libc;

mod transport;

pub mod config;
pub mod error;
pub mod event_loop;
pub mod ffi;
pub mod flags;
pub mod interface;
pub mod name;
pub mod prelude;
pub mod reply;
pub mod request;
pub mod service_type;
pub mod services;
pub mod transaction;
pub mod txt_record;
pub mod wire;

pub use config::ConnectionConfig;
pub use error::{Error, Result};
pub use event_loop::EventLoop;
pub use flags::{Flag, Flags};
pub use interface::{
    InterfaceName, NetworkInterface, SystemInterfaces, index_to_interface_name,
    interface_name_to_index,
};
pub use name::{
    FullNameMode, ServiceIdentity, construct_full_name, create_full_name, split_full_name,
};
pub use reply::{BrowseReply, DomainEnumReply, RegisterReply, Reply, ReplyHandler, ResolveReply};
pub use request::{BrowseRequest, DomainKind, EnumerateRequest, RegisterRequest, ResolveRequest};
pub use service_type::ServiceType;
pub use services::service_name_for_port;
pub use transaction::{Transaction, TransactionKind, TransactionManager, TransactionRef};
pub use txt_record::TxtRecord;

#[cfg(test)]
mod tests;
