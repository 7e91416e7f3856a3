#[macro_use]
extern crate log;

use clap::Parser;

use dnssd::prelude::*;
use dnssd::{
    BrowseRequest, ConnectionConfig, NetworkInterface, Reply, ResolveRequest, ServiceType,
    TransactionManager,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Example of a simple DNS-SD browser that resolves every service it finds
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Name of the service type to browse
    #[clap(short, long, default_value = "http")]
    name: String,

    /// Protocol of the service type to browse
    #[clap(short, long, default_value = "tcp")]
    protocol: String,

    /// Sub-type of the service type to browse
    #[clap(short, long)]
    sub_type: Option<String>,

    /// Domain to browse, all browse domains by default
    #[clap(short, long)]
    domain: Option<String>,

    /// Network interface to browse on, e.g. `en0`
    #[clap(short, long)]
    interface: Option<String>,

    /// Path of the daemon socket, overrides `DNSSD_SOCKET`
    #[clap(long)]
    socket: Option<PathBuf>,
}

fn main() -> dnssd::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("RUST_LOG", "info")).init();

    let Args {
        name,
        protocol,
        sub_type,
        domain,
        interface,
        socket,
    } = Args::parse();

    let sub_types: Vec<&str> = match sub_type.as_ref() {
        Some(sub_type) => vec![sub_type],
        None => vec![],
    };

    let service_type = ServiceType::with_sub_types(&name, &protocol, sub_types)?;

    let interface = match interface {
        Some(name) => NetworkInterface::by_name(&name)?,
        None => NetworkInterface::Any,
    };

    let mut config = ConnectionConfig::from_env();
    if let Some(socket) = socket {
        config = ConnectionConfig::builder()
            .socket_path(socket)
            .read_chunk(*config.read_chunk())
            .build()?;
    }

    let manager = Arc::new(TransactionManager::connect(&config)?);

    let mut request = BrowseRequest::builder();
    request.regtype(service_type.to_string()).interface(interface);
    if let Some(domain) = domain {
        request.domain(domain);
    }

    let resolves = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let manager = Arc::downgrade(&manager);
        let resolves = resolves.clone();
        move |result| on_browse_event(result, &manager, &resolves)
    };

    let _browse = manager.browse(&request.build()?, handler)?;

    info!("browsing for {service_type}");

    loop {
        // calling `poll()` keeps the browse and every resolve running
        manager.poll(Duration::from_secs(1))?;
    }
}

fn on_browse_event(
    result: dnssd::Result<Reply>,
    manager: &Weak<TransactionManager>,
    resolves: &Mutex<Vec<dnssd::Transaction>>,
) {
    let reply = match result {
        Ok(Reply::Browse(reply)) => reply,
        Ok(other) => return warn!("unexpected reply: {other}"),
        Err(e) => return error!("browse failed: {e}"),
    };

    if !reply.flags().is_add() {
        info!("service removed: {}", reply.fullname());
        return;
    }

    info!("service found: {}", reply.fullname());

    let Some(manager) = manager.upgrade() else {
        return;
    };

    let request = ResolveRequest::builder()
        .name(reply.name().clone())
        .regtype(reply.kind().clone())
        .domain(reply.domain().clone())
        .build();

    let resolve = request.and_then(|request| manager.resolve(&request, on_resolve_event));

    match resolve {
        Ok(transaction) => {
            let mut resolves = resolves.lock().unwrap();
            resolves.retain(dnssd::Transaction::is_active);
            resolves.push(transaction);
        }
        Err(e) => error!("could not resolve {}: {e}", reply.fullname()),
    }

    if !reply.flags().more_coming() {
        debug!("{} resolve(s) started", resolves.lock().unwrap().len());
    }
}

fn on_resolve_event(result: dnssd::Result<Reply>) {
    match result {
        Ok(Reply::Resolve(reply)) => {
            info!(
                "resolved {} -> {}:{} txt={:?} (interface {})",
                reply.name(),
                reply.target(),
                reply.port(),
                reply.txt().to_map(),
                reply.interface()
            );

            // one answer is enough for this example
            if let Some(transaction) = reply.service().upgrade() {
                if let Err(e) = transaction.stop() {
                    warn!("could not stop resolve: {e}");
                }
            }
        }
        Ok(other) => warn!("unexpected reply: {other}"),
        Err(e) => error!("resolve failed: {e}"),
    }
}
