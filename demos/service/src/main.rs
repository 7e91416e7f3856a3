#[macro_use]
extern crate log;

use clap::Parser;

use dnssd::prelude::*;
use dnssd::{
    ConnectionConfig, EventLoop, RegisterRequest, Reply, ServiceType, TransactionManager,
    TxtRecord, service_name_for_port,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Default, Debug)]
pub struct Context {
    service_name: String,
}

/// Example of a service registered with the DNS-SD daemon
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Instance name, the computer name by default
    #[clap(short, long)]
    name: Option<String>,

    /// Name of the service type
    #[clap(short = 't', long, default_value = "http")]
    service: String,

    /// Protocol of the service type
    #[clap(short, long, default_value = "tcp")]
    protocol: String,

    /// Port the service listens on
    #[clap(short = 'P', long, default_value_t = 8080)]
    port: u16,

    /// TXT record entries as `key=value`
    #[clap(long = "txt")]
    txt: Vec<String>,

    /// Seconds to stay registered
    #[clap(short, long, default_value_t = 60)]
    duration: u64,
}

fn main() -> dnssd::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let service_type = ServiceType::new(&args.service, &args.protocol)?;

    let mut txt = TxtRecord::new();
    for entry in &args.txt {
        match entry.split_once('=') {
            Some((key, value)) => txt.set(key, value)?,
            None => txt.set_flag(entry)?,
        }
    }

    if let Some(well_known) = service_name_for_port(args.port, Some(&args.protocol)) {
        info!("port {} is registered for `{well_known}`", args.port);
    }

    let mut request = RegisterRequest::builder();
    request
        .regtype(service_type.to_string())
        .port(args.port)
        .txt(txt);
    if let Some(name) = args.name {
        request.name(name);
    }

    let manager = Arc::new(TransactionManager::connect(&ConnectionConfig::from_env())?);
    let context: Arc<Mutex<Context>> = Arc::default();

    let registration = {
        let context = context.clone();
        manager.register(&request.build()?, move |result| {
            on_service_registered(result, &context)
        })?
    };

    let event_loop = EventLoop::spawn(manager, Duration::from_millis(500))?;

    thread::sleep(Duration::from_secs(args.duration));

    info!("unregistering {:?}", context.lock().unwrap().service_name);
    registration.stop()?;
    event_loop.shutdown()
}

fn on_service_registered(result: dnssd::Result<Reply>, context: &Mutex<Context>) {
    match result {
        Ok(Reply::Register(reply)) => {
            info!("service registered: {}", reply.fullname());
            context.lock().unwrap().service_name = reply.name().clone();
        }
        Ok(other) => warn!("unexpected reply: {other}"),
        Err(e) => error!("registration failed: {e}"),
    }
}
