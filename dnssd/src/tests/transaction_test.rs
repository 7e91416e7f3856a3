use super::fake_daemon::{FakeDaemon, Recorder, StaticInterfaces, browse_body};
use crate::prelude::*;
use crate::wire::{Frame, ReplyBody, Request};
use crate::{
    BrowseRequest, DomainKind, EnumerateRequest, Error, Flag, InterfaceName, NetworkInterface,
    RegisterRequest, Reply, ResolveRequest, TransactionKind, TxtRecord,
};
use bytes::Bytes;
use maplit::hashmap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_TIMEOUT: Duration = Duration::from_secs(5);

fn browse_request() -> BrowseRequest {
    BrowseRequest::builder().regtype("_http._tcp").build().unwrap()
}

#[test]
fn browse_sends_request_and_delivers_in_order() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let recorder = Recorder::default();

    let browse = manager.browse(&browse_request(), recorder.handler()).unwrap();
    assert_eq!(browse.kind(), TransactionKind::Browse);

    let (context, request) = daemon.expect_request();
    assert_eq!(context, browse.id());
    assert_eq!(
        request,
        Request::Browse {
            flags: 0,
            interface_index: 0,
            regtype: "_http._tcp".into(),
            domain: "".into(),
        }
    );

    let more = (Flag::Add | Flag::MoreComing).bits();
    daemon.reply_batch(&[
        (context, more, browse_body("one")),
        (context, more, browse_body("two")),
        (context, Flag::Add.bits(), browse_body("three")),
    ]);

    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 3);

    let replies = recorder
        .take()
        .into_iter()
        .map(|r| r.unwrap())
        .collect::<Vec<_>>();

    let names = replies
        .iter()
        .map(|r| match r {
            Reply::Browse(b) => b.name().clone(),
            other => panic!("unexpected reply: {other}"),
        })
        .collect::<Vec<_>>();

    assert_eq!(names, vec!["one", "two", "three"]);
    assert_eq!(
        replies.iter().map(Reply::more_coming).collect::<Vec<_>>(),
        vec![true, true, false]
    );
    assert_eq!(replies[0].service().upgrade().unwrap().id(), browse.id());
}

#[test]
fn buffered_frames_set_more_coming() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let recorder = Recorder::default();

    let _browse = manager.browse(&browse_request(), recorder.handler()).unwrap();
    let (context, _) = daemon.expect_request();

    let add = Flag::Add.bits();
    daemon.reply_batch(&[
        (context, add, browse_body("one")),
        (context, add, browse_body("two")),
    ]);

    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 2);

    let more_coming = recorder
        .take()
        .iter()
        .map(|r| r.as_ref().unwrap().more_coming())
        .collect::<Vec<_>>();

    assert_eq!(more_coming, vec![true, false]);
}

#[test]
fn more_coming_ignores_replies_that_are_dropped() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let active = Recorder::default();
    let stopped = Recorder::default();

    let _first = manager.browse(&browse_request(), active.handler()).unwrap();
    let (first, _) = daemon.expect_request();

    let second = manager.browse(&browse_request(), stopped.handler()).unwrap();
    let (context, _) = daemon.expect_request();
    second.stop().unwrap();
    assert_eq!(daemon.expect_request(), (context, Request::Cancel));

    let add = Flag::Add.bits();
    daemon.reply_batch(&[
        (first, add, browse_body("one")),
        (999, add, browse_body("stray")),
        (context, add, browse_body("late")),
    ]);

    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 1);
    assert_eq!(manager.poll(Duration::ZERO).unwrap(), 0);

    let replies = active.take();
    assert_eq!(replies.len(), 1);
    assert!(!replies[0].as_ref().unwrap().more_coming());
    assert_eq!(stopped.len(), 0);
}

#[test]
fn poll_times_out_without_replies() {
    super::setup();

    let (manager, _daemon) = FakeDaemon::connect();

    let start = Instant::now();
    assert_eq!(manager.poll(Duration::from_millis(50)).unwrap(), 0);
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn wake_interrupts_poll() {
    super::setup();

    let (manager, _daemon) = FakeDaemon::connect();
    let manager = Arc::new(manager);

    let waker = {
        let manager = manager.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            manager.wake().unwrap();
        })
    };

    let start = Instant::now();
    assert_eq!(manager.poll(Duration::from_secs(30)).unwrap(), 0);
    assert!(start.elapsed() < Duration::from_secs(10));

    waker.join().unwrap();
}

#[test]
fn stop_suppresses_replies_and_cancels() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let recorder = Recorder::default();

    let browse = manager.browse(&browse_request(), recorder.handler()).unwrap();
    let (context, _) = daemon.expect_request();

    manager.stop(&browse).unwrap();
    assert!(!browse.is_active());
    assert_eq!(manager.active_count(), 0);
    assert_eq!(daemon.expect_request(), (context, Request::Cancel));

    daemon.reply(context, Flag::Add.bits(), browse_body("late"));
    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 0);
    assert_eq!(recorder.len(), 0);

    browse.stop().unwrap();
    assert!(daemon.is_quiet());
}

#[test]
fn stop_from_inside_handler() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let recorder = Recorder::default();

    let record = recorder.handler();
    let browse = manager
        .browse(&browse_request(), move |result| {
            if let Ok(reply) = &result {
                reply.service().upgrade().unwrap().stop().unwrap();
            }
            record(result);
        })
        .unwrap();

    let (context, _) = daemon.expect_request();

    daemon.reply_batch(&[
        (context, Flag::Add.bits(), browse_body("one")),
        (context, Flag::Add.bits(), browse_body("two")),
    ]);

    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 1);
    assert_eq!(recorder.len(), 1);
    assert!(!browse.is_active());
    assert_eq!(daemon.expect_request(), (context, Request::Cancel));
}

#[test]
fn stop_waits_for_in_flight_delivery() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let manager = Arc::new(manager);

    let (entered_tx, entered_rx) = mpsc::channel();
    let finished = Arc::new(AtomicBool::new(false));

    let browse = {
        let finished = finished.clone();
        manager
            .browse(&browse_request(), move |_| {
                entered_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(200));
                finished.store(true, Ordering::SeqCst);
            })
            .unwrap()
    };

    let (context, _) = daemon.expect_request();
    daemon.reply(context, Flag::Add.bits(), browse_body("one"));

    let poller = {
        let manager = manager.clone();
        thread::spawn(move || manager.poll(POLL_TIMEOUT).unwrap())
    };

    entered_rx.recv_timeout(POLL_TIMEOUT).unwrap();
    browse.stop().unwrap();
    assert!(finished.load(Ordering::SeqCst));

    assert_eq!(poller.join().unwrap(), 1);
}

#[test]
fn transport_failure_ends_every_transaction() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let browse_results = Recorder::default();
    let resolve_results = Recorder::default();

    let browse = manager
        .browse(&browse_request(), browse_results.handler())
        .unwrap();

    let resolve_request = ResolveRequest::builder()
        .name("printer")
        .regtype("_ipp._tcp")
        .domain("local")
        .build()
        .unwrap();
    let resolve = manager
        .resolve(&resolve_request, resolve_results.handler())
        .unwrap();

    daemon.expect_request();
    daemon.expect_request();
    daemon.close();

    let error = manager.poll(POLL_TIMEOUT).unwrap_err();
    assert!(matches!(error, Error::Transport { .. }));

    for recorder in [&browse_results, &resolve_results] {
        let results = recorder.take();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(Error::Transport { .. })));
    }

    assert!(!browse.is_active());
    assert!(!resolve.is_active());
    assert_eq!(manager.active_count(), 0);

    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap_err(), error);
    assert!(matches!(
        manager.browse(&browse_request(), |_| {}),
        Err(Error::Transport { .. })
    ));
    browse.stop().unwrap();
}

#[test]
fn oversized_frame_is_a_transport_failure() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let recorder = Recorder::default();

    let _browse = manager.browse(&browse_request(), recorder.handler()).unwrap();
    let (context, _) = daemon.expect_request();

    let mut frame = Frame::new(66, context, Bytes::new()).to_bytes().to_vec();
    frame[4..8].copy_from_slice(&1_000_000u32.to_be_bytes());
    daemon.write_raw(&frame);

    assert!(matches!(
        manager.poll(POLL_TIMEOUT),
        Err(Error::Transport { code, .. }) if code == libc::EPROTO
    ));
    assert_eq!(recorder.len(), 1);
}

#[test]
fn daemon_error_ends_transaction() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let recorder = Recorder::default();

    let request = RegisterRequest::builder()
        .name("Web")
        .regtype("_http._tcp")
        .port(8080)
        .no_auto_rename(true)
        .build()
        .unwrap();
    let register = manager.register(&request, recorder.handler()).unwrap();
    let (context, _) = daemon.expect_request();

    daemon.reply_on(
        context,
        0,
        0,
        -65548,
        ReplyBody::Register {
            name: "".into(),
            regtype: "".into(),
            domain: "".into(),
        },
    );

    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 1);

    let results = recorder.take();
    assert_eq!(
        results[0].as_ref().unwrap_err(),
        &Error::MdnsSystemError {
            code: -65548,
            message: "name conflict".into(),
        }
    );
    assert!(!register.is_active());
    assert_eq!(manager.active_count(), 0);

    // the daemon already dropped the registration
    register.stop().unwrap();
    assert!(daemon.is_quiet());
}

#[test]
fn malformed_body_is_not_terminal() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let recorder = Recorder::default();

    let browse = manager.browse(&browse_request(), recorder.handler()).unwrap();
    let (context, _) = daemon.expect_request();

    let truncated = Frame::new(66, context, Bytes::from_static(&[0; 12]));
    daemon.write_raw(&truncated.to_bytes());
    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 1);

    daemon.reply(context, Flag::Add.bits(), browse_body("one"));
    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 1);

    let results = recorder.take();
    assert!(matches!(results[0], Err(Error::Protocol(_))));
    assert!(results[1].is_ok());
    assert!(browse.is_active());
}

#[test]
fn mismatched_reply_kind_is_reported() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let recorder = Recorder::default();

    let _browse = manager.browse(&browse_request(), recorder.handler()).unwrap();
    let (context, _) = daemon.expect_request();

    daemon.reply(
        context,
        0,
        ReplyBody::DomainEnum {
            domain: "local.".into(),
        },
    );

    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 1);
    assert!(matches!(recorder.take()[0], Err(Error::Protocol(_))));
}

#[test]
fn reply_for_unknown_transaction_is_dropped() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();

    daemon.reply(999, 0, browse_body("stray"));
    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 0);
}

#[test]
fn register_reply_carries_registration_parameters() {
    super::setup();

    let (mut manager, mut daemon) = FakeDaemon::connect();
    manager.set_interface_resolver(Arc::new(StaticInterfaces(hashmap! { 7 => "en7" })));

    let txt = TxtRecord::try_from(hashmap! { "path" => "/", "version" => "2" }).unwrap();
    let request = RegisterRequest::builder()
        .name("Web")
        .regtype("_http._tcp")
        .port(8080)
        .txt(txt.clone())
        .interface(NetworkInterface::AtIndex(7))
        .build()
        .unwrap();

    let recorder = Recorder::default();
    let _register = manager.register(&request, recorder.handler()).unwrap();

    let (context, sent) = daemon.expect_request();
    assert_eq!(
        sent,
        Request::Register {
            flags: 0,
            interface_index: 7,
            name: "Web".into(),
            regtype: "_http._tcp".into(),
            domain: "".into(),
            host: "".into(),
            port: 8080,
            txt: txt.to_bytes().unwrap(),
        }
    );

    daemon.reply(
        context,
        Flag::Add.bits(),
        ReplyBody::Register {
            name: "Web (2)".into(),
            regtype: "_http._tcp.".into(),
            domain: "local.".into(),
        },
    );

    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 1);

    let mut results = recorder.take();
    let Ok(Reply::Register(reply)) = results.remove(0) else {
        panic!("expected register reply");
    };

    assert_eq!(reply.name(), "Web (2)");
    assert_eq!(reply.kind(), "_http._tcp");
    assert_eq!(reply.domain(), "local");
    assert_eq!(reply.fullname(), "Web\\032(2)._http._tcp.local.");
    assert_eq!(reply.interface(), &InterfaceName::Name("en7".into()));
    assert_eq!(*reply.port(), 8080);
    assert_eq!(reply.txt(), &Some(txt));
}

#[test]
fn resolve_reply_splits_fullname() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let recorder = Recorder::default();

    let request = ResolveRequest::builder()
        .name("Dr. Pepper")
        .regtype("_http._tcp")
        .domain("local")
        .build()
        .unwrap();
    let _resolve = manager.resolve(&request, recorder.handler()).unwrap();

    let (context, sent) = daemon.expect_request();
    assert!(matches!(sent, Request::Resolve { ref name, .. } if name == "Dr. Pepper"));

    daemon.reply_on(
        context,
        0,
        3,
        0,
        ReplyBody::Resolve {
            fullname: "Dr\\.\\032Pepper._http._tcp.local.".into(),
            target: "pepper.local.".into(),
            port: 80,
            txt: vec![4, b'k', b'1', b'=', b'1', 4, b'k', b'2', b'=', b'2'],
        },
    );

    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 1);

    let mut results = recorder.take();
    let Ok(Reply::Resolve(reply)) = results.remove(0) else {
        panic!("expected resolve reply");
    };

    assert_eq!(reply.name(), "Dr. Pepper");
    assert_eq!(reply.kind(), "_http._tcp");
    assert_eq!(reply.domain(), "local");
    assert_eq!(reply.target(), "pepper.local.");
    assert_eq!(*reply.port(), 80);
    assert_eq!(reply.txt().get_str("k2"), Some("2"));
}

#[test]
fn enumerate_domains_reports_default_domain() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();
    let recorder = Recorder::default();

    let request = EnumerateRequest::builder()
        .kind(DomainKind::Browse)
        .build()
        .unwrap();
    let enumerate = manager.enumerate_domains(&request, recorder.handler()).unwrap();
    assert_eq!(enumerate.kind(), TransactionKind::EnumerateDomains);

    let (context, sent) = daemon.expect_request();
    assert_eq!(
        sent,
        Request::EnumerateDomains {
            flags: Flag::BrowseDomains.bits(),
            interface_index: 0,
        }
    );

    daemon.reply(
        context,
        (Flag::Add | Flag::Default).bits(),
        ReplyBody::DomainEnum {
            domain: "local.".into(),
        },
    );

    assert_eq!(manager.poll(POLL_TIMEOUT).unwrap(), 1);

    let results = recorder.take();
    let reply = results[0].as_ref().unwrap();
    assert_eq!(reply.fullname(), "local.");
    assert_eq!(reply.domain(), "local");
    assert!(reply.flags().is_default());
    assert_eq!(reply.to_string(), "#<Reply::DomainEnum local.>");
}

#[test]
fn invalid_request_fails_synchronously() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();

    let request = BrowseRequest::builder().regtype("bogus").build().unwrap();
    assert!(matches!(
        manager.browse(&request, |_| {}),
        Err(Error::InvalidServiceType(_))
    ));

    let mut oversized = TxtRecord::new();
    for i in 0..300 {
        oversized.set(&format!("key{i}"), vec![b'x'; 240]).unwrap();
    }

    let request = RegisterRequest::builder()
        .regtype("_http._tcp")
        .port(80)
        .txt(oversized)
        .build()
        .unwrap();
    assert!(matches!(
        manager.register(&request, |_| {}),
        Err(Error::RecordTooLarge { .. })
    ));

    assert_eq!(manager.active_count(), 0);
    assert!(daemon.is_quiet());
}

#[test]
fn dropping_manager_deactivates_transactions() {
    super::setup();

    let (manager, mut daemon) = FakeDaemon::connect();

    let browse = manager.browse(&browse_request(), |_| {}).unwrap();
    daemon.expect_request();

    let weak = browse.downgrade();
    drop(manager);

    assert!(!browse.is_active());
    browse.stop().unwrap();
    assert!(weak.upgrade().is_some());

    drop(browse);
    assert!(weak.upgrade().is_none());
}
