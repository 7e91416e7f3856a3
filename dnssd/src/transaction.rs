//! Multiplexes discovery operations over a single daemon connection.
//!
//! A [`TransactionManager`] owns the connection. Every operation started on it yields a
//! [`Transaction`] handle, and replies are dispatched to the operation's handler from
//! [`TransactionManager::poll()`], one at a time and in the order the daemon sent them.

use crate::config::ConnectionConfig;
use crate::interface::{InterfaceResolver, SystemInterfaces};
use crate::reply::{Reply, ReplyHandler};
use crate::request::{
    BrowseRequest, EnumerateRequest, RegisterRequest, Registration, ResolveRequest,
};
use crate::transport::{Transport, TransportWriter, Waker};
use crate::wire::{Frame, ReplyFrame, ReplyOp, Request};
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// The kind of operation behind a [`Transaction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransactionKind {
    EnumerateDomains,
    Browse,
    Resolve,
    Register,
}

impl TransactionKind {
    fn reply_op(self) -> ReplyOp {
        match self {
            TransactionKind::EnumerateDomains => ReplyOp::DomainEnum,
            TransactionKind::Browse => ReplyOp::Browse,
            TransactionKind::Resolve => ReplyOp::Resolve,
            TransactionKind::Register => ReplyOp::Register,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::EnumerateDomains => "enumerate-domains",
            TransactionKind::Browse => "browse",
            TransactionKind::Resolve => "resolve",
            TransactionKind::Register => "register",
        };
        f.write_str(name)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct DeliveryState {
    active: bool,
    delivering: Option<ThreadId>,
}

/// One outstanding operation and its handler.
struct Operation {
    id: u64,
    kind: TransactionKind,
    registration: Option<Registration>,
    handler: Box<ReplyHandler>,
    state: Mutex<DeliveryState>,
    idle: Condvar,
}

impl Operation {
    fn new(
        id: u64,
        kind: TransactionKind,
        registration: Option<Registration>,
        handler: Box<ReplyHandler>,
    ) -> Self {
        Self {
            id,
            kind,
            registration,
            handler,
            state: Mutex::new(DeliveryState {
                active: true,
                delivering: None,
            }),
            idle: Condvar::new(),
        }
    }

    fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    /// Invokes the handler with `result` unless the operation has been deactivated. Returns
    /// true if the handler ran.
    fn deliver(&self, result: Result<Reply>) -> bool {
        {
            let mut state = lock(&self.state);
            if !state.active {
                trace!("suppressing reply for stopped transaction {}", self.id);
                return false;
            }
            state.delivering = Some(thread::current().id());
        }

        let _delivery = DeliveryGuard(self);
        (self.handler)(result);

        true
    }

    /// Prevents further deliveries. If another thread is inside the handler, waits for it to
    /// return. Returns true if the operation was active.
    fn deactivate(&self) -> bool {
        let current = thread::current().id();
        let mut state = lock(&self.state);
        let was_active = state.active;

        state.active = false;

        while state.delivering.is_some_and(|t| t != current) {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        was_active
    }
}

/// Marks the end of a delivery, including one unwound by a panicking handler.
struct DeliveryGuard<'a>(&'a Operation);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        lock(&self.0.state).delivering = None;
        self.0.idle.notify_all();
    }
}

#[derive(Default)]
struct OperationTable {
    operations: HashMap<u64, Arc<Operation>>,
    failure: Option<Error>,
}

/// State reachable from [`Transaction`] handles.
struct Shared {
    writer: Mutex<TransportWriter>,
    table: Mutex<OperationTable>,
    next_id: AtomicU64,
}

impl Shared {
    fn send(&self, frame: &Frame) -> Result<()> {
        lock(&self.writer).send(frame)
    }

    /// Removes `id` from the table and asks the daemon to cancel it, unless it already ended.
    fn cancel(&self, id: u64) -> Result<()> {
        let removed = {
            let mut table = lock(&self.table);
            if table.failure.is_some() {
                None
            } else {
                table.operations.remove(&id)
            }
        };

        if removed.is_none() {
            return Ok(());
        }

        debug!("cancelling transaction {id}");

        self.send(&Request::Cancel.to_frame(id)?)
    }

    /// Ends `operation` after a terminal reply; the daemon already dropped it.
    fn finish(&self, operation: &Operation) {
        operation.deactivate();
        lock(&self.table).operations.remove(&operation.id);
    }
}

/// A handle on one running operation. Cloning the handle does not duplicate the operation.
#[derive(Clone)]
pub struct Transaction {
    operation: Arc<Operation>,
    shared: Weak<Shared>,
}

impl Transaction {
    /// Returns the identifier sent to the daemon for this operation.
    pub fn id(&self) -> u64 {
        self.operation.id
    }

    pub fn kind(&self) -> TransactionKind {
        self.operation.kind
    }

    /// Returns false once the transaction was stopped, failed, or its manager was dropped.
    pub fn is_active(&self) -> bool {
        self.operation.is_active()
    }

    /// Stops the transaction.
    ///
    /// After this returns the handler is not invoked again, and a delivery that was in
    /// progress on another thread has completed. May be called from inside the handler.
    /// Stopping an inactive transaction does nothing. Returns an error only if the cancel
    /// request could not be written; the handler stays silent regardless.
    pub fn stop(&self) -> Result<()> {
        self.operation.deactivate();

        match self.shared.upgrade() {
            Some(shared) => shared.cancel(self.operation.id),
            None => Ok(()),
        }
    }

    /// Returns a weak reference to this transaction.
    pub fn downgrade(&self) -> TransactionRef {
        TransactionRef {
            operation: Arc::downgrade(&self.operation),
            shared: self.shared.clone(),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.operation.id)
            .field("kind", &self.operation.kind)
            .field("active", &self.is_active())
            .finish()
    }
}

/// A weak reference to a [`Transaction`], held by replies. It never keeps the operation alive.
#[derive(Clone, Default)]
pub struct TransactionRef {
    operation: Weak<Operation>,
    shared: Weak<Shared>,
}

impl TransactionRef {
    /// Returns the transaction if it still exists.
    pub fn upgrade(&self) -> Option<Transaction> {
        Some(Transaction {
            operation: self.operation.upgrade()?,
            shared: self.shared.clone(),
        })
    }
}

impl fmt::Debug for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation.upgrade() {
            Some(operation) => write!(f, "TransactionRef({})", operation.id),
            None => f.write_str("TransactionRef(<dropped>)"),
        }
    }
}

/// Owns the connection to the responder daemon and every operation running on it.
///
/// Operations may be started and stopped from any thread. Replies are read and dispatched by
/// [`poll()`](Self::poll), which only one thread runs at a time.
pub struct TransactionManager {
    shared: Arc<Shared>,
    reader: Mutex<Transport>,
    waker: Waker,
    resolver: Arc<dyn InterfaceResolver>,
}

impl TransactionManager {
    /// Connects to the daemon socket named in `config`.
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        debug!("connecting to daemon at {:?}", config.socket_path());

        let stream = UnixStream::connect(config.socket_path()).map_err(|e| Error::Transport {
            code: e.raw_os_error().unwrap_or(-1),
            message: format!("could not connect to {:?}: {e}", config.socket_path()),
        })?;

        Self::from_stream(stream, config)
    }

    /// Uses an already connected stream.
    pub fn from_stream(stream: UnixStream, config: &ConnectionConfig) -> Result<Self> {
        let (transport, writer) = Transport::new(stream, config)?;

        Ok(Self {
            shared: Arc::new(Shared {
                writer: Mutex::new(writer),
                table: Mutex::default(),
                next_id: AtomicU64::new(1),
            }),
            reader: Mutex::new(transport),
            waker: Waker::new()?,
            resolver: Arc::new(SystemInterfaces),
        })
    }

    /// Replaces the resolver used to name the interface of each reply.
    pub fn set_interface_resolver(&mut self, resolver: Arc<dyn InterfaceResolver>) {
        self.resolver = resolver;
    }

    /// Browses for instances of the request's registration type.
    pub fn browse(
        &self,
        request: &BrowseRequest,
        handler: impl Fn(Result<Reply>) + Send + Sync + 'static,
    ) -> Result<Transaction> {
        self.start(
            TransactionKind::Browse,
            request.to_wire()?,
            None,
            Box::new(handler),
        )
    }

    /// Resolves a service instance.
    pub fn resolve(
        &self,
        request: &ResolveRequest,
        handler: impl Fn(Result<Reply>) + Send + Sync + 'static,
    ) -> Result<Transaction> {
        self.start(
            TransactionKind::Resolve,
            request.to_wire()?,
            None,
            Box::new(handler),
        )
    }

    /// Registers a service. The registration lasts until the transaction is stopped.
    pub fn register(
        &self,
        request: &RegisterRequest,
        handler: impl Fn(Result<Reply>) + Send + Sync + 'static,
    ) -> Result<Transaction> {
        self.start(
            TransactionKind::Register,
            request.to_wire()?,
            Some(request.registration()),
            Box::new(handler),
        )
    }

    /// Enumerates recommended browse or registration domains.
    pub fn enumerate_domains(
        &self,
        request: &EnumerateRequest,
        handler: impl Fn(Result<Reply>) + Send + Sync + 'static,
    ) -> Result<Transaction> {
        self.start(
            TransactionKind::EnumerateDomains,
            request.to_wire(),
            None,
            Box::new(handler),
        )
    }

    /// Stops `transaction`. See [`Transaction::stop()`].
    pub fn stop(&self, transaction: &Transaction) -> Result<()> {
        transaction.stop()
    }

    /// Returns the number of operations still running.
    pub fn active_count(&self) -> usize {
        lock(&self.shared.table).operations.len()
    }

    /// Makes a blocked or the next [`poll()`](Self::poll) return early.
    pub fn wake(&self) -> Result<()> {
        self.waker.wake()
    }

    /// Waits up to `timeout` for replies and dispatches every reply that is available.
    ///
    /// Returns the number of handler invocations. Returns `Ok(0)` on timeout or when woken.
    /// A reply carries `more_coming` when the daemon flagged it or when another reply for a
    /// running operation is already readable.
    ///
    /// When the connection fails, every running operation receives one `Error::Transport`,
    /// and this and all later calls return that error.
    pub fn poll(&self, timeout: Duration) -> Result<usize> {
        self.check_failure()?;

        let mut transport = lock(&self.reader);

        if !transport.has_frame() {
            let ready = transport.wait(&self.waker, timeout)?;

            if ready.woken {
                self.waker.drain()?;
            }

            if !ready.readable {
                return Ok(0);
            }

            if let Err(e) = transport.fill() {
                return Err(self.fail_all(e));
            }
        }

        let mut dispatched = 0;
        let mut pending: Option<Frame> = None;

        // Each frame is held back until the next deliverable one is known, so that
        // `more_coming` is only set when another handler invocation follows.
        loop {
            let next = match self.next_deliverable(&mut transport) {
                Ok(next) => next,
                Err(e) => {
                    if let Some(frame) = pending.take() {
                        self.dispatch(&frame, false);
                    }
                    return Err(self.fail_all(e));
                }
            };

            if let Some(frame) = pending.take() {
                dispatched += self.dispatch(&frame, next.is_some());
            }

            match next {
                Some(frame) => pending = Some(frame),
                None => break,
            }
        }

        Ok(dispatched)
    }

    /// Returns the next frame addressed to an active operation, reading only what the socket
    /// holds without blocking. Frames for stopped or unknown operations are dropped.
    fn next_deliverable(&self, transport: &mut Transport) -> Result<Option<Frame>> {
        loop {
            match transport.next_frame()? {
                Some(frame) if self.is_deliverable(&frame) => return Ok(Some(frame)),
                Some(frame) => {
                    trace!("dropping reply for inactive transaction {}", frame.context())
                }
                None if transport.readable_now()? => {
                    transport.fill()?;
                }
                None => return Ok(None),
            }
        }
    }

    fn is_deliverable(&self, frame: &Frame) -> bool {
        lock(&self.shared.table)
            .operations
            .get(&frame.context())
            .is_some_and(|operation| operation.is_active())
    }

    fn check_failure(&self) -> Result<()> {
        match &lock(&self.shared.table).failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn start(
        &self,
        kind: TransactionKind,
        request: Request,
        registration: Option<Registration>,
        handler: Box<ReplyHandler>,
    ) -> Result<Transaction> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = request.to_frame(id)?;
        let operation = Arc::new(Operation::new(id, kind, registration, handler));

        {
            let mut table = lock(&self.shared.table);
            if let Some(e) = &table.failure {
                return Err(e.clone());
            }
            table.operations.insert(id, operation.clone());
        }

        if let Err(e) = self.shared.send(&frame) {
            warn!("could not send {kind} request {id}: {e}");
            self.shared.finish(&operation);
            return Err(e);
        }

        debug!("started {kind} transaction {id}");

        Ok(Transaction {
            operation,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Hands one frame to its operation. Returns the number of handler invocations.
    fn dispatch(&self, frame: &Frame, more_coming: bool) -> usize {
        let context = frame.context();

        let Some(operation) = lock(&self.shared.table).operations.get(&context).cloned() else {
            trace!("dropping reply for unknown transaction {context}");
            return 0;
        };

        let parsed = match ReplyFrame::parse(frame) {
            Ok(parsed) => parsed,
            Err(e) => return operation.deliver(Err(e)) as usize,
        };

        if parsed.op != operation.kind.reply_op() {
            let e = Error::Protocol(format!(
                "{:?} reply for {} transaction {}",
                parsed.op, operation.kind, context
            ));
            return operation.deliver(Err(e)) as usize;
        }

        if parsed.error != 0 {
            let e = Error::from_daemon_code(parsed.error);
            debug!("transaction {context} failed: {e}");

            let delivered = operation.deliver(Err(e));
            self.shared.finish(&operation);

            return delivered as usize;
        }

        let service = TransactionRef {
            operation: Arc::downgrade(&operation),
            shared: Arc::downgrade(&self.shared),
        };

        let reply = parsed.body().and_then(|body| {
            Reply::from_wire(
                &parsed,
                body,
                service,
                self.resolver.as_ref(),
                operation.registration.as_ref(),
                more_coming,
            )
        });

        operation.deliver(reply) as usize
    }

    /// Records `error` as the connection failure and ends every operation with it.
    fn fail_all(&self, error: Error) -> Error {
        let error = if error.is_terminal() {
            error
        } else {
            Error::Transport {
                code: libc::EPROTO,
                message: error.to_string(),
            }
        };

        let operations = {
            let mut table = lock(&self.shared.table);
            table.failure.get_or_insert_with(|| error.clone());
            table.operations.drain().map(|(_, op)| op).collect::<Vec<_>>()
        };

        warn!(
            "daemon connection failed, ending {} transaction(s): {error}",
            operations.len()
        );

        for operation in operations {
            operation.deliver(Err(error.clone()));
            operation.deactivate();
        }

        error
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        let operations = {
            let mut table = lock(&self.shared.table);
            table.operations.drain().map(|(_, op)| op).collect::<Vec<_>>()
        };

        for operation in operations {
            operation.deactivate();
        }
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn operation(counter: Arc<AtomicUsize>) -> Operation {
        Operation::new(
            1,
            TransactionKind::Browse,
            None,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn deactivated_operation_suppresses_delivery() {
        let counter = Arc::new(AtomicUsize::new(0));
        let operation = operation(counter.clone());

        assert!(operation.deliver(Err(Error::Protocol("x".into()))));
        assert!(operation.deactivate());
        assert!(!operation.deactivate());
        assert!(!operation.deliver(Err(Error::Protocol("x".into()))));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_clears_delivery() {
        let operation = Operation::new(
            1,
            TransactionKind::Browse,
            None,
            Box::new(|_| panic!("handler panicked")),
        );

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            operation.deliver(Err(Error::Protocol("x".into())))
        }));

        assert!(result.is_err());
        assert_eq!(lock(&operation.state).delivering, None);
        assert!(operation.deactivate());
    }

    #[test]
    fn reply_op_matches_kind() {
        assert_eq!(TransactionKind::Browse.reply_op(), ReplyOp::Browse);
        assert_eq!(
            TransactionKind::EnumerateDomains.reply_op(),
            ReplyOp::DomainEnum
        );
        assert_eq!(TransactionKind::Register.to_string(), "register");
    }
}
