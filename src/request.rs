//! Request/response correlation over one connection.
//!
//! Every outbound request takes a correlation id from a wrapping counter and parks a pending record until a
//! response with the same id arrives or the request times out. Responses and timeouts are both delivered by a
//! periodic sweep, so there is one recurring timer per endpoint no matter how many requests are in flight.

use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    bytes::Bytes,
    consts::{DEFAULT_REQUEST_TIMEOUT_SEC, DEFAULT_SWEEP_INTERVAL_SEC},
    endpoint::Endpoint,
    error::{Error, HandlerError, Result},
    feature::{Feature, Installable},
    link::Link,
    protocol::{self, MessageKind, RequestEnvelope, ResponseEnvelope, ResponseStatus},
    utils::lock,
};

/// A typed request or response body with a stable wire identifier.
///
/// Kinds at or above [`RESERVED_PAYLOAD_KIND_START`](crate::RESERVED_PAYLOAD_KIND_START) belong to built-in
/// features.
pub trait Payload: Bytes + Send + 'static {
    const KIND: u16;
}

/// Configuration for the [`RequestManager`].
///
/// * `sweep_interval` - How often pending requests are checked for responses and timeouts.
/// * `default_timeout` - The timeout applied by [`RequestManager::send`].
#[derive(Debug, Clone)]
pub struct RequestConfig {
    sweep_interval: f64,
    default_timeout: f64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL_SEC,
            default_timeout: DEFAULT_REQUEST_TIMEOUT_SEC,
        }
    }
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }
    /// Set the sweep interval in seconds. The default is `0.2`.
    pub fn sweep_interval(mut self, secs: f64) -> Self {
        self.sweep_interval = secs;
        self
    }
    /// Set the default request timeout in seconds. The default is `5.0`.
    pub fn default_timeout(mut self, secs: f64) -> Self {
        self.default_timeout = secs;
        self
    }
    pub fn sweep_interval_secs(&self) -> f64 {
        self.sweep_interval
    }
    pub fn default_timeout_secs(&self) -> f64 {
        self.default_timeout
    }
}

/// Sends the answer to one received request. Clones share the answered flag, so at most one answer leaves.
#[derive(Clone)]
pub struct Responder {
    id: u16,
    link: Arc<Link>,
    answered: Arc<AtomicBool>,
}

impl Responder {
    fn new(id: u16, link: Arc<Link>) -> Self {
        Self {
            id,
            link,
            answered: Arc::new(AtomicBool::new(false)),
        }
    }
    pub fn id(&self) -> u16 {
        self.id
    }
    pub fn is_answered(&self) -> bool {
        self.answered.load(Ordering::Acquire)
    }
    /// Answers with `Ok` and `payload`. Returns `false` if the request was already answered.
    pub fn respond_success<R: Payload>(&self, payload: &R) -> Result<bool> {
        self.respond(ResponseStatus::Ok, R::KIND, payload.to_vec()?)
    }
    /// Answers with `Failed`. Returns `false` if the request was already answered.
    pub fn respond_fail(&self) -> Result<bool> {
        self.respond(ResponseStatus::Failed, 0, Vec::new())
    }
    fn respond(&self, status: ResponseStatus, payload_kind: u16, payload: Vec<u8>) -> Result<bool> {
        if self.answered.swap(true, Ordering::AcqRel) {
            log::warn!("request {} was already answered", self.id);
            return Ok(false);
        }
        self.link.send(
            MessageKind::Response,
            &ResponseEnvelope {
                id: self.id,
                status,
                payload_kind,
                payload,
            },
        )?;
        log::trace!("answered request {} with {:?}", self.id, status);
        Ok(true)
    }
}

/// A request as seen by the handler on the receiving side.
pub struct Request<T> {
    payload: T,
    received_at: f64,
    responder: Responder,
}

impl<T> Request<T> {
    pub fn id(&self) -> u16 {
        self.responder.id
    }
    pub fn payload(&self) -> &T {
        &self.payload
    }
    pub fn received_at(&self) -> f64 {
        self.received_at
    }
    pub fn responder(&self) -> &Responder {
        &self.responder
    }
    pub fn respond_success<R: Payload>(&self, payload: &R) -> Result<bool> {
        self.responder.respond_success(payload)
    }
    pub fn respond_fail(&self) -> Result<bool> {
        self.responder.respond_fail()
    }
    /// Splits the request so the responder can be kept and answered later.
    pub fn into_parts(self) -> (T, Responder) {
        (self.payload, self.responder)
    }
}

/// The outcome of a request as delivered to its callback. Delivered exactly once per accepted request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<R> {
    pub id: u16,
    pub status: ResponseStatus,
    pub payload: Option<R>,
    pub sent_at: f64,
    /// Unset for timeouts.
    pub received_at: Option<f64>,
}

impl<R> Response<R> {
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
    pub fn round_trip(&self) -> Option<f64> {
        self.received_at.map(|received| received - self.sent_at)
    }
}

struct RawResponse {
    id: u16,
    status: ResponseStatus,
    payload_kind: u16,
    payload: Vec<u8>,
    received_at: Option<f64>,
}

impl RawResponse {
    fn synthetic(id: u16, status: ResponseStatus) -> Self {
        Self {
            id,
            status,
            payload_kind: 0,
            payload: Vec::new(),
            received_at: None,
        }
    }
}

type Callback = Box<dyn FnOnce(RawResponse, f64) + Send + 'static>;

struct Pending {
    sent_at: f64,
    timeout: f64,
    callback: Callback,
}

type Handler =
    Arc<dyn Fn(&RequestEnvelope, f64, Responder) -> std::result::Result<(), HandlerError> + Send + Sync>;

#[derive(Default)]
struct RequestTable {
    next_id: u16,
    pending: HashMap<u16, Pending>,
}

impl RequestTable {
    /// Takes the next id that is not held by a pending request, wrapping from the maximum to the minimum.
    fn allocate(&mut self) -> Result<u16> {
        let mut candidate = self.next_id;
        for _ in 0..=u16::MAX as u32 {
            if !self.pending.contains_key(&candidate) {
                self.next_id = candidate.wrapping_add(1);
                return Ok(candidate);
            }
            candidate = candidate.wrapping_add(1);
        }
        Err(Error::RequestIdsExhausted)
    }
}

/// Request/response correlation with per-type handlers and timeouts.
pub struct RequestManager {
    link: Arc<Link>,
    cfg: RequestConfig,
    enabled: AtomicBool,
    table: Mutex<RequestTable>,
    inbox: Mutex<Vec<RawResponse>>,
    handlers: Mutex<HashMap<u16, Handler>>,
    last_sweep: Mutex<f64>,
}

impl RequestManager {
    pub fn new(link: Arc<Link>, cfg: RequestConfig) -> Self {
        Self {
            link,
            cfg,
            enabled: AtomicBool::new(false),
            table: Mutex::new(RequestTable::default()),
            inbox: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(0.0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Number of requests still waiting for a response or a timeout.
    pub fn pending_count(&self) -> usize {
        lock(&self.table).pending.len()
    }

    /// Sends `request` with the configured default timeout.
    ///
    /// Returns immediately with the correlation id. `on_response` runs later, from the endpoint update that
    /// performs the sweep, exactly once.
    pub fn send<T, R, F>(&self, request: &T, on_response: F) -> Result<u16>
    where
        T: Payload,
        R: Payload,
        F: FnOnce(Response<R>) + Send + 'static,
    {
        self.send_with_timeout(request, self.cfg.default_timeout, on_response)
    }

    /// Sends `request`, giving up after `timeout` seconds.
    pub fn send_with_timeout<T, R, F>(&self, request: &T, timeout: f64, on_response: F) -> Result<u16>
    where
        T: Payload,
        R: Payload,
        F: FnOnce(Response<R>) + Send + 'static,
    {
        if !self.is_enabled() {
            return Err(Error::FeatureDisabled(Self::NAME));
        }
        let payload = request.to_vec()?;
        let sent_at = self.link.time();
        let callback: Callback = Box::new(move |raw: RawResponse, sent_at: f64| {
            on_response(decode_response::<R>(raw, sent_at))
        });
        let id = {
            let mut table = lock(&self.table);
            let id = table.allocate()?;
            table.pending.insert(
                id,
                Pending {
                    sent_at,
                    timeout,
                    callback,
                },
            );
            id
        };
        let envelope = RequestEnvelope {
            id,
            payload_kind: T::KIND,
            payload,
        };
        if let Err(e) = self.link.send(MessageKind::Request, &envelope) {
            lock(&self.table).pending.remove(&id);
            return Err(e);
        }
        log::trace!("sent request {id} of kind {:#06x}", T::KIND);
        Ok(id)
    }

    /// Registers a handler for requests carrying `T`.
    ///
    /// The handler owns the answer: it must call [`Request::respond_success`] or [`Request::respond_fail`],
    /// now or later through the [`Responder`]. A handler error is logged and no answer is sent.
    pub fn register_handler<T, F>(&self, handler: F)
    where
        T: Payload,
        F: Fn(Request<T>) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.insert_handler(
            T::KIND,
            Arc::new(move |envelope: &RequestEnvelope, received_at: f64, responder: Responder| {
                let payload = T::from_slice(&envelope.payload)
                    .map_err(|e| HandlerError(format!("malformed payload: {e}")))?;
                handler(Request {
                    payload,
                    received_at,
                    responder,
                })
            }),
        );
    }

    /// Registers a handler whose return value becomes the answer.
    ///
    /// `Ok(Some(_))` answers `Ok` with the value, `Ok(None)` answers `Failed`. An error is logged and no answer
    /// is sent, so the sender eventually times out.
    pub fn register_responder<T, R, F>(&self, handler: F)
    where
        T: Payload,
        R: Payload,
        F: Fn(&Request<T>) -> std::result::Result<Option<R>, HandlerError> + Send + Sync + 'static,
    {
        self.insert_handler(
            T::KIND,
            Arc::new(move |envelope: &RequestEnvelope, received_at: f64, responder: Responder| {
                let payload = T::from_slice(&envelope.payload)
                    .map_err(|e| HandlerError(format!("malformed payload: {e}")))?;
                let request = Request {
                    payload,
                    received_at,
                    responder,
                };
                let sent = match handler(&request)? {
                    Some(answer) => request.respond_success(&answer),
                    None => request.respond_fail(),
                };
                sent.map(|_| ())
                    .map_err(|e| HandlerError(format!("failed to answer: {e}")))
            }),
        );
    }

    /// Removes the handler for `T`. Returns `false` if there was none.
    pub fn unregister_handler<T: Payload>(&self) -> bool {
        lock(&self.handlers).remove(&T::KIND).is_some()
    }

    pub fn has_handler<T: Payload>(&self) -> bool {
        lock(&self.handlers).contains_key(&T::KIND)
    }

    fn insert_handler(&self, kind: u16, handler: Handler) {
        if lock(&self.handlers).insert(kind, handler).is_some() {
            log::warn!("replaced request handler for kind {kind:#06x}");
        }
    }

    fn handle_request(&self, envelope: RequestEnvelope) {
        let handler = lock(&self.handlers).get(&envelope.payload_kind).cloned();
        let Some(handler) = handler else {
            log::warn!(
                "dropped request {}: no handler for kind {:#06x}",
                envelope.id,
                envelope.payload_kind
            );
            return;
        };
        let responder = Responder::new(envelope.id, self.link.clone());
        if let Err(e) = handler(&envelope, self.link.time(), responder) {
            log::error!(
                "request handler for kind {:#06x} failed on request {}: {e}",
                envelope.payload_kind,
                envelope.id
            );
        }
    }

    fn handle_response(&self, envelope: ResponseEnvelope) {
        if !lock(&self.table).pending.contains_key(&envelope.id) {
            log::warn!("dropped response {}: no pending request", envelope.id);
            return;
        }
        lock(&self.inbox).push(RawResponse {
            id: envelope.id,
            status: envelope.status,
            payload_kind: envelope.payload_kind,
            payload: envelope.payload,
            received_at: Some(self.link.time()),
        });
    }

    /// Delivers queued responses and expired requests to their callbacks.
    fn sweep(&self, time: f64) {
        let responses: Vec<RawResponse> = lock(&self.inbox).drain(..).collect();
        let ready = {
            let mut table = lock(&self.table);
            let mut ready = Vec::new();
            for raw in responses {
                match table.pending.remove(&raw.id) {
                    Some(pending) => ready.push((pending, raw)),
                    None => log::debug!("dropped duplicate response {}", raw.id),
                }
            }
            let expired: Vec<u16> = table
                .pending
                .iter()
                .filter(|(_, pending)| time - pending.sent_at >= pending.timeout)
                .map(|(id, _)| *id)
                .collect();
            for id in expired {
                if let Some(pending) = table.pending.remove(&id) {
                    log::debug!("request {id} timed out after {:.3}s", time - pending.sent_at);
                    ready.push((pending, RawResponse::synthetic(id, ResponseStatus::TimedOut)));
                }
            }
            ready
        };
        for (pending, raw) in ready {
            deliver(pending, raw);
        }
    }

    /// Completes every pending request with `Failed`.
    fn fail_all(&self) {
        lock(&self.inbox).clear();
        let drained: Vec<(u16, Pending)> = lock(&self.table).pending.drain().collect();
        for (id, pending) in drained {
            log::debug!("request {id} failed: request manager disabled");
            deliver(pending, RawResponse::synthetic(id, ResponseStatus::Failed));
        }
    }
}

/// Runs one completion callback. A panic is logged and contained so the rest of the batch still runs.
fn deliver(pending: Pending, raw: RawResponse) {
    let id = raw.id;
    let Pending {
        sent_at, callback, ..
    } = pending;
    if panic::catch_unwind(AssertUnwindSafe(move || callback(raw, sent_at))).is_err() {
        log::error!("callback for request {id} panicked");
    }
}

fn decode_response<R: Payload>(raw: RawResponse, sent_at: f64) -> Response<R> {
    let mut response = Response {
        id: raw.id,
        status: raw.status,
        payload: None,
        sent_at,
        received_at: raw.received_at,
    };
    if raw.status != ResponseStatus::Ok {
        return response;
    }
    if raw.payload_kind != R::KIND {
        log::warn!(
            "response {} carries kind {:#06x}, expected {:#06x}",
            raw.id,
            raw.payload_kind,
            R::KIND
        );
        response.status = ResponseStatus::Failed;
        return response;
    }
    match R::from_slice(&raw.payload) {
        Ok(payload) => response.payload = Some(payload),
        Err(e) => {
            log::warn!("response {} has a malformed payload: {e}", raw.id);
            response.status = ResponseStatus::Failed;
        }
    }
    response
}

impl Feature for RequestManager {
    fn message_kinds(&self) -> &'static [MessageKind] {
        &[MessageKind::Request, MessageKind::Response]
    }

    fn on_enable(&self, ep: &Endpoint) {
        *lock(&self.last_sweep) = ep.time();
        self.enabled.store(true, Ordering::Release);
    }

    fn on_disable(&self, _ep: &Endpoint) {
        self.enabled.store(false, Ordering::Release);
        self.fail_all();
    }

    fn update(&self, _ep: &Endpoint, time: f64) {
        {
            let mut last_sweep = lock(&self.last_sweep);
            if time - *last_sweep < self.cfg.sweep_interval {
                return;
            }
            *last_sweep = time;
        }
        self.sweep(time);
    }

    fn on_message(&self, _ep: &Endpoint, kind: MessageKind, body: &[u8]) -> Result<()> {
        match kind {
            MessageKind::Request => self.handle_request(protocol::read_body(body)?),
            MessageKind::Response => self.handle_response(protocol::read_body(body)?),
            _ => return Err(Error::UnknownMessageKind(kind as u8)),
        }
        Ok(())
    }
}

impl Installable for RequestManager {
    const NAME: &'static str = "request-manager";

    fn create(ep: &Endpoint) -> Self {
        Self::new(ep.link().clone(), ep.config().request_config().clone())
    }
}
