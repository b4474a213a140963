//! Per-worker readiness loop.
//!
//! Each loop owns an epoll instance, its share of the connection slots,
//! a wakeup eventfd and an injection channel. Loop 0 additionally runs
//! the queue-tick timer (drains the overflow queue into free slots) and
//! the session-renew timer (emits priming handshakes for registered
//! hosts).

use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use crossbeam_channel::Receiver;

use crate::client::Shared;
use crate::conn::{Action, ConnCtx};
use crate::error::{Error, RequestError};
use crate::metrics;
use crate::pool::SlotTable;
use crate::reactor::{Event, EventFd, Poller, TimerFd, Token};
use crate::request::{Method, PendingRequest};

pub(crate) struct EventLoop {
    loop_id: usize,
    shared: Arc<Shared>,
    poller: Poller,
    slots: SlotTable,
    wake: EventFd,
    inject_rx: Receiver<PendingRequest>,
    tick_timer: Option<TimerFd>,
    renew_timer: Option<TimerFd>,
}

impl EventLoop {
    pub(crate) fn new(
        loop_id: usize,
        shared: Arc<Shared>,
        wake: EventFd,
        inject_rx: Receiver<PendingRequest>,
    ) -> Result<Self, Error> {
        let poller = Poller::new()?;
        poller.register(wake.fd(), Token::Wake, true, false)?;

        // Timers live on loop 0 only. The renew timer's first expiry is
        // one queue tick after startup so hosts registered before launch
        // get primed immediately, then every renew interval.
        let (tick_timer, renew_timer) = if loop_id == 0 {
            let config = &shared.config;
            let tick = TimerFd::periodic(config.queue_tick, config.queue_tick)?;
            poller.register(tick.fd(), Token::Tick, true, false)?;
            let renew = TimerFd::periodic(config.queue_tick, config.session_renew_interval)?;
            poller.register(renew.fd(), Token::Renew, true, false)?;
            (Some(tick), Some(renew))
        } else {
            (None, None)
        };

        let slots = SlotTable::new(
            shared.config.slots_per_loop(),
            shared.config.conn_buf_size,
        );

        Ok(EventLoop {
            loop_id,
            shared,
            poller,
            slots,
            wake,
            inject_rx,
            tick_timer,
            renew_timer,
        })
    }

    /// Run until shutdown is signalled. Blocks the current thread.
    pub(crate) fn run(&mut self) -> Result<(), Error> {
        let mut events: Vec<Event> = Vec::new();
        loop {
            self.poller.wait(&mut events, -1)?;

            for ev in events.iter().copied() {
                match ev.token {
                    Token::Wake => {
                        self.wake.drain();
                        self.drain_injected();
                    }
                    Token::Tick => {
                        if let Some(timer) = &self.tick_timer {
                            timer.drain();
                        }
                        self.drain_pending();
                    }
                    Token::Renew => {
                        if let Some(timer) = &self.renew_timer {
                            timer.drain();
                        }
                        self.renew_sessions();
                    }
                    Token::Conn { idx, generation } => {
                        self.conn_event(
                            idx,
                            generation,
                            ev.readable || ev.error,
                            ev.writable || ev.error,
                        );
                    }
                }
            }

            if self.shared.shutdown.load(Ordering::Acquire) {
                self.teardown_all();
                return Ok(());
            }
        }
    }

    fn conn_event(&mut self, idx: u16, generation: u32, readable: bool, writable: bool) {
        if idx as usize >= self.slots.len() {
            return;
        }
        let ctx = ConnCtx {
            poller: &self.poller,
            config: &self.shared.config,
            resolver: &self.shared.resolver,
            tls: self.shared.tls.as_ref(),
        };
        let slot = self.slots.slot_mut(idx);
        // A recycled slot can see stale readiness from the same batch.
        if slot.is_idle() || slot.generation() != generation {
            return;
        }
        if slot.on_event(readable, writable, &ctx) == Action::Release {
            self.release(idx);
        }
    }

    fn drain_injected(&mut self) {
        while let Ok(req) = self.inject_rx.try_recv() {
            self.start_request(req);
        }
    }

    fn start_request(&mut self, req: PendingRequest) {
        let Some(idx) = self.slots.allocate() else {
            // The router's reservation raced with release bookkeeping;
            // give the capacity back and let the tick retry.
            self.shared.loop_free[self.loop_id].fetch_add(1, Ordering::Release);
            self.shared.pending.push(req);
            return;
        };
        metrics::CONNECTIONS_ACTIVE.increment();
        let ctx = ConnCtx {
            poller: &self.poller,
            config: &self.shared.config,
            resolver: &self.shared.resolver,
            tls: self.shared.tls.as_ref(),
        };
        if self.slots.slot_mut(idx).start(req, &ctx) == Action::Release {
            self.release(idx);
        }
    }

    fn release(&mut self, idx: u16) {
        self.slots.release(idx);
        self.shared.loop_free[self.loop_id].fetch_add(1, Ordering::Release);
    }

    /// Queue tick: move overflow requests onto free slots, FIFO.
    fn drain_pending(&mut self) {
        loop {
            let Some(req) = self.shared.pending.pop() else {
                break;
            };
            if let Err(req) = self.shared.route(req) {
                self.shared.pending.push_front(req);
                break;
            }
        }
    }

    /// Renew round: a full pool of priming handshakes per registered
    /// host, queued like any other request.
    fn renew_sessions(&mut self) {
        let hosts = self.shared.primed.lock().unwrap().clone();
        if hosts.is_empty() {
            return;
        }
        tracing::debug!(hosts = hosts.len(), "renewing TLS sessions");
        for url in hosts {
            for _ in 0..self.shared.config.pool_size {
                let req = PendingRequest {
                    url: url.clone(),
                    method: Method::Get,
                    extra_headers: Bytes::new(),
                    handler: None,
                    prime: true,
                };
                if let Err(req) = self.shared.route(req) {
                    self.shared.pending.push(req);
                }
            }
        }
    }

    fn teardown_all(&mut self) {
        for idx in self.slots.busy_indices() {
            let ctx = ConnCtx {
                poller: &self.poller,
                config: &self.shared.config,
                resolver: &self.shared.resolver,
                tls: self.shared.tls.as_ref(),
            };
            self.slots.slot_mut(idx).fail(RequestError::ShuttingDown, &ctx);
            self.release(idx);
        }
        // Anything still parked in the injection channel never started.
        while let Ok(req) = self.inject_rx.try_recv() {
            self.shared.loop_free[self.loop_id].fetch_add(1, Ordering::Release);
            metrics::REQUESTS_DROPPED.increment();
            drop(req);
        }
    }
}
