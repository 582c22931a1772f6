//! Worker: the handle on one media engine process.
//!
//! Spawning the engine is up to the caller. A [`Worker`] is built from the
//! four pipe ends of an already running engine and owns the control and
//! payload channels over them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use mediactl_channel::{Channel, ChannelConfig, NotificationRouter, PayloadChannel};
use mediactl_ortc::generate_router_rtp_capabilities;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use crate::bus::{EntityKind, ObserverBus};
use crate::context::Context;
use crate::data_structures::AppData;
use crate::error::{Error, Result};
use crate::events::{CloseHandlers, EventHandlers, HandlerId, Lifecycle};
use crate::exit::WorkerExit;
use crate::messages::{new_id, RouterInternal, WorkerInternal};
use crate::router::{Router, RouterOptions};
use crate::settings::{WorkerSettings, WorkerUpdateSettings};

/// `getrusage` counters of the engine process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerResourceUsage {
    /// User CPU time used, in ms.
    pub ru_utime: u64,
    /// System CPU time used, in ms.
    pub ru_stime: u64,
    pub ru_maxrss: u64,
    pub ru_ixrss: u64,
    pub ru_idrss: u64,
    pub ru_isrss: u64,
    pub ru_minflt: u64,
    pub ru_majflt: u64,
    pub ru_nswap: u64,
    pub ru_inblock: u64,
    pub ru_oublock: u64,
    pub ru_msgsnd: u64,
    pub ru_msgrcv: u64,
    pub ru_nsignals: u64,
    pub ru_nvcsw: u64,
    pub ru_nivcsw: u64,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// The engine went away without `close()` being called.
    Died(WorkerExit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Explicit,
    Died(WorkerExit),
}

struct Inner {
    pid: u32,
    context: Context,
    app_data: AppData,
    routers: Mutex<HashMap<String, Router>>,
    handlers: EventHandlers<WorkerEvent>,
    close_handlers: CloseHandlers,
    lifecycle: Lifecycle,
}

impl Inner {
    fn close(&self, reason: CloseReason) {
        if !self.lifecycle.begin_close() {
            return;
        }
        match reason {
            CloseReason::Explicit => tracing::debug!(pid = self.pid, "close()"),
            CloseReason::Died(exit) => tracing::error!(pid = self.pid, %exit, "worker died"),
        }

        self.context.channel.close();
        self.context.payload_channel.close();

        let routers = std::mem::take(&mut *self.routers.lock());
        for router in routers.into_values() {
            router.worker_closed();
        }
        self.lifecycle.finish_close();

        if let CloseReason::Died(exit) = reason {
            self.handlers.emit(&WorkerEvent::Died(exit));
        }
        self.context
            .bus
            .closed(EntityKind::Worker, &self.pid.to_string());
        self.close_handlers.run();
        self.handlers.clear();
    }
}

#[derive(Clone)]
pub struct Worker {
    inner: Arc<Inner>,
}

impl Worker {
    /// Attach to a freshly started engine and wait for it to report
    /// `running`.
    ///
    /// Fails if the settings are invalid or if the control channel closes
    /// before the engine is up.
    pub async fn from_endpoints<CR, CW, PR, PW>(
        pid: u32,
        control_reader: CR,
        control_writer: CW,
        payload_reader: PR,
        payload_writer: PW,
        settings: WorkerSettings,
    ) -> Result<Self>
    where
        CR: AsyncRead + Unpin + Send + 'static,
        CW: AsyncWrite + Unpin + Send + 'static,
        PR: AsyncRead + Unpin + Send + 'static,
        PW: AsyncWrite + Unpin + Send + 'static,
    {
        settings.validate()?;
        tracing::debug!(pid, "attaching to worker");

        // Subscribe before any frame can be read.
        let notifications = NotificationRouter::new();
        let (running_tx, running_rx) = oneshot::channel();
        let running_tx = Mutex::new(Some(running_tx));
        let running = notifications.subscribe(pid.to_string(), move |notification| {
            if notification.event == "running" {
                if let Some(tx) = running_tx.lock().take() {
                    let _ = tx.send(());
                }
            }
        });

        let config = ChannelConfig {
            pid: Some(pid),
            ..ChannelConfig::default()
        };
        let channel = Channel::with_config(
            control_reader,
            control_writer,
            notifications,
            config.clone(),
        );
        let payload_channel = PayloadChannel::with_config(
            payload_reader,
            payload_writer,
            NotificationRouter::new(),
            config,
        );

        let started = tokio::select! {
            started = running_rx => started.is_ok(),
            () = channel.wait_closed() => false,
        };
        drop(running);
        if !started {
            channel.close();
            payload_channel.close();
            return Err(Error::InvalidState(format!(
                "worker {pid} exited before reporting running"
            )));
        }
        tracing::debug!(pid, "worker running");

        let inner = Arc::new(Inner {
            pid,
            context: Context {
                channel: channel.clone(),
                payload_channel,
                bus: ObserverBus::new(),
            },
            app_data: settings.app_data,
            routers: Mutex::new(HashMap::new()),
            handlers: EventHandlers::new(),
            close_handlers: CloseHandlers::new(),
            lifecycle: Lifecycle::new(),
        });

        // The control channel ending on its own means the engine is gone.
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            channel.wait_closed().await;
            if let Some(inner) = weak.upgrade() {
                inner.close(CloseReason::Died(WorkerExit::Unexpected(None)));
            }
        });

        Ok(Self { inner })
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.lifecycle.closed()
    }

    /// Bus carrying creation, closure and pause events of every entity
    /// under this worker.
    pub fn observer(&self) -> &ObserverBus {
        &self.inner.context.bus
    }

    pub fn routers(&self) -> Vec<Router> {
        self.inner.routers.lock().values().cloned().collect()
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.lifecycle.closing() {
            return Err(Error::closed("Worker"));
        }
        Ok(())
    }

    pub async fn dump(&self) -> Result<Value> {
        self.check_open()?;
        Ok(self
            .inner
            .context
            .channel
            .request("worker.dump", WorkerInternal {}, ())
            .await?)
    }

    pub async fn get_resource_usage(&self) -> Result<WorkerResourceUsage> {
        self.check_open()?;
        Ok(self
            .inner
            .context
            .channel
            .request("worker.getResourceUsage", WorkerInternal {}, ())
            .await?)
    }

    pub async fn update_settings(&self, settings: WorkerUpdateSettings) -> Result<()> {
        tracing::debug!(pid = self.pid(), ?settings, "update_settings()");
        self.check_open()?;
        self.inner
            .context
            .channel
            .request::<Value>("worker.updateSettings", WorkerInternal {}, settings)
            .await?;
        Ok(())
    }

    pub async fn create_router(&self, options: RouterOptions) -> Result<Router> {
        tracing::debug!(pid = self.pid(), "create_router()");
        self.check_open()?;

        let RouterOptions {
            media_codecs,
            app_data,
        } = options;
        let rtp_capabilities = generate_router_rtp_capabilities(&media_codecs)?;
        let internal = RouterInternal {
            router_id: new_id(),
        };

        self.inner
            .context
            .channel
            .request::<Value>("worker.createRouter", &internal, ())
            .await?;

        let router = Router::new(
            internal,
            rtp_capabilities,
            app_data,
            self.inner.context.clone(),
        );

        let adopted = {
            let mut routers = self.inner.routers.lock();
            let open = !self.inner.lifecycle.closing();
            if open {
                routers.insert(router.id().to_string(), router.clone());
            }
            open
        };
        if !adopted {
            router.worker_closed();
            return Err(Error::closed("Worker"));
        }

        let weak = Arc::downgrade(&self.inner);
        let id = router.id().to_string();
        router.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                inner.routers.lock().remove(&id);
            }
        });
        self.inner
            .context
            .bus
            .created(EntityKind::Router, router.id(), None);

        Ok(router)
    }

    /// Close the worker, its channels and every router.
    pub fn close(&self) {
        self.inner.close(CloseReason::Explicit);
    }

    /// Report that the engine process ended, as observed by whoever spawned
    /// it. Emits [`WorkerEvent::Died`] unless the worker already closed.
    pub fn engine_exited(&self, exit: WorkerExit) {
        if self.inner.lifecycle.closing() {
            tracing::debug!(pid = self.pid(), %exit, "engine exited after close");
            return;
        }
        self.inner.close(CloseReason::Died(exit));
    }

    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&WorkerEvent) + Send + Sync + 'static,
    {
        self.inner.handlers.add(handler)
    }

    pub fn off(&self, id: HandlerId) {
        self.inner.handlers.remove(id);
    }

    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.close_handlers.add(callback);
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("pid", &self.inner.pid)
            .field("closed", &self.closed())
            .finish()
    }
}
