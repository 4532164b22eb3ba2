use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::bootstrap;
use crate::bus::{BusRuntime, BusSink, BusState};
use crate::config::AlarmConfig;
use crate::errors::{AlarmError, Result};
use crate::http::HttpSink;
use crate::routing::publish_route_table_env;
use crate::sink::{deliver_first, AlarmSink};
use crate::tcp_bus::TcpBus;
use crate::types::{Alarm, AlarmAction, AlarmMessage, Severity};

/// Alarm client for a platform component
///
/// Alarms go to the Alarm Manager over the bus first and fall back to an
/// HTTP POST when the bus is not ready or rejects the message. Outbound
/// operations are serialized per client: the send lock is held across
/// the bus attempt and the HTTP fallback, so only one alarm is in flight
/// at a time.
///
/// Cloning is cheap; clones share identity, transports and the send lock.
///
/// # Example
///
/// ```rust,no_run
/// use ric_alarm::{RicAlarm, Severity};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let alarmer = RicAlarm::init("my-pod", "my-app");
///
///     let alarm = alarmer.new_alarm(1234, Severity::Major, "Some App data", "eth 0 1");
///     alarmer.raise(alarm.clone()).await?;
///     alarmer.clear(alarm).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RicAlarm {
    inner: Arc<Inner>,
}

struct Inner {
    identity: RwLock<Identity>,
    config: AlarmConfig,
    bus: Arc<BusState>,
    sinks: Vec<AlarmSink>,
    send_lock: Mutex<()>,
}

#[derive(Debug, Clone)]
struct Identity {
    managed_object_id: String,
    application_id: String,
}

impl RicAlarm {
    /// Create a client configured from the environment
    ///
    /// See [`from_config`](Self::from_config) for which bus is used.
    pub fn init(managed_object_id: &str, application_id: &str) -> Self {
        Self::from_config(managed_object_id, application_id, AlarmConfig::from_env())
    }

    /// Create a client, picking the bus runtime from the configuration
    ///
    /// In test mode the loopback endpoints are served by a [`TcpBus`],
    /// which only talks to other [`TcpBus`] peers. Otherwise no bus
    /// runtime is started: the routing table is still written, the bus
    /// never becomes ready and every alarm is posted over HTTP. Inject a
    /// runtime for the platform bus with [`with_runtime`](Self::with_runtime).
    ///
    /// Returns immediately; the bus is brought up in the background. Must
    /// be called from within a tokio runtime for the bus to come up,
    /// otherwise every alarm is delivered over HTTP.
    pub fn from_config(managed_object_id: &str, application_id: &str, config: AlarmConfig) -> Self {
        let runtime: Option<Arc<dyn BusRuntime>> = if config.test_mode {
            Some(Arc::new(TcpBus::default()))
        } else {
            None
        };
        Self::build(managed_object_id, application_id, config, runtime)
    }

    /// Create a client with an explicit configuration and bus runtime
    pub fn with_runtime(
        managed_object_id: &str,
        application_id: &str,
        config: AlarmConfig,
        runtime: Arc<dyn BusRuntime>,
    ) -> Self {
        Self::build(managed_object_id, application_id, config, Some(runtime))
    }

    fn build(
        managed_object_id: &str,
        application_id: &str,
        config: AlarmConfig,
        runtime: Option<Arc<dyn BusRuntime>>,
    ) -> Self {
        let endpoint = config.resolve_bus_endpoint(managed_object_id);
        let bus = Arc::new(BusState::new(endpoint));
        publish_route_table_env(&config.route_table_path);

        let mut sinks = vec![AlarmSink::Bus(BusSink::new(bus.clone()))];
        match HttpSink::new(&config.manager_url) {
            Ok(http) => sinks.push(AlarmSink::Http(http.strict_status(config.strict_http_status))),
            Err(e) => error!(error = %e, "HTTP fallback disabled"),
        }

        let has_bus_runtime = runtime.is_some();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let path = config.route_table_path.clone();
                let state = bus.clone();
                handle.spawn(async move {
                    // Failures are logged by bootstrap; the bus just stays not ready
                    let _ = bootstrap::run(&path, runtime, state).await;
                });
            }
            Err(_) => error!("No tokio runtime, bus bootstrap skipped"),
        }

        info!(
            managed_object_id,
            application_id,
            bus_endpoint = %bus.endpoint(),
            manager_url = %config.manager_url,
            has_bus_runtime,
            "Alarm client initialized"
        );

        Self {
            inner: Arc::new(Inner {
                identity: RwLock::new(Identity {
                    managed_object_id: managed_object_id.to_string(),
                    application_id: application_id.to_string(),
                }),
                config,
                bus,
                sinks,
                send_lock: Mutex::new(()),
            }),
        }
    }

    /// Build an alarm carrying the client's current identity
    pub fn new_alarm(
        &self,
        specific_problem: i32,
        severity: Severity,
        additional_info: &str,
        identifying_info: &str,
    ) -> Alarm {
        let identity = self.inner.identity.read();
        Alarm {
            managed_object_id: identity.managed_object_id.clone(),
            application_id: identity.application_id.clone(),
            specific_problem,
            perceived_severity: severity,
            identifying_info: identifying_info.to_string(),
            additional_info: additional_info.to_string(),
        }
    }

    /// Wrap an alarm in a message stamped with the current time
    pub fn new_alarm_message(&self, alarm: Alarm, action: AlarmAction) -> AlarmMessage {
        AlarmMessage::new(alarm, action)
    }

    /// Change the managed object id used by later [`new_alarm`](Self::new_alarm) calls
    pub fn set_managed_object_id(&self, managed_object_id: impl Into<String>) {
        self.inner.identity.write().managed_object_id = managed_object_id.into();
    }

    /// Change the application id used by later [`new_alarm`](Self::new_alarm) calls
    pub fn set_application_id(&self, application_id: impl Into<String>) {
        self.inner.identity.write().application_id = application_id.into();
    }

    pub fn managed_object_id(&self) -> String {
        self.inner.identity.read().managed_object_id.clone()
    }

    pub fn application_id(&self) -> String {
        self.inner.identity.read().application_id.clone()
    }

    pub fn config(&self) -> &AlarmConfig {
        &self.inner.config
    }

    /// Bus endpoint alarms are routed to
    pub fn bus_endpoint(&self) -> &str {
        self.inner.bus.endpoint()
    }

    /// Whether bus bootstrap has completed
    pub fn is_bus_ready(&self) -> bool {
        self.inner.bus.is_ready()
    }

    /// Wait until bus bootstrap has completed
    ///
    /// Never resolves if bootstrap fails; combine with a timeout.
    pub async fn wait_bus_ready(&self) {
        self.inner.bus.wait_ready().await
    }

    /// Raise an alarm
    pub async fn raise(&self, alarm: Alarm) -> Result<()> {
        self.send_message(AlarmMessage::new(alarm, AlarmAction::Raise))
            .await
    }

    /// Clear an alarm
    pub async fn clear(&self, alarm: Alarm) -> Result<()> {
        self.send_message(AlarmMessage::new(alarm, AlarmAction::Clear))
            .await
    }

    /// Clear and then raise an alarm again, as one atomic operation
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::Reraise`] if the clear fails (the raise is not
    /// attempted), otherwise the result of the raise.
    pub async fn reraise(&self, alarm: Alarm) -> Result<()> {
        let clear = AlarmMessage::new(alarm.clone(), AlarmAction::Clear);

        let _guard = self.inner.send_lock.lock().await;
        self.send_update(&clear)
            .await
            .map_err(|e| AlarmError::Reraise {
                source: Box::new(e),
            })?;

        self.send_update(&AlarmMessage::new(alarm, AlarmAction::Raise))
            .await
    }

    /// Clear every alarm raised under the client's identity
    pub async fn clear_all(&self) -> Result<()> {
        let alarm = self.new_alarm(0, Severity::Default, "", "");
        self.send_message(AlarmMessage::new(alarm, AlarmAction::ClearAll))
            .await
    }

    /// Send a prepared alarm message
    pub async fn send_message(&self, message: AlarmMessage) -> Result<()> {
        let _guard = self.inner.send_lock.lock().await;
        self.send_update(&message).await
    }

    /// Receive one alarm message from the bus
    ///
    /// Blocks until a message arrives and invokes `callback` with it.
    /// Receives must not run concurrently on the same client.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus is not ready or closed, or if the
    /// payload is not an alarm message.
    pub async fn receive_message<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(AlarmMessage),
    {
        let message = self.receive().await?;
        callback(message);
        Ok(())
    }

    /// Receive alarm messages until the bus closes
    ///
    /// Undecodable payloads are logged and skipped.
    pub async fn receive_loop<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(AlarmMessage),
    {
        loop {
            match self.receive().await {
                Ok(message) => callback(message),
                Err(AlarmError::Decode(e)) => warn!(error = %e, "Skipping undecodable alarm"),
                Err(e) => return Err(e),
            }
        }
    }

    /// Render the one-line summary of an alarm message
    pub fn alarm_string(&self, message: &AlarmMessage) -> String {
        message.to_string()
    }

    async fn receive(&self) -> Result<AlarmMessage> {
        let context = self.inner.bus.context().ok_or(AlarmError::BusNotReady)?;
        let buffer = context.recv().await.ok_or(AlarmError::ReceiveClosed)?;
        debug!(len = buffer.len(), message_type = buffer.message_type(), "Alarm received");
        AlarmMessage::from_json(buffer.payload())
    }

    #[instrument(
        name = "RicAlarm::send_update",
        skip_all,
        fields(action = %message.action, specific_problem = message.alarm.specific_problem)
    )]
    async fn send_update(&self, message: &AlarmMessage) -> Result<()> {
        let payload = message.to_json().map_err(|e| {
            error!(error = %e, "Alarm serialization failed");
            e
        })?;
        debug!(payload = %String::from_utf8_lossy(&payload), "Sending alarm");

        match deliver_first(&self.inner.sinks, &payload).await {
            Ok(()) => {
                info!(alarm = %message, "Alarm sent");
                Ok(())
            }
            Err(e) => {
                error!(alarm = %message, error = %e, "Alarm send failed");
                Err(e)
            }
        }
    }
}
