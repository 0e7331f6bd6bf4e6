//! Mode-switching router
//!
//! Owns the dialer set and the shared mutable state read on every new
//! connection: the current mode and the home byte cap. State sits behind
//! a single readers-writer lock that is held only for the state access,
//! never across a dial, relay, or webhook call.

pub mod dialer;
pub mod metered;
pub mod mode;
pub mod socks5;
pub mod tunnel_control;

pub use dialer::{Dialer, DirectDialer, TunnelDialer};
pub use metered::MeteredStream;
pub use mode::Mode;
pub use socks5::Socks5Dialer;
pub use tunnel_control::TunnelControl;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{Config, EventsConfig};
use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// Timeout for each health-probe connection attempt
const TEST_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Endpoints probed by mode health checks
const HEALTH_PROBES: [&str; 2] = ["1.1.1.1:443", "8.8.8.8:443"];

/// Outbound event notifications. Delivery is fire-and-forget; the
/// router is never blocked on the sink.
pub trait WebhookSink: Send + Sync {
    fn send(&self, event: &str, payload: serde_json::Value);
}

struct RouterState {
    mode: Mode,
    home_limit_bytes: u64,
}

/// Routes traffic through the currently selected mode.
pub struct Router {
    state: RwLock<RouterState>,
    dialers: HashMap<Mode, Arc<dyn Dialer>>,
    metrics: Arc<Metrics>,
    home_auto_switch: Mode,
    warp_interface: Option<String>,
    webhook: Option<Arc<dyn WebhookSink>>,
    events: EventsConfig,
}

impl Router {
    /// Build the router and its dialer set from configuration.
    ///
    /// `direct` is always present. `warp` needs its interface to exist;
    /// `home` needs an upstream host. Missing optional modes are logged
    /// and skipped rather than failing startup.
    pub fn from_config(
        cfg: &Config,
        metrics: Arc<Metrics>,
        webhook: Option<Arc<dyn WebhookSink>>,
    ) -> Result<Self> {
        let mut dialers: HashMap<Mode, Arc<dyn Dialer>> = HashMap::new();

        let local_ip = cfg
            .modes
            .direct
            .local_ip
            .as_deref()
            .and_then(|s| s.parse().ok());
        dialers.insert(Mode::Direct, Arc::new(DirectDialer::new(local_ip)));
        if let Some(ip) = local_ip {
            info!("Direct dialer bound to {}", ip);
        }

        let mut warp_interface = None;
        if let Some(interface) = &cfg.modes.warp.interface {
            match TunnelDialer::new(interface.clone()) {
                Ok(d) => {
                    info!("Tunnel dialer initialized on {}", interface);
                    dialers.insert(Mode::Warp, Arc::new(d));
                    warp_interface = Some(interface.clone());
                }
                Err(e) => warn!("Tunnel dialer not available: {}", e),
            }
        }

        if let Some(host) = &cfg.modes.home.host {
            let auth = cfg
                .modes
                .home
                .username
                .as_ref()
                .map(|user| {
                    (
                        user.clone(),
                        cfg.modes.home.password.clone().unwrap_or_default(),
                    )
                });
            // The proxy leg reuses the direct local IP to bypass the tunnel
            dialers.insert(
                Mode::Home,
                Arc::new(Socks5Dialer::new(host, cfg.modes.home.port, auth, local_ip)),
            );
            info!(
                "Home proxy dialer initialized ({}:{})",
                host, cfg.modes.home.port
            );
        }

        let auto_switch = match cfg.limits.home.auto_switch_to.parse() {
            Ok(mode) => mode,
            Err(_) => {
                warn!(
                    "Invalid auto_switch_to {:?}, using direct",
                    cfg.limits.home.auto_switch_to
                );
                Mode::Direct
            }
        };

        let mut router = Self::with_dialers(
            dialers,
            metrics,
            cfg.limits.home.max_mb,
            auto_switch,
            webhook,
            cfg.webhooks.events.clone(),
        )?;
        router.warp_interface = warp_interface;
        Ok(router)
    }

    /// Build from an explicit dialer set. The `direct` entry is
    /// mandatory: it is the initial mode and the fallback target.
    pub fn with_dialers(
        dialers: HashMap<Mode, Arc<dyn Dialer>>,
        metrics: Arc<Metrics>,
        home_limit_mb: u64,
        home_auto_switch: Mode,
        webhook: Option<Arc<dyn WebhookSink>>,
        events: EventsConfig,
    ) -> Result<Self> {
        if !dialers.contains_key(&Mode::Direct) {
            return Err(Error::Config("direct dialer is required".into()));
        }

        Ok(Self {
            state: RwLock::new(RouterState {
                mode: Mode::Direct,
                home_limit_bytes: home_limit_mb * 1024 * 1024,
            }),
            dialers,
            metrics,
            home_auto_switch,
            warp_interface: None,
            webhook,
            events,
        })
    }

    /// Switch the current routing mode.
    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        let old = {
            let mut state = self.state.write().unwrap();

            if !self.dialers.contains_key(&mode) {
                return Err(Error::ModeNotAvailable(mode));
            }
            if mode == Mode::Home && self.home_exhausted(state.home_limit_bytes) {
                return Err(Error::HomeLimitExhausted {
                    used_mb: self.metrics.get_bytes("home") / 1024 / 1024,
                });
            }

            let old = state.mode;
            state.mode = mode;
            old
        };

        info!("Mode switched to {}", mode);

        if old != mode && self.events.mode_changed {
            if let Some(webhook) = &self.webhook {
                webhook.send(
                    "mode.changed",
                    json!({
                        "from": old.as_str(),
                        "to": mode.as_str(),
                        "trigger": "manual",
                    }),
                );
            }
        }

        Ok(())
    }

    pub fn get_mode(&self) -> Mode {
        self.state.read().unwrap().mode
    }

    /// All modes with a configured dialer, in stable order.
    pub fn available_modes(&self) -> Vec<Mode> {
        Mode::ALL
            .into_iter()
            .filter(|m| self.dialers.contains_key(m))
            .collect()
    }

    /// Connect to `address` through the current mode and wrap the
    /// result in a metered stream tagged with the effective mode.
    ///
    /// A failed `warp` dial is retried once through `direct`; the
    /// resulting bytes are accounted against `direct`.
    pub async fn dial(
        &self,
        network: &str,
        address: &str,
    ) -> Result<MeteredStream<TcpStream>> {
        let (mode, dialer) = {
            let state = self.state.read().unwrap();
            let dialer = self
                .dialers
                .get(&state.mode)
                .cloned()
                .ok_or(Error::ModeNotAvailable(state.mode))?;
            (state.mode, dialer)
        };

        match dialer.dial(network, address).await {
            Ok(stream) => Ok(MeteredStream::new(
                stream,
                mode.as_str(),
                self.metrics.clone(),
            )),
            Err(err) if mode == Mode::Warp => {
                warn!("Tunnel dial failed, falling back to direct: {}", err);
                let direct = self
                    .dialers
                    .get(&Mode::Direct)
                    .cloned()
                    .ok_or(Error::ModeNotAvailable(Mode::Direct))?;
                let stream = direct.dial(network, address).await?;
                Ok(MeteredStream::new(
                    stream,
                    Mode::Direct.as_str(),
                    self.metrics.clone(),
                ))
            }
            Err(err) => Err(err),
        }
    }

    /// Set the home traffic cap in MB. 0 means unlimited.
    pub fn set_home_limit(&self, mb: u64) {
        self.state.write().unwrap().home_limit_bytes = mb * 1024 * 1024;
    }

    pub fn get_home_limit(&self) -> u64 {
        self.state.read().unwrap().home_limit_bytes / 1024 / 1024
    }

    fn home_exhausted(&self, limit_bytes: u64) -> bool {
        limit_bytes != 0 && self.metrics.get_bytes("home") >= limit_bytes
    }

    pub fn is_home_exhausted(&self) -> bool {
        let limit = self.state.read().unwrap().home_limit_bytes;
        self.home_exhausted(limit)
    }

    /// Auto-switch away from `home` when its cap is exhausted. Called
    /// periodically by the supervisor; idempotent on a quiescent state.
    pub fn check_limits(&self) {
        let mut pending = Vec::new();

        {
            let mut state = self.state.write().unwrap();
            if state.mode == Mode::Home && self.home_exhausted(state.home_limit_bytes) {
                let old = state.mode;
                let mut next = self.home_auto_switch;
                if next == Mode::Home || !self.dialers.contains_key(&next) {
                    next = Mode::Direct;
                }
                state.mode = next;

                let used_mb = self.metrics.get_bytes("home") / 1024 / 1024;
                let limit_mb = state.home_limit_bytes / 1024 / 1024;
                warn!("Home proxy limit reached, switching to {}", next);

                if self.events.limit_reached {
                    pending.push((
                        "limit.reached",
                        json!({
                            "mode": "home",
                            "used_mb": used_mb,
                            "limit_mb": limit_mb,
                            "switched_to": next.as_str(),
                        }),
                    ));
                }
                if self.events.mode_changed {
                    pending.push((
                        "mode.changed",
                        json!({
                            "from": old.as_str(),
                            "to": next.as_str(),
                            "trigger": "limit_reached",
                        }),
                    ));
                }
            }
        }

        if let Some(webhook) = &self.webhook {
            for (event, payload) in pending {
                webhook.send(event, payload);
            }
        }
    }

    /// Probe whether the current mode can reach the network.
    ///
    /// `direct` is trivially healthy. `warp` first requires its
    /// interface to exist and be up. Otherwise the dialer must reach
    /// one of the probe endpoints within the per-attempt timeout.
    pub async fn test_current_mode(&self) -> Result<()> {
        let (mode, dialer) = {
            let state = self.state.read().unwrap();
            let dialer = self
                .dialers
                .get(&state.mode)
                .cloned()
                .ok_or(Error::ModeNotAvailable(state.mode))?;
            (state.mode, dialer)
        };

        if mode == Mode::Direct {
            return Ok(());
        }

        if mode == Mode::Warp {
            if let Some(interface) = &self.warp_interface {
                dialer::check_interface_up(interface)?;
            }
        }

        let mut timed_out = false;
        for endpoint in HEALTH_PROBES {
            match timeout(TEST_DIAL_TIMEOUT, dialer.dial("tcp", endpoint)).await {
                Ok(Ok(_stream)) => return Ok(()),
                Ok(Err(Error::Timeout)) | Err(_) => timed_out = true,
                Ok(Err(_)) => {}
            }
        }

        if timed_out {
            Err(Error::Timeout)
        } else {
            Err(Error::Unreachable(mode))
        }
    }
}
