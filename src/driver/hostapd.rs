//! hostapd management for AP interfaces
//!
//! One hostapd process per AP interface, run in the foreground and watched
//! so that an unexpected exit is reported as a driver failure.

use crate::config::{ApConfiguration, Band, SecurityMode};
use crate::driver::EventSink;
use crate::error::{ApError, ApResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// How long hostapd must stay alive before the start counts as successful
const STARTUP_GRACE: Duration = Duration::from_millis(500);

/// Channels used when the configuration leaves the choice to us
const DEFAULT_CHANNEL_24: u8 = 6;
const DEFAULT_CHANNEL_5: u8 = 36;

/// Per-interface settings that are not part of `ApConfiguration`
#[derive(Debug, Clone, Default)]
pub struct HostapdOptions {
    pub country_code: Option<String>,
    /// Bridge hostapd should attach the interface to
    pub bridge: Option<String>,
    pub ctrl_dir: Option<PathBuf>,
}

fn check_value(what: &str, value: &str) -> ApResult<()> {
    if value.chars().any(|c| c.is_control()) {
        return Err(ApError::InvalidParameter(format!("{} contains control characters", what)));
    }
    Ok(())
}

/// Render the hostapd configuration for `interface`
pub fn generate_config(
    interface: &str,
    config: &ApConfiguration,
    opts: &HostapdOptions,
) -> ApResult<String> {
    check_value("SSID", &config.ssid)?;
    if let Some(ref passphrase) = config.passphrase {
        check_value("Passphrase", passphrase)?;
    }

    let mut conf = String::new();

    conf.push_str(&format!("interface={}\n", interface));
    conf.push_str("driver=nl80211\n");
    if let Some(ref bridge) = opts.bridge {
        conf.push_str(&format!("bridge={}\n", bridge));
    }
    if let Some(ref dir) = opts.ctrl_dir {
        conf.push_str(&format!("ctrl_interface={}\n", dir.display()));
    }
    conf.push_str(&format!("ssid={}\n", config.ssid));
    conf.push_str("utf8_ssid=1\n");

    if let Some(ref country) = opts.country_code {
        conf.push_str(&format!("country_code={}\n", country));
        conf.push_str("ieee80211d=1\n");
    }

    let five_ghz = match config.band {
        Band::Ghz5 => true,
        Band::Any => config.channel >= 32,
        Band::Ghz24 | Band::Dual => false,
    };
    let channel = match config.channel {
        0 if five_ghz => DEFAULT_CHANNEL_5,
        0 => DEFAULT_CHANNEL_24,
        c => c,
    };
    conf.push_str(&format!("hw_mode={}\n", if five_ghz { "a" } else { "g" }));
    conf.push_str(&format!("channel={}\n", channel));
    conf.push_str("wmm_enabled=1\nieee80211n=1\n");
    if five_ghz {
        conf.push_str("ieee80211ac=1\n");
    }

    if let Some(bssid) = config.bssid {
        conf.push_str(&format!("bssid={}\n", bssid));
    }

    if config.hidden {
        conf.push_str("ignore_broadcast_ssid=1\n");
    }

    match config.security {
        SecurityMode::Open => {}
        SecurityMode::Wpa2Psk => {
            let passphrase = required_passphrase(config)?;
            conf.push_str("wpa=2\nwpa_passphrase=");
            conf.push_str(passphrase);
            conf.push_str("\nwpa_key_mgmt=WPA-PSK\nrsn_pairwise=CCMP\n");
        }
        SecurityMode::Sae => {
            let passphrase = required_passphrase(config)?;
            conf.push_str("wpa=2\nsae_password=");
            conf.push_str(passphrase);
            conf.push_str("\nwpa_key_mgmt=SAE\nrsn_pairwise=CCMP\nieee80211w=2\n");
        }
        SecurityMode::Owe => {
            conf.push_str("wpa=2\nwpa_key_mgmt=OWE\nrsn_pairwise=CCMP\nieee80211w=2\n");
        }
    }

    if let Some(ref peer) = config.transition_interface {
        conf.push_str(&format!("owe_transition_ifname={}\n", peer));
    }

    if let Some(max) = config.max_clients {
        conf.push_str(&format!("max_num_sta={}\n", max));
    }

    conf.push_str("auth_algs=1\nmacaddr_acl=0\n");

    Ok(conf)
}

fn required_passphrase(config: &ApConfiguration) -> ApResult<&str> {
    config.passphrase.as_deref().ok_or_else(|| {
        ApError::InvalidParameter(format!("{:?} requires a passphrase", config.security))
    })
}

/// A running hostapd bound to one interface
pub struct HostapdProcess {
    interface: String,
    conf_path: PathBuf,
    stop_tx: Option<oneshot::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl HostapdProcess {
    /// Write `conf` under `run_dir` and launch hostapd on it.
    ///
    /// Fails if hostapd exits within the startup grace period. Later exits
    /// are reported through `events` as a failure.
    pub async fn start(
        hostapd: &Path,
        run_dir: &Path,
        interface: &str,
        conf: &str,
        events: EventSink,
    ) -> ApResult<Self> {
        fs::create_dir_all(run_dir).await?;
        let conf_path = run_dir.join(format!("hostapd-{}.conf", interface));
        fs::write(&conf_path, conf).await?;

        let cmd_str = format!("{} -s {}", hostapd.display(), conf_path.display());
        let mut child = Command::new(hostapd)
            .arg("-s")
            .arg(&conf_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ApError::CommandFailed {
                cmd: cmd_str.clone(),
                code: None,
                stderr: e.to_string(),
            })?;

        sleep(STARTUP_GRACE).await;

        if let Some(status) = child.try_wait()? {
            let _ = fs::remove_file(&conf_path).await;
            return Err(ApError::CommandFailed {
                cmd: cmd_str,
                code: status.code(),
                stderr: "hostapd exited during startup".to_string(),
            });
        }

        info!("hostapd running on {}", interface);

        let (stop_tx, stop_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch(child, interface.to_string(), stop_rx, events));

        Ok(Self {
            interface: interface.to_string(),
            conf_path,
            stop_tx: Some(stop_tx),
            watcher: Some(watcher),
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Terminate hostapd without reporting a failure
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.await {
                warn!("hostapd watcher for {} failed: {}", self.interface, e);
            }
        }
        if let Err(e) = fs::remove_file(&self.conf_path).await {
            debug!("Failed to remove {}: {}", self.conf_path.display(), e);
        }
        info!("hostapd stopped on {}", self.interface);
    }
}

async fn watch(
    mut child: Child,
    interface: String,
    stop_rx: oneshot::Receiver<()>,
    events: EventSink,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = stop_rx => None,
    };

    match exited {
        Some(status) => {
            match status {
                Ok(status) => warn!("hostapd on {} exited unexpectedly: {}", interface, status),
                Err(e) => warn!("Failed to wait for hostapd on {}: {}", interface, e),
            }
            events.failure();
        }
        None => {
            if let Err(e) = child.kill().await {
                debug!("Failed to kill hostapd on {}: {}", interface, e);
            }
        }
    }
}
