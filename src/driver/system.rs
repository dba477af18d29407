//! Driver backed by iw, ip and hostapd
//!
//! Interfaces are created on one phy with names that are never reused
//! within the process. Only interfaces created here are reported back to
//! controllers; everything else the kernel tells us about is ignored.

use super::hostapd::{generate_config, HostapdOptions, HostapdProcess};
use super::{DriverControl, EventSink};
use crate::config::{ApConfiguration, Band, DriverSettings};
use crate::error::{ApError, ApResult};
use crate::info::{is_24ghz, is_5ghz, ChannelWidth};
use crate::link_monitor::LinkEvent;
use crate::mac::MacAddress;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Linux kernel limit on interface name length
const MAX_INTERFACE_NAME_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterfaceKind {
    Ap,
    Bridge,
}

struct OwnedInterface {
    kind: InterfaceKind,
    /// Creation order; the lowest AP index of a controller is its primary leg
    serial: u32,
    events: EventSink,
    hostapd: Option<HostapdProcess>,
    country_code: Option<String>,
    /// Address the kernel assigned at creation; distinct per AP interface
    factory_address: Option<MacAddress>,
}

type OwnedMap = Arc<Mutex<HashMap<String, OwnedInterface>>>;

pub struct SystemDriver {
    settings: DriverSettings,
    next_serial: AtomicU32,
    owned: OwnedMap,
    pollers: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl SystemDriver {
    pub fn new(settings: DriverSettings) -> Self {
        Self {
            settings,
            next_serial: AtomicU32::new(0),
            owned: Arc::new(Mutex::new(HashMap::new())),
            pollers: Mutex::new(HashMap::new()),
        }
    }

    /// Forward kernel link events for owned interfaces to their controllers
    pub fn watch_links(
        self: &Arc<Self>,
        mut links: broadcast::Receiver<LinkEvent>,
    ) -> JoinHandle<()> {
        let driver = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match links.recv().await {
                    Ok(event) => driver.on_link_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Link watcher lagged, {} events dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn on_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::StateChanged { name, is_up, .. } => {
                let owned = self.owned.lock().await;
                if let Some(entry) = owned.get(&name) {
                    if is_up {
                        entry.events.interface_up(&name);
                    } else {
                        entry.events.interface_down(&name);
                    }
                }
            }
            LinkEvent::Removed { name, .. } => {
                let entry = self.owned.lock().await.remove(&name);
                if let Some(entry) = entry {
                    info!("Owned interface {} removed by the kernel", name);
                    if let Some(hostapd) = entry.hostapd {
                        hostapd.stop().await;
                    }
                    entry.events.interface_destroyed(&name);
                }
            }
            LinkEvent::Added { .. } => {}
        }
    }

    /// Next free interface name for `prefix`. Names are not reused even
    /// after the interface is gone.
    fn allocate_name(&self, prefix: &str) -> ApResult<(String, u32)> {
        loop {
            let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
            let name = format!("{}{}", prefix, serial);
            validate_interface_name(&name)?;
            if !Path::new(&format!("/sys/class/net/{}", name)).exists() {
                return Ok((name, serial));
            }
            debug!("Interface name {} taken, skipping", name);
        }
    }

    async fn register(
        &self,
        name: &str,
        kind: InterfaceKind,
        serial: u32,
        events: EventSink,
        factory_address: Option<MacAddress>,
    ) {
        self.owned.lock().await.insert(name.to_string(), OwnedInterface {
            kind,
            serial,
            events,
            hostapd: None,
            country_code: None,
            factory_address,
        });
    }

    async fn ensure_poller(&self, events: &EventSink) {
        let controller = events.controller_id();
        let mut pollers = self.pollers.lock().await;
        if pollers.get(&controller).is_some_and(|task| !task.is_finished()) {
            return;
        }
        let period = Duration::from_millis(self.settings.station_poll_interval_ms.max(100));
        let task = tokio::spawn(poll_ap(self.owned.clone(), events.clone(), period));
        pollers.insert(controller, task);
    }
}

#[async_trait]
impl DriverControl for SystemDriver {
    async fn create_ap_interface(&self, events: EventSink) -> ApResult<String> {
        let (name, serial) = self.allocate_name(&self.settings.interface_prefix)?;
        run_iw(&["phy", &self.settings.phy, "interface", "add", &name, "type", "__ap"]).await?;
        let address = read_sysfs(&name, "address").await.and_then(|a| a.parse().ok());
        if address.is_none() {
            warn!("Could not read the assigned address of {}", name);
        }
        self.register(&name, InterfaceKind::Ap, serial, events, address).await;
        info!("Created AP interface {} on {}", name, self.settings.phy);
        Ok(name)
    }

    async fn create_bridge_interface(&self, events: EventSink) -> ApResult<String> {
        let (name, serial) = self.allocate_name(&self.settings.bridge_prefix)?;
        run_ip(&["link", "add", "name", &name, "type", "bridge"]).await?;
        self.register(&name, InterfaceKind::Bridge, serial, events, None).await;
        info!("Created bridge {}", name);
        Ok(name)
    }

    async fn destroy_interface(&self, name: &str) {
        let entry = self.owned.lock().await.remove(name);
        let Some(entry) = entry else {
            debug!("Interface {} is not owned or already gone", name);
            return;
        };

        if let Some(hostapd) = entry.hostapd {
            hostapd.stop().await;
        }

        let result = match entry.kind {
            InterfaceKind::Ap => run_iw(&["dev", name, "del"]).await.map(|_| ()),
            InterfaceKind::Bridge => {
                if let Err(e) = run_ip(&["link", "set", "dev", name, "down"]).await {
                    debug!("Failed to set {} down: {}", name, e);
                }
                run_ip(&["link", "delete", name, "type", "bridge"]).await
            }
        };

        match result {
            Ok(()) => info!("Destroyed interface {}", name),
            Err(e) => warn!("Failed to destroy interface {}: {}", name, e),
        }
    }

    async fn push_configuration(
        &self,
        name: &str,
        config: &ApConfiguration,
        events: EventSink,
    ) -> ApResult<()> {
        let opts = {
            let owned = self.owned.lock().await;
            let entry = owned.get(name).ok_or_else(|| {
                ApError::DriverError(format!("Interface {} is not managed by this driver", name))
            })?;
            if entry.hostapd.is_some() {
                return Err(ApError::InvalidState(format!("AP already configured on {}", name)));
            }
            let bridge = owned.iter()
                .find(|(_, other)| {
                    other.kind == InterfaceKind::Bridge
                        && other.events.controller_id() == events.controller_id()
                })
                .map(|(bridge, _)| bridge.clone());
            HostapdOptions {
                country_code: entry.country_code.clone(),
                bridge,
                ctrl_dir: Some(self.settings.run_dir.join("hostapd")),
            }
        };

        let conf = generate_config(name, config, &opts)?;
        let hostapd = HostapdProcess::start(
            &self.settings.hostapd_path,
            &self.settings.run_dir,
            name,
            &conf,
            events.clone(),
        ).await?;

        let orphan = {
            let mut owned = self.owned.lock().await;
            match owned.get_mut(name) {
                Some(entry) => {
                    entry.hostapd = Some(hostapd);
                    None
                }
                None => Some(hostapd),
            }
        };
        if let Some(hostapd) = orphan {
            hostapd.stop().await;
            return Err(ApError::DriverError(format!("Interface {} vanished during setup", name)));
        }

        self.ensure_poller(&events).await;
        Ok(())
    }

    async fn set_address(&self, name: &str, addr: MacAddress) -> ApResult<()> {
        run_ip(&["link", "set", "dev", name, "address", &addr.to_string()]).await
    }

    async fn get_factory_address(&self, name: &str) -> ApResult<MacAddress> {
        let recorded = self.owned.lock().await.get(name).and_then(|e| e.factory_address);
        if let Some(address) = recorded {
            return Ok(address);
        }
        read_sysfs(name, "address").await
            .ok_or_else(|| ApError::DriverError(format!("No address known for {}", name)))?
            .parse()
    }

    async fn set_regulatory_domain(&self, name: &str, country_code: &str) -> ApResult<()> {
        run_iw(&["reg", "set", country_code]).await?;
        if let Some(entry) = self.owned.lock().await.get_mut(name) {
            entry.country_code = Some(country_code.to_string());
        }
        Ok(())
    }

    async fn is_interface_up(&self, name: &str) -> bool {
        match read_sysfs(name, "operstate").await.as_deref() {
            Some("up") => true,
            // Bridges without carrier and some AP drivers report "unknown"
            Some("unknown") => read_sysfs(name, "flags").await
                .and_then(|f| u32::from_str_radix(f.trim_start_matches("0x"), 16).ok())
                .is_some_and(|flags| flags & libc::IFF_UP as u32 != 0),
            _ => false,
        }
    }

    async fn bring_bridge_up(&self, name: &str) -> ApResult<()> {
        run_ip(&["link", "set", "dev", name, "up"]).await
    }

    async fn supports_band(&self, band: Band) -> bool {
        let output = match run_iw(&["phy", &self.settings.phy, "info"]).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to query {} capabilities: {}", self.settings.phy, e);
                return false;
            }
        };
        let (has_24, has_5) = parse_phy_bands(&output);
        match band {
            Band::Ghz24 => has_24,
            Band::Ghz5 => has_5,
            Band::Any => has_24 || has_5,
            Band::Dual => has_24 && has_5,
        }
    }
}

/// Poll stations and channel for every running leg of one controller
async fn poll_ap(owned: OwnedMap, events: EventSink, period: Duration) {
    let controller = events.controller_id();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_stations: Option<Vec<MacAddress>> = None;
    let mut last_channel: Option<(i32, ChannelWidth)> = None;

    loop {
        ticker.tick().await;
        if events.is_closed() {
            break;
        }

        let legs: Vec<String> = {
            let owned = owned.lock().await;
            let mut legs: Vec<(u32, String)> = owned.iter()
                .filter(|(_, e)| {
                    e.kind == InterfaceKind::Ap
                        && e.hostapd.is_some()
                        && e.events.controller_id() == controller
                })
                .map(|(name, e)| (e.serial, name.clone()))
                .collect();
            legs.sort();
            legs.into_iter().map(|(_, name)| name).collect()
        };
        let Some(primary) = legs.first() else {
            debug!("No running legs for controller {}, poller exiting", controller);
            break;
        };

        let mut stations = Vec::new();
        for leg in &legs {
            match run_iw(&["dev", leg, "station", "dump"]).await {
                Ok(output) => stations.extend(parse_station_dump(&output)),
                Err(e) => debug!("Station dump on {} failed: {}", leg, e),
            }
        }
        stations.sort_by_key(|mac| mac.octets());
        stations.dedup();
        if last_stations.as_ref() != Some(&stations) {
            events.stations_changed(stations.clone());
            last_stations = Some(stations);
        }

        match run_iw(&["dev", primary, "info"]).await {
            Ok(output) => {
                if let Some(channel) = parse_channel_info(&output) {
                    if last_channel != Some(channel) {
                        events.channel_switched(channel.0, channel.1);
                        last_channel = Some(channel);
                    }
                }
            }
            Err(e) => debug!("Info on {} failed: {}", primary, e),
        }
    }
}

/// Stations listed by `iw dev <if> station dump`
pub fn parse_station_dump(output: &str) -> Vec<MacAddress> {
    output.lines()
        .filter_map(|line| line.strip_prefix("Station "))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter_map(|mac| mac.parse().ok())
        .collect()
}

/// Frequency and width from the `channel` line of `iw dev <if> info`, e.g.
/// `channel 36 (5180 MHz), width: 80 MHz, center1: 5210 MHz`
pub fn parse_channel_info(output: &str) -> Option<(i32, ChannelWidth)> {
    let line = output.lines().map(str::trim).find(|l| l.starts_with("channel "))?;

    let open = line.find('(')?;
    let frequency: i32 = line[open + 1..].split_whitespace().next()?.parse().ok()?;

    let width_part = line.split("width: ").nth(1)?;
    let width_str = width_part.split_whitespace().next()?;
    let width = if width_str == "80+80" {
        ChannelWidth::Mhz80Plus80
    } else {
        let mhz: u32 = width_str.parse().ok()?;
        ChannelWidth::from_mhz(mhz, !width_part.contains("no HT"))
    };

    Some((frequency, width))
}

/// Whether `iw phy <phy> info` lists usable 2.4GHz and 5GHz frequencies
pub fn parse_phy_bands(output: &str) -> (bool, bool) {
    let mut has_24 = false;
    let mut has_5 = false;
    for line in output.lines().map(str::trim) {
        let Some(rest) = line.strip_prefix("* ") else {
            continue;
        };
        if !rest.contains(" MHz [") || rest.contains("(disabled)") {
            continue;
        }
        let Some(freq) = rest.split_whitespace().next().and_then(|f| f.split('.').next()) else {
            continue;
        };
        if let Ok(freq) = freq.parse::<i32>() {
            has_24 |= is_24ghz(freq);
            has_5 |= is_5ghz(freq);
        }
    }
    (has_24, has_5)
}

fn validate_interface_name(name: &str) -> ApResult<()> {
    if name.is_empty() || name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(ApError::InvalidParameter(format!(
            "Interface name '{}' must be 1-{} characters",
            name, MAX_INTERFACE_NAME_LEN
        )));
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if name.starts_with('-') || !valid_chars {
        return Err(ApError::InvalidParameter(format!("Invalid interface name '{}'", name)));
    }
    Ok(())
}

async fn read_sysfs(interface: &str, file: &str) -> Option<String> {
    let path = format!("/sys/class/net/{}/{}", interface, file);
    fs::read_to_string(path).await.ok().map(|s| s.trim().to_string())
}

async fn run_command(program: &str, args: &[&str]) -> ApResult<String> {
    let cmd_str = format!("{} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| ApError::CommandFailed {
            cmd: cmd_str.clone(),
            code: None,
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ApError::CommandFailed {
            cmd: cmd_str,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

async fn run_iw(args: &[&str]) -> ApResult<String> {
    run_command("iw", args).await
}

async fn run_ip(args: &[&str]) -> ApResult<()> {
    run_command("ip", args).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATION_DUMP: &str = "\
Station 02:11:22:33:44:55 (on ap0)
\tinactive time:\t120 ms
\trx bytes:\t18201
Station 02:aa:bb:cc:dd:ee (on ap0)
\tinactive time:\t4000 ms
";

    const DEV_INFO: &str = "\
Interface ap0
\tifindex 12
\twdev 0x3
\taddr 02:00:00:00:01:00
\tssid home
\ttype AP
\twiphy 0
\tchannel 36 (5180 MHz), width: 80 MHz, center1: 5210 MHz
\ttxpower 20.00 dBm
";

    const PHY_INFO: &str = "\
Wiphy phy0
\tBand 1:
\t\tFrequencies:
\t\t\t* 2412 MHz [1] (20.0 dBm)
\t\t\t* 2484 MHz [14] (disabled)
\tBand 2:
\t\tFrequencies:
\t\t\t* 5180.0 MHz [36] (20.0 dBm)
\t\t\t* 5200 MHz [40] (disabled)
";

    #[test]
    fn test_parse_station_dump() {
        let stations = parse_station_dump(STATION_DUMP);
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].to_string(), "02:11:22:33:44:55");
        assert!(parse_station_dump("").is_empty());
    }

    #[test]
    fn test_parse_channel_info() {
        assert_eq!(parse_channel_info(DEV_INFO), Some((5180, ChannelWidth::Mhz80)));
        assert_eq!(
            parse_channel_info("\tchannel 6 (2437 MHz), width: 20 MHz (no HT), center1: 2437 MHz"),
            Some((2437, ChannelWidth::Mhz20NoHt))
        );
        assert_eq!(parse_channel_info("Interface ap0\n\ttype AP\n"), None);
    }

    #[test]
    fn test_parse_phy_bands() {
        assert_eq!(parse_phy_bands(PHY_INFO), (true, true));
        let only_24 = "\t\t\t* 2412 MHz [1] (20.0 dBm)\n\t\t\t* 5180 MHz [36] (disabled)\n";
        assert_eq!(parse_phy_bands(only_24), (true, false));
    }

    #[test]
    fn test_interface_names() {
        assert!(validate_interface_name("ap0").is_ok());
        assert!(validate_interface_name("apbr12").is_ok());
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("-ap").is_err());
        assert!(validate_interface_name("ap;reboot").is_err());
        assert!(validate_interface_name("averyveryverylongname").is_err());
    }

    #[tokio::test]
    async fn test_factory_address_per_interface() {
        let driver = SystemDriver::new(DriverSettings::default());
        let (queue, _rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = EventSink::new(1, queue);

        let first: MacAddress = "02:00:00:00:01:00".parse().unwrap();
        let second: MacAddress = "02:00:00:00:01:01".parse().unwrap();
        driver.register("apctltest0", InterfaceKind::Ap, 0, sink.clone(), Some(first)).await;
        driver.register("apctltest1", InterfaceKind::Ap, 1, sink.clone(), Some(second)).await;
        driver.register("apctltestbr2", InterfaceKind::Bridge, 2, sink, None).await;

        assert_eq!(driver.get_factory_address("apctltest0").await.unwrap(), first);
        assert_eq!(driver.get_factory_address("apctltest1").await.unwrap(), second);
        assert!(driver.get_factory_address("apctltestbr2").await.is_err());
        assert!(driver.get_factory_address("apctlnone9").await.is_err());
    }
}
