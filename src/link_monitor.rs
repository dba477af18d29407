//! Kernel link event monitoring
//!
//! Watches rtnetlink link notifications so the system driver can report
//! interfaces going up, down or disappearing underneath a running AP.
//! Falls back to polling /sys/class/net when netlink is unavailable.

use crate::error::{ApError, ApResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Link change seen by the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Added { index: u32, name: String },
    Removed { index: u32, name: String },
    StateChanged { index: u32, name: String, is_up: bool },
}

impl LinkEvent {
    pub fn name(&self) -> &str {
        match self {
            LinkEvent::Added { name, .. }
            | LinkEvent::Removed { name, .. }
            | LinkEvent::StateChanged { name, .. } => name,
        }
    }
}

pub struct LinkMonitor {
    event_tx: broadcast::Sender<LinkEvent>,
    running: Arc<RwLock<bool>>,
}

impl LinkMonitor {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            event_tx,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    pub async fn start(&self) -> ApResult<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(ApError::InvalidState("Link monitor already running".to_string()));
        }
        *running = true;
        drop(running);

        info!("Starting link monitor");

        let event_tx = self.event_tx.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            if let Err(e) = Self::monitor_loop(event_tx, running).await {
                error!("Link monitor error: {}", e);
            }
        });

        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("Stopped link monitor");
    }

    async fn monitor_loop(
        event_tx: broadcast::Sender<LinkEvent>,
        running: Arc<RwLock<bool>>,
    ) -> ApResult<()> {
        if let Err(e) = Self::monitor_with_rtnetlink(event_tx.clone(), running.clone()).await {
            warn!("rtnetlink link monitoring failed: {}, falling back to polling", e);
            Self::monitor_with_polling(event_tx, running).await?;
        }
        Ok(())
    }

    async fn monitor_with_rtnetlink(
        event_tx: broadcast::Sender<LinkEvent>,
        running: Arc<RwLock<bool>>,
    ) -> ApResult<()> {
        use futures::stream::TryStreamExt;
        use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};

        let netlink_err =
            |what: &str, e: std::io::Error| ApError::DriverError(format!("{}: {}", what, e));

        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| netlink_err("Failed to create netlink socket", e))?;
        socket.bind(&SocketAddr::new(0, 0))
            .map_err(|e| netlink_err("Failed to bind netlink socket", e))?;

        // RTNLGRP_LINK
        socket.add_membership(1)
            .map_err(|e| netlink_err("Failed to join RTNLGRP_LINK", e))?;
        socket.set_non_blocking(true)
            .map_err(|e| netlink_err("Failed to set non-blocking", e))?;

        let (connection, handle, _) = rtnetlink::new_connection()
            .map_err(|e| netlink_err("Failed to create rtnetlink connection", e))?;
        tokio::spawn(connection);

        let mut known: HashMap<u32, (String, bool)> = HashMap::new();
        let mut links = handle.link().get().execute();
        while let Some(link) = links.try_next().await
            .map_err(|e| ApError::DriverError(format!("Failed to get links: {}", e)))? {
            if let Some(name) = extract_interface_name(&link) {
                let is_up = extract_operstate(&link);
                debug!("Found interface {} (index {}) up={}", name, link.header.index, is_up);
                known.insert(link.header.index, (name, is_up));
            }
        }

        let mut buf: Vec<u8> = Vec::with_capacity(16384);
        let async_fd = tokio::io::unix::AsyncFd::new(socket)
            .map_err(|e| netlink_err("Failed to create async fd", e))?;

        info!("Link monitor listening on rtnetlink");

        while *running.read().await {
            let readable = tokio::time::timeout(Duration::from_secs(1), async_fd.readable());
            let mut guard = match readable.await {
                Ok(Ok(guard)) => guard,
                Ok(Err(e)) => {
                    error!("AsyncFd error: {}", e);
                    continue;
                }
                Err(_) => continue,
            };

            buf.clear();
            match guard.get_inner().recv(&mut buf, 0) {
                Ok(len) if len > 0 => process_netlink_messages(&buf[..len], &mut known, &event_tx),
                Ok(_) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => warn!("Error receiving netlink message: {}", e),
            }

            guard.clear_ready();
        }

        Ok(())
    }

    async fn monitor_with_polling(
        event_tx: broadcast::Sender<LinkEvent>,
        running: Arc<RwLock<bool>>,
    ) -> ApResult<()> {
        info!("Link monitor polling /sys/class/net");

        let mut known: HashMap<String, (u32, bool)> = HashMap::new();

        while *running.read().await {
            let mut entries = tokio::fs::read_dir("/sys/class/net").await?;
            let mut current = HashSet::new();

            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                current.insert(name.clone());

                let index = read_sysfs(&name, "ifindex").await
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                let is_up = read_sysfs(&name, "operstate").await.as_deref() == Some("up");

                match known.get(&name) {
                    None => {
                        debug!("New interface {}", name);
                        let _ = event_tx.send(LinkEvent::Added { index, name: name.clone() });
                        if is_up {
                            let _ = event_tx.send(LinkEvent::StateChanged {
                                index,
                                name: name.clone(),
                                is_up,
                            });
                        }
                    }
                    Some((_, was_up)) if *was_up != is_up => {
                        debug!("Interface {} up={}", name, is_up);
                        let _ = event_tx.send(LinkEvent::StateChanged {
                            index,
                            name: name.clone(),
                            is_up,
                        });
                    }
                    Some(_) => {}
                }
                known.insert(name, (index, is_up));
            }

            let removed: Vec<String> = known
                .keys()
                .filter(|k| !current.contains(*k))
                .cloned()
                .collect();
            for name in removed {
                if let Some((index, _)) = known.remove(&name) {
                    debug!("Interface {} removed", name);
                    let _ = event_tx.send(LinkEvent::Removed { index, name });
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Ok(())
    }
}

impl Default for LinkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_sysfs(interface: &str, file: &str) -> Option<String> {
    let path = format!("/sys/class/net/{}/{}", interface, file);
    tokio::fs::read_to_string(path).await.ok().map(|s| s.trim().to_string())
}

fn extract_interface_name(link: &netlink_packet_route::link::LinkMessage) -> Option<String> {
    use netlink_packet_route::link::LinkAttribute;
    link.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name.clone()),
        _ => None,
    })
}

fn extract_operstate(link: &netlink_packet_route::link::LinkMessage) -> bool {
    use netlink_packet_route::link::{LinkAttribute, LinkFlags, State};

    for attr in &link.attributes {
        if let LinkAttribute::OperState(state) = attr {
            return *state == State::Up;
        }
    }

    let flags = link.header.flags;
    flags.contains(LinkFlags::Up) && flags.contains(LinkFlags::Running)
}

fn process_netlink_messages(
    data: &[u8],
    known: &mut HashMap<u32, (String, bool)>,
    event_tx: &broadcast::Sender<LinkEvent>,
) {
    use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
    use netlink_packet_route::RouteNetlinkMessage;

    let mut offset = 0;
    while offset < data.len() {
        let parsed = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&data[offset..]);
        let msg = match parsed {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Failed to parse netlink message: {}", e);
                break;
            }
        };

        let msg_len = msg.header.length as usize;
        if msg_len == 0 {
            break;
        }

        match msg.payload {
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)) => {
                if let Some(name) = extract_interface_name(&link) {
                    let index = link.header.index;
                    let is_up = extract_operstate(&link);

                    match known.get(&index) {
                        Some((_, was_up)) if *was_up != is_up => {
                            debug!("Interface {} up={}", name, is_up);
                            let _ = event_tx.send(LinkEvent::StateChanged {
                                index,
                                name: name.clone(),
                                is_up,
                            });
                        }
                        Some(_) => {}
                        None => {
                            debug!("New interface {} (index {})", name, index);
                            let _ = event_tx.send(LinkEvent::Added { index, name: name.clone() });
                            if is_up {
                                let _ = event_tx.send(LinkEvent::StateChanged {
                                    index,
                                    name: name.clone(),
                                    is_up,
                                });
                            }
                        }
                    }

                    known.insert(index, (name, is_up));
                }
            }
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelLink(link)) => {
                let index = link.header.index;
                if let Some((name, _)) = known.remove(&index) {
                    debug!("Interface {} removed (index {})", name, index);
                    let _ = event_tx.send(LinkEvent::Removed { index, name });
                }
            }
            _ => {}
        }

        offset += msg_len;
    }
}
