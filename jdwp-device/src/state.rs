// Device and client state
//
// A device owns the registry of debuggable processes ("clients"). The
// registry is shared by every connection to the device and only touched
// while holding the device lock; pid set changes are published on a watch
// channel for track-jdwp streams.

use crate::config::{ClientConfig, DeviceConfig, FeatureConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[track_caller]
fn lock<'a, T>(mutex: &'a Mutex<T>, context: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(err) => {
            error!(context = context, "mutex poisoned; continuing with recovered guard");
            err.into_inner()
        }
    }
}

/// One debuggable process on the device
#[derive(Debug)]
pub struct ClientState {
    pub pid: i32,
    pub uid: i32,
    pub process_name: String,
    pub package_name: String,
    pub abi: String,
    pub vm_identifier: String,
    pub jvm_flags: String,
    pub native_debuggable: bool,
    waiting: AtomicBool,
    debugger_attached: AtomicBool,
    features: Mutex<BTreeSet<String>>,
}

impl ClientState {
    pub fn new(config: ClientConfig) -> Self {
        let package_name = config
            .package_name
            .unwrap_or_else(|| config.process_name.clone());

        Self {
            pid: config.pid,
            uid: config.uid,
            process_name: config.process_name,
            package_name,
            abi: config.abi,
            vm_identifier: config.vm_identifier,
            jvm_flags: config.jvm_flags,
            native_debuggable: config.native_debuggable,
            waiting: AtomicBool::new(config.waiting),
            debugger_attached: AtomicBool::new(false),
            features: Mutex::new(BTreeSet::new()),
        }
    }

    /// Whether the process is paused waiting for a debugger
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn set_waiting(&self, waiting: bool) {
        self.waiting.store(waiting, Ordering::SeqCst);
    }

    /// Features negotiated through FEAT
    pub fn features(&self) -> BTreeSet<String> {
        lock(&self.features, "client features").clone()
    }

    pub fn set_features<I, S>(&self, features: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *lock(&self.features, "client features") = features.into_iter().map(Into::into).collect();
    }

    /// Claim the process's single JDWP connection slot
    pub fn try_attach_debugger(&self) -> bool {
        self.debugger_attached
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn detach_debugger(&self) {
        self.debugger_attached.store(false, Ordering::SeqCst);
    }

    pub fn is_debugger_attached(&self) -> bool {
        self.debugger_attached.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            pid: self.pid,
            uid: self.uid,
            process_name: self.process_name.clone(),
            package_name: Some(self.package_name.clone()),
            abi: self.abi.clone(),
            vm_identifier: self.vm_identifier.clone(),
            jvm_flags: self.jvm_flags.clone(),
            native_debuggable: self.native_debuggable,
            waiting: self.is_waiting(),
        }
    }
}

#[derive(Debug)]
struct DeviceInner {
    online: bool,
    clients: BTreeMap<i32, Arc<ClientState>>,
}

/// A simulated device and its registry of clients
#[derive(Debug)]
pub struct DeviceState {
    serial: String,
    features: FeatureConfig,
    inner: tokio::sync::Mutex<DeviceInner>,
    pids: watch::Sender<Vec<i32>>,
}

impl DeviceState {
    pub fn new(serial: impl Into<String>) -> Self {
        Self::with_features(serial, FeatureConfig::default())
    }

    pub fn with_features(serial: impl Into<String>, features: FeatureConfig) -> Self {
        let (pids, _) = watch::channel(Vec::new());
        Self {
            serial: serial.into(),
            features,
            inner: tokio::sync::Mutex::new(DeviceInner {
                online: true,
                clients: BTreeMap::new(),
            }),
            pids,
        }
    }

    /// Build a device and start every configured client
    pub fn from_config(config: DeviceConfig) -> Self {
        let clients: BTreeMap<i32, Arc<ClientState>> = config
            .clients
            .into_iter()
            .map(|c| (c.pid, Arc::new(ClientState::new(c))))
            .collect();
        let (pids, _) = watch::channel(clients.keys().copied().collect());

        Self {
            serial: config.serial,
            features: config.features,
            inner: tokio::sync::Mutex::new(DeviceInner {
                online: true,
                clients,
            }),
            pids,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Feature configuration the device was created with
    pub fn features(&self) -> &FeatureConfig {
        &self.features
    }

    pub async fn is_online(&self) -> bool {
        self.inner.lock().await.online
    }

    pub async fn set_online(&self, online: bool) {
        info!("Device {} is now {}", self.serial, if online { "online" } else { "offline" });
        self.inner.lock().await.online = online;
    }

    /// Register a process, replacing any client with the same pid
    pub async fn start_client(&self, config: ClientConfig) -> Arc<ClientState> {
        let client = Arc::new(ClientState::new(config));
        let mut inner = self.inner.lock().await;

        if inner.clients.insert(client.pid, client.clone()).is_some() {
            warn!("Replacing client pid={} on {}", client.pid, self.serial);
        }
        info!("Started client pid={} ({}) on {}", client.pid, client.process_name, self.serial);
        self.publish(&inner);

        client
    }

    /// Remove a process from the registry
    pub async fn stop_client(&self, pid: i32) -> Option<Arc<ClientState>> {
        let mut inner = self.inner.lock().await;
        let removed = inner.clients.remove(&pid);

        match &removed {
            Some(_) => {
                info!("Stopped client pid={} on {}", pid, self.serial);
                self.publish(&inner);
            }
            None => debug!("No client pid={} to stop on {}", pid, self.serial),
        }

        removed
    }

    /// Remove `client` only while it is still the registered process for
    /// its pid. A replacement started under the same pid is left alone.
    pub async fn stop_client_if_current(&self, client: &ClientState) -> bool {
        let mut inner = self.inner.lock().await;

        let current = inner
            .clients
            .get(&client.pid)
            .is_some_and(|registered| std::ptr::eq(Arc::as_ptr(registered), client));
        if !current {
            debug!(
                "pid={} on {} was replaced, keeping the registered client",
                client.pid, self.serial
            );
            return false;
        }

        inner.clients.remove(&client.pid);
        info!("Stopped client pid={} on {}", client.pid, self.serial);
        self.publish(&inner);
        true
    }

    pub async fn client(&self, pid: i32) -> Option<Arc<ClientState>> {
        self.inner.lock().await.clients.get(&pid).cloned()
    }

    pub async fn client_pids(&self) -> Vec<i32> {
        self.inner.lock().await.clients.keys().copied().collect()
    }

    /// Receiver that observes every change of the pid set
    pub fn subscribe_pids(&self) -> watch::Receiver<Vec<i32>> {
        self.pids.subscribe()
    }

    /// Snapshot of the device as a config
    pub async fn config(&self) -> DeviceConfig {
        let inner = self.inner.lock().await;
        DeviceConfig {
            serial: self.serial.clone(),
            clients: inner.clients.values().map(|c| c.config()).collect(),
            features: self.features.clone(),
        }
    }

    // Called with the lock held so watchers see changes in registry order
    fn publish(&self, inner: &DeviceInner) {
        self.pids.send_replace(inner.clients.keys().copied().collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_and_stop_are_visible_to_watchers() {
        let device = DeviceState::new("emulator-5554");
        let mut pids = device.subscribe_pids();
        assert!(pids.borrow_and_update().is_empty());

        device.start_client(ClientConfig::new(10, "app")).await;
        pids.changed().await.unwrap();
        assert_eq!(*pids.borrow_and_update(), vec![10]);

        assert!(device.stop_client(10).await.is_some());
        pids.changed().await.unwrap();
        assert!(pids.borrow_and_update().is_empty());

        assert!(device.stop_client(10).await.is_none());
        assert!(!pids.has_changed().unwrap());
    }

    #[tokio::test]
    async fn concurrent_clients_all_register() {
        let device = Arc::new(DeviceState::new("serial"));

        let tasks: Vec<_> = (1..=32)
            .map(|pid| {
                let device = device.clone();
                tokio::spawn(async move {
                    device.start_client(ClientConfig::new(pid, "p")).await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(device.client_pids().await, (1..=32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn stale_client_does_not_stop_its_replacement() {
        let device = DeviceState::new("emulator-5554");
        let old = device.start_client(ClientConfig::new(10, "old")).await;
        let new = device.start_client(ClientConfig::new(10, "new")).await;

        assert!(!device.stop_client_if_current(&old).await);
        assert_eq!(device.client(10).await.unwrap().process_name, "new");

        assert!(device.stop_client_if_current(&new).await);
        assert!(device.client(10).await.is_none());
    }

    #[test]
    fn debugger_slot_is_exclusive() {
        let client = ClientState::new(ClientConfig::new(1, "app"));
        assert!(!client.is_debugger_attached());
        assert!(client.try_attach_debugger());
        assert!(client.is_debugger_attached());
        assert!(!client.try_attach_debugger());
        client.detach_debugger();
        assert!(!client.is_debugger_attached());
        assert!(client.try_attach_debugger());
    }

    #[tokio::test]
    async fn config_snapshot_round_trips() {
        let mut config = DeviceConfig::new("snap");
        config
            .clients
            .push(ClientConfig::new(5, "proc").package_name("com.example").waiting(true));

        let device = DeviceState::from_config(config.clone());
        assert_eq!(device.client_pids().await, vec![5]);
        assert_eq!(*device.subscribe_pids().borrow(), vec![5]);

        device.client(5).await.unwrap().set_waiting(false);
        config.clients[0].waiting = false;
        assert_eq!(device.config().await, config);
    }
}
