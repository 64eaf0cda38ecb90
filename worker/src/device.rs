use std::fmt;

use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{Result, WorkerErr};

/// A compute device a tower can be placed on, named like `cpu:0` or `gpu:1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    pub id: usize,
    pub name: String,
}

impl Device {
    /// Parses a device name.
    ///
    /// Leading slashes and a `device:` prefix are accepted and dropped, so
    /// `/gpu:0` and `/device:GPU:0` both become `gpu:0`.
    ///
    /// # Arguments
    /// * `id` - The position of the device in the configured device list.
    /// * `name` - The device name.
    ///
    /// # Returns
    /// The parsed device or `InvalidConfiguration` if the name is malformed.
    pub fn parse(id: usize, name: &str) -> Result<Self> {
        let lowered = name.trim().trim_start_matches('/').to_ascii_lowercase();
        let trimmed = lowered.strip_prefix("device:").unwrap_or(lowered.as_str());

        let invalid = || WorkerErr::InvalidConfiguration(format!("malformed device name {name:?}"));

        let (kind, index) = trimmed.split_once(':').ok_or_else(invalid)?;
        let index: usize = index.parse().map_err(|_| invalid())?;

        if !matches!(kind, "cpu" | "gpu") {
            return Err(invalid());
        }

        Ok(Self {
            id,
            name: format!("{kind}:{index}"),
        })
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One dedicated single threaded pool per device.
///
/// Work `install`ed for a device runs on that device's thread and nowhere else.
pub struct DevicePool {
    devices: Vec<Device>,
    pools: Vec<ThreadPool>,
}

impl DevicePool {
    /// Creates a new `DevicePool`.
    ///
    /// # Arguments
    /// * `names` - The configured device names, in order.
    ///
    /// # Returns
    /// The pool or `DeviceUnavailable` if the list is empty, repeats a device,
    /// or a device thread can't be started.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        if names.is_empty() {
            return Err(WorkerErr::DeviceUnavailable(
                "no devices were configured".to_string(),
            ));
        }

        let mut devices: Vec<Device> = Vec::with_capacity(names.len());
        for (id, name) in names.iter().enumerate() {
            let device = Device::parse(id, name.as_ref())?;

            if devices.iter().any(|d| d.name == device.name) {
                return Err(WorkerErr::DeviceUnavailable(format!(
                    "device {device} is listed twice"
                )));
            }

            devices.push(device);
        }

        let pools = devices
            .iter()
            .map(|device| {
                let name = device.name.clone();
                ThreadPoolBuilder::new()
                    .num_threads(1)
                    .thread_name(move |_| format!("tower-{name}"))
                    .build()
                    .map_err(|e| WorkerErr::DeviceUnavailable(format!("{device}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(devices = devices.len(); "device pool ready");
        Ok(Self { devices, pools })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Runs `op` on the thread of the device with id `device`.
    ///
    /// # Returns
    /// What `op` returns, or `DeviceUnavailable` if there's no such device.
    pub fn install<R, F>(&self, device: usize, op: F) -> Result<R>
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        let pool = self.pools.get(device).ok_or_else(|| {
            WorkerErr::DeviceUnavailable(format!("there is no device with id {device}"))
        })?;

        Ok(pool.install(op))
    }
}

impl fmt::Debug for DevicePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevicePool")
            .field("devices", &self.devices)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_usual_spellings() {
        assert_eq!(Device::parse(0, "gpu:1").unwrap().name, "gpu:1");
        assert_eq!(Device::parse(1, "/gpu:0").unwrap().name, "gpu:0");
        assert_eq!(Device::parse(2, "/device:CPU:3").unwrap().name, "cpu:3");
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(Device::parse(0, "tpu:0").is_err());
        assert!(Device::parse(0, "gpu").is_err());
        assert!(Device::parse(0, "gpu:x").is_err());
    }

    #[test]
    fn empty_or_repeated_lists_are_unavailable() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            DevicePool::new(&empty),
            Err(WorkerErr::DeviceUnavailable(_))
        ));
        assert!(matches!(
            DevicePool::new(&["gpu:0", "/gpu:0"]),
            Err(WorkerErr::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn install_runs_on_the_device_thread() {
        let pool = DevicePool::new(&["cpu:0", "cpu:1"]).unwrap();

        let name = pool
            .install(1, || std::thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("tower-cpu:1"));
        assert!(pool.install(2, || ()).is_err());
    }
}
