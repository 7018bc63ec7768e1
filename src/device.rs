/*
    Compute device the sorters run on.

    A thin wrapper around a wgpu device and its queue. Besides the handles it carries what the
    sorters need to plan a launch: the number of work-groups that are resident at the same time
    (one per compute unit), allocation limits and the retry bounds of the inter-group barrier.
    A sort call owns the queue for its whole duration, so co-resident launches of two sorts
    never compete for the compute units.
*/

use std::{
    collections::HashMap,
    mem::size_of,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use bytemuck::Pod;
use futures_intrusive::channel::shared::oneshot_channel;

use crate::{
    config::SyncConfig,
    error::SortError,
    kernels::{KernelKey, Kernels},
    sync::LaunchStatus,
};

/// resident work-groups assumed for gpu adapters when no count is given
const DEFAULT_GPU_COMPUTE_UNITS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// largest device buffer a sort may allocate, further capped by the adapter limits
    pub max_buffer_size: u64,
    pub max_compute_units: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_buffer_size: 1 << 32,
            max_compute_units: 256,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceDescriptor<'a> {
    pub label: Option<&'a str>,
    /// number of work-groups that may wait on each other, defaults to the available
    /// parallelism on cpu adapters and 16 otherwise; cpu adapters never get more than that
    pub compute_units: Option<u32>,
    pub limits: Limits,
    pub sync: SyncConfig,
}

/// Snapshot of the device counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// compute dispatches submitted by sorts
    pub launches: u64,
    /// number of inter-group barrier waits that ran over their retry limit
    pub barrier_stalls: u64,
    /// number of look-back reads that had to wait for a predecessor
    pub lookback_waits: u64,
    pub aborted_launches: u64,
}

#[derive(Default)]
struct Counters {
    launches: AtomicU64,
    barrier_stalls: AtomicU64,
    lookback_waits: AtomicU64,
    aborted_launches: AtomicU64,
}

struct DeviceInner {
    label: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
    compute_units: u32,
    limits: Limits,
    sync: SyncConfig,
    submit: Mutex<()>,
    kernels: Mutex<HashMap<KernelKey, Arc<Kernels>>>,
    counters: Counters,
}

/// Compute device. Cloning is cheap, clones share the wgpu device and the queue.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("label", &self.inner.label)
            .field("adapter", &self.inner.info.name)
            .field("compute_units", &self.inner.compute_units)
            .finish()
    }
}

fn default_compute_units(info: &wgpu::AdapterInfo) -> u32 {
    match info.device_type {
        wgpu::DeviceType::Cpu => std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1),
        _ => DEFAULT_GPU_COMPUTE_UNITS,
    }
}

impl Device {
    /// Opens the default adapter. Fails when no adapter with compute support exists.
    pub async fn new(desc: &DeviceDescriptor<'_>) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| anyhow::anyhow!("no compute adapter available: {err}"))?;
        let info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: desc.label,
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await?;
        return Ok(Self::from_wgpu(device, queue, &info, desc));
    }

    /// Wraps a device the caller already created, e.g. one shared with a renderer.
    pub fn from_wgpu(
        device: wgpu::Device,
        queue: wgpu::Queue,
        info: &wgpu::AdapterInfo,
        desc: &DeviceDescriptor,
    ) -> Self {
        let mut compute_units = desc
            .compute_units
            .unwrap_or_else(|| default_compute_units(info))
            .clamp(1, desc.limits.max_compute_units.max(1));
        // cpu adapters run one work-group per worker thread
        if info.device_type == wgpu::DeviceType::Cpu {
            let workers = default_compute_units(info);
            if compute_units > workers {
                log::warn!(
                    "{} runs at most {workers} work-groups at once, not {compute_units}",
                    info.name
                );
                compute_units = workers;
            }
        }
        let label = desc.label.unwrap_or("radix sort device").to_string();
        log::info!(
            "using {} ({:?}, {:?}) with {compute_units} resident work-groups",
            info.name,
            info.backend,
            info.device_type
        );
        return Self {
            inner: Arc::new(DeviceInner {
                label,
                device,
                queue,
                info: info.clone(),
                compute_units,
                limits: desc.limits,
                sync: desc.sync,
                submit: Mutex::new(()),
                kernels: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        };
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.inner.info
    }

    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.inner.device
    }

    pub fn wgpu_queue(&self) -> &wgpu::Queue {
        &self.inner.queue
    }

    pub fn compute_units(&self) -> u32 {
        self.inner.compute_units
    }

    pub fn limits(&self) -> Limits {
        self.inner.limits
    }

    pub fn sync_config(&self) -> SyncConfig {
        self.inner.sync
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let c = &self.inner.counters;
        Diagnostics {
            launches: c.launches.load(Ordering::Relaxed),
            barrier_stalls: c.barrier_stalls.load(Ordering::Relaxed),
            lookback_waits: c.lookback_waits.load(Ordering::Relaxed),
            aborted_launches: c.aborted_launches.load(Ordering::Relaxed),
        }
    }

    /// Exclusive access to the queue for the duration of one sort.
    pub(crate) fn queue(&self) -> MutexGuard<'_, ()> {
        self.inner
            .submit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// largest number of groups in one dispatch dimension
    pub(crate) fn max_workgroups(&self) -> u32 {
        self.inner
            .device
            .limits()
            .max_compute_workgroups_per_dimension
    }

    pub(crate) fn min_uniform_offset_alignment(&self) -> u64 {
        self.inner
            .device
            .limits()
            .min_uniform_buffer_offset_alignment as u64
    }

    /// Fails with [SortError::OutOfMemory] if a buffer of `bytes` can not be bound.
    pub(crate) fn check_size(&self, bytes: u64) -> Result<(), SortError> {
        let adapter = self.inner.device.limits();
        let max = self
            .inner
            .limits
            .max_buffer_size
            .min(adapter.max_buffer_size)
            .min(adapter.max_storage_buffer_binding_size as u64);
        if bytes > max {
            return Err(SortError::OutOfMemory { bytes });
        }
        return Ok(());
    }

    /// Pipelines for the given digit width, key width and group size, compiled on first use.
    pub(crate) fn kernels(&self, key: KernelKey) -> Arc<Kernels> {
        let mut cache = self
            .inner
            .kernels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        return cache
            .entry(key)
            .or_insert_with(|| {
                log::debug!("compiling radix sort kernels for {key:?}");
                Arc::new(Kernels::new(&self.inner.device, key))
            })
            .clone();
    }

    pub(crate) fn submit(&self, encoder: wgpu::CommandEncoder, launches: u64) {
        self.inner.queue.submit([encoder.finish()]);
        self.inner
            .counters
            .launches
            .fetch_add(launches, Ordering::Relaxed);
    }

    pub(crate) fn record_status(&self, status: &LaunchStatus) {
        let c = &self.inner.counters;
        c.barrier_stalls
            .fetch_add(status.barrier_stalls as u64, Ordering::Relaxed);
        c.lookback_waits
            .fetch_add(status.lookback_waits as u64, Ordering::Relaxed);
        if status.aborted > 0 {
            c.aborted_launches.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copies the first `count` elements of `buffer` back to the host.
    pub(crate) async fn download<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        count: usize,
    ) -> anyhow::Result<Vec<T>> {
        let device = &self.inner.device;
        let size = (count * size_of::<T>()) as u64;
        let download_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("download buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("download encoder"),
        });
        encoder.copy_buffer_to_buffer(buffer, 0, &download_buffer, 0, size);
        self.inner.queue.submit([encoder.finish()]);

        let buffer_slice = download_buffer.slice(..);
        let (tx, rx) = oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::PollType::Wait)?;
        rx.receive()
            .await
            .ok_or_else(|| anyhow::anyhow!("buffer mapping was cancelled"))??;

        let values = {
            let data = buffer_slice.get_mapped_range();
            bytemuck::cast_slice::<u8, T>(&data).to_vec()
        };
        download_buffer.unmap();
        download_buffer.destroy();
        return Ok(values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_device;

    #[test]
    fn compute_units_are_clamped() {
        let Some(device) = test_device(&DeviceDescriptor {
            compute_units: Some(1000),
            limits: Limits {
                max_compute_units: 64,
                ..Default::default()
            },
            ..Default::default()
        }) else {
            return;
        };
        let expected = match device.adapter_info().device_type {
            wgpu::DeviceType::Cpu => 64u32.min(default_compute_units(device.adapter_info())),
            _ => 64,
        };
        assert_eq!(device.compute_units(), expected);
        assert_eq!(device.label(), "radix sort device");
        assert_eq!(device.diagnostics(), Diagnostics::default());
    }

    #[test]
    fn size_checks_follow_the_configured_limit() {
        let Some(device) = test_device(&DeviceDescriptor {
            limits: Limits {
                max_buffer_size: 1024,
                ..Default::default()
            },
            ..Default::default()
        }) else {
            return;
        };
        assert!(device.check_size(1024).is_ok());
        assert_eq!(
            device.check_size(1025),
            Err(SortError::OutOfMemory { bytes: 1025 })
        );
    }

    #[test]
    fn download_returns_buffer_contents() {
        use wgpu::util::DeviceExt;

        let Some(device) = test_device(&DeviceDescriptor::default()) else {
            return;
        };
        let data: Vec<u32> = (0..1000).map(|i| i * 3).collect();
        let buffer = device
            .wgpu_device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("download test"),
                contents: bytemuck::cast_slice(&data),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            });
        let back = pollster::block_on(device.download::<u32>(&buffer, 600)).unwrap();
        assert_eq!(back, data[..600]);
    }
}
