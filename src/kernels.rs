/*
    Compute pipelines and device buffers shared by the three sorters.

    All kernels live in shaders/radix_sort.wgsl. One pipeline set is compiled per digit width,
    key width and work-group size, the constants are prepended to the shader source. Every
    dispatch binds the same seven buffers, the uniform parameters are selected through a
    dynamic offset so that a single buffer holds the parameters of all stages.
*/

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use wgpu::util::DeviceExt;

use crate::{device::Device, error::SortError, lookback};

// IMPORTANT: the following constants have to be synced with the numbers in radix_sort.wgsl
/// rows of keys one histogram group counts per work item
pub(crate) const HIST_ROWS: u32 = 32;
/// words of the launch status buffer
pub(crate) const STATUS_WORDS: usize = 8;
const PARAMS_SIZE: u64 = size_of::<Params>() as u64;

/// Uniform parameters of one dispatch.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct Params {
    /// padded number of keys
    pub n: u32,
    pub stages: u32,
    pub stage: u32,
    pub groups: u32,
    pub tile_size: u32,
    pub init_retry_limit: u32,
    pub barrier_retry_limit: u32,
    pub abort_on_timeout: u32,
    /// group that spins `delay` times before it reaches the barrier init
    pub delay_group: u32,
    pub delay: u32,
    pub pad: [u32; 2],
}

impl Default for Params {
    fn default() -> Self {
        Self {
            delay_group: u32::MAX,
            ..Zeroable::zeroed()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct KernelKey {
    pub radix_bits: u32,
    /// u32 words per key
    pub key_words: u32,
    pub work_group_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kernel {
    OneWorkGroup,
    Cooperative,
    GlobalHistogram,
    ScanHistogram,
    OnesweepSweep,
    SyncCheck,
}

pub(crate) struct Kernels {
    pub key: KernelKey,
    bind_group_layout: wgpu::BindGroupLayout,
    one_wg_p: wgpu::ComputePipeline,
    cooperative_p: wgpu::ComputePipeline,
    histogram_p: wgpu::ComputePipeline,
    scan_p: wgpu::ComputePipeline,
    sweep_p: wgpu::ComputePipeline,
    sync_check_p: wgpu::ComputePipeline,
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl Kernels {
    pub(crate) fn new(device: &wgpu::Device, key: KernelKey) -> Self {
        let bind_group_layout = Self::bind_group_layout(device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("radix sort pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let raw_shader: &str = include_str!("shaders/radix_sort.wgsl");
        let shader_code = format!(
            "const WG_SIZE: u32 = {:}u;\n\
            const RADIX_BITS: u32 = {:}u;\n\
            const KEY_WORDS: u32 = {:}u;\n\
            const HIST_ROWS: u32 = {:}u;\n\
            const FLAG_UPDATED: u32 = {:#x}u;\n\
            const FLAG_ACCUMULATED: u32 = {:#x}u;\n\
            const COUNT_MASK: u32 = {:#x}u;\n{:}",
            key.work_group_size,
            key.radix_bits,
            key.key_words,
            HIST_ROWS,
            lookback::FLAG_UPDATED,
            lookback::FLAG_ACCUMULATED,
            lookback::COUNT_MASK,
            raw_shader
        );
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("radix sort shader"),
            source: wgpu::ShaderSource::Wgsl(shader_code.into()),
        });
        let pipeline = |entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        return Self {
            key,
            one_wg_p: pipeline("one_wg_sort"),
            cooperative_p: pipeline("cooperative_sort"),
            histogram_p: pipeline("global_histogram"),
            scan_p: pipeline("scan_histogram"),
            sweep_p: pipeline("onesweep_sweep"),
            sync_check_p: pipeline("sync_check"),
            bind_group_layout,
        };
    }

    fn bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        return device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("radix sort bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(PARAMS_SIZE),
                    },
                    count: None,
                },
                // keys a, keys b, values a, values b
                storage_entry(1),
                storage_entry(2),
                storage_entry(3),
                storage_entry(4),
                // internal memory (histograms, barrier counters, look-back cells)
                storage_entry(5),
                // launch status
                storage_entry(6),
            ],
        });
    }

    fn pipeline(&self, kernel: Kernel) -> &wgpu::ComputePipeline {
        match kernel {
            Kernel::OneWorkGroup => &self.one_wg_p,
            Kernel::Cooperative => &self.cooperative_p,
            Kernel::GlobalHistogram => &self.histogram_p,
            Kernel::ScanHistogram => &self.scan_p,
            Kernel::OnesweepSweep => &self.sweep_p,
            Kernel::SyncCheck => &self.sync_check_p,
        }
    }

    /// Records one dispatch of `groups` work-groups using the parameters in `slot`.
    pub(crate) fn record(
        &self,
        kernel: Kernel,
        buffers: &SortBuffers,
        slot: usize,
        groups: u32,
        encoder: &mut wgpu::CommandEncoder,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("radix sort pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(self.pipeline(kernel));
        pass.set_bind_group(0, &buffers.bind_group, &[buffers.params_offset(slot)]);
        pass.dispatch_workgroups(groups, 1, 1);
    }
}

/// Launch shape a sorter computed for one call.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    /// number of keys on the device, a multiple of the tile size; the tail is padding
    pub len: usize,
    pub stages: u32,
    pub work_group_size: u32,
    /// u32 words of internal memory
    pub internal_words: usize,
    /// uniform parameters, one slot per distinct dispatch
    pub params: Vec<Params>,
}

/// Device buffers of one sort. Everything a sort touches on the device is allocated here,
/// before the first dispatch is recorded.
pub(crate) struct SortBuffers {
    params: wgpu::Buffer,
    params_stride: u64,
    pub keys_a: wgpu::Buffer,
    pub keys_b: wgpu::Buffer,
    pub vals_a: wgpu::Buffer,
    pub vals_b: wgpu::Buffer,
    pub internal: wgpu::Buffer,
    pub status: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl SortBuffers {
    /// Uploads the encoded keys (`plan.len` keys of `key_words` words each) and payload
    /// indices 0..len.
    pub(crate) async fn new(
        device: &Device,
        kernels: &Kernels,
        plan: &Plan,
        key_words: &[u32],
    ) -> anyhow::Result<Self> {
        let key_bytes = (key_words.len() * size_of::<u32>()) as u64;
        let val_bytes = (plan.len * size_of::<u32>()) as u64;
        let internal_bytes = (plan.internal_words.max(1) * size_of::<u32>()) as u64;
        for bytes in [key_bytes, val_bytes, internal_bytes] {
            device.check_size(bytes)?;
        }

        let params_stride = PARAMS_SIZE.max(device.min_uniform_offset_alignment());
        let mut params_bytes = vec![0u8; params_stride as usize * plan.params.len().max(1)];
        for (slot, params) in params_bytes
            .chunks_mut(params_stride as usize)
            .zip(&plan.params)
        {
            slot[..PARAMS_SIZE as usize].copy_from_slice(bytemuck::bytes_of(params));
        }
        let indices: Vec<u32> = (0..plan.len as u32).into_par_iter().collect();

        let wgpu_device = device.wgpu_device();
        let usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        let empty = |label: &str, size: u64| {
            wgpu_device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        };

        wgpu_device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let params = wgpu_device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("radix sort params"),
            contents: &params_bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let keys_a = wgpu_device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("radix sort keys a"),
            contents: bytemuck::cast_slice(key_words),
            usage,
        });
        let keys_b = empty("radix sort keys b", key_bytes);
        let vals_a = wgpu_device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("radix sort values a"),
            contents: bytemuck::cast_slice(&indices),
            usage,
        });
        let vals_b = empty("radix sort values b", val_bytes);
        // new buffers are zeroed, which is the initial state of every counter
        let internal = empty("radix sort internal memory", internal_bytes);
        let status = empty(
            "radix sort status",
            (STATUS_WORDS * size_of::<u32>()) as u64,
        );
        if let Some(err) = wgpu_device.pop_error_scope().await {
            log::warn!("device allocation failed: {err}");
            return Err(SortError::OutOfMemory {
                bytes: 2 * key_bytes + 2 * val_bytes + internal_bytes,
            }
            .into());
        }

        let bind_group = wgpu_device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("radix sort bind group"),
            layout: &kernels.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &params,
                        offset: 0,
                        size: wgpu::BufferSize::new(PARAMS_SIZE),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: keys_a.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: keys_b.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: vals_a.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: vals_b.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: internal.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: status.as_entire_binding(),
                },
            ],
        });

        return Ok(Self {
            params,
            params_stride,
            keys_a,
            keys_b,
            vals_a,
            vals_b,
            internal,
            status,
            bind_group,
        });
    }

    fn params_offset(&self, slot: usize) -> u32 {
        (slot as u64 * self.params_stride) as u32
    }

    /// payload buffer holding the result after `stages` ping-pong passes
    pub(crate) fn result_values(&self, stages: u32) -> &wgpu::Buffer {
        if stages % 2 == 0 {
            &self.vals_a
        } else {
            &self.vals_b
        }
    }

    #[cfg(test)]
    pub(crate) fn result_keys(&self, stages: u32) -> &wgpu::Buffer {
        if stages % 2 == 0 {
            &self.keys_a
        } else {
            &self.keys_b
        }
    }

    pub(crate) fn destroy(&self) {
        for buffer in [
            &self.params,
            &self.keys_a,
            &self.keys_b,
            &self.vals_a,
            &self.vals_b,
            &self.internal,
            &self.status,
        ] {
            buffer.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_match_the_uniform_layout() {
        assert_eq!(PARAMS_SIZE, 48);
        assert_eq!(PARAMS_SIZE % 16, 0);
        let params = Params::default();
        assert_eq!(params.delay_group, u32::MAX);
        assert_eq!(params.delay, 0);
        assert_eq!(params.abort_on_timeout, 0);
    }
}
