//! wgpu compute backend.
//!
//! The grid stays authoritative on the host. Each step uploads the
//! current buffer, dispatches one invocation per cell, and reads the next
//! buffer plus an atomic population counter back into the grid before
//! committing, so the host view is always a complete generation.

use std::time::Instant;

use super::GpuError;
use crate::compute::{Cell, Dimensions, EngineCore, Grid, SimulationBackend, StepReport};
use crate::error::EngineError;
use crate::schema::{BackendKind, EngineContext};

const STEP_SHADER: &str = include_str!("shaders/step.wgsl");

/// Invocations per workgroup along each axis.
const WORKGROUP_SIZE: u32 = 4;

/// Uniform buffer struct for the step shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct StepParams {
    width: u32,
    height: u32,
    depth: u32,
    boundary: u32,
    birth_min: u32,
    birth_max: u32,
    survival_min: u32,
    survival_max: u32,
    max_age: u32,
    energy_decay: u32,
    birth_energy: u32,
    _pad: u32,
}

impl StepParams {
    fn from_grid(grid: &Grid) -> Self {
        let dims = grid.dimensions();
        let rule = grid.rule();
        let params = grid.params();
        Self {
            width: dims.width,
            height: dims.height,
            depth: dims.depth,
            boundary: grid.boundary().id(),
            birth_min: rule.birth.min as u32,
            birth_max: rule.birth.max as u32,
            survival_min: rule.survival.min as u32,
            survival_max: rule.survival.max as u32,
            max_age: params.max_age as u32,
            energy_decay: params.energy_decay as u32,
            birth_energy: params.birth_energy as u32,
            _pad: 0,
        }
    }
}

/// Device buffers sized for one set of dimensions.
struct StepBuffers {
    dims: Dimensions,
    params: wgpu::Buffer,
    current: wgpu::Buffer,
    next: wgpu::Buffer,
    population: wgpu::Buffer,
    staging: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    /// Byte length of one cell buffer.
    cell_bytes: u64,
}

/// GPU-accelerated simulation backend.
pub struct GpuBackend {
    core: EngineCore,
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    buffers: Option<StepBuffers>,
    max_cells: u64,
    max_workgroups: u32,
}

impl GpuBackend {
    /// Acquire a device and build the step pipeline.
    ///
    /// Grid buffers are created on the first step after initialization.
    pub async fn new(ctx: EngineContext) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!(
            target: ctx.log_target.as_str(),
            "Using GPU adapter {} ({:?})",
            info.name,
            info.backend
        );

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Voxel Life GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Step Shader"),
            source: wgpu::ShaderSource::Wgsl(STEP_SHADER.into()),
        });

        let bind_group_layout = create_step_bind_group_layout(&device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Step Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            ..Default::default()
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Step Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let limits = device.limits();
        let max_bytes = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        let max_cells = (max_bytes / std::mem::size_of::<Cell>() as u64).min(u32::MAX as u64);

        Ok(Self {
            core: EngineCore::new(ctx),
            device,
            queue,
            pipeline,
            bind_group_layout,
            buffers: None,
            max_cells,
            max_workgroups: limits.max_compute_workgroups_per_dimension,
        })
    }

    /// (Re)create device buffers when the grid dimensions changed.
    fn ensure_buffers(&mut self, dims: Dimensions) -> Result<(), GpuError> {
        if self.buffers.as_ref().is_some_and(|b| b.dims == dims) {
            return Ok(());
        }

        let cells = dims.total_cells() as u64;
        let groups_fit = [dims.width, dims.height, dims.depth]
            .iter()
            .all(|&extent| extent.div_ceil(WORKGROUP_SIZE) <= self.max_workgroups);
        if cells > self.max_cells || !groups_fit {
            return Err(GpuError::GridTooLarge {
                cells,
                limit: self.max_cells,
            });
        }

        let cell_bytes = cells * std::mem::size_of::<Cell>() as u64;
        let params = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Step Params"),
            size: std::mem::size_of::<StepParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let current = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Current Cells"),
            size: cell_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let next = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Next Cells"),
            size: cell_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let population = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Population Counter"),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        // Next cells followed by the population counter.
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Step Staging"),
            size: cell_bytes + std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Step Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: current.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: next.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: population.as_entire_binding(),
                },
            ],
        });

        log::debug!(
            target: self.core.log_target(),
            "Allocated GPU buffers for {} ({} bytes per buffer)",
            dims,
            cell_bytes
        );

        self.buffers = Some(StepBuffers {
            dims,
            params,
            current,
            next,
            population,
            staging,
            bind_group,
            cell_bytes,
        });
        Ok(())
    }
}

/// Block until the staging buffer is readable, then copy it out.
///
/// Returns the population counter written by the shader.
fn read_back(
    device: &wgpu::Device,
    buffers: &StepBuffers,
    next: &mut [Cell],
) -> Result<u64, GpuError> {
    let buffer_slice = buffers.staging.slice(..);

    let (tx, rx) = std::sync::mpsc::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    device.poll(wgpu::PollType::wait_indefinitely())?;
    rx.recv().map_err(|_| GpuError::ReadbackLost)??;

    let population = {
        let data = buffer_slice.get_mapped_range();
        let split = buffers.cell_bytes as usize;
        next.copy_from_slice(bytemuck::cast_slice(&data[..split]));
        bytemuck::pod_read_unaligned::<u32>(&data[split..split + 4]) as u64
    };

    buffers.staging.unmap();
    Ok(population)
}

impl SimulationBackend for GpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn core(&self) -> &EngineCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EngineCore {
        &mut self.core
    }

    fn step(&mut self) -> Result<StepReport, EngineError> {
        let dims = self.core.require_grid()?.dimensions();
        self.ensure_buffers(dims)?;
        let buffers = self.buffers.as_ref().ok_or(EngineError::NotInitialized)?;
        let grid = self.core.grid.as_mut().ok_or(EngineError::NotInitialized)?;

        let start = Instant::now();
        let params = StepParams::from_grid(grid);
        self.queue
            .write_buffer(&buffers.params, 0, bytemuck::bytes_of(&params));
        self.queue
            .write_buffer(&buffers.current, 0, bytemuck::cast_slice(grid.current()));
        self.queue
            .write_buffer(&buffers.population, 0, bytemuck::bytes_of(&0u32));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Step Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Step Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &buffers.bind_group, &[]);
            pass.dispatch_workgroups(
                dims.width.div_ceil(WORKGROUP_SIZE),
                dims.height.div_ceil(WORKGROUP_SIZE),
                dims.depth.div_ceil(WORKGROUP_SIZE),
            );
        }
        encoder.copy_buffer_to_buffer(&buffers.next, 0, &buffers.staging, 0, buffers.cell_bytes);
        encoder.copy_buffer_to_buffer(
            &buffers.population,
            0,
            &buffers.staging,
            buffers.cell_bytes,
            std::mem::size_of::<u32>() as u64,
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let (_, next) = grid.step_buffers();
        let alive = match read_back(&self.device, buffers, next) {
            Ok(alive) => alive,
            Err(e) => {
                log::error!(target: self.core.log_target(), "GPU step aborted: {e}");
                return Err(e.into());
            }
        };
        let elapsed = start.elapsed();
        grid.commit_step(alive);

        let report = StepReport {
            cells: grid.total_cells(),
            alive,
            generation: grid.generation(),
            elapsed,
            workers: 1,
        };
        self.core.record(&report);
        Ok(report)
    }
}

fn create_step_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Step Bind Group Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            storage(1, true),
            storage(2, false),
            storage(3, false),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::CpuBackend;
    use crate::schema::{BoundaryKind, RulePreset};

    fn gpu_or_skip() -> Option<GpuBackend> {
        match pollster::block_on(GpuBackend::new(EngineContext::default())) {
            Ok(backend) => Some(backend),
            Err(GpuError::NoAdapter) => {
                eprintln!("Skipping GPU test: no adapter available");
                None
            }
            Err(e) => panic!("Failed to create GPU backend: {e}"),
        }
    }

    #[test]
    fn test_step_params_layout() {
        assert_eq!(std::mem::size_of::<StepParams>(), 48);
    }

    #[test]
    fn test_gpu_step_requires_initialize() {
        let Some(mut gpu) = gpu_or_skip() else {
            return;
        };
        assert!(matches!(gpu.step(), Err(EngineError::NotInitialized)));
    }

    #[test]
    fn test_gpu_single_center_mirror() {
        let Some(mut gpu) = gpu_or_skip() else {
            return;
        };
        gpu.set_rule_set(RulePreset::R2333.rule()).unwrap();
        gpu.set_boundary_kind(BoundaryKind::Mirror);
        gpu.initialize(Dimensions::new(3, 3, 3)).unwrap();
        gpu.set_cell(1, 1, 1, true).unwrap();
        let report = gpu.step().unwrap();
        assert_eq!(report.alive, 12);
        assert_eq!(gpu.grid().unwrap().population(), 12);
        assert!(gpu.get_cell(0, 1, 1).unwrap());
        assert!(!gpu.get_cell(2, 1, 1).unwrap());
    }

    #[test]
    fn test_gpu_matches_cpu_bit_for_bit() {
        let Some(mut gpu) = gpu_or_skip() else {
            return;
        };
        let mut cpu = CpuBackend::new(EngineContext::default().with_workers(3)).unwrap();

        for boundary in BoundaryKind::ALL {
            for backend in [&mut cpu as &mut dyn SimulationBackend, &mut gpu] {
                backend.set_rule_set(RulePreset::R4555.rule()).unwrap();
                backend.set_boundary_kind(boundary);
                backend.initialize(Dimensions::new(11, 9, 6)).unwrap();
                backend.randomize(0.3, 17).unwrap();
            }

            for _ in 0..4 {
                let a = cpu.step().unwrap();
                let b = gpu.step().unwrap();
                assert_eq!(a.alive, b.alive, "{boundary}");
                assert_eq!(
                    cpu.grid().unwrap().current(),
                    gpu.grid().unwrap().current(),
                    "{boundary}"
                );
            }
        }
    }

    #[test]
    fn test_gpu_toroidal_wrap_on_odd_extents() {
        let Some(mut gpu) = gpu_or_skip() else {
            return;
        };
        for (w, h, d) in [(11, 9, 6), (5, 5, 6), (4, 4, 3)] {
            gpu.set_rule_set(RulePreset::R4555.rule()).unwrap();
            gpu.set_boundary_kind(BoundaryKind::Toroidal);
            gpu.initialize(Dimensions::new(w, h, d)).unwrap();
            gpu.set_cell(w - 1, h - 1, d - 1, true).unwrap();
            gpu.step().unwrap();

            let grid = gpu.grid().unwrap();
            assert_eq!(grid.cell(0, 0, 0).unwrap().neighbors(), 1, "{w}x{h}x{d}");
            assert_eq!(grid.cell(w - 2, h - 2, d - 2).unwrap().neighbors(), 1);
            assert_eq!(grid.cell(1, 1, 1).unwrap().neighbors(), 0);
        }
    }

    #[test]
    fn test_poll_failure_is_reported() {
        let err = EngineError::from(GpuError::from(wgpu::PollError::Timeout));
        assert!(matches!(err, EngineError::Gpu(GpuError::Poll(_))));
    }

    #[test]
    fn test_gpu_buffers_follow_resize() {
        let Some(mut gpu) = gpu_or_skip() else {
            return;
        };
        gpu.initialize(Dimensions::new(4, 4, 4)).unwrap();
        gpu.randomize(0.5, 3).unwrap();
        gpu.step().unwrap();
        gpu.resize(Dimensions::new(6, 5, 3)).unwrap();
        gpu.step().unwrap();
        assert_eq!(gpu.grid().unwrap().total_cells(), 90);
        assert_eq!(gpu.grid().unwrap().generation(), 2);
    }
}
