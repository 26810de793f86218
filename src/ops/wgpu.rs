//! GPU texture programs using WGPU.
//!
//! This module implements [`TextureDevice`] on top of WGPU + WGSL. Tensors
//! live in single-channel 2D textures (`r32float` for activations,
//! `r32sint` for index maps) and every operator is a compute program writing
//! one storage texture:
//!
//! - `gather`: output texel `p` reads input element `map[p]`
//! - `prelu`: elementwise parametric ReLU over two equally laid out textures
//!
//! Programs are compiled once per [`WgpuDevice`]. A process-wide device is
//! created lazily through `lazy_static` the first time [`shared_device`] is
//! asked for one.

use std::sync::{Arc, mpsc};

use thiserror::Error;
use wgpu::util::DeviceExt;

use crate::error::{Error as CrateError, GpuFailure, Result};
use crate::ops::texture::{
    DeviceTexture, TexelFormat, Texels, TextureDevice, TextureLayout, expect_format,
};

const GATHER: &str = include_str!("shaders/gather.wgsl");
const PRELU: &str = include_str!("shaders/prelu.wgsl");

const WORKGROUP_SIDE: u32 = 16;

/// Basic wrapper for common GPU errors.
#[derive(Debug, Error)]
pub enum GpuError {
    /// An error in requesting the adapter.
    #[error("adapter error: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    /// An error in requesting the GPU (device).
    #[error("device error: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    /// An error while waiting for submitted work.
    #[error("poll error: {0}")]
    Poll(#[from] wgpu::PollError),
    /// An error mapping a staging buffer for readback.
    #[error("map error: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
}

impl From<GpuError> for GpuFailure {
    fn from(err: GpuError) -> Self {
        match err {
            GpuError::Adapter(e) => GpuFailure::Adapter(e.to_string()),
            GpuError::Device(e) => GpuFailure::Device(e.to_string()),
            GpuError::Poll(e) => GpuFailure::Poll(e.to_string()),
            GpuError::Map(e) => GpuFailure::Map(e.to_string()),
        }
    }
}

impl From<GpuError> for CrateError {
    fn from(err: GpuError) -> Self {
        CrateError::Gpu(err.into())
    }
}

/// Holds the WGPU device and queue used for executing compute pipelines.
pub struct GpuContext {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// A queue for information related to the device.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Initializes a new GPU context, selecting the default adapter and creating a device + queue.
    ///
    /// # Returns
    /// - `Ok(GpuContext)` if the GPU is successfully initialized
    /// - `Err(GpuError)` if adapter or device acquisition fails
    ///
    /// # Internals
    /// - Uses `pollster::block_on` to synchronously wait for async WGPU calls
    /// - Selects the default adapter with default options
    /// - Enables default limits and features for broad compatibility
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))?;

        Ok(Self { device, queue })
    }
}

/// Compiles a labeled WGSL module.
pub fn load_shader(device: &wgpu::Device, label: &str, source: &str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

/// A compiled compute program: one uniform block, two sampled textures and
/// one storage texture target.
struct Program {
    label: &'static str,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl Program {
    fn new(
        device: &wgpu::Device,
        label: &'static str,
        source: &str,
        inputs: [wgpu::TextureSampleType; 2],
    ) -> Self {
        let module = load_shader(device, label, source);

        let sampled = |binding: u32, sample_type| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
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
                sampled(1, inputs[0]),
                sampled(2, inputs[1]),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::R32Float,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self { label, layout, pipeline }
    }
}

/// A 2D texture owned by a [`WgpuDevice`].
pub struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    layout: TextureLayout,
    format: TexelFormat,
}

impl DeviceTexture for WgpuTexture {
    fn layout(&self) -> TextureLayout {
        self.layout
    }

    fn format(&self) -> TexelFormat {
        self.format
    }
}

impl WgpuTexture {
    fn extent(&self) -> wgpu::Extent3d {
        extent(self.layout)
    }
}

fn extent(layout: TextureLayout) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: layout.width as u32,
        height: layout.height as u32,
        depth_or_array_layers: 1,
    }
}

/// [`TextureDevice`] backed by a WGPU device and queue.
pub struct WgpuDevice {
    context: GpuContext,
    gather: Program,
    prelu: Program,
    max_side: usize,
}

impl WgpuDevice {
    /// Acquires the default adapter and compiles every program.
    pub fn new() -> Result<Self> {
        Ok(Self::with_context(GpuContext::new()?))
    }

    /// Compiles every program on an existing context.
    pub fn with_context(context: GpuContext) -> Self {
        let device = &context.device;
        let float = wgpu::TextureSampleType::Float { filterable: false };
        let gather = Program::new(device, "gather", GATHER, [float, wgpu::TextureSampleType::Sint]);
        let prelu = Program::new(device, "prelu", PRELU, [float, float]);
        let max_side = device.limits().max_texture_dimension_2d as usize;
        Self { context, gather, prelu, max_side }
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    fn create_texture(&self, layout: TextureLayout, format: TexelFormat) -> Result<WgpuTexture> {
        if layout.width > self.max_side || layout.height > self.max_side {
            return Err(CrateError::TextureTooLarge { len: layout.len, limit: self.max_side });
        }
        let (texel_format, usage) = match format {
            TexelFormat::Float => (
                wgpu::TextureFormat::R32Float,
                wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
            ),
            TexelFormat::Int => (
                wgpu::TextureFormat::R32Sint,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            ),
        };
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: None,
            size: extent(layout),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texel_format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(WgpuTexture { texture, view, layout, format })
    }

    /// Encodes and submits one pass of `program`, blocking until it completes.
    fn dispatch(
        &self,
        program: &Program,
        params: [u32; 4],
        inputs: [&WgpuTexture; 2],
        output: &WgpuTexture,
    ) -> Result<()> {
        let device = &self.context.device;

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("params"),
            contents: bytemuck::cast_slice(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.label),
            layout: &program.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params_buffer.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&inputs[0].view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&inputs[1].view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&output.view),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(program.label),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(program.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                (output.layout.width as u32).div_ceil(WORKGROUP_SIDE),
                (output.layout.height as u32).div_ceil(WORKGROUP_SIDE),
                1,
            );
        }
        self.context.queue.submit(Some(encoder.finish()));
        device.poll(wgpu::PollType::Wait).map_err(GpuError::from)?;
        tracing::debug!(program = program.label, width = output.layout.width, height = output.layout.height, "pass complete");
        Ok(())
    }
}

impl TextureDevice for WgpuDevice {
    type Texture = WgpuTexture;

    fn max_texture_side(&self) -> usize {
        self.max_side
    }

    fn upload(&self, layout: TextureLayout, texels: Texels<'_>) -> Result<WgpuTexture> {
        if texels.len() != layout.len {
            return Err(CrateError::ElementCount { shape: vec![layout.len], len: texels.len() });
        }
        let texture = self.create_texture(layout, texels.format())?;

        let mut padded = vec![0u32; layout.texels()];
        match texels {
            Texels::Float(values) => {
                padded[..values.len()].copy_from_slice(bytemuck::cast_slice(values));
            }
            Texels::Int(values) => {
                padded[..values.len()].copy_from_slice(bytemuck::cast_slice(values));
            }
        }

        self.context.queue.write_texture(
            texture.texture.as_image_copy(),
            bytemuck::cast_slice(&padded),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(layout.width as u32 * 4),
                rows_per_image: Some(layout.height as u32),
            },
            texture.extent(),
        );
        Ok(texture)
    }

    fn allocate(&self, layout: TextureLayout) -> Result<WgpuTexture> {
        self.create_texture(layout, TexelFormat::Float)
    }

    fn download(&self, texture: &WgpuTexture) -> Result<Vec<f32>> {
        expect_format(texture, TexelFormat::Float)?;
        let device = &self.context.device;
        let layout = texture.layout;

        let row_bytes = layout.width as u32 * 4;
        let padded_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size: padded_row as u64 * layout.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback"),
        });
        encoder.copy_texture_to_buffer(
            texture.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(layout.height as u32),
                },
            },
            texture.extent(),
        );
        self.context.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::PollType::Wait).map_err(GpuError::from)?;
        match receiver.recv() {
            Ok(result) => result.map_err(GpuError::from)?,
            Err(_) => return Err(GpuFailure::Map("readback callback dropped".into()).into()),
        }

        let mut out = Vec::with_capacity(layout.texels());
        {
            let bytes = slice.get_mapped_range();
            for row in bytes.chunks_exact(padded_row as usize) {
                out.extend(
                    row[..row_bytes as usize]
                        .chunks_exact(4)
                        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
                );
            }
        }
        staging.unmap();
        out.truncate(layout.len);
        Ok(out)
    }

    fn gather(
        &self,
        input: &WgpuTexture,
        index_map: &WgpuTexture,
        output: &mut WgpuTexture,
    ) -> Result<()> {
        expect_format(input, TexelFormat::Float)?;
        expect_format(index_map, TexelFormat::Int)?;
        expect_format(output, TexelFormat::Float)?;
        let params = [
            output.layout.width as u32,
            output.layout.len as u32,
            input.layout.width as u32,
            0,
        ];
        self.dispatch(&self.gather, params, [input, index_map], output)
    }

    fn prelu(&self, x: &WgpuTexture, alpha: &WgpuTexture, output: &mut WgpuTexture) -> Result<()> {
        for t in [x, alpha] {
            expect_format(t, TexelFormat::Float)?;
            if t.layout != output.layout {
                return Err(CrateError::ShapeMismatch {
                    expected: vec![output.layout.height, output.layout.width],
                    found: vec![t.layout.height, t.layout.width],
                });
            }
        }
        let params = [output.layout.width as u32, output.layout.len as u32, 0, 0];
        self.dispatch(&self.prelu, params, [x, alpha], output)
    }
}

lazy_static::lazy_static! {
    static ref SHARED_DEVICE: Option<Arc<WgpuDevice>> = match WgpuDevice::new() {
        Ok(device) => Some(Arc::new(device)),
        Err(err) => {
            tracing::warn!(%err, "no wgpu device available");
            None
        }
    };
}

/// The process-wide device, created on first use.
///
/// Returns `None` when no adapter can be acquired.
pub fn shared_device() -> Option<Arc<WgpuDevice>> {
    SHARED_DEVICE.clone()
}
