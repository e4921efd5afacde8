// ============================================================================
// COMPUTE DISPATCHER - named kernel invocations on one ordered queue
// ============================================================================
//
// Every `apply_kernel` encodes one compute pass and submits it immediately;
// the host never waits.  Kernels run in submission order, which is the only
// ordering the field pipeline relies on.  `join` is the single blocking
// point.

use wgpu::util::DeviceExt;

use super::context::GpuContext;
use super::program::{KernelSources, ProgramRegistry};
use super::sync_array::{Access, KernelArg, Shape};
use super::types::Domain;
use crate::error::{ComputeError, ComputeResult};

/// Matches `@workgroup_size(16, 16, 1)` in the kernel template.
pub const WORKGROUP_DIM: u32 = 16;

pub struct Dispatcher {
    ctx: GpuContext,
    registry: ProgramRegistry,
    outstanding: bool,
    submitted: u64,
}

impl Dispatcher {
    /// Compile the template with `user_fn` and get ready to dispatch.  A
    /// failure here means there is no program at all, so it is fatal.
    pub fn new(ctx: &GpuContext, sources: KernelSources, user_fn: &str) -> ComputeResult<Self> {
        let mut registry = ProgramRegistry::new(sources);
        registry.compile(&ctx.device, user_fn)?;
        Ok(Self {
            ctx: ctx.clone(),
            registry,
            outstanding: false,
            submitted: 0,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn registry(&self) -> &ProgramRegistry {
        &self.registry
    }

    /// True when nothing has been submitted since the last `join`.
    pub fn is_idle(&self) -> bool {
        !self.outstanding
    }

    /// Kernels submitted over the dispatcher's lifetime.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Enqueue `name` with `args` bound positionally (ascending binding
    /// order).  The execution domain is the first writable grid argument,
    /// else the first grid argument.
    pub fn apply_kernel(&mut self, name: &str, args: &[&dyn KernelArg]) -> ComputeResult<()> {
        let program = self.registry.active().ok_or(ComputeError::NoProgram)?;
        let entry = program
            .entry(name)
            .ok_or_else(|| ComputeError::UnknownKernel(name.to_string()))?;

        if entry.args.len() != args.len() {
            return Err(ComputeError::ArgumentCount {
                kernel: name.to_string(),
                expected: entry.args.len(),
                got: args.len(),
            });
        }
        for (index, (slot, arg)) in entry.args.iter().zip(args).enumerate() {
            if slot.writable && arg.access() == Access::ReadOnly {
                return Err(ComputeError::ReadOnlyOutput {
                    kernel: name.to_string(),
                    index,
                    label: arg.label().to_string(),
                });
            }
        }

        let domain_shape = entry
            .args
            .iter()
            .zip(args)
            .find(|(slot, arg)| slot.writable && arg.shape().is_grid())
            .map(|(_, arg)| arg.shape())
            .or_else(|| args.iter().map(|a| a.shape()).find(Shape::is_grid))
            .unwrap_or(Shape::Scalar);
        let (rows, cols) = domain_shape.dims();

        let device = &self.ctx.device;
        let queue = &self.ctx.queue;

        for arg in args {
            arg.flush(queue);
        }

        let domain = Domain {
            rows: rows as u32,
            cols: cols as u32,
            ..Default::default()
        };
        let domain_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dispatch_domain"),
            contents: bytemuck::bytes_of(&domain),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let arg_entries: Vec<wgpu::BindGroupEntry> = entry
            .args
            .iter()
            .zip(args)
            .map(|(slot, arg)| wgpu::BindGroupEntry {
                binding: slot.binding,
                resource: arg.buffer().as_entire_binding(),
            })
            .collect();
        let arg_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(name),
            layout: &entry.arg_layout,
            entries: &arg_entries,
        });
        let domain_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("dispatch_domain_bg"),
            layout: &entry.domain_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: domain_buf.as_entire_binding(),
            }],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("dispatch_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(name),
                timestamp_writes: None,
            });
            pass.set_pipeline(&entry.pipeline);
            pass.set_bind_group(0, &arg_bg, &[]);
            pass.set_bind_group(1, &domain_bg, &[]);
            pass.dispatch_workgroups(
                (cols as u32).div_ceil(WORKGROUP_DIM),
                (rows as u32).div_ceil(WORKGROUP_DIM),
                1,
            );
        }
        self.ctx.submit_one(encoder);

        self.outstanding = true;
        self.submitted += 1;
        tracing::trace!(kernel = name, rows, cols, "kernel submitted");
        Ok(())
    }

    /// Block until every submitted kernel has completed.
    pub fn join(&mut self) {
        if self.outstanding {
            self.ctx.wait_idle();
            self.outstanding = false;
        }
    }

    /// Swap in a freshly compiled program.  Only allowed while the queue is
    /// idle; on failure the current program stays active.
    pub fn recompile(&mut self, user_fn: &str) -> ComputeResult<()> {
        if self.outstanding {
            return Err(ComputeError::QueueBusy);
        }
        self.registry.compile(&self.ctx.device, user_fn)
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.registry.diagnostic()
    }

    pub fn program_generation(&self) -> u64 {
        self.registry.active().map_or(0, |p| p.generation())
    }
}
