// ============================================================================
// KERNEL PROGRAM REGISTRY - template splicing, compilation, reflection
// ============================================================================
//
// A program is the compiled template with the user's recurrence spliced in,
// plus one compute pipeline per required entry point.  Recompiling builds a
// complete new program first and only then swaps it in, so a failed edit
// leaves the last good program dispatchable.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::shaders;
use crate::error::{ComputeError, ComputeResult};

/// Entry points every compiled program must expose.
pub const KERNEL_NAMES: &[&str] = &[
    "escape_iter",
    "min_prox",
    "orbit_trap_re",
    "orbit_trap_im",
    "apply_log",
    "map_sines",
    "map_img",
    "pack",
    "pack_norm",
    "field_range",
];

/// Bind group holding positional kernel arguments.
pub const ARG_GROUP: u32 = 0;
/// Bind group holding the execution-domain uniform.
pub const DOMAIN_GROUP: u32 = 1;

// ============================================================================
// TEMPLATE SOURCES
// ============================================================================

/// The three template sources, concatenated structs → utils → kernels.
#[derive(Clone, Debug)]
pub struct KernelSources {
    pub structs: String,
    pub utils: String,
    pub kernels: String,
}

impl KernelSources {
    pub fn builtin() -> Self {
        Self {
            structs: shaders::STRUCTS_WGSL.to_string(),
            utils: shaders::UTILS_WGSL.to_string(),
            kernels: shaders::KERNELS_WGSL.to_string(),
        }
    }

    /// Resolve each template file against `search_path`: the first directory
    /// containing the file wins, otherwise the built-in copy is used.
    pub fn resolve(search_path: &[PathBuf]) -> ComputeResult<Self> {
        let builtin = Self::builtin();
        Ok(Self {
            structs: lookup(search_path, shaders::STRUCTS_FILE)?.unwrap_or(builtin.structs),
            utils: lookup(search_path, shaders::UTILS_FILE)?.unwrap_or(builtin.utils),
            kernels: lookup(search_path, shaders::KERNELS_FILE)?.unwrap_or(builtin.kernels),
        })
    }

    /// Byte range of the recurrence region, markers included.
    fn region(&self) -> ComputeResult<(usize, usize)> {
        let begin = self
            .kernels
            .find(shaders::RECURRENCE_BEGIN)
            .ok_or(ComputeError::Template(shaders::RECURRENCE_BEGIN))?;
        let end = self.kernels[begin..]
            .find(shaders::RECURRENCE_END)
            .map(|off| begin + off + shaders::RECURRENCE_END.len())
            .ok_or(ComputeError::Template(shaders::RECURRENCE_END))?;
        Ok((begin, end))
    }

    /// The template's own recurrence, without its markers.
    pub fn default_region(&self) -> ComputeResult<&str> {
        let (begin, end) = self.region()?;
        let inner = &self.kernels
            [begin + shaders::RECURRENCE_BEGIN.len()..end - shaders::RECURRENCE_END.len()];
        Ok(inner.trim())
    }

    /// Combined source with `user_fn` replacing the recurrence region
    /// (markers included).  A blank `user_fn` keeps the template's default.
    pub fn splice(&self, user_fn: &str) -> ComputeResult<String> {
        let (begin, end) = self.region()?;
        let kernels = if user_fn.trim().is_empty() {
            self.kernels.clone()
        } else {
            format!(
                "{}{}{}",
                &self.kernels[..begin],
                user_fn,
                &self.kernels[end..]
            )
        };
        Ok(format!("{}\n{}\n{}", self.structs, self.utils, kernels))
    }
}

impl Default for KernelSources {
    fn default() -> Self {
        Self::builtin()
    }
}

fn lookup(search_path: &[PathBuf], file: &str) -> ComputeResult<Option<String>> {
    for dir in search_path {
        let candidate = dir.join(file);
        if candidate.is_file() {
            tracing::info!(path = %candidate.display(), "using kernel source override");
            return Ok(Some(std::fs::read_to_string(&candidate)?));
        }
    }
    Ok(None)
}

// ============================================================================
// REFLECTION
// ============================================================================

/// One positional argument of a kernel, in binding order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgSlot {
    pub binding: u32,
    pub name: String,
    pub writable: bool,
}

/// Parse and validate `source`, then list each compute entry point's
/// statically used group-0 bindings.  Errors carry naga's rendered
/// diagnostic against the combined source.
pub fn reflect(source: &str) -> ComputeResult<HashMap<String, Vec<ArgSlot>>> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| ComputeError::Compile(e.emit_to_string(source)))?;
    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    )
    .validate(&module)
    .map_err(|e| ComputeError::Compile(e.emit_to_string(source)))?;

    let mut out = HashMap::new();
    for (index, ep) in module.entry_points.iter().enumerate() {
        if ep.stage != naga::ShaderStage::Compute {
            continue;
        }
        let uses = info.get_entry_point(index);
        let mut slots: Vec<ArgSlot> = module
            .global_variables
            .iter()
            .filter(|(handle, _)| !uses[*handle].is_empty())
            .filter_map(|(_, var)| {
                let binding = var.binding.as_ref()?;
                if binding.group != ARG_GROUP {
                    return None;
                }
                let writable = matches!(
                    var.space,
                    naga::AddressSpace::Storage { access }
                        if access.contains(naga::StorageAccess::STORE)
                );
                Some(ArgSlot {
                    binding: binding.binding,
                    name: var.name.clone().unwrap_or_default(),
                    writable,
                })
            })
            .collect();
        slots.sort_by_key(|s| s.binding);
        out.insert(ep.name.clone(), slots);
    }
    Ok(out)
}

/// Every required kernel must bind exactly the arguments the template gives
/// it.  A recurrence that reads a kernel global drags that binding into
/// every kernel calling `f`, which the pipeline would then fail to bind.
pub fn check_signatures(
    expected: &HashMap<String, Vec<ArgSlot>>,
    found: &HashMap<String, Vec<ArgSlot>>,
) -> ComputeResult<()> {
    for name in KERNEL_NAMES {
        let Some(got) = found.get(*name) else {
            return Err(ComputeError::Compile(format!(
                "required kernel entry point `{name}` is missing"
            )));
        };
        let want = expected.get(*name).map(Vec::as_slice).unwrap_or_default();
        if got.as_slice() == want {
            continue;
        }
        let extra: Vec<&str> = got
            .iter()
            .filter(|slot| !want.contains(slot))
            .map(|slot| slot.name.as_str())
            .collect();
        let missing: Vec<&str> = want
            .iter()
            .filter(|slot| !got.contains(slot))
            .map(|slot| slot.name.as_str())
            .collect();
        return Err(ComputeError::Compile(format!(
            "kernel `{name}` would bind [{}] instead of [{}] (extra: [{}], missing: [{}]); \
             the recurrence may only use its arguments and the utility functions",
            slot_names(got),
            slot_names(want),
            extra.join(", "),
            missing.join(", ")
        )));
    }
    Ok(())
}

fn slot_names(slots: &[ArgSlot]) -> String {
    slots
        .iter()
        .map(|slot| slot.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// COMPILED PROGRAM
// ============================================================================

pub struct KernelEntry {
    pub pipeline: wgpu::ComputePipeline,
    pub arg_layout: wgpu::BindGroupLayout,
    pub domain_layout: wgpu::BindGroupLayout,
    pub args: Vec<ArgSlot>,
}

pub struct KernelProgram {
    entries: HashMap<String, KernelEntry>,
    source: String,
    generation: u64,
}

impl KernelProgram {
    pub fn entry(&self, name: &str) -> Option<&KernelEntry> {
        self.entries.get(name)
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn build(
        device: &wgpu::Device,
        source: String,
        expected: &HashMap<String, Vec<ArgSlot>>,
        generation: u64,
    ) -> ComputeResult<Self> {
        let reflected = reflect(&source)?;
        check_signatures(expected, &reflected)?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("fractal_kernels"),
            source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
        });
        let mut entries = HashMap::new();
        for name in KERNEL_NAMES {
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(*name),
                layout: None,
                module: &module,
                entry_point: *name,
                compilation_options: Default::default(),
            });
            let arg_layout = pipeline.get_bind_group_layout(ARG_GROUP);
            let domain_layout = pipeline.get_bind_group_layout(DOMAIN_GROUP);
            entries.insert(
                name.to_string(),
                KernelEntry {
                    pipeline,
                    arg_layout,
                    domain_layout,
                    args: reflected[*name].clone(),
                },
            );
        }
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(ComputeError::Compile(err.to_string()));
        }

        Ok(Self {
            entries,
            source,
            generation,
        })
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

pub struct ProgramRegistry {
    sources: KernelSources,
    active: Option<Arc<KernelProgram>>,
    diagnostic: Option<String>,
    generation: u64,
}

impl ProgramRegistry {
    pub fn new(sources: KernelSources) -> Self {
        Self {
            sources,
            active: None,
            diagnostic: None,
            generation: 0,
        }
    }

    /// Rebuild every kernel with `user_fn` spliced in.  On failure the
    /// previously active program stays in effect and the diagnostic is kept
    /// for display.
    pub fn compile(&mut self, device: &wgpu::Device, user_fn: &str) -> ComputeResult<()> {
        let result = self.signatures().and_then(|expected| {
            let source = self.sources.splice(user_fn)?;
            KernelProgram::build(device, source, &expected, self.generation + 1)
        });

        match result {
            Ok(program) => {
                self.generation = program.generation;
                self.active = Some(Arc::new(program));
                self.diagnostic = None;
                tracing::info!(generation = self.generation, "kernel program compiled");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    keeping = self.generation,
                    "kernel compilation failed; previous program stays active"
                );
                self.diagnostic = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Argument slots of each kernel as the unmodified template declares them.
    fn signatures(&self) -> ComputeResult<HashMap<String, Vec<ArgSlot>>> {
        reflect(&self.sources.splice("")?)
    }

    pub fn active(&self) -> Option<&Arc<KernelProgram>> {
        self.active.as_ref()
    }

    /// Compiler output from the most recent failed compile, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn sources(&self) -> &KernelSources {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(slots: &[ArgSlot]) -> Vec<&str> {
        slots.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn blank_function_keeps_default_region() {
        let sources = KernelSources::builtin();
        let spliced = sources.splice("   \n").unwrap();
        assert!(spliced.contains(shaders::DEFAULT_RECURRENCE));
        assert!(spliced.contains(shaders::RECURRENCE_BEGIN));
    }

    #[test]
    fn splice_replaces_region_and_markers() {
        let sources = KernelSources::builtin();
        let body = "fn f(z: Complex, c: Complex) -> Complex {\n    return complex_add(complex_mul(z, complex_mul(z, z)), c);\n}";
        let spliced = sources.splice(body).unwrap();
        assert!(spliced.contains(body));
        assert!(!spliced.contains(shaders::RECURRENCE_BEGIN));
        assert!(!spliced.contains(shaders::RECURRENCE_END));
    }

    #[test]
    fn missing_marker_is_a_template_error() {
        let mut sources = KernelSources::builtin();
        sources.kernels = sources.kernels.replace(shaders::RECURRENCE_END, "");
        assert!(matches!(
            sources.splice("fn f() {}"),
            Err(ComputeError::Template(m)) if m == shaders::RECURRENCE_END
        ));
    }

    #[test]
    fn reflection_orders_arguments_by_binding() {
        let source = KernelSources::builtin().splice("").unwrap();
        let kernels = reflect(&source).unwrap();
        for name in KERNEL_NAMES {
            assert!(kernels.contains_key(*name), "missing {name}");
        }
        assert_eq!(names(&kernels["escape_iter"]), ["field_out", "param"]);
        assert_eq!(names(&kernels["min_prox"]), ["field_out", "param", "prox_sel"]);
        assert_eq!(names(&kernels["orbit_trap_re"]), ["field_out", "param", "trap"]);
        assert_eq!(names(&kernels["apply_log"]), ["field_out"]);
        assert_eq!(names(&kernels["map_sines"]), ["field_a", "pix_out", "freqs"]);
        assert_eq!(
            names(&kernels["map_img"]),
            ["field_a", "field_b", "image", "pix_out", "img_dims"]
        );
        assert_eq!(
            names(&kernels["pack"]),
            ["field_a", "field_b", "field_c", "pix_out"]
        );
        assert_eq!(
            names(&kernels["field_range"]),
            ["field_a", "field_b", "field_c", "ranges"]
        );
        assert_eq!(
            names(&kernels["pack_norm"]),
            ["field_a", "field_b", "field_c", "pix_out", "ranges"]
        );
    }

    #[test]
    fn reflection_marks_writable_slots() {
        let source = KernelSources::builtin().splice("").unwrap();
        let kernels = reflect(&source).unwrap();
        let map_img = &kernels["map_img"];
        let writable: Vec<bool> = map_img.iter().map(|s| s.writable).collect();
        assert_eq!(writable, [false, false, false, true, false]);
    }

    #[test]
    fn invalid_user_function_reports_diagnostic() {
        let source = KernelSources::builtin()
            .splice("fn f(z: Complex, c: Complex) -> Complex {\n    return z +;\n}")
            .unwrap();
        match reflect(&source) {
            Err(ComputeError::Compile(text)) => assert!(!text.is_empty()),
            other => panic!("expected compile error, got {:?}", other.map(|m| m.len())),
        }
    }

    #[test]
    fn wrong_signature_fails_validation() {
        let source = KernelSources::builtin()
            .splice("fn f(z: Complex) -> Complex {\n    return z;\n}")
            .unwrap();
        assert!(matches!(reflect(&source), Err(ComputeError::Compile(_))));
    }

    #[test]
    fn default_region_is_the_builtin_recurrence() {
        let sources = KernelSources::builtin();
        assert_eq!(sources.default_region().unwrap(), shaders::DEFAULT_RECURRENCE);
    }

    #[test]
    fn recurrence_reading_kernel_globals_is_rejected() {
        let sources = KernelSources::builtin();
        let expected = reflect(&sources.splice("").unwrap()).unwrap();
        let leaky = "fn f(z: Complex, c: Complex) -> Complex {\n    \
                     return complex_add(complex_pow(z, 2.0), c) + vec2<f32>(trap.left * 0.0, 0.0);\n}";
        let found = reflect(&sources.splice(leaky).unwrap()).unwrap();
        match check_signatures(&expected, &found) {
            Err(ComputeError::Compile(text)) => {
                assert!(text.contains("`escape_iter`"), "{text}");
                assert!(text.contains("extra: [trap]"), "{text}");
            }
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn template_signatures_match_themselves() {
        let sources = KernelSources::builtin();
        let expected = reflect(&sources.splice("").unwrap()).unwrap();
        let cubic = "fn f(z: Complex, c: Complex) -> Complex {\n    return complex_add(complex_pow(z, 3.0), c);\n}";
        let found = reflect(&sources.splice(cubic).unwrap()).unwrap();
        assert!(check_signatures(&expected, &found).is_ok());
    }

    #[test]
    fn search_path_overrides_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let custom = "alias Complex = vec2<f32>;\n// custom structs\n";
        std::fs::write(dir.path().join(shaders::STRUCTS_FILE), custom).unwrap();
        let sources = KernelSources::resolve(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(sources.structs, custom);
        assert_eq!(sources.kernels, shaders::KERNELS_WGSL);
    }
}
