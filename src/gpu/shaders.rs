// ============================================================================
// GPU SHADERS - built-in kernel template, kept inline for containment
// ============================================================================
//
// The template is three sources concatenated in this order:
//   STRUCTS_WGSL  - host-shared struct layouts (mirrored in gpu::types)
//   UTILS_WGSL    - complex arithmetic available to the recurrence
//   KERNELS_WGSL  - bindings + entry points, with the recurrence region
//                   between RECURRENCE_BEGIN and RECURRENCE_END
//
// Binding convention: group 0 holds the positional kernel arguments, bound in
// ascending binding order; group 1 holds the execution-domain uniform the
// dispatcher writes for every invocation.

/// File names looked up on the kernel search path.
pub const STRUCTS_FILE: &str = "structs.wgsl";
pub const UTILS_FILE: &str = "utils.wgsl";
pub const KERNELS_FILE: &str = "fractal.wgsl";

pub const RECURRENCE_BEGIN: &str = "//>>";
pub const RECURRENCE_END: &str = "//<<";

/// The recurrence compiled at startup and restored by "Reset".
pub const DEFAULT_RECURRENCE: &str = "fn f(z: Complex, c: Complex) -> Complex {
    return complex_add(complex_pow(z, 2.0), c);
}";

pub const STRUCTS_WGSL: &str = r#"
alias Complex = vec2<f32>;

struct FParam {
    mandel: i32,
    max_iter: i32,
    c: vec2<f32>,
    // re_min, re_max, im_min, im_max
    view_rect: vec4<f32>,
};

struct TrapBox {
    bot: f32,
    top: f32,
    left: f32,
    right: f32,
};

struct Freqs {
    f1: f32,
    f2: f32,
    f3: f32,
};

struct ImDims {
    w: i32,
    h: i32,
};

struct Domain {
    rows: u32,
    cols: u32,
    _pad0: u32,
    _pad1: u32,
};

// f32 bit patterns of non-negative values order like u32s.
struct ChannelRange {
    lo: array<atomic<u32>, 3>,
    hi: array<atomic<u32>, 3>,
};
"#;

pub const UTILS_WGSL: &str = r#"
fn complex_add(a: Complex, b: Complex) -> Complex {
    return a + b;
}

fn complex_sub(a: Complex, b: Complex) -> Complex {
    return a - b;
}

fn complex_mul(a: Complex, b: Complex) -> Complex {
    return vec2<f32>(a.x * b.x - a.y * b.y, a.x * b.y + a.y * b.x);
}

fn complex_div(a: Complex, b: Complex) -> Complex {
    let d = dot(b, b);
    return vec2<f32>((a.x * b.x + a.y * b.y) / d, (a.y * b.x - a.x * b.y) / d);
}

fn complex_conj(a: Complex) -> Complex {
    return vec2<f32>(a.x, -a.y);
}

fn complex_abs(a: Complex) -> f32 {
    return length(a);
}

fn complex_arg(a: Complex) -> f32 {
    return atan2(a.y, a.x);
}

fn complex_exp(a: Complex) -> Complex {
    return exp(a.x) * vec2<f32>(cos(a.y), sin(a.y));
}

fn complex_sin(a: Complex) -> Complex {
    return vec2<f32>(sin(a.x) * cosh(a.y), cos(a.x) * sinh(a.y));
}

fn complex_cos(a: Complex) -> Complex {
    return vec2<f32>(cos(a.x) * cosh(a.y), -sin(a.x) * sinh(a.y));
}

fn complex_pow(a: Complex, n: f32) -> Complex {
    if (n == 2.0) {
        return complex_mul(a, a);
    }
    let r = length(a);
    if (r == 0.0) {
        return vec2<f32>(0.0, 0.0);
    }
    let t = atan2(a.y, a.x) * n;
    return pow(r, n) * vec2<f32>(cos(t), sin(t));
}
"#;

pub const KERNELS_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read_write> field_out: array<f32>;
@group(0) @binding(1) var<storage, read> param: FParam;
@group(0) @binding(2) var<storage, read> prox_sel: i32;
@group(0) @binding(3) var<storage, read> trap: TrapBox;
@group(0) @binding(4) var<storage, read> field_a: array<f32>;
@group(0) @binding(5) var<storage, read> field_b: array<f32>;
@group(0) @binding(6) var<storage, read> field_c: array<f32>;
@group(0) @binding(7) var<storage, read> image: array<u32>;
@group(0) @binding(8) var<storage, read_write> pix_out: array<u32>;
@group(0) @binding(9) var<storage, read> freqs: Freqs;
@group(0) @binding(10) var<storage, read> img_dims: ImDims;
@group(0) @binding(11) var<storage, read_write> ranges: ChannelRange;

@group(1) @binding(0) var<uniform> domain: Domain;

//>>
fn f(z: Complex, c: Complex) -> Complex {
    return complex_add(complex_pow(z, 2.0), c);
}
//<<

fn cell(gid: vec3<u32>) -> i32 {
    if (gid.x >= domain.cols || gid.y >= domain.rows) {
        return -1;
    }
    return i32(gid.y * domain.cols + gid.x);
}

fn point_at(gid: vec3<u32>) -> Complex {
    let fx = (f32(gid.x) + 0.5) / f32(domain.cols);
    let fy = (f32(gid.y) + 0.5) / f32(domain.rows);
    return vec2<f32>(
        mix(param.view_rect.x, param.view_rect.y, fx),
        mix(param.view_rect.z, param.view_rect.w, fy),
    );
}

fn orbit_z0(p: Complex) -> Complex {
    return select(p, vec2<f32>(0.0, 0.0), param.mandel != 0);
}

fn orbit_c(p: Complex) -> Complex {
    return select(param.c, p, param.mandel != 0);
}

fn pack_rgb(r: f32, g: f32, b: f32) -> u32 {
    let q = vec3<u32>(clamp(vec3<f32>(r, g, b), vec3<f32>(0.0), vec3<f32>(1.0)) * 255.0 + 0.5);
    return q.x | (q.y << 8u) | (q.z << 16u) | (255u << 24u);
}

fn proximity(z: Complex, c: Complex, kind: i32) -> f32 {
    var d: f32;
    switch kind {
        case 1: { d = length(z); }
        case 2: { d = abs(z.x); }
        case 3: { d = abs(z.y); }
        case 4: { d = min(abs(z.x), abs(z.y)); }
        case 5: { d = length(z - c); }
        case 6: { d = abs(length(z) - 1.0); }
        default: { d = abs(z.x * z.y); }
    }
    return d;
}

fn trap_value(p: Complex, real_part: bool) -> f32 {
    var z = orbit_z0(p);
    let c = orbit_c(p);
    var n = 0;
    while (n < param.max_iter && dot(z, z) <= 4.0) {
        z = f(z, c);
        if (z.x >= trap.left && z.x <= trap.right && z.y >= trap.bot && z.y <= trap.top) {
            if (real_part) {
                return (z.x - trap.left) / max(trap.right - trap.left, 1e-6);
            }
            return (z.y - trap.bot) / max(trap.top - trap.bot, 1e-6);
        }
        n = n + 1;
    }
    return 0.0;
}

@compute @workgroup_size(16, 16, 1)
fn escape_iter(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = cell(gid);
    if (i < 0) {
        return;
    }
    let p = point_at(gid);
    var z = orbit_z0(p);
    let c = orbit_c(p);
    var n = 0;
    while (n < param.max_iter && dot(z, z) <= 4.0) {
        z = f(z, c);
        n = n + 1;
    }
    field_out[i] = f32(n) / f32(max(param.max_iter, 1));
}

@compute @workgroup_size(16, 16, 1)
fn min_prox(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = cell(gid);
    if (i < 0) {
        return;
    }
    let p = point_at(gid);
    var z = orbit_z0(p);
    let c = orbit_c(p);
    var best = 1e30;
    var n = 0;
    while (n < param.max_iter && dot(z, z) <= 4.0) {
        z = f(z, c);
        best = min(best, proximity(z, c, prox_sel));
        n = n + 1;
    }
    field_out[i] = select(0.0, best, best < 1e30);
}

@compute @workgroup_size(16, 16, 1)
fn orbit_trap_re(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = cell(gid);
    if (i < 0) {
        return;
    }
    field_out[i] = trap_value(point_at(gid), true);
}

@compute @workgroup_size(16, 16, 1)
fn orbit_trap_im(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = cell(gid);
    if (i < 0) {
        return;
    }
    field_out[i] = trap_value(point_at(gid), false);
}

@compute @workgroup_size(16, 16, 1)
fn apply_log(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = cell(gid);
    if (i < 0) {
        return;
    }
    field_out[i] = log(1.0 + 9.0 * max(field_out[i], 0.0)) / log(10.0);
}

@compute @workgroup_size(16, 16, 1)
fn map_sines(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = cell(gid);
    if (i < 0) {
        return;
    }
    let v = field_a[i] * 6.2831853;
    pix_out[i] = pack_rgb(
        0.5 + 0.5 * sin(freqs.f1 * v),
        0.5 + 0.5 * sin(freqs.f2 * v),
        0.5 + 0.5 * sin(freqs.f3 * v),
    );
}

@compute @workgroup_size(16, 16, 1)
fn map_img(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = cell(gid);
    if (i < 0 || img_dims.w <= 0 || img_dims.h <= 0) {
        return;
    }
    let u = clamp(field_a[i], 0.0, 1.0);
    let v = clamp(field_b[i], 0.0, 1.0);
    let x = min(i32(u * f32(img_dims.w)), img_dims.w - 1);
    let y = min(i32(v * f32(img_dims.h)), img_dims.h - 1);
    pix_out[i] = image[y * img_dims.w + x] | (255u << 24u);
}

@compute @workgroup_size(16, 16, 1)
fn pack(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = cell(gid);
    if (i < 0) {
        return;
    }
    pix_out[i] = pack_rgb(field_a[i], field_b[i], field_c[i]);
}

fn range_bits(v: f32) -> u32 {
    return bitcast<u32>(max(v, 0.0));
}

@compute @workgroup_size(16, 16, 1)
fn field_range(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = cell(gid);
    if (i < 0) {
        return;
    }
    let a = range_bits(field_a[i]);
    let b = range_bits(field_b[i]);
    let c = range_bits(field_c[i]);
    atomicMin(&ranges.lo[0], a);
    atomicMax(&ranges.hi[0], a);
    atomicMin(&ranges.lo[1], b);
    atomicMax(&ranges.hi[1], b);
    atomicMin(&ranges.lo[2], c);
    atomicMax(&ranges.hi[2], c);
}

fn normalized(v: f32, ch: u32) -> f32 {
    let lo = bitcast<f32>(atomicLoad(&ranges.lo[ch]));
    let hi = bitcast<f32>(atomicLoad(&ranges.hi[ch]));
    if (hi <= lo) {
        return 0.0;
    }
    return (max(v, 0.0) - lo) / (hi - lo);
}

@compute @workgroup_size(16, 16, 1)
fn pack_norm(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = cell(gid);
    if (i < 0) {
        return;
    }
    pix_out[i] = pack_rgb(
        normalized(field_a[i], 0u),
        normalized(field_b[i], 1u),
        normalized(field_c[i], 2u),
    );
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_wgsl(label: &str, source: &str) -> naga::Module {
        naga::front::wgsl::parse_str(source).unwrap_or_else(|error| {
            panic!(
                "WGSL parse failed for {label}: {}",
                error.emit_to_string(source)
            )
        })
    }

    #[test]
    fn builtin_template_parses_and_validates() {
        let source = format!("{STRUCTS_WGSL}\n{UTILS_WGSL}\n{KERNELS_WGSL}");
        let module = parse_wgsl("builtin template", &source);
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::default(),
        )
        .validate(&module)
        .unwrap_or_else(|e| panic!("{}", e.emit_to_string(&source)));
    }

    #[test]
    fn template_default_region_matches_default_recurrence() {
        let start = KERNELS_WGSL.find(RECURRENCE_BEGIN).unwrap() + RECURRENCE_BEGIN.len();
        let end = KERNELS_WGSL.find(RECURRENCE_END).unwrap();
        assert_eq!(KERNELS_WGSL[start..end].trim(), DEFAULT_RECURRENCE);
    }
}
