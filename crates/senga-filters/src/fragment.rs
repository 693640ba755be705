//! The enhancement fragment program.
//!
//! One program, three dialects:
//!
//! - [`VERTEX_GLSL`] / [`FRAGMENT_GLSL`]: full-screen quad for raster hosts.
//! - [`FRAGMENT_CUDA`]: the same per-pixel body as a 2D grid kernel, one
//!   thread per output pixel (see `cuda.rs`).
//! - [`shade`]: host reference, bit-for-bit the canonical semantics.  The
//!   software device and every test oracle use it.
//!
//! # Per-pixel algorithm
//!
//! ```text
//! c  = sample(x, y) ^ 0.9                          tone lift, fixed exponent
//! if edge > 0.01:       c = mix(c, |sobel|, 0.5 * edge)
//! if sharp > 0.01 && anime(c):
//!                       c = mix(c, unsharp3x3(x, y), 0.1 * sharp)
//! c += dither(uv, time)                            |dither| <= 0.01
//! out = (saturate(c), source alpha)
//! ```
//!
//! The Sobel neighbourhood is sampled at 2-pixel offsets; the unsharp kernel
//! at 1-pixel offsets.  All sampling clamps to the frame edge.

use senga_core::frame::Frame;
use senga_core::settings::EnhancementSettings;

/// Fixed tone-curve exponent.  Independent of the `gamma` setting.
pub const GAMMA_LIFT: f32 = 0.9;
/// Uniforms at or below this value disable their stage.
pub const STAGE_ENABLE_THRESHOLD: f32 = 0.01;
/// Edge blend weight per unit of `edge_enhance`.
pub const EDGE_BLEND_SCALE: f32 = 0.5;
/// Sobel neighbourhood scale in pixels.
pub const EDGE_SAMPLE_SCALE: f32 = 2.0;
/// Sharpen blend weight per unit of `sharpness`.
pub const SHARPEN_BLEND_SCALE: f32 = 0.1;
/// Max channel deviation between `c` and `c^0.9` that marks an anime-style color.
pub const ANIME_COLOR_DEVIATION: f32 = 0.2;
/// Unsharp kernel weights: center, then each of the 8 neighbours.
pub const SHARPEN_CENTER: f32 = 9.0;
pub const SHARPEN_NEIGHBOR: f32 = -1.0;
/// Dither half-amplitude in normalized units.
pub const DITHER_AMPLITUDE: f32 = 0.01;
/// Rec. 601 luma weights used for the edge gradient.
pub const LUMA: [f32; 3] = [0.299, 0.587, 0.114];

const DITHER_KEY: [f32; 2] = [12.9898, 78.233];
const DITHER_SCALE: f32 = 43758.5453;
const TIME_SEED_SCALE: f32 = 61.0;

const SOBEL_X: [f32; 9] = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
const SOBEL_Y: [f32; 9] = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];

/// Uniform block shared by all dialects.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Uniforms {
    pub resolution: [f32; 2],
    pub sharpness: f32,
    pub edge_enhance: f32,
    /// Seconds since the processor started.  Seeds the dither only.
    pub time: f32,
}

impl Uniforms {
    pub fn new(frame: &Frame, settings: &EnhancementSettings, time: f32) -> Self {
        Self {
            resolution: [frame.width() as f32, frame.height() as f32],
            sharpness: settings.sharpness,
            edge_enhance: settings.edge_enhance,
            time,
        }
    }
}

// ─── Program sources ─────────────────────────────────────────────────────────

pub const VERTEX_GLSL: &str = r#"
attribute vec2 a_position;
attribute vec2 a_texCoord;
varying vec2 v_texCoord;

void main() {
    gl_Position = vec4(a_position, 0.0, 1.0);
    v_texCoord = a_texCoord;
}
"#;

pub const FRAGMENT_GLSL: &str = r#"
precision highp float;
varying vec2 v_texCoord;
uniform sampler2D u_image;
uniform vec2 u_resolution;
uniform float u_sharpness;
uniform float u_edgeEnhance;
uniform float u_time;

float isAnimeColor(vec3 c) {
    vec3 d = abs(c - pow(c, vec3(0.9)));
    return step(0.2, max(d.r, max(d.g, d.b)));
}

float sobelMagnitude(vec2 uv) {
    vec2 px = 2.0 / u_resolution;
    float gx = 0.0;
    float gy = 0.0;
    for (int i = 0; i < 9; i++) {
        int x = i - (i / 3) * 3 - 1;
        int y = i / 3 - 1;
        vec3 c = texture2D(u_image, uv + vec2(float(x), float(y)) * px).rgb;
        float l = dot(c, vec3(0.299, 0.587, 0.114));
        gx += float(x) * (y == 0 ? 2.0 : 1.0) * l;
        gy += float(y) * (x == 0 ? 2.0 : 1.0) * l;
    }
    return length(vec2(gx, gy));
}

vec3 unsharp(vec2 uv) {
    vec2 px = 1.0 / u_resolution;
    vec3 acc = 9.0 * texture2D(u_image, uv).rgb;
    for (int y = -1; y <= 1; y++) {
        for (int x = -1; x <= 1; x++) {
            if (x != 0 || y != 0) {
                acc -= texture2D(u_image, uv + vec2(float(x), float(y)) * px).rgb;
            }
        }
    }
    return acc;
}

void main() {
    vec4 src = texture2D(u_image, v_texCoord);
    vec3 color = pow(src.rgb, vec3(0.9));

    if (u_edgeEnhance > 0.01) {
        color = mix(color, vec3(sobelMagnitude(v_texCoord)), 0.5 * u_edgeEnhance);
    }
    if (u_sharpness > 0.01 && isAnimeColor(color) > 0.5) {
        color = mix(color, unsharp(v_texCoord), u_sharpness * 0.1);
    }

    float seed = dot(v_texCoord, vec2(12.9898, 78.233)) + fract(u_time) * 61.0;
    color += vec3((fract(sin(seed) * 43758.5453) - 0.5) * 0.02);

    gl_FragColor = vec4(clamp(color, 0.0, 1.0), src.a);
}
"#;

/// Entry point exported by [`FRAGMENT_CUDA`].
pub const CUDA_KERNEL_NAME: &str = "senga_enhance_rgba8";

pub const FRAGMENT_CUDA: &str = r#"
__device__ __forceinline__ int clampi(int v, int lo, int hi) {
    return v < lo ? lo : (v > hi ? hi : v);
}

__device__ __forceinline__ float3 fetch(const unsigned char* img, int w, int h, int x, int y) {
    x = clampi(x, 0, w - 1);
    y = clampi(y, 0, h - 1);
    const unsigned char* p = img + (y * w + x) * 4;
    return make_float3(p[0] / 255.0f, p[1] / 255.0f, p[2] / 255.0f);
}

__device__ __forceinline__ float fractf(float v) {
    return v - floorf(v);
}

__device__ __forceinline__ float3 mix3(float3 a, float3 b, float t) {
    return make_float3(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t, a.z + (b.z - a.z) * t);
}

__device__ __forceinline__ unsigned char quantize(float v) {
    v = fminf(fmaxf(v, 0.0f), 1.0f);
    return (unsigned char)(v * 255.0f + 0.5f);
}

extern "C" __global__ void senga_enhance_rgba8(
    const unsigned char* __restrict__ input,
    unsigned char* __restrict__ output,
    int width,
    int height,
    float sharpness,
    float edge_enhance,
    float time)
{
    int x = blockIdx.x * blockDim.x + threadIdx.x;
    int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= width || y >= height) return;

    int idx = (y * width + x) * 4;
    float3 src = fetch(input, width, height, x, y);
    float3 c = make_float3(powf(src.x, 0.9f), powf(src.y, 0.9f), powf(src.z, 0.9f));

    if (edge_enhance > 0.01f) {
        float gx = 0.0f;
        float gy = 0.0f;
        for (int dy = -1; dy <= 1; ++dy) {
            for (int dx = -1; dx <= 1; ++dx) {
                float3 n = fetch(input, width, height, x + 2 * dx, y + 2 * dy);
                float l = 0.299f * n.x + 0.587f * n.y + 0.114f * n.z;
                gx += (float)dx * (dy == 0 ? 2.0f : 1.0f) * l;
                gy += (float)dy * (dx == 0 ? 2.0f : 1.0f) * l;
            }
        }
        float mag = sqrtf(gx * gx + gy * gy);
        c = mix3(c, make_float3(mag, mag, mag), 0.5f * edge_enhance);
    }

    if (sharpness > 0.01f) {
        float dr = fabsf(c.x - powf(c.x, 0.9f));
        float dg = fabsf(c.y - powf(c.y, 0.9f));
        float db = fabsf(c.z - powf(c.z, 0.9f));
        if (fmaxf(dr, fmaxf(dg, db)) >= 0.2f) {
            float3 acc = make_float3(9.0f * src.x, 9.0f * src.y, 9.0f * src.z);
            for (int dy = -1; dy <= 1; ++dy) {
                for (int dx = -1; dx <= 1; ++dx) {
                    if (dx == 0 && dy == 0) continue;
                    float3 n = fetch(input, width, height, x + dx, y + dy);
                    acc.x -= n.x; acc.y -= n.y; acc.z -= n.z;
                }
            }
            c = mix3(c, acc, sharpness * 0.1f);
        }
    }

    float u = (x + 0.5f) / (float)width;
    float v = (y + 0.5f) / (float)height;
    float seed = u * 12.9898f + v * 78.233f + fractf(time) * 61.0f;
    float d = (fractf(sinf(seed) * 43758.5453f) - 0.5f) * 0.02f;

    output[idx + 0] = quantize(c.x + d);
    output[idx + 1] = quantize(c.y + d);
    output[idx + 2] = quantize(c.z + d);
    output[idx + 3] = input[idx + 3];
}
"#;

// ─── Host reference ──────────────────────────────────────────────────────────

#[inline]
fn glsl_fract(v: f32) -> f32 {
    v - v.floor()
}

#[inline]
fn mix(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

#[inline]
fn fetch(frame: &Frame, x: i64, y: i64) -> [f32; 3] {
    let p = frame.pixel_clamped(x, y);
    [
        p[0] as f32 / 255.0,
        p[1] as f32 / 255.0,
        p[2] as f32 / 255.0,
    ]
}

/// `c ^ 0.9` per channel.
#[inline]
pub fn gamma_lift(c: [f32; 3]) -> [f32; 3] {
    c.map(|v| v.powf(GAMMA_LIFT))
}

/// Max channel deviation between `c` and its tone-lifted value exceeds the
/// anime threshold (GLSL `step` semantics: `>=`).
pub fn is_anime_color(c: [f32; 3]) -> bool {
    let lifted = gamma_lift(c);
    let dev = (0..3)
        .map(|i| (c[i] - lifted[i]).abs())
        .fold(0.0f32, f32::max);
    dev >= ANIME_COLOR_DEVIATION
}

/// Sobel luminance gradient magnitude over the 2×-scaled 3×3 neighbourhood.
pub fn sobel_magnitude(frame: &Frame, x: u32, y: u32) -> f32 {
    let step = EDGE_SAMPLE_SCALE as i64;
    let (mut gx, mut gy) = (0.0f32, 0.0f32);
    for i in 0..9 {
        let dx = (i % 3) as i64 - 1;
        let dy = (i / 3) as i64 - 1;
        let c = fetch(frame, x as i64 + dx * step, y as i64 + dy * step);
        let l = LUMA[0] * c[0] + LUMA[1] * c[1] + LUMA[2] * c[2];
        gx += SOBEL_X[i] * l;
        gy += SOBEL_Y[i] * l;
    }
    (gx * gx + gy * gy).sqrt()
}

/// 3×3 unsharp kernel response at `(x, y)`.  Unclamped.
pub fn unsharp(frame: &Frame, x: u32, y: u32) -> [f32; 3] {
    let center = fetch(frame, x as i64, y as i64);
    let mut acc = center.map(|v| v * SHARPEN_CENTER);
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let n = fetch(frame, x as i64 + dx, y as i64 + dy);
            for c in 0..3 {
                acc[c] += SHARPEN_NEIGHBOR * n[c];
            }
        }
    }
    acc
}

/// Position-and-time seeded dither in `[-DITHER_AMPLITUDE, DITHER_AMPLITUDE)`.
pub fn dither(uv: [f32; 2], time: f32) -> f32 {
    let seed = uv[0] * DITHER_KEY[0] + uv[1] * DITHER_KEY[1] + glsl_fract(time) * TIME_SEED_SCALE;
    (glsl_fract(seed.sin() * DITHER_SCALE) - 0.5) * 2.0 * DITHER_AMPLITUDE
}

/// Run the fragment program for one output pixel.  Returns unclamped RGB
/// and the source alpha as a float.
pub fn shade(input: &Frame, x: u32, y: u32, u: &Uniforms) -> [f32; 4] {
    let src = fetch(input, x as i64, y as i64);
    let mut color = gamma_lift(src);

    if u.edge_enhance > STAGE_ENABLE_THRESHOLD {
        let mag = sobel_magnitude(input, x, y);
        color = mix(color, [mag; 3], EDGE_BLEND_SCALE * u.edge_enhance);
    }

    if u.sharpness > STAGE_ENABLE_THRESHOLD && is_anime_color(color) {
        color = mix(color, unsharp(input, x, y), u.sharpness * SHARPEN_BLEND_SCALE);
    }

    let uv = [
        (x as f32 + 0.5) / u.resolution[0],
        (y as f32 + 0.5) / u.resolution[1],
    ];
    let d = dither(uv, u.time);
    let alpha = input.pixel(x, y)[3] as f32 / 255.0;
    [color[0] + d, color[1] + d, color[2] + d, alpha]
}

/// Saturate and round a normalized channel to 8 bits.
#[inline]
pub fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// Run the program over every pixel of `input` into `output`.
pub fn shade_frame(input: &Frame, u: &Uniforms, output: &mut Frame) {
    output.resize_to(input.width(), input.height());
    for y in 0..input.height() {
        for x in 0..input.width() {
            let c = shade(input, x, y, u);
            let alpha = input.pixel(x, y)[3];
            output.set_pixel(x, y, [quantize(c[0]), quantize(c[1]), quantize(c[2]), alpha]);
        }
    }
}
