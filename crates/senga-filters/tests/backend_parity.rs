use senga_core::backend::FilterBackend;
use senga_core::frame::Frame;
use senga_core::settings::EnhancementSettings;
use senga_filters::{CpuFilter, GpuFilter, ReferenceDevice};

fn pixel_set() -> Frame {
    let (w, h) = (23u32, 17u32);
    let mut frame = Frame::new(w, h);
    let mut state = 0x9e37_79b9u32;
    for y in 0..h {
        for x in 0..w {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            frame.set_pixel(x, y, [r, g, b, 255]);
        }
    }
    frame
}

fn lift(v: u8) -> f32 {
    (v as f32 / 255.0).powf(0.9) * 255.0
}

/// Sharpen and edge off; gamma, color boost and the rest stay at defaults.
fn neutral_settings() -> EnhancementSettings {
    EnhancementSettings {
        sharpness: 0.0,
        edge_enhance: 0.0,
        ..EnhancementSettings::default()
    }
}

#[test]
fn both_backends_reduce_to_tone_lift_without_edge_and_sharpen() {
    let input = pixel_set();
    let settings = neutral_settings();

    let mut gpu = GpuFilter::new(Box::new(ReferenceDevice::new())).expect("reference device builds");
    let mut cpu = CpuFilter::settings_driven().with_seed(7);

    let mut gpu_out = Frame::new(0, 0);
    let mut cpu_out = Frame::new(0, 0);
    gpu.render(&input, &settings, 12.75, &mut gpu_out)
        .expect("gpu render");
    cpu.render(&input, &settings, 12.75, &mut cpu_out)
        .expect("cpu render");

    for y in 0..input.height() {
        for x in 0..input.width() {
            let src = input.pixel(x, y);
            let g = gpu_out.pixel(x, y);
            let c = cpu_out.pixel(x, y);
            let near_black = src[..3].iter().all(|&v| v < 50);
            for ch in 0..3 {
                let expected = lift(src[ch]);
                // Dither is at most 0.01 of full scale, plus rounding.
                assert!(
                    (g[ch] as f32 - expected).abs() <= 3.1,
                    "gpu ({x},{y})[{ch}] = {} vs lift {expected}",
                    g[ch]
                );
                let cpu_tolerance = if near_black { 5.6 } else { 1.1 };
                assert!(
                    (c[ch] as f32 - expected).abs() <= cpu_tolerance,
                    "cpu ({x},{y})[{ch}] = {} vs lift {expected}",
                    c[ch]
                );
                assert!((g[ch] as i32 - c[ch] as i32).abs() <= 8);
            }
        }
    }
}

#[test]
fn edge_enhance_changes_gpu_output_on_edges_only() {
    let mut input = Frame::solid(12, 12, [40, 40, 40, 255]);
    for y in 0..12 {
        for x in 6..12 {
            input.set_pixel(x, y, [220, 220, 220, 255]);
        }
    }
    let mut gpu = GpuFilter::new(Box::new(ReferenceDevice::new())).expect("reference device builds");

    let mut plain = Frame::new(0, 0);
    let mut edged = Frame::new(0, 0);
    let base = neutral_settings();
    let with_edges = EnhancementSettings {
        edge_enhance: 1.0,
        ..neutral_settings()
    };
    gpu.render(&input, &base, 0.0, &mut plain).expect("plain");
    gpu.render(&input, &with_edges, 0.0, &mut edged).expect("edged");

    // Far from the boundary the gradient is zero, so the blend only darkens
    // toward black by the blend weight.
    let interior_plain = plain.pixel(0, 6)[0] as f32;
    let interior_edged = edged.pixel(0, 6)[0] as f32;
    assert!((interior_edged - interior_plain * 0.5).abs() <= 3.0);

    // On the boundary the gradient magnitude saturates toward white.
    assert!(edged.pixel(6, 6)[0] > plain.pixel(6, 6)[0]);
}
