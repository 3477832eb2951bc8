//! Per-map display effects, applied by both rasterizer back-ends.

/// Removal of a background color, with a soft edge.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RemoveColor {
    /// Target color, 0..=1 per channel.
    pub color: [f64; 3],
    /// Euclidean RGB distance below which pixels start disappearing.
    pub threshold: f64,
    /// 0 = hard cut at the threshold, 1 = fade from zero distance.
    pub hardness: f64,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Effects {
    pub opacity: f64,
    pub saturation: f64,
    /// Replaces the map's chroma with this color, keeping luminance.
    pub colorize: Option<[f64; 3]>,
    pub remove_color: Option<RemoveColor>,
    /// Overlay a resource-space grid (tile-sized lines).
    pub grid: bool,
}

impl Default for Effects {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            saturation: 1.0,
            colorize: None,
            remove_color: None,
            grid: false,
        }
    }
}

impl Effects {
    /// Apply to one non-premultiplied RGBA sample (0..=1 channels).
    pub fn apply(&self, rgba: [f64; 4], resource: [f64; 2], grid_spacing: f64) -> [f64; 4] {
        let [mut r, mut g, mut b, mut a] = rgba;

        if let Some(remove) = self.remove_color {
            let dr = r - remove.color[0];
            let dg = g - remove.color[1];
            let db = b - remove.color[2];
            let distance = (dr * dr + dg * dg + db * db).sqrt();
            if distance < remove.threshold {
                let fade_start = remove.threshold * (1.0 - remove.hardness.clamp(0.0, 1.0));
                if distance <= fade_start {
                    a = 0.0;
                } else {
                    a *= (distance - fade_start) / (remove.threshold - fade_start);
                }
            }
        }

        let luminance = 0.2126 * r + 0.7152 * g + 0.0722 * b;
        if self.saturation != 1.0 {
            let s = self.saturation.clamp(0.0, 1.0);
            r = luminance + (r - luminance) * s;
            g = luminance + (g - luminance) * s;
            b = luminance + (b - luminance) * s;
        }

        if let Some(color) = self.colorize {
            r = color[0] * luminance;
            g = color[1] * luminance;
            b = color[2] * luminance;
        }

        if self.grid && grid_spacing > 0.0 {
            let gx = resource[0].rem_euclid(grid_spacing);
            let gy = resource[1].rem_euclid(grid_spacing);
            if gx < 1.0 || gy < 1.0 {
                r = 0.0;
                g = 0.0;
                b = 0.0;
                a = a.max(1.0);
            }
        }

        [r, g, b, a * self.opacity.clamp(0.0, 1.0)]
    }
}
