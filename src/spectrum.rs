//! Emission spectrum sampling tables.
//!
//! The emission pass draws a spectral offset per ray by inverse-CDF lookup
//! against a distribution table, then converts it to linear RGB through a
//! wavelength table. Both tables are built on the CPU here and uploaded as
//! 1-high lookup textures.

/// Visible range covered by the spectral offset w in [0, 1]:
/// wavelength = LAMBDA_MIN + (LAMBDA_MAX - LAMBDA_MIN) * w, in nanometers.
pub const LAMBDA_MIN: f32 = 360.0;
pub const LAMBDA_MAX: f32 = 750.0;

/// Resolution of the ICDF and RGB lookup tables.
pub const TABLE_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct EmissionSpectrum {
    icdf: Vec<f32>,
    rgb: Vec<[f32; 4]>,
}

impl EmissionSpectrum {
    /// Build the sampling tables from spectral power samples, taken as
    /// uniformly spaced over [LAMBDA_MIN, LAMBDA_MAX]. Non-positive total
    /// power degenerates to a flat spectrum.
    pub fn from_samples(power: &[f32]) -> Self {
        let icdf = build_icdf(power);
        let rgb = (0..TABLE_SIZE)
            .map(|i| {
                let w = i as f32 / (TABLE_SIZE - 1) as f32;
                let [r, g, b] = wavelength_to_rgb(LAMBDA_MIN + (LAMBDA_MAX - LAMBDA_MIN) * w);
                [r, g, b, 1.0]
            })
            .collect();
        Self { icdf, rgb }
    }

    /// Uniform emission over the whole visible range.
    pub fn flat() -> Self {
        Self::from_samples(&[1.0; TABLE_SIZE])
    }

    /// Planck blackbody emission at the given temperature.
    pub fn blackbody(temperature_k: f32) -> Self {
        let samples: Vec<f32> = (0..TABLE_SIZE)
            .map(|i| {
                let w = i as f32 / (TABLE_SIZE - 1) as f32;
                let lambda = LAMBDA_MIN + (LAMBDA_MAX - LAMBDA_MIN) * w;
                planck_radiance(lambda, temperature_k)
            })
            .collect();
        Self::from_samples(&samples)
    }

    pub fn icdf(&self) -> &[f32] {
        &self.icdf
    }

    /// Draw a spectral offset from the distribution, for CPU-side use.
    pub fn sample_offset(&self, xi: f32) -> f32 {
        let x = xi.clamp(0.0, 1.0) * (self.icdf.len() - 1) as f32;
        let i0 = x.floor() as usize;
        let i1 = (i0 + 1).min(self.icdf.len() - 1);
        let t = x.fract();
        self.icdf[i0] * (1.0 - t) + self.icdf[i1] * t
    }

    /// Upload both tables as lookup textures for the emission pass.
    pub(crate) fn upload(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> SpectrumTextures {
        let icdf = table_texture(
            device,
            "spectrum-icdf",
            wgpu::TextureFormat::R32Float,
            self.icdf.len() as u32,
        );
        queue.write_texture(
            icdf.as_image_copy(),
            bytemuck::cast_slice(&self.icdf),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * self.icdf.len() as u32),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: self.icdf.len() as u32,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        let rgb = table_texture(
            device,
            "spectrum-rgb",
            wgpu::TextureFormat::Rgba32Float,
            self.rgb.len() as u32,
        );
        queue.write_texture(
            rgb.as_image_copy(),
            bytemuck::cast_slice(&self.rgb),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(16 * self.rgb.len() as u32),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: self.rgb.len() as u32,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        let icdf_view = icdf.create_view(&wgpu::TextureViewDescriptor::default());
        let rgb_view = rgb.create_view(&wgpu::TextureViewDescriptor::default());
        SpectrumTextures {
            icdf,
            icdf_view,
            rgb,
            rgb_view,
        }
    }
}

impl Default for EmissionSpectrum {
    fn default() -> Self {
        Self::flat()
    }
}

pub struct SpectrumTextures {
    pub icdf: wgpu::Texture,
    pub icdf_view: wgpu::TextureView,
    pub rgb: wgpu::Texture,
    pub rgb_view: wgpu::TextureView,
}

fn table_texture(
    device: &wgpu::Device,
    label: &str,
    format: wgpu::TextureFormat,
    width: u32,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

/// Invert the CDF of the given power samples onto a uniform grid.
fn build_icdf(power: &[f32]) -> Vec<f32> {
    let n = power.len().max(1);
    let mut cdf = Vec::with_capacity(n + 1);
    cdf.push(0.0f32);
    let mut total = 0.0f32;
    for &p in power {
        total += p.max(0.0);
        cdf.push(total);
    }
    if total <= 0.0 {
        // Degenerate input: fall back to the identity (flat spectrum)
        return (0..TABLE_SIZE)
            .map(|i| i as f32 / (TABLE_SIZE - 1) as f32)
            .collect();
    }
    for c in cdf.iter_mut() {
        *c /= total;
    }

    let mut icdf = Vec::with_capacity(TABLE_SIZE);
    let mut j = 0usize;
    for i in 0..TABLE_SIZE {
        let u = i as f32 / (TABLE_SIZE - 1) as f32;
        // Advance to the first bin whose CDF reaches u, skipping zero-mass
        // bins so the inverse stays inside the support of the distribution.
        while j + 1 < n && (cdf[j + 1] < u || cdf[j + 1] <= cdf[j]) {
            j += 1;
        }
        let lo = cdf[j];
        let hi = cdf[j + 1];
        let t = if hi > lo { (u - lo) / (hi - lo) } else { 0.0 };
        icdf.push((j as f32 + t) / n as f32);
    }
    icdf
}

/// Piecewise-linear fit of the visible spectrum to linear RGB.
pub fn wavelength_to_rgb(lambda: f32) -> [f32; 3] {
    let l = lambda.clamp(380.0, 750.0);
    let (r, g, b) = match l {
        l if l < 440.0 => (-(l - 440.0) / 60.0, 0.0, 1.0),
        l if l < 490.0 => (0.0, (l - 440.0) / 50.0, 1.0),
        l if l < 510.0 => (0.0, 1.0, -(l - 510.0) / 20.0),
        l if l < 580.0 => ((l - 510.0) / 70.0, 1.0, 0.0),
        l if l < 645.0 => (1.0, -(l - 645.0) / 65.0, 0.0),
        _ => (1.0, 0.0, 0.0),
    };
    // Fade toward the ends of the visible range
    let fade = if l < 420.0 {
        0.3 + 0.7 * (l - 380.0) / 40.0
    } else if l > 700.0 {
        0.3 + 0.7 * (750.0 - l) / 50.0
    } else {
        1.0
    };
    [r * fade, g * fade, b * fade]
}

fn planck_radiance(lambda_nm: f32, temperature_k: f32) -> f32 {
    // Spectral radiance up to a constant factor; hc/k = 1.4388e7 nm K
    let x = 1.4388e7 / (lambda_nm * temperature_k.max(1.0));
    let l = lambda_nm / LAMBDA_MAX; // keep the powers well-conditioned
    1.0 / (l.powi(5) * (x.exp() - 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_spectrum_icdf_is_identity() {
        let s = EmissionSpectrum::flat();
        for (i, &v) in s.icdf().iter().enumerate() {
            let u = i as f32 / (TABLE_SIZE - 1) as f32;
            assert!((v - u).abs() < 2.0 / TABLE_SIZE as f32, "icdf[{i}] = {v}, expected ~{u}");
        }
    }

    #[test]
    fn icdf_is_monotonic() {
        let s = EmissionSpectrum::blackbody(5800.0);
        for pair in s.icdf().windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn narrow_spectrum_concentrates_samples() {
        // All power in one bin around offset 0.5
        let mut power = vec![0.0f32; 101];
        power[50] = 1.0;
        let s = EmissionSpectrum::from_samples(&power);
        for xi in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let w = s.sample_offset(xi);
            assert!((w - 0.5).abs() < 0.02, "offset {w} for xi {xi}");
        }
    }

    #[test]
    fn degenerate_power_falls_back_to_flat() {
        let s = EmissionSpectrum::from_samples(&[0.0; 16]);
        assert!((s.sample_offset(0.5) - 0.5).abs() < 0.01);
    }

    #[test]
    fn rgb_fit_spans_the_range() {
        let [r, _, b] = wavelength_to_rgb(450.0);
        assert!(b > r, "450nm should be blue-dominant");
        let [r, _, b] = wavelength_to_rgb(700.0);
        assert!(r > b, "700nm should be red-dominant");
        for lambda in [360.0, 550.0, 750.0] {
            for c in wavelength_to_rgb(lambda) {
                assert!((0.0..=1.0).contains(&c));
            }
        }
    }

    #[test]
    fn blackbody_5800k_peaks_in_visible_mid_range() {
        let hot = EmissionSpectrum::blackbody(5800.0);
        let cold = EmissionSpectrum::blackbody(2500.0);
        // A colder body shifts its samples toward longer wavelengths
        assert!(cold.sample_offset(0.5) > hot.sample_offset(0.5));
    }
}
