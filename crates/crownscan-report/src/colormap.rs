//! Colour lookup for feature maps and histogram layers.

/// An opaque 8-bit RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// CSS hex notation, e.g. `#1f77b4`.
    #[must_use]
    pub fn hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

/// Viridis sampled at nine evenly spaced stops.
const VIRIDIS: [Rgb; 9] = [
    Rgb(68, 1, 84),
    Rgb(71, 44, 122),
    Rgb(59, 81, 139),
    Rgb(44, 113, 142),
    Rgb(33, 144, 141),
    Rgb(39, 173, 129),
    Rgb(92, 200, 99),
    Rgb(170, 220, 50),
    Rgb(253, 231, 37),
];

/// Categorical colours cycled over histogram layers.
const CATEGORICAL: [Rgb; 10] = [
    Rgb(0x1f, 0x77, 0xb4),
    Rgb(0xff, 0x7f, 0x0e),
    Rgb(0x2c, 0xa0, 0x2c),
    Rgb(0xd6, 0x27, 0x28),
    Rgb(0x94, 0x67, 0xbd),
    Rgb(0x8c, 0x56, 0x4b),
    Rgb(0xe3, 0x77, 0xc2),
    Rgb(0x7f, 0x7f, 0x7f),
    Rgb(0xbc, 0xbd, 0x22),
    Rgb(0x17, 0xbe, 0xcf),
];

/// Map `t` in `[0, 1]` through a viridis-like ramp. Values outside the
/// range are clamped.
#[must_use]
pub fn viridis(t: f32) -> Rgb {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    #[allow(clippy::cast_precision_loss)]
    let scaled = t * (VIRIDIS.len() - 1) as f32;
    // `scaled` is within 0..=8.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lower = (scaled.floor() as usize).min(VIRIDIS.len() - 2);
    #[allow(clippy::cast_precision_loss)]
    let frac = scaled - lower as f32;
    let (a, b) = (VIRIDIS[lower], VIRIDIS[lower + 1]);
    Rgb(lerp(a.0, b.0, frac), lerp(a.1, b.1, frac), lerp(a.2, b.2, frac))
}

/// Colour for the `index`-th layer of a stacked plot.
#[must_use]
pub const fn categorical(index: usize) -> Rgb {
    CATEGORICAL[index % CATEGORICAL.len()]
}

fn lerp(a: u8, b: u8, t: f32) -> u8 {
    let v = f32::from(a) + (f32::from(b) - f32::from(a)) * t;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let v = v.round().clamp(0.0, 255.0) as u8;
    v
}
