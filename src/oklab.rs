//! Perceptual color spaces used for palette selection and nearest-color search.
//!
//! OKLab (Bjorn Ottosson) drives the median cut; its polar form, HCL, is what
//! the remapper compares pixels against.

/// OKLab color representation.
///
/// L: lightness [0, 1], a: green-red, b: blue-yellow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OKLab {
    pub l: f32,
    pub a: f32,
    pub b: f32,
}

impl OKLab {
    pub const fn new(l: f32, a: f32, b: f32) -> Self {
        Self { l, a, b }
    }

    /// Squared Euclidean distance in OKLab space.
    pub fn distance_sq(self, other: Self) -> f32 {
        let dl = self.l - other.l;
        let da = self.a - other.a;
        let db = self.b - other.b;
        dl * dl + da * da + db * db
    }

    pub fn to_hcl(self) -> Hcl {
        Hcl {
            h: self.b.atan2(self.a),
            c: (self.a * self.a + self.b * self.b).sqrt(),
            l: self.l,
        }
    }
}

/// Hue/chroma/lightness: OKLab in cylindrical coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hcl {
    /// Hue angle in radians.
    pub h: f32,
    pub c: f32,
    pub l: f32,
}

impl Hcl {
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        srgb_to_oklab(r, g, b).to_hcl()
    }

    /// Squared perceptual distance.
    ///
    /// `dL² + dC² + 2·C1·C2·(1 − cos dh)` is the law of cosines on the chroma
    /// plane, so it agrees with Euclidean OKLab distance.
    pub fn distance_sq(self, other: Self) -> f32 {
        let dl = self.l - other.l;
        let dc = self.c - other.c;
        let dh = self.h - other.h;
        let hue_term = 2.0 * self.c * other.c * (1.0 - dh.cos());
        dl * dl + dc * dc + hue_term.max(0.0)
    }
}

/// sRGB gamma → linear (single channel, 0..255 → 0.0..1.0)
#[inline(always)]
fn srgb_to_linear(c: u8) -> f32 {
    linear_srgb::default::srgb_u8_to_linear(c)
}

// Matrix constants are from the OKLab reference implementation.

/// Convert sRGB (0..255 per channel) to OKLab.
#[allow(clippy::excessive_precision)]
pub fn srgb_to_oklab(r: u8, g: u8, b: u8) -> OKLab {
    let r = srgb_to_linear(r);
    let g = srgb_to_linear(g);
    let b = srgb_to_linear(b);

    let l = 0.4122214708 * r + 0.5363325363 * g + 0.0514459929 * b;
    let m = 0.2119034982 * r + 0.6806995451 * g + 0.1073969566 * b;
    let s = 0.0883024619 * r + 0.2817188376 * g + 0.6299787005 * b;

    let l_ = l.cbrt();
    let m_ = m.cbrt();
    let s_ = s.cbrt();

    OKLab {
        l: 0.2104542553 * l_ + 0.7936177850 * m_ - 0.0040720468 * s_,
        a: 1.9779984951 * l_ - 2.4285922050 * m_ + 0.4505937099 * s_,
        b: 0.0259040371 * l_ + 0.7827717662 * m_ - 0.8086757660 * s_,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn black_and_white_lightness() {
        let black = srgb_to_oklab(0, 0, 0);
        assert!(black.l.abs() < 0.001);
        let white = srgb_to_oklab(255, 255, 255);
        assert!((white.l - 1.0).abs() < 0.001);
        assert!(white.a.abs() < 0.001);
        assert!(white.b.abs() < 0.001);
    }

    #[test]
    fn gray_has_no_chroma() {
        let hcl = Hcl::from_rgb(128, 128, 128);
        assert!(hcl.c < 0.001);
    }

    #[test]
    fn hcl_distance_matches_oklab() {
        let pairs = [
            ((255, 0, 0), (0, 0, 255)),
            ((10, 200, 30), (12, 190, 40)),
            ((100, 100, 100), (240, 10, 130)),
        ];
        for ((r1, g1, b1), (r2, g2, b2)) in pairs {
            let a = srgb_to_oklab(r1, g1, b1);
            let b = srgb_to_oklab(r2, g2, b2);
            let lab = a.distance_sq(b);
            let hcl = a.to_hcl().distance_sq(b.to_hcl());
            assert!((lab - hcl).abs() < 1e-4, "lab={lab} hcl={hcl}");
        }
    }

    #[test]
    fn distance_identity_and_symmetry() {
        let a = Hcl::from_rgb(100, 150, 200);
        let b = Hcl::from_rgb(30, 60, 90);
        assert!(a.distance_sq(a) < 1e-10);
        assert!((a.distance_sq(b) - b.distance_sq(a)).abs() < 1e-10);
    }

    #[test]
    fn similar_colors_small_distance() {
        let a = Hcl::from_rgb(100, 100, 100);
        let b = Hcl::from_rgb(101, 100, 100);
        let far = Hcl::from_rgb(200, 50, 50);
        assert!(a.distance_sq(b) < a.distance_sq(far));
    }
}
