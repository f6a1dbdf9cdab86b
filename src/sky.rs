//! # Sky positions and angular separations
//!
//! Equatorial positions are stored in **degrees**. Separations are computed from unit
//! vectors on the celestial sphere (via [`nalgebra::Vector3`]) with the `atan2` form of the
//! great-circle distance, which stays accurate for the sub-arcsecond radii used by the
//! cross-match.
use nalgebra::Vector3;

use crate::constants::{Degree, RADEG};

/// Check that a position lies inside `ra ∈ [0, 360)` and `dec ∈ [-90, 90]`.
pub fn is_valid_radec(ra: Degree, dec: Degree) -> bool {
    ra.is_finite() && dec.is_finite() && (0.0..360.0).contains(&ra) && (-90.0..=90.0).contains(&dec)
}

/// Convert an equatorial position to a unit vector.
///
/// Arguments
/// ---------
/// * `ra`: right ascension in degrees
/// * `dec`: declination in degrees
///
/// Return
/// ------
/// * the cartesian unit vector pointing toward `(ra, dec)`
pub fn radec_to_unit_vector(ra: Degree, dec: Degree) -> Vector3<f64> {
    let (sin_ra, cos_ra) = (ra * RADEG).sin_cos();
    let (sin_dec, cos_dec) = (dec * RADEG).sin_cos();
    Vector3::new(cos_dec * cos_ra, cos_dec * sin_ra, sin_dec)
}

/// Great-circle separation between two equatorial positions.
///
/// Arguments
/// ---------
/// * `ra1`, `dec1`: first position, in degrees
/// * `ra2`, `dec2`: second position, in degrees
///
/// Return
/// ------
/// * the angular separation in degrees, in `[0, 180]`
pub fn angular_separation(ra1: Degree, dec1: Degree, ra2: Degree, dec2: Degree) -> Degree {
    let u = radec_to_unit_vector(ra1, dec1);
    let v = radec_to_unit_vector(ra2, dec2);
    u.cross(&v).norm().atan2(u.dot(&v)) / RADEG
}

#[cfg(test)]
mod sky_test {
    use super::*;
    use crate::constants::ARCSEC_TO_DEG;
    use approx::assert_relative_eq;

    #[test]
    fn test_valid_radec() {
        assert!(is_valid_radec(0.0, -90.0));
        assert!(is_valid_radec(359.999, 90.0));
        assert!(!is_valid_radec(360.0, 0.0));
        assert!(!is_valid_radec(-0.1, 0.0));
        assert!(!is_valid_radec(10.0, 90.5));
        assert!(!is_valid_radec(f64::NAN, 0.0));
    }

    #[test]
    fn test_separation_along_dec() {
        let sep = angular_separation(150.0, -10.0, 150.0, -10.0 + ARCSEC_TO_DEG);
        assert_relative_eq!(sep, ARCSEC_TO_DEG, epsilon = 1e-12);
    }

    #[test]
    fn test_separation_wraps_ra() {
        let sep = angular_separation(359.9999, 0.0, 0.0001, 0.0);
        assert_relative_eq!(sep, 0.0002, epsilon = 1e-10);
    }

    #[test]
    fn test_separation_shrinks_with_cos_dec() {
        // One arcsecond of RA at dec=60 is half an arcsecond on the sky
        let sep = angular_separation(10.0, 60.0, 10.0 + ARCSEC_TO_DEG, 60.0);
        assert_relative_eq!(sep, 0.5 * ARCSEC_TO_DEG, epsilon = 1e-9);
    }
}
