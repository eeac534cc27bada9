//! Vectorized derivation functions used by quantity-modifier tables.
//!
//! Every function takes the already-resolved source columns, in the order
//! they are listed in the modifier entry, and returns a new column of the
//! same length.

use std::sync::Arc;

use crate::column::Column;
use crate::error::{Error, Result};

/// A derivation function bound into a modifier table.
pub type DeriveFn = Arc<dyn Fn(&[Column]) -> Result<Column> + Send + Sync>;

// AB magnitude zero point with respect to nanoJansky.
// 8.90 is the definition of AB; 2.5 * 9 comes from nano = 10^-9.
const AB_MAG_ZP_NJY: f64 = 2.5 * 9.0 + 8.90;

fn expect_args(args: &[Column], n: usize, func: &str) -> Result<()> {
    if args.len() != n {
        return Err(Error::config(format!(
            "{} expects {} argument(s), got {}",
            func,
            n,
            args.len()
        )));
    }
    Ok(())
}

/// Convert radians to degrees.
pub fn rad2deg(args: &[Column]) -> Result<Column> {
    expect_args(args, 1, "rad2deg")?;
    let v = args[0].to_f64_vec()?;
    Ok(Column::Float64(
        v.into_iter().map(|x| x.to_degrees()).collect(),
    ))
}

/// Convert calibrated nanoJansky flux to AB mag.
pub fn convert_nanojansky_to_mag(args: &[Column]) -> Result<Column> {
    expect_args(args, 1, "convert_nanojansky_to_mag")?;
    let flux = args[0].to_f64_vec()?;
    Ok(Column::Float64(
        flux.into_iter()
            .map(|f| -2.5 * f.log10() + AB_MAG_ZP_NJY)
            .collect(),
    ))
}

/// Convert DM-reported flux to nanoJansky, based on the fluxmag0 value
/// (the flux corresponding to AB mag = 0).
pub fn convert_flux_to_nanojansky(args: &[Column]) -> Result<Column> {
    expect_args(args, 2, "convert_flux_to_nanojansky")?;
    let flux = args[0].to_f64_vec()?;
    let fluxmag0 = args[1].to_f64_vec()?;
    let scale = 10f64.powf(AB_MAG_ZP_NJY / 2.5);
    Ok(Column::Float64(
        flux.iter()
            .zip(&fluxmag0)
            .map(|(&f, &m0)| scale * f / m0)
            .collect(),
    ))
}

/// Convert calibrated flux to AB mag via nanoJansky.
pub fn convert_flux_to_mag(args: &[Column]) -> Result<Column> {
    let njy = convert_flux_to_nanojansky(args)?;
    convert_nanojansky_to_mag(&[njy])
}

/// Convert flux and flux error to mag error.
///
/// Assumes a symmetric flux error and uses the instantaneous derivative, so
/// a negative flux with a positive error yields a finite negative mag error.
pub fn convert_flux_err_to_mag_err(args: &[Column]) -> Result<Column> {
    expect_args(args, 2, "convert_flux_err_to_mag_err")?;
    let flux = args[0].to_f64_vec()?;
    let flux_err = args[1].to_f64_vec()?;
    let k = 2.5 / std::f64::consts::LN_10;
    Ok(Column::Float64(
        flux.iter()
            .zip(&flux_err)
            .map(|(&f, &e)| k * (e / f))
            .collect(),
    ))
}

/// Elementwise ratio of two columns.
pub fn divide(args: &[Column]) -> Result<Column> {
    expect_args(args, 2, "divide")?;
    let a = args[0].to_f64_vec()?;
    let b = args[1].to_f64_vec()?;
    Ok(Column::Float64(
        a.iter().zip(&b).map(|(&x, &y)| x / y).collect(),
    ))
}

/// V-band extinction from luminosities with and without dust:
/// `A_v = -2.5 log10(lum_dust / lum)`.
pub fn calc_av(args: &[Column]) -> Result<Column> {
    expect_args(args, 2, "calc_av")?;
    let lum = args[0].to_f64_vec()?;
    let lum_dust = args[1].to_f64_vec()?;
    Ok(Column::Float64(
        lum.iter()
            .zip(&lum_dust)
            .map(|(&v, &vd)| -2.5 * (vd / v).log10())
            .collect(),
    ))
}

/// Generate a mask for a set of flag columns: true iff all flags are false.
pub fn create_basic_flag_mask(args: &[Column]) -> Result<Column> {
    if args.is_empty() {
        return Err(Error::config(
            "create_basic_flag_mask expects at least one argument",
        ));
    }
    let mut out = vec![true; args[0].len()];
    for flag in args {
        let flag = flag.as_bool_slice()?;
        if flag.len() != out.len() {
            return Err(Error::config("flag columns have mismatched lengths"));
        }
        for (o, &f) in out.iter_mut().zip(flag) {
            *o &= !f;
        }
    }
    Ok(Column::Bool(out))
}

/// PSF FWHM in arcsec from the second moments of the PSF model, for a given
/// pixel scale (arcsec per pixel).
pub fn psf_fwhm(pixel_scale: f64) -> DeriveFn {
    Arc::new(move |args: &[Column]| {
        expect_args(args, 3, "psf_fwhm")?;
        let xx = args[0].to_f64_vec()?;
        let yy = args[1].to_f64_vec()?;
        let xy = args[2].to_f64_vec()?;
        Ok(Column::Float64(
            xx.iter()
                .zip(&yy)
                .zip(&xy)
                .map(|((&xx, &yy), &xy)| pixel_scale * 2.355 * (xx * yy - xy * xy).powf(0.25))
                .collect(),
        ))
    })
}

/// Look up a stock derivation function by the name used in catalog configs.
/// Returns None for names that need extra parameters (see [`psf_fwhm`]).
pub fn by_name(name: &str) -> Option<DeriveFn> {
    let f: DeriveFn = match name {
        "rad2deg" => Arc::new(rad2deg),
        "convert_nanojansky_to_mag" => Arc::new(convert_nanojansky_to_mag),
        "convert_flux_to_nanojansky" => Arc::new(convert_flux_to_nanojansky),
        "convert_flux_to_mag" => Arc::new(convert_flux_to_mag),
        "convert_flux_err_to_mag_err" => Arc::new(convert_flux_err_to_mag_err),
        "divide" => Arc::new(divide),
        "calc_av" => Arc::new(calc_av),
        "create_basic_flag_mask" => Arc::new(create_basic_flag_mask),
        _ => return None,
    };
    Some(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(col: Column) -> Vec<f64> {
        match col {
            Column::Float64(v) => v,
            other => panic!("expected float column, got {:?}", other),
        }
    }

    #[test]
    fn calc_av_example() {
        let out = calc_av(&[
            Column::Float64(vec![1.0, 2.0]),
            Column::Float64(vec![1.0, 1.0]),
        ])
        .unwrap();
        let v = floats(out);
        assert!(v[0].abs() < 1e-12);
        assert!((v[1] - (-2.5 * 0.5f64.log10())).abs() < 1e-12);
        assert!((v[1] - 0.7526).abs() < 1e-4);
    }

    #[test]
    fn flag_mask_true_iff_all_false() {
        let out = create_basic_flag_mask(&[
            Column::Bool(vec![false, true]),
            Column::Bool(vec![false, false]),
        ])
        .unwrap();
        assert_eq!(out, Column::Bool(vec![true, false]));
    }

    #[test]
    fn nanojansky_round_trip_at_zero_point() {
        // A flux equal to fluxmag0 is AB mag 0 by definition.
        let mag = convert_flux_to_mag(&[
            Column::Float64(vec![1000.0]),
            Column::Float64(vec![1000.0]),
        ])
        .unwrap();
        assert!(floats(mag)[0].abs() < 1e-10);
    }

    #[test]
    fn rad2deg_widens_ints() {
        let out = rad2deg(&[Column::Int64(vec![0])]).unwrap();
        assert_eq!(floats(out), vec![0.0]);
    }

    #[test]
    fn mag_err_sign_follows_flux() {
        let v = floats(
            convert_flux_err_to_mag_err(&[
                Column::Float64(vec![-10.0]),
                Column::Float64(vec![1.0]),
            ])
            .unwrap(),
        );
        assert!(v[0].is_finite() && v[0] < 0.0);
    }

    #[test]
    fn psf_fwhm_scales_with_pixel_scale() {
        let f = psf_fwhm(0.2);
        // A circular PSF with xx = yy = 4, xy = 0 has determinant 16, so
        // fwhm = 0.2 * 2.355 * 16^0.25 = 0.2 * 2.355 * 2.
        let v = floats(
            f(&[
                Column::Float64(vec![4.0, 1.0]),
                Column::Float64(vec![4.0, 1.0]),
                Column::Float64(vec![0.0, 0.0]),
            ])
            .unwrap(),
        );
        assert!((v[0] - 0.2 * 2.355 * 2.0).abs() < 1e-12);
        assert!((v[1] - 0.2 * 2.355).abs() < 1e-12);

        let half = floats(
            psf_fwhm(0.1)(&[
                Column::Float64(vec![4.0]),
                Column::Float64(vec![4.0]),
                Column::Float64(vec![0.0]),
            ])
            .unwrap(),
        );
        assert!((half[0] - v[0] / 2.0).abs() < 1e-12);
    }

    #[test]
    fn psf_fwhm_rejects_wrong_arity() {
        let f = psf_fwhm(0.2);
        assert!(f(&[Column::Float64(vec![1.0])]).is_err());
    }

    #[test]
    fn by_name_resolves_stock_functions() {
        assert!(by_name("calc_av").is_some());
        assert!(by_name("no_such_function").is_none());
    }
}
