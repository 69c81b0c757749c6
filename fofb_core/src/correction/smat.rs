//! Response-matrix inversion.
//!
//! `S` maps corrector space to measurement space (rows = BPMs, columns =
//! correctors). The cached inverse is the truncated SVD pseudo-inverse,
//! keeping the `ivec` largest singular values (all above tolerance when
//! `ivec` is zero or exceeds the rank).
//!
//! With weighting, each corrector is scaled by `w_j = 1/‖S_j‖` (normalized
//! so the largest weight is one) before inversion and again afterwards:
//! `S⁺_w = diag(w) · pinv(S · diag(w))`.

use nalgebra::{DMatrix, DVector};

use crate::error::FofbError;

/// Cached inverse of one plane.
#[derive(Debug, Clone, PartialEq)]
pub struct InverseResponse {
    /// Correctors × BPMs.
    pub inverse: DMatrix<f64>,
    /// Per-corrector weights, when weighting is on.
    pub weights: Option<DVector<f64>>,
    /// Singular values kept.
    pub kept: usize,
}

/// Build a matrix from BPM rows, checking the expected shape.
pub fn matrix_from_rows(
    rows: &[Vec<f64>],
    bpms: usize,
    cms: usize,
    plane: &str,
) -> Result<DMatrix<f64>, FofbError> {
    if rows.len() != bpms {
        return Err(FofbError::CalibrationMismatch(format!(
            "{plane}: response matrix has {} rows, expected {bpms}",
            rows.len()
        )));
    }
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != cms) {
        return Err(FofbError::CalibrationMismatch(format!(
            "{plane}: response matrix row {i} has {} columns, expected {cms}",
            row.len()
        )));
    }
    Ok(DMatrix::from_fn(bpms, cms, |r, c| rows[r][c]))
}

/// Corrector weights `1/‖column‖`, normalized to a maximum of one.
pub fn corrector_weights(smat: &DMatrix<f64>, plane: &str) -> Result<DVector<f64>, FofbError> {
    let mut w = DVector::zeros(smat.ncols());
    for (j, col) in smat.column_iter().enumerate() {
        let norm = col.norm();
        if norm == 0.0 {
            return Err(FofbError::CalibrationMismatch(format!(
                "{plane}: corrector {j} has no response"
            )));
        }
        w[j] = 1.0 / norm;
    }
    let max = w.max();
    w /= max;
    Ok(w)
}

/// Invert `smat` keeping `ivec` singular values.
pub fn invert(
    smat: &DMatrix<f64>,
    ivec: f64,
    weighted: bool,
    plane: &str,
) -> Result<InverseResponse, FofbError> {
    if smat.is_empty() {
        return Err(FofbError::CalibrationMismatch(format!(
            "{plane}: empty response matrix"
        )));
    }
    if smat.iter().any(|v| !v.is_finite()) {
        return Err(FofbError::CalibrationMismatch(format!(
            "{plane}: response matrix contains non-finite values"
        )));
    }

    let weights = if weighted {
        Some(corrector_weights(smat, plane)?)
    } else {
        None
    };
    let scaled = match &weights {
        Some(w) => smat * DMatrix::from_diagonal(w),
        None => smat.clone(),
    };

    let (bpms, cms) = scaled.shape();
    let svd = scaled.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u.as_ref(), svd.v_t.as_ref()) else {
        return Err(FofbError::CalibrationMismatch(format!(
            "{plane}: SVD did not converge"
        )));
    };
    let sv = &svd.singular_values;

    let mut order: Vec<usize> = (0..sv.len()).collect();
    order.sort_by(|&a, &b| sv[b].total_cmp(&sv[a]));

    let s_max = sv.max();
    let tol = s_max * bpms.max(cms) as f64 * f64::EPSILON;
    let rank = order.iter().take_while(|&&k| sv[k] > tol).count();
    if rank == 0 {
        return Err(FofbError::CalibrationMismatch(format!(
            "{plane}: response matrix has rank 0"
        )));
    }
    let requested = ivec.max(0.0) as usize;
    let kept = if requested == 0 { rank } else { requested.min(rank) };

    let mut inverse = DMatrix::zeros(cms, bpms);
    for &k in &order[..kept] {
        let v_k = v_t.row(k).transpose();
        inverse.ger(1.0 / sv[k], &v_k, &u.column(k), 1.0);
    }
    if let Some(w) = &weights {
        inverse = DMatrix::from_diagonal(w) * inverse;
    }

    Ok(InverseResponse {
        inverse,
        weights,
        kept,
    })
}
