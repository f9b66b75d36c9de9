//! 2D projection of stored embeddings for visualization.

use ndarray::{Array1, Array2, Axis};

use crate::models::VisualizationPoint;

/// Upper bound on vectors pulled from a store for one projection.
pub const MAX_VISUALIZATION_SAMPLES: usize = 5000;

/// Label carried by the embedded query point.
pub const QUERY_LABEL: &str = "USER_QUERY";

const POWER_ITERATIONS: usize = 64;

/// Project labelled vectors onto their first two principal components.
///
/// Vectors whose dimensionality differs from the first one are dropped.
pub fn project_2d(samples: &[(Vec<f32>, String)]) -> Vec<VisualizationPoint> {
    let Some(dim) = samples.first().map(|(v, _)| v.len()) else {
        return Vec::new();
    };
    let rows: Vec<&(Vec<f32>, String)> = samples.iter().filter(|(v, _)| v.len() == dim).collect();
    if dim == 0 || rows.is_empty() {
        return Vec::new();
    }

    let flat: Vec<f64> = rows
        .iter()
        .flat_map(|(v, _)| v.iter().map(|x| f64::from(*x)))
        .collect();
    let Ok(mut data) = Array2::from_shape_vec((rows.len(), dim), flat) else {
        return Vec::new();
    };
    if let Some(mean) = data.mean_axis(Axis(0)) {
        data -= &mean;
    }

    let first = principal_component(&data, None);
    let second = principal_component(&data, Some(&first));
    let xs = data.dot(&first);
    let ys = data.dot(&second);

    rows.iter()
        .enumerate()
        .map(|(i, (_, label))| VisualizationPoint {
            x: xs[i] as f32,
            y: ys[i] as f32,
            label: label.clone(),
        })
        .collect()
}

/// Power iteration on the covariance `XᵀX`, orthogonal to `exclude` when given.
fn principal_component(data: &Array2<f64>, exclude: Option<&Array1<f64>>) -> Array1<f64> {
    let dim = data.ncols();
    let mut v = Array1::from_iter((0..dim).map(|i| 1.0 + (i % 7) as f64 * 0.1));
    orthonormalize(&mut v, exclude);

    for _ in 0..POWER_ITERATIONS {
        let mut next = data.t().dot(&data.dot(&v));
        orthonormalize(&mut next, exclude);
        if next.iter().all(|x| *x == 0.0) {
            break;
        }
        v = next;
    }
    v
}

fn orthonormalize(v: &mut Array1<f64>, exclude: Option<&Array1<f64>>) {
    if let Some(u) = exclude {
        let projection = v.dot(u);
        v.scaled_add(-projection, u);
    }
    let norm = v.dot(v).sqrt();
    if norm > f64::EPSILON {
        v.mapv_inplace(|x| x / norm);
    } else {
        v.fill(0.0);
    }
}
