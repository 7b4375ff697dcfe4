use ndarray::{Array1, ArrayView1};

pub(crate) fn normalize_vector(vec: ArrayView1<'_, f32>) -> Array1<f32> {
    let norm: f32 = vec.iter().map(|&x| x * x).sum::<f32>().sqrt();
    if norm > 1e-10 {
        vec.mapv(|x| x / norm)
    } else {
        Array1::zeros(vec.len())
    }
}

pub(crate) fn squared_euclidean(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(&x, &y)| (x - y) * (x - y)).sum()
}

/// `1 - cos(a, b)`; expects `a_unit` already normalized.
pub(crate) fn cosine_distance(a_unit: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    let b_unit = normalize_vector(b);
    1.0 - a_unit.dot(&b_unit)
}
