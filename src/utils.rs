use ndarray::{Array1, Array2, Axis};

/// Scale a vector to unit length. Zero vectors are left untouched.
#[must_use]
pub fn l2_normalize(mut v: Array1<f32>) -> Array1<f32> {
    let norm = v.dot(&v).sqrt();
    if norm > 0.0 {
        v /= norm;
    }
    v
}

/// Scale every row of a `[N, D]` matrix to unit length.
#[must_use]
pub fn l2_normalize_rows(mut m: Array2<f32>) -> Array2<f32> {
    for mut row in m.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row /= norm;
        }
    }
    m
}

/// Shorten a URL for log lines.
#[must_use]
pub fn truncate_url(url: &str) -> &str {
    match url.char_indices().nth(60) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
